use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    Typeof,
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePiece {
    Text(Rc<str>),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropKey {
    Named(Rc<str>),
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(Rc<str>),
    Template(Vec<TemplatePiece>),
    Bool(bool),
    Null,
    Undefined,
    Ident(Rc<str>),
    Array(Vec<Expr>),
    Object(Vec<(PropKey, Expr)>),
    Member {
        object: Box<Expr>,
        property: Rc<str>,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function(Rc<FunctionDef>),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Sequence(Vec<Expr>),
    Await(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Block(Vec<Stmt>),
    /// Arrow function with an expression body.
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<Rc<str>>,
    pub params: Vec<Rc<str>>,
    pub body: FunctionBody,
    /// Arrow functions do not bind `this`.
    pub arrow: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub param: Option<Rc<str>>,
    pub body: Vec<Stmt>,
}

/// One `case test:` arm, or `default:` when `test` is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Var {
        kind: VarKind,
        decls: Vec<(Rc<str>, Option<Expr>)>,
    },
    Expr(Expr),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForOf {
        kind: Option<VarKind>,
        name: Rc<str>,
        iterable: Expr,
        body: Box<Stmt>,
    },
    /// `for (k in obj)`: own keys of objects, indices of arrays and strings.
    ForIn {
        kind: Option<VarKind>,
        name: Rc<str>,
        object: Expr,
        body: Box<Stmt>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Break,
    Continue,
    Function(Rc<FunctionDef>),
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        body: Vec<Stmt>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Stmt>>,
    },
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}
