//! Recursive-descent parser producing [`Program`].
//!
//! Binary operators use precedence climbing; semicolons are optional before a
//! line break, a closing brace or the end of input.
//!
//! Not accepted: classes, destructuring, spread/rest, labels, getters and
//! setters, regular expression literals, and `in`/`instanceof` as operators.

use std::rc::Rc;

use super::ast::*;
use super::lexer::{tokenize, tokenize_at, TemplatePart, Tok, Token};
use crate::error::CompileError;

pub fn parse(source: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

const RESERVED: &[&str] = &[
    "var", "let", "const", "if", "else", "while", "do", "for", "break", "continue", "function",
    "return", "throw", "try", "catch", "finally", "new", "typeof", "void", "true", "false",
    "null", "in", "of", "switch", "case", "default",
];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

fn binary_precedence(p: &str) -> Option<(u8, Op)> {
    use BinaryOp::*;
    Some(match p {
        "??" => (1, Op::Logical(LogicalOp::Nullish)),
        "||" => (2, Op::Logical(LogicalOp::Or)),
        "&&" => (3, Op::Logical(LogicalOp::And)),
        "|" => (4, Op::Binary(BitOr)),
        "^" => (5, Op::Binary(BitXor)),
        "&" => (6, Op::Binary(BitAnd)),
        "==" => (7, Op::Binary(Eq)),
        "!=" => (7, Op::Binary(NotEq)),
        "===" => (7, Op::Binary(StrictEq)),
        "!==" => (7, Op::Binary(StrictNotEq)),
        "<" => (8, Op::Binary(Lt)),
        "<=" => (8, Op::Binary(LtEq)),
        ">" => (8, Op::Binary(Gt)),
        ">=" => (8, Op::Binary(GtEq)),
        "<<" => (9, Op::Binary(Shl)),
        ">>" => (9, Op::Binary(Shr)),
        ">>>" => (9, Op::Binary(UShr)),
        "+" => (10, Op::Binary(Add)),
        "-" => (10, Op::Binary(Sub)),
        "*" => (11, Op::Binary(Mul)),
        "/" => (11, Op::Binary(Div)),
        "%" => (11, Op::Binary(Rem)),
        "**" => (12, Op::Binary(Pow)),
        _ => return None,
    })
}

#[derive(Clone, Copy)]
enum Op {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

fn assign_op(p: &str) -> Option<Option<BinaryOp>> {
    use BinaryOp::*;
    Some(match p {
        "=" => None,
        "+=" => Some(Add),
        "-=" => Some(Sub),
        "*=" => Some(Mul),
        "/=" => Some(Div),
        "%=" => Some(Rem),
        "**=" => Some(Pow),
        "<<=" => Some(Shl),
        ">>=" => Some(Shr),
        ">>>=" => Some(UShr),
        _ => return None,
    })
}

impl Parser {
    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek_tok(&self) -> &Tok {
        &self.peek().tok
    }

    fn peek_ahead(&self, n: usize) -> &Tok {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].tok
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek_tok(), Tok::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek_tok(), Tok::Punct(q) if *q == p)
    }

    fn is_keyword(&self, k: &str) -> bool {
        matches!(self.peek_tok(), Tok::Ident(name) if name == k)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, k: &str) -> bool {
        if self.is_keyword(k) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> CompileError {
        let t = self.peek();
        let message = match &t.tok {
            Tok::Eof => "Unexpected end of input".to_string(),
            Tok::Num(n) => format!("Unexpected number '{n}'"),
            Tok::Str(_) | Tok::Template(_) => "Unexpected string".to_string(),
            Tok::Ident(name) => format!("Unexpected token '{name}'"),
            Tok::Punct(p) => format!("Unexpected token '{p}'"),
        };
        CompileError {
            message,
            line: t.line,
            column: t.column,
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<(), CompileError> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn identifier(&mut self) -> Result<Rc<str>, CompileError> {
        match self.peek_tok() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                let name: Rc<str> = name.as_str().into();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    /// Property names may be reserved words.
    fn property_name(&mut self) -> Result<Rc<str>, CompileError> {
        match self.peek_tok() {
            Tok::Ident(name) => {
                let name: Rc<str> = name.as_str().into();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected()),
        }
    }

    fn consume_semicolon(&mut self) -> Result<(), CompileError> {
        if self.eat_punct(";") || self.is_punct("}") || self.at_eof() || self.peek().newline_before
        {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    // ---------------------------------------------------------------------
    // Statements

    fn statement(&mut self) -> Result<Stmt, CompileError> {
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        if self.is_punct("{") {
            return Ok(Stmt::Block(self.block()?));
        }
        let keyword = match self.peek_tok() {
            Tok::Ident(name) => name.clone(),
            _ => String::new(),
        };
        match keyword.as_str() {
            "var" | "let" | "const" => {
                let stmt = self.var_declaration()?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            "if" => self.if_statement(),
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            "do" => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword("while") {
                    return Err(self.unexpected());
                }
                self.expect_punct("(")?;
                let test = self.expression()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body, test })
            }
            "for" => self.for_statement(),
            "break" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            "continue" => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            "function" => {
                self.advance();
                let def = self.function_rest(true)?;
                Ok(Stmt::Function(def))
            }
            "async" if matches!(self.peek_ahead(1), Tok::Ident(k) if k == "function") => {
                self.advance();
                self.advance();
                let def = self.function_rest(true)?;
                Ok(Stmt::Function(def))
            }
            "return" => {
                self.advance();
                let value = if self.is_punct(";")
                    || self.is_punct("}")
                    || self.at_eof()
                    || self.peek().newline_before
                {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            "throw" => {
                self.advance();
                let value = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.try_statement(),
            "switch" => self.switch_statement(),
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> Result<Vec<Stmt>, CompileError> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.unexpected());
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn var_kind(&mut self) -> Option<VarKind> {
        let kind = match self.peek_tok() {
            Tok::Ident(k) if k == "var" => VarKind::Var,
            Tok::Ident(k) if k == "let" => VarKind::Let,
            Tok::Ident(k) if k == "const" => VarKind::Const,
            _ => return None,
        };
        self.advance();
        Some(kind)
    }

    fn var_declaration(&mut self) -> Result<Stmt, CompileError> {
        let kind = self.var_kind().ok_or_else(|| self.unexpected())?;
        let mut decls = Vec::new();
        loop {
            let name = self.identifier()?;
            let init = if self.eat_punct("=") {
                Some(self.assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Var { kind, decls })
    }

    fn if_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance();
        self.expect_punct("(")?;
        let test = self.expression()?;
        self.expect_punct(")")?;
        let then = Box::new(self.statement()?);
        let otherwise = if self.eat_keyword("else") {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Stmt::If {
            test,
            then,
            otherwise,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance();
        self.expect_punct("(")?;

        // for (x of xs) / for (const k in obj)
        let declares = matches!(self.peek_tok(), Tok::Ident(k) if k == "var" || k == "let" || k == "const");
        let of_offset = if declares { 2 } else { 1 };
        let name_offset = of_offset - 1;
        let each = match self.peek_ahead(of_offset) {
            Tok::Ident(k) if k == "of" || k == "in" => Some(k == "in"),
            _ => None,
        }
        .filter(|_| matches!(self.peek_ahead(name_offset), Tok::Ident(_)));
        if let Some(keys) = each {
            let kind = if declares { self.var_kind() } else { None };
            let name = self.identifier()?;
            self.advance();
            let target = self.assignment()?;
            self.expect_punct(")")?;
            let body = Box::new(self.statement()?);
            return Ok(if keys {
                Stmt::ForIn {
                    kind,
                    name,
                    object: target,
                    body,
                }
            } else {
                Stmt::ForOf {
                    kind,
                    name,
                    iterable: target,
                    body,
                }
            });
        }

        let init = if self.is_punct(";") {
            None
        } else if declares {
            Some(Box::new(self.var_declaration()?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(";")?;
        let test = if self.is_punct(";") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(")")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn switch_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance();
        self.expect_punct("(")?;
        let discriminant = self.expression()?;
        self.expect_punct(")")?;
        self.expect_punct("{")?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat_punct("}") {
            let test = if self.eat_keyword("case") {
                Some(self.expression()?)
            } else if !seen_default && self.eat_keyword("default") {
                seen_default = true;
                None
            } else {
                return Err(self.unexpected());
            };
            self.expect_punct(":")?;
            let mut body = Vec::new();
            while !(self.is_punct("}") || self.is_keyword("case") || self.is_keyword("default")) {
                if self.at_eof() {
                    return Err(self.unexpected());
                }
                body.push(self.statement()?);
            }
            cases.push(SwitchCase { test, body });
        }
        Ok(Stmt::Switch {
            discriminant,
            cases,
        })
    }

    fn try_statement(&mut self) -> Result<Stmt, CompileError> {
        self.advance();
        let body = self.block()?;
        let catch = if self.eat_keyword("catch") {
            let param = if self.eat_punct("(") {
                let name = self.identifier()?;
                self.expect_punct(")")?;
                Some(name)
            } else {
                None
            };
            Some(CatchClause {
                param,
                body: self.block()?,
            })
        } else {
            None
        };
        let finally = if self.eat_keyword("finally") {
            Some(self.block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.unexpected());
        }
        Ok(Stmt::Try {
            body,
            catch,
            finally,
        })
    }

    /// Parameters and body of a function after the `function` keyword.
    fn function_rest(&mut self, needs_name: bool) -> Result<Rc<FunctionDef>, CompileError> {
        self.eat_punct("*");
        let name = if matches!(self.peek_tok(), Tok::Ident(_)) && !self.is_punct("(") {
            Some(self.identifier()?)
        } else if needs_name {
            return Err(self.unexpected());
        } else {
            None
        };
        let params = self.params()?;
        let body = FunctionBody::Block(self.block()?);
        Ok(Rc::new(FunctionDef {
            name,
            params,
            body,
            arrow: false,
        }))
    }

    fn params(&mut self) -> Result<Vec<Rc<str>>, CompileError> {
        self.expect_punct("(")?;
        let mut params = Vec::new();
        while !self.is_punct(")") {
            params.push(self.identifier()?);
            // Default values are accepted and ignored.
            if self.eat_punct("=") {
                self.assignment()?;
            }
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(params)
    }

    // ---------------------------------------------------------------------
    // Expressions

    fn expression(&mut self) -> Result<Expr, CompileError> {
        let first = self.assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn arrow_ahead(&self) -> bool {
        match self.peek_tok() {
            Tok::Ident(name) if !RESERVED.contains(&name.as_str()) => {
                matches!(self.peek_ahead(1), Tok::Punct("=>"))
            }
            Tok::Punct("(") => {
                let mut depth = 0usize;
                let mut i = self.pos;
                while i < self.tokens.len() {
                    match &self.tokens[i].tok {
                        Tok::Punct("(") => depth += 1,
                        Tok::Punct(")") => {
                            depth -= 1;
                            if depth == 0 {
                                return matches!(
                                    self.tokens.get(i + 1).map(|t| &t.tok),
                                    Some(Tok::Punct("=>"))
                                );
                            }
                        }
                        Tok::Eof => return false,
                        _ => {}
                    }
                    i += 1;
                }
                false
            }
            _ => false,
        }
    }

    fn arrow_function(&mut self) -> Result<Expr, CompileError> {
        let params = if self.is_punct("(") {
            self.params()?
        } else {
            vec![self.identifier()?]
        };
        self.expect_punct("=>")?;
        let body = if self.is_punct("{") {
            FunctionBody::Block(self.block()?)
        } else {
            FunctionBody::Expr(self.assignment()?)
        };
        Ok(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            body,
            arrow: true,
        })))
    }

    fn assignment(&mut self) -> Result<Expr, CompileError> {
        if self.is_keyword("async") {
            let next_is_arrow_start = matches!(self.peek_ahead(1), Tok::Punct("(") | Tok::Ident(_));
            if next_is_arrow_start {
                let save = self.pos;
                self.advance();
                if self.arrow_ahead() {
                    return self.arrow_function();
                }
                self.pos = save;
            }
        }
        if self.arrow_ahead() {
            return self.arrow_function();
        }

        let target = self.conditional()?;
        let op = match self.peek_tok() {
            Tok::Punct(p) => assign_op(p),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(target);
        };
        if !matches!(
            target,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        ) {
            return Err(CompileError {
                message: "Invalid left-hand side in assignment".to_string(),
                line: self.peek().line,
                column: self.peek().column,
            });
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, CompileError> {
        let test = self.binary(1)?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(":")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, CompileError> {
        let mut left = self.unary()?;
        loop {
            let Some((prec, op)) = (match self.peek_tok() {
                Tok::Punct(p) => binary_precedence(p),
                _ => None,
            }) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            // `**` is right-associative.
            let next_min = if prec == 12 { prec } else { prec + 1 };
            let right = self.binary(next_min)?;
            left = match op {
                Op::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Op::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek_tok() {
            Tok::Punct("!") => Some(UnaryOp::Not),
            Tok::Punct("-") => Some(UnaryOp::Neg),
            Tok::Punct("+") => Some(UnaryOp::Plus),
            Tok::Punct("~") => Some(UnaryOp::BitNot),
            Tok::Ident(k) if k == "typeof" => Some(UnaryOp::Typeof),
            Tok::Ident(k) if k == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expr::Unary {
                op,
                expr: Box::new(expr),
            });
        }
        if self.is_keyword("await") {
            self.advance();
            let expr = self.unary()?;
            return Ok(Expr::Await(Box::new(expr)));
        }
        if self.is_punct("++") || self.is_punct("--") {
            let increment = self.is_punct("++");
            self.advance();
            let target = self.unary()?;
            self.check_update_target(&target)?;
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn check_update_target(&self, target: &Expr) -> Result<(), CompileError> {
        if matches!(
            target,
            Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
        ) {
            Ok(())
        } else {
            Err(CompileError {
                message: "Invalid left-hand side expression in update operation".to_string(),
                line: self.peek().line,
                column: self.peek().column,
            })
        }
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let expr = self.call_member()?;
        if (self.is_punct("++") || self.is_punct("--")) && !self.peek().newline_before {
            let increment = self.is_punct("++");
            self.check_update_target(&expr)?;
            self.advance();
            return Ok(Expr::Update {
                increment,
                prefix: false,
                target: Box::new(expr),
            });
        }
        Ok(expr)
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect_punct("(")?;
        let mut args = Vec::new();
        while !self.is_punct(")") {
            args.push(self.assignment()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(args)
    }

    fn call_member(&mut self) -> Result<Expr, CompileError> {
        let mut expr = if self.eat_keyword("new") {
            let callee = self.member_only()?;
            let args = if self.is_punct("(") {
                self.arguments()?
            } else {
                Vec::new()
            };
            Expr::New {
                callee: Box::new(callee),
                args,
            }
        } else {
            self.primary()?
        };
        loop {
            if self.eat_punct(".") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: false,
                };
            } else if self.eat_punct("?.") {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                    optional: true,
                };
            } else if self.eat_punct("[") {
                let index = self.expression()?;
                self.expect_punct("]")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.is_punct("(") {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    /// Callee of `new`: a primary followed by member accesses, no calls.
    fn member_only(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        while self.eat_punct(".") {
            let property = self.property_name()?;
            expr = Expr::Member {
                object: Box::new(expr),
                property,
                optional: false,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek().clone();
        match token.tok {
            Tok::Num(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Str(s.into()))
            }
            Tok::Template(parts) => {
                self.advance();
                let mut pieces = Vec::with_capacity(parts.len());
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => pieces.push(TemplatePiece::Text(t.into())),
                        TemplatePart::Expr(src, line, column) => {
                            let tokens = tokenize_at(&src, line, column)?;
                            let mut inner = Parser { tokens, pos: 0 };
                            let expr = inner.expression()?;
                            if !inner.at_eof() {
                                return Err(inner.unexpected());
                            }
                            pieces.push(TemplatePiece::Expr(expr));
                        }
                    }
                }
                Ok(Expr::Template(pieces))
            }
            Tok::Ident(ref name) => match name.as_str() {
                "true" => {
                    self.advance();
                    Ok(Expr::Bool(true))
                }
                "false" => {
                    self.advance();
                    Ok(Expr::Bool(false))
                }
                "null" => {
                    self.advance();
                    Ok(Expr::Null)
                }
                "undefined" => {
                    self.advance();
                    Ok(Expr::Undefined)
                }
                "function" => {
                    self.advance();
                    Ok(Expr::Function(self.function_rest(false)?))
                }
                "async" if matches!(self.peek_ahead(1), Tok::Ident(k) if k == "function") => {
                    self.advance();
                    self.advance();
                    Ok(Expr::Function(self.function_rest(false)?))
                }
                _ => Ok(Expr::Ident(self.identifier()?)),
            },
            Tok::Punct("(") => {
                self.advance();
                let expr = self.expression()?;
                self.expect_punct(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => {
                self.advance();
                let mut items = Vec::new();
                while !self.is_punct("]") {
                    items.push(self.assignment()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            Tok::Punct("{") => self.object_literal(),
            _ => Err(self.unexpected()),
        }
    }

    fn object_literal(&mut self) -> Result<Expr, CompileError> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.is_punct("}") {
            let key = match self.peek_tok().clone() {
                Tok::Ident(name) => {
                    self.advance();
                    PropKey::Named(name.into())
                }
                Tok::Str(s) => {
                    self.advance();
                    PropKey::Named(s.into())
                }
                Tok::Num(n) => {
                    self.advance();
                    PropKey::Named(super::value::format_number(n).into())
                }
                Tok::Punct("[") => {
                    self.advance();
                    let expr = self.assignment()?;
                    self.expect_punct("]")?;
                    PropKey::Computed(expr)
                }
                _ => return Err(self.unexpected()),
            };

            let value = if self.eat_punct(":") {
                self.assignment()?
            } else if self.is_punct("(") {
                // Method shorthand: `name(a, b) { ... }`.
                let params = self.params()?;
                let body = FunctionBody::Block(self.block()?);
                let name = match &key {
                    PropKey::Named(n) => Some(n.clone()),
                    PropKey::Computed(_) => None,
                };
                Expr::Function(Rc::new(FunctionDef {
                    name,
                    params,
                    body,
                    arrow: false,
                }))
            } else {
                match &key {
                    PropKey::Named(name) => Expr::Ident(name.clone()),
                    PropKey::Computed(_) => return Err(self.unexpected()),
                }
            };
            props.push((key, value));
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct("}")?;
        Ok(Expr::Object(props))
    }
}
