//! Tree-walking interpreter.
//!
//! Evaluation is synchronous. Every loop iteration first calls
//! [`Host::checkpoint`], which is where the embedder yields and where a stop
//! request surfaces as [`Interrupt::Stopped`]. `try`/`catch` only intercepts
//! [`Interrupt::Error`].

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use hashbrown::HashMap;

use super::ast::*;
use super::host::Host;
use super::value::{Closure, Object, Value};
use crate::error::TensorError;

pub const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct ScriptError {
    pub message: String,
    /// The value passed to `throw`, if the error came from script code.
    pub thrown: Option<Value>,
}

#[derive(Debug, Clone)]
pub enum Interrupt {
    Stopped,
    Error(ScriptError),
}

impl Interrupt {
    pub fn error(message: impl Into<String>) -> Self {
        Interrupt::Error(ScriptError {
            message: message.into(),
            thrown: None,
        })
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Stopped => write!(f, "Execution stopped."),
            Interrupt::Error(e) => write!(f, "{}", e.message),
        }
    }
}

impl From<TensorError> for Interrupt {
    fn from(e: TensorError) -> Self {
        Interrupt::error(e.to_string())
    }
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    constant: bool,
}

pub struct Scope {
    vars: RefCell<HashMap<Rc<str>, Binding>>,
    parent: Option<Rc<Scope>>,
    /// `var` declarations land in the nearest function scope.
    function: bool,
}

impl Scope {
    pub fn new(parent: Option<Rc<Scope>>, function: bool) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(HashMap::new()),
            parent,
            function,
        })
    }

    pub fn declare(&self, name: Rc<str>, value: Value, constant: bool) {
        self.vars
            .borrow_mut()
            .insert(name, Binding { value, constant });
    }

    /// Sibling scope holding copies of this scope's own bindings.
    fn fork(&self) -> Rc<Scope> {
        Rc::new(Scope {
            vars: RefCell::new(self.vars.borrow().clone()),
            parent: self.parent.clone(),
            function: self.function,
        })
    }

    fn has_own(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(b) = self.vars.borrow().get(name) {
            return Some(b.value.clone());
        }
        let mut scope = self.parent.as_deref();
        while let Some(s) = scope {
            if let Some(b) = s.vars.borrow().get(name) {
                return Some(b.value.clone());
            }
            scope = s.parent.as_deref();
        }
        None
    }

    pub fn assign(&self, name: &str, value: Value) -> Result<(), Interrupt> {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if let Some(b) = s.vars.borrow_mut().get_mut(name) {
                if b.constant {
                    return Err(Interrupt::error("Assignment to constant variable."));
                }
                b.value = value;
                return Ok(());
            }
            scope = s.parent.as_deref();
        }
        Err(Interrupt::error(format!("{name} is not defined")))
    }

    fn function_scope(self: &Rc<Self>) -> Rc<Scope> {
        let mut scope = self.clone();
        while !scope.function {
            match &scope.parent {
                Some(p) => scope = p.clone(),
                None => break,
            }
        }
        scope
    }
}

pub(super) enum Completion {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Assignment target with its object already evaluated.
enum Place {
    Var(Rc<str>),
    Prop(Value, Rc<str>),
    Index(Value, Value),
}

fn collect_vars(stmts: &[Stmt], out: &mut Vec<Rc<str>>) {
    for stmt in stmts {
        collect_vars_stmt(stmt, out);
    }
}

fn collect_vars_stmt(stmt: &Stmt, out: &mut Vec<Rc<str>>) {
    match stmt {
        Stmt::Var {
            kind: VarKind::Var,
            decls,
        } => out.extend(decls.iter().map(|(name, _)| name.clone())),
        Stmt::Block(body) => collect_vars(body, out),
        Stmt::If {
            then, otherwise, ..
        } => {
            collect_vars_stmt(then, out);
            if let Some(o) = otherwise {
                collect_vars_stmt(o, out);
            }
        }
        Stmt::While { body, .. } | Stmt::DoWhile { body, .. } => collect_vars_stmt(body, out),
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_vars_stmt(init, out);
            }
            collect_vars_stmt(body, out);
        }
        Stmt::ForOf {
            kind, name, body, ..
        }
        | Stmt::ForIn {
            kind, name, body, ..
        } => {
            if *kind == Some(VarKind::Var) {
                out.push(name.clone());
            }
            collect_vars_stmt(body, out);
        }
        Stmt::Switch { cases, .. } => {
            for case in cases {
                collect_vars(&case.body, out);
            }
        }
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            collect_vars(body, out);
            if let Some(c) = catch {
                collect_vars(&c.body, out);
            }
            if let Some(f) = finally {
                collect_vars(f, out);
            }
        }
        _ => {}
    }
}

/// Short source-ish rendering of a callee for "is not a function" messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", describe(object), property),
        Expr::Index { object, .. } => format!("{}[...]", describe(object)),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

/// `for (x of value)` snapshots the sequence before the first iteration.
fn iterate(value: &Value, source: &Expr) -> Result<Vec<Value>, Interrupt> {
    match value {
        Value::Array(items) => Ok(items.borrow().clone()),
        Value::Floats(buf) => Ok(buf.to_vec().into_iter().map(Value::from).collect()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::from(c.to_string())).collect()),
        _ => Err(Interrupt::error(format!(
            "{} is not iterable",
            describe(source)
        ))),
    }
}

/// Keys visited by `for (k in value)`, as strings.
fn enumerable_keys(value: &Value) -> Vec<Value> {
    let indices =
        |n: usize| -> Vec<Value> { (0..n).map(|i| Value::from(i.to_string())).collect() };
    match value {
        Value::Object(o) => o.borrow().keys().map(|k| Value::Str(k.clone())).collect(),
        Value::Array(items) => indices(items.borrow().len()),
        Value::Floats(buf) => indices(buf.len()),
        Value::Str(s) => indices(s.chars().count()),
        _ => Vec::new(),
    }
}

fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    (n.trunc() % 4_294_967_296.0) as i64 as u32 as i32
}

pub(super) fn error_object(message: &str) -> Value {
    Object::new()
        .with("name", Value::from("Error"))
        .with("message", Value::from(message))
        .into()
}

/// Message for an uncaught `throw value`.
fn thrown_message(value: &Value) -> String {
    match value.field("message") {
        Value::Str(s) => s.to_string(),
        _ => value.to_display(),
    }
}

pub struct Interpreter<'h, H: Host + ?Sized> {
    pub(super) host: &'h mut H,
    globals: Rc<Scope>,
    depth: usize,
}

impl<'h, H: Host + ?Sized> Interpreter<'h, H> {
    pub fn new(host: &'h mut H) -> Self {
        let globals = Scope::new(None, true);
        super::methods::install_globals(&globals);
        Self {
            host,
            globals,
            depth: 0,
        }
    }

    pub fn define_global(&mut self, name: &str, value: Value) {
        self.globals.declare(name.into(), value, false);
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lookup(name)
    }

    pub fn run(&mut self, program: &Program) -> Result<(), Interrupt> {
        let globals = self.globals.clone();
        self.hoist(&program.body, &globals, true);
        match self.exec_stmts(&program.body, &globals)? {
            Completion::Break | Completion::Continue => {
                Err(Interrupt::error("Illegal break or continue statement"))
            }
            _ => Ok(()),
        }
    }

    fn hoist(&mut self, stmts: &[Stmt], scope: &Rc<Scope>, function_body: bool) {
        if function_body {
            let mut names = Vec::new();
            collect_vars(stmts, &mut names);
            for name in names {
                if !scope.has_own(&name) {
                    scope.declare(name, Value::Undefined, false);
                }
            }
        }
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = Value::Function(Rc::new(Closure {
                        def: def.clone(),
                        env: scope.clone(),
                    }));
                    scope.declare(name.clone(), closure, false);
                }
            }
        }
    }

    fn exec_stmts(&mut self, stmts: &[Stmt], scope: &Rc<Scope>) -> Result<Completion, Interrupt> {
        for stmt in stmts {
            match self.exec(stmt, scope)? {
                Completion::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_for_each(
        &mut self,
        kind: Option<VarKind>,
        name: &Rc<str>,
        items: Vec<Value>,
        body: &Stmt,
        scope: &Rc<Scope>,
    ) -> Result<Completion, Interrupt> {
        for item in items {
            self.host.checkpoint()?;
            let iter_scope = Scope::new(Some(scope.clone()), false);
            match kind {
                Some(VarKind::Let) => iter_scope.declare(name.clone(), item, false),
                Some(VarKind::Const) => iter_scope.declare(name.clone(), item, true),
                Some(VarKind::Var) => scope.function_scope().declare(name.clone(), item, false),
                None => scope.assign(name, item)?,
            }
            match self.exec(body, &iter_scope)? {
                Completion::Break => break,
                Completion::Return(v) => return Ok(Completion::Return(v)),
                Completion::Normal | Completion::Continue => {}
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, stmts: &[Stmt], parent: &Rc<Scope>) -> Result<Completion, Interrupt> {
        let scope = Scope::new(Some(parent.clone()), false);
        self.hoist(stmts, &scope, false);
        self.exec_stmts(stmts, &scope)
    }

    fn exec(&mut self, stmt: &Stmt, scope: &Rc<Scope>) -> Result<Completion, Interrupt> {
        match stmt {
            Stmt::Empty | Stmt::Function(_) => Ok(Completion::Normal),
            Stmt::Expr(e) => {
                self.eval(e, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Var { kind, decls } => {
                for (name, init) in decls {
                    let value = match init {
                        Some(e) => self.eval(e, scope)?,
                        None => Value::Undefined,
                    };
                    match kind {
                        VarKind::Var => {
                            let target = scope.function_scope();
                            if init.is_some() || !target.has_own(name) {
                                target.declare(name.clone(), value, false);
                            }
                        }
                        VarKind::Let => scope.declare(name.clone(), value, false),
                        VarKind::Const => scope.declare(name.clone(), value, true),
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Block(body) => self.exec_block(body, scope),
            Stmt::If {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.exec(then, scope)
                } else if let Some(o) = otherwise {
                    self.exec(o, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::While { test, body } => {
                loop {
                    self.host.checkpoint()?;
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal | Completion::Continue => {}
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::DoWhile { body, test } => {
                loop {
                    self.host.checkpoint()?;
                    match self.exec(body, scope)? {
                        Completion::Break => break,
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if !self.eval(test, scope)?.truthy() {
                        break;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => {
                let mut loop_scope = Scope::new(Some(scope.clone()), false);
                if let Some(init) = init {
                    self.exec(init, &loop_scope)?;
                }
                // `let`/`const` loop variables get a fresh binding per iteration,
                // so closures made in the body keep that iteration's value.
                let per_iteration = matches!(
                    init.as_deref(),
                    Some(Stmt::Var {
                        kind: VarKind::Let | VarKind::Const,
                        ..
                    })
                );
                if per_iteration {
                    loop_scope = loop_scope.fork();
                }
                loop {
                    self.host.checkpoint()?;
                    if let Some(test) = test {
                        if !self.eval(test, &loop_scope)?.truthy() {
                            break;
                        }
                    }
                    match self.exec(body, &loop_scope)? {
                        Completion::Break => break,
                        Completion::Return(v) => return Ok(Completion::Return(v)),
                        Completion::Normal | Completion::Continue => {}
                    }
                    if per_iteration {
                        loop_scope = loop_scope.fork();
                    }
                    if let Some(update) = update {
                        self.eval(update, &loop_scope)?;
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::ForOf {
                kind,
                name,
                iterable,
                body,
            } => {
                let iterated = self.eval(iterable, scope)?;
                let items = iterate(&iterated, iterable)?;
                self.exec_for_each(*kind, name, items, body, scope)
            }
            Stmt::ForIn {
                kind,
                name,
                object,
                body,
            } => {
                let keys = enumerable_keys(&self.eval(object, scope)?);
                self.exec_for_each(*kind, name, keys, body, scope)
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                let value = self.eval(discriminant, scope)?;
                let switch_scope = Scope::new(Some(scope.clone()), false);
                for case in cases {
                    self.hoist(&case.body, &switch_scope, false);
                }
                let mut start = None;
                for (i, case) in cases.iter().enumerate() {
                    if let Some(test) = &case.test {
                        if self.eval(test, &switch_scope)?.strict_equals(&value) {
                            start = Some(i);
                            break;
                        }
                    }
                }
                let start = start.or_else(|| cases.iter().position(|c| c.test.is_none()));
                let Some(start) = start else {
                    return Ok(Completion::Normal);
                };
                // Matching arms fall through until a `break`.
                for case in &cases[start..] {
                    match self.exec_stmts(&case.body, &switch_scope)? {
                        Completion::Normal => {}
                        Completion::Break => break,
                        other => return Ok(other),
                    }
                }
                Ok(Completion::Normal)
            }
            Stmt::Break => Ok(Completion::Break),
            Stmt::Continue => Ok(Completion::Continue),
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.eval(e, scope)?,
                    None => Value::Undefined,
                };
                Ok(Completion::Return(v))
            }
            Stmt::Throw(e) => {
                let value = self.eval(e, scope)?;
                Err(Interrupt::Error(ScriptError {
                    message: thrown_message(&value),
                    thrown: Some(value),
                }))
            }
            Stmt::Try {
                body,
                catch,
                finally,
            } => {
                let mut result = self.exec_block(body, scope);
                if let (Err(Interrupt::Error(err)), Some(clause)) = (&result, catch) {
                    let caught = err
                        .thrown
                        .clone()
                        .unwrap_or_else(|| error_object(&err.message));
                    let catch_scope = Scope::new(Some(scope.clone()), false);
                    if let Some(param) = &clause.param {
                        catch_scope.declare(param.clone(), caught, false);
                    }
                    result = self.exec_block(&clause.body, &catch_scope);
                }
                if matches!(result, Err(Interrupt::Stopped)) {
                    return result;
                }
                if let Some(finally) = finally {
                    match self.exec_block(finally, scope)? {
                        Completion::Normal => {}
                        other => return Ok(other),
                    }
                }
                result
            }
        }
    }

    pub(super) fn eval(&mut self, expr: &Expr, scope: &Rc<Scope>) -> Result<Value, Interrupt> {
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Undefined => Ok(Value::Undefined),
            Expr::Template(pieces) => {
                let mut out = String::new();
                for piece in pieces {
                    match piece {
                        TemplatePiece::Text(t) => out.push_str(t),
                        TemplatePiece::Expr(e) => out.push_str(&self.eval(e, scope)?.to_display()),
                    }
                }
                Ok(Value::from(out))
            }
            Expr::Ident(name) => scope
                .lookup(name)
                .ok_or_else(|| Interrupt::error(format!("{name} is not defined"))),
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, scope)?);
                }
                Ok(Value::array(out))
            }
            Expr::Object(props) => {
                let mut obj = Object::new();
                for (key, value) in props {
                    let key: Rc<str> = match key {
                        PropKey::Named(name) => name.clone(),
                        PropKey::Computed(e) => self.eval(e, scope)?.to_display().into(),
                    };
                    let value = self.eval(value, scope)?;
                    obj.set(key, value);
                }
                Ok(obj.into())
            }
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let obj = self.eval(object, scope)?;
                if *optional && obj.is_nullish() {
                    return Ok(Value::Undefined);
                }
                self.get_property(&obj, property)
            }
            Expr::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                self.get_index(&obj, &key)
            }
            Expr::Call { callee, args } => self.eval_call(callee, args, scope),
            Expr::New { callee, args } => {
                let f = self.eval(callee, scope)?;
                let argv = self.eval_args(args, scope)?;
                if !f.is_callable() {
                    return Err(Interrupt::error(format!(
                        "{} is not a constructor",
                        describe(callee)
                    )));
                }
                self.call_value(&f, argv, None)
            }
            Expr::Function(def) => Ok(Value::Function(Rc::new(Closure {
                def: def.clone(),
                env: scope.clone(),
            }))),
            Expr::Unary { op, expr } => {
                if *op == UnaryOp::Typeof {
                    if let Expr::Ident(name) = &**expr {
                        return Ok(Value::from(
                            scope.lookup(name).map(|v| v.type_of()).unwrap_or("undefined"),
                        ));
                    }
                }
                let v = self.eval(expr, scope)?;
                Ok(match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::Neg => Value::Number(-v.to_number()),
                    UnaryOp::Plus => Value::Number(v.to_number()),
                    UnaryOp::BitNot => Value::Number(!to_int32(v.to_number()) as f64),
                    UnaryOp::Typeof => Value::from(v.type_of()),
                    UnaryOp::Void => Value::Undefined,
                })
            }
            Expr::Update {
                increment,
                prefix,
                target,
            } => {
                let place = self.resolve_place(target, scope)?;
                let old = self.read_place(&place, scope)?.to_number();
                let new = if *increment { old + 1.0 } else { old - 1.0 };
                self.write_place(place, Value::Number(new), scope)?;
                Ok(Value::Number(if *prefix { new } else { old }))
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left, scope)?;
                let r = self.eval(right, scope)?;
                Ok(binary_op(*op, &l, &r))
            }
            Expr::Logical { op, left, right } => {
                let l = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Nullish => !l.is_nullish(),
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::Conditional {
                test,
                then,
                otherwise,
            } => {
                if self.eval(test, scope)?.truthy() {
                    self.eval(then, scope)
                } else {
                    self.eval(otherwise, scope)
                }
            }
            Expr::Assign { op, target, value } => {
                let place = self.resolve_place(target, scope)?;
                let v = match op {
                    None => self.eval(value, scope)?,
                    Some(op) => {
                        let current = self.read_place(&place, scope)?;
                        let rhs = self.eval(value, scope)?;
                        binary_op(*op, &current, &rhs)
                    }
                };
                self.write_place(place, v.clone(), scope)?;
                Ok(v)
            }
            Expr::Sequence(items) => {
                let mut last = Value::Undefined;
                for item in items {
                    last = self.eval(item, scope)?;
                }
                Ok(last)
            }
            Expr::Await(e) => self.eval(e, scope),
        }
    }

    fn resolve_place(&mut self, target: &Expr, scope: &Rc<Scope>) -> Result<Place, Interrupt> {
        match target {
            Expr::Ident(name) => Ok(Place::Var(name.clone())),
            Expr::Member {
                object, property, ..
            } => Ok(Place::Prop(self.eval(object, scope)?, property.clone())),
            Expr::Index { object, index } => {
                let obj = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                Ok(Place::Index(obj, key))
            }
            _ => Err(Interrupt::error("Invalid assignment target")),
        }
    }

    fn read_place(&mut self, place: &Place, scope: &Rc<Scope>) -> Result<Value, Interrupt> {
        match place {
            Place::Var(name) => scope
                .lookup(name)
                .ok_or_else(|| Interrupt::error(format!("{name} is not defined"))),
            Place::Prop(obj, key) => self.get_property(obj, key),
            Place::Index(obj, key) => self.get_index(obj, key),
        }
    }

    fn write_place(&mut self, place: Place, value: Value, scope: &Rc<Scope>) -> Result<(), Interrupt> {
        match place {
            Place::Var(name) => scope.assign(&name, value),
            Place::Prop(obj, key) => self.set_property(&obj, &key, value),
            Place::Index(obj, key) => self.set_index(&obj, &key, value),
        }
    }

    fn eval_args(&mut self, args: &[Expr], scope: &Rc<Scope>) -> Result<Vec<Value>, Interrupt> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            out.push(self.eval(a, scope)?);
        }
        Ok(out)
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr], scope: &Rc<Scope>) -> Result<Value, Interrupt> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let this = self.eval(object, scope)?;
                if *optional && this.is_nullish() {
                    return Ok(Value::Undefined);
                }
                let argv = self.eval_args(args, scope)?;
                self.call_method(&this, property, argv, &|| describe(callee))
            }
            Expr::Index { object, index } => {
                let this = self.eval(object, scope)?;
                let key = self.eval(index, scope)?;
                let argv = self.eval_args(args, scope)?;
                match &key {
                    Value::Str(name) => {
                        let name = name.clone();
                        self.call_method(&this, &name, argv, &|| describe(callee))
                    }
                    _ => {
                        let f = self.get_index(&this, &key)?;
                        if !f.is_callable() {
                            return Err(Interrupt::error(format!(
                                "{} is not a function",
                                describe(callee)
                            )));
                        }
                        self.call_value(&f, argv, Some(this))
                    }
                }
            }
            _ => {
                let f = self.eval(callee, scope)?;
                if !f.is_callable() {
                    return Err(Interrupt::error(format!(
                        "{} is not a function",
                        describe(callee)
                    )));
                }
                let argv = self.eval_args(args, scope)?;
                self.call_value(&f, argv, None)
            }
        }
    }

    pub(super) fn call_value(
        &mut self,
        f: &Value,
        args: Vec<Value>,
        this: Option<Value>,
    ) -> Result<Value, Interrupt> {
        match f {
            Value::Function(closure) => self.call_closure(closure, args, this),
            Value::Host(func) => self.host.call(*func, &args),
            Value::Builtin(b) => self.call_builtin(*b, args),
            other => Err(Interrupt::error(format!(
                "{} is not a function",
                other.to_display()
            ))),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Rc<Closure>,
        args: Vec<Value>,
        this: Option<Value>,
    ) -> Result<Value, Interrupt> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Interrupt::error("Maximum call stack size exceeded"));
        }
        let def = &closure.def;
        let scope = Scope::new(Some(closure.env.clone()), true);
        if let (Some(name), false) = (&def.name, def.arrow) {
            scope.declare(name.clone(), Value::Function(closure.clone()), false);
        }
        if !def.arrow {
            scope.declare("this".into(), this.unwrap_or_default(), false);
        }
        let mut args = args.into_iter();
        for param in &def.params {
            scope.declare(param.clone(), args.next().unwrap_or_default(), false);
        }

        self.depth += 1;
        let result = match &def.body {
            FunctionBody::Expr(e) => self.eval(e, &scope),
            FunctionBody::Block(body) => {
                self.hoist(body, &scope, true);
                match self.exec_stmts(body, &scope) {
                    Ok(Completion::Return(v)) => Ok(v),
                    Ok(_) => Ok(Value::Undefined),
                    Err(e) => Err(e),
                }
            }
        };
        self.depth -= 1;
        result
    }

    /// Call a script callback, e.g. from `Array.prototype.map`.
    pub(super) fn invoke(&mut self, f: &Value, args: Vec<Value>) -> Result<Value, Interrupt> {
        if !f.is_callable() {
            return Err(Interrupt::error(format!(
                "{} is not a function",
                f.to_display()
            )));
        }
        self.call_value(f, args, None)
    }

    pub(super) fn builtin_random(&mut self) -> f64 {
        self.host.random()
    }
}

fn to_primitive(v: &Value) -> Value {
    match v {
        Value::Array(_)
        | Value::Object(_)
        | Value::Floats(_)
        | Value::Tensor(_)
        | Value::Layer(_)
        | Value::Network(_)
        | Value::Function(_)
        | Value::Host(_)
        | Value::Builtin(_) => Value::from(v.to_display()),
        other => other.clone(),
    }
}

fn compare(l: &Value, r: &Value) -> Option<std::cmp::Ordering> {
    let (l, r) = (to_primitive(l), to_primitive(r));
    match (&l, &r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => l.to_number().partial_cmp(&r.to_number()),
    }
}

pub(super) fn binary_op(op: BinaryOp, l: &Value, r: &Value) -> Value {
    use std::cmp::Ordering::*;
    use BinaryOp::*;
    match op {
        Add => {
            let (lp, rp) = (to_primitive(l), to_primitive(r));
            match (&lp, &rp) {
                (Value::Str(_), _) | (_, Value::Str(_)) => {
                    Value::from(format!("{}{}", lp.to_display(), rp.to_display()))
                }
                _ => Value::Number(lp.to_number() + rp.to_number()),
            }
        }
        Sub => Value::Number(l.to_number() - r.to_number()),
        Mul => Value::Number(l.to_number() * r.to_number()),
        Div => Value::Number(l.to_number() / r.to_number()),
        Rem => Value::Number(l.to_number() % r.to_number()),
        Pow => Value::Number(l.to_number().powf(r.to_number())),
        Lt => Value::Bool(compare(l, r) == Some(Less)),
        LtEq => Value::Bool(matches!(compare(l, r), Some(Less | Equal))),
        Gt => Value::Bool(compare(l, r) == Some(Greater)),
        GtEq => Value::Bool(matches!(compare(l, r), Some(Greater | Equal))),
        Eq => Value::Bool(l.loose_equals(r)),
        NotEq => Value::Bool(!l.loose_equals(r)),
        StrictEq => Value::Bool(l.strict_equals(r)),
        StrictNotEq => Value::Bool(!l.strict_equals(r)),
        BitAnd => Value::Number((to_int32(l.to_number()) & to_int32(r.to_number())) as f64),
        BitOr => Value::Number((to_int32(l.to_number()) | to_int32(r.to_number())) as f64),
        BitXor => Value::Number((to_int32(l.to_number()) ^ to_int32(r.to_number())) as f64),
        Shl => {
            let shift = (to_int32(r.to_number()) as u32) & 31;
            Value::Number(to_int32(l.to_number()).wrapping_shl(shift) as f64)
        }
        Shr => {
            let shift = (to_int32(r.to_number()) as u32) & 31;
            Value::Number((to_int32(l.to_number()) >> shift) as f64)
        }
        UShr => {
            let shift = (to_int32(r.to_number()) as u32) & 31;
            Value::Number(((to_int32(l.to_number()) as u32) >> shift) as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::host::HostFn;
    use crate::script::parser::parse;

    /// Collects `console.log` output; counts checkpoints; stops after a budget.
    struct TestHost {
        logs: Vec<String>,
        checkpoints: usize,
        stop_after: Option<usize>,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                logs: Vec::new(),
                checkpoints: 0,
                stop_after: None,
            }
        }
    }

    impl Host for TestHost {
        fn call(&mut self, func: HostFn, args: &[Value]) -> Result<Value, Interrupt> {
            match func {
                HostFn::UtilsLog => {
                    let msg = args.first().map(|v| v.to_display()).unwrap_or_default();
                    self.logs.push(msg);
                    Ok(Value::Undefined)
                }
                _ => Ok(Value::Null),
            }
        }

        fn checkpoint(&mut self) -> Result<(), Interrupt> {
            self.checkpoints += 1;
            match self.stop_after {
                Some(n) if self.checkpoints > n => Err(Interrupt::Stopped),
                _ => Ok(()),
            }
        }

        fn random(&mut self) -> f64 {
            0.25
        }

        fn log(&mut self, message: &str) {
            self.logs.push(message.to_string());
        }
    }

    fn run_with(host: &mut TestHost, src: &str) -> Result<(), Interrupt> {
        let program = parse(src).unwrap();
        let mut interp = Interpreter::new(host);
        interp.define_global("GB", crate::script::host::build_gb());
        interp.run(&program)
    }

    fn output(src: &str) -> Vec<String> {
        let mut host = TestHost::new();
        if let Err(e) = run_with(&mut host, src) {
            panic!("script failed: {e}");
        }
        host.logs
    }

    fn error(src: &str) -> String {
        let mut host = TestHost::new();
        match run_with(&mut host, src) {
            Err(Interrupt::Error(e)) => e.message,
            other => panic!("expected a script error, got {other:?}"),
        }
    }

    #[test]
    fn arithmetic_and_concatenation() {
        assert_eq!(
            output("console.log(1 + 2, '1' + 2, 7 % 3, 2 ** 10, 1 / 0, 0.1 * 3)"),
            vec!["3 12 1 1024 Infinity 0.30000000000000004"]
        );
        assert_eq!(output("console.log(`x=${1 + 1}!`)"), vec!["x=2!"]);
        assert_eq!(output("console.log((0.123456).toFixed(3))"), vec!["0.123"]);
    }

    #[test]
    fn closures_capture_their_environment() {
        let src = "
            function counter() { let n = 0; return () => ++n; }
            const c = counter();
            c(); c();
            console.log(c());
        ";
        assert_eq!(output(src), vec!["3"]);
    }

    #[test]
    fn hoisting_of_functions_and_vars() {
        let src = "
            console.log(f(), typeof v);
            function f() { return 'hoisted'; }
            var v = 1;
        ";
        assert_eq!(output(src), vec!["hoisted undefined"]);
    }

    #[test]
    fn let_is_block_scoped_var_is_not() {
        let src = "
            { let a = 1; var b = 2; }
            console.log(typeof a, b);
        ";
        assert_eq!(output(src), vec!["undefined 2"]);
    }

    #[test]
    fn loops_break_continue_and_for_of() {
        let src = "
            let out = [];
            for (let i = 0; i < 10; i++) {
                if (i % 2) continue;
                if (i > 6) break;
                out.push(i);
            }
            for (const x of [7, 8]) out.push(x);
            let k = 0;
            do { k++; } while (k < 3);
            console.log(out.join(','), k);
        ";
        assert_eq!(output(src), vec!["0,2,4,6,7,8 3"]);
    }

    #[test]
    fn for_let_binds_a_fresh_variable_each_iteration() {
        let src = "
            const f = [];
            for (let i = 0; i < 3; i++) { f.push(() => i); }
            GB.Utils.log(f.map(g => g()).join(','));
            let n = 0;
            for (let i = 0; i < 6; i++) { i++; n++; }
            const v = [];
            for (var j = 0; j < 3; j++) { v.push(() => j); }
            console.log(n, v.map(g => g()).join(','));
        ";
        assert_eq!(output(src), vec!["0,1,2", "3 3,3,3"]);
    }

    #[test]
    fn switch_matches_strictly_and_falls_through() {
        let src = "
            function name(x) {
                switch (x) {
                    case 1: return 'one';
                    case '2':
                    case 2: return 'two';
                    default: return 'many';
                }
            }
            const seen = [];
            for (const x of [1, 2, '2', 3]) seen.push(name(x));
            let trail = '';
            switch (5) {
                default: trail += 'd';
                case 6: trail += '6'; break;
                case 7: trail += '7';
            }
            switch ('none') { case 'x': trail += 'x'; }
            console.log(seen.join(','), trail);
        ";
        assert_eq!(output(src), vec!["one,two,two,many d6"]);
    }

    #[test]
    fn continue_inside_switch_targets_the_loop() {
        let src = "
            const out = [];
            for (let i = 0; i < 4; i++) {
                switch (i % 2) {
                    case 0: continue;
                }
                out.push(i);
            }
            console.log(out.join(','));
        ";
        assert_eq!(output(src), vec!["1,3"]);
    }

    #[test]
    fn for_in_visits_keys() {
        let src = "
            const o = { b: 1, a: 2 };
            const keys = [];
            for (const k in o) keys.push(k + '=' + o[k]);
            let idx = '';
            for (var i in ['x', 'y']) idx += i;
            for (const k in null) idx += '!';
            console.log(keys.join(','), idx, typeof i);
        ";
        assert_eq!(output(src), vec!["b=1,a=2 01 string"]);
    }

    #[test]
    fn every_loop_iteration_hits_the_checkpoint() {
        let mut host = TestHost::new();
        run_with(&mut host, "for (let i = 0; i < 5; i++) {} let j = 0; while (j < 3) j++;").unwrap();
        // Five for-iterations plus the failing test, three while-iterations plus the failing test.
        assert_eq!(host.checkpoints, 6 + 4);
    }

    #[test]
    fn stop_cannot_be_caught() {
        let mut host = TestHost::new();
        host.stop_after = Some(3);
        let result = run_with(
            &mut host,
            "try { while (true) {} } catch (e) { GB.Utils.log('caught'); } finally { GB.Utils.log('finally'); }",
        );
        assert!(matches!(result, Err(Interrupt::Stopped)));
        assert!(host.logs.is_empty());
    }

    #[test]
    fn try_catch_finally() {
        let src = "
            try { throw new Error('boom'); } catch (e) { console.log(e.message); } finally { console.log('done'); }
            try { undefinedThing(); } catch (e) { console.log(e.message); }
            try { throw 'raw'; } catch (e) { console.log(e); }
        ";
        assert_eq!(
            output(src),
            vec!["boom", "done", "undefinedThing is not defined", "raw"]
        );
    }

    #[test]
    fn runtime_error_messages() {
        assert_eq!(error("x + 1"), "x is not defined");
        assert_eq!(
            error("let a = {}; a.b.c"),
            "Cannot read properties of undefined (reading 'c')"
        );
        assert_eq!(error("let a = {}; a.b()"), "a.b is not a function");
        assert_eq!(error("const c = 1; c = 2"), "Assignment to constant variable.");
        assert_eq!(error("throw new Error('custom')"), "custom");
    }

    #[test]
    fn call_depth_is_limited() {
        assert_eq!(
            error("function f(n) { return f(n + 1); } f(0)"),
            "Maximum call stack size exceeded"
        );
    }

    #[test]
    fn equality_and_logical_operators() {
        assert_eq!(
            output("console.log(1 == '1', 1 === '1', null == undefined, null ?? 'd', 0 || 'x', 1 && 2)"),
            vec!["true false true d x 2"]
        );
    }

    #[test]
    fn objects_and_methods_with_this() {
        let src = "
            const o = { n: 2, twice() { return this.n * 2; } };
            o.n += 3;
            console.log(o.twice(), Object.keys(o).join('|'), JSON.stringify({a: [1, 'b'], c: null}));
        ";
        assert_eq!(output(src), vec![r#"10 n|twice {"a":[1,"b"],"c":null}"#]);
    }

    #[test]
    fn math_random_uses_the_host_generator() {
        assert_eq!(output("console.log(Math.random())"), vec!["0.25"]);
    }

    #[test]
    fn host_functions_are_reachable_through_gb() {
        let mut host = TestHost::new();
        run_with(&mut host, "GB.Utils.log('hi ' + typeof GB.Tensor)").unwrap();
        assert_eq!(host.logs, vec!["hi function"]);
    }
}
