//! Tree-walking interpreter for compiled templates.
//!
//! A render binds the template's variables into a root [`Env`](env::Env)
//! (see [`bind`]) and walks the syntax tree, appending literal text and
//! output values to a string buffer.
//!
//! Abrupt completion travels two ways: `break`, `continue` and `return` are
//! [`Flow`] values returned by statements, while thrown values and runtime
//! failures travel as [`Throw`] in the `Err` position so `?` unwinds them
//! to the nearest `try`.
//!
//! Functions defined by templates keep their environment alive. When the
//! render ends, every environment a closure captured is cleared so the
//! reference cycles between closures and environments do not leak.

pub(crate) mod bind;
pub(crate) mod debug;
pub(crate) mod env;
mod methods;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::compiler::ast::*;
use crate::error::{Error, ErrorKind, Result};
use crate::escape::escape_html;
use crate::stack;
use crate::value::{format_number, to_int32, to_uint32, Callable, Closure, Value};
use env::{AssignError, Env};

/// Nesting limit for calls of template-defined functions.
pub(crate) const MAX_CALL_DEPTH: usize = 100;

/// Services a render needs from the engine that started it.
pub(crate) trait Host {
    /// Renders the template at `path` relative to the current one.
    fn include(
        &self,
        path: &str,
        data: Option<serde_json::Value>,
        options: Option<serde_json::Value>,
    ) -> Result<String>;
}

/// How a statement completed.
pub(crate) enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// A thrown value or runtime failure, unwinding to the nearest `try`.
pub(crate) enum Throw {
    /// A failure raised by the interpreter or a native function.
    Error { kind: ErrorKind, message: String },
    /// A value thrown by template code.
    Value(Value),
    /// A failure of an included template, kept intact.
    Nested(Box<Error>),
}

impl Throw {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Throw::Error {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        Throw::new(ErrorKind::TypeError, message)
    }

    pub(crate) fn range_error(message: impl Into<String>) -> Self {
        Throw::new(ErrorKind::RangeError, message)
    }

    /// The value a `catch` clause receives.
    fn into_value(self) -> Value {
        match self {
            Throw::Value(value) => value,
            Throw::Error { kind, message } => error_object(kind.name(), &message),
            Throw::Nested(err) => match *err {
                Error::Render { kind, message, .. } => error_object(kind.name(), &message),
                Error::Syntax { message, .. } => error_object("SyntaxError", &message),
                other => error_object("Error", &other.to_string()),
            },
        }
    }

    fn into_error(self) -> Error {
        match self {
            Throw::Error { kind, message } => Error::render(kind, message),
            Throw::Value(value) => thrown_value_error(&value),
            Throw::Nested(err) => *err,
        }
    }
}

impl From<Error> for Throw {
    fn from(err: Error) -> Self {
        match err {
            Error::Render {
                kind,
                message,
                line: None,
            } => Throw::Error { kind, message },
            other => Throw::Nested(Box::new(other)),
        }
    }
}

pub(crate) type Exec<T> = std::result::Result<T, Throw>;

/// A failed render.
#[derive(Debug)]
pub(crate) struct Failure {
    pub error: Error,
    /// Last line marker reached; `None` when the failure came from an
    /// included template, which reports its own line.
    pub line: Option<usize>,
}

/// An assignable location.
enum Place {
    Name(Name),
    Property(Value, String),
}

pub(crate) struct Interpreter<'h> {
    host: &'h dyn Host,
    out: String,
    line: Option<usize>,
    depth: usize,
    captured: Vec<Weak<Env>>,
}

impl<'h> Interpreter<'h> {
    pub(crate) fn new(host: &'h dyn Host) -> Self {
        Self {
            host,
            out: String::new(),
            line: None,
            depth: 0,
            captured: Vec::new(),
        }
    }

    /// Runs `script` against the bindings in `root` and returns the output.
    pub(crate) fn run(
        mut self,
        script: &Script,
        root: Rc<Env>,
    ) -> std::result::Result<String, Failure> {
        let result = self.run_body(script, &root);
        self.release(&root);
        match result {
            Ok(()) => Ok(self.out),
            Err(thrown) => {
                let line = match thrown {
                    Throw::Nested(_) => None,
                    _ => self.line,
                };
                Err(Failure {
                    error: thrown.into_error(),
                    line,
                })
            }
        }
    }

    fn run_body(&mut self, script: &Script, root: &Rc<Env>) -> Exec<()> {
        for name in &script.vars {
            root.declare_var(name, None);
        }
        let body = Env::block(root);
        // A top-level `return` ends the render with the output so far.
        self.exec_block(&script.body, &body)?;
        Ok(())
    }

    fn release(&mut self, root: &Rc<Env>) {
        for weak in self.captured.drain(..) {
            let mut frame = weak.upgrade();
            while let Some(env) = frame {
                env.clear();
                frame = env.parent().cloned();
            }
        }
        root.clear();
    }

    // Statements

    fn exec_block(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> Exec<Flow> {
        self.hoist_functions(stmts, env);
        self.exec_list(stmts, env)
    }

    fn exec_list(&mut self, stmts: &[Stmt], env: &Rc<Env>) -> Exec<Flow> {
        for stmt in stmts {
            match self.exec(stmt, env)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn hoist_functions(&mut self, stmts: &[Stmt], env: &Rc<Env>) {
        for stmt in stmts {
            match stmt {
                Stmt::Function(def) => {
                    if let Some(name) = &def.name {
                        let function = self.make_closure(def, env);
                        env.declare(name, function, true);
                    }
                }
                Stmt::Seq(inner) => self.hoist_functions(inner, env),
                _ => {}
            }
        }
    }

    fn exec(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Exec<Flow> {
        stack::ensure(|| self.exec_stmt(stmt, env))
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &Rc<Env>) -> Exec<Flow> {
        match stmt {
            Stmt::Empty | Stmt::Function(_) => {}
            Stmt::Line(line) => self.line = Some(*line),
            Stmt::Text(text) => self.out.push_str(text),
            Stmt::Output(expr, escape) => {
                let text = self.eval(expr, env)?.to_js_string();
                if *escape {
                    self.out.push_str(&escape_html(&text));
                } else {
                    self.out.push_str(&text);
                }
            }
            Stmt::Expr(expr) => {
                self.eval(expr, env)?;
            }
            Stmt::Decl(kind, decls) => {
                for decl in decls {
                    let value = match &decl.init {
                        Some(init) => Some(self.eval(init, env)?),
                        None => None,
                    };
                    match kind {
                        DeclKind::Var => env.declare_var(&decl.name, value),
                        DeclKind::Let => {
                            env.declare(&decl.name, value.unwrap_or_default(), true)
                        }
                        DeclKind::Const => {
                            env.declare(&decl.name, value.unwrap_or_default(), false)
                        }
                    }
                }
            }
            Stmt::Block(body) => return self.exec_block(body, &Env::block(env)),
            Stmt::Seq(body) => return self.exec_list(body, env),
            Stmt::If(test, then, otherwise) => {
                if self.eval(test, env)?.truthy() {
                    return self.exec(then, env);
                } else if let Some(otherwise) = otherwise {
                    return self.exec(otherwise, env);
                }
            }
            Stmt::For {
                init,
                test,
                update,
                body,
            } => return self.exec_for(init.as_deref(), test.as_ref(), update.as_ref(), body, env),
            Stmt::ForIn {
                kind,
                name,
                object,
                body,
                of,
            } => return self.exec_for_in(*kind, name, object, body, *of, env),
            Stmt::While(test, body) => {
                while self.eval(test, env)?.truthy() {
                    match self.exec(body, env)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            Stmt::DoWhile(body, test) => loop {
                match self.exec(body, env)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
                if !self.eval(test, env)?.truthy() {
                    break;
                }
            },
            Stmt::Switch(discriminant, cases) => return self.exec_switch(discriminant, cases, env),
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, env)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
            Stmt::Throw(expr) => return Err(Throw::Value(self.eval(expr, env)?)),
            Stmt::Try {
                block,
                param,
                handler,
                finalizer,
            } => {
                return self.exec_try(
                    block,
                    param.as_ref(),
                    handler.as_deref(),
                    finalizer.as_deref(),
                    env,
                )
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        test: Option<&Expr>,
        update: Option<&Expr>,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> Exec<Flow> {
        let mut frame = Env::block(env);
        if let Some(init) = init {
            self.exec(init, &frame)?;
        }
        // Closures created in the body capture the bindings of their own
        // iteration.
        let per_iteration = matches!(init, Some(Stmt::Decl(DeclKind::Let | DeclKind::Const, _)));

        loop {
            if let Some(test) = test {
                if !self.eval(test, &frame)?.truthy() {
                    break;
                }
            }
            match self.exec(body, &frame)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
            if per_iteration {
                frame = frame.snapshot();
            }
            if let Some(update) = update {
                self.eval(update, &frame)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_for_in(
        &mut self,
        kind: Option<DeclKind>,
        name: &Name,
        object: &Expr,
        body: &Stmt,
        of: bool,
        env: &Rc<Env>,
    ) -> Exec<Flow> {
        let target = self.eval(object, env)?;

        if of {
            match &target {
                Value::Array(items) => {
                    let mut index = 0;
                    loop {
                        let item = match items.borrow().get(index) {
                            Some(item) => item.clone(),
                            None => break,
                        };
                        index += 1;
                        let frame = self.bind_loop_var(kind, name, item, env)?;
                        match self.exec(body, &frame)? {
                            Flow::Break => break,
                            Flow::Return(value) => return Ok(Flow::Return(value)),
                            Flow::Normal | Flow::Continue => {}
                        }
                    }
                    return Ok(Flow::Normal);
                }
                Value::String(text) => {
                    let chars: Vec<Value> =
                        text.chars().map(|c| Value::from(c.to_string())).collect();
                    return self.run_loop(kind, name, chars, body, env);
                }
                _ => {
                    return Err(Throw::type_error(format!(
                        "{} is not iterable",
                        describe(object)
                    )))
                }
            }
        }

        let keys = crate::value::keys(&target);
        self.run_loop(kind, name, keys, body, env)
    }

    fn run_loop(
        &mut self,
        kind: Option<DeclKind>,
        name: &Name,
        items: Vec<Value>,
        body: &Stmt,
        env: &Rc<Env>,
    ) -> Exec<Flow> {
        for item in items {
            let frame = self.bind_loop_var(kind, name, item, env)?;
            match self.exec(body, &frame)? {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn bind_loop_var(
        &mut self,
        kind: Option<DeclKind>,
        name: &Name,
        value: Value,
        env: &Rc<Env>,
    ) -> Exec<Rc<Env>> {
        let frame = Env::block(env);
        match kind {
            Some(DeclKind::Var) => env.declare_var(name, Some(value)),
            Some(kind) => frame.declare(name, value, kind == DeclKind::Let),
            None => self.write(&Place::Name(name.clone()), value, env)?,
        }
        Ok(frame)
    }

    fn exec_switch(&mut self, discriminant: &Expr, cases: &[Case], env: &Rc<Env>) -> Exec<Flow> {
        let value = self.eval(discriminant, env)?;
        let frame = Env::block(env);
        for case in cases {
            self.hoist_functions(&case.body, &frame);
        }

        let mut start = None;
        for (index, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if self.eval(test, &frame)?.strict_equals(&value) {
                    start = Some(index);
                    break;
                }
            }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|case| case.test.is_none())) else {
            return Ok(Flow::Normal);
        };

        for case in &cases[start..] {
            match self.exec_list(&case.body, &frame)? {
                Flow::Normal => {}
                Flow::Break => break,
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_try(
        &mut self,
        block: &[Stmt],
        param: Option<&Name>,
        handler: Option<&[Stmt]>,
        finalizer: Option<&[Stmt]>,
        env: &Rc<Env>,
    ) -> Exec<Flow> {
        let mut result = self.exec_block(block, &Env::block(env));

        if let Some(handler) = handler {
            if let Err(thrown) = result {
                let frame = Env::block(env);
                if let Some(param) = param {
                    frame.declare(param, thrown.into_value(), true);
                }
                result = self.exec_block(handler, &frame);
            }
        }

        if let Some(finalizer) = finalizer {
            match self.exec_block(finalizer, &Env::block(env))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        result
    }

    // Expressions

    pub(crate) fn eval(&mut self, expr: &Expr, env: &Rc<Env>) -> Exec<Value> {
        stack::ensure(|| self.eval_expr(expr, env))
    }

    fn eval_expr(&mut self, expr: &Expr, env: &Rc<Env>) -> Exec<Value> {
        Ok(match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::String(Rc::from(&**s)),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Regex(regex) => Value::Regex(regex.clone()),
            Expr::Template(quasis, exprs) => {
                let mut text = String::new();
                for (index, quasi) in quasis.iter().enumerate() {
                    text.push_str(quasi);
                    if let Some(expr) = exprs.get(index) {
                        text.push_str(&self.eval(expr, env)?.to_js_string());
                    }
                }
                Value::from(text)
            }
            Expr::Ident(name) => self.lookup(name, env)?,
            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Value::array(values)
            }
            Expr::Object(props) => {
                let mut map = BTreeMap::new();
                for (prop, value) in props {
                    let key = self.property_key(prop, env)?;
                    let value = self.eval(value, env)?;
                    map.insert(key, value);
                }
                Value::object(map)
            }
            Expr::Function(def) => self.make_closure(def, env),
            Expr::Member(..) | Expr::Call(..) => self.eval_chain(expr, env)?.unwrap_or_default(),
            Expr::Unary(op, operand) => self.eval_unary(*op, operand, env)?,
            Expr::Update(op, prefix, target) => {
                let place = self.place(target, env)?;
                let old = self.read(&place, env)?.to_number();
                let new = match op {
                    UpdateOp::Inc => old + 1.0,
                    UpdateOp::Dec => old - 1.0,
                };
                self.write(&place, Value::Number(new), env)?;
                Value::Number(if *prefix { new } else { old })
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                binary(*op, &left, &right)?
            }
            Expr::Logical(op, left, right) => {
                let left = self.eval(left, env)?;
                if short_circuits(*op, &left) {
                    left
                } else {
                    self.eval(right, env)?
                }
            }
            Expr::Conditional(test, consequent, alternate) => {
                if self.eval(test, env)?.truthy() {
                    self.eval(consequent, env)?
                } else {
                    self.eval(alternate, env)?
                }
            }
            Expr::Assign(op, target, value) => {
                let place = self.place(target, env)?;
                let value = match op {
                    AssignOp::Assign => self.eval(value, env)?,
                    AssignOp::Binary(op) => {
                        let current = self.read(&place, env)?;
                        let right = self.eval(value, env)?;
                        binary(*op, &current, &right)?
                    }
                    AssignOp::Logical(op) => {
                        let current = self.read(&place, env)?;
                        if short_circuits(*op, &current) {
                            return Ok(current);
                        }
                        self.eval(value, env)?
                    }
                };
                self.write(&place, value.clone(), env)?;
                value
            }
            Expr::Sequence(exprs) => {
                let mut last = Value::Undefined;
                for expr in exprs {
                    last = self.eval(expr, env)?;
                }
                last
            }
        })
    }

    /// Evaluates member and call chains. `None` means an optional link
    /// short-circuited the rest of the chain.
    fn eval_chain(&mut self, expr: &Expr, env: &Rc<Env>) -> Exec<Option<Value>> {
        match expr {
            Expr::Member(object, prop, optional) => {
                let Some(target) = self.eval_chain(object, env)? else {
                    return Ok(None);
                };
                if *optional && target.is_nullish() {
                    return Ok(None);
                }
                let key = self.property_key(prop, env)?;
                self.get_property(&target, &key).map(Some)
            }
            Expr::Call(callee, args, optional) => {
                let Some(function) = self.eval_chain(callee, env)? else {
                    return Ok(None);
                };
                if *optional && function.is_nullish() {
                    return Ok(None);
                }
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, env)?);
                }
                match &function {
                    Value::Function(callable) => self.call(callable, values).map(Some),
                    _ => Err(Throw::type_error(format!(
                        "{} is not a function",
                        describe(callee)
                    ))),
                }
            }
            other => self.eval(other, env).map(Some),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr, env: &Rc<Env>) -> Exec<Value> {
        Ok(match op {
            UnaryOp::TypeOf => {
                let value = match operand {
                    Expr::Ident(name) => env.lookup(name).unwrap_or_default(),
                    other => self.eval(other, env)?,
                };
                Value::from(value.type_of())
            }
            UnaryOp::Delete => {
                if let Expr::Member(object, prop, _) = operand {
                    let Some(target) = self.eval_chain(object, env)? else {
                        return Ok(Value::Bool(true));
                    };
                    let key = self.property_key(prop, env)?;
                    self.delete_property(&target, &key)?;
                } else {
                    self.eval(operand, env)?;
                }
                Value::Bool(true)
            }
            UnaryOp::Not => Value::Bool(!self.eval(operand, env)?.truthy()),
            UnaryOp::Neg => Value::Number(-self.eval(operand, env)?.to_number()),
            UnaryOp::Plus => Value::Number(self.eval(operand, env)?.to_number()),
            UnaryOp::BitNot => {
                let operand = self.eval(operand, env)?.to_number();
                Value::Number(f64::from(!to_int32(operand)))
            }
            UnaryOp::Void => {
                self.eval(operand, env)?;
                Value::Undefined
            }
        })
    }

    fn property_key(&mut self, prop: &Prop, env: &Rc<Env>) -> Exec<String> {
        match prop {
            Prop::Name(name) => Ok(name.to_string()),
            Prop::Computed(expr) => Ok(self.eval(expr, env)?.to_property_key()),
        }
    }

    fn lookup(&self, name: &str, env: &Rc<Env>) -> Exec<Value> {
        match env.lookup(name) {
            Some(value) => Ok(value),
            None if name == "undefined" => Ok(Value::Undefined),
            None => Err(Throw::new(
                ErrorKind::ReferenceError,
                format!("{} is not defined", name),
            )),
        }
    }

    fn place(&mut self, target: &Expr, env: &Rc<Env>) -> Exec<Place> {
        match target {
            Expr::Ident(name) => Ok(Place::Name(name.clone())),
            Expr::Member(object, prop, _) => {
                let object = self.eval(object, env)?;
                let key = self.property_key(prop, env)?;
                Ok(Place::Property(object, key))
            }
            _ => Err(Throw::new(ErrorKind::SyntaxError, "Invalid assignment target")),
        }
    }

    fn read(&mut self, place: &Place, env: &Rc<Env>) -> Exec<Value> {
        match place {
            Place::Name(name) => self.lookup(name, env),
            Place::Property(object, key) => self.get_property(object, key),
        }
    }

    fn write(&mut self, place: &Place, value: Value, env: &Rc<Env>) -> Exec<()> {
        match place {
            Place::Name(name) => env.assign(name, value).map_err(|err| match err {
                AssignError::Constant => Throw::type_error("Assignment to constant variable."),
                AssignError::Undeclared => Throw::new(
                    ErrorKind::ReferenceError,
                    format!("{} is not defined", name),
                ),
            }),
            Place::Property(object, key) => self.set_property(object, key, value),
        }
    }

    // Functions

    fn make_closure(&mut self, def: &Arc<FunctionDef>, env: &Rc<Env>) -> Value {
        let weak = Rc::downgrade(env);
        if !self.captured.last().is_some_and(|last| last.ptr_eq(&weak)) {
            self.captured.push(weak);
        }
        Value::Function(Callable::Closure(Rc::new(Closure {
            def: def.clone(),
            env: env.clone(),
        })))
    }

    /// Calls a function value with already evaluated arguments.
    pub(crate) fn call(&mut self, callable: &Callable, args: Vec<Value>) -> Exec<Value> {
        match callable {
            Callable::Native(native) => native.call(&args).map_err(Throw::from),
            Callable::Closure(closure) => self.call_closure(closure, args),
            Callable::Include => self.include(&args),
            Callable::Bound(bound) => self.call_method(&bound.receiver, &bound.name, args),
        }
    }

    fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>) -> Exec<Value> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Throw::range_error("Maximum call stack size exceeded"));
        }
        let def = &closure.def;
        let frame = Env::function(&closure.env);
        if let Some(name) = &def.name {
            frame.declare(name, Value::Function(Callable::Closure(closure.clone())), true);
        }

        self.depth += 1;
        let result = self.run_function(def, &frame, args);
        self.depth -= 1;
        result
    }

    fn run_function(
        &mut self,
        def: &FunctionDef,
        frame: &Rc<Env>,
        args: Vec<Value>,
    ) -> Exec<Value> {
        let mut args = args.into_iter();
        for param in &def.params {
            let mut value = args.next().unwrap_or_default();
            if let (Value::Undefined, Some(default)) = (&value, &param.default) {
                value = self.eval(default, frame)?;
            }
            frame.declare(&param.name, value, true);
        }
        for name in &def.vars {
            frame.declare_var(name, None);
        }
        match self.exec_block(&def.body, frame)? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::Undefined),
        }
    }

    fn include(&mut self, args: &[Value]) -> Exec<Value> {
        let path = match args.first() {
            Some(Value::String(path)) => path.to_string(),
            Some(other) if !other.is_nullish() => other.to_js_string(),
            _ => return Err(Throw::type_error("include() requires a template path")),
        };
        let json = |index: usize| match args.get(index) {
            Some(value) if !value.is_nullish() => value.to_json(),
            _ => None,
        };
        let html = self
            .host
            .include(&path, json(1), json(2))
            .map_err(|err| Throw::Nested(Box::new(err)))?;
        Ok(Value::from(html))
    }
}

fn short_circuits(op: LogicalOp, left: &Value) -> bool {
    match op {
        LogicalOp::And => !left.truthy(),
        LogicalOp::Or => left.truthy(),
        LogicalOp::Nullish => !left.is_nullish(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Exec<Value> {
    let number = |f: fn(f64, f64) -> f64| Value::Number(f(left.to_number(), right.to_number()));
    let int = |f: fn(i32, i32) -> i32| {
        Value::Number(f64::from(f(to_int32(left.to_number()), to_int32(right.to_number()))))
    };
    let shift = to_uint32(right.to_number()) & 31;

    Ok(match op {
        BinaryOp::Add => {
            let (left, right) = (left.to_primitive(), right.to_primitive());
            if matches!(left, Value::String(_)) || matches!(right, Value::String(_)) {
                let mut text = left.to_js_string();
                text.push_str(&right.to_js_string());
                Value::from(text)
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => number(|a, b| a - b),
        BinaryOp::Mul => number(|a, b| a * b),
        BinaryOp::Div => number(|a, b| a / b),
        BinaryOp::Rem => number(|a, b| a % b),
        BinaryOp::Exp => number(|a, b| {
            if b.is_nan() || (a.abs() == 1.0 && b.is_infinite()) {
                f64::NAN
            } else {
                a.powf(b)
            }
        }),
        BinaryOp::Shl => Value::Number(f64::from(to_int32(left.to_number()).wrapping_shl(shift))),
        BinaryOp::Shr => Value::Number(f64::from(to_int32(left.to_number()) >> shift)),
        BinaryOp::UShr => Value::Number(f64::from(to_uint32(left.to_number()) >> shift)),
        BinaryOp::BitAnd => int(|a, b| a & b),
        BinaryOp::BitOr => int(|a, b| a | b),
        BinaryOp::BitXor => int(|a, b| a ^ b),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt => Value::Bool(compare(left, right) == Some(Ordering::Less)),
        BinaryOp::Gt => Value::Bool(compare(left, right) == Some(Ordering::Greater)),
        BinaryOp::LtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Less | Ordering::Equal)
        )),
        BinaryOp::GtEq => Value::Bool(matches!(
            compare(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::In => {
            let key = left.to_property_key();
            match right {
                Value::Object(map) => Value::Bool(map.borrow().contains_key(&key)),
                Value::Array(items) => Value::Bool(
                    key == "length"
                        || methods::array_index(&key).is_some_and(|i| i < items.borrow().len()),
                ),
                other => {
                    return Err(Throw::type_error(format!(
                        "Cannot use 'in' operator to search for '{}' in {}",
                        key,
                        other.to_js_string()
                    )))
                }
            }
        }
    })
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    let (left, right) = (left.to_primitive(), right.to_primitive());
    match (&left, &right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => left.to_number().partial_cmp(&right.to_number()),
    }
}

/// Source-like text for an expression, used in error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member(object, Prop::Name(name), optional) => {
            format!("{}{}{}", describe(object), if *optional { "?." } else { "." }, name)
        }
        Expr::Member(object, Prop::Computed(_), _) => format!("{}[...]", describe(object)),
        Expr::Call(callee, _, _) => format!("{}(...)", describe(callee)),
        Expr::Number(n) => format_number(*n),
        Expr::Str(s) => format!("\"{}\"", s),
        Expr::Null => "null".to_string(),
        Expr::Bool(b) => b.to_string(),
        _ => "expression".to_string(),
    }
}

pub(crate) fn error_object(name: &str, message: &str) -> Value {
    let mut map = BTreeMap::new();
    map.insert("name".to_string(), Value::from(name));
    map.insert("message".to_string(), Value::from(message));
    Value::object(map)
}

fn thrown_value_error(value: &Value) -> Error {
    if let Value::Object(map) = value {
        let map = map.borrow();
        if let Some(message) = map.get("message") {
            let kind = match map.get("name").and_then(Value::as_str) {
                Some("TypeError") => ErrorKind::TypeError,
                Some("ReferenceError") => ErrorKind::ReferenceError,
                Some("RangeError") => ErrorKind::RangeError,
                Some("SyntaxError") => ErrorKind::SyntaxError,
                _ => ErrorKind::Error,
            };
            return Error::render(kind, message.to_js_string());
        }
    }
    Error::render(ErrorKind::Error, value.to_js_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_program;
    use crate::compiler::{generate, CompileSettings};
    use crate::value::Scope;
    use serde_json::json;

    struct NoIncludes;

    impl Host for NoIncludes {
        fn include(
            &self,
            path: &str,
            _data: Option<serde_json::Value>,
            _options: Option<serde_json::Value>,
        ) -> Result<String> {
            Ok(format!("[{}]", path))
        }
    }

    fn run_with(template: &str, data: serde_json::Value) -> std::result::Result<String, Failure> {
        let program = generate(template, &CompileSettings::default()).unwrap();
        let script = parse_program(&program).unwrap();
        let root = bind::bind(program.variables(), &data, &Scope::standard());
        Interpreter::new(&NoIncludes).run(&script, root)
    }

    fn run(template: &str) -> String {
        run_with(template, json!({})).unwrap()
    }

    fn fail(template: &str) -> Error {
        run_with(template, json!({})).unwrap_err().error
    }

    #[test]
    fn test_operators() {
        assert_eq!(run("<%= 1 + 2 * 3 %>"), "7");
        assert_eq!(run("<%= '1' + 2 %>"), "12");
        assert_eq!(run("<%= 2 ** 3 ** 2 %>"), "512");
        assert_eq!(run("<%= 7 % -3 %>|<%= -7 % 3 %>"), "1|-1");
        assert_eq!(run("<%= -1 >>> 28 %>|<%= 1 << 33 %>|<%= ~5 %>"), "15|2|-6");
        assert_eq!(run("<%= null ?? 'd' %>|<%= 0 || 'x' %>|<%= 0 ?? 'x' %>"), "d|x|0");
        assert_eq!(run("<%= 'b' > 'a' %>|<%= '10' < 9 %>|<%= NaN < 1 %>"), "true|false|false");
        assert_eq!(
            run("<%= typeof nothing %>|<%= typeof {} %>|<%= void 0 %>"),
            "undefined|object|undefined"
        );
        assert_eq!(run("<%= [1, 2] + '' %>|<%= {} + 1 %>"), "1,2|[object Object]1");
    }

    #[test]
    fn test_assignment_operators() {
        assert_eq!(run("<% var a = 1; a += 2; a *= 3; a -= 1 %><%= a %>"), "8");
        assert_eq!(run("<% var a = null; a ??= 5; a ||= 6; a &&= 7 %><%= a %>"), "7");
        assert_eq!(run("<% var i = 0; var j = i++; var k = ++i %><%= i %><%= j %><%= k %>"), "202");
        assert_eq!(run("<% var o = {n: 1}; o.n++; o['m'] = 2 %><%= o.n + o.m %>"), "4");
    }

    #[test]
    fn test_control_flow() {
        let template = concat!(
            "<% for (var i = 0; i < 5; i++) { if (i == 1) continue; if (i == 4) break; %>",
            "<%= i %><% } %>",
        );
        assert_eq!(run(template), "023");

        let template = concat!(
            "<% var n = 0; while (true) { n++; if (n > 2) break } ",
            "do { n-- } while (n > 0) %><%= n %>",
        );
        assert_eq!(run(template), "0");

        let template = concat!(
            "<% switch (2) { case 1: %>one<% case 2: %>two<% case 3: %>three<% break; ",
            "default: %>other<% } %>",
        );
        assert_eq!(run(template), "twothree");

        assert_eq!(run("<% switch ('x') { case 'y': %>y<% break; default: %>d<% } %>"), "d");
    }

    #[test]
    fn test_for_in_and_of() {
        assert_eq!(run("<% for (var k in {b: 1, a: 2}) { %><%= k %><% } %>"), "ab");
        assert_eq!(run("<% for (const x of [3, 4]) { %><%= x %><% } %>"), "34");
        assert_eq!(run("<% for (const c of 'hé') { %>[<%= c %>]<% } %>"), "[h][é]");
        assert_eq!(run("<% for (var i in null) { %>x<% } %>"), "");
        assert_eq!(fail("<% for (const x of 5) {} %>").to_string(), "TypeError: 5 is not iterable");
    }

    #[test]
    fn test_closures_capture_per_iteration_bindings() {
        let template = concat!(
            "<% var fs = []; for (let i = 0; i < 3; i++) { fs.push(() => i) } %>",
            "<%= fs.map(f => f()).join() %>",
        );
        assert_eq!(run(template), "0,1,2");

        let template = concat!(
            "<% var fs = []; for (var i = 0; i < 3; i++) { fs.push(() => i) } %>",
            "<%= fs.map(f => f()).join() %>",
        );
        assert_eq!(run(template), "3,3,3");
    }

    #[test]
    fn test_functions_and_hoisting() {
        assert_eq!(run("<%= twice(4) %><% function twice(n) { return n * 2 } %>"), "8");
        assert_eq!(run("<% var add = function (a, b = 10) { return a + b } %><%= add(1) %>"), "11");
        assert_eq!(
            run(concat!(
                "<% function counter() { var n = 0; return () => ++n } ",
                "var c = counter(); c(); %><%= c() %>"
            )),
            "2"
        );
        assert_eq!(
            run("<% function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) } %><%= fact(5) %>"),
            "120"
        );
    }

    #[test]
    fn test_block_scoping() {
        assert_eq!(run("<% let x = 1; { let x = 2 } %><%= x %>"), "1");
        assert_eq!(
            fail("<% const x = 1; x = 2 %>").to_string(),
            "TypeError: Assignment to constant variable."
        );
    }

    #[test]
    fn test_try_catch_finally() {
        assert_eq!(run("<% try { throw 'boom' } catch (e) { %><%= e %><% } %>"), "boom");
        assert_eq!(
            run("<% try { null.x } catch (e) { %><%= e.name %>: <%- e.message %><% } %>"),
            "TypeError: Cannot read properties of null (reading 'x')"
        );
        assert_eq!(run("<% try { %>a<% } finally { %>b<% } %>"), "ab");
        assert_eq!(
            run("<% function f() { try { return 1 } finally { return 2 } } %><%= f() %>"),
            "2"
        );
        assert_eq!(run("<% try { undefinedFn() } catch { %>caught<% } %>"), "caught");
    }

    #[test]
    fn test_uncaught_throws() {
        let err = fail("<% throw Error('custom') %>");
        assert_eq!(err.kind(), Some(ErrorKind::Error));
        assert_eq!(err.to_string(), "Error: custom");

        let err = fail("<% throw TypeError('bad') %>");
        assert_eq!(err.kind(), Some(ErrorKind::TypeError));

        let err = fail("<% throw 42 %>");
        assert_eq!(err.to_string(), "Error: 42");

        let err = fail("<%= missing.deep %>");
        assert_eq!(
            err.to_string(),
            "TypeError: Cannot read properties of undefined (reading 'deep')"
        );

        let err = fail("<%= nothing() %>");
        assert_eq!(err.to_string(), "TypeError: nothing is not a function");
    }

    #[test]
    fn test_optional_chaining_short_circuits() {
        assert_eq!(run("<%= missing?.a.b.c %>"), "undefined");
        assert_eq!(run("<% var o = {f: null} %><%= o.f?.() %>|<%= o?.['f'] %>"), "undefined|null");
    }

    #[test]
    fn test_top_level_return_ends_render() {
        assert_eq!(run("a<% if (true) return %>b"), "a");
    }

    #[test]
    fn test_escaping() {
        let out = run_with(
            "<%= html %>|<%- html %>",
            json!({"html": "<a href=\"x\">&'</a>"}),
        )
        .unwrap();
        assert_eq!(
            out,
            "&#60;a href=&#34;x&#34;&#62;&#38;&#39;&#60;/a&#62;|<a href=\"x\">&'</a>"
        );
    }

    #[test]
    fn test_include_goes_through_host() {
        assert_eq!(run("<%- include('part.tpl') %>"), "[part.tpl]");
    }

    #[test]
    fn test_data_objects_are_shared_references() {
        let out = run_with(
            "<% var alias = user; alias.name = 'B' %><%= user.name %>",
            json!({"user": {"name": "A"}}),
        )
        .unwrap();
        assert_eq!(out, "B");
    }

    #[test]
    fn test_recursion_limit() {
        let err = fail("<% function f(n) { return f(n + 1) } f(0) %>");
        assert_eq!(err.to_string(), "RangeError: Maximum call stack size exceeded");
    }

    #[test]
    fn test_recursion_up_to_the_limit() {
        let template = "<% function f(n) { return n <= 0 ? 0 : 1 + f(n - 1) } %><%= f(99) %>";
        assert_eq!(run(template), "99");
    }

    #[test]
    fn test_closures_are_released_after_render() {
        let program = generate(
            "<% var self = {}; self.f = function () { return self }; %>",
            &CompileSettings::default(),
        )
        .unwrap();
        let script = parse_program(&program).unwrap();
        let root = bind::bind(program.variables(), &json!({}), &Scope::standard());
        let weak = Rc::downgrade(&root);
        Interpreter::new(&NoIncludes).run(&script, root).unwrap();
        assert!(weak.upgrade().is_none());
    }
}
