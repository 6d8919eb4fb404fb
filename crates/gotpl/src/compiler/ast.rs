//! Syntax tree of compiled templates.
//!
//! Template-specific statements (`Text`, `Output`, `Line`) sit beside the
//! ordinary statements of the logic language, so a loop body can mix both.

use std::sync::Arc;

use crate::value::RegexValue;

pub(crate) type Name = Arc<str>;

/// A parsed template.
#[derive(Debug)]
pub(crate) struct Script {
    pub body: Vec<Stmt>,
    /// Names declared with `var` at the top level.
    pub vars: Vec<Name>,
}

impl Script {
    pub fn new(body: Vec<Stmt>) -> Self {
        let mut vars = Vec::new();
        collect_vars(&body, &mut vars);
        Self { body, vars }
    }
}

#[derive(Debug)]
pub(crate) struct FunctionDef {
    pub name: Option<Name>,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub vars: Vec<Name>,
}

impl FunctionDef {
    pub fn new(name: Option<Name>, params: Vec<Param>, body: Vec<Stmt>) -> Self {
        let mut vars = Vec::new();
        collect_vars(&body, &mut vars);
        Self {
            name,
            params,
            body,
            vars,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Param {
    pub name: Name,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug)]
pub(crate) struct Declarator {
    pub name: Name,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub(crate) struct Case {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug)]
pub(crate) enum Stmt {
    Empty,
    Expr(Expr),
    Decl(DeclKind, Vec<Declarator>),
    Function(Arc<FunctionDef>),
    Block(Vec<Stmt>),
    /// Statements run in the enclosing scope; used to attach line markers.
    Seq(Vec<Stmt>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    For {
        init: Option<Box<Stmt>>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        kind: Option<DeclKind>,
        name: Name,
        object: Expr,
        body: Box<Stmt>,
        of: bool,
    },
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    Switch(Expr, Vec<Case>),
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        param: Option<Name>,
        handler: Option<Vec<Stmt>>,
        finalizer: Option<Vec<Stmt>>,
    },
    Text(Arc<str>),
    Output(Expr, bool),
    Line(usize),
}

#[derive(Debug)]
pub(crate) enum Prop {
    Name(Name),
    Computed(Box<Expr>),
}

#[derive(Debug)]
pub(crate) enum Expr {
    Number(f64),
    Str(Arc<str>),
    Bool(bool),
    Null,
    Template(Vec<Arc<str>>, Vec<Expr>),
    Regex(Arc<RegexValue>),
    Ident(Name),
    Array(Vec<Expr>),
    Object(Vec<(Prop, Expr)>),
    Function(Arc<FunctionDef>),
    /// Object, property, optional (`?.`).
    Member(Box<Expr>, Prop, bool),
    /// Callee, arguments, optional (`?.()`).
    Call(Box<Expr>, Vec<Expr>, bool),
    Unary(UnaryOp, Box<Expr>),
    /// Operator, prefix, target.
    Update(UpdateOp, bool, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Assign(AssignOp, Box<Expr>, Box<Expr>),
    Sequence(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UpdateOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Exp,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AssignOp {
    Assign,
    Binary(BinaryOp),
    Logical(LogicalOp),
}

/// Collects `var` names declared in `stmts`, without entering nested functions.
fn collect_vars(stmts: &[Stmt], out: &mut Vec<Name>) {
    for stmt in stmts {
        collect_stmt_vars(stmt, out);
    }
}

fn collect_stmt_vars(stmt: &Stmt, out: &mut Vec<Name>) {
    let add = |name: &Name, out: &mut Vec<Name>| {
        if !out.contains(name) {
            out.push(name.clone());
        }
    };
    match stmt {
        Stmt::Decl(DeclKind::Var, decls) => {
            for decl in decls {
                add(&decl.name, out);
            }
        }
        Stmt::Block(body) | Stmt::Seq(body) => collect_vars(body, out),
        Stmt::If(_, then, otherwise) => {
            collect_stmt_vars(then, out);
            if let Some(otherwise) = otherwise {
                collect_stmt_vars(otherwise, out);
            }
        }
        Stmt::For { init, body, .. } => {
            if let Some(init) = init {
                collect_stmt_vars(init, out);
            }
            collect_stmt_vars(body, out);
        }
        Stmt::ForIn {
            kind, name, body, ..
        } => {
            if *kind == Some(DeclKind::Var) {
                add(name, out);
            }
            collect_stmt_vars(body, out);
        }
        Stmt::While(_, body) | Stmt::DoWhile(body, _) => collect_stmt_vars(body, out),
        Stmt::Switch(_, cases) => {
            for case in cases {
                collect_vars(&case.body, out);
            }
        }
        Stmt::Try {
            block,
            handler,
            finalizer,
            ..
        } => {
            collect_vars(block, out);
            if let Some(handler) = handler {
                collect_vars(handler, out);
            }
            if let Some(finalizer) = finalizer {
                collect_vars(finalizer, out);
            }
        }
        _ => {}
    }
}
