//! Syntax tree of the formula language.
//!
//! Nodes are immutable and `Send + Sync` so compiled formulas can be shared
//! through the cache across concurrent executions.
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Text(String),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEntry {
    Property(String, Expr),
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Template(Vec<TemplatePart>),
    Bool(bool),
    Null,
    Ident(String),
    /// Elements may be `Expr::Spread`.
    Array(Vec<Expr>),
    Object(Vec<ObjectEntry>),
    Spread(Box<Expr>),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Logical { op: LogicalOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Conditional { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Member { object: Box<Expr>, property: String },
    Index { object: Box<Expr>, index: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Function(Arc<FunctionDef>),
}

impl Expr {
    /// Whether the expression designates a storage location.
    pub fn is_place(&self) -> bool {
        match self {
            Expr::Ident(_) => true,
            Expr::Member { object, .. } | Expr::Index { object, .. } => object.is_place(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FunctionBody {
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: Option<String>,
    pub params: Vec<String>,
    pub body: FunctionBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Let,
    Const,
    Var,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Name(String),
    /// `{ key: binding }` pairs; shorthand entries repeat the key.
    Object(Vec<(String, String)>),
    /// `None` marks an elided element.
    Array(Vec<Option<String>>),
}

impl Pattern {
    pub fn bound_names(&self) -> Vec<&str> {
        match self {
            Pattern::Name(n) => vec![n.as_str()],
            Pattern::Object(pairs) => pairs.iter().map(|(_, b)| b.as_str()).collect(),
            Pattern::Array(items) => items.iter().flatten().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl AssignOp {
    pub fn binary(self) -> Option<BinaryOp> {
        match self {
            AssignOp::Set => None,
            AssignOp::Add => Some(BinaryOp::Add),
            AssignOp::Sub => Some(BinaryOp::Sub),
            AssignOp::Mul => Some(BinaryOp::Mul),
            AssignOp::Div => Some(BinaryOp::Div),
            AssignOp::Rem => Some(BinaryOp::Rem),
            AssignOp::Pow => Some(BinaryOp::Pow),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { kind: DeclKind, pattern: Pattern, init: Option<Expr> },
    Assign { target: Expr, op: AssignOp, value: Expr },
    Expr(Expr),
    If { cond: Expr, then: Vec<Stmt>, otherwise: Option<Vec<Stmt>> },
    While { cond: Expr, body: Vec<Stmt> },
    DoWhile { body: Vec<Stmt>, cond: Expr },
    For {
        /// A `Block` of `Let`s when the initializer declares several names.
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Box<Stmt>>,
        body: Vec<Stmt>,
    },
    ForOf { binding: Pattern, iterable: Expr, body: Vec<Stmt> },
    ForIn { binding: Pattern, object: Expr, body: Vec<Stmt> },
    Switch { discriminant: Expr, cases: Vec<SwitchCase> },
    Block(Vec<Stmt>),
    Function(Arc<FunctionDef>),
    Return(Option<Expr>),
    Break,
    Continue,
}

/// A parsed formula body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}
