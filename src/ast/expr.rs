// Foxely Expression AST Nodes

use crate::error::Span;
use crate::lexer::TokenKind;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn from_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Mod),
            TokenKind::EqualEqual => Some(BinaryOp::Equal),
            TokenKind::BangEqual => Some(BinaryOp::NotEqual),
            TokenKind::Less => Some(BinaryOp::Less),
            TokenKind::LessEqual => Some(BinaryOp::LessEqual),
            TokenKind::Greater => Some(BinaryOp::Greater),
            TokenKind::GreaterEqual => Some(BinaryOp::GreaterEqual),
            _ => None,
        }
    }

    /// Symbol used as the operator-table key for overloadable operators
    pub fn overload_symbol(&self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Div => Some("/"),
            _ => None,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Negate, // -
    Not,    // !
}

/// Logical (short-circuit) operators
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOp {
    Increment,
    Decrement,
}

/// Literal values
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Nil,
}

/// Expression nodes
#[derive(Debug, Clone)]
pub enum Expr {
    Literal {
        value: Literal,
        span: Span,
    },

    Identifier {
        name: String,
        span: Span,
    },

    /// `this`
    This {
        span: Span,
    },

    /// `super.method` (bound, not called)
    Super {
        method: String,
        span: Span,
    },

    Grouping {
        expr: Box<Expr>,
        span: Span,
    },

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },

    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },

    Logical {
        left: Box<Expr>,
        op: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },

    /// `value is Class`
    Is {
        value: Box<Expr>,
        class: Box<Expr>,
        span: Span,
    },

    /// `target = value` where target is an identifier
    Assignment {
        name: String,
        value: Box<Expr>,
        span: Span,
    },

    /// `x++`, `obj.field--`
    Step {
        target: Box<Expr>,
        op: StepOp,
        span: Span,
    },

    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },

    Get {
        object: Box<Expr>,
        property: String,
        span: Span,
    },

    Set {
        object: Box<Expr>,
        property: String,
        value: Box<Expr>,
        span: Span,
    },

    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },

    IndexSet {
        object: Box<Expr>,
        index: Box<Expr>,
        value: Box<Expr>,
        span: Span,
    },

    /// `object[start:end]`, either bound may be omitted
    Slice {
        object: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
        span: Span,
    },

    Array {
        elements: Vec<Expr>,
        span: Span,
    },

    Map {
        entries: Vec<(Expr, Expr)>,
        span: Span,
    },

    /// Anonymous function: `fun (a, b) { ... }`
    Lambda {
        def: Box<super::FunctionDef>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::This { span }
            | Expr::Super { span, .. }
            | Expr::Grouping { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Logical { span, .. }
            | Expr::Is { span, .. }
            | Expr::Assignment { span, .. }
            | Expr::Step { span, .. }
            | Expr::Call { span, .. }
            | Expr::Get { span, .. }
            | Expr::Set { span, .. }
            | Expr::Index { span, .. }
            | Expr::IndexSet { span, .. }
            | Expr::Slice { span, .. }
            | Expr::Array { span, .. }
            | Expr::Map { span, .. }
            | Expr::Lambda { span, .. } => *span,
        }
    }
}
