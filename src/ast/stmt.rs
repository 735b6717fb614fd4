// Foxely Statement AST Nodes

use super::expr::Expr;
use crate::error::Span;

/// Function parameter
#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: String,
    pub is_variadic: bool,             // `...rest`
    pub default_value: Option<Expr>,   // None = required
    pub span: Span,
}

/// Function definition (standalone functions, methods, operators, lambdas)
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<FunctionParam>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// Class definition
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub name: String,
    pub superclass: Option<(String, Span)>,
    pub methods: Vec<FunctionDef>,
    /// Operator overloads keyed by symbol (`+`, `-`, `*`, `/`)
    pub operators: Vec<(String, FunctionDef)>,
    pub span: Span,
}

/// Statement nodes
#[derive(Debug, Clone)]
pub enum Stmt {
    /// `var x = 5;`
    Var {
        name: String,
        initializer: Option<Expr>,
        span: Span,
    },

    Expression {
        expr: Expr,
        span: Span,
    },

    /// `print a, b;`
    Print {
        args: Vec<Expr>,
        span: Span,
    },

    Block {
        statements: Vec<Stmt>,
        span: Span,
    },

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
        span: Span,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
        span: Span,
    },

    /// C-style for loop; desugared by the compiler
    For {
        initializer: Option<Box<Stmt>>,
        condition: Option<Expr>,
        increment: Option<Expr>,
        body: Box<Stmt>,
        span: Span,
    },

    Function {
        def: FunctionDef,
    },

    Return {
        value: Option<Expr>,
        span: Span,
    },

    Class {
        def: ClassDef,
    },

    /// `import "name";`
    Import {
        module: String,
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Var { span, .. } => *span,
            Stmt::Expression { span, .. } => *span,
            Stmt::Print { span, .. } => *span,
            Stmt::Block { span, .. } => *span,
            Stmt::If { span, .. } => *span,
            Stmt::While { span, .. } => *span,
            Stmt::For { span, .. } => *span,
            Stmt::Function { def } => def.span,
            Stmt::Return { span, .. } => *span,
            Stmt::Class { def } => def.span,
            Stmt::Import { span, .. } => *span,
        }
    }
}

/// Program is a list of statements
#[derive(Debug, Clone)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

impl Program {
    pub fn new(statements: Vec<Stmt>) -> Self {
        Self { statements }
    }
}
