// Foxely AST Module
// Nodes produced by the parser and consumed by the compiler

mod expr;
mod stmt;

pub use expr::*;
pub use stmt::*;
