pub mod chunk;
mod compiler;
pub mod opcode;

pub use chunk::{Chunk, Constant, FunctionConstant, UpvalueInfo};
pub use compiler::Compiler;
pub use opcode::OpCode;

use crate::error::FoxResult;
use crate::lexer::Scanner;
use crate::parser::Parser;

/// Scan, parse and compile `source` into its top-level script function
pub fn compile_source(source: &str, file: &str) -> FoxResult<FunctionConstant> {
    let tokens = Scanner::new(source, file).scan_tokens()?;
    let program = Parser::new(tokens, file, source).parse()?;
    Compiler::new(file, source).compile(&program)
}
