// Foxely Programming Language
// A class-based scripting language on a bytecode VM with fibers and a tracing GC

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use config::VmConfig;
pub use error::{FoxError, FoxResult};
pub use vm::{InterpretResult, Value, VM};
