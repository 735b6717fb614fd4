// Foxely Bytecode Chunk
// Contains bytecode, constants, and debug information

use super::opcode::OpCode;
use crate::error::Span;
use std::fmt::Write;

/// Constant values stored in the constant pool
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    String(String),
    Function(Box<FunctionConstant>),
}

/// Upvalue metadata - describes how to capture a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueInfo {
    pub index: u16,     // Index in parent's locals or upvalues
    pub is_local: bool, // true = capture from parent's local, false = from parent's upvalue
}

/// Function constant for the constant pool
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConstant {
    pub name: String,
    /// Parameters without a default
    pub min_arity: usize,
    /// Declared parameters, excluding a trailing `...rest`
    pub max_arity: usize,
    pub is_variadic: bool,
    pub upvalues: Vec<UpvalueInfo>,
    pub chunk: Chunk,
}

impl FunctionConstant {
    pub fn upvalue_count(&self) -> usize {
        self.upvalues.len()
    }
}

/// A chunk of bytecode
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    /// Raw bytecode
    pub code: Vec<u8>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Span information for each byte, parallel to `code`
    pub spans: Vec<Span>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a single byte to the chunk with span info
    pub fn write(&mut self, byte: u8, span: Span) {
        self.code.push(byte);
        self.spans.push(span);
    }

    pub fn write_op(&mut self, op: OpCode, span: Span) {
        self.write(op as u8, span);
    }

    /// Write a u16 operand (big-endian)
    pub fn write_u16(&mut self, value: u16, span: Span) {
        self.write((value >> 8) as u8, span);
        self.write((value & 0xFF) as u8, span);
    }

    /// Add a constant and return its index
    pub fn add_constant(&mut self, constant: Constant) -> usize {
        self.constants.push(constant);
        self.constants.len() - 1
    }

    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Patch the u16 placeholder at `offset` to jump to the current end.
    /// Returns false when the distance does not fit in 16 bits.
    pub fn patch_jump(&mut self, offset: usize) -> bool {
        let jump = self.code.len() - offset - 2;
        if jump > u16::MAX as usize {
            return false;
        }
        self.code[offset] = (jump >> 8) as u8;
        self.code[offset + 1] = (jump & 0xFF) as u8;
        true
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        ((self.code[offset] as u16) << 8) | (self.code[offset + 1] as u16)
    }

    pub fn get_span(&self, offset: usize) -> Span {
        self.spans.get(offset).copied().unwrap_or_default()
    }

    /// Source line of the instruction at `offset`
    pub fn get_line(&self, offset: usize) -> usize {
        self.get_span(offset).start.line
    }

    /// Render the chunk and every nested function as text
    pub fn disassemble(&self, name: &str) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out, name, 0);
        out
    }

    fn disassemble_into(&self, out: &mut String, name: &str, indent: usize) {
        let prefix = "  ".repeat(indent);

        if indent == 0 {
            let _ = writeln!(out, "== {} ==", name);
        } else {
            let _ = writeln!(out, "\n{}== {} ==", prefix, name);
        }
        let _ = writeln!(
            out,
            "{}{} bytes, {} constants",
            prefix,
            self.code.len(),
            self.constants.len()
        );

        let mut offset = 0;
        while offset < self.code.len() {
            let _ = write!(out, "{}", prefix);
            offset = self.disassemble_instruction(out, offset);
        }

        for constant in &self.constants {
            if let Constant::Function(f) = constant {
                f.chunk.disassemble_into(out, &format!("<fn {}>", f.name), indent + 1);
            }
        }
    }

    fn format_constant(&self, idx: usize) -> String {
        match self.constants.get(idx) {
            Some(Constant::Number(n)) => {
                if n.fract() == 0.0 && n.is_finite() {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Some(Constant::String(s)) => {
                if s.chars().count() > 32 {
                    let truncated: String = s.chars().take(29).collect();
                    format!("\"{}...\"", truncated)
                } else {
                    format!("\"{}\"", s)
                }
            }
            Some(Constant::Function(f)) => format!("<fn {}>", f.name),
            None => format!("???[{}]", idx),
        }
    }

    /// Write one instruction and return the offset of the next one
    pub fn disassemble_instruction(&self, out: &mut String, offset: usize) -> usize {
        let line = self.get_line(offset);
        if offset > 0 && line == self.get_line(offset - 1) {
            let _ = write!(out, "{:04}    | ", offset);
        } else {
            let _ = write!(out, "{:04} {:4} ", offset, line);
        }

        let instruction = match OpCode::try_from(self.code[offset]) {
            Ok(op) => op,
            Err(byte) => {
                let _ = writeln!(out, "unknown opcode {}", byte);
                return offset + 1;
            }
        };
        let name = format!("{:?}", instruction);

        match instruction {
            OpCode::Constant
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Class
            | OpCode::Method
            | OpCode::Operator
            | OpCode::Import => {
                let idx = self.read_u16(offset + 1) as usize;
                let _ = writeln!(out, "{:<16} {:4} {}", name, idx, self.format_constant(idx));
                offset + 3
            }
            OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::AddList
            | OpCode::AddMap => {
                let slot = self.read_u16(offset + 1);
                let _ = writeln!(out, "{:<16} {:4}", name, slot);
                offset + 3
            }
            OpCode::Print | OpCode::Call => {
                let argc = self.code[offset + 1];
                let _ = writeln!(out, "{:<16} ({})", name, argc);
                offset + 2
            }
            OpCode::Jump | OpCode::JumpIfFalse | OpCode::JumpIfNotNil => {
                let jump = self.read_u16(offset + 1) as usize;
                let _ = writeln!(out, "{:<16} {:4} -> {}", name, offset, offset + 3 + jump);
                offset + 3
            }
            OpCode::Loop => {
                let jump = self.read_u16(offset + 1) as usize;
                let _ = writeln!(out, "{:<16} {:4} -> {}", name, offset, (offset + 3).saturating_sub(jump));
                offset + 3
            }
            OpCode::Invoke | OpCode::SuperInvoke => {
                let idx = self.read_u16(offset + 1) as usize;
                let argc = self.code[offset + 3];
                let _ = writeln!(out, "{:<16} ({} args) {:4} {}", name, argc, idx, self.format_constant(idx));
                offset + 4
            }
            OpCode::Closure => {
                let idx = self.read_u16(offset + 1) as usize;
                let _ = writeln!(out, "{:<16} {:4} {}", name, idx, self.format_constant(idx));
                if let Some(Constant::Function(f)) = self.constants.get(idx) {
                    for upvalue in &f.upvalues {
                        let kind = if upvalue.is_local { "local" } else { "upvalue" };
                        let _ = writeln!(out, "{:04}    |                     {} {}", offset, kind, upvalue.index);
                    }
                }
                offset + 3
            }
            _ => {
                let _ = writeln!(out, "{}", name);
                offset + 1 + instruction.operand_count()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_jump_distance() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Jump, Span::default());
        chunk.write_u16(0xFFFF, Span::default());
        chunk.write_op(OpCode::Nil, Span::default());
        chunk.write_op(OpCode::Pop, Span::default());
        assert!(chunk.patch_jump(1));
        assert_eq!(chunk.read_u16(1), 2);
    }

    #[test]
    fn test_line_lookup_follows_spans() {
        let mut chunk = Chunk::new();
        chunk.write_op(OpCode::Nil, Span::single(3, 1, 0));
        chunk.write_op(OpCode::Return, Span::single(4, 1, 0));
        assert_eq!(chunk.get_line(0), 3);
        assert_eq!(chunk.get_line(1), 4);
        assert_eq!(chunk.get_line(9), 1);
    }

    #[test]
    fn test_disassemble_names_constants() {
        let mut chunk = Chunk::new();
        let idx = chunk.add_constant(Constant::String("answer".into()));
        chunk.write_op(OpCode::GetGlobal, Span::default());
        chunk.write_u16(idx as u16, Span::default());
        chunk.write_op(OpCode::Print, Span::default());
        chunk.write(1, Span::default());
        let text = chunk.disassemble("script");
        assert!(text.contains("GetGlobal"));
        assert!(text.contains("\"answer\""));
        assert!(text.contains("Print") && text.contains("(1)"));
    }
}
