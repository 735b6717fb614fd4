// Foxely Bytecode Instructions

/// Bytecode operation codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // Constants and stack operations
    Constant, // Push constant onto stack
    Nil,
    True,
    False,
    Pop,
    Dup, // Duplicate top of stack

    // Variables
    GetLocal,
    SetLocal,
    GetGlobal,
    DefineGlobal,
    SetGlobal,
    GetUpvalue,
    SetUpvalue,

    // Properties
    GetProperty,
    SetProperty,
    GetSuper, // Bind a superclass method to `this`

    // Comparison and arithmetic
    Equal,
    Greater,
    Less,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Not,
    Negate,
    Is, // instance is Class

    Print, // u8 operand: argument count

    // Control flow
    Jump,
    JumpIfFalse,  // Peeks the condition
    JumpIfNotNil, // Pops the tested value (default parameters)
    Loop,

    // Calls
    Call,        // u8 argc
    Invoke,      // u16 name, u8 argc
    SuperInvoke, // u16 name, u8 argc

    // Closures
    Closure, // u16 function constant
    CloseUpvalue,
    Return,

    // Classes
    Class,
    Inherit,
    Method,
    Operator,

    // Modules
    Import,
    EndModule,

    // Collections
    Array,
    Map,
    AddList, // u16 element count
    AddMap,  // u16 pair count
    Subscript,
    SubscriptAssign,
    Slice,
}

impl OpCode {
    /// Every opcode, indexed by its byte value
    pub const ALL: [OpCode; 51] = [
        OpCode::Constant,
        OpCode::Nil,
        OpCode::True,
        OpCode::False,
        OpCode::Pop,
        OpCode::Dup,
        OpCode::GetLocal,
        OpCode::SetLocal,
        OpCode::GetGlobal,
        OpCode::DefineGlobal,
        OpCode::SetGlobal,
        OpCode::GetUpvalue,
        OpCode::SetUpvalue,
        OpCode::GetProperty,
        OpCode::SetProperty,
        OpCode::GetSuper,
        OpCode::Equal,
        OpCode::Greater,
        OpCode::Less,
        OpCode::Add,
        OpCode::Sub,
        OpCode::Mul,
        OpCode::Div,
        OpCode::Mod,
        OpCode::Not,
        OpCode::Negate,
        OpCode::Is,
        OpCode::Print,
        OpCode::Jump,
        OpCode::JumpIfFalse,
        OpCode::JumpIfNotNil,
        OpCode::Loop,
        OpCode::Call,
        OpCode::Invoke,
        OpCode::SuperInvoke,
        OpCode::Closure,
        OpCode::CloseUpvalue,
        OpCode::Return,
        OpCode::Class,
        OpCode::Inherit,
        OpCode::Method,
        OpCode::Operator,
        OpCode::Import,
        OpCode::EndModule,
        OpCode::Array,
        OpCode::Map,
        OpCode::AddList,
        OpCode::AddMap,
        OpCode::Subscript,
        OpCode::SubscriptAssign,
        OpCode::Slice,
    ];

    /// Get the number of bytes this opcode reads as operands
    pub fn operand_count(&self) -> usize {
        match self {
            OpCode::Print | OpCode::Call => 1,

            OpCode::Invoke | OpCode::SuperInvoke => 3,

            OpCode::Constant
            | OpCode::GetLocal
            | OpCode::SetLocal
            | OpCode::GetGlobal
            | OpCode::DefineGlobal
            | OpCode::SetGlobal
            | OpCode::GetUpvalue
            | OpCode::SetUpvalue
            | OpCode::GetProperty
            | OpCode::SetProperty
            | OpCode::GetSuper
            | OpCode::Jump
            | OpCode::JumpIfFalse
            | OpCode::JumpIfNotNil
            | OpCode::Loop
            | OpCode::Closure
            | OpCode::Class
            | OpCode::Method
            | OpCode::Operator
            | OpCode::Import
            | OpCode::AddList
            | OpCode::AddMap => 2, // u16 operand

            _ => 0,
        }
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match OpCode::ALL.get(byte as usize) {
            Some(op) if *op as u8 == byte => Ok(*op),
            _ => Err(byte),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op as u8
    }
}
