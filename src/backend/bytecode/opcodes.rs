//! Bytecode opcodes for module function bodies
//!
//! Opcodes are grouped by category and assigned contiguous ranges.
//! Immediates follow the opcode byte in big-endian order.

use std::fmt;

/// Bytecode opcode enumeration
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // === Stack Operations (0x00-0x0F) ===
    /// No operation
    Nop = 0x00,
    /// Discard top of stack
    Pop = 0x01,
    /// Duplicate top of stack
    Dup = 0x02,
    /// Swap top two stack elements
    Swap = 0x03,

    // === Value Creation (0x10-0x2F) ===
    /// Push Nil value
    PushNil = 0x10,
    /// Push Bool(true)
    PushTrue = 0x11,
    /// Push Bool(false)
    PushFalse = 0x12,
    /// Push small integer (-128 to 127), value is next byte
    PushIntSmall = 0x14,
    /// Push constant from pool, index is next 2 bytes
    PushConst = 0x15,
    /// Push String from constant pool, index is next 2 bytes
    PushString = 0x17,

    // === Variables (0x30-0x3F) ===
    /// Push local slot, index is next byte
    LoadLocal = 0x30,
    /// Pop into local slot, index is next byte
    StoreLocal = 0x31,
    /// Push argument, index is next byte
    LoadArg = 0x32,
    /// Pop into argument, index is next byte
    StoreArg = 0x33,

    // === Arrays (0x40-0x4F) ===
    /// [len] -> [array of len nils]
    NewArray = 0x40,
    /// [array, index] -> [element]
    LoadElem = 0x41,
    /// [array, index, value] -> []
    StoreElem = 0x42,
    /// [array] -> [len]
    ArrayLen = 0x43,
    /// Box a value-type value for storage as an object; type tag is next byte
    Box = 0x44,

    // === Control Flow (0x50-0x6F) ===
    /// Unconditional jump, signed 2-byte offset
    Jump = 0x50,
    /// Jump if top is falsy (pops)
    JumpIfFalse = 0x51,
    /// Jump if top is truthy (pops)
    JumpIfTrue = 0x52,
    /// Call a symbol: 2-byte symbol index + 1-byte arity
    Call = 0x60,
    /// Return top of stack to the caller
    Return = 0x62,

    // === Dispatch (0x70-0x7F) ===
    /// [args array] -> []; submit the symbol's function for deferred execution
    Submit = 0x70,
    /// [args array] -> [deferred]; wrap the symbol's pending result
    Defer = 0x71,
    /// [deferred] -> [value]; resolve a deferred value, other values pass through
    Unwrap = 0x72,

    // === Arithmetic (0xC0-0xCF) ===
    Add = 0xC0,
    Sub = 0xC1,
    Mul = 0xC2,
    Div = 0xC3,
    Rem = 0xC4,
    Neg = 0xC5,

    // === Comparison (0xD0-0xDF) ===
    Lt = 0xD0,
    Le = 0xD1,
    Gt = 0xD2,
    Ge = 0xD3,
    Eq = 0xD4,
    Ne = 0xD5,

    // === Boolean (0xE0-0xEF) ===
    Not = 0xE2,

    // === Debug/Meta (0xF0-0xFF) ===
    /// Stop execution, yielding top of stack (or nil)
    Halt = 0xFF,
}

/// Number of stack values an instruction consumes and produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    pub pops: u16,
    pub pushes: u16,
}

impl StackEffect {
    pub const fn new(pops: u16, pushes: u16) -> Self {
        Self { pops, pushes }
    }
}

impl Opcode {
    /// Convert a byte to an opcode
    #[inline]
    pub fn from_byte(byte: u8) -> Option<Self> {
        OPCODE_TABLE[byte as usize]
    }

    /// Convert opcode to byte
    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Get the number of immediate bytes following this opcode
    pub fn immediate_size(self) -> usize {
        match self {
            Self::Nop | Self::Pop | Self::Dup | Self::Swap
            | Self::PushNil | Self::PushTrue | Self::PushFalse
            | Self::NewArray | Self::LoadElem | Self::StoreElem | Self::ArrayLen
            | Self::Return | Self::Unwrap
            | Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem | Self::Neg
            | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne
            | Self::Not | Self::Halt => 0,

            // 1-byte immediate
            Self::PushIntSmall | Self::LoadLocal | Self::StoreLocal | Self::LoadArg
            | Self::StoreArg | Self::Box => 1,

            // 2-byte immediate
            Self::PushConst | Self::PushString
            | Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue
            | Self::Submit | Self::Defer => 2,

            // 3-byte immediate (2-byte symbol index + 1-byte arity)
            Self::Call => 3,
        }
    }

    /// Get the mnemonic name for this opcode
    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Pop => "pop",
            Self::Dup => "dup",
            Self::Swap => "swap",
            Self::PushNil => "push_nil",
            Self::PushTrue => "push_true",
            Self::PushFalse => "push_false",
            Self::PushIntSmall => "push_int_small",
            Self::PushConst => "push_const",
            Self::PushString => "push_string",
            Self::LoadLocal => "load_local",
            Self::StoreLocal => "store_local",
            Self::LoadArg => "load_arg",
            Self::StoreArg => "store_arg",
            Self::NewArray => "new_array",
            Self::LoadElem => "load_elem",
            Self::StoreElem => "store_elem",
            Self::ArrayLen => "array_len",
            Self::Box => "box",
            Self::Jump => "jump",
            Self::JumpIfFalse => "jump_if_false",
            Self::JumpIfTrue => "jump_if_true",
            Self::Call => "call",
            Self::Return => "return",
            Self::Submit => "submit",
            Self::Defer => "defer",
            Self::Unwrap => "unwrap",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Rem => "rem",
            Self::Neg => "neg",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Gt => "gt",
            Self::Ge => "ge",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Not => "not",
            Self::Halt => "halt",
        }
    }

    /// Stack effect of this opcode
    ///
    /// `Call` depends on its arity operand and returns `None`; use
    /// [`Instruction::stack_effect`](super::body::Instruction::stack_effect).
    pub fn stack_effect(self) -> Option<StackEffect> {
        let (pops, pushes) = match self {
            Self::Nop => (0, 0),
            Self::Pop => (1, 0),
            Self::Dup => (1, 2),
            Self::Swap => (2, 2),
            Self::PushNil | Self::PushTrue | Self::PushFalse | Self::PushIntSmall
            | Self::PushConst | Self::PushString | Self::LoadLocal | Self::LoadArg => (0, 1),
            Self::StoreLocal | Self::StoreArg => (1, 0),
            Self::NewArray | Self::ArrayLen | Self::Box | Self::Unwrap | Self::Neg | Self::Not => {
                (1, 1)
            }
            Self::LoadElem => (2, 1),
            Self::StoreElem => (3, 0),
            Self::Jump => (0, 0),
            Self::JumpIfFalse | Self::JumpIfTrue => (1, 0),
            Self::Call => return None,
            Self::Return => (1, 0),
            Self::Submit => (1, 0),
            Self::Defer => (1, 1),
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem
            | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne => (2, 1),
            Self::Halt => (0, 0),
        };
        Some(StackEffect::new(pops, pushes))
    }

    /// Check if this opcode is a jump instruction
    #[inline]
    pub fn is_jump(self) -> bool {
        matches!(self, Self::Jump | Self::JumpIfFalse | Self::JumpIfTrue)
    }

    /// Check if this opcode is a conditional jump
    #[inline]
    pub fn is_conditional_jump(self) -> bool {
        matches!(self, Self::JumpIfFalse | Self::JumpIfTrue)
    }

    /// Check if this opcode ends a basic block without falling through
    #[inline]
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Return | Self::Halt | Self::Jump)
    }

    /// Check if this opcode pops two operands and pushes one result
    #[inline]
    pub fn is_binary_op(self) -> bool {
        matches!(
            self,
            Self::Add | Self::Sub | Self::Mul | Self::Div | Self::Rem
            | Self::Lt | Self::Le | Self::Gt | Self::Ge | Self::Eq | Self::Ne
        )
    }

    /// Check if this opcode references the module symbol table
    #[inline]
    pub fn uses_symbol(self) -> bool {
        matches!(self, Self::Call | Self::Submit | Self::Defer)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mnemonic())
    }
}

/// Lookup table for byte -> Opcode conversion
static OPCODE_TABLE: [Option<Opcode>; 256] = {
    let mut table = [None; 256];

    // Stack operations
    table[0x00] = Some(Opcode::Nop);
    table[0x01] = Some(Opcode::Pop);
    table[0x02] = Some(Opcode::Dup);
    table[0x03] = Some(Opcode::Swap);

    // Value creation
    table[0x10] = Some(Opcode::PushNil);
    table[0x11] = Some(Opcode::PushTrue);
    table[0x12] = Some(Opcode::PushFalse);
    table[0x14] = Some(Opcode::PushIntSmall);
    table[0x15] = Some(Opcode::PushConst);
    table[0x17] = Some(Opcode::PushString);

    // Variables
    table[0x30] = Some(Opcode::LoadLocal);
    table[0x31] = Some(Opcode::StoreLocal);
    table[0x32] = Some(Opcode::LoadArg);
    table[0x33] = Some(Opcode::StoreArg);

    // Arrays
    table[0x40] = Some(Opcode::NewArray);
    table[0x41] = Some(Opcode::LoadElem);
    table[0x42] = Some(Opcode::StoreElem);
    table[0x43] = Some(Opcode::ArrayLen);
    table[0x44] = Some(Opcode::Box);

    // Control flow
    table[0x50] = Some(Opcode::Jump);
    table[0x51] = Some(Opcode::JumpIfFalse);
    table[0x52] = Some(Opcode::JumpIfTrue);
    table[0x60] = Some(Opcode::Call);
    table[0x62] = Some(Opcode::Return);

    // Dispatch
    table[0x70] = Some(Opcode::Submit);
    table[0x71] = Some(Opcode::Defer);
    table[0x72] = Some(Opcode::Unwrap);

    // Arithmetic
    table[0xC0] = Some(Opcode::Add);
    table[0xC1] = Some(Opcode::Sub);
    table[0xC2] = Some(Opcode::Mul);
    table[0xC3] = Some(Opcode::Div);
    table[0xC4] = Some(Opcode::Rem);
    table[0xC5] = Some(Opcode::Neg);

    // Comparison
    table[0xD0] = Some(Opcode::Lt);
    table[0xD1] = Some(Opcode::Le);
    table[0xD2] = Some(Opcode::Gt);
    table[0xD3] = Some(Opcode::Ge);
    table[0xD4] = Some(Opcode::Eq);
    table[0xD5] = Some(Opcode::Ne);

    // Boolean
    table[0xE2] = Some(Opcode::Not);

    table[0xFF] = Some(Opcode::Halt);

    table
};
