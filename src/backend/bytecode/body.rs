//! Function body representation
//!
//! A FunctionBody holds a function's bytecode, its constant pool, its local
//! slot table and the maximum operand stack depth the VM must reserve.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;

use crate::backend::models::{TypeRef, Value};

use super::analysis::max_stack_depth;
use super::module::SymbolRef;
use super::opcodes::{Opcode, StackEffect};

/// Errors found while decoding or analysing a body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BodyError {
    #[error("unknown opcode 0x{byte:02x} at {offset:#06x}")]
    UnknownOpcode { offset: usize, byte: u8 },
    #[error("truncated instruction at {offset:#06x}")]
    Truncated { offset: usize },
    #[error("jump at {offset:#06x} targets {target} which is not an instruction boundary")]
    InvalidJumpTarget { offset: usize, target: isize },
    #[error("stack underflow at {offset:#06x}")]
    StackUnderflow { offset: usize },
    #[error("inconsistent stack depth at {offset:#06x}: {expected} vs {found}")]
    InconsistentStack { offset: usize, expected: u16, found: u16 },
    #[error("execution falls off the end of the body after {offset:#06x}")]
    FallsOffEnd { offset: usize },
    #[error("operand stack deeper than {}", u16::MAX)]
    StackTooDeep,
    #[error("constant pool exceeds {} entries", u16::MAX as usize + 1)]
    TooManyConstants,
    #[error("more than 256 local slots")]
    TooManyLocals,
}

/// A constant pool entry
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
}

impl Constant {
    /// Convert to a runtime value
    pub fn to_value(&self) -> Value {
        match self {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::Bool(b) => Value::Bool(*b),
            Constant::Str(s) => Value::Str(Arc::clone(s)),
        }
    }

    /// Identity used for pool deduplication (floats compare by bit pattern)
    fn same_as(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

/// A local variable slot
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub ty: TypeRef,
}

impl LocalSlot {
    pub fn new(ty: TypeRef) -> Self {
        Self { ty }
    }
}

/// A function body
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    /// The bytecode instructions
    code: Vec<u8>,

    /// Constant pool for values that can't be encoded inline
    constants: Vec<Constant>,

    /// Local variable slots
    locals: Vec<LocalSlot>,

    /// Maximum operand stack depth
    max_stack: u16,

    /// Whether locals are zero-initialised on entry
    init_locals: bool,
}

impl FunctionBody {
    /// Assemble a body from decoded parts. No analysis is performed.
    pub fn from_parts(
        code: Vec<u8>,
        constants: Vec<Constant>,
        locals: Vec<LocalSlot>,
        max_stack: u16,
        init_locals: bool,
    ) -> Self {
        Self { code, constants, locals, max_stack, init_locals }
    }

    /// Create a builder for constructing a body
    pub fn builder() -> BodyBuilder {
        BodyBuilder::new()
    }

    /// Get the bytecode instructions
    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Get the bytecode length
    #[inline]
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Check if the body has no instructions
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Read a u8 at offset
    #[inline]
    pub fn read_byte(&self, offset: usize) -> Option<u8> {
        self.code.get(offset).copied()
    }

    /// Read a u16 at offset (big-endian)
    #[inline]
    pub fn read_u16(&self, offset: usize) -> Option<u16> {
        read_u16(&self.code, offset)
    }

    /// Get a constant from the pool
    #[inline]
    pub fn get_constant(&self, index: u16) -> Option<&Constant> {
        self.constants.get(index as usize)
    }

    pub fn constants(&self) -> &[Constant] {
        &self.constants
    }

    pub fn locals(&self) -> &[LocalSlot] {
        &self.locals
    }

    #[inline]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    #[inline]
    pub fn init_locals(&self) -> bool {
        self.init_locals
    }

    pub fn set_init_locals(&mut self, init_locals: bool) {
        self.init_locals = init_locals;
    }

    /// Change the declared type of a local slot
    pub fn retype_local(&mut self, index: u8, ty: TypeRef) {
        if let Some(slot) = self.locals.get_mut(index as usize) {
            slot.ty = ty;
        }
    }

    /// Replace the instruction stream, keeping the pools and `max_stack`
    pub fn replace_code(&mut self, code: Vec<u8>) {
        self.code = code;
    }

    /// Recompute `max_stack` from the current instruction stream
    pub fn recompute_max_stack(&mut self) -> Result<u16, BodyError> {
        self.max_stack = max_stack_depth(&self.code)?;
        Ok(self.max_stack)
    }

    /// Decode every instruction in order
    pub fn instructions(&self) -> Result<Vec<Instruction>, BodyError> {
        decode_all(&self.code)
    }

    /// Disassemble the body to a string
    ///
    /// `symbols` resolves call and dispatch targets; pass an empty slice when
    /// the owning module is not at hand.
    pub fn disassemble(&self, symbols: &[SymbolRef]) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "locals: {}, max_stack: {}, init_locals: {}",
            self.locals.len(),
            self.max_stack,
            self.init_locals
        );
        for (i, slot) in self.locals.iter().enumerate() {
            let _ = writeln!(output, "  local {}: {}", i, slot.ty);
        }

        let mut offset = 0;
        while offset < self.code.len() {
            match decode_instruction(&self.code, offset) {
                Ok(instr) => {
                    let _ = writeln!(output, "{:04x} {}", offset, self.format_instruction(&instr, symbols));
                    offset = instr.next_offset();
                }
                Err(_) => {
                    let _ = writeln!(output, "{:04x} ??? (0x{:02x})", offset, self.code[offset]);
                    offset += 1;
                }
            }
        }

        output
    }

    fn format_instruction(&self, instr: &Instruction, symbols: &[SymbolRef]) -> String {
        let mnemonic = instr.opcode.mnemonic();
        let symbol_str = |index: u16| {
            symbols
                .get(index as usize)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "???".to_string())
        };

        match instr.operand {
            Operand::None => mnemonic.to_string(),
            Operand::SmallInt(n) => format!("{} {}", mnemonic, n),
            Operand::Byte(b) if instr.opcode == Opcode::Box => {
                let ty = TypeRef::from_simple_tag(b)
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "???".to_string());
                format!("{} {}", mnemonic, ty)
            }
            Operand::Byte(b) => format!("{} {}", mnemonic, b),
            Operand::Index(index) if instr.opcode.uses_symbol() => {
                format!("{} #{} ({})", mnemonic, index, symbol_str(index))
            }
            Operand::Index(index) => {
                let const_str = self
                    .constants
                    .get(index as usize)
                    .map(|c| format!("{:?}", c))
                    .unwrap_or_else(|| "???".to_string());
                format!("{} #{} ({})", mnemonic, index, const_str)
            }
            Operand::Offset(_) => match instr.jump_target() {
                Some(target) => format!("{} -> {:04x}", mnemonic, target),
                None => format!("{} -> ???", mnemonic),
            },
            Operand::Call { symbol, arity } => {
                format!("{} #{} ({}) arity={}", mnemonic, symbol, symbol_str(symbol), arity)
            }
        }
    }
}

/// Decoded operand of an instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    /// Unsigned byte: local/argument index or type tag
    Byte(u8),
    /// Signed inline integer
    SmallInt(i8),
    /// Constant pool or symbol table index
    Index(u16),
    /// Relative jump offset, measured from the end of the instruction
    Offset(i16),
    Call { symbol: u16, arity: u8 },
}

/// A decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: usize,
    pub opcode: Opcode,
    pub operand: Operand,
}

impl Instruction {
    /// Encoded size in bytes
    #[inline]
    pub fn size(&self) -> usize {
        1 + self.opcode.immediate_size()
    }

    #[inline]
    pub fn next_offset(&self) -> usize {
        self.offset + self.size()
    }

    /// Absolute jump target, for jumps whose target is not negative
    pub fn jump_target(&self) -> Option<usize> {
        match self.operand {
            Operand::Offset(rel) => {
                usize::try_from(self.next_offset() as isize + rel as isize).ok()
            }
            _ => None,
        }
    }

    pub fn stack_effect(&self) -> StackEffect {
        match (self.opcode.stack_effect(), self.operand) {
            (Some(effect), _) => effect,
            (None, Operand::Call { arity, .. }) => StackEffect::new(arity as u16, 1),
            (None, _) => StackEffect::new(0, 0),
        }
    }

    /// Re-encode this instruction
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.opcode.to_byte());
        match self.operand {
            Operand::None => {}
            Operand::Byte(b) => out.push(b),
            Operand::SmallInt(n) => out.push(n as u8),
            Operand::Index(index) => out.extend_from_slice(&index.to_be_bytes()),
            Operand::Offset(rel) => out.extend_from_slice(&rel.to_be_bytes()),
            Operand::Call { symbol, arity } => {
                out.extend_from_slice(&symbol.to_be_bytes());
                out.push(arity);
            }
        }
    }
}

#[inline]
pub(crate) fn read_u16(code: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*code.get(offset)?, *code.get(offset + 1)?]))
}

/// Decode the instruction starting at `offset`
pub fn decode_instruction(code: &[u8], offset: usize) -> Result<Instruction, BodyError> {
    let byte = *code.get(offset).ok_or(BodyError::Truncated { offset })?;
    let opcode = Opcode::from_byte(byte).ok_or(BodyError::UnknownOpcode { offset, byte })?;
    if offset + 1 + opcode.immediate_size() > code.len() {
        return Err(BodyError::Truncated { offset });
    }

    let imm = offset + 1;
    let operand = match opcode {
        Opcode::PushIntSmall => Operand::SmallInt(code[imm] as i8),
        Opcode::LoadLocal | Opcode::StoreLocal | Opcode::LoadArg | Opcode::StoreArg | Opcode::Box => {
            Operand::Byte(code[imm])
        }
        Opcode::PushConst | Opcode::PushString | Opcode::Submit | Opcode::Defer => {
            Operand::Index(u16::from_be_bytes([code[imm], code[imm + 1]]))
        }
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue => {
            Operand::Offset(i16::from_be_bytes([code[imm], code[imm + 1]]))
        }
        Opcode::Call => Operand::Call {
            symbol: u16::from_be_bytes([code[imm], code[imm + 1]]),
            arity: code[imm + 2],
        },
        _ => Operand::None,
    };

    Ok(Instruction { offset, opcode, operand })
}

/// Decode a whole instruction stream
pub fn decode_all(code: &[u8]) -> Result<Vec<Instruction>, BodyError> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < code.len() {
        let instr = decode_instruction(code, offset)?;
        offset = instr.next_offset();
        instructions.push(instr);
    }
    Ok(instructions)
}

/// Builder for constructing FunctionBodies
#[derive(Debug, Default)]
pub struct BodyBuilder {
    code: Vec<u8>,
    constants: Vec<Constant>,
    locals: Vec<LocalSlot>,
    init_locals: bool,
    overflow: Option<BodyError>,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a local slot, returns its index
    pub fn add_local(&mut self, ty: TypeRef) -> u8 {
        let index = self.locals.len();
        self.locals.push(LocalSlot::new(ty));
        match u8::try_from(index) {
            Ok(index) => index,
            Err(_) => {
                self.overflow.get_or_insert(BodyError::TooManyLocals);
                u8::MAX
            }
        }
    }

    pub fn set_init_locals(&mut self, init_locals: bool) {
        self.init_locals = init_locals;
    }

    /// Get the current bytecode offset
    #[inline]
    pub fn current_offset(&self) -> usize {
        self.code.len()
    }

    /// Emit a single opcode
    pub fn emit(&mut self, opcode: Opcode) {
        self.code.push(opcode.to_byte());
    }

    /// Emit an opcode with a 1-byte operand
    pub fn emit_byte(&mut self, opcode: Opcode, operand: u8) {
        self.code.push(opcode.to_byte());
        self.code.push(operand);
    }

    /// Emit an opcode with a 2-byte operand (big-endian)
    pub fn emit_u16(&mut self, opcode: Opcode, operand: u16) {
        self.code.push(opcode.to_byte());
        self.code.extend_from_slice(&operand.to_be_bytes());
    }

    /// Add a constant to the pool, returns its index
    pub fn add_constant(&mut self, value: Constant) -> u16 {
        if let Some(i) = self.constants.iter().position(|existing| existing.same_as(&value)) {
            return i as u16;
        }

        let index = self.constants.len();
        match u16::try_from(index) {
            Ok(index) => {
                self.constants.push(value);
                index
            }
            Err(_) => {
                self.overflow.get_or_insert(BodyError::TooManyConstants);
                u16::MAX
            }
        }
    }

    /// Emit the shortest push of an integer
    pub fn emit_int(&mut self, value: i64) {
        match i8::try_from(value) {
            Ok(small) => self.emit_byte(Opcode::PushIntSmall, small as u8),
            Err(_) => {
                let index = self.add_constant(Constant::Int(value));
                self.emit_u16(Opcode::PushConst, index);
            }
        }
    }

    /// Emit a constant load
    pub fn emit_constant(&mut self, value: Constant) {
        let opcode = if matches!(value, Constant::Str(_)) {
            Opcode::PushString
        } else {
            Opcode::PushConst
        };
        let index = self.add_constant(value);
        self.emit_u16(opcode, index);
    }

    /// Create a forward jump, returns a label to patch later
    pub fn emit_jump(&mut self, opcode: Opcode) -> JumpLabel {
        debug_assert!(opcode.is_jump());
        let offset = self.code.len();
        self.code.push(opcode.to_byte());
        // Placeholder for jump offset
        self.code.extend_from_slice(&[0xFF, 0xFF]);
        JumpLabel { offset: offset + 1 }
    }

    /// Patch a jump label to jump to the current position
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = self.code.len();
        let jump_from = label.offset + 2; // After the i16 operand
        let offset = (target as isize - jump_from as isize) as i16;
        let bytes = offset.to_be_bytes();
        self.code[label.offset] = bytes[0];
        self.code[label.offset + 1] = bytes[1];
    }

    /// Emit a backward jump to a known target
    pub fn emit_loop(&mut self, target: usize) {
        let offset = (target as isize - (self.code.len() as isize + 3)) as i16;
        self.code.push(Opcode::Jump.to_byte());
        self.code.extend_from_slice(&offset.to_be_bytes());
    }

    /// Emit a Call opcode with symbol index (u16) and arity (u8)
    pub fn emit_call(&mut self, symbol: u16, arity: u8) {
        self.code.push(Opcode::Call.to_byte());
        self.code.extend_from_slice(&symbol.to_be_bytes());
        self.code.push(arity);
    }

    /// Finish the body, computing its maximum stack depth
    pub fn build(self) -> Result<FunctionBody, BodyError> {
        if let Some(err) = self.overflow {
            return Err(err);
        }
        let max_stack = max_stack_depth(&self.code)?;
        Ok(FunctionBody {
            code: self.code,
            constants: self.constants,
            locals: self.locals,
            max_stack,
            init_locals: self.init_locals,
        })
    }
}

/// Label for a forward jump to be patched later
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel {
    offset: usize,
}
