//! Type definitions for the bytecode VM.
//!
//! - VmError: Error types that can occur during execution
//! - CallFrame: Stack frame for one function activation
//! - VmConfig: VM configuration options

use serde::Deserialize;
use smallvec::SmallVec;

use crate::backend::bytecode::program::FunctionId;
use crate::backend::dispatch::DispatchError;
use crate::backend::models::{TypeRef, Value};

/// Result of VM execution
pub type VmResult<T> = Result<T, VmError>;

/// Errors that can occur during VM execution
#[derive(Debug, Clone, PartialEq)]
pub enum VmError {
    /// Stack underflow
    StackUnderflow,
    /// Frame pushed more values than its declared `max_stack`
    ValueStackOverflow,
    /// Call depth limit reached
    CallStackOverflow,
    /// Invalid opcode byte
    InvalidOpcode(u8),
    /// Invalid constant index
    InvalidConstant(u16),
    /// Invalid local variable index
    InvalidLocal(u8),
    /// Invalid argument index
    InvalidArg(u8),
    /// Symbol table index with no linked function
    UnresolvedSymbol(u16),
    /// Function id outside the program
    UnknownFunction(FunctionId),
    /// Wrong number of arguments for a call
    ArityMismatch { function: String, expected: usize, got: usize },
    /// Type error in operation
    TypeError { expected: &'static str, got: &'static str },
    /// `Box` applied to a value of another type
    BoxMismatch { expected: TypeRef, got: &'static str },
    /// Unknown type tag in a `Box` immediate
    InvalidTypeTag(u8),
    /// A deferred value reached an operation that needs its result
    UnresolvedDeferred { op: &'static str },
    /// Division by zero
    DivisionByZero,
    /// Arithmetic overflow (e.g., i64::MIN / -1)
    ArithmeticOverflow,
    /// Array index out of bounds
    IndexOutOfBounds { index: i64, len: usize },
    /// Instruction pointer out of bounds
    IpOutOfBounds,
    /// Dispatch opcode executed without an attached runtime
    NoRuntime(&'static str),
    /// `run_entry` on a program without an entry point
    NoEntryPoint,
    /// Submitting or resolving a deferred call failed
    Dispatch(DispatchError),
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StackUnderflow => write!(f, "Stack underflow"),
            Self::ValueStackOverflow => write!(f, "Value stack overflow"),
            Self::CallStackOverflow => write!(f, "Call stack overflow"),
            Self::InvalidOpcode(b) => write!(f, "Invalid opcode: 0x{:02x}", b),
            Self::InvalidConstant(i) => write!(f, "Invalid constant index: {}", i),
            Self::InvalidLocal(i) => write!(f, "Invalid local variable index: {}", i),
            Self::InvalidArg(i) => write!(f, "Invalid argument index: {}", i),
            Self::UnresolvedSymbol(i) => write!(f, "Unresolved symbol index: {}", i),
            Self::UnknownFunction(id) => write!(f, "Unknown function: {}", id),
            Self::ArityMismatch { function, expected, got } => {
                write!(f, "{} expects {} arguments, got {}", function, expected, got)
            }
            Self::TypeError { expected, got } => {
                write!(f, "Type error: expected {}, got {}", expected, got)
            }
            Self::BoxMismatch { expected, got } => {
                write!(f, "Cannot box {} as {}", got, expected)
            }
            Self::InvalidTypeTag(t) => write!(f, "Invalid type tag: {}", t),
            Self::UnresolvedDeferred { op } => {
                write!(f, "Unresolved deferred value used as operand of {}", op)
            }
            Self::DivisionByZero => write!(f, "Division by zero"),
            Self::ArithmeticOverflow => write!(f, "Arithmetic overflow"),
            Self::IndexOutOfBounds { index, len } => {
                write!(f, "Index out of bounds: index {} but length is {}", index, len)
            }
            Self::IpOutOfBounds => write!(f, "Instruction pointer out of bounds"),
            Self::NoRuntime(op) => write!(f, "{} requires a dispatch runtime", op),
            Self::NoEntryPoint => write!(f, "Program has no entry point"),
            Self::Dispatch(e) => write!(f, "Dispatch error: {}", e),
        }
    }
}

impl std::error::Error for VmError {}

impl From<DispatchError> for VmError {
    fn from(e: DispatchError) -> Self {
        VmError::Dispatch(e)
    }
}

/// One function activation
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub function: FunctionId,
    /// Next instruction to execute
    pub ip: usize,
    /// Base pointer into the value stack
    pub stack_base: usize,
    /// Declared operand stack limit of the body
    pub max_stack: u16,
    pub args: SmallVec<[Value; 4]>,
    pub locals: Vec<Value>,
}

/// Configuration for the VM
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    /// Maximum call stack size of this VM. Worker VMs take theirs from
    /// `RuntimeConfig::max_call_depth` instead
    pub max_call_depth: usize,
    /// Trace every executed instruction
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 1024,
            trace: false,
        }
    }
}
