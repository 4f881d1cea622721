//! Bytecode Module
//!
//! The compiled-module model the rewriter operates on and the stack VM that
//! executes it.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Artifact (.shc on disk)                       │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │  Module::from_bytes
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Module                                                           │
//! │    types → functions → FunctionBody { code, constants, locals }   │
//! │    symbol table (type, function) pairs used by Call/Submit/Defer  │
//! └───────────────────────────────────────────────────────────────────┘
//!                                 │  Program::link
//!                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Vm                                                               │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────────────┐   │
//! │  │ Value Stack │  │ Call Stack  │  │ DispatchRuntime (opt.)   │   │
//! │  └─────────────┘  └─────────────┘  └──────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`opcodes`]: Instruction set
//! - `body`: Function bodies, instruction decoding and `BodyBuilder`
//! - `analysis`: Maximum stack depth over the control-flow graph
//! - `module`: Types, functions, attributes and the symbol table
//! - `encoding`: Binary artifact format
//! - `program`: Symbol linking
//! - `vm`: Virtual machine execution engine
//!
//! # Example
//!
//! ```ignore
//! use shadowcall::backend::bytecode::{BodyBuilder, Opcode};
//!
//! // 40 + 2
//! let mut builder = BodyBuilder::new();
//! builder.emit_int(40);
//! builder.emit_int(2);
//! builder.emit(Opcode::Add);
//! builder.emit(Opcode::Return);
//! let body = builder.build()?;
//! ```

mod analysis;
mod body;
mod encoding;
mod module;
pub mod opcodes;
mod program;
mod vm;

pub use analysis::max_stack_depth;
pub use body::{
    decode_all, decode_instruction, BodyBuilder, BodyError, Constant, FunctionBody, Instruction,
    JumpLabel, LocalSlot, Operand,
};
pub use encoding::{decode_varint, encode_varint, EncodingError, FORMAT_VERSION, MAGIC};
pub use module::{Attribute, FunctionDef, Module, Param, SymbolRef, TypeDef, Visibility};
pub use opcodes::{Opcode, StackEffect};
pub use program::{FunctionId, LinkError, Program};
pub use vm::{CallFrame, Vm, VmConfig, VmError, VmResult};
