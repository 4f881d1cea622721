//! Bytecode Virtual Machine
//!
//! Executes one function invocation of a linked program to completion using
//! a shared value stack and a stack of call frames.
//!
//! This module is organized into submodules by functionality:
//! - `types`: Core type definitions (VmError, VmConfig, CallFrame)
//! - `stack`: Stack manipulation operations
//! - `arithmetic`: Arithmetic operations
//! - `comparison`: Comparison and boolean operations
//! - `value_ops`: Constants, locals, arguments and arrays
//! - `control_flow`: Jumps, calls, and returns
//! - `dispatch_ops`: Submit, Defer and Unwrap

use std::ops::ControlFlow;
use std::sync::Arc;

use smallvec::SmallVec;
use tracing::trace;

use super::module::FunctionDef;
use super::opcodes::Opcode;
use super::program::{FunctionId, Program};
use crate::backend::dispatch::DispatchRuntime;
use crate::backend::models::Value;

// === Submodules ===

mod arithmetic;
mod comparison;
mod control_flow;
mod dispatch_ops;
mod stack;
mod types;
mod value_ops;


// === Re-exports ===

pub use types::{CallFrame, VmConfig, VmError, VmResult};

/// The Bytecode Virtual Machine
pub struct Vm {
    /// Value stack for operands and results
    pub(super) value_stack: Vec<Value>,

    /// Call stack for function frames
    pub(super) call_stack: Vec<CallFrame>,

    /// Linked program being executed
    pub(super) program: Arc<Program>,

    /// Runtime serving Submit/Defer; `None` for plain execution
    pub(super) runtime: Option<Arc<DispatchRuntime>>,

    /// VM configuration
    pub(super) config: VmConfig,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("stack_depth", &self.value_stack.len())
            .field("call_depth", &self.call_stack.len())
            .field("has_runtime", &self.runtime.is_some())
            .field("config", &self.config)
            .finish()
    }
}

impl Vm {
    // === Constructors ===

    /// Create a new VM for the given program
    pub fn new(program: Arc<Program>) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    /// Create a new VM with custom configuration
    pub fn with_config(program: Arc<Program>, config: VmConfig) -> Self {
        Self {
            value_stack: Vec::with_capacity(64),
            call_stack: Vec::with_capacity(16),
            program,
            runtime: None,
            config,
        }
    }

    /// Attach a dispatch runtime, enabling the dispatch opcodes
    pub fn with_runtime(mut self, runtime: Arc<DispatchRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    // === Execution Methods ===

    /// Invoke `function` with `args` and run it to completion
    pub fn invoke(&mut self, function: FunctionId, args: Vec<Value>) -> VmResult<Value> {
        self.value_stack.clear();
        self.call_stack.clear();
        self.push_frame(function, args.into_iter().collect())?;

        let result = loop {
            match self.step() {
                Ok(ControlFlow::Continue(())) => continue,
                Ok(ControlFlow::Break(value)) => break Ok(value),
                Err(e) => break Err(e),
            }
        };

        if result.is_err() {
            self.value_stack.clear();
            self.call_stack.clear();
        }
        result
    }

    /// Invoke the program's entry point without arguments
    pub fn run_entry(&mut self) -> VmResult<Value> {
        let entry = self.program.entry().ok_or(VmError::NoEntryPoint)?;
        self.invoke(entry, Vec::new())
    }

    /// Execute a single instruction
    pub fn step(&mut self) -> VmResult<ControlFlow<Value>> {
        let (function, ip) = {
            let frame = self.frame()?;
            (frame.function, frame.ip)
        };
        let opcode_byte = *self
            .function_def(function)?
            .body
            .code()
            .get(ip)
            .ok_or(VmError::IpOutOfBounds)?;
        let opcode = Opcode::from_byte(opcode_byte).ok_or(VmError::InvalidOpcode(opcode_byte))?;

        // Trace if enabled
        if self.config.trace {
            trace!(
                target: "shadowcall::vm::step",
                function = %function,
                ip,
                op = %opcode,
                stack_depth = self.value_stack.len()
            );
        }

        // Advance IP past opcode
        self.frame_mut()?.ip += 1;

        match opcode {
            // Stack operations
            Opcode::Nop => {}
            Opcode::Pop => {
                self.pop()?;
            }
            Opcode::Dup => self.op_dup()?,
            Opcode::Swap => self.op_swap()?,

            // Value creation
            Opcode::PushNil => self.push(Value::Nil)?,
            Opcode::PushTrue => self.push(Value::Bool(true))?,
            Opcode::PushFalse => self.push(Value::Bool(false))?,
            Opcode::PushIntSmall => {
                let n = self.read_u8()? as i8;
                self.push(Value::Int(n as i64))?;
            }
            Opcode::PushConst | Opcode::PushString => self.op_push_constant()?,

            // Variable operations
            Opcode::LoadLocal => self.op_load_local()?,
            Opcode::StoreLocal => self.op_store_local()?,
            Opcode::LoadArg => self.op_load_arg()?,
            Opcode::StoreArg => self.op_store_arg()?,

            // Arrays
            Opcode::NewArray => self.op_new_array()?,
            Opcode::LoadElem => self.op_load_elem()?,
            Opcode::StoreElem => self.op_store_elem()?,
            Opcode::ArrayLen => self.op_array_len()?,
            Opcode::Box => self.op_box()?,

            // Control flow
            Opcode::Jump => self.op_jump()?,
            Opcode::JumpIfFalse => self.op_jump_if_false()?,
            Opcode::JumpIfTrue => self.op_jump_if_true()?,
            Opcode::Call => self.op_call()?,
            Opcode::Return => return self.op_return(),

            // Dispatch
            Opcode::Submit => self.op_submit()?,
            Opcode::Defer => self.op_defer()?,
            Opcode::Unwrap => self.op_unwrap()?,

            // Arithmetic
            Opcode::Add => self.op_add()?,
            Opcode::Sub => self.op_sub()?,
            Opcode::Mul => self.op_mul()?,
            Opcode::Div => self.op_div()?,
            Opcode::Rem => self.op_rem()?,
            Opcode::Neg => self.op_neg()?,

            // Comparison
            Opcode::Lt => self.op_lt()?,
            Opcode::Le => self.op_le()?,
            Opcode::Gt => self.op_gt()?,
            Opcode::Ge => self.op_ge()?,
            Opcode::Eq => self.op_eq()?,
            Opcode::Ne => self.op_ne()?,

            // Boolean
            Opcode::Not => self.op_not()?,

            Opcode::Halt => {
                let value = self.value_stack.pop().unwrap_or(Value::Nil);
                self.call_stack.clear();
                self.value_stack.clear();
                return Ok(ControlFlow::Break(value));
            }
        }

        Ok(ControlFlow::Continue(()))
    }

    // === Frame and Body Access ===

    #[inline]
    pub(super) fn frame(&self) -> VmResult<&CallFrame> {
        self.call_stack.last().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn frame_mut(&mut self) -> VmResult<&mut CallFrame> {
        self.call_stack.last_mut().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn function_def(&self, id: FunctionId) -> VmResult<&FunctionDef> {
        self.program.function(id).ok_or(VmError::UnknownFunction(id))
    }

    /// Push a frame for `function`, checking arity and call depth
    pub(super) fn push_frame(&mut self, function: FunctionId, args: SmallVec<[Value; 4]>) -> VmResult<()> {
        if self.call_stack.len() >= self.config.max_call_depth {
            return Err(VmError::CallStackOverflow);
        }
        let def = self.function_def(function)?;
        if def.params.len() != args.len() {
            return Err(VmError::ArityMismatch {
                function: def.name.clone(),
                expected: def.params.len(),
                got: args.len(),
            });
        }
        let frame = CallFrame {
            function,
            ip: 0,
            stack_base: self.value_stack.len(),
            max_stack: def.body.max_stack(),
            args,
            locals: vec![Value::Nil; def.body.locals().len()],
        };
        self.call_stack.push(frame);
        Ok(())
    }

    // === Bytecode Reading Helpers ===

    #[inline]
    pub(super) fn read_u8(&mut self) -> VmResult<u8> {
        let frame = self.call_stack.last_mut().ok_or(VmError::StackUnderflow)?;
        let code = self
            .program
            .function(frame.function)
            .ok_or(VmError::UnknownFunction(frame.function))?
            .body
            .code();
        let byte = *code.get(frame.ip).ok_or(VmError::IpOutOfBounds)?;
        frame.ip += 1;
        Ok(byte)
    }

    #[inline]
    pub(super) fn read_u16(&mut self) -> VmResult<u16> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    #[inline]
    pub(super) fn read_i16(&mut self) -> VmResult<i16> {
        Ok(self.read_u16()? as i16)
    }
}
