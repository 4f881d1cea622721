//! Control flow operations for the bytecode VM.
//!
//! This module contains methods for control flow operations
//! like jumps, calls, and returns.

use std::ops::ControlFlow;

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::Value;

impl Vm {
    // === Jump Operations ===

    fn jump_by(&mut self, offset: i16) -> VmResult<()> {
        let frame = self.frame_mut()?;
        let target = frame.ip as isize + offset as isize;
        frame.ip = usize::try_from(target).map_err(|_| VmError::IpOutOfBounds)?;
        Ok(())
    }

    /// Pop a branch condition; deferred conditions must be unwrapped first
    fn pop_condition(&mut self, op: &'static str) -> VmResult<bool> {
        let cond = self.pop()?;
        if cond.is_deferred() {
            return Err(VmError::UnresolvedDeferred { op });
        }
        Ok(cond.is_truthy())
    }

    pub(super) fn op_jump(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        self.jump_by(offset)
    }

    pub(super) fn op_jump_if_false(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        if !self.pop_condition("jump_if_false")? {
            self.jump_by(offset)?;
        }
        Ok(())
    }

    pub(super) fn op_jump_if_true(&mut self) -> VmResult<()> {
        let offset = self.read_i16()?;
        if self.pop_condition("jump_if_true")? {
            self.jump_by(offset)?;
        }
        Ok(())
    }

    // === Call Operations ===

    pub(super) fn op_call(&mut self) -> VmResult<()> {
        let symbol = self.read_u16()?;
        let arity = self.read_u8()? as usize;
        let target = self
            .program
            .resolve_symbol(symbol)
            .ok_or(VmError::UnresolvedSymbol(symbol))?;
        let args = self.pop_n(arity)?;
        trace!(target: "shadowcall::vm::call", callee = %target, arity, "call");
        self.push_frame(target, args.into_iter().collect())
    }

    /// Return from the current frame, handing the top value to the caller
    pub(super) fn op_return(&mut self) -> VmResult<ControlFlow<Value>> {
        let value = self.pop()?;
        let frame = self.call_stack.pop().ok_or(VmError::StackUnderflow)?;
        self.value_stack.truncate(frame.stack_base);

        if self.call_stack.is_empty() {
            return Ok(ControlFlow::Break(value));
        }
        self.push(value)?;
        Ok(ControlFlow::Continue(()))
    }
}
