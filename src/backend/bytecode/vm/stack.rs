//! Stack operations for the bytecode VM.
//!
//! This module contains methods for stack manipulation operations
//! like push, pop, peek, dup and swap.

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::Value;

impl Vm {
    // === Stack Operations ===

    /// Push onto the current frame's operand stack, enforcing its declared limit
    #[inline]
    pub(super) fn push(&mut self, value: Value) -> VmResult<()> {
        if let Some(frame) = self.call_stack.last() {
            if self.value_stack.len() - frame.stack_base >= frame.max_stack as usize {
                return Err(VmError::ValueStackOverflow);
            }
        }
        self.value_stack.push(value);
        Ok(())
    }

    #[inline]
    pub(super) fn pop(&mut self) -> VmResult<Value> {
        let base = self.call_stack.last().map_or(0, |frame| frame.stack_base);
        if self.value_stack.len() <= base {
            return Err(VmError::StackUnderflow);
        }
        self.value_stack.pop().ok_or(VmError::StackUnderflow)
    }

    #[inline]
    pub(super) fn peek(&self) -> VmResult<&Value> {
        self.value_stack.last().ok_or(VmError::StackUnderflow)
    }

    /// Pop `n` values, returned in push order
    pub(super) fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let base = self.call_stack.last().map_or(0, |frame| frame.stack_base);
        if self.value_stack.len() < base + n {
            return Err(VmError::StackUnderflow);
        }
        let at = self.value_stack.len() - n;
        Ok(self.value_stack.split_off(at))
    }

    pub(super) fn op_dup(&mut self) -> VmResult<()> {
        trace!(target: "shadowcall::vm::stack", depth = self.value_stack.len(), "dup");
        let value = self.peek()?.clone();
        self.push(value)
    }

    pub(super) fn op_swap(&mut self) -> VmResult<()> {
        trace!(target: "shadowcall::vm::stack", depth = self.value_stack.len(), "swap");
        let base = self.call_stack.last().map_or(0, |frame| frame.stack_base);
        let len = self.value_stack.len();
        if len < base + 2 {
            return Err(VmError::StackUnderflow);
        }
        self.value_stack.swap(len - 1, len - 2);
        Ok(())
    }
}
