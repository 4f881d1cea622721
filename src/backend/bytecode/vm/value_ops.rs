//! Value creation, variable and array operations for the bytecode VM.

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::{ArrayRef, TypeRef, Value};

impl Vm {
    // === Constants ===

    pub(super) fn op_push_constant(&mut self) -> VmResult<()> {
        let index = self.read_u16()?;
        let function = self.frame()?.function;
        let value = self
            .function_def(function)?
            .body
            .get_constant(index)
            .ok_or(VmError::InvalidConstant(index))?
            .to_value();
        self.push(value)
    }

    // === Locals and Arguments ===

    pub(super) fn op_load_local(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self
            .frame()?
            .locals
            .get(index as usize)
            .cloned()
            .ok_or(VmError::InvalidLocal(index))?;
        self.push(value)
    }

    pub(super) fn op_store_local(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self.pop()?;
        let slot = self
            .frame_mut()?
            .locals
            .get_mut(index as usize)
            .ok_or(VmError::InvalidLocal(index))?;
        *slot = value;
        Ok(())
    }

    pub(super) fn op_load_arg(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self
            .frame()?
            .args
            .get(index as usize)
            .cloned()
            .ok_or(VmError::InvalidArg(index))?;
        self.push(value)
    }

    pub(super) fn op_store_arg(&mut self) -> VmResult<()> {
        let index = self.read_u8()?;
        let value = self.pop()?;
        let slot = self
            .frame_mut()?
            .args
            .get_mut(index as usize)
            .ok_or(VmError::InvalidArg(index))?;
        *slot = value;
        Ok(())
    }

    // === Arrays ===

    fn pop_index(&mut self, op: &'static str) -> VmResult<i64> {
        match self.pop()? {
            Value::Int(n) => Ok(n),
            Value::Deferred(_) => Err(VmError::UnresolvedDeferred { op }),
            other => Err(VmError::TypeError {
                expected: "int",
                got: other.type_name(),
            }),
        }
    }

    pub(super) fn op_new_array(&mut self) -> VmResult<()> {
        let len = self.pop_index("new_array")?;
        let len = usize::try_from(len).map_err(|_| VmError::IndexOutOfBounds { index: len, len: 0 })?;
        self.push(Value::array_of_len(len))
    }

    pub(super) fn op_load_elem(&mut self) -> VmResult<()> {
        let index = self.pop_index("load_elem")?;
        let array = self.pop_array("load_elem")?;
        let items = array.lock();
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).cloned())
            .ok_or(VmError::IndexOutOfBounds { index, len: items.len() })?;
        drop(items);
        self.push(value)
    }

    pub(super) fn op_store_elem(&mut self) -> VmResult<()> {
        let value = self.pop()?;
        let index = self.pop_index("store_elem")?;
        let array = self.pop_array("store_elem")?;
        let mut items = array.lock();
        let len = items.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| items.get_mut(i))
            .ok_or(VmError::IndexOutOfBounds { index, len })?;
        *slot = value;
        Ok(())
    }

    pub(super) fn op_array_len(&mut self) -> VmResult<()> {
        let array = self.pop_array("array_len")?;
        let len = array.lock().len() as i64;
        self.push(Value::Int(len))
    }

    fn pop_array(&mut self, op: &'static str) -> VmResult<ArrayRef> {
        match self.pop()? {
            Value::Array(items) => Ok(items),
            Value::Deferred(_) => Err(VmError::UnresolvedDeferred { op }),
            other => Err(VmError::TypeError {
                expected: "array",
                got: other.type_name(),
            }),
        }
    }

    // === Boxing ===

    /// Check the top of stack against a value type before it is stored as an object
    pub(super) fn op_box(&mut self) -> VmResult<()> {
        let tag = self.read_u8()?;
        let ty = TypeRef::from_simple_tag(tag).ok_or(VmError::InvalidTypeTag(tag))?;
        let value = self.peek()?;
        // A deferred argument stays deferred; it is checked once resolved
        if value.is_deferred() {
            trace!(target: "shadowcall::vm::value", ty = %ty, "box deferred");
            return Ok(());
        }
        if !ty.admits(value) {
            return Err(VmError::BoxMismatch {
                expected: ty,
                got: value.type_name(),
            });
        }
        trace!(target: "shadowcall::vm::value", ty = %ty, "box");
        Ok(())
    }
}
