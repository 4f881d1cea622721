//! Dispatch operations for the bytecode VM.
//!
//! `Submit` and `Defer` both take the packed argument array of a stub and
//! the symbol of a hidden implementation. `Unwrap` forces a deferred value.

use std::sync::Arc;

use tracing::trace;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::bytecode::program::FunctionId;
use crate::backend::dispatch::DispatchRuntime;
use crate::backend::models::Value;

impl Vm {
    fn dispatch_target(&mut self, op: &'static str) -> VmResult<(Arc<DispatchRuntime>, FunctionId, Vec<Value>)> {
        let symbol = self.read_u16()?;
        let packed = self.pop()?;
        let runtime = self.runtime.clone().ok_or(VmError::NoRuntime(op))?;
        let target = self
            .program
            .resolve_symbol(symbol)
            .ok_or(VmError::UnresolvedSymbol(symbol))?;
        let args = packed.array_items().ok_or(VmError::TypeError {
            expected: "array",
            got: packed.type_name(),
        })?;
        Ok((runtime, target, args))
    }

    pub(super) fn op_submit(&mut self) -> VmResult<()> {
        let (runtime, target, args) = self.dispatch_target("submit")?;
        let fingerprint = runtime.submit(target, args)?;
        trace!(target: "shadowcall::vm::dispatch", call = %fingerprint, "submit");
        Ok(())
    }

    pub(super) fn op_defer(&mut self) -> VmResult<()> {
        let (runtime, target, args) = self.dispatch_target("defer")?;
        let deferred = runtime.defer(target, args)?;
        self.push(Value::Deferred(deferred))
    }

    /// Replace a deferred value with its result; other values pass through
    pub(super) fn op_unwrap(&mut self) -> VmResult<()> {
        let value = match self.pop()? {
            Value::Deferred(deferred) => {
                trace!(target: "shadowcall::vm::dispatch", call = %deferred.fingerprint(), "unwrap");
                deferred.value()?
            }
            other => other,
        };
        self.push(value)
    }
}
