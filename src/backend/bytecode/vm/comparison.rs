//! Comparison and boolean operations for the bytecode VM.
//!
//! Ordering comparisons accept two numbers or two strings. `Eq`/`Ne` accept
//! any pair of resolved values.

use std::cmp::Ordering;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::Value;

fn ordering(a: &Value, b: &Value) -> VmResult<Option<Ordering>> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Some(x.cmp(y))),
        (Value::Int(x), Value::Float(y)) => Ok((*x as f64).partial_cmp(y)),
        (Value::Float(x), Value::Int(y)) => Ok(x.partial_cmp(&(*y as f64))),
        (Value::Float(x), Value::Float(y)) => Ok(x.partial_cmp(y)),
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::Int(_) | Value::Float(_) | Value::Str(_), other) | (other, _) => {
            Err(VmError::TypeError {
                expected: "comparable",
                got: other.type_name(),
            })
        }
    }
}

impl Vm {
    fn compare_with(&mut self, op: &'static str, accept: fn(Ordering) -> bool) -> VmResult<()> {
        let (a, b) = self.pop_binary(op)?;
        // NaN compares false under every ordering
        let result = ordering(&a, &b)?.map_or(false, accept);
        self.push(Value::Bool(result))
    }

    // === Comparison Operations ===

    pub(super) fn op_lt(&mut self) -> VmResult<()> {
        self.compare_with("lt", Ordering::is_lt)
    }

    pub(super) fn op_le(&mut self) -> VmResult<()> {
        self.compare_with("le", Ordering::is_le)
    }

    pub(super) fn op_gt(&mut self) -> VmResult<()> {
        self.compare_with("gt", Ordering::is_gt)
    }

    pub(super) fn op_ge(&mut self) -> VmResult<()> {
        self.compare_with("ge", Ordering::is_ge)
    }

    pub(super) fn op_eq(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("eq")?;
        self.push(Value::Bool(a == b))
    }

    pub(super) fn op_ne(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("ne")?;
        self.push(Value::Bool(a != b))
    }

    // === Boolean Operations ===

    pub(super) fn op_not(&mut self) -> VmResult<()> {
        let a = self.pop()?;
        if a.is_deferred() {
            return Err(VmError::UnresolvedDeferred { op: "not" });
        }
        self.push(Value::Bool(!a.is_truthy()))
    }
}
