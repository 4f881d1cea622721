//! Arithmetic operations for the bytecode VM.
//!
//! Integers use checked arithmetic; mixing an int with a float promotes to
//! float. `Add` also concatenates strings. A deferred operand is an error:
//! the rewriter inserts `Unwrap` before every consuming instruction.

use std::sync::Arc;

use super::types::{VmError, VmResult};
use super::Vm;
use crate::backend::models::Value;

enum Numeric {
    Int(i64, i64),
    Float(f64, f64),
}

fn numeric(a: &Value, b: &Value) -> VmResult<Numeric> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Numeric::Int(*x, *y)),
        (Value::Int(x), Value::Float(y)) => Ok(Numeric::Float(*x as f64, *y)),
        (Value::Float(x), Value::Int(y)) => Ok(Numeric::Float(*x, *y as f64)),
        (Value::Float(x), Value::Float(y)) => Ok(Numeric::Float(*x, *y)),
        (Value::Int(_) | Value::Float(_), other) | (other, _) => Err(VmError::TypeError {
            expected: "number",
            got: other.type_name(),
        }),
    }
}

impl Vm {
    /// Pop `b` then `a`, refusing unresolved deferred operands
    pub(super) fn pop_binary(&mut self, op: &'static str) -> VmResult<(Value, Value)> {
        let b = self.pop()?;
        let a = self.pop()?;
        if a.is_deferred() || b.is_deferred() {
            return Err(VmError::UnresolvedDeferred { op });
        }
        Ok((a, b))
    }

    // === Basic Arithmetic Operations ===

    pub(super) fn op_add(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("add")?;
        let result = match (&a, &b) {
            (Value::Str(x), Value::Str(y)) => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Value::Str(Arc::from(s))
            }
            _ => match numeric(&a, &b)? {
                Numeric::Int(x, y) => Value::Int(x.checked_add(y).ok_or(VmError::ArithmeticOverflow)?),
                Numeric::Float(x, y) => Value::Float(x + y),
            },
        };
        self.push(result)
    }

    pub(super) fn op_sub(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("sub")?;
        let result = match numeric(&a, &b)? {
            Numeric::Int(x, y) => Value::Int(x.checked_sub(y).ok_or(VmError::ArithmeticOverflow)?),
            Numeric::Float(x, y) => Value::Float(x - y),
        };
        self.push(result)
    }

    pub(super) fn op_mul(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("mul")?;
        let result = match numeric(&a, &b)? {
            Numeric::Int(x, y) => Value::Int(x.checked_mul(y).ok_or(VmError::ArithmeticOverflow)?),
            Numeric::Float(x, y) => Value::Float(x * y),
        };
        self.push(result)
    }

    pub(super) fn op_div(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("div")?;
        let result = match numeric(&a, &b)? {
            Numeric::Int(_, 0) => return Err(VmError::DivisionByZero),
            Numeric::Int(x, y) => Value::Int(x.checked_div(y).ok_or(VmError::ArithmeticOverflow)?),
            Numeric::Float(x, y) => Value::Float(x / y),
        };
        self.push(result)
    }

    pub(super) fn op_rem(&mut self) -> VmResult<()> {
        let (a, b) = self.pop_binary("rem")?;
        let result = match numeric(&a, &b)? {
            Numeric::Int(_, 0) => return Err(VmError::DivisionByZero),
            Numeric::Int(x, y) => Value::Int(x.checked_rem(y).ok_or(VmError::ArithmeticOverflow)?),
            Numeric::Float(x, y) => Value::Float(x % y),
        };
        self.push(result)
    }

    pub(super) fn op_neg(&mut self) -> VmResult<()> {
        let a = self.pop()?;
        let result = match a {
            Value::Int(x) => Value::Int(x.checked_neg().ok_or(VmError::ArithmeticOverflow)?),
            Value::Float(x) => Value::Float(-x),
            Value::Deferred(_) => return Err(VmError::UnresolvedDeferred { op: "neg" }),
            other => {
                return Err(VmError::TypeError {
                    expected: "number",
                    got: other.type_name(),
                })
            }
        };
        self.push(result)
    }
}
