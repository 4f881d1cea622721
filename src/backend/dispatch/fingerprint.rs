//! Structural call identity
//!
//! A fingerprint is the declaring type, the function name and a snapshot of
//! the ordered arguments. Equality is structural, so two distinct calls can
//! never share a registry entry by hash collision.

use std::fmt;
use std::sync::Arc;

use crate::backend::bytecode::SymbolRef;
use crate::backend::models::Value;

/// Immutable copy of one argument, taken at submission time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArgSnapshot {
    Nil,
    Bool(bool),
    Int(i64),
    /// Bit pattern of the float, so NaN and -0.0 get stable identities
    Float(u64),
    Str(Arc<str>),
    Array(Vec<ArgSnapshot>),
    /// A deferred argument is identified by the call that produces it
    Deferred(Box<CallFingerprint>),
}

impl ArgSnapshot {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Nil => ArgSnapshot::Nil,
            Value::Bool(b) => ArgSnapshot::Bool(*b),
            Value::Int(n) => ArgSnapshot::Int(*n),
            Value::Float(x) => ArgSnapshot::Float(x.to_bits()),
            Value::Str(s) => ArgSnapshot::Str(Arc::clone(s)),
            Value::Array(items) => {
                ArgSnapshot::Array(items.lock().iter().map(ArgSnapshot::of).collect())
            }
            Value::Deferred(d) => ArgSnapshot::Deferred(Box::new(d.fingerprint().clone())),
        }
    }
}

impl fmt::Display for ArgSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSnapshot::Nil => write!(f, "nil"),
            ArgSnapshot::Bool(b) => write!(f, "{}", b),
            ArgSnapshot::Int(n) => write!(f, "{}", n),
            ArgSnapshot::Float(bits) => write!(f, "{:?}", f64::from_bits(*bits)),
            ArgSnapshot::Str(s) => write!(f, "{:?}", s),
            ArgSnapshot::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            ArgSnapshot::Deferred(fp) => write!(f, "<{}>", fp),
        }
    }
}

/// Registry key identifying one logical call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallFingerprint {
    pub scope: Arc<str>,
    pub function: Arc<str>,
    pub args: Vec<ArgSnapshot>,
}

impl CallFingerprint {
    pub fn new(scope: impl Into<Arc<str>>, function: impl Into<Arc<str>>, args: &[Value]) -> Self {
        Self {
            scope: scope.into(),
            function: function.into(),
            args: args.iter().map(ArgSnapshot::of).collect(),
        }
    }

    /// Fingerprint of a call to `symbol`
    pub fn for_symbol(symbol: &SymbolRef, args: &[Value]) -> Self {
        Self::new(Arc::clone(&symbol.type_name), Arc::clone(&symbol.function), args)
    }
}

impl fmt::Display for CallFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}(", self.scope, self.function)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}
