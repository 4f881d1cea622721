//! Deferred value wrapper
//!
//! `DeferredValue<T>` is what a rewritten function returns in place of its
//! result. It carries the call's fingerprint and original arguments plus a
//! resolver; the first access blocks on the resolver and caches the value.

use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

use crate::backend::models::Value;

use super::error::{DispatchError, DispatchResult};
use super::fingerprint::CallFingerprint;

/// Source of values for deferred handles
pub trait Resolver: Send + Sync {
    /// Block until the call identified by `fingerprint` is terminal
    fn resolve(&self, fingerprint: &CallFingerprint) -> DispatchResult<Value>;
}

/// Conversion from a resolved value to a concrete Rust type
pub trait FromValue: Sized {
    fn from_value(value: Value) -> DispatchResult<Self>;
}

impl FromValue for Value {
    fn from_value(value: Value) -> DispatchResult<Self> {
        Ok(value)
    }
}

macro_rules! impl_from_value {
    ($ty:ty, $expected:literal, $pat:pat => $out:expr) => {
        impl FromValue for $ty {
            fn from_value(value: Value) -> DispatchResult<Self> {
                match value {
                    $pat => Ok($out),
                    other => Err(DispatchError::TypeMismatch {
                        expected: $expected,
                        got: other.type_name(),
                    }),
                }
            }
        }
    };
}

impl_from_value!(i64, "int", Value::Int(n) => n);
impl_from_value!(f64, "float", Value::Float(x) => x);
impl_from_value!(bool, "bool", Value::Bool(b) => b);
impl_from_value!(Arc<str>, "str", Value::Str(s) => s);
impl_from_value!(String, "str", Value::Str(s) => s.to_string());

struct Shared {
    fingerprint: CallFingerprint,
    args: Vec<Value>,
    resolver: Arc<dyn Resolver>,
    cache: OnceLock<Value>,
}

/// Handle to the result of a dispatched call
pub struct DeferredValue<T = Value> {
    shared: Arc<Shared>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DeferredValue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DeferredValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("fingerprint", &self.shared.fingerprint.to_string())
            .field("resolved", &self.shared.cache.get().is_some())
            .finish()
    }
}

impl DeferredValue<Value> {
    pub fn new(fingerprint: CallFingerprint, args: Vec<Value>, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            shared: Arc::new(Shared {
                fingerprint,
                args,
                resolver,
                cache: OnceLock::new(),
            }),
            _marker: PhantomData,
        }
    }
}

impl<T> DeferredValue<T> {
    pub fn fingerprint(&self) -> &CallFingerprint {
        &self.shared.fingerprint
    }

    /// The arguments the call was submitted with
    pub fn args(&self) -> &[Value] {
        &self.shared.args
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.cache.get().is_some()
    }

    /// View the same handle as another result type
    pub fn typed<U: FromValue>(&self) -> DeferredValue<U> {
        DeferredValue {
            shared: Arc::clone(&self.shared),
            _marker: PhantomData,
        }
    }

    /// Resolve to a plain value, following chains of deferred results
    fn raw(&self) -> DispatchResult<Value> {
        if let Some(value) = self.shared.cache.get() {
            return Ok(value.clone());
        }
        let mut value = self.shared.resolver.resolve(&self.shared.fingerprint)?;
        while let Value::Deferred(inner) = value {
            value = inner.raw()?;
        }
        Ok(self.shared.cache.get_or_init(|| value).clone())
    }
}

impl<T: FromValue> DeferredValue<T> {
    /// Resolve the call and convert its result
    ///
    /// Blocks on first access; later calls return the cached value.
    pub fn value(&self) -> DispatchResult<T> {
        T::from_value(self.raw()?)
    }

    /// Consume the handle, resolving it
    pub fn into_value(self) -> DispatchResult<T> {
        self.value()
    }
}
