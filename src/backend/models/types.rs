//! Declared types of parameters, locals and return values.

use std::fmt;

use super::Value;

/// A declared type in a compiled module
///
/// The VM is dynamically typed; declared types drive the rewriter (boxing of
/// value-type arguments, return type substitution) and are checked by `Box`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// No value
    Void,
    /// 64-bit signed integer (value type)
    Int,
    /// 64-bit float (value type)
    Float,
    /// Boolean (value type)
    Bool,
    /// Immutable string
    Str,
    /// Array of object references
    Array,
    /// Any value
    Object,
    /// Deferred result of a dispatched call producing the inner type
    Deferred(Box<TypeRef>),
}

impl TypeRef {
    /// Encoding tag used by the artifact format and the `Box` immediate
    pub fn tag(&self) -> u8 {
        match self {
            Self::Void => 0,
            Self::Int => 1,
            Self::Float => 2,
            Self::Bool => 3,
            Self::Str => 4,
            Self::Array => 5,
            Self::Object => 6,
            Self::Deferred(_) => 7,
        }
    }

    /// Decode a non-generic tag. `Deferred` needs its inner type and is
    /// handled by the artifact decoder.
    pub fn from_simple_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Void),
            1 => Some(Self::Int),
            2 => Some(Self::Float),
            3 => Some(Self::Bool),
            4 => Some(Self::Str),
            5 => Some(Self::Array),
            6 => Some(Self::Object),
            _ => None,
        }
    }

    /// Whether values of this type must be boxed before being stored in an
    /// object array
    #[inline]
    pub fn is_value_type(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Bool)
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    #[inline]
    pub fn is_deferred(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    /// Wrap this type in `Deferred`
    pub fn deferred(self) -> Self {
        Self::Deferred(Box::new(self))
    }

    /// Check whether a runtime value inhabits this type
    pub fn admits(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Object, _) => true,
            (Self::Void, Value::Nil) => true,
            (Self::Int, Value::Int(_)) => true,
            (Self::Float, Value::Float(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Str, Value::Str(_)) => true,
            (Self::Array, Value::Array(_)) => true,
            (Self::Deferred(_), Value::Deferred(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Void => write!(f, "void"),
            Self::Int => write!(f, "int"),
            Self::Float => write!(f, "float"),
            Self::Bool => write!(f, "bool"),
            Self::Str => write!(f, "str"),
            Self::Array => write!(f, "object[]"),
            Self::Object => write!(f, "object"),
            Self::Deferred(inner) => write!(f, "deferred<{}>", inner),
        }
    }
}
