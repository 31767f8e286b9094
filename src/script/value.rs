//! Boundary value model
//!
//! The scripting runtime converts its own values to and from [`Value`] at the
//! bridge boundary. Native entities are carried as handles so that identity
//! and ownership survive the crossing.

use crate::handles::{ClassHandle, FunctionHandle, MethodHandle, ObjectHandle, VariableHandle};
use std::fmt;
use std::sync::Arc;

/// A scripting value as seen by the bridge
#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Array(Vec<Value>),
    Object(ObjectHandle),
    Class(ClassHandle),
    Method(MethodHandle),
    Variable(VariableHandle),
    Function(FunctionHandle),
}

/// The wrapper kinds a value can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapperKind {
    Object,
    Class,
    Method,
    Variable,
    Function,
}

impl Value {
    #[inline]
    pub fn str(text: &str) -> Self {
        Self::Str(Arc::from(text))
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Whether this value wraps a handle of `kind`
    pub fn wraps(&self, kind: WrapperKind) -> bool {
        matches!(
            (self, kind),
            (Self::Object(_), WrapperKind::Object)
                | (Self::Class(_), WrapperKind::Class)
                | (Self::Method(_), WrapperKind::Method)
                | (Self::Variable(_), WrapperKind::Variable)
                | (Self::Function(_), WrapperKind::Function)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectHandle> {
        match self {
            Self::Object(handle) => Some(handle),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassHandle> {
        match self {
            Self::Class(handle) => Some(handle),
            _ => None,
        }
    }

    /// Scripting-level type name, used in mismatch diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Class(_) => "class",
            Self::Method(_) => "method",
            Self::Variable(_) => "variable",
            Self::Function(_) => "function",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Nil
    }
}

/// Scalars compare by value, handles by native identity
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::Method(a), Self::Method(b)) => a == b,
            (Self::Variable(a), Self::Variable(b)) => a == b,
            (Self::Function(a), Self::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{:?}", x),
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Array(items) => f.debug_list().entries(items).finish(),
            Self::Object(h) => write!(f, "{:?}", h),
            Self::Class(h) => write!(f, "{:?}", h),
            Self::Method(h) => write!(f, "{:?}", h),
            Self::Variable(h) => write!(f, "{:?}", h),
            Self::Function(h) => write!(f, "{:?}", h),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Arc::from(s))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<ObjectHandle> for Value {
    fn from(handle: ObjectHandle) -> Self {
        Self::Object(handle)
    }
}

impl From<ClassHandle> for Value {
    fn from(handle: ClassHandle) -> Self {
        Self::Class(handle)
    }
}
