//! Scripting side of the boundary
//!
//! - `value.rs` - [`Value`], the boundary representation of scripting values
//! - `lock.rs` - the re-entrant interpreter lock taken by inbound trampolines
//!
//! [`ScriptBehavior`] is how the bridge invokes scripting-defined callables.

pub mod lock;
mod value;

pub use value::{Value, WrapperKind};

use std::fmt;

/// An error raised by scripting code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ScriptError {}

/// A scripting-defined callable installed behind a native entry point.
///
/// `receiver` is the wrapped native receiver for method overrides and
/// [`Value::Nil`] for free-function overrides.
pub trait ScriptBehavior: Send + Sync {
    fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, ScriptError>;
}

impl<F> ScriptBehavior for F
where
    F: Fn(&Value, &[Value]) -> Result<Value, ScriptError> + Send + Sync,
{
    fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        self(receiver, args)
    }
}
