//! Error taxonomy for the bridge
//!
//! Every fallible operation in the crate returns [`BridgeError`]. The first six
//! variants are the kinds a scripting caller can observe from a call; the rest
//! come from lookups and configuration in the binding layer.

use thiserror::Error;

/// Bridge result type
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A type-encoding string contains a character the parser does not accept
    #[error("unsupported type encoding `{offending}` in `{encoding}`: {reason}")]
    UnsupportedEncoding {
        encoding: String,
        offending: String,
        reason: &'static str,
    },

    /// A signature has more arguments than the foreign-call mechanism accepts
    #[error("signature has {count} arguments, at most {max} are supported")]
    UnsupportedArity { count: usize, max: usize },

    /// A scripting value does not wrap the kind the native side expects
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A numeric value does not fit the native scalar kind
    #[error("value {value} is out of range for {kind}")]
    Range { value: String, kind: &'static str },

    /// Wrong number of arguments supplied to a callable
    #[error("wrong number of arguments: expected {expected}, found {found}")]
    Arity { expected: usize, found: usize },

    /// A scripting behaviour raised while servicing a native call
    #[error("scripting callback for `{selector}` failed: {message}")]
    CallbackFailure { selector: String, message: String },

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("class `{class}` does not respond to `{selector}`")]
    UnknownMethod { class: String, selector: String },

    /// No signature was given and none could be inferred
    #[error("no signature known for selector `{0}`")]
    UnknownSignature(String),

    #[error("symbol `{0}` not found")]
    UnknownSymbol(String),

    #[error("failed to load library: {0}")]
    Library(String),

    /// The native runtime refused an operation
    #[error("native runtime error: {0}")]
    Runtime(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl BridgeError {
    pub(crate) fn unsupported(encoding: &str, offending: &str, reason: &'static str) -> Self {
        Self::UnsupportedEncoding {
            encoding: encoding.to_string(),
            offending: offending.to_string(),
            reason,
        }
    }

    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    pub(crate) fn range(value: impl ToString, kind: &'static str) -> Self {
        Self::Range {
            value: value.to_string(),
            kind,
        }
    }

    /// Whether the error came from converting a value across the boundary
    pub fn is_marshaling(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. } | Self::Range { .. })
    }
}
