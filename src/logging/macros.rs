//! Tracing re-exports and span helpers used across the crate

pub use tracing::{debug, error, info, trace, warn, Level};

/// Enter a debug span for the rest of the enclosing scope
///
/// ```ignore
/// let _span = traced_fn!("install_override");
/// ```
#[macro_export]
macro_rules! traced_fn {
    ($name:expr) => {
        tracing::debug_span!($name).entered()
    };
}

/// Time a block and log its duration at debug level
#[macro_export]
macro_rules! time_block {
    ($name:expr, $block:block) => {{
        let _span = tracing::debug_span!($name).entered();
        let start = std::time::Instant::now();
        let result = $block;
        tracing::debug!(
            operation = $name,
            duration_us = start.elapsed().as_micros() as u64,
            "operation complete"
        );
        result
    }};
}
