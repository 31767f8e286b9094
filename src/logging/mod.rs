//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels per module
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console output, optional JSON and file output

use crate::config::LoggingConfig;
use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

mod macros;
pub use macros::*;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // OBJBRIDGE_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("OBJBRIDGE_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        if let Ok(path) = std::env::var("OBJBRIDGE_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("OBJBRIDGE_LOG_JSON").is_ok();
        config.show_spans = std::env::var("OBJBRIDGE_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("OBJBRIDGE_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("objbridge.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(section: &LoggingConfig) -> Self {
        Self {
            level: parse_level(&section.level),
            file_output: section.file.is_some(),
            log_path: section.file.as_ref().map(|p| p.display().to_string()),
            json_format: section.json,
            show_spans: section.spans,
            ..Self::default()
        }
    }
}

/// Initialize logging with configuration taken from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration; later calls are no-ops
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("objbridge={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let writer = match config.log_path.as_deref().filter(|_| config.file_output) {
            Some(path) => file_writer(Path::new(path)),
            None => BoxMakeWriter::new(io::stdout),
        };

        let (json_layer, text_layer) = if config.json_format {
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_target(true);
            (Some(layer), None)
        } else {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_span_events(span_events)
                .with_target(true)
                .with_thread_ids(cfg!(debug_assertions))
                .with_line_number(cfg!(debug_assertions));
            (None, Some(layer))
        };

        // Another subscriber may already be installed by the embedding process
        let _ = tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .with(text_layer)
            .try_init();
    });
}

fn file_writer(path: &Path) -> BoxMakeWriter {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "objbridge.log".into());
    BoxMakeWriter::new(tracing_appender::rolling::never(directory, file_name))
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log bridge initialization
pub fn log_bridge_init(version: &str) {
    info!(event = "bridge_init", version = version, "objbridge initializing");
}

/// Log a script → native call
#[inline]
pub fn log_outbound_call(name: &str, arg_count: usize) {
    trace!(
        event = "outbound_call",
        callable = name,
        args = arg_count,
        "native callable invoked"
    );
}

/// Log a script → native return
#[inline]
pub fn log_outbound_return(name: &str) {
    trace!(event = "outbound_return", callable = name, "native callable returned");
}

/// Log a native → script call
#[inline]
pub fn log_inbound_call(selector: &str, arg_count: usize) {
    trace!(
        event = "inbound_call",
        selector = selector,
        args = arg_count,
        "scripting behavior invoked from native code"
    );
}

/// Log a failed scripting callback
pub fn log_callback_failure(selector: &str, error: &str) {
    error!(
        event = "callback_failure",
        selector = selector,
        error = error,
        "scripting callback failed, returning zero value"
    );
}

/// Log a marshaling failure
pub fn log_marshal_error(context: &str, error: &str) {
    debug!(
        event = "marshal_error",
        context = context,
        error = error,
        "value conversion failed"
    );
}

/// Log a call interface construction
pub fn log_interface_built(signature: &str, arity: usize) {
    debug!(
        event = "interface_built",
        signature = signature,
        arity = arity,
        "call interface prepared"
    );
}

/// Log installation of an inbound trampoline
pub fn log_trampoline_installed(class: &str, selector: &str, signature: &str) {
    debug!(
        event = "trampoline_installed",
        class = class,
        selector = selector,
        signature = signature,
        "scripting method installed"
    );
}

/// Log reclamation of an owned object wrapper
#[inline]
pub fn log_object_released(address: usize) {
    trace!(event = "object_released", address = address, "owned native object released");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &str) -> PerformanceGuard {
        PerformanceGuard {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: String,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = %self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.file_output);

        let perf_config = LogConfig::performance();
        assert_eq!(perf_config.level, Level::ERROR);

        let debug_config = LogConfig::debug();
        assert_eq!(debug_config.level, Level::TRACE);
    }

    #[test]
    fn test_from_config_section() {
        let section = LoggingConfig {
            level: "warn".into(),
            json: true,
            file: Some(PathBuf::from("logs/bridge.log")),
            spans: false,
        };
        let config = LogConfig::from(&section);
        assert_eq!(config.level, Level::WARN);
        assert!(config.json_format);
        assert!(config.file_output);
        assert_eq!(config.log_path.as_deref(), Some("logs/bridge.log"));
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init(); // Should not panic
        assert!(is_initialized());
    }

    #[test]
    fn test_logging_functions() {
        log_bridge_init("0.1.0");
        log_outbound_call("add:", 1);
        log_outbound_return("add:");
        log_inbound_call("description", 0);
        log_callback_failure("description", "boom");
        log_marshal_error("argument 1", "type mismatch");
        log_interface_built("i@:i", 3);
        log_trampoline_installed("Greeter", "description", "@@:");
        log_object_released(0x1000);
        let _guard = perf::track("noop");
    }
}
