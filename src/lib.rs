//! objbridge - bidirectional call bridge between a scripting runtime and an
//! Objective-C style message-dispatch runtime
//!
//! Bindings are resolved at call time from native type-encoding strings:
//! encodings are parsed into descriptors, descriptors into prepared call
//! interfaces, and interfaces drive both outbound calls (scripting → native)
//! and synthesized inbound trampolines (native → scripting).

pub mod bridge;
pub mod config;
pub mod encoding;
pub mod error;
pub mod ffi;
pub mod handles;
pub mod interop;
pub mod logging;
pub mod runtime;
pub mod script;
pub mod stats;

pub use bridge::Bridge;
pub use config::{BridgeConfig, MethodFamily, OwnershipPolicy};
pub use encoding::{parse, parse_signature, Signature, TypeDescriptor};
pub use error::{BridgeError, Result};
pub use handles::{ClassHandle, FunctionHandle, MethodHandle, ObjectHandle, VariableHandle};
pub use interop::{CallInterface, CallKind, CallOptions, OutboundCallable};
pub use runtime::local::LocalRuntime;
pub use runtime::{NativeRuntime, RuntimeRef};
pub use script::{ScriptBehavior, ScriptError, Value};

/// Initialise logging from the environment and process-wide interop state
pub fn init() {
    logging::init();
    interop::init();
    logging::log_bridge_init(env!("CARGO_PKG_VERSION"));
}

/// Initialise with logging taken from `config`
pub fn init_with_config(config: &BridgeConfig) {
    logging::init_with_config(logging::LogConfig::from(&config.logging));
    interop::init();
    logging::log_bridge_init(env!("CARGO_PKG_VERSION"));
}
