//! C entry points
//!
//! Embeddings written in C initialise the bridge and read the call counters
//! through these functions.

use crate::logging::debug;
use crate::stats;

/// Initialise logging and process-wide interop state. Safe to call repeatedly.
#[no_mangle]
pub extern "C" fn objbridge_init() {
    crate::init();
    debug!("C entry point initialised the bridge");
}

/// Calls native code has made into scripting code since process start
#[no_mangle]
pub extern "C" fn objbridge_native_to_script_calls() -> u64 {
    stats::native_to_script_calls()
}

/// Calls scripting code has made into native code since process start
#[no_mangle]
pub extern "C" fn objbridge_script_to_native_calls() -> u64 {
    stats::script_to_native_calls()
}
