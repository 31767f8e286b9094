//! Interoperability - calls across the native boundary in both directions
//!
//! Architecture:
//! - `types.rs` - type descriptors → libffi types
//! - `abi.rs` - calling convention classification and return-word handling
//! - `interface.rs` - prepared call interfaces, one per signature
//! - `cache.rs` - call-site cache with single-publication semantics
//! - `marshal.rs` - scripting values ↔ native buffers
//! - `call.rs` - outbound calls (scripting → native)
//! - `callback.rs` - inbound trampolines (native → scripting)
//! - `library.rs` - dynamic symbol resolution

mod abi;
mod cache;
mod call;
mod callback;
mod interface;
mod library;
mod marshal;
mod types;

pub use abi::{classify_return, CallingConvention, PassingMode, RegisterAllocator};
pub use cache::{interface_for, CallSiteCache, CallSiteKey};
pub use call::{make_callable, CallKind, CallOptions, OutboundCallable};
pub use callback::{install_override, synthesize, InboundTrampoline, TrampolineKind};
pub use interface::{CallInterface, MAX_ARGUMENTS};
pub use library::Library;
pub use marshal::{MarshalContext, NativeBuffer};
pub use types::{ffi_type, scalar_type, FfiType, MAX_BY_VALUE_SIZE};

pub(crate) use marshal::object_at;

pub use crate::stats::{snapshot as stats, InteropStats};

/// Prepare process-wide interop state
pub(crate) fn init() {
    cache::init();
}
