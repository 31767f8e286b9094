//! Outbound calls - scripting code invoking native code
//!
//! An [`OutboundCallable`] binds a native entry point to a call interface and
//! a call kind. Invoking it checks arity, marshals the receiver, selector and
//! arguments, performs the foreign call and marshals the result back.

use super::interface::CallInterface;
use super::marshal::{MarshalContext, NativeBuffer};
use crate::config::{MethodFamily, OwnershipPolicy};
use crate::encoding::TypeDescriptor;
use crate::error::{BridgeError, Result};
use crate::logging::{log_marshal_error, log_outbound_call, log_outbound_return, warn};
use crate::runtime::{EntryPoint, RuntimeRef, Selector};
use crate::script::Value;
use crate::stats;
use core::ffi::c_void;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Shape of the native callee
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    FreeFunction,
    InstanceMethod,
    ClassMethod,
}

impl CallKind {
    /// Leading interface arguments supplied by the bridge (receiver, selector)
    #[inline]
    pub const fn implicit_args(self) -> usize {
        match self {
            Self::FreeFunction => 0,
            Self::InstanceMethod | Self::ClassMethod => 2,
        }
    }

    #[inline]
    pub const fn is_method(self) -> bool {
        !matches!(self, Self::FreeFunction)
    }
}

/// Settings shared by the callables a bridge creates
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub policy: Arc<OwnershipPolicy>,
    pub track_calls: bool,
}

/// A native entry point callable from scripting code
pub struct OutboundCallable {
    name: String,
    entry: EntryPoint,
    interface: Arc<CallInterface>,
    kind: CallKind,
    selector: Option<Selector>,
    family: MethodFamily,
    runtime: RuntimeRef,
    options: CallOptions,
}

/// Bind `entry` to `interface`.
///
/// For method kinds `name` is the selector and the interface must begin with a
/// receiver and a selector argument.
///
/// # Safety
/// `entry` must implement the C signature described by `interface` for as
/// long as the callable exists.
pub unsafe fn make_callable(
    runtime: RuntimeRef,
    entry: EntryPoint,
    interface: Arc<CallInterface>,
    kind: CallKind,
    name: &str,
    options: CallOptions,
) -> Result<OutboundCallable> {
    let (selector, family) = if kind.is_method() {
        if !interface.signature().is_method_shaped() {
            return Err(BridgeError::mismatch(
                "receiver and selector leading the signature",
                interface.signature().to_string(),
            ));
        }
        (
            Some(runtime.register_selector(name)),
            options.policy.family_of(name),
        )
    } else {
        (None, MethodFamily::Borrowed)
    };

    Ok(OutboundCallable {
        name: name.to_string(),
        entry,
        interface,
        kind,
        selector,
        family,
        runtime,
        options,
    })
}

impl OutboundCallable {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    #[inline]
    pub fn interface(&self) -> &Arc<CallInterface> {
        &self.interface
    }

    #[inline]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    #[inline]
    pub fn selector(&self) -> Option<Selector> {
        self.selector
    }

    #[inline]
    pub(crate) fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    #[inline]
    pub(crate) fn options(&self) -> &CallOptions {
        &self.options
    }

    /// Arguments the scripting caller supplies
    #[inline]
    pub fn arity(&self) -> usize {
        self.interface.arity() - self.kind.implicit_args()
    }

    /// Call with `receiver` (ignored for free functions) and `args`.
    ///
    /// Messaging a nil receiver returns the zero value of the return type
    /// without entering native code.
    pub fn invoke(&self, receiver: &Value, args: &[Value]) -> Result<Value> {
        if args.len() != self.arity() {
            return Err(BridgeError::Arity {
                expected: self.arity(),
                found: args.len(),
            });
        }

        let policy = self.options.policy.as_ref();
        let ret_desc = self.interface.return_type();
        let mut ret = NativeBuffer::with_len(self.interface.return_slot_size());

        if self.kind.is_method() && receiver.is_nil() {
            let ctx = MarshalContext::new(&self.runtime, policy);
            // SAFETY: a zeroed buffer is a valid value of every descriptor
            return unsafe { ctx.to_scripting_with(ret.as_ptr(), ret_desc, None, false) };
        }

        stats::record_outbound();
        if self.options.track_calls && self.kind.is_method() {
            stats::record_method_call(&self.name, &self.interface.signature().to_string());
        }
        log_outbound_call(&self.name, args.len());

        let params = self.interface.arguments();
        let mut buffers: SmallVec<[NativeBuffer; 8]> =
            params.iter().map(NativeBuffer::for_type).collect();
        let mut ctx = MarshalContext::new(&self.runtime, policy);

        let mut first = 0;
        if let Some(selector) = self.selector {
            self.marshal(&mut ctx, receiver, &params[0], &mut buffers[0], "receiver")?;
            // SAFETY: buffers are at least a pointer wide
            unsafe { (buffers[1].as_mut_ptr() as *mut *mut c_void).write(selector.as_ptr()) };
            first = 2;
        }
        for (i, value) in args.iter().enumerate() {
            let index = first + i;
            self.marshal(&mut ctx, value, &params[index], &mut buffers[index], "argument")?;
        }

        let mut arg_ptrs: SmallVec<[*mut c_void; 8]> = buffers
            .iter_mut()
            .map(|b| b.as_mut_ptr() as *mut c_void)
            .collect();

        // SAFETY: make_callable's contract ties entry to the interface, and each
        // argument pointer refers to a buffer holding a value of its descriptor
        unsafe {
            self.interface
                .call_raw(self.entry, ret.as_mut_ptr(), arg_ptrs.as_mut_ptr());
        }
        log_outbound_return(&self.name);

        let allow_release = match self.family {
            MethodFamily::Owned => true,
            MethodFamily::Consuming => self.transfer_receiver(receiver),
            MethodFamily::Borrowed => false,
        };

        // SAFETY: the callee wrote a value of the return descriptor
        let result = unsafe { ctx.to_scripting_with(ret.as_ptr(), ret_desc, self.selector, allow_release) };
        drop(ctx);
        result.map_err(|err| self.marshal_failed("result", err))
    }

    fn marshal(
        &self,
        ctx: &mut MarshalContext<'_>,
        value: &Value,
        desc: &TypeDescriptor,
        buffer: &mut NativeBuffer,
        role: &str,
    ) -> Result<()> {
        // SAFETY: each buffer is sized for its descriptor
        unsafe { ctx.to_native(value, desc, buffer.as_mut_ptr()) }
            .map_err(|err| self.marshal_failed(role, err))
    }

    fn marshal_failed(&self, role: &str, err: BridgeError) -> BridgeError {
        stats::record_marshaling_error();
        log_marshal_error(&format!("{} {}", self.name, role), &err.to_string());
        err
    }

    /// A consuming method takes over the receiver's reference
    fn transfer_receiver(&self, receiver: &Value) -> bool {
        match receiver.as_object() {
            Some(handle) if handle.allow_release() => {
                let moved = handle.relinquish();
                if !moved {
                    warn!(
                        selector = %self.name,
                        "receiver ownership already amended; result left borrowed"
                    );
                }
                moved
            }
            _ => false,
        }
    }
}

impl fmt::Debug for OutboundCallable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundCallable")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("kind", &self.kind)
            .field("signature", &self.interface.signature().to_string())
            .finish()
    }
}
