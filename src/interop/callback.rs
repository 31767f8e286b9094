//! Inbound calls - native code invoking scripting behaviour
//!
//! A trampoline is a libffi closure whose handler enters the interpreter,
//! converts the native arguments, runs the scripting behaviour and writes the
//! converted result into the native return slot. Trampolines are installed
//! for the life of the process: the runtime may hold their entry points
//! indefinitely, so neither the closure nor its context is ever freed.
//!
//! Failures inside a trampoline never unwind into native code. They are
//! reported through the runtime's error channel, counted, and the caller
//! receives the zero value of the return type.

use super::abi;
use super::cache::interface_for;
use super::interface::CallInterface;
use super::marshal::{MarshalContext, Temporary};
use crate::config::OwnershipPolicy;
use crate::error::{BridgeError, Result};
use crate::handles::ObjectHandle;
use crate::logging::{log_callback_failure, log_inbound_call, log_trampoline_installed};
use crate::runtime::{ClassRef, EntryPoint, RuntimeRef};
use crate::script::{lock, ScriptBehavior, Value};
use crate::stats;
use core::ffi::c_void;
use core::ptr;
use libffi::low;
use libffi::middle::Closure;
use parking_lot::{const_mutex, Mutex};
use smallvec::SmallVec;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Returned C strings stay valid until this many later returns on the thread
const RETURNED_STRINGS: usize = 64;

/// What the native caller passes ahead of the declared arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrampolineKind {
    /// Receiver and selector, as for any message send
    Method,
    /// Nothing; a plain C function
    Function,
}

/// A synthesized native entry point backed by scripting behaviour
#[derive(Clone)]
pub struct InboundTrampoline {
    entry: EntryPoint,
    interface: Arc<CallInterface>,
    name: String,
}

impl InboundTrampoline {
    #[inline]
    pub fn entry(&self) -> EntryPoint {
        self.entry
    }

    #[inline]
    pub fn interface(&self) -> &Arc<CallInterface> {
        &self.interface
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for InboundTrampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundTrampoline")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("signature", &self.interface.signature().to_string())
            .finish()
    }
}

struct InboundContext {
    runtime: RuntimeRef,
    interface: Arc<CallInterface>,
    behavior: Arc<dyn ScriptBehavior>,
    kind: TrampolineKind,
    name: String,
    policy: Arc<OwnershipPolicy>,
}

/// Keeps a closure's executable memory mapped
struct Installed(Closure<'static>);

// Never called through after installation; only kept alive
unsafe impl Send for Installed {}

static INSTALLED: Mutex<Vec<Installed>> = const_mutex(Vec::new());

thread_local! {
    static RETURNED: RefCell<VecDeque<Temporary>> = RefCell::new(VecDeque::new());
}

/// Build a trampoline for `interface` that runs `behavior`
pub fn synthesize(
    runtime: RuntimeRef,
    interface: Arc<CallInterface>,
    behavior: Arc<dyn ScriptBehavior>,
    kind: TrampolineKind,
    name: &str,
    policy: Arc<OwnershipPolicy>,
) -> Result<InboundTrampoline> {
    if kind == TrampolineKind::Method && !interface.signature().is_method_shaped() {
        return Err(BridgeError::mismatch(
            "receiver and selector leading the signature",
            interface.signature().to_string(),
        ));
    }

    let context: &'static InboundContext = Box::leak(Box::new(InboundContext {
        runtime,
        interface: interface.clone(),
        behavior,
        kind,
        name: name.to_string(),
        policy,
    }));

    let closure = Closure::new(interface.cif().clone(), inbound_entry, context);
    let code = *closure.code_ptr() as *const () as *const c_void;
    let entry = EntryPoint::from_ptr(code)
        .ok_or_else(|| BridgeError::Runtime(format!("no closure memory for {}", name)))?;
    INSTALLED.lock().push(Installed(closure));

    Ok(InboundTrampoline {
        entry,
        interface,
        name: name.to_string(),
    })
}

/// Register `behavior` as the implementation of `selector` on `class`.
///
/// Fails when `class` already defines `selector` itself; an inherited
/// definition is overridden.
pub fn install_override(
    runtime: &RuntimeRef,
    class: ClassRef,
    selector: &str,
    signature: &str,
    behavior: Arc<dyn ScriptBehavior>,
    policy: Arc<OwnershipPolicy>,
) -> Result<InboundTrampoline> {
    let _span = crate::traced_fn!("install_override");

    let interface = interface_for(signature)?;
    let trampoline = synthesize(
        runtime.clone(),
        interface,
        behavior,
        TrampolineKind::Method,
        selector,
        policy,
    )?;

    let types = trampoline.interface.signature().to_string();
    let sel = runtime.register_selector(selector);
    // SAFETY: the trampoline implements `types` and is never uninstalled
    let added = unsafe { runtime.add_method(class, sel, trampoline.entry, &types) };
    if !added {
        return Err(BridgeError::Runtime(format!(
            "{} already defines {}",
            runtime.class_name(class),
            selector
        )));
    }

    log_trampoline_installed(&runtime.class_name(class), selector, &types);
    Ok(trampoline)
}

unsafe extern "C" fn inbound_entry(
    _cif: &low::ffi_cif,
    result: &mut c_void,
    args: *const *const c_void,
    context: &InboundContext,
) {
    stats::record_inbound();
    let result = result as *mut c_void as *mut u8;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| dispatch(context, result, args)));
    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(payload) => BridgeError::CallbackFailure {
            selector: context.name.clone(),
            message: panic_message(payload.as_ref()),
        },
    };

    stats::record_callback_failure();
    log_callback_failure(&context.name, &failure.to_string());
    context.runtime.report_callback_failure(&failure);
    if !context.interface.return_type().is_void() {
        ptr::write_bytes(result, 0, context.interface.return_slot_size());
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", text)
    } else if let Some(text) = payload.downcast_ref::<String>() {
        format!("panicked: {}", text)
    } else {
        "panicked".into()
    }
}

unsafe fn dispatch(context: &InboundContext, result: *mut u8, args: *const *const c_void) -> Result<()> {
    let _interpreter = lock::enter();

    let params = context.interface.arguments();
    let ret_desc = context.interface.return_type();
    let mut marshal = MarshalContext::new(&context.runtime, &context.policy);

    let (receiver, first) = match context.kind {
        TrampolineKind::Method => {
            let receiver_ptr = ptr::read(*args as *const *mut c_void);
            (ObjectHandle::wrap(&context.runtime, receiver_ptr, None, false), 2)
        }
        TrampolineKind::Function => (Value::Nil, 0),
    };

    log_inbound_call(&context.name, params.len() - first);

    let mut values: SmallVec<[Value; 8]> = SmallVec::with_capacity(params.len() - first);
    for (index, desc) in params.iter().enumerate().skip(first) {
        let slot = *args.add(index) as *const u8;
        let value = marshal.to_scripting_with(slot, desc, None, false).map_err(|err| {
            stats::record_marshaling_error();
            err
        })?;
        values.push(value);
    }

    let returned = context
        .behavior
        .invoke(&receiver, &values)
        .map_err(|err| BridgeError::CallbackFailure {
            selector: context.name.clone(),
            message: err.message,
        })?;

    if ret_desc.is_void() {
        return Ok(());
    }

    ptr::write_bytes(result, 0, context.interface.return_slot_size());
    marshal.to_native(&returned, ret_desc, result).map_err(|err| {
        stats::record_marshaling_error();
        err
    })?;

    let mut temporaries = marshal.into_temporaries();
    if *ret_desc == crate::encoding::TypeDescriptor::ObjectPtr {
        // The native caller gets an autoreleased reference that outlives
        // every scripting wrapper of the object
        if let Some(object) = super::marshal::object_at(result) {
            context.runtime.retain(object);
            context.runtime.autorelease(object);
        }
        // The pool now keeps a bridged string alive; its call-scoped
        // reference is released here rather than parked in the ring
        temporaries.retain(|temporary| !matches!(temporary, Temporary::Object(_)));
    }
    abi::widen_return(ret_desc, result);

    keep_returned(temporaries);
    drop(returned);
    Ok(())
}

fn keep_returned(temporaries: Vec<Temporary>) {
    if temporaries.is_empty() {
        return;
    }
    RETURNED.with(|ring| {
        let mut ring = ring.borrow_mut();
        for temporary in temporaries {
            if ring.len() == RETURNED_STRINGS {
                ring.pop_front();
            }
            ring.push_back(temporary);
        }
    });
}
