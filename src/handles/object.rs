//! Object wrappers and their release discipline
//!
//! An object wrapper owns at most one native reference. Whether it does is the
//! `allow_release` flag: fixed when the wrapper is created from the object's
//! provenance, and changeable exactly once afterwards. When the last clone of
//! a wrapper is dropped the reference is released if and only if the flag is
//! set at that moment.

use super::ClassHandle;
use crate::logging::{log_object_released, trace};
use crate::runtime::{ObjectRef, RuntimeRef, Selector};
use crate::script::Value;
use core::ffi::c_void;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const RELEASE: u8 = 0b01;
const AMENDED: u8 = 0b10;

/// Scripting-side wrapper for a native object
#[derive(Clone)]
pub struct ObjectHandle(Arc<ObjectWrapper>);

struct ObjectWrapper {
    runtime: RuntimeRef,
    object: ObjectRef,
    provenance: Option<Selector>,
    ownership: AtomicU8,
}

impl ObjectHandle {
    /// Wrap `object`; `allow_release` states whether the wrapper owns a reference
    pub fn new(
        runtime: RuntimeRef,
        object: ObjectRef,
        provenance: Option<Selector>,
        allow_release: bool,
    ) -> Self {
        let flags = if allow_release { RELEASE } else { 0 };
        Self(Arc::new(ObjectWrapper {
            runtime,
            object,
            provenance,
            ownership: AtomicU8::new(flags),
        }))
    }

    /// Wrap a raw pointer; null becomes nil and creates no wrapper
    pub fn wrap(
        runtime: &RuntimeRef,
        ptr: *mut c_void,
        provenance: Option<Selector>,
        allow_release: bool,
    ) -> Value {
        match ObjectRef::from_ptr(ptr) {
            Some(object) => Value::Object(Self::new(
                runtime.clone(),
                object,
                provenance,
                allow_release,
            )),
            None => Value::Nil,
        }
    }

    #[inline]
    pub fn object(&self) -> ObjectRef {
        self.0.object
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut c_void {
        self.0.object.as_ptr()
    }

    #[inline]
    pub fn runtime(&self) -> &RuntimeRef {
        &self.0.runtime
    }

    /// The selector whose call produced this object, if any
    #[inline]
    pub fn provenance(&self) -> Option<Selector> {
        self.0.provenance
    }

    pub fn provenance_name(&self) -> Option<String> {
        self.0.provenance.map(|sel| self.0.runtime.selector_name(sel))
    }

    #[inline]
    pub fn allow_release(&self) -> bool {
        self.0.ownership.load(Ordering::Acquire) & RELEASE != 0
    }

    /// Change the release decision. Only the first call takes effect; it
    /// returns false afterwards. Turning release on for a borrowed object
    /// retains it so the eventual release is balanced.
    pub fn set_allow_release(&self, allow: bool) -> bool {
        let current = self.0.ownership.load(Ordering::Acquire);
        if current & AMENDED != 0 {
            return false;
        }

        let next = AMENDED | if allow { RELEASE } else { 0 };
        if self
            .0
            .ownership
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        if allow && current & RELEASE == 0 {
            self.0.runtime.retain(self.0.object);
        }
        trace!(object = self.0.object.addr(), allow_release = allow, "object ownership amended");
        true
    }

    /// Give up an owned reference without releasing it. True if the wrapper
    /// owned one and now no longer does.
    pub(crate) fn relinquish(&self) -> bool {
        self.allow_release() && self.set_allow_release(false)
    }

    pub fn class(&self) -> ClassHandle {
        let class = self.0.runtime.object_class(self.0.object);
        ClassHandle::new(self.0.runtime.clone(), class)
    }

    /// Contents when the object is a native string
    pub fn to_native_string(&self) -> Option<String> {
        self.0.runtime.string_to_string(self.0.object)
    }
}

impl Drop for ObjectWrapper {
    fn drop(&mut self) {
        if self.ownership.load(Ordering::Acquire) & RELEASE != 0 {
            self.runtime.release(self.object);
            log_object_released(self.object.addr());
        }
    }
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.object == other.0.object
    }
}

impl Eq for ObjectHandle {}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{} {:p}{}>",
            self.class().name(),
            self.as_ptr(),
            if self.allow_release() { " owned" } else { "" }
        )
    }
}
