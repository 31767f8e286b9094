//! Native runtime contract - introspection and registration services
//!
//! The bridge consumes the message-dispatch runtime through [`NativeRuntime`]:
//! class/method/ivar introspection, method registration, selector interning,
//! reference counting and string bridging. Two implementations ship:
//! - `local.rs` - portable in-process runtime (tests, non-Apple hosts)
//! - `apple.rs` - Apple `libobjc`, behind the `objc` feature

pub mod local;

#[cfg(all(feature = "objc", target_vendor = "apple"))]
pub mod apple;

use crate::error::{BridgeError, Result};
use core::ffi::c_void;
use core::ptr::NonNull;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Shared handle to the native runtime
pub type RuntimeRef = Arc<dyn NativeRuntime>;

macro_rules! opaque_ref {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(transparent)]
        pub struct $name(NonNull<c_void>);

        // Native runtime records are process-lifetime and internally synchronised
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}

        impl $name {
            /// Wrap a raw pointer; `None` for null
            #[inline]
            pub fn from_ptr(ptr: *const c_void) -> Option<Self> {
                NonNull::new(ptr as *mut c_void).map(Self)
            }

            #[inline]
            pub fn as_ptr(self) -> *mut c_void {
                self.0.as_ptr()
            }

            #[inline]
            pub fn addr(self) -> usize {
                self.0.as_ptr() as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:p})"), self.0.as_ptr())
            }
        }
    };
}

opaque_ref!(
    /// A native object (`id`)
    ObjectRef
);
opaque_ref!(
    /// A native class; classes are also valid message receivers
    ClassRef
);
opaque_ref!(
    /// A method record owned by the runtime
    MethodRef
);
opaque_ref!(
    /// An instance-variable record owned by the runtime
    IvarRef
);
opaque_ref!(
    /// An interned selector
    Selector
);
opaque_ref!(
    /// Address of a callable native function
    EntryPoint
);

impl ClassRef {
    /// The class viewed as a message receiver
    #[inline]
    pub fn as_object(self) -> ObjectRef {
        ObjectRef(self.0)
    }
}

impl EntryPoint {
    /// Entry point for a native function item or pointer cast to `*const ()`
    #[inline]
    pub fn from_fn(f: *const ()) -> Option<Self> {
        Self::from_ptr(f as *const c_void)
    }

    #[inline]
    pub(crate) fn code_ptr(self) -> libffi::middle::CodePtr {
        libffi::middle::CodePtr::from_ptr(self.as_ptr())
    }
}

/// Services the bridge requires from a message-dispatch runtime.
///
/// # Safety
/// Implementors guarantee that every method implementation reported by
/// [`method_implementation`](Self::method_implementation) follows the C ABI
/// described by its [`method_type_encoding`](Self::method_type_encoding), that
/// ivar offsets lie inside instances of their class, and that every reference
/// they hand out stays valid while the bridge holds it.
pub unsafe trait NativeRuntime: Send + Sync {
    /// Short backend name for diagnostics
    fn name(&self) -> &str;

    fn classes(&self) -> Vec<ClassRef>;

    fn class_named(&self, name: &str) -> Option<ClassRef>;

    fn class_name(&self, class: ClassRef) -> String;

    fn superclass(&self, class: ClassRef) -> Option<ClassRef>;

    /// The metaclass holding `class`'s class methods
    fn metaclass(&self, class: ClassRef) -> ClassRef;

    /// Dynamic class of a receiver (a metaclass when the receiver is a class)
    fn object_class(&self, object: ObjectRef) -> ClassRef;

    /// Methods defined directly on `class`
    fn methods(&self, class: ClassRef) -> Vec<MethodRef>;

    /// Resolve `selector` against `class` and its superclasses
    fn lookup_method(&self, class: ClassRef, selector: Selector) -> Option<MethodRef>;

    fn method_selector(&self, method: MethodRef) -> Selector;

    fn method_type_encoding(&self, method: MethodRef) -> String;

    fn method_implementation(&self, method: MethodRef) -> EntryPoint;

    /// Instance variables defined directly on `class`
    fn ivars(&self, class: ClassRef) -> Vec<IvarRef>;

    fn ivar_name(&self, ivar: IvarRef) -> String;

    fn ivar_type_encoding(&self, ivar: IvarRef) -> String;

    fn ivar_offset(&self, ivar: IvarRef) -> isize;

    /// Register a method on `class`. Returns false when `class` already
    /// defines `selector` itself.
    ///
    /// # Safety
    /// `imp` must follow the C ABI described by `types` for as long as the
    /// class exists.
    unsafe fn add_method(
        &self,
        class: ClassRef,
        selector: Selector,
        imp: EntryPoint,
        types: &str,
    ) -> bool;

    /// Create and register a subclass
    fn allocate_class(&self, superclass: ClassRef, name: &str) -> Result<ClassRef>;

    fn register_selector(&self, name: &str) -> Selector;

    fn selector_name(&self, selector: Selector) -> String;

    fn retain(&self, object: ObjectRef);

    fn release(&self, object: ObjectRef);

    /// Defer one release to the enclosing autorelease pool
    fn autorelease(&self, object: ObjectRef);

    /// Attach `value` to `object` under `key`, retaining it and releasing the
    /// value it replaces. `None` removes the association. Associations are
    /// released when `object` is deallocated.
    fn set_associated(&self, object: ObjectRef, key: Selector, value: Option<ObjectRef>);

    /// Value attached to `object` under `key`
    fn associated(&self, object: ObjectRef, key: Selector) -> Option<ObjectRef>;

    /// New native string object, returned with one reference owned by the caller
    fn string_from_str(&self, text: &str) -> Result<ObjectRef>;

    /// Contents of a native string object; `None` for other objects
    fn string_to_string(&self, object: ObjectRef) -> Option<String>;

    /// Error channel for failures that cannot be returned to a native caller
    fn report_callback_failure(&self, failure: &BridgeError) {
        error!(runtime = self.name(), error = %failure, "scripting callback failed");
    }

    /// Resolve an instance method, failing with `UnknownMethod`
    fn require_method(&self, class: ClassRef, selector: &str) -> Result<MethodRef> {
        let sel = self.register_selector(selector);
        self.lookup_method(class, sel)
            .ok_or_else(|| BridgeError::UnknownMethod {
                class: self.class_name(class),
                selector: selector.to_string(),
            })
    }

    /// Whether `class` is `ancestor` or inherits from it
    fn is_subclass(&self, class: ClassRef, ancestor: ClassRef) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.superclass(c);
        }
        false
    }
}
