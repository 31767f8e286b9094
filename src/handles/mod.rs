//! Handle wrappers - scripting-visible views of native entities
//!
//! Each wrapper kind has exactly one constructor. Class, method and variable
//! handles are plain views of process-lifetime runtime records; object and
//! function handles carry ownership and call state.

mod function;
mod object;


pub use function::FunctionHandle;
pub use object::ObjectHandle;

use crate::config::OwnershipPolicy;
use crate::encoding::{parse, parse_signature, Signature, TypeDescriptor};
use crate::error::{BridgeError, Result};
use crate::interop::{CallKind, MarshalContext, NativeBuffer};
use crate::runtime::{ClassRef, EntryPoint, IvarRef, MethodRef, RuntimeRef, Selector};
use crate::script::Value;
use core::ptr;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A native class
#[derive(Clone)]
pub struct ClassHandle {
    runtime: RuntimeRef,
    class: ClassRef,
}

impl ClassHandle {
    pub fn new(runtime: RuntimeRef, class: ClassRef) -> Self {
        Self { runtime, class }
    }

    #[inline]
    pub fn class(&self) -> ClassRef {
        self.class
    }

    #[inline]
    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    pub fn name(&self) -> String {
        self.runtime.class_name(self.class)
    }

    pub fn superclass(&self) -> Option<ClassHandle> {
        self.runtime
            .superclass(self.class)
            .map(|c| Self::new(self.runtime.clone(), c))
    }

    /// This class followed by each of its ancestors
    pub fn hierarchy(&self) -> Vec<ClassHandle> {
        let mut chain = vec![self.clone()];
        while let Some(parent) = chain.last().and_then(ClassHandle::superclass) {
            chain.push(parent);
        }
        chain
    }

    pub fn is_subclass_of(&self, other: &ClassHandle) -> bool {
        self.runtime.is_subclass(self.class, other.class)
    }

    /// Instance methods defined directly on this class
    pub fn instance_methods(&self) -> Vec<MethodHandle> {
        self.methods_of(self.class, CallKind::InstanceMethod)
    }

    /// Class methods defined directly on this class
    pub fn class_methods(&self) -> Vec<MethodHandle> {
        self.methods_of(self.runtime.metaclass(self.class), CallKind::ClassMethod)
    }

    fn methods_of(&self, holder: ClassRef, kind: CallKind) -> Vec<MethodHandle> {
        self.runtime
            .methods(holder)
            .into_iter()
            .map(|m| MethodHandle::new(self.runtime.clone(), m, kind))
            .collect()
    }

    /// Resolve an instance method, searching superclasses
    pub fn instance_method(&self, selector: &str) -> Option<MethodHandle> {
        let sel = self.runtime.register_selector(selector);
        self.runtime
            .lookup_method(self.class, sel)
            .map(|m| MethodHandle::new(self.runtime.clone(), m, CallKind::InstanceMethod))
    }

    /// Resolve a class method, searching superclasses
    pub fn class_method(&self, selector: &str) -> Option<MethodHandle> {
        let sel = self.runtime.register_selector(selector);
        self.runtime
            .lookup_method(self.runtime.metaclass(self.class), sel)
            .map(|m| MethodHandle::new(self.runtime.clone(), m, CallKind::ClassMethod))
    }

    /// Whether the class itself (not an ancestor) defines `selector`
    pub fn defines(&self, selector: &str, kind: CallKind) -> bool {
        let holder = match kind {
            CallKind::ClassMethod => self.runtime.metaclass(self.class),
            _ => self.class,
        };
        let sel = self.runtime.register_selector(selector);
        self.runtime
            .methods(holder)
            .into_iter()
            .any(|m| self.runtime.method_selector(m) == sel)
    }

    /// Instance variables defined directly on this class
    pub fn ivars(&self) -> Vec<VariableHandle> {
        self.runtime
            .ivars(self.class)
            .into_iter()
            .map(|ivar| VariableHandle::new(self.runtime.clone(), ivar))
            .collect()
    }

    /// Find an instance variable by name on this class or an ancestor
    pub fn ivar(&self, name: &str) -> Option<VariableHandle> {
        self.hierarchy()
            .into_iter()
            .flat_map(|class| class.ivars())
            .find(|ivar| ivar.name() == name)
    }
}

impl PartialEq for ClassHandle {
    fn eq(&self, other: &Self) -> bool {
        self.class == other.class
    }
}

impl Eq for ClassHandle {}

impl Hash for ClassHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.class.hash(state);
    }
}

impl fmt::Debug for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClassHandle({})", self.name())
    }
}

/// A native method record
#[derive(Clone)]
pub struct MethodHandle {
    runtime: RuntimeRef,
    method: MethodRef,
    kind: CallKind,
}

impl MethodHandle {
    pub fn new(runtime: RuntimeRef, method: MethodRef, kind: CallKind) -> Self {
        Self {
            runtime,
            method,
            kind,
        }
    }

    #[inline]
    pub fn method(&self) -> MethodRef {
        self.method
    }

    #[inline]
    pub fn kind(&self) -> CallKind {
        self.kind
    }

    #[inline]
    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    pub fn selector(&self) -> Selector {
        self.runtime.method_selector(self.method)
    }

    pub fn name(&self) -> String {
        self.runtime.selector_name(self.selector())
    }

    /// Raw type encoding as reported by the runtime, offsets included
    pub fn type_encoding(&self) -> String {
        self.runtime.method_type_encoding(self.method)
    }

    pub fn signature(&self) -> Result<Signature> {
        parse_signature(&self.type_encoding())
    }

    /// Declared arguments including the receiver and selector
    pub fn argument_count(&self) -> Result<usize> {
        self.signature().map(|sig| sig.arity())
    }

    pub fn implementation(&self) -> EntryPoint {
        self.runtime.method_implementation(self.method)
    }
}

impl PartialEq for MethodHandle {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
    }
}

impl fmt::Debug for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.kind == CallKind::ClassMethod { '+' } else { '-' };
        write!(f, "MethodHandle({}{} {})", prefix, self.name(), self.type_encoding())
    }
}

/// A native instance-variable record
#[derive(Clone)]
pub struct VariableHandle {
    runtime: RuntimeRef,
    ivar: IvarRef,
}

impl VariableHandle {
    pub fn new(runtime: RuntimeRef, ivar: IvarRef) -> Self {
        Self { runtime, ivar }
    }

    #[inline]
    pub fn ivar(&self) -> IvarRef {
        self.ivar
    }

    pub fn name(&self) -> String {
        self.runtime.ivar_name(self.ivar)
    }

    pub fn type_encoding(&self) -> String {
        self.runtime.ivar_type_encoding(self.ivar)
    }

    pub fn offset(&self) -> isize {
        self.runtime.ivar_offset(self.ivar)
    }

    pub fn descriptor(&self) -> Result<TypeDescriptor> {
        parse(&self.type_encoding())
    }

    /// Read this variable from `object`. Objects come back borrowed.
    pub fn get(&self, object: &ObjectHandle) -> Result<Value> {
        let desc = self.descriptor()?;
        let policy = OwnershipPolicy::default();
        let ctx = MarshalContext::new(&self.runtime, &policy);
        // SAFETY: the runtime guarantees the offset lies inside the instance
        unsafe {
            let slot = (object.as_ptr() as *const u8).offset(self.offset());
            ctx.to_scripting_with(slot, &desc, None, false)
        }
    }

    /// Store `value` into this variable of `object`.
    ///
    /// Object variables are strong: the new value is retained and the old one
    /// released. Values whose conversion needs temporary storage (C strings,
    /// string arrays, strings bridged into struct fields) are refused because
    /// the variable would outlive it. The variable is untouched on failure.
    pub fn set(&self, object: &ObjectHandle, value: &Value) -> Result<()> {
        let desc = self.descriptor()?;
        let policy = OwnershipPolicy::default();
        let mut ctx = MarshalContext::new(&self.runtime, &policy);
        let mut staged = NativeBuffer::for_type(&desc);
        // SAFETY: staged is sized and aligned for desc
        unsafe { ctx.to_native(value, &desc, staged.as_mut_ptr())? };

        let strong = desc == TypeDescriptor::ObjectPtr;
        if !strong && ctx.has_temporaries() {
            return Err(BridgeError::mismatch(
                format!("a value `{}` can hold after the call", desc),
                value.type_name(),
            ));
        }

        // SAFETY: the runtime guarantees the offset lies inside the instance
        unsafe {
            let slot = (object.as_ptr() as *mut u8).offset(self.offset());
            let previous = if strong { crate::interop::object_at(slot) } else { None };
            if strong {
                if let Some(new) = crate::interop::object_at(staged.as_ptr()) {
                    self.runtime.retain(new);
                }
            }
            ptr::copy_nonoverlapping(staged.as_ptr(), slot, desc.size());
            if let Some(old) = previous {
                self.runtime.release(old);
            }
        }
        Ok(())
    }
}

impl PartialEq for VariableHandle {
    fn eq(&self, other: &Self) -> bool {
        self.ivar == other.ivar
    }
}

impl fmt::Debug for VariableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VariableHandle({} {} @{})",
            self.name(),
            self.type_encoding(),
            self.offset()
        )
    }
}
