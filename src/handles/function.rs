//! Function wrappers - plain C functions callable from scripting code

use crate::config::OwnershipPolicy;
use crate::encoding::{Signature, TypeDescriptor};
use crate::error::Result;
use crate::interop::{
    interface_for, make_callable, synthesize, CallKind, CallOptions, InboundTrampoline, Library,
    OutboundCallable, TrampolineKind,
};
use crate::runtime::{EntryPoint, RuntimeRef};
use crate::script::{ScriptBehavior, Value};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;

/// A native function with a known signature
#[derive(Clone)]
pub struct FunctionHandle(Arc<FunctionInner>);

struct FunctionInner {
    callable: OutboundCallable,
    handler: OnceCell<InboundTrampoline>,
}

fn encoding_of(ret: &str, args: &[&str]) -> String {
    let mut encoding = String::from(ret);
    for arg in args {
        encoding.push_str(arg);
    }
    encoding
}

impl FunctionHandle {
    /// Wrap the function at `entry`, described by one type encoding for the
    /// result and one per argument.
    ///
    /// # Safety
    /// `entry` must implement the described C signature.
    pub unsafe fn new(
        runtime: RuntimeRef,
        name: &str,
        entry: EntryPoint,
        ret: &str,
        args: &[&str],
        options: CallOptions,
    ) -> Result<Self> {
        let interface = interface_for(&encoding_of(ret, args))?;
        let callable = make_callable(runtime, entry, interface, CallKind::FreeFunction, name, options)?;
        Ok(Self(Arc::new(FunctionInner {
            callable,
            handler: OnceCell::new(),
        })))
    }

    /// Resolve `name` among the symbols loaded into the process and wrap it.
    /// With no argument list the function takes no arguments.
    ///
    /// # Safety
    /// The symbol must implement the described C signature.
    pub unsafe fn wrap(
        runtime: RuntimeRef,
        name: &str,
        ret: &str,
        args: Option<&[&str]>,
        options: CallOptions,
    ) -> Result<Self> {
        let entry = Library::process()?.symbol(name)?;
        Self::new(runtime, name, entry, ret, args.unwrap_or_default(), options)
    }

    pub fn name(&self) -> &str {
        self.0.callable.name()
    }

    pub fn entry(&self) -> EntryPoint {
        self.0.callable.entry()
    }

    pub fn signature(&self) -> &Signature {
        self.0.callable.interface().signature()
    }

    pub fn arity(&self) -> usize {
        self.0.callable.arity()
    }

    /// Call the native function
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        self.0.callable.invoke(&Value::Nil, args)
    }

    /// Synthesize a native entry point with this function's signature that
    /// runs `behavior`. The first installation wins; later calls return the
    /// existing entry point.
    pub fn install_override(&self, behavior: Arc<dyn ScriptBehavior>) -> Result<EntryPoint> {
        let callable = &self.0.callable;
        let trampoline = self.0.handler.get_or_try_init(|| {
            let policy: Arc<OwnershipPolicy> = callable.options().policy.clone();
            synthesize(
                callable.runtime().clone(),
                callable.interface().clone(),
                behavior,
                TrampolineKind::Function,
                callable.name(),
                policy,
            )
        })?;
        Ok(trampoline.entry())
    }

    /// Entry point installed by [`install_override`](Self::install_override)
    pub fn handler(&self) -> Option<EntryPoint> {
        self.0.handler.get().map(InboundTrampoline::entry)
    }

    /// Descriptor of the value [`call`](Self::call) returns
    pub fn return_type(&self) -> &TypeDescriptor {
        self.0.callable.interface().return_type()
    }
}

impl PartialEq for FunctionHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.entry() == other.entry()
    }
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionHandle({} {})", self.name(), self.signature())
    }
}
