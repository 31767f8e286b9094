//! Binding facade
//!
//! [`Bridge`] ties a native runtime to a configuration and offers the
//! operations binding code needs: class lookup, dynamic message sends,
//! function wrapping, subclassing and installation of scripting methods.

use crate::config::BridgeConfig;
use crate::encoding::parse_signature;
use crate::error::{BridgeError, Result};
use crate::handles::{ClassHandle, FunctionHandle, MethodHandle, ObjectHandle};
use crate::interop::{
    install_override, interface_for, make_callable, CallKind, CallOptions, CallSiteCache,
    CallSiteKey, OutboundCallable,
};
use crate::logging::{debug, info, perf};
use crate::runtime::{ClassRef, RuntimeRef};
use crate::script::{ScriptBehavior, ScriptError, Value};
use core::ffi::c_void;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Bridge {
    runtime: RuntimeRef,
    config: BridgeConfig,
    options: CallOptions,
    callables: CallSiteCache<CallSiteKey, Arc<OutboundCallable>>,
}

impl Bridge {
    pub fn new(runtime: RuntimeRef, config: BridgeConfig) -> Self {
        let options = CallOptions {
            policy: Arc::new(config.ownership.clone()),
            track_calls: config.tracking.track_method_calls,
        };
        Self {
            runtime,
            config,
            options,
            callables: CallSiteCache::new(),
        }
    }

    /// Bridge configured from `.objbridge.toml` if one is found
    pub fn discover(runtime: RuntimeRef) -> Self {
        Self::new(runtime, BridgeConfig::discover())
    }

    #[inline]
    pub fn runtime(&self) -> &RuntimeRef {
        &self.runtime
    }

    #[inline]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[inline]
    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    pub fn find_class(&self, name: &str) -> Result<ClassHandle> {
        self.runtime
            .class_named(name)
            .map(|class| ClassHandle::new(self.runtime.clone(), class))
            .ok_or_else(|| BridgeError::UnknownClass(name.to_string()))
    }

    /// Every class the runtime knows, sorted by name
    pub fn classes(&self) -> Vec<ClassHandle> {
        let mut classes: Vec<ClassHandle> = self
            .runtime
            .classes()
            .into_iter()
            .map(|class| ClassHandle::new(self.runtime.clone(), class))
            .collect();
        classes.sort_by_cached_key(ClassHandle::name);
        classes
    }

    /// Wrap an object obtained outside any bridged call. Whether the wrapper
    /// owns a reference is stated by the caller, never inferred.
    pub fn wrap_object(&self, ptr: *mut c_void, allow_release: bool) -> Value {
        ObjectHandle::wrap(&self.runtime, ptr, None, allow_release)
    }

    /// Send `selector` to an object or class. Nil receivers answer nil.
    pub fn send(&self, receiver: &Value, selector: &str, args: &[Value]) -> Result<Value> {
        let (holder, kind) = match receiver {
            Value::Nil => return Ok(Value::Nil),
            Value::Object(object) => (
                self.runtime.object_class(object.object()),
                CallKind::InstanceMethod,
            ),
            Value::Class(class) => (self.runtime.metaclass(class.class()), CallKind::ClassMethod),
            other => return Err(BridgeError::mismatch("object or class", other.type_name())),
        };

        let sel = self.runtime.register_selector(selector);
        let method = self
            .runtime
            .lookup_method(holder, sel)
            .ok_or_else(|| BridgeError::UnknownMethod {
                class: self.runtime.class_name(holder),
                selector: selector.to_string(),
            })?;

        let callable = self.method_callable(&MethodHandle::new(self.runtime.clone(), method, kind))?;
        callable.invoke(receiver, args)
    }

    /// The cached outbound callable for a method
    pub fn method_callable(&self, method: &MethodHandle) -> Result<Arc<OutboundCallable>> {
        let key = CallSiteKey::Method(method.method().addr());
        self.callables.lookup_or_build(key, || {
            let _perf = perf::track("build method callable");
            let interface = interface_for(&method.type_encoding())?;
            // SAFETY: the runtime contract ties each implementation to its encoding
            let callable = unsafe {
                make_callable(
                    self.runtime.clone(),
                    method.implementation(),
                    interface,
                    method.kind(),
                    &method.name(),
                    self.options.clone(),
                )?
            };
            Ok(Arc::new(callable))
        })
    }

    /// Resolve and wrap a C function loaded into the process
    ///
    /// # Safety
    /// The symbol must implement the described C signature.
    pub unsafe fn wrap_function(
        &self,
        name: &str,
        ret: &str,
        args: Option<&[&str]>,
    ) -> Result<FunctionHandle> {
        FunctionHandle::wrap(self.runtime.clone(), name, ret, args, self.options.clone())
    }

    /// Create and register a subclass
    pub fn subclass(&self, superclass: &ClassHandle, name: &str) -> Result<ClassHandle> {
        let class = self.runtime.allocate_class(superclass.class(), name)?;
        debug!(class = name, superclass = %superclass.name(), "subclass registered");
        Ok(ClassHandle::new(self.runtime.clone(), class))
    }

    /// Implement an instance method in scripting code. Returns false when the
    /// class already defines the selector itself.
    pub fn add_instance_method(
        &self,
        class: &ClassHandle,
        selector: &str,
        signature: Option<&str>,
        behavior: Arc<dyn ScriptBehavior>,
    ) -> Result<bool> {
        self.add_method(class, selector, signature, behavior, CallKind::InstanceMethod)
    }

    /// Implement a class method in scripting code
    pub fn add_class_method(
        &self,
        class: &ClassHandle,
        selector: &str,
        signature: Option<&str>,
        behavior: Arc<dyn ScriptBehavior>,
    ) -> Result<bool> {
        self.add_method(class, selector, signature, behavior, CallKind::ClassMethod)
    }

    fn add_method(
        &self,
        class: &ClassHandle,
        selector: &str,
        signature: Option<&str>,
        behavior: Arc<dyn ScriptBehavior>,
        kind: CallKind,
    ) -> Result<bool> {
        if class.defines(selector, kind) {
            return Ok(false);
        }

        let signature = match signature {
            Some(signature) => signature.to_string(),
            None => self.infer_signature(class, selector, kind)?,
        };
        let holder: ClassRef = match kind {
            CallKind::ClassMethod => self.runtime.metaclass(class.class()),
            _ => class.class(),
        };

        install_override(
            &self.runtime,
            holder,
            selector,
            &signature,
            behavior,
            self.options.policy.clone(),
        )?;

        if self.config.bindings.verbose {
            info!(
                class = %class.name(),
                selector = selector,
                signature = %signature,
                "scripting method added"
            );
        }
        Ok(true)
    }

    /// Signature for a scripting method installed without one: an inherited
    /// definition, else any class's definition of the selector, else a guess
    /// from the selector's shape.
    pub fn infer_signature(&self, class: &ClassHandle, selector: &str, kind: CallKind) -> Result<String> {
        if !self.config.bindings.infer_signatures {
            return Err(BridgeError::UnknownSignature(selector.to_string()));
        }

        let inherited = match kind {
            CallKind::ClassMethod => class.class_method(selector),
            _ => class.instance_method(selector),
        };
        if let Some(method) = inherited {
            return Ok(method.type_encoding());
        }
        if let Some(known) = self.signature_for_selector(selector) {
            return Ok(known);
        }

        // Actions take one trailing argument; accessors take none
        match selector.find(':') {
            None => Ok("@@:".to_string()),
            Some(colon) if colon + 1 == selector.len() => Ok("v@:@".to_string()),
            Some(_) => Err(BridgeError::UnknownSignature(selector.to_string())),
        }
    }

    /// Give `class` an object-valued property per name: a `name` getter and a
    /// `setName:` setter, both callable from native code. Values are stored as
    /// associations of the instance and released with it. The setter brackets
    /// the store with `willChangeValueForKey:`/`didChangeValueForKey:` when the
    /// instance responds to them.
    pub fn add_accessors(&self, class: &ClassHandle, names: &[&str]) -> Result<()> {
        for name in names {
            let setter = setter_name(name)?;
            let key = self.runtime.register_selector(name);

            let runtime = self.runtime.clone();
            self.add_instance_method(
                class,
                name,
                Some("@@:"),
                Arc::new(move |receiver: &Value, _: &[Value]| -> std::result::Result<Value, ScriptError> {
                    let Some(object) = receiver.as_object() else {
                        return Ok(Value::Nil);
                    };
                    let value = runtime.associated(object.object(), key);
                    let ptr = value.map_or(core::ptr::null_mut(), |v| v.as_ptr());
                    Ok(ObjectHandle::wrap(&runtime, ptr, None, false))
                }),
            )?;

            let runtime = self.runtime.clone();
            let options = self.options.clone();
            let property = name.to_string();
            let selector = setter.clone();
            self.add_instance_method(
                class,
                &setter,
                Some("v@:@"),
                Arc::new(move |receiver: &Value, args: &[Value]| -> std::result::Result<Value, ScriptError> {
                    let Some(object) = receiver.as_object() else {
                        return Ok(Value::Nil);
                    };
                    let value = match args.first() {
                        Some(Value::Object(value)) => Some(value.object()),
                        Some(Value::Nil) | None => None,
                        Some(other) => {
                            return Err(ScriptError::new(format!(
                                "{} expects an object, found {}",
                                selector,
                                other.type_name()
                            )))
                        }
                    };
                    let notify = |change: &str| {
                        notify_change(&runtime, &options, receiver, change, &property)
                            .map_err(|err| ScriptError::new(err.to_string()))
                    };
                    notify("willChangeValueForKey:")?;
                    runtime.set_associated(object.object(), key, value);
                    notify("didChangeValueForKey:")?;
                    Ok(Value::Nil)
                }),
            )?;
            debug!(class = %class.name(), property = *name, "accessors added");
        }
        Ok(())
    }

    /// One signature per selector across every class, sorted by selector
    pub fn signatures(&self) -> Vec<(String, String)> {
        crate::time_block!("signatures", {
            let mut found: BTreeMap<String, String> = BTreeMap::new();
            for method in self.all_methods() {
                let name = method.name();
                if found.contains_key(&name) {
                    continue;
                }
                if let Ok(signature) = parse_signature(&method.type_encoding()) {
                    found.insert(name, signature.to_string());
                }
            }
            found.into_iter().collect()
        })
    }

    /// Type encoding of the first method named `selector`, classes taken in
    /// name order
    pub fn signature_for_selector(&self, selector: &str) -> Option<String> {
        let sel = self.runtime.register_selector(selector);
        self.all_methods()
            .into_iter()
            .find(|method| method.selector() == sel)
            .map(|method| method.type_encoding())
    }

    fn all_methods(&self) -> Vec<MethodHandle> {
        self.classes()
            .into_iter()
            .flat_map(|class| {
                let mut methods = class.instance_methods();
                methods.extend(class.class_methods());
                methods
            })
            .collect()
    }
}

/// `setName:` for property `name`
fn setter_name(property: &str) -> Result<String> {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) if !property.contains(':') => {
            Ok(format!("set{}{}:", first.to_uppercase(), chars.as_str()))
        }
        _ => Err(BridgeError::mismatch("property name", property)),
    }
}

/// Send a key-value change notification if the receiver implements it
fn notify_change(
    runtime: &RuntimeRef,
    options: &CallOptions,
    receiver: &Value,
    selector: &str,
    property: &str,
) -> Result<()> {
    let Some(object) = receiver.as_object() else {
        return Ok(());
    };
    let sel = runtime.register_selector(selector);
    let Some(method) = runtime.lookup_method(runtime.object_class(object.object()), sel) else {
        return Ok(());
    };
    let method = MethodHandle::new(runtime.clone(), method, CallKind::InstanceMethod);
    let interface = interface_for(&method.type_encoding())?;
    // SAFETY: the runtime ties the implementation to its encoding
    let callable = unsafe {
        make_callable(
            runtime.clone(),
            method.implementation(),
            interface,
            CallKind::InstanceMethod,
            selector,
            options.clone(),
        )?
    };
    callable.invoke(receiver, &[Value::from(property)])?;
    Ok(())
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("runtime", &self.runtime.name())
            .field("callables", &self.callables.len())
            .finish()
    }
}
