//! Round trips through the bridge in both directions

use objbridge::runtime::{EntryPoint, NativeRuntime, ObjectRef};
use objbridge::script::lock;
use objbridge::{Bridge, BridgeConfig, BridgeError, LocalRuntime, ScriptError, Value};
use std::ffi::c_void;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

type Id = *mut c_void;
type Sel = *mut c_void;
type Outcome = std::result::Result<Value, ScriptError>;

extern "C" fn increment(_this: Id, _cmd: Sel, x: i32) -> i32 {
    x + 1
}

fn setup() -> (Arc<LocalRuntime>, Bridge) {
    objbridge::init();
    let local = LocalRuntime::new();
    let bridge = Bridge::new(local.clone(), BridgeConfig::default());
    (local, bridge)
}

fn counter_class(local: &LocalRuntime) {
    unsafe {
        local
            .build_class(local.root_class(), "Counter")
            .method(
                "increment:",
                "i20@0:8i16",
                EntryPoint::from_fn(increment as *const ()).unwrap(),
            )
            .register()
            .unwrap();
    }
}

fn new_instance(bridge: &Bridge, class: &str) -> Value {
    let class = bridge.find_class(class).unwrap();
    bridge.send(&Value::Class(class), "new", &[]).unwrap()
}

/// Call a `@@:` method the way native code would
fn send_native(runtime: &dyn NativeRuntime, receiver: Id, selector: &str) -> Id {
    let object = ObjectRef::from_ptr(receiver).unwrap();
    let sel = runtime.register_selector(selector);
    let method = runtime
        .lookup_method(runtime.object_class(object), sel)
        .unwrap();
    let imp: extern "C" fn(Id, Sel) -> Id =
        unsafe { std::mem::transmute(runtime.method_implementation(method).as_ptr()) };
    imp(receiver, sel.as_ptr())
}

#[test]
fn test_outbound_method_call() {
    let (local, bridge) = setup();
    counter_class(&local);

    let counter = new_instance(&bridge, "Counter");
    let before = objbridge::interop::stats();
    let result = bridge.send(&counter, "increment:", &[Value::Int(41)]).unwrap();
    assert_eq!(result, Value::Int(42));
    assert!(objbridge::interop::stats().script_to_native > before.script_to_native);
}

#[test]
fn test_nil_receiver_answers_nil() {
    let (_, bridge) = setup();
    assert_eq!(bridge.send(&Value::Nil, "anything:", &[Value::Int(1)]).unwrap(), Value::Nil);
}

#[test]
fn test_unknown_selector() {
    let (local, bridge) = setup();
    counter_class(&local);
    let counter = new_instance(&bridge, "Counter");

    assert_eq!(
        bridge.send(&counter, "decrement:", &[Value::Int(1)]).unwrap_err(),
        BridgeError::UnknownMethod {
            class: "Counter".into(),
            selector: "decrement:".into(),
        }
    );
    assert!(matches!(
        bridge.send(&counter, "increment:", &[]),
        Err(BridgeError::Arity { expected: 1, found: 0 })
    ));
}

#[test]
fn test_string_factory_round_trip() {
    let (local, bridge) = setup();
    let string = bridge.find_class("String").unwrap();

    let text = bridge
        .send(&Value::Class(string), "stringWithUTF8String:", &[Value::from("héllo")])
        .unwrap();
    let handle = text.as_object().unwrap().clone();
    assert!(!handle.allow_release());
    assert_eq!(handle.to_native_string().as_deref(), Some("héllo"));
    assert_eq!(bridge.send(&text, "length", &[]).unwrap(), Value::Int(5));
    assert_eq!(bridge.send(&text, "UTF8String", &[]).unwrap(), Value::from("héllo"));

    // Factory results are not owned by their wrapper
    assert!(local.retain_count(handle.object()) >= 1);
}

#[test]
fn test_scripted_override_called_from_native_thread() {
    let (local, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let greeter = bridge.subclass(&object, "Greeter").unwrap();

    let added = bridge
        .add_instance_method(
            &greeter,
            "description",
            None,
            Arc::new(|_: &Value, _: &[Value]| -> Outcome { Ok(Value::from("hello")) }),
        )
        .unwrap();
    assert!(added);
    assert!(greeter.defines("description", objbridge::CallKind::InstanceMethod));
    assert_eq!(
        greeter.instance_method("description").unwrap().type_encoding(),
        "@@:"
    );

    let instance = new_instance(&bridge, "Greeter");
    let address = instance.as_object().unwrap().as_ptr() as usize;
    let runtime = local.clone();
    let before = objbridge::interop::stats();

    let text = thread::spawn(move || {
        let _pool = LocalRuntime::autorelease_pool();
        let described = send_native(runtime.as_ref(), address as Id, "description");
        runtime.string_to_string(ObjectRef::from_ptr(described).unwrap())
    })
    .join()
    .unwrap();

    assert_eq!(text.as_deref(), Some("hello"));
    assert!(objbridge::interop::stats().native_to_script > before.native_to_script);
    assert!(!lock::held_by_current_thread());

    // Scripting calls reach the override through the same dispatch
    let described = bridge.send(&instance, "description", &[]).unwrap();
    assert_eq!(described.as_object().unwrap().to_native_string().as_deref(), Some("hello"));
}

#[test]
fn test_second_definition_is_refused() {
    let (_, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let class = bridge.subclass(&object, "Twice").unwrap();
    let behavior = Arc::new(|_: &Value, _: &[Value]| -> Outcome { Ok(Value::Nil) });

    assert!(bridge
        .add_instance_method(&class, "ping", Some("v@:"), behavior.clone())
        .unwrap());
    assert!(!bridge
        .add_instance_method(&class, "ping", Some("v@:"), behavior)
        .unwrap());
}

#[test]
fn test_failing_override_returns_zero() {
    let (local, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let class = bridge.subclass(&object, "Faulty").unwrap();
    bridge
        .add_instance_method(
            &class,
            "score",
            Some("q@:"),
            Arc::new(|_: &Value, _: &[Value]| -> Outcome { Err(ScriptError::new("no score")) }),
        )
        .unwrap();

    let instance = new_instance(&bridge, "Faulty");
    let before = objbridge::interop::stats();

    assert_eq!(bridge.send(&instance, "score", &[]).unwrap(), Value::Int(0));
    assert_eq!(local.callback_failures(), 1);

    let after = objbridge::interop::stats();
    assert!(after.callback_failures > before.callback_failures);
    assert!(after.native_to_script > before.native_to_script);
    assert!(after.script_to_native > before.script_to_native);
}

#[test]
fn test_override_sees_receiver_and_arguments() {
    let (_, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let class = bridge.subclass(&object, "Adder").unwrap();
    bridge
        .add_instance_method(
            &class,
            "add:to:",
            Some("q@:qq"),
            Arc::new(|receiver: &Value, args: &[Value]| -> Outcome {
                let name = receiver.as_object().map(|o| o.class().name()).unwrap_or_default();
                if name != "Adder" {
                    return Err(ScriptError::new("wrong receiver"));
                }
                Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
            }),
        )
        .unwrap();

    let adder = new_instance(&bridge, "Adder");
    assert_eq!(
        bridge.send(&adder, "add:to:", &[Value::Int(2), Value::Int(40)]).unwrap(),
        Value::Int(42)
    );
}

#[test]
fn test_inferred_signatures() {
    let (_, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let class = bridge.subclass(&object, "Inferred").unwrap();
    let kind = objbridge::CallKind::InstanceMethod;

    assert_eq!(bridge.infer_signature(&class, "hash", kind).unwrap(), "Q16@0:8");
    assert_eq!(
        bridge.infer_signature(&class, "initWithUTF8String:", kind).unwrap(),
        "@24@0:8r*16"
    );
    assert_eq!(bridge.infer_signature(&class, "frobnicate", kind).unwrap(), "@@:");
    assert_eq!(bridge.infer_signature(&class, "takeValue:", kind).unwrap(), "v@:@");
    assert_eq!(
        bridge.infer_signature(&class, "tableView:objectValue:row:", kind).unwrap_err(),
        BridgeError::UnknownSignature("tableView:objectValue:row:".into())
    );
    assert!(bridge.infer_signature(&class, "put:at", kind).is_err());
}

#[test]
fn test_accessors_round_trip_through_native_dispatch() {
    let (local, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let person = bridge.subclass(&object, "Person").unwrap();

    let changes = Arc::new(Mutex::new(Vec::new()));
    for selector in ["willChangeValueForKey:", "didChangeValueForKey:"] {
        let changes = changes.clone();
        bridge
            .add_instance_method(
                &person,
                selector,
                Some("v@:@"),
                Arc::new(move |_: &Value, args: &[Value]| -> Outcome {
                    let key = args[0]
                        .as_object()
                        .and_then(|key| key.to_native_string())
                        .unwrap_or_default();
                    changes.lock().unwrap().push(format!("{} {}", selector, key));
                    Ok(Value::Nil)
                }),
            )
            .unwrap();
    }
    bridge.add_accessors(&person, &["name"]).unwrap();
    assert_eq!(person.instance_method("name").unwrap().type_encoding(), "@@:");
    assert_eq!(person.instance_method("setName:").unwrap().type_encoding(), "v@:@");

    {
        let _pool = LocalRuntime::autorelease_pool();
        let instance = new_instance(&bridge, "Person");
        assert_eq!(bridge.send(&instance, "name", &[]).unwrap(), Value::Nil);

        bridge.send(&instance, "setName:", &[Value::from("Ada")]).unwrap();
        let receiver = instance.as_object().unwrap().as_ptr();
        let named = send_native(local.as_ref(), receiver, "name");
        assert_eq!(
            local.string_to_string(ObjectRef::from_ptr(named).unwrap()).as_deref(),
            Some("Ada")
        );

        let text = local.string_from_str("Grace").unwrap();
        let sel = local.register_selector("setName:");
        let method = local
            .lookup_method(local.object_class(ObjectRef::from_ptr(receiver).unwrap()), sel)
            .unwrap();
        let set_name: extern "C" fn(Id, Sel, Id) =
            unsafe { std::mem::transmute(local.method_implementation(method).as_ptr()) };
        set_name(receiver, sel.as_ptr(), text.as_ptr());
        local.release(text);

        let named = bridge.send(&instance, "name", &[]).unwrap();
        assert_eq!(named.as_object().unwrap().to_native_string().as_deref(), Some("Grace"));
    }

    assert_eq!(
        *changes.lock().unwrap(),
        vec![
            "willChangeValueForKey: name",
            "didChangeValueForKey: name",
            "willChangeValueForKey: name",
            "didChangeValueForKey: name",
        ]
    );
    // The stored value is released with its instance
    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_accessor_names_are_checked() {
    let (_, bridge) = setup();
    let object = bridge.find_class("Object").unwrap();
    let class = bridge.subclass(&object, "Unnamed").unwrap();
    assert!(bridge.add_accessors(&class, &[""]).is_err());
    assert!(bridge.add_accessors(&class, &["bad:name"]).is_err());
}

#[test]
fn test_inference_can_be_disabled() {
    objbridge::init();
    let local = LocalRuntime::new();
    let mut config = BridgeConfig::default();
    config.bindings.infer_signatures = false;
    let bridge = Bridge::new(local, config);

    let object = bridge.find_class("Object").unwrap();
    assert_eq!(
        bridge
            .infer_signature(&object, "frobnicate", objbridge::CallKind::InstanceMethod)
            .unwrap_err(),
        BridgeError::UnknownSignature("frobnicate".into())
    );
}

#[test]
fn test_signature_catalog() {
    let (local, bridge) = setup();
    counter_class(&local);

    let signatures = bridge.signatures();
    let lookup = |name: &str| {
        signatures
            .iter()
            .find(|(selector, _)| selector == name)
            .map(|(_, signature)| signature.as_str())
    };
    assert_eq!(lookup("increment:"), Some("i@:i"));
    assert_eq!(lookup("length"), Some("Q@:"));
    assert!(signatures.windows(2).all(|pair| pair[0].0 < pair[1].0));
}

#[test]
fn test_method_call_tracking() {
    objbridge::init();
    let local = LocalRuntime::new();
    counter_class(&local);
    let mut config = BridgeConfig::default();
    config.tracking.track_method_calls = true;
    let bridge = Bridge::new(local, config);

    let counter = new_instance(&bridge, "Counter");
    for value in 0..3 {
        bridge.send(&counter, "increment:", &[Value::Int(value)]).unwrap();
    }

    let top = objbridge::stats::top_methods(usize::MAX);
    assert!(top
        .iter()
        .any(|(calls, selector, signature)| selector == "increment:" && signature == "i@:i" && *calls >= 3));
    assert!(objbridge::stats::top_signatures(usize::MAX)
        .iter()
        .any(|(_, signature)| signature == "i@:i"));
}

#[test]
fn test_concurrent_callable_construction_converges() {
    const THREADS: usize = 8;
    let (local, bridge) = setup();
    counter_class(&local);
    let bridge = Arc::new(bridge);
    let method = bridge
        .find_class("Counter")
        .unwrap()
        .instance_method("increment:")
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let method = method.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                bridge.method_callable(&method).unwrap()
            })
        })
        .collect();
    let callables: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(callables.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert!(Arc::ptr_eq(
        callables[0].interface(),
        &objbridge::interop::interface_for("i20@0:8i16").unwrap()
    ));
}

#[test]
#[cfg(unix)]
fn test_wrap_process_function() {
    let (_, bridge) = setup();

    let abs = unsafe { bridge.wrap_function("abs", "i", Some(&["i"])) }.unwrap();
    assert_eq!(abs.call(&[Value::Int(-17)]).unwrap(), Value::Int(17));
    assert_eq!(abs.arity(), 1);

    let missing = unsafe { bridge.wrap_function("objbridge_no_such_symbol", "v", None) };
    assert!(matches!(missing, Err(BridgeError::UnknownSymbol(_))));
}
