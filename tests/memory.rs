//! Reference ownership across the bridge

use objbridge::{Bridge, BridgeConfig, LocalRuntime, ObjectHandle, OwnershipPolicy, Value};
use std::sync::Arc;

fn setup() -> (Arc<LocalRuntime>, Bridge) {
    let local = LocalRuntime::new();
    let bridge = Bridge::new(local.clone(), BridgeConfig::default());
    (local, bridge)
}

fn object(value: Value) -> ObjectHandle {
    match value {
        Value::Object(handle) => handle,
        other => panic!("expected an object, got {:?}", other),
    }
}

fn class(bridge: &Bridge, name: &str) -> Value {
    Value::Class(bridge.find_class(name).unwrap())
}

#[test]
fn test_owned_result_released_with_wrapper() {
    let (local, bridge) = setup();

    let instance = object(bridge.send(&class(&bridge, "Object"), "alloc", &[]).unwrap());
    assert!(instance.allow_release());
    assert_eq!(local.live_objects(), 1);

    let copy = instance.clone();
    drop(instance);
    assert_eq!(local.live_objects(), 1);
    drop(copy);
    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_init_takes_over_receiver_reference() {
    let (local, bridge) = setup();

    let allocated = object(bridge.send(&class(&bridge, "String"), "alloc", &[]).unwrap());
    let initialized = object(
        bridge
            .send(
                &Value::Object(allocated.clone()),
                "initWithUTF8String:",
                &[Value::from("owned")],
            )
            .unwrap(),
    );

    assert!(!allocated.allow_release());
    assert!(initialized.allow_release());
    assert_eq!(allocated, initialized);
    assert_eq!(local.retain_count(initialized.object()), 1);

    drop(allocated);
    assert_eq!(local.live_objects(), 1);
    assert_eq!(initialized.to_native_string().as_deref(), Some("owned"));
    drop(initialized);
    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_failed_init_consumes_receiver() {
    let (local, bridge) = setup();

    let allocated = object(bridge.send(&class(&bridge, "String"), "alloc", &[]).unwrap());
    let result = bridge
        .send(&Value::Object(allocated.clone()), "initWithUTF8String:", &[Value::Nil])
        .unwrap();

    assert_eq!(result, Value::Nil);
    assert!(!allocated.allow_release());
    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_argument_strings_are_temporary() {
    let (local, bridge) = setup();

    let allocated = bridge.send(&class(&bridge, "String"), "alloc", &[]).unwrap();
    let receiver = bridge
        .send(&allocated, "initWithUTF8String:", &[Value::from("base")])
        .unwrap();
    assert_eq!(local.live_objects(), 1);

    let equal = bridge.send(&receiver, "isEqual:", &[Value::from("other")]).unwrap();
    assert_eq!(equal, Value::Int(0));
    assert_eq!(local.live_objects(), 1);

    assert_eq!(bridge.send(&receiver, "isEqual:", &[receiver.clone()]).unwrap(), Value::Int(1));
}

#[test]
fn test_autoreleased_factory_result_drains_with_pool() {
    let (local, bridge) = setup();

    {
        let _pool = LocalRuntime::autorelease_pool();
        let text = object(
            bridge
                .send(&class(&bridge, "String"), "stringWithUTF8String:", &[Value::from("pooled")])
                .unwrap(),
        );
        assert!(!text.allow_release());
        assert_eq!(local.live_objects(), 1);
        drop(text);
        assert_eq!(local.live_objects(), 1);
    }

    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_keeping_a_borrowed_result() {
    let (local, bridge) = setup();

    let kept = {
        let _pool = LocalRuntime::autorelease_pool();
        let text = object(
            bridge
                .send(&class(&bridge, "String"), "stringWithUTF8String:", &[Value::from("kept")])
                .unwrap(),
        );
        assert!(text.set_allow_release(true));
        assert!(!text.set_allow_release(false));
        text
    };

    assert_eq!(local.live_objects(), 1);
    assert_eq!(kept.to_native_string().as_deref(), Some("kept"));
    drop(kept);
    assert_eq!(local.live_objects(), 0);
}

#[test]
fn test_custom_owned_families() {
    let local = LocalRuntime::new();
    let mut config = BridgeConfig::default();
    config.ownership = OwnershipPolicy {
        owned_families: vec!["new".into()],
        consuming_families: vec!["init".into()],
    };
    let bridge = Bridge::new(local.clone(), config);

    // alloc is no longer an owned family
    let allocated = object(bridge.send(&class(&bridge, "Object"), "alloc", &[]).unwrap());
    assert!(!allocated.allow_release());
    let receiver = Value::Object(allocated.clone());
    drop(allocated);
    assert_eq!(local.live_objects(), 1);

    bridge.send(&receiver, "release", &[]).unwrap();
    assert_eq!(local.live_objects(), 0);
}
