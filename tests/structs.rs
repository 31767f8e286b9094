//! Aggregates passed and returned by value

use objbridge::runtime::{EntryPoint, NativeRuntime};
use objbridge::{Bridge, BridgeConfig, CallKind, LocalRuntime, ScriptError, Value};
use std::ffi::c_void;
use std::sync::Arc;

type Id = *mut c_void;
type Sel = *mut c_void;

const POINT: &str = "{CGPoint=dd}";
const SIZE: &str = "{CGSize=dd}";
const RECT: &str = "{CGRect={CGPoint=dd}{CGSize=dd}}";

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: f64,
    y: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Size {
    width: f64,
    height: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Rect {
    origin: Point,
    size: Size,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mixed {
    tag: u8,
    count: i32,
    ratio: f32,
}

extern "C" fn rect_area(_this: Id, _cmd: Sel, rect: Rect) -> f64 {
    rect.size.width * rect.size.height
}

extern "C" fn rect_center(_this: Id, _cmd: Sel, rect: Rect) -> Point {
    Point {
        x: rect.origin.x + rect.size.width / 2.0,
        y: rect.origin.y + rect.size.height / 2.0,
    }
}

extern "C" fn inset(_this: Id, _cmd: Sel, rect: Rect, by: f64) -> Rect {
    Rect {
        origin: Point {
            x: rect.origin.x + by,
            y: rect.origin.y + by,
        },
        size: Size {
            width: rect.size.width - 2.0 * by,
            height: rect.size.height - 2.0 * by,
        },
    }
}

extern "C" fn mixed_sum(_this: Id, _cmd: Sel, mixed: Mixed) -> f64 {
    f64::from(mixed.tag) + f64::from(mixed.count) + f64::from(mixed.ratio)
}

#[repr(C)]
struct Quad {
    values: [i32; 4],
}

extern "C" fn sum_quad(_this: Id, _cmd: Sel, quad: Quad) -> i32 {
    quad.values.iter().sum()
}

fn geometry() -> (Arc<LocalRuntime>, Bridge, Value) {
    let local = LocalRuntime::new();
    unsafe {
        local
            .build_class(local.root_class(), "Geometry")
            .method(
                "area:",
                &format!("d48@0:8{}16", RECT),
                EntryPoint::from_fn(rect_area as *const ()).unwrap(),
            )
            .method(
                "center:",
                &format!("{}48@0:8{}16", POINT, RECT),
                EntryPoint::from_fn(rect_center as *const ()).unwrap(),
            )
            .method(
                "inset:by:",
                &format!("{}56@0:8{}16d48", RECT, RECT),
                EntryPoint::from_fn(inset as *const ()).unwrap(),
            )
            .method(
                "mixed:",
                "d28@0:8{Mixed=Cif}16",
                EntryPoint::from_fn(mixed_sum as *const ()).unwrap(),
            )
            .method(
                "sumQuad:",
                "i32@0:8{Quad=[4i]}16",
                EntryPoint::from_fn(sum_quad as *const ()).unwrap(),
            )
            .register()
            .unwrap();
    }
    let bridge = Bridge::new(local.clone(), BridgeConfig::default());
    let class = Value::Class(bridge.find_class("Geometry").unwrap());
    let instance = bridge.send(&class, "new", &[]).unwrap();
    (local, bridge, instance)
}

fn floats(values: &[f64]) -> Value {
    Value::Array(values.iter().copied().map(Value::Float).collect())
}

fn rect(x: f64, y: f64, w: f64, h: f64) -> Value {
    Value::Array(vec![floats(&[x, y]), floats(&[w, h])])
}

#[test]
fn test_struct_argument() {
    let (_, bridge, geometry) = geometry();
    assert_eq!(
        bridge.send(&geometry, "area:", &[rect(0.0, 0.0, 3.0, 4.0)]).unwrap(),
        Value::Float(12.0)
    );
    // Flat leaves are accepted for nested structs
    assert_eq!(
        bridge
            .send(&geometry, "area:", &[floats(&[9.0, 9.0, 5.0, 2.0])])
            .unwrap(),
        Value::Float(10.0)
    );
}

#[test]
fn test_small_struct_return() {
    let (_, bridge, geometry) = geometry();
    assert_eq!(
        bridge.send(&geometry, "center:", &[rect(10.0, 20.0, 4.0, 6.0)]).unwrap(),
        floats(&[12.0, 23.0])
    );
}

#[test]
fn test_large_struct_return() {
    let (_, bridge, geometry) = geometry();
    assert_eq!(
        bridge
            .send(&geometry, "inset:by:", &[rect(0.0, 0.0, 10.0, 8.0), Value::Float(1.0)])
            .unwrap(),
        floats(&[1.0, 1.0, 8.0, 6.0])
    );
}

#[test]
fn test_padded_mixed_struct() {
    let (_, bridge, geometry) = geometry();
    let mixed = Value::Array(vec![Value::Int(1), Value::Int(2), Value::Float(0.5)]);
    assert_eq!(bridge.send(&geometry, "mixed:", &[mixed]).unwrap(), Value::Float(3.5));

    let overflow = Value::Array(vec![Value::Int(256), Value::Int(2), Value::Float(0.5)]);
    assert!(bridge.send(&geometry, "mixed:", &[overflow]).is_err());
}

#[test]
fn test_struct_wrapping_array() {
    let (_, bridge, geometry) = geometry();
    let nested = Value::Array(vec![Value::Array(
        (1..=4).map(Value::Int).collect(),
    )]);
    assert_eq!(bridge.send(&geometry, "sumQuad:", &[nested]).unwrap(), Value::Int(10));

    let flat = Value::Array((1..=4).map(Value::Int).collect());
    assert_eq!(bridge.send(&geometry, "sumQuad:", &[flat]).unwrap(), Value::Int(10));
}

#[test]
fn test_wrong_shape_rejected() {
    let (_, bridge, geometry) = geometry();
    assert!(bridge
        .send(&geometry, "area:", &[floats(&[1.0, 2.0, 3.0])])
        .is_err());
    assert!(bridge.send(&geometry, "area:", &[Value::Float(1.0)]).is_err());
}

#[test]
fn test_scripted_struct_return_called_natively() {
    let (local, bridge, geometry) = geometry();
    let class = bridge.find_class("Geometry").unwrap();

    bridge
        .add_instance_method(
            &class,
            "bounds",
            Some(format!("{}16@0:8", RECT).as_str()),
            Arc::new(|_: &Value, _: &[Value]| -> Result<Value, ScriptError> {
                Ok(rect(1.0, 2.0, 30.0, 40.0))
            }),
        )
        .unwrap();
    bridge
        .add_instance_method(
            &class,
            "scaled:",
            Some(format!("{}@:{}", SIZE, SIZE).as_str()),
            Arc::new(|_: &Value, args: &[Value]| -> Result<Value, ScriptError> {
                let leaves = args[0].as_array().ok_or_else(|| ScriptError::new("size"))?;
                let doubled = leaves
                    .iter()
                    .map(|v| Value::Float(v.as_float().unwrap_or(0.0) * 2.0))
                    .collect();
                Ok(Value::Array(doubled))
            }),
        )
        .unwrap();

    let receiver = geometry.as_object().unwrap().as_ptr();
    let bounds_sel = local.register_selector("bounds");
    let bounds = class.instance_method("bounds").unwrap().implementation();
    let bounds: extern "C" fn(Id, Sel) -> Rect = unsafe { std::mem::transmute(bounds.as_ptr()) };
    assert_eq!(
        bounds(receiver, bounds_sel.as_ptr()),
        Rect {
            origin: Point { x: 1.0, y: 2.0 },
            size: Size {
                width: 30.0,
                height: 40.0
            },
        }
    );

    let scaled_sel = local.register_selector("scaled:");
    let scaled = class.instance_method("scaled:").unwrap().implementation();
    let scaled: extern "C" fn(Id, Sel, Size) -> Size = unsafe { std::mem::transmute(scaled.as_ptr()) };
    assert_eq!(
        scaled(
            receiver,
            scaled_sel.as_ptr(),
            Size {
                width: 1.5,
                height: 2.0
            }
        ),
        Size {
            width: 3.0,
            height: 4.0
        }
    );

    // The same override answers scripting sends
    assert_eq!(
        bridge.send(&geometry, "bounds", &[]).unwrap(),
        floats(&[1.0, 2.0, 30.0, 40.0])
    );
    assert!(class.defines("bounds", CallKind::InstanceMethod));
}
