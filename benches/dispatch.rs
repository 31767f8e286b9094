//! Dispatch benchmarks
//!
//! Measures encoding parsing, cached call-site lookup and calls across the
//! boundary in both directions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use objbridge::interop::{interface_for, synthesize, TrampolineKind};
use objbridge::runtime::EntryPoint;
use objbridge::{parse, parse_signature, Bridge, BridgeConfig, LocalRuntime, OwnershipPolicy, ScriptError, Value};
use std::ffi::c_void;
use std::sync::Arc;

extern "C" fn add(_this: *mut c_void, _cmd: *mut c_void, a: i64, b: i64) -> i64 {
    a + b
}

const ENCODINGS: &[(&str, &str)] = &[
    ("scalar", "i"),
    ("pointer", "^{CGPoint=dd}"),
    ("rect", "{CGRect={CGPoint=dd}{CGSize=dd}}"),
    ("nested", "{Outer=[4{Inner=ci(Value=qd)}]^v}"),
];

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for (name, encoding) in ENCODINGS {
        group.bench_with_input(BenchmarkId::new("type", name), encoding, |b, encoding| {
            b.iter(|| parse(black_box(encoding)))
        });
    }

    group.bench_function("signature", |b| {
        b.iter(|| parse_signature(black_box("{CGRect={CGPoint=dd}{CGSize=dd}}56@0:8{CGRect={CGPoint=dd}{CGSize=dd}}16d48")))
    });

    group.finish();
}

fn bench_interface_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("interface");

    interface_for("q32@0:8q16q24").unwrap();
    group.bench_function("cached", |b| {
        b.iter(|| interface_for(black_box("q32@0:8q16q24")))
    });

    group.finish();
}

fn bench_outbound(c: &mut Criterion) {
    let local = LocalRuntime::new();
    unsafe {
        local
            .build_class(local.root_class(), "Adder")
            .method("add:to:", "q32@0:8q16q24", EntryPoint::from_fn(add as *const ()).unwrap())
            .register()
            .unwrap();
    }
    let bridge = Bridge::new(local, BridgeConfig::default());
    let class = Value::Class(bridge.find_class("Adder").unwrap());
    let adder = bridge.send(&class, "new", &[]).unwrap();
    let args = [Value::Int(2), Value::Int(40)];

    let mut group = c.benchmark_group("outbound");
    group.bench_function("send", |b| {
        b.iter(|| bridge.send(black_box(&adder), "add:to:", black_box(&args)))
    });

    let method = bridge
        .find_class("Adder")
        .unwrap()
        .instance_method("add:to:")
        .unwrap();
    let callable = bridge.method_callable(&method).unwrap();
    group.bench_function("prepared", |b| {
        b.iter(|| callable.invoke(black_box(&adder), black_box(&args)))
    });

    group.finish();
}

fn bench_inbound(c: &mut Criterion) {
    let trampoline = synthesize(
        LocalRuntime::new(),
        interface_for("qqq").unwrap(),
        Arc::new(|_: &Value, args: &[Value]| -> Result<Value, ScriptError> {
            Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
        }),
        TrampolineKind::Function,
        "sum",
        Arc::new(OwnershipPolicy::default()),
    )
    .unwrap();
    let native: extern "C" fn(i64, i64) -> i64 =
        unsafe { std::mem::transmute(trampoline.entry().as_ptr()) };

    let mut group = c.benchmark_group("inbound");
    group.bench_function("function", |b| b.iter(|| native(black_box(2), black_box(40))));
    group.finish();
}

criterion_group!(benches, bench_parse, bench_interface_cache, bench_outbound, bench_inbound);
criterion_main!(benches);
