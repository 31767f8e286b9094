//! Property-based tests using proptest
//!
//! Invariants that hold for all inputs:
//! 1. Parsing never panics, and canonical encodings reparse to the same descriptor
//! 2. Aggregate layouts respect member alignment
//! 3. Integer conversion succeeds exactly when the value fits the native kind
//! 4. Ownership families follow the selector naming rule

use objbridge::interop::{MarshalContext, NativeBuffer};
use objbridge::{parse, BridgeError, LocalRuntime, MethodFamily, OwnershipPolicy, RuntimeRef, TypeDescriptor, Value};
use proptest::prelude::*;

const SCALARS: &[&str] = &[
    "c", "C", "s", "S", "i", "I", "l", "L", "q", "Q", "f", "d", "B", "*", "@", "#", ":", "^v",
];

/// A canonical encoding of bounded depth
fn encoding() -> impl Strategy<Value = String> {
    let scalar = prop::sample::select(SCALARS).prop_map(str::to_string);
    let leaf = prop_oneof![
        3 => scalar.clone(),
        1 => scalar.prop_map(|s| format!("^{}", s)),
    ];

    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (0u32..100, prop::collection::vec(inner.clone(), 1..4))
                .prop_map(|(id, fields)| format!("{{S{}={}}}", id, fields.concat())),
            (1usize..5, inner).prop_map(|(len, element)| format!("[{}{}]", len, element)),
        ]
    })
}

fn write_then_read(value: &Value, encoding: &str) -> objbridge::Result<Value> {
    let runtime: RuntimeRef = LocalRuntime::new();
    let policy = OwnershipPolicy::default();
    let desc = parse(encoding)?;
    let mut buffer = NativeBuffer::for_type(&desc);
    let mut ctx = MarshalContext::new(&runtime, &policy);
    unsafe {
        ctx.to_native(value, &desc, buffer.as_mut_ptr())?;
        ctx.to_scripting(buffer.as_ptr(), &desc, None)
    }
}

fn check_layout(desc: &TypeDescriptor) -> Result<(), TestCaseError> {
    prop_assert!(desc.align().is_power_of_two());
    prop_assert_eq!(desc.size() % desc.align(), 0);

    if let TypeDescriptor::Struct { fields, .. } = desc {
        let offsets = desc.field_offsets();
        let mut end = 0;
        for (offset, field) in offsets.iter().zip(fields) {
            prop_assert!(*offset >= end);
            prop_assert_eq!(offset % field.align(), 0);
            end = offset + field.size();
            check_layout(field)?;
        }
        prop_assert!(desc.size() >= end);
    }
    Ok(())
}

proptest! {
    /// Arbitrary input never panics the parser
    #[test]
    fn parse_never_panics(input in "\\PC{0,64}") {
        let _ = parse(&input);
    }

    /// Canonical encodings render back unchanged
    #[test]
    fn canonical_encodings_round_trip(encoding in encoding()) {
        let desc = parse(&encoding).unwrap();
        prop_assert_eq!(desc.to_string(), encoding);
        prop_assert_eq!(parse(&desc.to_string()).unwrap(), desc);
    }

    /// Every member sits at an offset aligned for its kind
    #[test]
    fn layouts_are_aligned(encoding in encoding()) {
        check_layout(&parse(&encoding).unwrap())?;
    }

    /// Scalar leaves of an aggregate never overlap
    #[test]
    fn leaves_are_disjoint(encoding in encoding()) {
        let desc = parse(&encoding).unwrap();
        let leaves = desc.leaves();
        for pair in leaves.windows(2) {
            prop_assert!(pair[0].0 + pair[0].1.size() <= pair[1].0);
        }
        if let Some((offset, leaf)) = leaves.last() {
            prop_assert!(offset + leaf.size() <= desc.size());
        }
    }

    /// Structs holding arrays of structs nest well past depth 8
    #[test]
    fn deep_nesting_parses(depth in 1usize..=20, len in 1usize..4) {
        let mut encoding = "i".to_string();
        for level in 0..depth {
            encoding = if level % 2 == 0 {
                format!("{{L{}=c{}}}", level, encoding)
            } else {
                format!("[{}{}]", len, encoding)
            };
        }
        let desc = parse(&encoding).unwrap();
        prop_assert_eq!(desc.to_string(), encoding);
    }

    /// A short accepts exactly the values in its range
    #[test]
    fn short_conversion_matches_range(value in any::<i64>()) {
        let result = write_then_read(&Value::Int(value), "s");
        if i16::try_from(value).is_ok() {
            prop_assert_eq!(result.unwrap(), Value::Int(value));
        } else {
            let is_range = matches!(result, Err(BridgeError::Range { .. }));
            prop_assert!(is_range);
        }
    }

    /// Unsigned ints reject negatives and anything past 32 bits
    #[test]
    fn unsigned_conversion_matches_range(value in any::<i64>()) {
        let result = write_then_read(&Value::Int(value), "I");
        prop_assert_eq!(result.is_ok(), u32::try_from(value).is_ok());
    }

    /// Doubles cross the boundary bit for bit
    #[test]
    fn doubles_are_exact(value in any::<f64>().prop_filter("finite", |v| v.is_finite())) {
        prop_assert_eq!(write_then_read(&Value::Float(value), "d").unwrap(), Value::Float(value));
    }

    /// A family prefix counts only at a word boundary
    #[test]
    fn family_follows_word_boundary(rest in "[A-Z][a-zA-Z]{0,8}", lower in "[a-z]{1,8}") {
        let policy = OwnershipPolicy::default();
        prop_assert_eq!(policy.family_of(&format!("copy{}", rest)), MethodFamily::Owned);
        prop_assert_eq!(policy.family_of(&format!("init{}:", rest)), MethodFamily::Consuming);
        prop_assert_eq!(policy.family_of(&format!("copy{}", lower)), MethodFamily::Borrowed);
        prop_assert_eq!(policy.family_of(&format!("_new{}", rest)), MethodFamily::Owned);
    }
}
