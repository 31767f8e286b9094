//! Value marshaling - scripting values ↔ native buffers
//!
//! Conversions are driven entirely by the type descriptor. Numeric coercions
//! fail with a range error instead of truncating; a value of the wrong kind
//! fails with a type mismatch. Temporaries created while converting arguments
//! (C strings, string arrays, bridged string objects) are owned by the
//! [`MarshalContext`] and live until it is dropped.

use crate::config::OwnershipPolicy;
use crate::encoding::TypeDescriptor;
use crate::error::{BridgeError, Result};
use crate::handles::{ClassHandle, ObjectHandle};
use crate::runtime::{ClassRef, ObjectRef, RuntimeRef, Selector};
use crate::script::Value;
use core::ffi::{c_char, c_void};
use core::mem::size_of;
use core::ptr;
use smallvec::{smallvec, SmallVec};
use std::ffi::{CStr, CString};

const WORD: usize = size_of::<u64>();

/// Zeroed, 8-byte aligned storage for one native value
pub struct NativeBuffer {
    words: SmallVec<[u64; 4]>,
    len: usize,
}

impl NativeBuffer {
    /// Buffer for a value of `desc`, never smaller than a return word
    pub fn for_type(desc: &TypeDescriptor) -> Self {
        Self::with_len(desc.size())
    }

    pub fn with_len(len: usize) -> Self {
        let len = len.max(WORD);
        Self {
            words: smallvec![0; len.div_ceil(WORD)],
            len,
        }
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.words.as_ptr() as *const u8
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.words.as_mut_ptr() as *mut u8
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: words owns at least len initialised bytes
        unsafe { core::slice::from_raw_parts(self.as_ptr(), self.len) }
    }
}

/// Storage that must outlive the native call it was created for
pub(crate) enum Temporary {
    CString(CString),
    Pointers(Box<[*const c_char]>),
    Object(ObjectHandle),
}

/// Conversion state for one crossing of the boundary
pub struct MarshalContext<'a> {
    runtime: &'a RuntimeRef,
    policy: &'a OwnershipPolicy,
    temporaries: Vec<Temporary>,
}

#[inline]
unsafe fn load<T: Copy>(src: *const u8) -> T {
    ptr::read_unaligned(src as *const T)
}

#[inline]
unsafe fn store<T>(dst: *mut u8, value: T) {
    ptr::write_unaligned(dst as *mut T, value)
}

fn describe(value: &Value) -> String {
    format!("{:?}", value)
}

/// Numeric coercion into an integer kind
fn integer<T: num_traits::NumCast>(value: &Value, desc: &TypeDescriptor) -> Result<T> {
    let converted = match value {
        Value::Int(i) => T::from(*i),
        Value::Bool(b) => T::from(i64::from(*b)),
        Value::Float(x) if x.is_finite() => T::from(x.trunc()),
        Value::Float(_) => None,
        other => return Err(BridgeError::mismatch(desc.kind_name(), other.type_name())),
    };
    converted.ok_or_else(|| BridgeError::range(describe(value), desc.kind_name()))
}

fn double(value: &Value, desc: &TypeDescriptor) -> Result<f64> {
    match value {
        Value::Float(x) => Ok(*x),
        Value::Int(i) => Ok(*i as f64),
        other => Err(BridgeError::mismatch(desc.kind_name(), other.type_name())),
    }
}

fn boolean(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Nil => Ok(false),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        Value::Int(_) => Err(BridgeError::range(describe(value), "bool")),
        other => Err(BridgeError::mismatch("bool", other.type_name())),
    }
}

impl<'a> MarshalContext<'a> {
    pub fn new(runtime: &'a RuntimeRef, policy: &'a OwnershipPolicy) -> Self {
        Self {
            runtime,
            policy,
            temporaries: Vec::new(),
        }
    }

    /// Write `value` as a native `desc` into `out`
    ///
    /// # Safety
    /// `out` must be valid for writes of `desc.size()` bytes.
    pub unsafe fn to_native(
        &mut self,
        value: &Value,
        desc: &TypeDescriptor,
        out: *mut u8,
    ) -> Result<()> {
        use TypeDescriptor as T;

        match desc {
            T::Void => {}
            T::Bool => store(out, u8::from(boolean(value)?)),
            T::Char => store(out, integer::<i8>(value, desc)?),
            T::UChar => store(out, integer::<u8>(value, desc)?),
            T::Short => store(out, integer::<i16>(value, desc)?),
            T::UShort => store(out, integer::<u16>(value, desc)?),
            T::Int | T::Long => store(out, integer::<i32>(value, desc)?),
            T::UInt | T::ULong => store(out, integer::<u32>(value, desc)?),
            T::LongLong => store(out, integer::<i64>(value, desc)?),
            T::ULongLong => store(out, integer::<u64>(value, desc)?),
            T::Float => {
                let x = double(value, desc)?;
                if x.is_finite() && x.abs() > f64::from(f32::MAX) {
                    return Err(BridgeError::range(describe(value), desc.kind_name()));
                }
                store(out, x as f32);
            }
            T::Double => store(out, double(value, desc)?),
            T::CString => {
                let ptr = self.c_string(value)?;
                store(out, ptr);
            }
            T::ObjectPtr => {
                let ptr = self.object_pointer(value)?;
                store(out, ptr);
            }
            T::ClassPtr => {
                let ptr = match value {
                    Value::Nil => ptr::null_mut(),
                    Value::Class(class) => class.class().as_ptr(),
                    other => return Err(BridgeError::mismatch("class", other.type_name())),
                };
                store(out, ptr);
            }
            T::Selector => {
                let ptr = match value {
                    Value::Nil => ptr::null_mut(),
                    Value::Str(name) => self.runtime.register_selector(name).as_ptr(),
                    other => return Err(BridgeError::mismatch("selector", other.type_name())),
                };
                store(out, ptr);
            }
            T::Pointer(pointee) if **pointee == T::CString && value.as_array().is_some() => {
                let ptr = self.string_array(value)?;
                store(out, ptr);
            }
            T::UnknownPtr | T::Pointer(_) => {
                let ptr = self.address(value, desc)?;
                store(out, ptr);
            }
            T::Struct { .. } | T::Union { .. } | T::Array { .. } => {
                self.write_aggregate(value, desc, out)?;
            }
        }

        Ok(())
    }

    fn c_string(&mut self, value: &Value) -> Result<*const c_char> {
        match value {
            Value::Nil => Ok(ptr::null()),
            Value::Str(text) => {
                let owned = CString::new(text.as_bytes())
                    .map_err(|_| BridgeError::mismatch("C string", "str with interior NUL"))?;
                let ptr = owned.as_ptr();
                self.temporaries.push(Temporary::CString(owned));
                Ok(ptr)
            }
            other => Err(BridgeError::mismatch("C string", other.type_name())),
        }
    }

    fn string_array(&mut self, value: &Value) -> Result<*const *const c_char> {
        let items = value.as_array().unwrap_or_default();
        let mut pointers = Vec::with_capacity(items.len() + 1);
        for item in items {
            pointers.push(self.c_string(item)?);
        }
        pointers.push(ptr::null());

        let pointers = pointers.into_boxed_slice();
        let ptr = pointers.as_ptr();
        self.temporaries.push(Temporary::Pointers(pointers));
        Ok(ptr)
    }

    fn object_pointer(&mut self, value: &Value) -> Result<*mut c_void> {
        match value {
            Value::Nil => Ok(ptr::null_mut()),
            Value::Object(handle) => Ok(handle.as_ptr()),
            Value::Class(class) => Ok(class.class().as_ptr()),
            Value::Str(text) => {
                let object = self.runtime.string_from_str(text)?;
                let handle = ObjectHandle::new(self.runtime.clone(), object, None, true);
                self.temporaries.push(Temporary::Object(handle));
                Ok(object.as_ptr())
            }
            other => Err(BridgeError::mismatch("object", other.type_name())),
        }
    }

    fn address(&self, value: &Value, desc: &TypeDescriptor) -> Result<*mut c_void> {
        match value {
            Value::Nil => Ok(ptr::null_mut()),
            Value::Int(addr) => usize::try_from(*addr)
                .map(|a| a as *mut c_void)
                .map_err(|_| BridgeError::range(addr, desc.kind_name())),
            Value::Object(handle) => Ok(handle.as_ptr()),
            other => Err(BridgeError::mismatch(desc.kind_name(), other.type_name())),
        }
    }

    /// Accepts one element per member (nested) or one per scalar leaf (flat)
    unsafe fn write_aggregate(
        &mut self,
        value: &Value,
        desc: &TypeDescriptor,
        out: *mut u8,
    ) -> Result<()> {
        let items = value.as_array().ok_or_else(|| {
            BridgeError::mismatch(format!("array for {}", desc), value.type_name())
        })?;

        let members: Vec<(usize, &TypeDescriptor)> = match desc {
            TypeDescriptor::Struct { fields, .. } => desc
                .field_offsets()
                .into_iter()
                .zip(fields.iter())
                .collect(),
            TypeDescriptor::Array { len, element } => {
                (0..*len).map(|i| (i * element.size(), element.as_ref())).collect()
            }
            TypeDescriptor::Union { fields, .. } => fields.first().map(|f| (0, f)).into_iter().collect(),
            _ => Vec::new(),
        };

        let nested = items.len() == members.len()
            && members
                .iter()
                .zip(items)
                .all(|((_, m), item)| !m.is_aggregate() || item.as_array().is_some());
        if nested {
            for ((offset, member), item) in members.iter().zip(items) {
                self.to_native(item, member, out.add(*offset))?;
            }
            return Ok(());
        }

        let leaves = desc.leaves();
        if items.len() != leaves.len() {
            return Err(BridgeError::mismatch(
                format!("array of {} or {} elements for {}", members.len(), leaves.len(), desc),
                format!("array of {} elements", items.len()),
            ));
        }
        for ((offset, leaf), item) in leaves.iter().zip(items) {
            self.to_native(item, leaf, out.add(*offset))?;
        }
        Ok(())
    }

    /// Read a native `desc` from `buffer`. Objects are owned by their wrapper
    /// when `originating` belongs to an owned method family.
    ///
    /// # Safety
    /// `buffer` must hold a valid value of `desc`.
    pub unsafe fn to_scripting(
        &self,
        buffer: *const u8,
        desc: &TypeDescriptor,
        originating: Option<Selector>,
    ) -> Result<Value> {
        let allow_release = originating.map_or(false, |sel| {
            self.policy.returns_owned(&self.runtime.selector_name(sel))
        });
        self.to_scripting_with(buffer, desc, originating, allow_release)
    }

    /// [`to_scripting`](Self::to_scripting) with the ownership decided by the caller
    ///
    /// # Safety
    /// `buffer` must hold a valid value of `desc`.
    pub unsafe fn to_scripting_with(
        &self,
        buffer: *const u8,
        desc: &TypeDescriptor,
        provenance: Option<Selector>,
        allow_release: bool,
    ) -> Result<Value> {
        use TypeDescriptor as T;

        let value = match desc {
            T::Void => Value::Nil,
            T::Bool => Value::Bool(load::<u8>(buffer) != 0),
            T::Char => Value::Int(i64::from(load::<i8>(buffer))),
            T::UChar => Value::Int(i64::from(load::<u8>(buffer))),
            T::Short => Value::Int(i64::from(load::<i16>(buffer))),
            T::UShort => Value::Int(i64::from(load::<u16>(buffer))),
            T::Int | T::Long => Value::Int(i64::from(load::<i32>(buffer))),
            T::UInt | T::ULong => Value::Int(i64::from(load::<u32>(buffer))),
            T::LongLong => Value::Int(load::<i64>(buffer)),
            T::ULongLong => {
                let raw = load::<u64>(buffer);
                Value::Int(i64::try_from(raw).map_err(|_| BridgeError::range(raw, "int"))?)
            }
            T::Float => Value::Float(f64::from(load::<f32>(buffer))),
            T::Double => Value::Float(load::<f64>(buffer)),
            T::CString => {
                let ptr = load::<*const c_char>(buffer);
                if ptr.is_null() {
                    Value::Nil
                } else {
                    Value::from(CStr::from_ptr(ptr).to_string_lossy().into_owned())
                }
            }
            T::ObjectPtr => {
                let ptr = load::<*mut c_void>(buffer);
                ObjectHandle::wrap(self.runtime, ptr, provenance, allow_release)
            }
            T::ClassPtr => match ClassRef::from_ptr(load::<*const c_void>(buffer)) {
                Some(class) => Value::Class(ClassHandle::new(self.runtime.clone(), class)),
                None => Value::Nil,
            },
            T::Selector => match Selector::from_ptr(load::<*const c_void>(buffer)) {
                Some(sel) => Value::from(self.runtime.selector_name(sel)),
                None => Value::Nil,
            },
            T::UnknownPtr | T::Pointer(_) => {
                let addr = load::<usize>(buffer);
                if addr == 0 {
                    Value::Nil
                } else {
                    Value::Int(i64::try_from(addr).map_err(|_| BridgeError::range(addr, "int"))?)
                }
            }
            T::Struct { .. } | T::Union { .. } | T::Array { .. } => {
                let items = desc
                    .leaves()
                    .into_iter()
                    .map(|(offset, leaf)| self.to_scripting_with(buffer.add(offset), leaf, None, false))
                    .collect::<Result<Vec<_>>>()?;
                Value::Array(items)
            }
        };

        Ok(value)
    }

    /// Whether converting so far created storage owned by this context
    pub(crate) fn has_temporaries(&self) -> bool {
        !self.temporaries.is_empty()
    }

    /// Hand the temporaries to a caller that must keep them alive longer
    pub(crate) fn into_temporaries(self) -> Vec<Temporary> {
        self.temporaries
    }
}

/// Object reference stored in a buffer holding an `@`
///
/// # Safety
/// `buffer` must be valid for a pointer-sized read.
pub(crate) unsafe fn object_at(buffer: *const u8) -> Option<ObjectRef> {
    ObjectRef::from_ptr(load::<*const c_void>(buffer))
}
