//! Foreign-call type tags
//!
//! Maps type descriptors onto the scalar kinds of the C ABI and onto libffi
//! type trees.

use crate::encoding::TypeDescriptor;
use crate::error::{BridgeError, Result};
use libffi::middle::Type;

/// Scalar ABI kind of a descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FfiType {
    Void,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Pointer,
}

impl FfiType {
    /// Get size of type in bytes
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::I64 | Self::U64 | Self::F64 => 8,
            Self::Pointer => core::mem::size_of::<*const u8>(),
        }
    }

    /// Get alignment requirement
    #[inline]
    pub const fn align(self) -> usize {
        self.size()
    }

    /// Check if type is integral
    #[inline]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::I8
                | Self::I16
                | Self::I32
                | Self::I64
                | Self::U8
                | Self::U16
                | Self::U32
                | Self::U64
        )
    }

    /// Check if type is floating point
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// libffi type for this scalar
    pub fn to_ffi(self) -> Type {
        match self {
            Self::Void => Type::void(),
            Self::Bool | Self::U8 => Type::u8(),
            Self::I8 => Type::i8(),
            Self::I16 => Type::i16(),
            Self::U16 => Type::u16(),
            Self::I32 => Type::i32(),
            Self::U32 => Type::u32(),
            Self::I64 => Type::i64(),
            Self::U64 => Type::u64(),
            Self::F32 => Type::f32(),
            Self::F64 => Type::f64(),
            Self::Pointer => Type::pointer(),
        }
    }
}

/// Scalar tag for a descriptor; `None` for aggregates
pub fn scalar_type(desc: &TypeDescriptor) -> Option<FfiType> {
    use TypeDescriptor as T;
    Some(match desc {
        T::Void => FfiType::Void,
        T::Bool => FfiType::Bool,
        T::Char => FfiType::I8,
        T::UChar => FfiType::U8,
        T::Short => FfiType::I16,
        T::UShort => FfiType::U16,
        T::Int | T::Long => FfiType::I32,
        T::UInt | T::ULong => FfiType::U32,
        T::LongLong => FfiType::I64,
        T::ULongLong => FfiType::U64,
        T::Float => FfiType::F32,
        T::Double => FfiType::F64,
        T::CString
        | T::ObjectPtr
        | T::ClassPtr
        | T::Selector
        | T::UnknownPtr
        | T::Pointer(_) => FfiType::Pointer,
        T::Struct { .. } | T::Union { .. } | T::Array { .. } => return None,
    })
}

/// Largest aggregate passed or returned by value
pub const MAX_BY_VALUE_SIZE: usize = 1 << 16;

/// The member a union is lowered to: the most aligned, then the largest,
/// preferring an integer class member so the union travels in general
/// purpose registers like its C counterpart.
pub(crate) fn union_carrier(fields: &[TypeDescriptor]) -> Option<&TypeDescriptor> {
    fields.iter().max_by_key(|f| (f.align(), f.size(), !f.is_float()))
}

/// libffi type tree for a descriptor.
///
/// Arrays become structs of repeated elements. A union becomes its
/// [`union_carrier`] padded with bytes up to the union's size.
pub fn ffi_type(desc: &TypeDescriptor) -> Result<Type> {
    if desc.is_aggregate() && desc.size() == 0 {
        return Err(BridgeError::unsupported(
            &desc.to_string(),
            &desc.to_string(),
            "empty aggregate cannot be passed by value",
        ));
    }
    if desc.is_aggregate() && desc.size() > MAX_BY_VALUE_SIZE {
        return Err(BridgeError::unsupported(
            &desc.to_string(),
            &desc.to_string(),
            "aggregate too large to pass by value",
        ));
    }

    match desc {
        TypeDescriptor::Struct { fields, .. } => {
            let members = fields.iter().map(ffi_type).collect::<Result<Vec<_>>>()?;
            Ok(Type::structure(members))
        }
        TypeDescriptor::Array { len, element } => {
            let element = ffi_type(element)?;
            Ok(Type::structure(vec![element; *len]))
        }
        TypeDescriptor::Union { fields, .. } => {
            let base = union_carrier(fields).ok_or_else(|| {
                BridgeError::unsupported(&desc.to_string(), "", "union without members")
            })?;
            let padding = desc.size() - base.size();
            let mut members = vec![ffi_type(base)?];
            members.extend(vec![Type::u8(); padding]);
            Ok(Type::structure(members))
        }
        scalar => scalar_type(scalar)
            .map(FfiType::to_ffi)
            .ok_or_else(|| BridgeError::unsupported(&desc.to_string(), "", "no ABI type")),
    }
}
