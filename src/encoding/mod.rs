//! Type encodings - descriptors for native value kinds
//!
//! Design: Encodings are parsed once into an immutable [`TypeDescriptor`] tree
//! that can be shared across threads and reused by every call interface built
//! for the same signature.
//!
//! Architecture:
//! - `parser.rs` - encoding string → descriptor (single types and method signatures)
//! - `mod.rs` - descriptor model, C layout, canonical rendering

mod parser;


pub use parser::{parse, parse_prefix, parse_signature, MAX_NESTING, MAX_SIZE};

use std::fmt;

/// Structural description of a native value kind
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeDescriptor {
    Void,
    Bool,
    Char,
    UChar,
    Short,
    UShort,
    Int,
    UInt,
    /// ObjC `l`, always 32 bits
    Long,
    ULong,
    LongLong,
    ULongLong,
    Float,
    Double,
    CString,
    ObjectPtr,
    ClassPtr,
    Selector,
    UnknownPtr,
    Pointer(Box<TypeDescriptor>),
    Struct {
        name: Option<String>,
        fields: Vec<TypeDescriptor>,
    },
    Union {
        name: Option<String>,
        fields: Vec<TypeDescriptor>,
    },
    Array {
        len: usize,
        element: Box<TypeDescriptor>,
    },
}

const POINTER_SIZE: usize = std::mem::size_of::<*const u8>();

impl TypeDescriptor {
    /// Size in bytes under natural C layout
    pub fn size(&self) -> usize {
        match self {
            Self::Void => 0,
            Self::Bool | Self::Char | Self::UChar => 1,
            Self::Short | Self::UShort => 2,
            Self::Int | Self::UInt | Self::Long | Self::ULong | Self::Float => 4,
            Self::LongLong | Self::ULongLong | Self::Double => 8,
            Self::CString
            | Self::ObjectPtr
            | Self::ClassPtr
            | Self::Selector
            | Self::UnknownPtr
            | Self::Pointer(_) => POINTER_SIZE,
            Self::Struct { fields, .. } => {
                let mut offset = 0;
                for field in fields {
                    offset = align_up(offset, field.align()) + field.size();
                }
                align_up(offset, self.align())
            }
            Self::Union { fields, .. } => {
                let largest = fields.iter().map(Self::size).max().unwrap_or(0);
                align_up(largest, self.align())
            }
            Self::Array { len, element } => len * element.size(),
        }
    }

    /// Alignment in bytes under natural C layout
    pub fn align(&self) -> usize {
        match self {
            Self::Struct { fields, .. } | Self::Union { fields, .. } => {
                fields.iter().map(Self::align).max().unwrap_or(1)
            }
            Self::Array { element, .. } => element.align(),
            Self::Void => 1,
            // Scalars and pointers are naturally aligned
            other => other.size(),
        }
    }

    /// Byte offsets of struct fields; empty for every other kind
    pub fn field_offsets(&self) -> Vec<usize> {
        match self {
            Self::Struct { fields, .. } => {
                let mut offset = 0;
                fields
                    .iter()
                    .map(|field| {
                        offset = align_up(offset, field.align());
                        let at = offset;
                        offset += field.size();
                        at
                    })
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    /// Scalar leaves of an aggregate in declaration order, with their offsets.
    ///
    /// Unions contribute their first member. A scalar is its own single leaf.
    pub fn leaves(&self) -> Vec<(usize, &TypeDescriptor)> {
        let mut out = Vec::new();
        self.collect_leaves(0, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, base: usize, out: &mut Vec<(usize, &'a TypeDescriptor)>) {
        match self {
            Self::Struct { fields, .. } => {
                for (field, offset) in fields.iter().zip(self.field_offsets()) {
                    field.collect_leaves(base + offset, out);
                }
            }
            Self::Union { fields, .. } => {
                if let Some(first) = fields.first() {
                    first.collect_leaves(base, out);
                }
            }
            Self::Array { len, element } => {
                let stride = element.size();
                for i in 0..*len {
                    element.collect_leaves(base + i * stride, out);
                }
            }
            Self::Void => {}
            scalar => out.push((base, scalar)),
        }
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Integer-valued scalars, including `B`
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Self::Bool
                | Self::Char
                | Self::UChar
                | Self::Short
                | Self::UShort
                | Self::Int
                | Self::UInt
                | Self::Long
                | Self::ULong
                | Self::LongLong
                | Self::ULongLong
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Self::Char | Self::Short | Self::Int | Self::Long | Self::LongLong
        )
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self, Self::Float | Self::Double)
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(
            self,
            Self::Struct { .. } | Self::Union { .. } | Self::Array { .. }
        )
    }

    /// Short human name, used in diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool => "bool",
            Self::Char => "char",
            Self::UChar => "unsigned char",
            Self::Short => "short",
            Self::UShort => "unsigned short",
            Self::Int => "int",
            Self::UInt => "unsigned int",
            Self::Long => "long",
            Self::ULong => "unsigned long",
            Self::LongLong => "long long",
            Self::ULongLong => "unsigned long long",
            Self::Float => "float",
            Self::Double => "double",
            Self::CString => "C string",
            Self::ObjectPtr => "object",
            Self::ClassPtr => "class",
            Self::Selector => "selector",
            Self::UnknownPtr => "pointer",
            Self::Pointer(_) => "typed pointer",
            Self::Struct { .. } => "struct",
            Self::Union { .. } => "union",
            Self::Array { .. } => "array",
        }
    }
}

/// Canonical encoding: no offsets, no qualifiers, no quoted names
impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Void => "v",
            Self::Bool => "B",
            Self::Char => "c",
            Self::UChar => "C",
            Self::Short => "s",
            Self::UShort => "S",
            Self::Int => "i",
            Self::UInt => "I",
            Self::Long => "l",
            Self::ULong => "L",
            Self::LongLong => "q",
            Self::ULongLong => "Q",
            Self::Float => "f",
            Self::Double => "d",
            Self::CString => "*",
            Self::ObjectPtr => "@",
            Self::ClassPtr => "#",
            Self::Selector => ":",
            Self::UnknownPtr => "^v",
            Self::Pointer(pointee) => return write!(f, "^{}", pointee),
            Self::Struct { name, fields } => {
                return write_aggregate(f, ('{', '}'), name.as_deref(), fields)
            }
            Self::Union { name, fields } => {
                return write_aggregate(f, ('(', ')'), name.as_deref(), fields)
            }
            Self::Array { len, element } => return write!(f, "[{}{}]", len, element),
        };
        f.write_str(code)
    }
}

fn write_aggregate(
    f: &mut fmt::Formatter<'_>,
    (open, close): (char, char),
    name: Option<&str>,
    fields: &[TypeDescriptor],
) -> fmt::Result {
    write!(f, "{}{}", open, name.unwrap_or("?"))?;
    if !fields.is_empty() {
        f.write_str("=")?;
        for field in fields {
            write!(f, "{}", field)?;
        }
    }
    write!(f, "{}", close)
}

/// Parsed method or function signature
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub ret: TypeDescriptor,
    pub args: Vec<TypeDescriptor>,
}

impl Signature {
    /// Build from a return encoding and separate argument encodings
    pub fn from_parts(ret: &str, args: &[&str]) -> crate::Result<Self> {
        Ok(Self {
            ret: parse(ret)?,
            args: args.iter().map(|a| parse(a)).collect::<crate::Result<_>>()?,
        })
    }

    /// Total declared arguments, implicit receiver and selector included
    #[inline]
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// True when the leading arguments are a receiver followed by a selector
    pub fn is_method_shaped(&self) -> bool {
        matches!(
            self.args.as_slice(),
            [TypeDescriptor::ObjectPtr | TypeDescriptor::ClassPtr, TypeDescriptor::Selector, ..]
        )
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ret)?;
        for arg in &self.args {
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}

#[inline]
pub(crate) const fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        (offset + align - 1) / align * align
    }
}
