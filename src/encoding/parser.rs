//! Encoding string parser
//!
//! Accepts the runtime's type-encoding grammar, including the stack offsets
//! and method qualifiers that appear in method type strings. Anything the
//! bridge cannot marshal is rejected with the offending substring.

use super::{align_up, Signature, TypeDescriptor};
use crate::error::{BridgeError, Result};

/// Deepest aggregate/pointer nesting accepted
pub const MAX_NESTING: usize = 64;

/// Largest aggregate size an allocation can describe
pub const MAX_SIZE: usize = isize::MAX as usize;

fn struct_size(fields: &[TypeDescriptor]) -> Option<usize> {
    fields.iter().try_fold(0usize, |offset, field| {
        align_up(offset, field.align())
            .checked_add(field.size())
            .filter(|end| *end <= MAX_SIZE)
    })
}

/// Parse exactly one type (a trailing stack offset is tolerated)
pub fn parse(encoding: &str) -> Result<TypeDescriptor> {
    let (ty, rest) = parse_prefix(encoding)?;
    if !rest.is_empty() {
        return Err(BridgeError::unsupported(
            encoding,
            rest,
            "trailing characters after type",
        ));
    }
    Ok(ty)
}

/// Parse one leading type and return it with the unconsumed remainder
pub fn parse_prefix(encoding: &str) -> Result<(TypeDescriptor, &str)> {
    let mut parser = Parser::new(encoding);
    let ty = parser.parse_type()?;
    parser.skip_offset();
    Ok((ty, parser.rest()))
}

/// Parse a method or function signature: return type followed by arguments
pub fn parse_signature(encoding: &str) -> Result<Signature> {
    let mut parser = Parser::new(encoding);
    if parser.at_end() {
        return Err(BridgeError::unsupported(encoding, "", "empty signature"));
    }

    let ret = parser.parse_type()?;
    parser.skip_offset();

    let mut args = Vec::new();
    while !parser.at_end() {
        let start = parser.pos;
        let arg = parser.parse_type()?;
        if arg.is_void() {
            return Err(parser.error(start, "void is only valid as a return type"));
        }
        args.push(arg);
        parser.skip_offset();
    }

    Ok(Signature { ret, args })
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    #[inline]
    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    #[inline]
    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, at: usize, reason: &'static str) -> BridgeError {
        let at = at.min(self.src.len());
        BridgeError::unsupported(self.src, &self.src[at..], reason)
    }

    fn skip_qualifiers(&mut self) {
        while matches!(
            self.peek(),
            Some(b'r' | b'n' | b'N' | b'o' | b'O' | b'R' | b'V')
        ) {
            self.pos += 1;
        }
    }

    /// Skip a stack offset such as the `16` in `v16@0:8`
    fn skip_offset(&mut self) {
        let bytes = self.src.as_bytes();
        if self.peek() == Some(b'-') && bytes.get(self.pos + 1).map_or(false, u8::is_ascii_digit) {
            self.pos += 1;
        }
        while self.peek().map_or(false, |c| c.is_ascii_digit()) {
            self.pos += 1;
        }
    }

    fn skip_quoted(&mut self) -> Result<()> {
        let start = self.pos;
        self.pos += 1;
        match self.rest().find('"') {
            Some(end) => {
                self.pos += end + 1;
                Ok(())
            }
            None => Err(self.error(start, "unterminated quoted name")),
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(self.pos, "nesting too deep"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn parse_type(&mut self) -> Result<TypeDescriptor> {
        use TypeDescriptor as T;

        self.skip_qualifiers();
        let start = self.pos;
        let code = self
            .bump()
            .ok_or_else(|| self.error(start, "unexpected end of encoding"))?;

        let ty = match code {
            b'v' => T::Void,
            b'B' => T::Bool,
            b'c' => T::Char,
            b'C' => T::UChar,
            b's' => T::Short,
            b'S' => T::UShort,
            b'i' => T::Int,
            b'I' => T::UInt,
            b'l' => T::Long,
            b'L' => T::ULong,
            b'q' => T::LongLong,
            b'Q' => T::ULongLong,
            b'f' => T::Float,
            b'd' => T::Double,
            b'*' => T::CString,
            b'#' => T::ClassPtr,
            b':' => T::Selector,
            b'@' => {
                match self.peek() {
                    // Block object
                    Some(b'?') => self.pos += 1,
                    Some(b'"') => self.skip_quoted()?,
                    _ => {}
                }
                T::ObjectPtr
            }
            b'^' => {
                if self.peek() == Some(b'?') {
                    self.pos += 1;
                    T::UnknownPtr
                } else {
                    let pointee = self.nested(Self::parse_type)?;
                    if pointee.is_void() {
                        T::UnknownPtr
                    } else {
                        T::Pointer(Box::new(pointee))
                    }
                }
            }
            b'{' => {
                let (name, fields) = self.nested(|p| p.parse_aggregate(start, b'}'))?;
                if struct_size(&fields).is_none() {
                    return Err(self.error(start, "struct larger than the address space"));
                }
                T::Struct { name, fields }
            }
            b'(' => {
                let (name, fields) = self.nested(|p| p.parse_aggregate(start, b')'))?;
                T::Union { name, fields }
            }
            b'[' => self.nested(|p| p.parse_array(start))?,
            b'b' => return Err(self.error(start, "bitfields are not supported")),
            b'D' => return Err(self.error(start, "long double is not supported")),
            b'j' => return Err(self.error(start, "complex types are not supported")),
            b'A' => return Err(self.error(start, "atomic types are not supported")),
            b'!' => return Err(self.error(start, "vector types are not supported")),
            b'?' => return Err(self.error(start, "unknown type has no layout")),
            _ => return Err(self.error(start, "unrecognized type code")),
        };

        Ok(ty)
    }

    fn parse_aggregate(
        &mut self,
        start: usize,
        close: u8,
    ) -> Result<(Option<String>, Vec<TypeDescriptor>)> {
        let name_start = self.pos;
        while !matches!(self.peek(), Some(b'=') | None) && self.peek() != Some(close) {
            self.pos += 1;
        }
        let name = match &self.src[name_start..self.pos] {
            "" | "?" => None,
            other => Some(other.to_string()),
        };

        let mut fields = Vec::new();
        match self.bump() {
            Some(c) if c == close => return Ok((name, fields)),
            Some(b'=') => {}
            _ => return Err(self.error(start, "unterminated aggregate")),
        }

        loop {
            match self.peek() {
                Some(c) if c == close => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error(start, "unterminated aggregate")),
                Some(b'"') => self.skip_quoted()?,
                Some(_) => {
                    let field_start = self.pos;
                    let field = self.parse_type()?;
                    if field.is_void() {
                        return Err(self.error(field_start, "void is not a valid field type"));
                    }
                    fields.push(field);
                }
            }
        }

        Ok((name, fields))
    }

    fn parse_array(&mut self, start: usize) -> Result<TypeDescriptor> {
        let mut len: usize = 0;
        let mut digits = 0;
        while let Some(c) = self.peek().filter(u8::is_ascii_digit) {
            len = len
                .checked_mul(10)
                .and_then(|n| n.checked_add(usize::from(c - b'0')))
                .ok_or_else(|| self.error(start, "array length overflows"))?;
            digits += 1;
            self.pos += 1;
        }
        if digits == 0 {
            return Err(self.error(start, "array without length"));
        }

        let element_start = self.pos;
        let element = self.parse_type()?;
        if element.is_void() {
            return Err(self.error(element_start, "void is not a valid element type"));
        }
        if self.bump() != Some(b']') {
            return Err(self.error(start, "unterminated array"));
        }
        if len.checked_mul(element.size()).filter(|size| *size <= MAX_SIZE).is_none() {
            return Err(self.error(start, "array larger than the address space"));
        }

        Ok(TypeDescriptor::Array {
            len,
            element: Box::new(element),
        })
    }
}
