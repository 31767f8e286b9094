//! Call interfaces - prepared descriptions of a native call shape
//!
//! A [`CallInterface`] is built once per distinct signature and shared by every
//! trampoline with that signature. It is immutable after construction.

use super::abi::{self, CallingConvention, PassingMode, RegisterAllocator};
use super::types::ffi_type;
use crate::encoding::{parse_signature, Signature, TypeDescriptor};
use crate::error::{BridgeError, Result};
use crate::logging::log_interface_built;
use crate::runtime::EntryPoint;
use core::ffi::c_void;
use core::mem::size_of;
use libffi::middle::{Cif, Type};

/// Most arguments a single call interface can describe
pub const MAX_ARGUMENTS: usize = 16;

/// Prepared call description for one signature
pub struct CallInterface {
    signature: Signature,
    cif: Cif,
    convention: CallingConvention,
    arg_modes: Vec<PassingMode>,
    return_mode: PassingMode,
}

// The prepared cif is only read after construction
unsafe impl Send for CallInterface {}
unsafe impl Sync for CallInterface {}

impl CallInterface {
    /// Build an interface for `args` → `ret`
    pub fn build(args: Vec<TypeDescriptor>, ret: TypeDescriptor) -> Result<Self> {
        Self::from_signature(Signature { ret, args })
    }

    /// Parse a signature encoding and build its interface
    pub fn parse(encoding: &str) -> Result<Self> {
        Self::from_signature(parse_signature(encoding)?)
    }

    pub fn from_signature(signature: Signature) -> Result<Self> {
        if signature.args.len() > MAX_ARGUMENTS {
            return Err(BridgeError::UnsupportedArity {
                count: signature.args.len(),
                max: MAX_ARGUMENTS,
            });
        }

        let arg_types = signature
            .args
            .iter()
            .map(ffi_type)
            .collect::<Result<Vec<_>>>()?;
        let ret_type = if signature.ret.is_void() {
            Type::void()
        } else {
            ffi_type(&signature.ret)?
        };

        let convention = CallingConvention::platform();
        let return_mode = abi::classify_return(convention, &signature.ret);
        let mut allocator = RegisterAllocator::new(convention);
        if return_mode == PassingMode::Indirect {
            // Hidden result pointer
            allocator.use_registers(false, 1);
        }
        let arg_modes = signature
            .args
            .iter()
            .map(|arg| allocator.classify(arg))
            .collect();

        let cif = Cif::new(arg_types, ret_type);
        log_interface_built(&signature.to_string(), signature.args.len());

        Ok(Self {
            signature,
            cif,
            convention,
            arg_modes,
            return_mode,
        })
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn arguments(&self) -> &[TypeDescriptor] {
        &self.signature.args
    }

    #[inline]
    pub fn return_type(&self) -> &TypeDescriptor {
        &self.signature.ret
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.signature.args.len()
    }

    #[inline]
    pub fn convention(&self) -> CallingConvention {
        self.convention
    }

    #[inline]
    pub fn arg_modes(&self) -> &[PassingMode] {
        &self.arg_modes
    }

    #[inline]
    pub fn return_mode(&self) -> PassingMode {
        self.return_mode
    }

    /// Bytes to reserve for the return value; never less than a return word
    #[inline]
    pub fn return_slot_size(&self) -> usize {
        self.signature.ret.size().max(size_of::<u64>())
    }

    pub(crate) fn cif(&self) -> &Cif {
        &self.cif
    }

    /// Call `entry` with prepared argument pointers, leaving the result in `ret`
    ///
    /// # Safety
    /// `entry` must implement this interface's C signature, `args` must hold
    /// one pointer per argument to a correctly laid out value, and `ret` must
    /// be valid for `return_slot_size()` bytes.
    pub(crate) unsafe fn call_raw(&self, entry: EntryPoint, ret: *mut u8, args: *mut *mut c_void) {
        let code = entry.code_ptr();
        libffi::raw::ffi_call(
            self.cif.as_raw_ptr(),
            Some(*code.as_fun()),
            ret as *mut c_void,
            args,
        );
        abi::narrow_return(&self.signature.ret, ret);
    }
}

impl std::fmt::Debug for CallInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallInterface")
            .field("signature", &self.signature.to_string())
            .field("convention", &self.convention)
            .field("arg_modes", &self.arg_modes)
            .field("return_mode", &self.return_mode)
            .finish()
    }
}
