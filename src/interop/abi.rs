//! ABI (Application Binary Interface) handling
//!
//! Classifies where each argument of a call interface travels under the
//! platform calling convention. libffi performs the actual placement; the
//! classification is recorded on every interface so that struct-by-value vs
//! struct-by-pointer decisions can be checked per architecture.

use super::types::scalar_type;
use crate::encoding::TypeDescriptor;
use core::mem::size_of;
use core::ptr;

/// Calling convention specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CallingConvention {
    /// C calling convention (platform default)
    C,
    /// System V AMD64 ABI (Unix x86-64)
    SysV,
    /// Microsoft x64 calling convention (Windows)
    Win64,
    /// ARM AAPCS (ARM 32-bit)
    Aapcs,
    /// ARM64 calling convention
    Aarch64,
}

impl CallingConvention {
    /// Get platform default
    #[inline]
    pub const fn platform() -> Self {
        #[cfg(all(target_arch = "x86_64", target_os = "windows"))]
        return Self::Win64;

        #[cfg(all(target_arch = "x86_64", not(target_os = "windows")))]
        return Self::SysV;

        #[cfg(target_arch = "aarch64")]
        return Self::Aarch64;

        #[cfg(target_arch = "arm")]
        return Self::Aapcs;

        #[cfg(not(any(
            target_arch = "x86_64",
            target_arch = "aarch64",
            target_arch = "arm"
        )))]
        return Self::C;
    }

    /// Maximum register arguments for this convention
    #[inline]
    pub const fn max_register_args(self) -> usize {
        match self {
            Self::C => 6,
            Self::SysV => 6,    // RDI, RSI, RDX, RCX, R8, R9
            Self::Win64 => 4,   // RCX, RDX, R8, R9
            Self::Aapcs => 4,   // R0-R3
            Self::Aarch64 => 8, // X0-X7
        }
    }

    /// Check if floating-point args use separate registers
    #[inline]
    pub const fn has_fp_registers(self) -> bool {
        matches!(self, Self::SysV | Self::Win64 | Self::Aarch64)
    }

    /// Aggregate argument of `size` bytes is passed as a pointer to a copy
    pub const fn passes_indirectly(self, size: usize) -> bool {
        match self {
            Self::Win64 => !matches!(size, 1 | 2 | 4 | 8),
            Self::Aapcs => false,
            Self::C | Self::SysV | Self::Aarch64 => size > 16,
        }
    }

    /// Aggregate return of `size` bytes goes through a hidden result pointer
    pub const fn returns_indirectly(self, size: usize) -> bool {
        match self {
            Self::Win64 => !matches!(size, 1 | 2 | 4 | 8),
            Self::Aapcs => size > 4,
            Self::C | Self::SysV | Self::Aarch64 => size > 16,
        }
    }
}

impl Default for CallingConvention {
    #[inline]
    fn default() -> Self {
        Self::platform()
    }
}

/// Where a value travels across a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassingMode {
    /// Nothing is passed (void return)
    None,
    Register,
    Stack,
    /// A pointer to a caller-owned copy is passed instead
    Indirect,
}

/// Register allocation strategy for function calls
pub struct RegisterAllocator {
    convention: CallingConvention,
    int_regs_used: usize,
    fp_regs_used: usize,
}

impl RegisterAllocator {
    /// Create allocator for calling convention
    #[inline]
    pub const fn new(convention: CallingConvention) -> Self {
        Self {
            convention,
            int_regs_used: 0,
            fp_regs_used: 0,
        }
    }

    /// Check if the next `count` registers of a class are free
    #[inline]
    pub fn can_use_registers(&self, is_float: bool, count: usize) -> bool {
        let used = if is_float && self.convention.has_fp_registers() {
            self.fp_regs_used
        } else {
            self.int_regs_used
        };
        used + count <= self.convention.max_register_args()
    }

    /// Mark registers as used
    #[inline]
    pub fn use_registers(&mut self, is_float: bool, count: usize) {
        if is_float && self.convention.has_fp_registers() {
            self.fp_regs_used += count;
        } else {
            self.int_regs_used += count;
        }
    }

    /// Classify the next argument and consume its registers
    pub fn classify(&mut self, desc: &TypeDescriptor) -> PassingMode {
        let size = desc.size();
        let (is_float, count) = if desc.is_aggregate() {
            if self.convention.passes_indirectly(size) {
                return self.take(false, 1, PassingMode::Indirect);
            }
            let all_float = desc
                .leaves()
                .iter()
                .all(|(_, leaf)| scalar_type(leaf).map_or(false, |t| t.is_float()));
            (all_float, size.div_ceil(size_of::<usize>()).max(1))
        } else {
            (desc.is_float(), 1)
        };

        self.take(is_float, count, PassingMode::Register)
    }

    fn take(&mut self, is_float: bool, count: usize, mode: PassingMode) -> PassingMode {
        if self.can_use_registers(is_float, count) {
            self.use_registers(is_float, count);
            mode
        } else if mode == PassingMode::Indirect {
            // The pointer itself spills; the callee still receives a copy
            PassingMode::Indirect
        } else {
            PassingMode::Stack
        }
    }

    /// Reset for new call
    #[inline]
    pub fn reset(&mut self) {
        self.int_regs_used = 0;
        self.fp_regs_used = 0;
    }
}

/// Return slot classification
pub fn classify_return(convention: CallingConvention, desc: &TypeDescriptor) -> PassingMode {
    if desc.is_void() {
        PassingMode::None
    } else if desc.is_aggregate() && convention.returns_indirectly(desc.size()) {
        PassingMode::Indirect
    } else {
        PassingMode::Register
    }
}

/// Integer returns narrower than a machine word travel as a full `ffi_arg`
#[inline]
fn is_widened(desc: &TypeDescriptor) -> bool {
    desc.is_integral() && desc.size() < size_of::<usize>()
}

/// Rewrite a narrow integer stored at `slot` as a full return word
///
/// # Safety
/// `slot` must be valid for reads and writes of a machine word.
pub(crate) unsafe fn widen_return(desc: &TypeDescriptor, slot: *mut u8) {
    if !is_widened(desc) {
        return;
    }
    let word: isize = match (desc.size(), desc.is_signed()) {
        (1, true) => ptr::read_unaligned(slot as *const i8) as isize,
        (1, false) => ptr::read_unaligned(slot) as isize,
        (2, true) => ptr::read_unaligned(slot as *const i16) as isize,
        (2, false) => ptr::read_unaligned(slot as *const u16) as isize,
        (4, true) => ptr::read_unaligned(slot as *const i32) as isize,
        (4, false) => ptr::read_unaligned(slot as *const u32) as isize,
        _ => return,
    };
    ptr::write_unaligned(slot as *mut isize, word);
}

/// Rewrite a full return word at `slot` as the narrow integer it carries
///
/// # Safety
/// `slot` must be valid for reads and writes of a machine word.
pub(crate) unsafe fn narrow_return(desc: &TypeDescriptor, slot: *mut u8) {
    if !is_widened(desc) {
        return;
    }
    let word = ptr::read_unaligned(slot as *const usize);
    match desc.size() {
        1 => ptr::write_unaligned(slot, word as u8),
        2 => ptr::write_unaligned(slot as *mut u16, word as u16),
        4 => ptr::write_unaligned(slot as *mut u32, word as u32),
        _ => {}
    }
}
