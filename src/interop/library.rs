//! Dynamic library loading and symbol resolution

use crate::error::{BridgeError, Result};
use crate::runtime::EntryPoint;
use core::ffi::c_void;
use core::ptr::NonNull;
use std::ffi::{CStr, CString};

/// Handle to a loaded library, or to the running process image
pub struct Library {
    handle: NonNull<c_void>,
    label: String,
    close_on_drop: bool,
}

// dlopen handles are usable from any thread
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

#[cfg(unix)]
fn last_error() -> String {
    // SAFETY: dlerror returns null or a NUL-terminated message
    unsafe {
        let err = libc::dlerror();
        if err.is_null() {
            "unknown error".into()
        } else {
            CStr::from_ptr(err).to_string_lossy().into_owned()
        }
    }
}

impl Library {
    /// Symbols already linked into the process
    #[cfg(unix)]
    pub fn process() -> Result<Self> {
        // SAFETY: a null filename asks for the main program handle
        let handle = unsafe { libc::dlopen(core::ptr::null(), libc::RTLD_NOW) };
        NonNull::new(handle)
            .map(|handle| Self {
                handle,
                label: "<process>".into(),
                close_on_drop: false,
            })
            .ok_or_else(|| BridgeError::Library(last_error()))
    }

    /// Load a library by name or path
    #[cfg(unix)]
    pub fn open(path: &str) -> Result<Self> {
        let cpath = CString::new(path)
            .map_err(|_| BridgeError::Library(format!("invalid library name: {:?}", path)))?;

        // SAFETY: cpath is NUL-terminated
        let handle = unsafe { libc::dlopen(cpath.as_ptr(), libc::RTLD_NOW) };
        NonNull::new(handle)
            .map(|handle| Self {
                handle,
                label: path.to_string(),
                close_on_drop: true,
            })
            .ok_or_else(|| BridgeError::Library(format!("{}: {}", path, last_error())))
    }

    #[cfg(not(unix))]
    pub fn process() -> Result<Self> {
        Err(BridgeError::Library("dynamic symbol lookup requires a unix host".into()))
    }

    #[cfg(not(unix))]
    pub fn open(path: &str) -> Result<Self> {
        Err(BridgeError::Library(format!(
            "{}: dynamic loading requires a unix host",
            path
        )))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Resolve a function symbol
    #[cfg(unix)]
    pub fn symbol(&self, name: &str) -> Result<EntryPoint> {
        let cname = CString::new(name).map_err(|_| BridgeError::UnknownSymbol(name.to_string()))?;

        // SAFETY: handle came from dlopen and cname is NUL-terminated
        let ptr = unsafe { libc::dlsym(self.handle.as_ptr(), cname.as_ptr()) };
        EntryPoint::from_ptr(ptr).ok_or_else(|| BridgeError::UnknownSymbol(name.to_string()))
    }

    #[cfg(not(unix))]
    pub fn symbol(&self, name: &str) -> Result<EntryPoint> {
        Err(BridgeError::UnknownSymbol(name.to_string()))
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        #[cfg(unix)]
        if self.close_on_drop {
            // SAFETY: handle came from dlopen and is closed once
            unsafe {
                libc::dlclose(self.handle.as_ptr());
            }
        }
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Library({})", self.label)
    }
}
