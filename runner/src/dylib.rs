use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_void};
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DylibError {
    #[error("path contains NUL: {0}")]
    InvalidPath(String),
    #[error("dlopen {path} failed: {reason}")]
    Open { path: String, reason: String },
    #[error("dlsym {symbol} failed: {reason}")]
    Symbol { symbol: String, reason: String },
}

/// A dlopen handle, closed on drop.
pub struct Library {
    handle: *mut c_void,
    path: String,
}

fn take_dlerror() -> String {
    let err = unsafe { libc::dlerror() };
    if err.is_null() {
        return "unknown error".to_string();
    }
    unsafe { CStr::from_ptr(err) }.to_string_lossy().into_owned()
}

impl Library {
    pub fn open(path: &Path, flags: c_int) -> Result<Self, DylibError> {
        let shown = path.display().to_string();
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|_| DylibError::InvalidPath(shown.clone()))?;

        unsafe {
            libc::dlerror();
        }
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), flags) };
        if handle.is_null() {
            return Err(DylibError::Open {
                path: shown,
                reason: take_dlerror(),
            });
        }
        tracing::debug!(path = %shown, "dlopen succeeded");
        Ok(Library {
            handle,
            path: shown,
        })
    }

    /// Address of `name`. Callers transmute it to the right fn type; the
    /// pointer is only valid while `self` is alive.
    pub fn symbol(&self, name: &str) -> Result<*mut c_void, DylibError> {
        let c_name = CString::new(name).map_err(|_| DylibError::Symbol {
            symbol: name.to_string(),
            reason: "symbol name contains NUL".to_string(),
        })?;
        unsafe {
            libc::dlerror();
        }
        let sym = unsafe { libc::dlsym(self.handle, c_name.as_ptr()) };
        if sym.is_null() {
            return Err(DylibError::Symbol {
                symbol: name.to_string(),
                reason: take_dlerror(),
            });
        }
        Ok(sym)
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}
