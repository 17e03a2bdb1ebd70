use std::os::raw::{c_char, c_int, c_void};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dylib::Library;
use crate::errno_names::{captured_errno, clear_errno};

pub const LIBSANDBOX_PATH: &str = "/usr/lib/libsandbox.1.dylib";
const SANDBOX_APPLY_SYMBOL: &str = "sandbox_apply";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxSource {
    Sbpl(PathBuf),
    Blob(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyMode {
    Sbpl,
    Blob,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub rc: i32,
    pub errno: Option<i32>,
    pub message: Option<String>,
    pub mode: ApplyMode,
}

impl ApplyOutcome {
    fn failed(rc: i32, errno: Option<i32>, message: &str, mode: ApplyMode) -> Self {
        ApplyOutcome {
            rc,
            errno,
            message: Some(message.to_string()),
            mode,
        }
    }

    pub fn applied(&self) -> bool {
        self.rc == 0
    }
}

/// Restricts the current process. Every failure is reported through the
/// returned outcome rather than an error.
pub trait SandboxApplier {
    fn apply(&self, source: Option<&SandboxSource>) -> ApplyOutcome;
}

/// Applies profiles through libsandbox on the running host.
pub struct SystemSandbox;

impl SandboxApplier for SystemSandbox {
    fn apply(&self, source: Option<&SandboxSource>) -> ApplyOutcome {
        match source {
            Some(SandboxSource::Sbpl(path)) => {
                tracing::debug!(path = %path.display(), "applying sbpl profile");
                apply_sbpl(path)
            }
            Some(SandboxSource::Blob(path)) => {
                tracing::debug!(path = %path.display(), "applying compiled profile blob");
                apply_blob(path)
            }
            None => ApplyOutcome::failed(-3, None, "no profile path provided", ApplyMode::None),
        }
    }
}

fn apply_sbpl(path: &Path) -> ApplyOutcome {
    clear_errno();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            return ApplyOutcome::failed(-2, err.raw_os_error(), "failed to read sbpl", ApplyMode::Sbpl);
        }
    };
    let (rc, errno, message) = seatbelt::init_with_text(&text);
    ApplyOutcome {
        rc,
        errno,
        message,
        mode: ApplyMode::Sbpl,
    }
}

// Layout of libsandbox's sandbox_profile_t.
#[repr(C)]
struct SandboxProfile {
    builtin: *mut c_char,
    data: *const u8,
    size: usize,
}

type SandboxApplyFn = unsafe extern "C" fn(*mut c_void) -> c_int;

fn apply_blob(path: &Path) -> ApplyOutcome {
    clear_errno();
    let library = match Library::open(Path::new(LIBSANDBOX_PATH), libc::RTLD_NOW | libc::RTLD_LOCAL) {
        Ok(library) => library,
        Err(err) => {
            tracing::debug!(error = %err, "libsandbox unavailable");
            return ApplyOutcome::failed(-1, captured_errno(), "dlopen libsandbox failed", ApplyMode::Blob);
        }
    };
    let symbol = match library.symbol(SANDBOX_APPLY_SYMBOL) {
        Ok(symbol) => symbol,
        Err(err) => {
            tracing::debug!(error = %err, "sandbox_apply missing");
            return ApplyOutcome::failed(-1, captured_errno(), "dlsym sandbox_apply failed", ApplyMode::Blob);
        }
    };
    let blob = match std::fs::read(path) {
        Ok(blob) => blob,
        Err(err) => {
            return ApplyOutcome::failed(-2, err.raw_os_error(), "failed to load blob", ApplyMode::Blob);
        }
    };

    let apply: SandboxApplyFn = unsafe { std::mem::transmute::<*mut c_void, SandboxApplyFn>(symbol) };
    let mut profile = SandboxProfile {
        builtin: std::ptr::null_mut(),
        data: blob.as_ptr(),
        size: blob.len(),
    };
    clear_errno();
    let rc = unsafe { apply((&mut profile as *mut SandboxProfile).cast::<c_void>()) };
    let errno = if rc == 0 { None } else { captured_errno() };
    ApplyOutcome {
        rc,
        errno,
        message: None,
        mode: ApplyMode::Blob,
    }
}

#[cfg(target_os = "macos")]
mod seatbelt {
    use std::ffi::{CStr, CString};
    use std::os::raw::{c_char, c_int};

    use crate::errno_names::{captured_errno, clear_errno};

    #[link(name = "System")]
    unsafe extern "C" {
        fn sandbox_init(profile: *const c_char, flags: u64, errorbuf: *mut *mut c_char) -> c_int;
        fn sandbox_free_error(errorbuf: *mut c_char);
    }

    pub fn init_with_text(text: &str) -> (i32, Option<i32>, Option<String>) {
        let profile = match CString::new(text) {
            Ok(profile) => profile,
            Err(_) => return (-2, None, Some("sbpl contains NUL byte".to_string())),
        };
        let mut error_buf: *mut c_char = std::ptr::null_mut();
        clear_errno();
        let rc = unsafe { sandbox_init(profile.as_ptr(), 0, &mut error_buf) };
        let errno = captured_errno();
        let message = if error_buf.is_null() {
            None
        } else {
            let text = unsafe { CStr::from_ptr(error_buf) }.to_string_lossy().into_owned();
            unsafe { sandbox_free_error(error_buf) };
            Some(text)
        };
        (rc, errno, message)
    }
}

#[cfg(not(target_os = "macos"))]
mod seatbelt {
    pub fn init_with_text(_text: &str) -> (i32, Option<i32>, Option<String>) {
        (
            -1,
            None,
            Some("sandbox facility unavailable on this platform".to_string()),
        )
    }
}
