use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

pub fn errno_name(code: i32) -> String {
    let name = match code {
        0 => "OK",
        libc::EPERM => "EPERM",
        libc::EACCES => "EACCES",
        libc::ENOENT => "ENOENT",
        libc::ENOTDIR => "ENOTDIR",
        libc::ENOSPC => "ENOSPC",
        libc::EROFS => "EROFS",
        libc::EINVAL => "EINVAL",
        libc::ENOTSUP => "ENOTSUP",
        libc::EIO => "EIO",
        libc::EEXIST => "EEXIST",
        libc::EISDIR => "EISDIR",
        libc::EBADF => "EBADF",
        libc::ELOOP => "ELOOP",
        libc::ENAMETOOLONG => "ENAMETOOLONG",
        other => return format!("errno_{other}"),
    };
    name.to_string()
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn errno_location() -> *mut c_int {
    unsafe { libc::__error() }
}

#[cfg(target_os = "linux")]
fn errno_location() -> *mut c_int {
    unsafe { libc::__errno_location() }
}

#[cfg(target_os = "android")]
fn errno_location() -> *mut c_int {
    unsafe { libc::__errno() }
}

/// Zeroes the thread's errno so a value read after the next call belongs to it.
#[cfg(any(target_os = "macos", target_os = "ios", target_os = "linux", target_os = "android"))]
pub fn clear_errno() {
    unsafe {
        *errno_location() = 0;
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "linux", target_os = "android")))]
pub fn clear_errno() {}

pub fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Like `last_errno`, but a zero errno reads as "nothing captured".
pub fn captured_errno() -> Option<i32> {
    match last_errno() {
        0 => None,
        code => Some(code),
    }
}

/// strerror(3) text for `code`.
pub fn describe(code: i32) -> String {
    let mut buf = [0 as c_char; 256];
    let rc = unsafe { libc::strerror_r(code, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return format!("Unknown error: {code}");
    }
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}
