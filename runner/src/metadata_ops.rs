use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::raw::{c_char, c_int};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;

use crate::attr_payload::AttrPayload;
use crate::errno_names::{clear_errno, describe, last_errno};
use crate::json_contract::RunStatus;

unsafe extern "C" {
    fn lutimes(file: *const c_char, times: *const libc::timeval) -> c_int;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    #[value(name = "file-read-metadata")]
    FileReadMetadata,
    #[value(name = "file-write*")]
    FileWrite,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::FileReadMetadata => "file-read-metadata",
            Operation::FileWrite => "file-write*",
        }
    }

    pub fn default_syscall(self) -> &'static str {
        match self {
            Operation::FileReadMetadata => ReadCall::Lstat.name(),
            Operation::FileWrite => WriteCall::Chmod.name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCall {
    Lstat,
    Getattrlist,
    Setattrlist,
    Fstat,
}

impl ReadCall {
    pub const ALL: [ReadCall; 4] = [
        ReadCall::Lstat,
        ReadCall::Getattrlist,
        ReadCall::Setattrlist,
        ReadCall::Fstat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ReadCall::Lstat => "lstat",
            ReadCall::Getattrlist => "getattrlist",
            ReadCall::Setattrlist => "setattrlist",
            ReadCall::Fstat => "fstat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCall {
    Chmod,
    Utimes,
    Fchmod,
    Futimes,
    Lchown,
    Fchown,
    Fchownat,
    Lutimes,
}

impl WriteCall {
    pub const ALL: [WriteCall; 8] = [
        WriteCall::Chmod,
        WriteCall::Utimes,
        WriteCall::Fchmod,
        WriteCall::Futimes,
        WriteCall::Lchown,
        WriteCall::Fchown,
        WriteCall::Fchownat,
        WriteCall::Lutimes,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WriteCall::Chmod => "chmod",
            WriteCall::Utimes => "utimes",
            WriteCall::Fchmod => "fchmod",
            WriteCall::Futimes => "futimes",
            WriteCall::Lchown => "lchown",
            WriteCall::Fchown => "fchown",
            WriteCall::Fchownat => "fchownat",
            WriteCall::Lutimes => "lutimes",
        }
    }
}

/// One supported (operation, syscall) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataCall {
    Read(ReadCall),
    Write(WriteCall),
}

impl MetadataCall {
    /// `None` when `syscall` is not on the menu for `op`.
    pub fn resolve(op: Operation, syscall: &str) -> Option<Self> {
        match op {
            Operation::FileReadMetadata => ReadCall::ALL
                .into_iter()
                .find(|call| call.name() == syscall)
                .map(MetadataCall::Read),
            Operation::FileWrite => WriteCall::ALL
                .into_iter()
                .find(|call| call.name() == syscall)
                .map(MetadataCall::Write),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MetadataCall::Read(call) => call.name(),
            MetadataCall::Write(call) => call.name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpOutcome {
    pub status: RunStatus,
    pub errno: Option<i32>,
    pub message: Option<String>,
}

impl OpOutcome {
    fn ok(call: MetadataCall) -> Self {
        OpOutcome {
            status: RunStatus::Ok,
            errno: None,
            message: Some(format!("{}-ok", call.name())),
        }
    }

    fn failed(errno: i32, message: String) -> Self {
        OpOutcome {
            status: RunStatus::OpFailed,
            errno: Some(errno),
            message: Some(message),
        }
    }

    pub fn invalid(op: Operation, syscall: &str) -> Self {
        OpOutcome {
            status: RunStatus::InvalidOp,
            errno: None,
            message: Some(format!("unsupported {} syscall {syscall}", op.as_str())),
        }
    }
}

pub struct OpContext {
    pub chmod_mode: libc::mode_t,
    pub attr_payload: AttrPayload,
}

/// Reads errno right after a call returned `rc`.
fn settle(call: MetadataCall, rc: c_int) -> OpOutcome {
    if rc == 0 {
        return OpOutcome::ok(call);
    }
    let code = last_errno();
    OpOutcome::failed(code, describe(code))
}

fn open_fd(path: &CStr, flags: c_int) -> Result<OwnedFd, OpOutcome> {
    clear_errno();
    let fd = unsafe { libc::open(path.as_ptr(), flags) };
    if fd == -1 {
        return Err(OpOutcome::failed(last_errno(), "open failed".to_string()));
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn now_timevals() -> [libc::timeval; 2] {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let now = libc::timeval {
        tv_sec: secs as libc::time_t,
        tv_usec: 0,
    };
    [now, now]
}

/// Issues exactly one metadata call against `path`.
pub fn perform(call: MetadataCall, path: &Path, ctx: &OpContext) -> OpOutcome {
    let c_path = match CString::new(path.as_os_str().as_bytes()) {
        Ok(c_path) => c_path,
        Err(_) => {
            return OpOutcome::failed(libc::EINVAL, "path contains NUL byte".to_string());
        }
    };
    tracing::debug!(syscall = call.name(), path = %path.display(), "dispatching metadata call");
    match call {
        MetadataCall::Read(read) => perform_read(call, read, &c_path, ctx),
        MetadataCall::Write(write) => perform_write(call, write, &c_path, ctx),
    }
}

fn perform_read(call: MetadataCall, read: ReadCall, path: &CStr, ctx: &OpContext) -> OpOutcome {
    match read {
        ReadCall::Lstat => {
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            clear_errno();
            let rc = unsafe { libc::lstat(path.as_ptr(), &mut st) };
            settle(call, rc)
        }
        ReadCall::Fstat => {
            let fd = match open_fd(path, libc::O_RDONLY) {
                Ok(fd) => fd,
                Err(outcome) => return outcome,
            };
            let mut st: libc::stat = unsafe { std::mem::zeroed() };
            clear_errno();
            let rc = unsafe { libc::fstat(fd.as_raw_fd(), &mut st) };
            let outcome = settle(call, rc);
            drop(fd);
            outcome
        }
        ReadCall::Getattrlist => attrlist::get(call, path, &ctx.attr_payload),
        ReadCall::Setattrlist => attrlist::set(call, path, &ctx.attr_payload),
    }
}

fn perform_write(call: MetadataCall, write: WriteCall, path: &CStr, ctx: &OpContext) -> OpOutcome {
    match write {
        WriteCall::Chmod => {
            clear_errno();
            let rc = unsafe { libc::chmod(path.as_ptr(), ctx.chmod_mode) };
            settle(call, rc)
        }
        WriteCall::Utimes => {
            let times = now_timevals();
            clear_errno();
            let rc = unsafe { libc::utimes(path.as_ptr(), times.as_ptr()) };
            settle(call, rc)
        }
        WriteCall::Lutimes => {
            let times = now_timevals();
            clear_errno();
            let rc = unsafe { lutimes(path.as_ptr(), times.as_ptr()) };
            settle(call, rc)
        }
        WriteCall::Lchown => {
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            clear_errno();
            let rc = unsafe { libc::lchown(path.as_ptr(), uid, gid) };
            settle(call, rc)
        }
        WriteCall::Fchownat => {
            let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
            clear_errno();
            let rc = unsafe { libc::fchownat(libc::AT_FDCWD, path.as_ptr(), uid, gid, 0) };
            settle(call, rc)
        }
        WriteCall::Fchmod | WriteCall::Futimes | WriteCall::Fchown => {
            let fd = match open_fd(path, libc::O_WRONLY) {
                Ok(fd) => fd,
                Err(outcome) => return outcome,
            };
            let raw = fd.as_raw_fd();
            let rc = match write {
                WriteCall::Fchmod => {
                    clear_errno();
                    unsafe { libc::fchmod(raw, ctx.chmod_mode) }
                }
                WriteCall::Futimes => {
                    let times = now_timevals();
                    clear_errno();
                    unsafe { libc::futimes(raw, times.as_ptr()) }
                }
                _ => {
                    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
                    clear_errno();
                    unsafe { libc::fchown(raw, uid, gid) }
                }
            };
            let outcome = settle(call, rc);
            drop(fd);
            outcome
        }
    }
}

#[cfg(target_os = "macos")]
mod attrlist {
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_int, c_uint, c_void};

    use super::{MetadataCall, OpOutcome, settle};
    use crate::attr_payload::AttrPayload;
    use crate::errno_names::clear_errno;

    unsafe extern "C" {
        fn getattrlist(
            path: *const c_char,
            attr_list: *mut c_void,
            attr_buf: *mut c_void,
            attr_buf_size: usize,
            options: c_uint,
        ) -> c_int;
        fn setattrlist(
            path: *const c_char,
            attr_list: *mut c_void,
            attr_buf: *mut c_void,
            attr_buf_size: usize,
            options: c_uint,
        ) -> c_int;
    }

    pub fn get(call: MetadataCall, path: &CStr, payload: &AttrPayload) -> OpOutcome {
        let mut list = payload.list;
        let mut buffer = payload.buffer.clone();
        clear_errno();
        let rc = unsafe {
            getattrlist(
                path.as_ptr(),
                (&mut list as *mut _ as *mut c_void),
                buffer.as_mut_ptr().cast::<c_void>(),
                buffer.len(),
                0,
            )
        };
        settle(call, rc)
    }

    pub fn set(call: MetadataCall, path: &CStr, payload: &AttrPayload) -> OpOutcome {
        let mut list = payload.list;
        let mut buffer = payload.buffer.clone();
        clear_errno();
        let rc = unsafe {
            setattrlist(
                path.as_ptr(),
                (&mut list as *mut _ as *mut c_void),
                buffer.as_mut_ptr().cast::<c_void>(),
                buffer.len(),
                0,
            )
        };
        settle(call, rc)
    }
}

#[cfg(not(target_os = "macos"))]
mod attrlist {
    use std::ffi::CStr;

    use super::{MetadataCall, OpOutcome};
    use crate::attr_payload::AttrPayload;
    use crate::errno_names::describe;

    pub fn get(_call: MetadataCall, _path: &CStr, _payload: &AttrPayload) -> OpOutcome {
        OpOutcome::failed(libc::ENOTSUP, describe(libc::ENOTSUP))
    }

    pub fn set(_call: MetadataCall, _path: &CStr, _payload: &AttrPayload) -> OpOutcome {
        OpOutcome::failed(libc::ENOTSUP, describe(libc::ENOTSUP))
    }
}
