//! ABI-compatible replacements for the path-taking libc calls.
//!
//! Every method mirrors the C prototype of the call it replaces and keeps its
//! failure convention: `-1` plus `errno`, or a null handle for `dlopen`.

use core::ffi::{c_char, c_int, CStr};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use libc::mode_t;

use super::symbols::RealSymbols;
use crate::common::types::{LocalAttempt, Resolution, ResolutionPolicy};
use crate::resolver::PathResolver;

const WRITE_FLAGS: c_int = libc::O_WRONLY | libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC;

/// What the caller intends to do with the path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(super) enum Intent {
    Read,
    /// open() that may create or modify the file.
    Modify,
    /// access() asking for `W_OK`.
    CheckWrite,
}

/// Routes hooked calls through the resolver and into the real libc.
///
/// Without a resolver every call is forwarded untouched; that is the mode
/// used on re-entry and when the layer could not be set up.
#[derive(Clone, Copy)]
pub struct Interceptor<'a> {
    pub(super) real: &'a RealSymbols,
    pub(super) resolver: Option<PathResolver<'a>>,
}

impl<'a> Interceptor<'a> {
    pub fn new(real: &'a RealSymbols, resolver: PathResolver<'a>) -> Self {
        Self {
            real,
            resolver: Some(resolver),
        }
    }

    pub fn passthrough(real: &'a RealSymbols) -> Self {
        Self { real, resolver: None }
    }

    /// # Safety
    /// `path` must be null or a valid NUL-terminated string.
    pub unsafe fn open(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let Some(real) = self.real.open else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, open_intent(flags), |p| real(p, flags, mode))
    }

    /// # Safety
    /// See [`Interceptor::open`].
    pub unsafe fn open64(&self, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let Some(real) = self.real.open64 else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, open_intent(flags), |p| real(p, flags, mode))
    }

    /// # Safety
    /// See [`Interceptor::open`].
    pub unsafe fn openat(&self, dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let Some(real) = self.real.openat else {
            return fail(libc::ENOSYS);
        };
        if relative_to_dirfd(dirfd, path) {
            return real(dirfd, path, flags, mode);
        }
        self.route_int(path, open_intent(flags), |p| real(dirfd, p, flags, mode))
    }

    /// # Safety
    /// See [`Interceptor::open`].
    pub unsafe fn openat64(&self, dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
        let Some(real) = self.real.openat64 else {
            return fail(libc::ENOSYS);
        };
        if relative_to_dirfd(dirfd, path) {
            return real(dirfd, path, flags, mode);
        }
        self.route_int(path, open_intent(flags), |p| real(dirfd, p, flags, mode))
    }

    /// # Safety
    /// `path` as for [`Interceptor::open`]; `buf` must be valid for writes.
    pub unsafe fn stat(&self, path: *const c_char, buf: *mut libc::stat) -> c_int {
        let Some(real) = self.real.stat else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, Intent::Read, |p| real(p, buf))
    }

    /// # Safety
    /// See [`Interceptor::stat`].
    pub unsafe fn stat64(&self, path: *const c_char, buf: *mut libc::stat64) -> c_int {
        let Some(real) = self.real.stat64 else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, Intent::Read, |p| real(p, buf))
    }

    /// # Safety
    /// See [`Interceptor::stat`].
    pub unsafe fn lstat(&self, path: *const c_char, buf: *mut libc::stat) -> c_int {
        let Some(real) = self.real.lstat else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, Intent::Read, |p| real(p, buf))
    }

    /// # Safety
    /// See [`Interceptor::stat`].
    pub unsafe fn lstat64(&self, path: *const c_char, buf: *mut libc::stat64) -> c_int {
        let Some(real) = self.real.lstat64 else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, Intent::Read, |p| real(p, buf))
    }

    /// # Safety
    /// See [`Interceptor::stat`].
    pub unsafe fn fstatat(&self, dirfd: c_int, path: *const c_char, buf: *mut libc::stat, flags: c_int) -> c_int {
        let Some(real) = self.real.fstatat else {
            return fail(libc::ENOSYS);
        };
        if relative_to_dirfd(dirfd, path) {
            return real(dirfd, path, buf, flags);
        }
        self.route_int(path, Intent::Read, |p| real(dirfd, p, buf, flags))
    }

    /// # Safety
    /// See [`Interceptor::stat`].
    pub unsafe fn fstatat64(
        &self,
        dirfd: c_int,
        path: *const c_char,
        buf: *mut libc::stat64,
        flags: c_int,
    ) -> c_int {
        let Some(real) = self.real.fstatat64 else {
            return fail(libc::ENOSYS);
        };
        if relative_to_dirfd(dirfd, path) {
            return real(dirfd, path, buf, flags);
        }
        self.route_int(path, Intent::Read, |p| real(dirfd, p, buf, flags))
    }

    /// Descriptor calls never consult the resolver.
    ///
    /// # Safety
    /// `buf` must be valid for writes.
    pub unsafe fn fstat(&self, fd: c_int, buf: *mut libc::stat) -> c_int {
        match self.real.fstat {
            Some(real) => real(fd, buf),
            None => fail(libc::ENOSYS),
        }
    }

    /// # Safety
    /// `buf` must be valid for writes.
    pub unsafe fn fstat64(&self, fd: c_int, buf: *mut libc::stat64) -> c_int {
        match self.real.fstat64 {
            Some(real) => real(fd, buf),
            None => fail(libc::ENOSYS),
        }
    }

    /// # Safety
    /// See [`Interceptor::open`].
    pub unsafe fn access(&self, path: *const c_char, mode: c_int) -> c_int {
        let Some(real) = self.real.access else {
            return fail(libc::ENOSYS);
        };
        self.route_int(path, access_intent(mode), |p| real(p, mode))
    }

    /// # Safety
    /// See [`Interceptor::open`].
    pub unsafe fn faccessat(&self, dirfd: c_int, path: *const c_char, mode: c_int, flags: c_int) -> c_int {
        let Some(real) = self.real.faccessat else {
            return fail(libc::ENOSYS);
        };
        if relative_to_dirfd(dirfd, path) {
            return real(dirfd, path, mode, flags);
        }
        self.route_int(path, access_intent(mode), |p| real(dirfd, p, mode, flags))
    }

    /// Shared routing for every call that returns `-1`/`errno` on failure.
    ///
    /// `call` is the real implementation bound to all arguments but the path;
    /// it runs at most once on the original path and at most once on a
    /// materialized copy.
    unsafe fn route_int<F>(&self, path: *const c_char, intent: Intent, call: F) -> c_int
    where
        F: Fn(*const c_char) -> c_int,
    {
        let Some(resolver) = self.resolver else {
            return call(path);
        };
        if path.is_null() {
            return call(path);
        }
        let bytes = CStr::from_ptr(path).to_bytes();

        if intent == Intent::Modify {
            return match resolver.policy(bytes) {
                ResolutionPolicy::RemoteForced => {
                    log::debug!("{}: write access to the remote namespace refused", show(bytes));
                    fail(libc::EROFS)
                }
                _ => call(path),
            };
        }

        let resolution = resolver.resolve(bytes, || {
            let rc = call(path);
            let err = errno();
            if rc == -1 && err == libc::ENOENT {
                LocalAttempt::Absent((rc, err))
            } else {
                LocalAttempt::Hit((rc, err))
            }
        });

        match resolution {
            Resolution::Native((rc, err)) => {
                if rc == -1 {
                    set_errno(err);
                }
                rc
            }
            Resolution::Redirect(target) => {
                if intent == Intent::CheckWrite {
                    return fail(libc::EROFS);
                }
                log::trace!("{} -> {}", show(bytes), target.display());
                match c_path(&target) {
                    Some(target) => call(target.as_ptr()),
                    None => fail(libc::EIO),
                }
            }
            Resolution::NotFound => fail(libc::ENOENT),
            Resolution::Failed(kind) => fail(kind.errno()),
        }
    }
}

fn open_intent(flags: c_int) -> Intent {
    if flags & WRITE_FLAGS != 0 {
        Intent::Modify
    } else {
        Intent::Read
    }
}

fn access_intent(mode: c_int) -> Intent {
    if mode & libc::W_OK != 0 {
        Intent::CheckWrite
    } else {
        Intent::Read
    }
}

/// A relative path resolved against a directory descriptor names nothing the
/// remote side could know about; such calls are forwarded untouched.
unsafe fn relative_to_dirfd(dirfd: c_int, path: *const c_char) -> bool {
    dirfd != libc::AT_FDCWD && !path.is_null() && *path != b'/' as c_char
}

pub(super) fn c_path(path: &Path) -> Option<CString> {
    CString::new(path.as_os_str().as_bytes()).ok()
}

pub(super) fn show(path: &[u8]) -> std::borrow::Cow<'_, str> {
    String::from_utf8_lossy(path)
}

pub(crate) fn errno() -> c_int {
    // SAFETY: __errno_location always returns the calling thread's errno slot.
    unsafe { *libc::__errno_location() }
}

pub(crate) fn set_errno(value: c_int) {
    // SAFETY: as above.
    unsafe { *libc::__errno_location() = value }
}

pub(super) fn fail(code: c_int) -> c_int {
    set_errno(code);
    -1
}
