//! dlopen() through the same resolution pipeline as open().
//!
//! Only the path handed to the real loader changes. dlsym and dlclose act on
//! genuine loader handles and are never interposed.

use core::ffi::{c_char, c_int, c_void, CStr};
use std::cell::Cell;

use super::hooks::{c_path, errno, set_errno, show, Interceptor};
use crate::common::types::{LocalAttempt, Resolution};

const GLIBC_NOT_FOUND: &[u8] = b": cannot open shared object file: No such file or directory";
const MUSL_PREFIX: &[u8] = b"Error loading shared library ";
const MUSL_NOT_FOUND: &[u8] = b": No such file or directory";

impl Interceptor<'_> {
    /// # Safety
    /// `path` must be null or a valid NUL-terminated string.
    pub unsafe fn dlopen(&self, path: *const c_char, flags: c_int) -> *mut c_void {
        let Some(real) = self.real.dlopen else {
            set_errno(libc::ENOSYS);
            return std::ptr::null_mut();
        };
        let Some(resolver) = self.resolver else {
            return real(path, flags);
        };
        // A null path asks for the main program; RTLD_NOLOAD only queries
        // what is already mapped.
        if path.is_null() || flags & libc::RTLD_NOLOAD != 0 {
            return real(path, flags);
        }
        let bytes = CStr::from_ptr(path).to_bytes();
        // Set once the loader's error message has been read and cleared.
        let consumed = Cell::new(false);

        let resolution = resolver.resolve(bytes, || {
            let handle = real(path, flags);
            if !handle.is_null() {
                return LocalAttempt::Hit(handle);
            }
            if bytes.contains(&b'/') {
                return if self.file_absent(path) {
                    LocalAttempt::Absent(handle)
                } else {
                    LocalAttempt::Hit(handle)
                };
            }
            consumed.set(true);
            if self.search_exhausted(bytes) {
                LocalAttempt::Absent(handle)
            } else {
                // Loading again puts the loader's own error back in place.
                consumed.set(false);
                LocalAttempt::Hit(real(path, flags))
            }
        });

        let fail = |code: c_int| {
            if consumed.get() {
                let handle = real(path, flags);
                if !handle.is_null() {
                    return handle;
                }
            }
            set_errno(code);
            std::ptr::null_mut()
        };

        match resolution {
            Resolution::Native(handle) => handle,
            Resolution::Redirect(target) => {
                log::debug!("dlopen {} -> {}", show(bytes), target.display());
                match c_path(&target) {
                    Some(target) => real(target.as_ptr(), flags),
                    None => fail(libc::EIO),
                }
            }
            Resolution::NotFound => fail(libc::ENOENT),
            Resolution::Failed(kind) => fail(kind.errno()),
        }
    }

    /// The loader reports failures through dlerror(), not errno, so a path
    /// is checked with access() directly.
    unsafe fn file_absent(&self, path: *const c_char) -> bool {
        let Some(access) = self.real.access else {
            return false;
        };
        let saved = errno();
        let absent = access(path, libc::F_OK) == -1 && errno() == libc::ENOENT;
        set_errno(saved);
        absent
    }

    /// A bare name is absent only when the loader says it found no file by
    /// that name. Reading the message clears it.
    unsafe fn search_exhausted(&self, name: &[u8]) -> bool {
        let Some(dlerror) = self.real.dlerror else {
            return false;
        };
        let message = dlerror();
        if message.is_null() {
            return false;
        }
        names_missing_library(CStr::from_ptr(message).to_bytes(), name)
    }
}

/// Matches glibc's and musl's wording for a library that was searched for and
/// not found. Messages about a missing dependency name the dependency, and
/// musl appends the object that needed it, so neither matches.
fn names_missing_library(message: &[u8], name: &[u8]) -> bool {
    let glibc = message
        .strip_prefix(name)
        .is_some_and(|rest| rest == GLIBC_NOT_FOUND);
    let musl = message
        .strip_prefix(MUSL_PREFIX)
        .and_then(|rest| rest.strip_prefix(name))
        .is_some_and(|rest| rest == MUSL_NOT_FOUND);
    glibc || musl
}
