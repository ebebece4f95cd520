//! Table of the real (non-interposed) implementations of every hooked call.

use core::ffi::{c_char, c_int, c_void, CStr};
use libc::mode_t;
use std::sync::OnceLock;

pub type OpenFn = unsafe extern "C" fn(*const c_char, c_int, mode_t) -> c_int;
pub type OpenatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, mode_t) -> c_int;
pub type StatFn = unsafe extern "C" fn(*const c_char, *mut libc::stat) -> c_int;
pub type Stat64Fn = unsafe extern "C" fn(*const c_char, *mut libc::stat64) -> c_int;
pub type FstatatFn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat, c_int) -> c_int;
pub type Fstatat64Fn = unsafe extern "C" fn(c_int, *const c_char, *mut libc::stat64, c_int) -> c_int;
pub type FstatFn = unsafe extern "C" fn(c_int, *mut libc::stat) -> c_int;
pub type Fstat64Fn = unsafe extern "C" fn(c_int, *mut libc::stat64) -> c_int;
pub type AccessFn = unsafe extern "C" fn(*const c_char, c_int) -> c_int;
pub type FaccessatFn = unsafe extern "C" fn(c_int, *const c_char, c_int, c_int) -> c_int;
pub type DlopenFn = unsafe extern "C" fn(*const c_char, c_int) -> *mut c_void;
pub type DlerrorFn = unsafe extern "C" fn() -> *mut c_char;

/// A missing entry means the symbol does not exist in this libc; the hook
/// then fails with `ENOSYS` instead of crashing the host.
#[derive(Clone, Copy, Default)]
pub struct RealSymbols {
    pub open: Option<OpenFn>,
    pub open64: Option<OpenFn>,
    pub openat: Option<OpenatFn>,
    pub openat64: Option<OpenatFn>,
    pub stat: Option<StatFn>,
    pub stat64: Option<Stat64Fn>,
    pub lstat: Option<StatFn>,
    pub lstat64: Option<Stat64Fn>,
    pub fstatat: Option<FstatatFn>,
    pub fstatat64: Option<Fstatat64Fn>,
    pub fstat: Option<FstatFn>,
    pub fstat64: Option<Fstat64Fn>,
    pub access: Option<AccessFn>,
    pub faccessat: Option<FaccessatFn>,
    pub dlopen: Option<DlopenFn>,
    pub dlerror: Option<DlerrorFn>,
}

static REAL: OnceLock<RealSymbols> = OnceLock::new();

impl RealSymbols {
    /// Process-wide table, resolved on first use. Concurrent first callers
    /// block until the single resolution finishes.
    pub fn get() -> &'static RealSymbols {
        REAL.get_or_init(Self::next_in_search_order)
    }

    /// Looks every symbol up with `RTLD_NEXT`, i.e. in the objects loaded
    /// after this one.
    pub fn next_in_search_order() -> Self {
        // SAFETY: each alias matches the C prototype of the symbol it is
        // looked up under.
        unsafe {
            Self {
                open: next(c"open"),
                open64: next(c"open64"),
                openat: next(c"openat"),
                openat64: next(c"openat64"),
                stat: next(c"stat"),
                stat64: next(c"stat64"),
                lstat: next(c"lstat"),
                lstat64: next(c"lstat64"),
                fstatat: next(c"fstatat"),
                fstatat64: next(c"fstatat64"),
                fstat: next(c"fstat"),
                fstat64: next(c"fstat64"),
                access: next(c"access"),
                faccessat: next(c"faccessat"),
                dlopen: next(c"dlopen"),
                dlerror: next(c"dlerror"),
            }
        }
    }

    /// Binds straight to the libc this crate links against. Only meaningful
    /// when the crate does not export the interposing symbols itself.
    #[cfg(not(feature = "preload"))]
    pub fn linked() -> Self {
        Self {
            open: Some(linked_open),
            open64: Some(linked_open64),
            openat: Some(linked_openat),
            openat64: Some(linked_openat64),
            stat: Some(libc::stat),
            stat64: Some(libc::stat64),
            lstat: Some(libc::lstat),
            lstat64: Some(libc::lstat64),
            fstatat: Some(libc::fstatat),
            fstatat64: Some(libc::fstatat64),
            fstat: Some(libc::fstat),
            fstat64: Some(libc::fstat64),
            access: Some(libc::access),
            faccessat: Some(libc::faccessat),
            dlopen: Some(libc::dlopen),
            dlerror: Some(libc::dlerror),
        }
    }
}

unsafe fn next<F: Copy>(name: &CStr) -> Option<F> {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
    let ptr = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
    if ptr.is_null() {
        return None;
    }
    Some(std::mem::transmute_copy::<*mut c_void, F>(&ptr))
}

// open and openat are variadic in C; these give them a fixed arity.
#[cfg(not(feature = "preload"))]
unsafe extern "C" fn linked_open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    libc::open(path, flags, mode)
}

#[cfg(not(feature = "preload"))]
unsafe extern "C" fn linked_open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    libc::open64(path, flags, mode)
}

#[cfg(not(feature = "preload"))]
unsafe extern "C" fn linked_openat(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    libc::openat(dirfd, path, flags, mode)
}

#[cfg(not(feature = "preload"))]
unsafe extern "C" fn linked_openat64(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    libc::openat64(dirfd, path, flags, mode)
}
