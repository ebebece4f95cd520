//! Exported libc-named symbols. Only compiled into the preload object.

use core::ffi::{c_char, c_int, c_void};
use libc::mode_t;

use super::{global, Interceptor, LayerGuard, RealSymbols};

fn dispatch<R>(call: impl FnOnce(&Interceptor<'_>) -> R) -> R {
    let real = RealSymbols::get();
    let Some(_guard) = LayerGuard::enter() else {
        return call(&Interceptor::passthrough(real));
    };
    match global() {
        Some(state) => call(&state.interceptor(real)),
        None => call(&Interceptor::passthrough(real)),
    }
}

#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    dispatch(|layer| layer.open(path, flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn open64(path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    dispatch(|layer| layer.open64(path, flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn openat(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    dispatch(|layer| layer.openat(dirfd, path, flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn openat64(dirfd: c_int, path: *const c_char, flags: c_int, mode: mode_t) -> c_int {
    dispatch(|layer| layer.openat64(dirfd, path, flags, mode))
}

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    dispatch(|layer| layer.stat(path, buf))
}

#[no_mangle]
pub unsafe extern "C" fn stat64(path: *const c_char, buf: *mut libc::stat64) -> c_int {
    dispatch(|layer| layer.stat64(path, buf))
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    dispatch(|layer| layer.lstat(path, buf))
}

#[no_mangle]
pub unsafe extern "C" fn lstat64(path: *const c_char, buf: *mut libc::stat64) -> c_int {
    dispatch(|layer| layer.lstat64(path, buf))
}

#[no_mangle]
pub unsafe extern "C" fn fstatat(dirfd: c_int, path: *const c_char, buf: *mut libc::stat, flags: c_int) -> c_int {
    dispatch(|layer| layer.fstatat(dirfd, path, buf, flags))
}

#[no_mangle]
pub unsafe extern "C" fn fstatat64(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut libc::stat64,
    flags: c_int,
) -> c_int {
    dispatch(|layer| layer.fstatat64(dirfd, path, buf, flags))
}

#[no_mangle]
pub unsafe extern "C" fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int {
    Interceptor::passthrough(RealSymbols::get()).fstat(fd, buf)
}

#[no_mangle]
pub unsafe extern "C" fn fstat64(fd: c_int, buf: *mut libc::stat64) -> c_int {
    Interceptor::passthrough(RealSymbols::get()).fstat64(fd, buf)
}

#[no_mangle]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    dispatch(|layer| layer.access(path, mode))
}

#[no_mangle]
pub unsafe extern "C" fn faccessat(dirfd: c_int, path: *const c_char, mode: c_int, flags: c_int) -> c_int {
    dispatch(|layer| layer.faccessat(dirfd, path, mode, flags))
}

#[no_mangle]
pub unsafe extern "C" fn dlopen(path: *const c_char, flags: c_int) -> *mut c_void {
    dispatch(|layer| layer.dlopen(path, flags))
}

extern "C" fn preload_init() {
    let Some(_guard) = LayerGuard::enter() else {
        return;
    };
    let _ = RealSymbols::get();
    let _ = global();
}

#[used]
#[link_section = ".init_array"]
static PRELOAD_INIT: extern "C" fn() = preload_init;
