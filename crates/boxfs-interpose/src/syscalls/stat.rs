// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! File-information entry points.

use libc::{c_char, c_int, c_uint};

use super::fail_int;
use crate::paths::with_translated;
use crate::state::real;

#[no_mangle]
pub unsafe extern "C" fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(real) = real!(b"stat\0", fn(*const c_char, *mut libc::stat) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, buf)) }
}

#[no_mangle]
pub unsafe extern "C" fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(real) = real!(b"lstat\0", fn(*const c_char, *mut libc::stat) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, buf)) }
}

#[no_mangle]
pub unsafe extern "C" fn __xstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(real) = real!(b"__xstat\0", fn(c_int, *const c_char, *mut libc::stat) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(ver, p, buf)) }
}

#[no_mangle]
pub unsafe extern "C" fn __lxstat(ver: c_int, path: *const c_char, buf: *mut libc::stat) -> c_int {
    let Some(real) = real!(b"__lxstat\0", fn(c_int, *const c_char, *mut libc::stat) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(ver, p, buf)) }
}

#[no_mangle]
pub unsafe extern "C" fn access(path: *const c_char, mode: c_int) -> c_int {
    let Some(real) = real!(b"access\0", fn(*const c_char, c_int) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, mode)) }
}

#[no_mangle]
pub unsafe extern "C" fn faccessat(
    dirfd: c_int,
    path: *const c_char,
    mode: c_int,
    flags: c_int,
) -> c_int {
    let Some(real) = real!(b"faccessat\0", fn(c_int, *const c_char, c_int, c_int) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, mode, flags)) }
}

#[no_mangle]
pub unsafe extern "C" fn statx(
    dirfd: c_int,
    path: *const c_char,
    flags: c_int,
    mask: c_uint,
    buf: *mut libc::statx,
) -> c_int {
    let Some(real) =
        real!(b"statx\0", fn(c_int, *const c_char, c_int, c_uint, *mut libc::statx) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, flags, mask, buf)) }
}
