// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Link entry points.

use libc::{c_char, c_int, size_t, ssize_t};

use super::fail_int;
use crate::paths::{with_translated, with_translated2};
use crate::state::real;

#[no_mangle]
pub unsafe extern "C" fn readlink(
    path: *const c_char,
    buf: *mut c_char,
    bufsiz: size_t,
) -> ssize_t {
    let Some(real) = real!(b"readlink\0", fn(*const c_char, *mut c_char, size_t) -> ssize_t)
    else {
        return fail_int() as ssize_t;
    };
    unsafe { with_translated(path, |p| real(p, buf, bufsiz)) }
}

#[no_mangle]
pub unsafe extern "C" fn readlinkat(
    dirfd: c_int,
    path: *const c_char,
    buf: *mut c_char,
    bufsiz: size_t,
) -> ssize_t {
    let Some(real) = real!(
        b"readlinkat\0",
        fn(c_int, *const c_char, *mut c_char, size_t) -> ssize_t
    ) else {
        return fail_int() as ssize_t;
    };
    unsafe { with_translated(path, |p| real(dirfd, p, buf, bufsiz)) }
}

#[no_mangle]
pub unsafe extern "C" fn symlink(target: *const c_char, linkpath: *const c_char) -> c_int {
    let Some(real) = real!(b"symlink\0", fn(*const c_char, *const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated2(target, linkpath, |t, l| real(t, l)) }
}

#[no_mangle]
pub unsafe extern "C" fn symlinkat(
    target: *const c_char,
    newdirfd: c_int,
    linkpath: *const c_char,
) -> c_int {
    let Some(real) = real!(b"symlinkat\0", fn(*const c_char, c_int, *const c_char) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated2(target, linkpath, |t, l| real(t, newdirfd, l)) }
}

#[no_mangle]
pub unsafe extern "C" fn link(old: *const c_char, new: *const c_char) -> c_int {
    let Some(real) = real!(b"link\0", fn(*const c_char, *const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated2(old, new, |o, n| real(o, n)) }
}

#[no_mangle]
pub unsafe extern "C" fn linkat(
    olddirfd: c_int,
    old: *const c_char,
    newdirfd: c_int,
    new: *const c_char,
    flags: c_int,
) -> c_int {
    let Some(real) = real!(
        b"linkat\0",
        fn(c_int, *const c_char, c_int, *const c_char, c_int) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated2(old, new, |o, n| real(olddirfd, o, newdirfd, n, flags)) }
}
