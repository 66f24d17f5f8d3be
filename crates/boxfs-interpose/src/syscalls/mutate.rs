// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Mutation and permission entry points.

use libc::{c_char, c_int, c_uint, gid_t, mode_t, off_t, uid_t};

use super::fail_int;
use crate::paths::{with_translated, with_translated2};
use crate::state::real;

#[no_mangle]
pub unsafe extern "C" fn unlink(path: *const c_char) -> c_int {
    let Some(real) = real!(b"unlink\0", fn(*const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p)) }
}

#[no_mangle]
pub unsafe extern "C" fn unlinkat(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int {
    let Some(real) = real!(b"unlinkat\0", fn(c_int, *const c_char, c_int) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, flags)) }
}

#[no_mangle]
pub unsafe extern "C" fn rename(old: *const c_char, new: *const c_char) -> c_int {
    let Some(real) = real!(b"rename\0", fn(*const c_char, *const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated2(old, new, |o, n| real(o, n)) }
}

#[no_mangle]
pub unsafe extern "C" fn renameat(
    olddirfd: c_int,
    old: *const c_char,
    newdirfd: c_int,
    new: *const c_char,
) -> c_int {
    let Some(real) =
        real!(b"renameat\0", fn(c_int, *const c_char, c_int, *const c_char) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated2(old, new, |o, n| real(olddirfd, o, newdirfd, n)) }
}

#[no_mangle]
pub unsafe extern "C" fn renameat2(
    olddirfd: c_int,
    old: *const c_char,
    newdirfd: c_int,
    new: *const c_char,
    flags: c_uint,
) -> c_int {
    let Some(real) = real!(
        b"renameat2\0",
        fn(c_int, *const c_char, c_int, *const c_char, c_uint) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated2(old, new, |o, n| real(olddirfd, o, newdirfd, n, flags)) }
}

#[no_mangle]
pub unsafe extern "C" fn truncate(path: *const c_char, length: off_t) -> c_int {
    let Some(real) = real!(b"truncate\0", fn(*const c_char, off_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, length)) }
}

#[no_mangle]
pub unsafe extern "C" fn utimensat(
    dirfd: c_int,
    path: *const c_char,
    times: *const libc::timespec,
    flags: c_int,
) -> c_int {
    let Some(real) = real!(
        b"utimensat\0",
        fn(c_int, *const c_char, *const libc::timespec, c_int) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, times, flags)) }
}

#[no_mangle]
pub unsafe extern "C" fn chmod(path: *const c_char, mode: mode_t) -> c_int {
    let Some(real) = real!(b"chmod\0", fn(*const c_char, mode_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, mode)) }
}

#[no_mangle]
pub unsafe extern "C" fn fchmodat(
    dirfd: c_int,
    path: *const c_char,
    mode: mode_t,
    flags: c_int,
) -> c_int {
    let Some(real) = real!(b"fchmodat\0", fn(c_int, *const c_char, mode_t, c_int) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, mode, flags)) }
}

#[no_mangle]
pub unsafe extern "C" fn chown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int {
    let Some(real) = real!(b"chown\0", fn(*const c_char, uid_t, gid_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, owner, group)) }
}

#[no_mangle]
pub unsafe extern "C" fn lchown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int {
    let Some(real) = real!(b"lchown\0", fn(*const c_char, uid_t, gid_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, owner, group)) }
}

#[no_mangle]
pub unsafe extern "C" fn fchownat(
    dirfd: c_int,
    path: *const c_char,
    owner: uid_t,
    group: gid_t,
    flags: c_int,
) -> c_int {
    let Some(real) = real!(
        b"fchownat\0",
        fn(c_int, *const c_char, uid_t, gid_t, c_int) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, owner, group, flags)) }
}
