// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Directory entry points.

use libc::{c_char, c_int, mode_t, DIR};

use super::{fail_int, fail_ptr};
use crate::paths::with_translated;
use crate::state::real;

type ScandirFilter = Option<unsafe extern "C" fn(*const libc::dirent) -> c_int>;
type ScandirCompar =
    Option<unsafe extern "C" fn(*mut *const libc::dirent, *mut *const libc::dirent) -> c_int>;

#[no_mangle]
pub unsafe extern "C" fn chdir(path: *const c_char) -> c_int {
    let Some(real) = real!(b"chdir\0", fn(*const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p)) }
}

#[no_mangle]
pub unsafe extern "C" fn mkdir(path: *const c_char, mode: mode_t) -> c_int {
    let Some(real) = real!(b"mkdir\0", fn(*const c_char, mode_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, mode)) }
}

#[no_mangle]
pub unsafe extern "C" fn mkdirat(dirfd: c_int, path: *const c_char, mode: mode_t) -> c_int {
    let Some(real) = real!(b"mkdirat\0", fn(c_int, *const c_char, mode_t) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(dirfd, p, mode)) }
}

#[no_mangle]
pub unsafe extern "C" fn rmdir(path: *const c_char) -> c_int {
    let Some(real) = real!(b"rmdir\0", fn(*const c_char) -> c_int) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p)) }
}

#[no_mangle]
pub unsafe extern "C" fn opendir(path: *const c_char) -> *mut DIR {
    let Some(real) = real!(b"opendir\0", fn(*const c_char) -> *mut DIR) else {
        return fail_ptr();
    };
    unsafe { with_translated(path, |p| real(p)) }
}

#[no_mangle]
pub unsafe extern "C" fn scandir(
    path: *const c_char,
    namelist: *mut *mut *mut libc::dirent,
    filter: ScandirFilter,
    compar: ScandirCompar,
) -> c_int {
    let Some(real) = real!(
        b"scandir\0",
        fn(*const c_char, *mut *mut *mut libc::dirent, ScandirFilter, ScandirCompar) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, namelist, filter, compar)) }
}
