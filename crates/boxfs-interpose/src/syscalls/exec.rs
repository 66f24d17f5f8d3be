// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Execution and resolution entry points.

use libc::{c_char, c_int};

use super::{fail_int, fail_ptr};
use crate::paths::with_translated;
use crate::state::real;

#[no_mangle]
pub unsafe extern "C" fn execve(
    path: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let Some(real) = real!(
        b"execve\0",
        fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated(path, |p| real(p, argv, envp)) }
}

#[no_mangle]
pub unsafe extern "C" fn execvp(file: *const c_char, argv: *const *const c_char) -> c_int {
    let Some(real) = real!(b"execvp\0", fn(*const c_char, *const *const c_char) -> c_int)
    else {
        return fail_int();
    };
    unsafe { with_translated(file, |f| real(f, argv)) }
}

#[no_mangle]
pub unsafe extern "C" fn execvpe(
    file: *const c_char,
    argv: *const *const c_char,
    envp: *const *const c_char,
) -> c_int {
    let Some(real) = real!(
        b"execvpe\0",
        fn(*const c_char, *const *const c_char, *const *const c_char) -> c_int
    ) else {
        return fail_int();
    };
    unsafe { with_translated(file, |f| real(f, argv, envp)) }
}

#[no_mangle]
pub unsafe extern "C" fn realpath(path: *const c_char, resolved: *mut c_char) -> *mut c_char {
    let Some(real) = real!(b"realpath\0", fn(*const c_char, *mut c_char) -> *mut c_char)
    else {
        return fail_ptr();
    };
    unsafe { with_translated(path, |p| real(p, resolved)) }
}
