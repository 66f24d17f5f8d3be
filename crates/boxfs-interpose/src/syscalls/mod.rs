// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! The intercepted libc entry points, grouped by family.
//!
//! Every wrapper follows the same discipline: resolve the real symbol
//! lazily, translate path arguments that match the host root, call
//! through, and free the translated allocation afterwards. A missing
//! real symbol fails with `ENOSYS`; every other internal failure
//! passes the original argument through untranslated.

use libc::c_int;

pub mod dir;
pub mod exec;
pub mod links;
pub mod mutate;
pub mod open;
pub mod stat;

pub(crate) fn set_errno(err: c_int) {
    unsafe {
        *libc::__errno_location() = err;
    }
}

/// Failure value for int-returning entry points whose real symbol
/// cannot be resolved.
pub(crate) fn fail_int() -> c_int {
    set_errno(libc::ENOSYS);
    -1
}

/// Failure value for pointer-returning entry points.
pub(crate) fn fail_ptr<T>() -> *mut T {
    set_errno(libc::ENOSYS);
    std::ptr::null_mut()
}
