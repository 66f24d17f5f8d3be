// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Host-to-container translation of single path arguments.

use std::ffi::{CStr, CString};

use libc::c_char;

use crate::state::Mapping;

#[cfg(test)]
#[path = "./paths_test.rs"]
mod paths_test;

/// Translate one path string when it begins with the host root.
///
/// The match is case-insensitive, treats `/` and `\` as the same
/// separator, and requires the prefix to end at a separator or at the
/// end of the string. Backslashes in the remainder become slashes.
pub fn translate_str(mapping: &Mapping, path: &str) -> Option<String> {
    let suffix = strip_host_prefix(path, &mapping.host_root)?;
    let mut out = String::with_capacity(mapping.container_root.len() + suffix.len());
    out.push_str(&mapping.container_root);
    for ch in suffix.chars() {
        out.push(if ch == '\\' { '/' } else { ch });
    }
    Some(out)
}

fn strip_host_prefix<'a>(path: &'a str, root: &str) -> Option<&'a str> {
    let pb = path.as_bytes();
    let rb = root.as_bytes();
    if pb.len() < rb.len() {
        return None;
    }
    for (i, &rc) in rb.iter().enumerate() {
        let pc = pb[i];
        let matched = if rc == b'/' {
            pc == b'/' || pc == b'\\'
        } else {
            pc.eq_ignore_ascii_case(&rc)
        };
        if !matched {
            return None;
        }
    }
    match pb.get(rb.len()) {
        None => Some(""),
        Some(b'/') | Some(b'\\') => Some(&path[rb.len()..]),
        // a longer sibling name, not this root
        Some(_) => None,
    }
}

/// Invoke `f` with the translated spelling of `path` when it matches
/// the host root, or the original pointer otherwise. The translated
/// allocation is freed after `f` returns; any failure along the way
/// degrades to the untouched argument.
pub(crate) unsafe fn with_translated<R>(
    path: *const c_char,
    f: impl FnOnce(*const c_char) -> R,
) -> R {
    if path.is_null() {
        return f(path);
    }
    let Some(mapping) = crate::state::mapping() else {
        return f(path);
    };
    let translated = unsafe { CStr::from_ptr(path) }
        .to_str()
        .ok()
        .and_then(|s| translate_str(mapping, s))
        .and_then(|s| CString::new(s).ok());
    match translated {
        Some(container) => f(container.as_ptr()),
        None => f(path),
    }
}

/// Two-argument variant for entry points taking a pair of paths.
pub(crate) unsafe fn with_translated2<R>(
    a: *const c_char,
    b: *const c_char,
    f: impl FnOnce(*const c_char, *const c_char) -> R,
) -> R {
    unsafe { with_translated(a, |a| with_translated(b, |b| f(a, b))) }
}
