// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! One-shot interposer state: the host/container root pair and the
//! lazily resolved real libc entry points.
//!
//! Nothing here runs at load time. The first intercepted call resolves
//! what it needs, so constructor-order hazards and recursion through
//! intercepted functions cannot occur.

use std::ffi::CStr;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{c_char, c_void};
use once_cell::sync::OnceCell;

/// The env var carrying the original host spelling of the project
/// root. The interposer stays inactive when it is unset or empty.
pub const ENV_HOST_ROOT: &str = "BOXFS_HOST_ROOT";

/// A lazily resolved real libc symbol, cached after the first lookup.
pub struct RealSym {
    name: &'static [u8],
    ptr: AtomicPtr<c_void>,
}

impl RealSym {
    /// `name` must be nul-terminated.
    pub const fn new(name: &'static [u8]) -> Self {
        Self {
            name,
            ptr: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub fn get(&self) -> *mut c_void {
        let cached = self.ptr.load(Ordering::Acquire);
        if !cached.is_null() {
            return cached;
        }
        // concurrent first calls race benignly: dlsym is idempotent
        let found = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr().cast()) };
        if !found.is_null() {
            self.ptr.store(found, Ordering::Release);
        }
        found
    }
}

/// Resolve a real libc entry point as a typed function pointer, or
/// `None` when the symbol cannot be found.
macro_rules! real {
    ($name:literal, fn($($arg:ty),* $(,)?) -> $ret:ty) => {{
        static SYM: $crate::state::RealSym = $crate::state::RealSym::new($name);
        let ptr = SYM.get();
        if ptr.is_null() {
            None
        } else {
            Some(unsafe {
                std::mem::transmute::<
                    *mut libc::c_void,
                    unsafe extern "C" fn($($arg),*) -> $ret,
                >(ptr)
            })
        }
    }};
}
pub(crate) use real;

/// The single translation pair: prefix matches of `host_root` are
/// rewritten onto `container_root`.
#[derive(Debug, Clone)]
pub struct Mapping {
    pub host_root: String,
    pub container_root: String,
}

static MAPPING: OnceCell<Option<Mapping>> = OnceCell::new();

/// The active mapping, captured on first use: host root from the
/// environment, container root from the *real* `getcwd` so the lookup
/// cannot recurse through the interposer.
pub fn mapping() -> Option<&'static Mapping> {
    MAPPING.get_or_init(load_mapping).as_ref()
}

fn load_mapping() -> Option<Mapping> {
    let raw = std::env::var(ENV_HOST_ROOT).ok()?;
    if raw.is_empty() {
        return None;
    }
    let host_root: String = raw
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();
    let host_root = host_root.trim_end_matches('/').to_string();
    if host_root.is_empty() {
        return None;
    }
    let container_root = real_getcwd()?;
    Some(Mapping {
        host_root,
        container_root,
    })
}

fn real_getcwd() -> Option<String> {
    let Some(real) = real!(b"getcwd\0", fn(*mut c_char, libc::size_t) -> *mut c_char) else {
        return None;
    };
    let mut buf = [0u8; libc::PATH_MAX as usize];
    let res = unsafe { real(buf.as_mut_ptr().cast(), buf.len()) };
    if res.is_null() {
        return None;
    }
    let cwd = unsafe { CStr::from_ptr(buf.as_ptr().cast()) };
    cwd.to_str()
        .ok()
        .map(|s| s.trim_end_matches('/').to_string())
}
