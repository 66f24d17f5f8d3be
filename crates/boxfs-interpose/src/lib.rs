// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! `LD_PRELOAD` path-argument translation for dynamically linked
//! programs running inside the container.
//!
//! Runtimes that cache their working directory at startup and issue
//! direct syscalls later would break if outputs were rewritten to the
//! host spelling, so translation is input-only: path arguments coming
//! from the caller are rewritten from host form to container form
//! before the real libc entry point runs. Anything that does not match
//! the host root passes through untouched, and any internal failure
//! falls back to the original argument.
//!
//! Statically linked programs, raw syscall users and `/proc/self/cwd`
//! readers are outside what a preload library can reach.

pub(crate) mod state;

pub mod paths;
pub use paths::translate_str;
pub use state::Mapping;

mod syscalls;
