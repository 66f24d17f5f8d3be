// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! The path-translating overlay filesystem.
//!
//! Mounts over an existing directory (reading the real bytes through an
//! auxiliary bind mount), remaps encoded project directory names at the
//! filesystem boundary, and transforms host path spellings inside
//! JSON/JSONL contents in flight in both directions.

mod error;
pub use error::Error;

mod fuse;
pub use fuse::{Config, Session};
