// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Path translation between host and container views of a project:
//! the mapping model, the in-flight content transform, the caches
//! behind the overlay filesystem, the mount plumbing, and the
//! container launch-argument assembly.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable carrying the `PATH_MAP` string into the container.
pub const ENV_PATH_MAP: &str = "BOXFS_PATH_MAP";
/// Environment variable carrying the `DIR_MAP` string into the container.
pub const ENV_DIR_MAP: &str = "BOXFS_DIR_MAP";
/// Environment variable carrying the original host spelling of the
/// project root; the syscall interposer is inactive when unset.
pub const ENV_HOST_ROOT: &str = "BOXFS_HOST_ROOT";
/// Environment variable carrying the transform trace level.
pub const ENV_TRACE: &str = "BOXFS_TRACE";

pub mod cache;
pub mod env;
pub mod launch;
pub mod mapping;
pub mod transform;

mod error;
pub use error::{Error, Result};

mod config;
pub use self::config::{get_config, load_config, Config, DEFAULT_EXTENSIONS};

pub use cache::CacheBundle;
pub use mapping::{
    parse_dir_map, parse_path_map, DirMapping, ExtensionSet, MountConfig, PathKind, PathMapping,
};
pub use transform::{quick_scan, to_container, to_host};
