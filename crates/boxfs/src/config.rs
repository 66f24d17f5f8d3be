// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// Extensions whose contents are transformed when no override is given.
pub const DEFAULT_EXTENSIONS: &str = "json,jsonl";

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Filesystem {
    /// Comma-separated extension list eligible for content transform.
    pub extensions: String,
    /// Transform trace level, 0..=2.
    pub trace: u8,
}

impl Default for Filesystem {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.to_string(),
            trace: 0,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Container {
    pub memory: String,
    pub cpus: f64,
    pub cpu_shares: u32,
    pub pids_limit: u32,
    pub tmp_size: String,
    pub var_tmp_size: String,
    pub run_size: String,
    /// Prefix for derived image and container names.
    pub name_prefix: String,
    /// Set when the platform cannot mount FUSE without a privileged
    /// container; drops the capability restrictions in that branch.
    pub privileged: bool,
}

impl Default for Container {
    fn default() -> Self {
        Self {
            memory: "4g".to_string(),
            cpus: 2.0,
            cpu_shares: 512,
            pids_limit: 2048,
            tmp_size: "512m".to_string(),
            var_tmp_size: "256m".to_string(),
            run_size: "64m".to_string(),
            name_prefix: "boxfs".to_string(),
            privileged: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub filesystem: Filesystem,
    pub container: Container,
}

static CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    /// The current loaded config, loading it lazily on first access.
    pub fn current() -> Result<&'static Self> {
        CONFIG.get_or_try_init(load_config)
    }
}

/// Load the boxfs configuration from the environment.
///
/// Every field can be overridden with a `BOXFS_`-prefixed variable,
/// eg `BOXFS_CONTAINER__MEMORY=8g` or `BOXFS_FILESYSTEM__TRACE=2`.
pub fn load_config() -> Result<Config> {
    let settings = config::Config::builder()
        .add_source(
            config::Environment::with_prefix("BOXFS")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}

/// Get the current loaded config, loading it if needed.
pub fn get_config() -> Result<&'static Config> {
    Config::current()
}
