// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use rstest::rstest;

use super::{load_config, Config};

#[rstest]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.filesystem.extensions, "json,jsonl");
    assert_eq!(config.filesystem.trace, 0);
    assert_eq!(config.container.memory, "4g");
    assert_eq!(config.container.cpus, 2.0);
    assert_eq!(config.container.pids_limit, 2048);
    assert_eq!(config.container.cpu_shares, 512);
    assert!(!config.container.privileged);
}

#[rstest]
#[serial_test::serial] // env manipulation must be reliable
fn test_config_loads_from_environment() {
    std::env::set_var("BOXFS_CONTAINER__MEMORY", "8g");
    std::env::set_var("BOXFS_FILESYSTEM__TRACE", "2");
    let config = load_config().unwrap();
    std::env::remove_var("BOXFS_CONTAINER__MEMORY");
    std::env::remove_var("BOXFS_FILESYSTEM__TRACE");
    assert_eq!(config.container.memory, "8g");
    assert_eq!(config.filesystem.trace, 2);
    // untouched sections keep their defaults
    assert_eq!(config.container.cpus, 2.0);
}
