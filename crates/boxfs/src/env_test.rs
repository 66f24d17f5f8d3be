// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use rstest::rstest;

use super::{bind_source_aside, create_aside_dir, runtime_dir};

#[rstest]
fn test_create_aside_dir_creates_missing_levels() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-test-").unwrap();
    let target = tmpdir.path().join("a/b/src");
    create_aside_dir(&target, 0o755).unwrap();
    assert!(target.is_dir());
    // a second call over an existing tree is a no-op
    create_aside_dir(&target, 0o755).unwrap();
}

#[rstest]
fn test_create_aside_dir_applies_mode_to_new_levels_only() {
    use std::os::unix::fs::PermissionsExt;

    let tmpdir = tempfile::TempDir::with_prefix("boxfs-test-").unwrap();
    let existing = tmpdir.path().join("kept");
    std::fs::create_dir(&existing).unwrap();
    std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o700)).unwrap();

    let target = existing.join("fresh/src");
    create_aside_dir(&target, 0o755).unwrap();

    let kept = std::fs::metadata(&existing).unwrap().permissions().mode() & 0o777;
    assert_eq!(kept, 0o700);
    let fresh = std::fs::metadata(&target).unwrap().permissions().mode() & 0o777;
    assert_eq!(fresh, 0o755);
}

#[rstest]
#[serial_test::serial] // env manipulation must be reliable
fn test_runtime_dir_honors_xdg_runtime_dir() {
    std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
    let dir = runtime_dir("proj");
    std::env::remove_var("XDG_RUNTIME_DIR");
    assert_eq!(dir, std::path::PathBuf::from("/run/user/1000/boxfs/proj"));

    let fallback = runtime_dir("proj");
    assert!(fallback.starts_with("/tmp"));
    assert!(fallback.ends_with("proj"));
}

#[rstest]
fn test_bind_source_aside_requires_a_directory() {
    bind_source_aside(std::path::Path::new("/definitely/not/here"), "x")
        .expect_err("missing source should be rejected");
}
