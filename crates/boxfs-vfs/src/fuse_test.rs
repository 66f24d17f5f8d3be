// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use boxfs::cache::CacheBundle;
use boxfs::mapping::{parse_dir_map, parse_path_map, ExtensionSet, MountConfig};
use rstest::rstest;

use super::{Config, Filesystem};

fn make_fs(source: &Path) -> Filesystem {
    let mount = MountConfig {
        source: source.to_owned(),
        path_maps: parse_path_map("D:/GitHub/ccbox:/d/GitHub/ccbox").unwrap(),
        dir_maps: parse_dir_map("-d-GitHub-ccbox:D--GitHub-ccbox").unwrap(),
        extensions: ExtensionSet::default(),
        trace: 0,
    };
    Filesystem::new(
        Config {
            source: source.to_owned(),
            mount: Arc::new(mount),
            mount_options: HashSet::new(),
        },
        CacheBundle::new(),
    )
}

fn open_rw(path: &Path) -> std::fs::File {
    std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .unwrap()
}

#[rstest]
fn test_read_transforms_and_caches() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let host_body = br#"{"path":"D:\\GitHub\\ccbox\\src\\main.go"}"#;
    std::fs::write(tmpdir.path().join("session.json"), host_body).unwrap();

    let rel = Path::new("session.json");
    let file = open_rw(&tmpdir.path().join(rel));
    let served = fs.read_for_handle(&file, rel, 0, 4096, true).unwrap();
    assert_eq!(served, br#"{"path":"/d/GitHub/ccbox/src/main.go"}"#);

    // the transformed body is now cached for this exact file version
    let key = Filesystem::file_key(rel, &file.metadata().unwrap());
    assert_eq!(
        fs.caches.read.size_of(&key),
        Some(served.len() as u64)
    );

    // a ranged read serves the cached slice
    let slice = fs.read_for_handle(&file, rel, 9, 16, true).unwrap();
    assert_eq!(slice, served[9..25].to_vec());
}

#[rstest]
fn test_read_skips_files_without_patterns() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let body = br#"{"message":"no paths in here"}"#;
    std::fs::write(tmpdir.path().join("notes.json"), body).unwrap();

    let rel = Path::new("notes.json");
    let file = open_rw(&tmpdir.path().join(rel));
    let served = fs.read_for_handle(&file, rel, 0, 4096, true).unwrap();
    assert_eq!(served, body);

    let key = Filesystem::file_key(rel, &file.metadata().unwrap());
    assert!(fs.caches.skip.contains(&key));
    assert!(fs.caches.read.size_of(&key).is_none());
}

#[rstest]
fn test_read_passthrough_for_untransformable_handle() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let body = br#"{"path":"D:\\GitHub\\ccbox\\x"}"#;
    std::fs::write(tmpdir.path().join("data.bin"), body).unwrap();

    let rel = Path::new("data.bin");
    let file = open_rw(&tmpdir.path().join(rel));
    let served = fs.read_for_handle(&file, rel, 0, 4096, false).unwrap();
    assert_eq!(served, body);
}

#[rstest]
fn test_write_at_zero_reverses_transform_and_truncates() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let path = tmpdir.path().join("session.json");
    std::fs::write(&path, b"old contents that are longer than the new ones").unwrap();

    let rel = Path::new("session.json");
    let file = open_rw(&path);
    let container_body: &[u8] = br#"{"path":"/d/GitHub/ccbox/src/main.go"}"#;
    let written = fs
        .write_for_handle(&file, rel, 0, container_body, true)
        .unwrap();

    // the caller sees its logical write size
    assert_eq!(written as usize, container_body.len());
    // the disk holds the host spelling, truncated to the new length
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk, br#"{"path":"D:\\GitHub\\ccbox\\src\\main.go"}"#);
}

#[rstest]
fn test_write_with_offset_merges_into_existing_contents() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let path = tmpdir.path().join("log.json");
    std::fs::write(&path, b"AAAA").unwrap();

    let rel = Path::new("log.json");
    // seed caches so the write provably invalidates them
    let file = open_rw(&path);
    let meta = file.metadata().unwrap();
    let key = Filesystem::file_key(rel, &meta);
    fs.caches.read.insert(key.clone(), b"cached".to_vec());
    fs.caches.skip.insert(key.clone());

    let written = fs.write_for_handle(&file, rel, 2, b"BB", true).unwrap();
    assert_eq!(written, 2);
    assert_eq!(std::fs::read(&path).unwrap(), b"AABB");

    assert!(fs.caches.read.size_of(&key).is_none());
    assert!(!fs.caches.skip.contains(&key));
}

#[rstest]
fn test_write_with_offset_and_transform_locks_and_merges() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let path = tmpdir.path().join("s.jsonl");
    std::fs::write(&path, b"0123456789").unwrap();

    let rel = Path::new("s.jsonl");
    let file = open_rw(&path);
    let written = fs
        .write_for_handle(&file, rel, 4, br#""/d/GitHub/ccbox""#, true)
        .unwrap();
    assert_eq!(written as usize, br#""/d/GitHub/ccbox""#.len());
    assert_eq!(
        std::fs::read(&path).unwrap(),
        br#"0123"D:\\GitHub\\ccbox""#
    );
}

#[rstest]
fn test_rename_into_transformable_extension_rewrites_contents() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    // container-format bytes landed raw while the extension was exempt
    let container_body: &[u8] = br#"{"path":"/d/GitHub/ccbox/a.go"}"#;
    std::fs::write(tmpdir.path().join("draft.tmp"), container_body).unwrap();

    fs.rename_impl(Path::new("draft.tmp"), Path::new("final.json"))
        .unwrap();

    assert!(!tmpdir.path().join("draft.tmp").exists());
    let on_disk = std::fs::read(tmpdir.path().join("final.json")).unwrap();
    assert_eq!(on_disk, br#"{"path":"D:\\GitHub\\ccbox\\a.go"}"#);
}

#[rstest]
fn test_rename_between_exempt_extensions_keeps_bytes() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let body: &[u8] = br#"{"path":"/d/GitHub/ccbox/a.go"}"#;
    std::fs::write(tmpdir.path().join("a.txt"), body).unwrap();

    fs.rename_impl(Path::new("a.txt"), Path::new("b.txt")).unwrap();
    assert_eq!(std::fs::read(tmpdir.path().join("b.txt")).unwrap(), body);
}

#[rstest]
fn test_stat_child_negative_cache_collapses_lookups() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());

    let err = fs.stat_child(Path::new(""), "ghost.json").unwrap_err();
    assert_eq!(err, libc::ENOENT);

    // the file now exists, but within the TTL the second lookup is
    // answered from the negative cache without touching the disk
    std::fs::write(tmpdir.path().join("ghost.json"), b"{}").unwrap();
    let err = fs.stat_child(Path::new(""), "ghost.json").unwrap_err();
    assert_eq!(err, libc::ENOENT);

    // creation through the overlay invalidates the negative entry
    fs.caches.neg.invalidate(Path::new("ghost.json"));
    assert!(fs.stat_child(Path::new(""), "ghost.json").is_ok());
}

#[rstest]
fn test_visible_entries_remap_and_dedup() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    std::fs::create_dir(tmpdir.path().join("D--GitHub-ccbox")).unwrap();
    // a literal container-spelled duplicate and a housekeeping entry
    std::fs::create_dir(tmpdir.path().join("-d-GitHub-ccbox")).unwrap();
    std::fs::write(tmpdir.path().join(".fuse_hidden0001"), b"x").unwrap();
    std::fs::write(tmpdir.path().join("plain.txt"), b"x").unwrap();

    let entries = fs.visible_entries(Path::new("")).unwrap();
    let presented: Vec<&str> = entries.iter().map(|e| e.presented.as_str()).collect();
    assert_eq!(presented, vec!["-d-GitHub-ccbox", "plain.txt"]);
    // the presented name is backed by the native entry on disk
    let mapped = entries.iter().find(|e| e.presented == "-d-GitHub-ccbox").unwrap();
    assert_eq!(mapped.native, "D--GitHub-ccbox");
}

#[rstest]
fn test_translate_link_target_round_trips() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let presented = Path::new("../-d-GitHub-ccbox/notes.json");
    let native = fs.translate_link_target(presented, true);
    assert_eq!(native, Path::new("../D--GitHub-ccbox/notes.json"));
    assert_eq!(fs.translate_link_target(&native, false), presented);
}

#[rstest]
fn test_getattr_reports_cached_transformed_size() {
    let tmpdir = tempfile::TempDir::with_prefix("boxfs-vfs-test-").unwrap();
    let fs = make_fs(tmpdir.path());
    let host_body = br#"{"path":"D:\\GitHub\\ccbox\\src\\main.go"}"#;
    let path = tmpdir.path().join("session.json");
    std::fs::write(&path, host_body).unwrap();

    let rel = Path::new("session.json");
    let meta = std::fs::symlink_metadata(&path).unwrap();
    let before = fs.attr_from_meta(2, rel, &meta);
    assert_eq!(before.size, host_body.len() as u64);

    let file = open_rw(&path);
    let served = fs.read_for_handle(&file, rel, 0, 4096, true).unwrap();
    let after = fs.attr_from_meta(2, rel, &meta);
    assert_eq!(after.size, served.len() as u64);
}
