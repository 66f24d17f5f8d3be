// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use std::path::PathBuf;
use std::time::Duration;

use rstest::rstest;

use super::{
    CacheBundle, FileKey, NegCache, ReadCache, SkipCache, READ_CACHE_MAX_ENTRY, READ_CACHE_SLOTS,
    SKIP_CACHE_SLOTS,
};

fn key(path: &str, mtime: i64) -> FileKey {
    FileKey {
        path: PathBuf::from(path),
        mtime_sec: mtime,
        mtime_nsec: 0,
    }
}

#[rstest]
fn test_read_cache_requires_exact_mtime() {
    let cache = ReadCache::new();
    cache.insert(key("/a.json", 1), b"one".to_vec());
    assert_eq!(cache.get(&key("/a.json", 1)).unwrap().as_slice(), b"one");
    assert!(cache.get(&key("/a.json", 2)).is_none());

    let mut nsec_key = key("/a.json", 1);
    nsec_key.mtime_nsec = 7;
    assert!(cache.get(&nsec_key).is_none());
}

#[rstest]
fn test_read_cache_replaces_stale_version_of_same_path() {
    let cache = ReadCache::new();
    cache.insert(key("/a.json", 1), b"old".to_vec());
    cache.insert(key("/a.json", 2), b"new".to_vec());
    assert!(cache.get(&key("/a.json", 1)).is_none());
    assert_eq!(cache.get(&key("/a.json", 2)).unwrap().as_slice(), b"new");
}

#[rstest]
fn test_read_cache_evicts_least_recently_used() {
    let cache = ReadCache::new();
    for i in 0..READ_CACHE_SLOTS {
        cache.insert(key(&format!("/f{i}.json"), 1), vec![b'x']);
    }
    // touch the first entry so it is no longer the eviction candidate
    assert!(cache.get(&key("/f0.json", 1)).is_some());
    cache.insert(key("/overflow.json", 1), vec![b'y']);

    assert!(cache.get(&key("/f0.json", 1)).is_some());
    assert!(cache.get(&key("/f1.json", 1)).is_none());
    assert!(cache.get(&key("/overflow.json", 1)).is_some());
}

#[rstest]
fn test_read_cache_skips_oversize_bodies() {
    let cache = ReadCache::new();
    cache.insert(key("/big.json", 1), vec![0u8; READ_CACHE_MAX_ENTRY + 1]);
    assert!(cache.get(&key("/big.json", 1)).is_none());
}

#[rstest]
fn test_read_cache_reports_cached_size() {
    let cache = ReadCache::new();
    cache.insert(key("/a.json", 1), b"12345".to_vec());
    assert_eq!(cache.size_of(&key("/a.json", 1)), Some(5));
    assert_eq!(cache.size_of(&key("/a.json", 2)), None);
}

#[rstest]
fn test_skip_cache_ring_replacement() {
    let cache = SkipCache::new();
    cache.insert(key("/first.json", 1));
    for i in 0..SKIP_CACHE_SLOTS {
        cache.insert(key(&format!("/f{i}.json"), 1));
    }
    // the ring wrapped and overwrote the first insertion
    assert!(!cache.contains(&key("/first.json", 1)));
    assert!(cache.contains(&key(
        &format!("/f{}.json", SKIP_CACHE_SLOTS - 1),
        1
    )));
}

#[rstest]
fn test_neg_cache_expires() {
    let cache = NegCache::with_ttl(Duration::from_millis(20));
    cache.insert(PathBuf::from("/missing"));
    assert!(cache.contains(std::path::Path::new("/missing")));
    std::thread::sleep(Duration::from_millis(40));
    assert!(!cache.contains(std::path::Path::new("/missing")));
}

#[rstest]
fn test_neg_cache_explicit_invalidation() {
    let cache = NegCache::new();
    cache.insert(PathBuf::from("/soon-created"));
    assert!(cache.contains(std::path::Path::new("/soon-created")));
    cache.invalidate(std::path::Path::new("/soon-created"));
    assert!(!cache.contains(std::path::Path::new("/soon-created")));
}

#[rstest]
fn test_bundle_invalidation_clears_both_content_caches() {
    let caches = CacheBundle::new();
    caches.read.insert(key("/a.json", 1), b"body".to_vec());
    caches.skip.insert(key("/a.json", 2));
    caches.invalidate_file(std::path::Path::new("/a.json"));
    assert!(caches.read.get(&key("/a.json", 1)).is_none());
    assert!(!caches.skip.contains(&key("/a.json", 2)));
}
