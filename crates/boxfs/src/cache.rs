// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! The three caches that keep the overlay near pass-through speed for
//! files that never match a mapping.
//!
//! All three are shared by every open handle and every kernel thread
//! servicing the mount. Lookups take a shared lock, inserts and
//! invalidations an exclusive one. When more than one cache must be
//! touched, the order is read-cache, then skip-cache, then negative
//! cache, and no operation holds two locks at once.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[cfg(test)]
#[path = "./cache_test.rs"]
mod cache_test;

pub const READ_CACHE_SLOTS: usize = 256;
pub const READ_CACHE_MAX_ENTRY: usize = 4 * 1024 * 1024;
pub const SKIP_CACHE_SLOTS: usize = 512;
pub const NEG_CACHE_SLOTS: usize = 64;
pub const NEG_CACHE_TTL: Duration = Duration::from_secs(2);

/// Identity of one version of one file: source path plus full mtime.
/// All three fields must match for a cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileKey {
    pub path: PathBuf,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
}

struct ReadSlot {
    key: FileKey,
    data: std::sync::Arc<Vec<u8>>,
    last_used: AtomicU64,
}

/// LRU store of already-transformed file bodies.
///
/// The slot count is small enough that a linear scan under the shared
/// lock beats a hash table and its extra contention; the per-slot access
/// sequence is atomic so a hit never needs the exclusive lock.
pub struct ReadCache {
    slots: RwLock<Vec<Option<ReadSlot>>>,
    seq: AtomicU64,
    max_entry: usize,
}

impl ReadCache {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new((0..READ_CACHE_SLOTS).map(|_| None).collect()),
            seq: AtomicU64::new(1),
            max_entry: READ_CACHE_MAX_ENTRY,
        }
    }

    pub fn get(&self, key: &FileKey) -> Option<std::sync::Arc<Vec<u8>>> {
        let slots = self.slots.read().expect("read cache lock poisoned");
        for slot in slots.iter().flatten() {
            if slot.key == *key {
                let seq = self.seq.fetch_add(1, Ordering::Relaxed);
                slot.last_used.store(seq, Ordering::Relaxed);
                return Some(std::sync::Arc::clone(&slot.data));
            }
        }
        None
    }

    /// Store a transformed body, evicting the least recently used slot
    /// when full. Oversize bodies are not cached; callers still serve
    /// them, they just pay the transform again next time.
    pub fn insert(&self, key: FileKey, data: Vec<u8>) {
        if data.len() > self.max_entry {
            return;
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let slot = ReadSlot {
            key,
            data: std::sync::Arc::new(data),
            last_used: AtomicU64::new(seq),
        };
        let mut slots = self.slots.write().expect("read cache lock poisoned");
        // replace any stale entry for the same path first
        if let Some(existing) = slots
            .iter_mut()
            .flatten()
            .find(|s| s.key.path == slot.key.path)
        {
            *existing = slot;
            return;
        }
        let mut victim = 0;
        let mut oldest = u64::MAX;
        for (idx, entry) in slots.iter().enumerate() {
            match entry {
                None => {
                    victim = idx;
                    break;
                }
                Some(s) => {
                    let used = s.last_used.load(Ordering::Relaxed);
                    if used < oldest {
                        oldest = used;
                        victim = idx;
                    }
                }
            }
        }
        slots[victim] = Some(slot);
    }

    pub fn invalidate(&self, path: &Path) {
        let mut slots = self.slots.write().expect("read cache lock poisoned");
        for entry in slots.iter_mut() {
            if entry.as_ref().is_some_and(|s| s.key.path == path) {
                *entry = None;
            }
        }
    }

    /// The cached transformed size for this exact file version, used by
    /// `getattr` so the kernel reports the size the reader will see.
    pub fn size_of(&self, key: &FileKey) -> Option<u64> {
        let slots = self.slots.read().expect("read cache lock poisoned");
        slots
            .iter()
            .flatten()
            .find(|s| s.key == *key)
            .map(|s| s.data.len() as u64)
    }
}

impl Default for ReadCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring buffer remembering file versions whose quick-scan found no
/// mapping patterns: those reads bypass the transform entirely.
pub struct SkipCache {
    slots: RwLock<Vec<Option<FileKey>>>,
    next: AtomicU64,
}

impl SkipCache {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; SKIP_CACHE_SLOTS]),
            next: AtomicU64::new(0),
        }
    }

    pub fn contains(&self, key: &FileKey) -> bool {
        let slots = self.slots.read().expect("skip cache lock poisoned");
        slots.iter().flatten().any(|k| k == key)
    }

    pub fn insert(&self, key: FileKey) {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % SKIP_CACHE_SLOTS;
        let mut slots = self.slots.write().expect("skip cache lock poisoned");
        slots[idx] = Some(key);
    }

    pub fn invalidate(&self, path: &Path) {
        let mut slots = self.slots.write().expect("skip cache lock poisoned");
        for entry in slots.iter_mut() {
            if entry.as_ref().is_some_and(|k| k.path == path) {
                *entry = None;
            }
        }
    }
}

impl Default for SkipCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Short-TTL ring of paths recently confirmed non-existent, collapsing
/// bursts of lookups for the same missing child into one `lstat`.
pub struct NegCache {
    slots: RwLock<Vec<Option<(PathBuf, Instant)>>>,
    next: AtomicU64,
    ttl: Duration,
}

impl NegCache {
    pub fn new() -> Self {
        Self::with_ttl(NEG_CACHE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            slots: RwLock::new(vec![None; NEG_CACHE_SLOTS]),
            next: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        let now = Instant::now();
        let slots = self.slots.read().expect("negative cache lock poisoned");
        slots
            .iter()
            .flatten()
            .any(|(p, expiry)| p == path && *expiry > now)
    }

    pub fn insert(&self, path: PathBuf) {
        let expiry = Instant::now() + self.ttl;
        let idx = self.next.fetch_add(1, Ordering::Relaxed) as usize % NEG_CACHE_SLOTS;
        let mut slots = self.slots.write().expect("negative cache lock poisoned");
        slots[idx] = Some((path, expiry));
    }

    /// Drop any entry for this path; called whenever something is
    /// created at a path that may have been confirmed missing moments
    /// before (create, mkdir, rename target, symlink, link).
    pub fn invalidate(&self, path: &Path) {
        let mut slots = self.slots.write().expect("negative cache lock poisoned");
        for entry in slots.iter_mut() {
            if entry.as_ref().is_some_and(|(p, _)| p == path) {
                *entry = None;
            }
        }
    }
}

impl Default for NegCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The cache state injected into the filesystem root at construction.
/// Tests build fresh bundles; nothing here is process-global.
#[derive(Default)]
pub struct CacheBundle {
    pub read: ReadCache,
    pub skip: SkipCache,
    pub neg: NegCache,
}

impl CacheBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidate every content cache keyed by this source path. Called
    /// before the underlying write lands so a concurrent reader either
    /// sees the old cached bytes or misses and rereads the disk.
    pub fn invalidate_file(&self, path: &Path) {
        self.read.invalidate(path);
        self.skip.invalidate(path);
    }
}
