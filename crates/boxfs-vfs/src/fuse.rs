// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

use std::collections::HashSet;
use std::ffi::{CString, OsStr, OsString};
use std::fs::File;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileExt, FileTypeExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use boxfs::cache::{CacheBundle, FileKey};
use boxfs::transform::QUICK_SCAN_LIMIT;
use boxfs::MountConfig;
use dashmap::DashMap;
use fuser::consts::*;
use fuser::{
    FileAttr,
    FileType,
    MountOption,
    ReplyAttr,
    ReplyData,
    ReplyDirectory,
    ReplyEntry,
    ReplyOpen,
    Request,
    TimeOrNow,
};

#[cfg(test)]
#[path = "./fuse_test.rs"]
mod fuse_test;

/// How long the kernel may trust a resolved directory entry.
const ENTRY_TTL: Duration = Duration::from_secs(30);
/// How long the kernel may trust returned attributes.
const ATTR_TTL: Duration = Duration::from_secs(30);
/// How long the kernel may cache a failed lookup as a negative dentry.
const NEGATIVE_TTL: Duration = Duration::from_secs(15);

/// Prefix of the entries the kernel creates for unlinked-but-open
/// files; they are housekeeping and never listed.
const HIDDEN_PREFIX: &str = ".fuse_hidden";

/// Options to configure the overlay filesystem and
/// its behavior at runtime
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the real bytes live: the auxiliary bind of the directory
    /// the overlay is mounted over.
    pub source: PathBuf,
    /// The immutable mapping set served for the mount lifetime.
    pub mount: Arc<MountConfig>,
    /// Mount options to be used when setting up
    pub mount_options: HashSet<MountOption>,
}

/// Serves all overlay operations over the source directory.
struct Filesystem {
    opts: Config,
    caches: CacheBundle,

    next_inode: AtomicU64,
    next_handle: AtomicU64,
    /// inode -> source-relative path in native (on-disk) spelling
    inodes: DashMap<u64, PathBuf>,
    paths: DashMap<PathBuf, u64>,
    handles: DashMap<u64, Handle>,
}

enum Handle {
    File {
        file: File,
        rel: PathBuf,
        needs_transform: bool,
    },
    Dir {
        rel: PathBuf,
    },
}

/// One directory entry in both its on-disk and presented spellings.
struct DirEntry {
    native: String,
    presented: String,
    kind: FileType,
}

/// Extract the ok value from a result, or reply with an error
macro_rules! unwrap {
    ($reply:ident, $op:expr) => {{
        match $op {
            Ok(r) => r,
            Err(err) => err!($reply, err),
        }
    }};
}

/// Reply with an error and return
macro_rules! err {
    ($reply:ident, $err:expr) => {{
        let err: std::io::Error = $err.into();
        $reply.error(err.raw_os_error().unwrap_or(libc::EIO));
        return;
    }};
}

impl Filesystem {
    const BLOCK_SIZE: u32 = 512;

    fn new(opts: Config, caches: CacheBundle) -> Self {
        let fs = Self {
            opts,
            caches,
            // the root inode must be 1, handle 0 is never allocated
            next_inode: AtomicU64::new(2),
            next_handle: AtomicU64::new(1),
            inodes: Default::default(),
            paths: Default::default(),
            handles: Default::default(),
        };
        fs.inodes.insert(1, PathBuf::new());
        fs.paths.insert(PathBuf::new(), 1);
        fs
    }

    fn allocate_handle(&self, data: Handle) -> u64 {
        loop {
            let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            match self.handles.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(data);
                    break id;
                }
            }
        }
    }

    fn rel_of(&self, ino: u64) -> Option<PathBuf> {
        self.inodes.get(&ino).map(|kv| kv.value().clone())
    }

    fn ino_for(&self, rel: &Path) -> u64 {
        if let Some(existing) = self.paths.get(rel) {
            return *existing.value();
        }
        match self.paths.entry(rel.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(o) => *o.get(),
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let ino = self.next_inode.fetch_add(1, Ordering::Relaxed);
                v.insert(ino);
                self.inodes.insert(ino, rel.to_owned());
                ino
            }
        }
    }

    fn source_path(&self, rel: &Path) -> PathBuf {
        self.opts.source.join(rel)
    }

    fn file_key(rel: &Path, meta: &std::fs::Metadata) -> FileKey {
        FileKey {
            path: rel.to_owned(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
        }
    }

    /// Drop the inode bookkeeping for a removed path.
    fn forget_path(&self, rel: &Path) {
        if let Some((_, ino)) = self.paths.remove(rel) {
            self.inodes.remove(&ino);
        }
    }

    /// Re-key every inode under a renamed path so open inodes keep
    /// resolving after the move.
    fn remap_tree(&self, old_rel: &Path, new_rel: &Path) {
        let affected: Vec<(PathBuf, u64)> = self
            .paths
            .iter()
            .filter(|kv| kv.key().as_path() == old_rel || kv.key().starts_with(old_rel))
            .map(|kv| (kv.key().clone(), *kv.value()))
            .collect();
        for (path, ino) in affected {
            self.paths.remove(&path);
            let moved = match path.strip_prefix(old_rel) {
                Ok(suffix) if suffix.as_os_str().is_empty() => new_rel.to_owned(),
                Ok(suffix) => new_rel.join(suffix),
                Err(_) => path,
            };
            self.inodes.insert(ino, moved.clone());
            self.paths.insert(moved, ino);
        }
    }

    fn attr_from_meta(&self, ino: u64, rel: &Path, meta: &std::fs::Metadata) -> FileAttr {
        let kind = kind_of(&meta.file_type());
        let mut size = meta.size();
        if kind == FileType::RegularFile && self.opts.mount.needs_transform(rel) {
            // a cached transformed body fixes the size the reader will see
            if let Some(cached) = self.caches.read.size_of(&Self::file_key(rel, meta)) {
                size = cached;
            }
        }
        FileAttr {
            ino,
            size,
            blocks: (size / Self::BLOCK_SIZE as u64) + 1,
            atime: system_time(meta.atime(), meta.atime_nsec()),
            mtime: system_time(meta.mtime(), meta.mtime_nsec()),
            ctime: system_time(meta.ctime(), meta.ctime_nsec()),
            crtime: UNIX_EPOCH,
            kind,
            perm: (meta.mode() & 0o7777) as u16,
            nlink: meta.nlink() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            rdev: meta.rdev() as u32,
            blksize: Self::BLOCK_SIZE,
            flags: 0,
        }
    }

    /// Resolve a child, consulting and feeding the negative cache so a
    /// burst of lookups for a missing name costs one `lstat`.
    fn stat_child(&self, parent_rel: &Path, native: &str) -> Result<(PathBuf, std::fs::Metadata), i32> {
        let rel = parent_rel.join(native);
        if self.caches.neg.contains(&rel) {
            return Err(libc::ENOENT);
        }
        match std::fs::symlink_metadata(self.source_path(&rel)) {
            Ok(meta) => Ok((rel, meta)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.caches.neg.insert(rel);
                Err(libc::ENOENT)
            }
            Err(err) => Err(err.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    /// Translate a symlink target segment-by-segment between the
    /// on-disk and presented directory spellings.
    fn translate_link_target(&self, target: &Path, to_native: bool) -> PathBuf {
        let mut out = PathBuf::new();
        for component in target.components() {
            match component {
                std::path::Component::Normal(part) => {
                    let name = part.to_string_lossy();
                    let mapped = if to_native {
                        self.opts.mount.to_native_name(&name).to_string()
                    } else {
                        self.opts.mount.to_presented_name(&name).to_string()
                    };
                    out.push(mapped);
                }
                other => out.push(other.as_os_str()),
            }
        }
        out
    }

    /// The read pipeline for a transformable handle. Returns the bytes
    /// to serve for `[offset, offset+size)`.
    fn read_for_handle(
        &self,
        file: &File,
        rel: &Path,
        offset: u64,
        size: u32,
        needs_transform: bool,
    ) -> io::Result<Vec<u8>> {
        if !needs_transform {
            return read_range(file, offset, size as usize);
        }
        let meta = file.metadata()?;
        if meta.size() == 0 {
            return Ok(Vec::new());
        }
        let key = Self::file_key(rel, &meta);
        if self.caches.skip.contains(&key) {
            return read_range(file, offset, size as usize);
        }
        if let Some(body) = self.caches.read.get(&key) {
            return Ok(slice_of(&body, offset, size as usize));
        }

        let head = read_range(file, 0, (meta.size() as usize).min(QUICK_SCAN_LIMIT))?;
        if !boxfs::quick_scan(&head, &self.opts.mount) {
            self.caches.skip.insert(key);
            return read_range(file, offset, size as usize);
        }

        let raw = read_range(file, 0, meta.size() as usize)?;
        match boxfs::to_container(&raw, &self.opts.mount) {
            None => {
                // the probe was a false positive for this mapping set
                self.caches.skip.insert(key);
                Ok(slice_of(&raw, offset, size as usize))
            }
            Some(transformed) => {
                let out = slice_of(&transformed, offset, size as usize);
                self.caches.read.insert(key, transformed);
                Ok(out)
            }
        }
    }

    /// The write pipeline. Always returns the caller's byte count so
    /// the writer sees its logical write size, whatever landed on disk.
    fn write_for_handle(
        &self,
        file: &File,
        rel: &Path,
        offset: u64,
        data: &[u8],
        needs_transform: bool,
    ) -> io::Result<u32> {
        // invalidation must land before the bytes do, so concurrent
        // readers either see the old cache or reread the disk
        self.caches.invalidate_file(rel);

        if !needs_transform {
            file.write_all_at(data, offset)?;
            return Ok(data.len() as u32);
        }

        let Some(transformed) = boxfs::to_host(data, &self.opts.mount) else {
            file.write_all_at(data, offset)?;
            return Ok(data.len() as u32);
        };

        if offset == 0 {
            file.write_all_at(&transformed, 0)?;
            file.set_len(transformed.len() as u64)?;
            return Ok(data.len() as u32);
        }

        // transformed length differs from the caller's, so a nonzero
        // offset requires a locked read-modify-write of the whole file
        let _lock = FlockGuard::exclusive(file)?;
        let current_len = file.metadata()?.size();
        let mut merged = read_range(file, 0, current_len as usize)?;
        let end = offset as usize + transformed.len();
        if merged.len() < end {
            merged.resize(end, 0);
        }
        merged[offset as usize..end].copy_from_slice(&transformed);
        file.write_all_at(&merged, 0)?;
        file.set_len(merged.len() as u64)?;
        Ok(data.len() as u32)
    }

    /// Enumerate one directory as presented to callers: housekeeping
    /// entries hidden, native names remapped, and a literal
    /// container-spelled entry suppressed when the native entry it
    /// duplicates is also present.
    fn visible_entries(&self, rel: &Path) -> io::Result<Vec<DirEntry>> {
        let mut names: Vec<(String, FileType)> = Vec::new();
        for entry in std::fs::read_dir(self.source_path(rel))? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if name.starts_with(HIDDEN_PREFIX) {
                continue;
            }
            let file_type = entry.file_type()?;
            names.push((name, kind_of(&file_type)));
        }
        names.sort_by(|a, b| a.0.cmp(&b.0));

        let present: std::collections::HashSet<&str> =
            names.iter().map(|(n, _)| n.as_str()).collect();
        let duplicates: Vec<String> = self
            .opts
            .mount
            .dir_maps
            .iter()
            .filter(|dm| {
                present.contains(dm.container.as_str()) && present.contains(dm.native.as_str())
            })
            .map(|dm| dm.container.clone())
            .collect();

        Ok(names
            .into_iter()
            .filter(|(native, _)| !duplicates.iter().any(|d| d == native))
            .map(|(native, kind)| {
                let presented = self.opts.mount.to_presented_name(&native).to_string();
                DirEntry {
                    native,
                    presented,
                    kind,
                }
            })
            .collect())
    }

    /// Rename bookkeeping plus the post-rename content fixup: a file
    /// moving into a transformable extension from a non-transformable
    /// one had its bytes written without the reverse transform, so the
    /// contents are rewritten to host format now, all-or-nothing.
    fn rename_impl(&self, old_rel: &Path, new_rel: &Path) -> io::Result<()> {
        self.caches.invalidate_file(old_rel);
        self.caches.invalidate_file(new_rel);
        self.caches.neg.invalidate(new_rel);

        std::fs::rename(self.source_path(old_rel), self.source_path(new_rel))?;
        self.remap_tree(old_rel, new_rel);

        let mount = &self.opts.mount;
        if mount.needs_transform(new_rel) && !mount.needs_transform(old_rel) {
            if let Err(err) = self.post_rename_transform(new_rel) {
                // the rename itself stands; reopening the file will
                // still produce consistent views
                tracing::debug!(?new_rel, ?err, "post-rename transform failed");
            }
        }
        Ok(())
    }

    fn post_rename_transform(&self, rel: &Path) -> io::Result<()> {
        let full = self.source_path(rel);
        let raw = std::fs::read(&full)?;
        let Some(transformed) = boxfs::to_host(&raw, &self.opts.mount) else {
            return Ok(());
        };
        let dir = full.parent().unwrap_or(Path::new("."));
        let meta = std::fs::metadata(&full)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        io::Write::write_all(&mut tmp, &transformed)?;
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(meta.mode()))?;
        tmp.persist(&full).map_err(|err| err.error)?;
        Ok(())
    }
}

// these functions mirror the actual fuse ones and
// so we don't have much control over the shape
#[allow(clippy::too_many_arguments)]
impl Filesystem {
    fn lookup(&self, parent: u64, name: OsString, reply: ReplyEntry) {
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };

        let native = self.opts.mount.to_native_name(name).to_string();
        match self.stat_child(&parent_rel, &native) {
            Ok((rel, meta)) => {
                let ino = self.ino_for(&rel);
                let attr = self.attr_from_meta(ino, &rel, &meta);
                reply.entry(&ENTRY_TTL, &attr, 0);
            }
            Err(libc::ENOENT) => {
                // a zero inode makes the kernel hold a negative dentry
                // for the advertised timeout instead of asking again
                reply.entry(&NEGATIVE_TTL, &negative_attr(), 0);
            }
            Err(errno) => reply.error(errno),
        }
    }

    fn forget(&self, _ino: u64, _nlookup: u64) {
        // inode numbers stay valid for the mount lifetime; the path
        // table is pruned on unlink/rmdir instead
    }

    fn getattr(&self, ino: u64, reply: ReplyAttr) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let meta = unwrap!(reply, std::fs::symlink_metadata(self.source_path(&rel)));
        let attr = self.attr_from_meta(ino, &rel, &meta);
        reply.attr(&ATTR_TTL, &attr);
    }

    fn setattr(
        &self,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        reply: ReplyAttr,
    ) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let full = self.source_path(&rel);

        if let Some(mode) = mode {
            unwrap!(
                reply,
                std::fs::set_permissions(&full, std::fs::Permissions::from_mode(mode))
            );
        }
        if uid.is_some() || gid.is_some() {
            unwrap!(
                reply,
                std::os::unix::fs::lchown(&full, uid, gid)
            );
        }
        if let Some(size) = size {
            self.caches.invalidate_file(&rel);
            let file = unwrap!(
                reply,
                std::fs::OpenOptions::new().write(true).open(&full)
            );
            unwrap!(reply, file.set_len(size));
        }
        if atime.is_some() || mtime.is_some() {
            unwrap!(reply, set_times_nofollow(&full, atime, mtime));
        }

        let meta = unwrap!(reply, std::fs::symlink_metadata(&full));
        let attr = self.attr_from_meta(ino, &rel, &meta);
        reply.attr(&ATTR_TTL, &attr);
    }

    fn readlink(&self, ino: u64, reply: ReplyData) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let target = unwrap!(reply, std::fs::read_link(self.source_path(&rel)));
        let presented = self.translate_link_target(&target, false);
        reply.data(presented.as_os_str().as_bytes());
    }

    fn mkdir(&self, req_uid: u32, req_gid: u32, parent: u64, name: OsString, mode: u32, umask: u32, reply: ReplyEntry) {
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let native = self.opts.mount.to_native_name(name).to_string();
        let rel = parent_rel.join(&native);
        let full = self.source_path(&rel);

        unwrap!(reply, std::fs::create_dir(&full));
        let perms = std::fs::Permissions::from_mode(mode & !umask);
        unwrap!(reply, std::fs::set_permissions(&full, perms));
        // directories belong to the caller, not the daemon user
        unwrap!(
            reply,
            std::os::unix::fs::chown(&full, Some(req_uid), Some(req_gid))
        );
        self.caches.neg.invalidate(&rel);

        let meta = unwrap!(reply, std::fs::symlink_metadata(&full));
        let ino = self.ino_for(&rel);
        let attr = self.attr_from_meta(ino, &rel, &meta);
        reply.entry(&ENTRY_TTL, &attr, 0);
    }

    fn unlink(&self, parent: u64, name: OsString, reply: fuser::ReplyEmpty) {
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let rel = parent_rel.join(self.opts.mount.to_native_name(name));
        self.caches.invalidate_file(&rel);
        unwrap!(reply, std::fs::remove_file(self.source_path(&rel)));
        self.forget_path(&rel);
        reply.ok();
    }

    fn rmdir(&self, parent: u64, name: OsString, reply: fuser::ReplyEmpty) {
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let rel = parent_rel.join(self.opts.mount.to_native_name(name));
        self.caches.invalidate_file(&rel);
        unwrap!(reply, std::fs::remove_dir(self.source_path(&rel)));
        self.forget_path(&rel);
        reply.ok();
    }

    fn symlink(
        &self,
        req_uid: u32,
        req_gid: u32,
        parent: u64,
        link_name: OsString,
        target: PathBuf,
        reply: ReplyEntry,
    ) {
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = link_name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let rel = parent_rel.join(self.opts.mount.to_native_name(name));
        let full = self.source_path(&rel);
        let native_target = self.translate_link_target(&target, true);

        unwrap!(reply, std::os::unix::fs::symlink(&native_target, &full));
        unwrap!(
            reply,
            std::os::unix::fs::lchown(&full, Some(req_uid), Some(req_gid))
        );
        self.caches.neg.invalidate(&rel);

        let meta = unwrap!(reply, std::fs::symlink_metadata(&full));
        let ino = self.ino_for(&rel);
        let attr = self.attr_from_meta(ino, &rel, &meta);
        reply.entry(&ENTRY_TTL, &attr, 0);
    }

    fn rename(
        &self,
        parent: u64,
        name: OsString,
        newparent: u64,
        newname: OsString,
        reply: fuser::ReplyEmpty,
    ) {
        let (Some(parent_rel), Some(newparent_rel)) = (self.rel_of(parent), self.rel_of(newparent))
        else {
            reply.error(libc::ENOENT);
            return;
        };
        let (Some(name), Some(newname)) = (name.to_str(), newname.to_str()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let old_rel = parent_rel.join(self.opts.mount.to_native_name(name));
        let new_rel = newparent_rel.join(self.opts.mount.to_native_name(newname));
        unwrap!(reply, self.rename_impl(&old_rel, &new_rel));
        reply.ok();
    }

    fn link(&self, ino: u64, newparent: u64, newname: OsString, reply: ReplyEntry) {
        let (Some(rel), Some(newparent_rel)) = (self.rel_of(ino), self.rel_of(newparent)) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(newname) = newname.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let new_rel = newparent_rel.join(self.opts.mount.to_native_name(newname));
        let full = self.source_path(&new_rel);
        unwrap!(reply, std::fs::hard_link(self.source_path(&rel), &full));
        self.caches.neg.invalidate(&new_rel);

        let meta = unwrap!(reply, std::fs::symlink_metadata(&full));
        let new_ino = self.ino_for(&new_rel);
        let attr = self.attr_from_meta(new_ino, &new_rel, &meta);
        reply.entry(&ENTRY_TTL, &attr, 0);
    }

    fn open(&self, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let needs_transform = self.opts.mount.needs_transform(&rel);
        let write = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        let truncate = write && flags & libc::O_TRUNC != 0;
        if truncate {
            self.caches.invalidate_file(&rel);
        }

        let mut options = std::fs::OpenOptions::new();
        // transformable handles always keep read access so nonzero
        // offset writes can merge with the current contents
        options
            .read(!write || needs_transform || (flags & libc::O_ACCMODE) == libc::O_RDWR)
            .write(write)
            .truncate(truncate);
        let file = unwrap!(reply, options.open(self.source_path(&rel)));

        let mut fopen_flags = 0;
        if needs_transform {
            let meta = unwrap!(reply, file.metadata());
            let key = Self::file_key(&rel, &meta);
            if self.caches.read.size_of(&key).is_some() || self.caches.skip.contains(&key) {
                // this version is known, the kernel page cache is safe
                fopen_flags |= FOPEN_KEEP_CACHE;
            } else {
                // the on-disk size must not become a truncation oracle
                // for content we have not transformed yet
                fopen_flags |= FOPEN_DIRECT_IO;
            }
        }

        let fh = self.allocate_handle(Handle::File {
            file,
            rel,
            needs_transform,
        });
        reply.opened(fh, fopen_flags);
    }

    fn read(&self, fh: u64, offset: i64, size: u32, reply: ReplyData) {
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match handle.value() {
            Handle::Dir { .. } => reply.error(libc::EISDIR),
            Handle::File {
                file,
                rel,
                needs_transform,
            } => {
                let data = unwrap!(
                    reply,
                    self.read_for_handle(file, rel, offset.max(0) as u64, size, *needs_transform)
                );
                if self.opts.mount.trace > 1 {
                    tracing::trace!(?rel, offset, size, served = data.len(), "read");
                }
                reply.data(&data);
            }
        }
    }

    fn write(&self, fh: u64, offset: i64, data: &[u8], reply: fuser::ReplyWrite) {
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match handle.value() {
            Handle::Dir { .. } => reply.error(libc::EISDIR),
            Handle::File {
                file,
                rel,
                needs_transform,
            } => {
                let written = unwrap!(
                    reply,
                    self.write_for_handle(file, rel, offset.max(0) as u64, data, *needs_transform)
                );
                if self.opts.mount.trace > 1 {
                    tracing::trace!(?rel, offset, len = data.len(), "write");
                }
                reply.written(written);
            }
        }
    }

    fn flush(&self, fh: u64, reply: fuser::ReplyEmpty) {
        if self.handles.contains_key(&fh) {
            reply.ok();
        } else {
            reply.error(libc::EBADF);
        }
    }

    fn fsync(&self, fh: u64, reply: fuser::ReplyEmpty) {
        let Some(handle) = self.handles.get(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        match handle.value() {
            Handle::File { file, .. } => {
                unwrap!(reply, file.sync_all());
                reply.ok();
            }
            Handle::Dir { .. } => reply.ok(),
        }
    }

    fn release(&self, fh: u64, reply: fuser::ReplyEmpty) {
        let Some((_, _handle)) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        reply.ok();
    }

    fn create(
        &self,
        req_uid: u32,
        req_gid: u32,
        parent: u64,
        name: OsString,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        let Some(parent_rel) = self.rel_of(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        let native = self.opts.mount.to_native_name(name).to_string();
        let rel = parent_rel.join(&native);
        let full = self.source_path(&rel);

        let mut options = std::fs::OpenOptions::new();
        options
            .read(true)
            .write(true)
            .create(true)
            .truncate(flags & libc::O_TRUNC != 0)
            .mode(mode & !umask);
        if flags & libc::O_EXCL != 0 {
            options.create_new(true);
        }
        let file = unwrap!(reply, options.open(&full));
        unwrap!(
            reply,
            std::os::unix::fs::fchown(&file, Some(req_uid), Some(req_gid))
        );
        self.caches.neg.invalidate(&rel);

        let meta = unwrap!(reply, file.metadata());
        let ino = self.ino_for(&rel);
        let attr = self.attr_from_meta(ino, &rel, &meta);
        let needs_transform = self.opts.mount.needs_transform(&rel);
        let fopen_flags = if needs_transform { FOPEN_DIRECT_IO } else { 0 };
        let fh = self.allocate_handle(Handle::File {
            file,
            rel,
            needs_transform,
        });
        reply.created(&ENTRY_TTL, &attr, 0, fh, fopen_flags);
    }

    fn opendir(&self, ino: u64, reply: ReplyOpen) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let meta = unwrap!(reply, std::fs::symlink_metadata(self.source_path(&rel)));
        if !meta.is_dir() {
            reply.error(libc::ENOTDIR);
            return;
        }
        let fh = self.allocate_handle(Handle::Dir { rel });
        reply.opened(fh, 0);
    }

    fn readdir(&self, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let Some(rel) = self.handles.get(&fh).and_then(|h| match h.value() {
            Handle::Dir { rel } => Some(rel.clone()),
            Handle::File { .. } => None,
        }) else {
            reply.error(libc::EBADF);
            return;
        };

        let visible = unwrap!(reply, self.visible_entries(&rel));

        let parent_ino = match rel.parent() {
            Some(parent) => self.ino_for(parent),
            None => ino,
        };
        let mut entries: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        for entry in visible {
            let child_ino = self.ino_for(&rel.join(&entry.native));
            entries.push((child_ino, entry.kind, entry.presented));
        }

        for (idx, (child_ino, kind, name)) in
            entries.iter().enumerate().skip(offset.max(0) as usize)
        {
            if reply.add(*child_ino, (idx + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(&self, fh: u64, reply: fuser::ReplyEmpty) {
        let Some((_, _handle)) = self.handles.remove(&fh) else {
            reply.error(libc::EBADF);
            return;
        };
        reply.ok();
    }

    fn access(&self, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        let Some(rel) = self.rel_of(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let full = self.source_path(&rel);
        let Ok(path) = CString::new(full.as_os_str().as_bytes()) else {
            reply.error(libc::EINVAL);
            return;
        };
        let res = unsafe { libc::access(path.as_ptr(), mask) };
        if res == 0 {
            reply.ok();
        } else {
            reply.error(io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
        }
    }

    fn statfs(&self, ino: u64, reply: fuser::ReplyStatfs) {
        let rel = self.rel_of(ino).unwrap_or_default();
        let stat = unwrap!(reply, nix::sys::statvfs::statvfs(&self.source_path(&rel)));
        reply.statfs(
            stat.blocks(),
            stat.blocks_free(),
            stat.blocks_available(),
            stat.files(),
            stat.files_free(),
            stat.block_size() as u32,
            stat.name_max() as u32,
            stat.fragment_size() as u32,
        );
    }
}

/// Represents a mountable overlay session.
///
/// This implements the [`fuser::Filesystem`] trait, receiving all
/// requests and serving them from the injected cache bundle and the
/// source directory.
pub struct Session {
    inner: Arc<Filesystem>,
}

impl Session {
    /// Construct a new session serving the provided configuration
    /// with a fresh cache bundle.
    pub fn new(opts: Config) -> Result<Self, crate::Error> {
        Self::with_caches(opts, CacheBundle::new())
    }

    /// Construct a session over an explicit cache bundle.
    pub fn with_caches(opts: Config, caches: CacheBundle) -> Result<Self, crate::Error> {
        if !opts.source.is_dir() {
            return Err(crate::Error::InvalidSource(
                opts.source.display().to_string(),
            ));
        }
        Ok(Self {
            inner: Arc::new(Filesystem::new(opts, caches)),
        })
    }

    /// The mount options this session was configured with.
    pub fn mount_options(&self) -> Vec<MountOption> {
        self.inner.opts.mount_options.iter().cloned().collect()
    }
}

impl fuser::Filesystem for Session {
    fn init(
        &mut self,
        _req: &Request<'_>,
        config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        const DESIRED: &[(&str, u64)] = &[
            ("FUSE_ASYNC_READ", FUSE_ASYNC_READ),
            ("FUSE_BIG_WRITES", FUSE_BIG_WRITES),
            ("FUSE_EXPORT_SUPPORT", FUSE_EXPORT_SUPPORT),
            ("FUSE_FILE_OPS", FUSE_FILE_OPS),
            // drop stale kernel pages automatically when size/mtime move
            #[cfg(feature = "abi-7-22")]
            ("FUSE_AUTO_INVAL_DATA", FUSE_AUTO_INVAL_DATA),
        ];
        let all_desired = DESIRED.iter().fold(0, |prev, (_, i)| prev | i);
        if let Err(unsupported) = config.add_capabilities(all_desired) {
            let rejected = DESIRED
                .iter()
                .filter_map(|d| (d.1 & unsupported != 0).then_some(d.0));
            for name in rejected {
                tracing::warn!("FUSE feature rejected: {name}");
            }
            config
                .add_capabilities(all_desired & !unsupported)
                .expect("should accept after we remove unsupported caps");
        }
        tracing::info!("Overlay filesystem initialized");
        Ok(())
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        self.inner.lookup(parent, name.to_owned(), reply);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inner.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.inner.getattr(ino, reply);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        self.inner
            .setattr(ino, mode, uid, gid, size, atime, mtime, reply);
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        self.inner.readlink(ino, reply);
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        self.inner
            .mkdir(req.uid(), req.gid(), parent, name.to_owned(), mode, umask, reply);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
        self.inner.unlink(parent, name.to_owned(), reply);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: fuser::ReplyEmpty) {
        self.inner.rmdir(parent, name.to_owned(), reply);
    }

    fn symlink(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        self.inner.symlink(
            req.uid(),
            req.gid(),
            parent,
            link_name.to_owned(),
            target.to_owned(),
            reply,
        );
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: fuser::ReplyEmpty,
    ) {
        self.inner
            .rename(parent, name.to_owned(), newparent, newname.to_owned(), reply);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        self.inner.link(ino, newparent, newname.to_owned(), reply);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.inner.open(ino, flags, reply);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.inner.read(fh, offset, size, reply);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyWrite,
    ) {
        self.inner.write(fh, offset, data, reply);
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _lock_owner: u64,
        reply: fuser::ReplyEmpty,
    ) {
        self.inner.flush(fh, reply);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.inner.release(fh, reply);
    }

    fn fsync(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _datasync: bool,
        reply: fuser::ReplyEmpty,
    ) {
        self.inner.fsync(fh, reply);
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: fuser::ReplyCreate,
    ) {
        self.inner.create(
            req.uid(),
            req.gid(),
            parent,
            name.to_owned(),
            mode,
            umask,
            flags,
            reply,
        );
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        self.inner.opendir(ino, reply);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        self.inner.readdir(ino, fh, offset, reply);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        self.inner.releasedir(fh, reply);
    }

    fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        self.inner.access(ino, mask, reply);
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: fuser::ReplyStatfs) {
        self.inner.statfs(ino, reply);
    }
}

/// Holds an exclusive advisory lock on the file for the lifetime of
/// the guard; only the nonzero-offset write path takes it.
struct FlockGuard<'a> {
    file: &'a File,
}

impl<'a> FlockGuard<'a> {
    fn exclusive(file: &'a File) -> io::Result<Self> {
        let res = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if res != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { file })
    }
}

impl Drop for FlockGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

fn kind_of(file_type: &std::fs::FileType) -> FileType {
    if file_type.is_dir() {
        FileType::Directory
    } else if file_type.is_symlink() {
        FileType::Symlink
    } else if file_type.is_fifo() {
        FileType::NamedPipe
    } else if file_type.is_socket() {
        FileType::Socket
    } else if file_type.is_char_device() {
        FileType::CharDevice
    } else if file_type.is_block_device() {
        FileType::BlockDevice
    } else {
        FileType::RegularFile
    }
}

fn system_time(sec: i64, nsec: i64) -> SystemTime {
    if sec >= 0 {
        UNIX_EPOCH + Duration::new(sec as u64, nsec as u32)
    } else {
        UNIX_EPOCH - Duration::new((-sec) as u64, 0)
    }
}

/// The zero-inode attribute that makes the kernel cache a failed
/// lookup as a negative dentry for the reply's TTL.
fn negative_attr() -> FileAttr {
    FileAttr {
        ino: 0,
        size: 0,
        blocks: 0,
        atime: UNIX_EPOCH,
        mtime: UNIX_EPOCH,
        ctime: UNIX_EPOCH,
        crtime: UNIX_EPOCH,
        kind: FileType::RegularFile,
        perm: 0,
        nlink: 0,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: 512,
        flags: 0,
    }
}

/// Read up to `size` bytes at `offset`, looping on short reads.
fn read_range(file: &File, offset: u64, size: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; size];
    let mut consumed = 0;
    while consumed < size {
        let count = file.read_at(&mut buf[consumed..], offset + consumed as u64)?;
        if count == 0 {
            break;
        }
        consumed += count;
    }
    buf.truncate(consumed);
    Ok(buf)
}

fn slice_of(body: &[u8], offset: u64, size: usize) -> Vec<u8> {
    let start = (offset as usize).min(body.len());
    let end = (start + size).min(body.len());
    body[start..end].to_vec()
}

/// Apply the requested timestamps without following a final symlink.
fn set_times_nofollow(
    path: &Path,
    atime: Option<TimeOrNow>,
    mtime: Option<TimeOrNow>,
) -> io::Result<()> {
    fn timespec(t: Option<TimeOrNow>) -> libc::timespec {
        match t {
            None => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_OMIT,
            },
            Some(TimeOrNow::Now) => libc::timespec {
                tv_sec: 0,
                tv_nsec: libc::UTIME_NOW,
            },
            Some(TimeOrNow::SpecificTime(t)) => {
                let since = t
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::ZERO);
                libc::timespec {
                    tv_sec: since.as_secs() as libc::time_t,
                    tv_nsec: since.subsec_nanos() as libc::c_long,
                }
            }
        }
    }

    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
    let times = [timespec(atime), timespec(mtime)];
    let res = unsafe {
        libc::utimensat(
            libc::AT_FDCWD,
            cpath.as_ptr(),
            times.as_ptr(),
            libc::AT_SYMLINK_NOFOLLOW,
        )
    };
    if res != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
