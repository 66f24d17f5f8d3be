// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! Mount plumbing for the overlay filesystem.
//!
//! The overlay mounts over its own source directory: the original path
//! is first bind-mounted to an auxiliary runtime location, then the
//! overlay mounts at the original path and serves every operation by
//! reading through the auxiliary. Consumers keep using the original
//! path and never see the indirection.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./env_test.rs"]
mod env_test;

const NONE: Option<&str> = None;

/// The two mounts backing one overlay instance.
#[derive(Debug, Clone)]
pub struct MountPoints {
    /// Where the overlay is mounted; the path consumers use.
    pub target: PathBuf,
    /// The auxiliary bind of the original directory that the overlay
    /// reads through.
    pub aside: PathBuf,
}

/// Compute the auxiliary runtime directory for a named mount.
pub fn runtime_dir(name: &str) -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("boxfs").join(name),
        _ => {
            let uid = nix::unistd::getuid();
            PathBuf::from(format!("/tmp/boxfs-{uid}")).join(name)
        }
    }
}

/// Bind-mount the original directory aside so the overlay can mount
/// over it while still reaching the real files.
pub fn bind_source_aside(target: &Path, name: &str) -> Result<MountPoints> {
    use nix::mount::{mount, MsFlags};

    if !target.is_dir() {
        return Err(Error::MissingMountSource(target.display().to_string()));
    }

    let aside = runtime_dir(name).join("src");
    create_aside_dir(&aside, 0o755)?;

    tracing::debug!(?target, ?aside, "binding mount source aside...");
    mount(Some(target), &aside, NONE, MsFlags::MS_BIND, NONE).map_err(|err| {
        Error::wrap_nix(err, format!("Failed to bind {} aside", target.display()))
    })?;

    Ok(MountPoints {
        target: target.to_owned(),
        aside,
    })
}

/// Lazily unmount both mounts of an overlay instance, overlay first.
///
/// `MNT_DETACH` is used so open handles do not block the teardown; the
/// kernel finishes the unmount when the last reference drops.
pub fn unmount(points: &MountPoints) -> Result<()> {
    use nix::mount::{umount2, MntFlags};

    tracing::debug!(target = ?points.target, "unmounting overlay...");
    if let Err(err) = umount2(&points.target, MntFlags::MNT_DETACH) {
        // the fuse session may already have unmounted itself on exit
        if err != nix::errno::Errno::EINVAL && err != nix::errno::Errno::ENOENT {
            return Err(Error::wrap_nix(
                err,
                format!("Failed to unmount {}", points.target.display()),
            ));
        }
    }
    tracing::debug!(aside = ?points.aside, "unmounting source bind...");
    umount2(&points.aside, MntFlags::MNT_DETACH).map_err(|err| {
        Error::wrap_nix(
            err,
            format!("Failed to unmount {}", points.aside.display()),
        )
    })?;
    Ok(())
}

/// Create the auxiliary mount directory, applying `mode` to every
/// level this call brings into existence. Levels that already exist
/// (a shared `/tmp/boxfs-<uid>` from an earlier mount) keep their
/// permissions.
fn create_aside_dir(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut missing = Vec::new();
    let mut cursor = path;
    while !cursor.exists() {
        missing.push(cursor.to_owned());
        match cursor.parent() {
            Some(parent) => cursor = parent,
            None => break,
        }
    }
    std::fs::create_dir_all(path)?;
    let perms = std::fs::Permissions::from_mode(mode);
    for dir in missing {
        std::fs::set_permissions(&dir, perms.clone())?;
    }
    Ok(())
}
