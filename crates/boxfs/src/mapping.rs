// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! The immutable mapping model shared by the overlay filesystem,
//! the syscall interposer and the launch assembler.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./mapping_test.rs"]
mod mapping_test;

/// Characters that a session directory name cannot carry; each is
/// replaced with '-' when a project path is encoded into a flat name.
pub const SESSION_ENCODE_CHARS: &[char] = &[':', '/', '\\', '.', ' '];

/// How the host side of a [`PathMapping`] is spelled.
///
/// Each variant carries exactly what its matching algorithm needs;
/// a `Plain` host path already agrees with the container spelling
/// and has nothing to rewrite in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    /// `X:/...` - the drive letter is matched case-insensitively.
    Drive { letter: u8 },
    /// `//server/share/...`
    Unc,
    /// `/mnt/<letter>/...`
    Wsl { letter: u8 },
    /// Any other absolute path.
    Plain,
}

/// One pair declaring that host-side path `from` corresponds to
/// container-side path `to`. Immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    pub from: String,
    pub to: String,
    pub kind: PathKind,
}

impl PathMapping {
    /// Build a mapping from one `HOST ':' CONTAINER` entry, normalizing
    /// the host side to forward slashes with no trailing slash.
    pub fn new<F: AsRef<str>, T: AsRef<str>>(from: F, to: T) -> Result<Self> {
        let from = normalize_host_path(from.as_ref());
        let to = to.as_ref().trim_end_matches('/').to_string();
        if from.is_empty() || to.is_empty() {
            return Err(Error::InvalidPathMapping(format!("{from}:{to}")));
        }
        let kind = classify(&from)?;
        Ok(Self { from, to, kind })
    }
}

/// One pair bridging the two encoded spellings of a project directory
/// name: the container-encoded form presented to the agent and the
/// native-encoded form stored on the host disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirMapping {
    pub container: String,
    pub native: String,
}

/// The set of file extensions whose contents are eligible for the
/// in-flight transform. Comparison is case-insensitive.
#[derive(Debug, Clone)]
pub struct ExtensionSet(Vec<String>);

impl ExtensionSet {
    pub fn parse<S: AsRef<str>>(spec: S) -> Self {
        Self(
            spec.as_ref()
                .split(',')
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    pub fn contains_path<P: AsRef<Path>>(&self, path: P) -> bool {
        let Some(ext) = path.as_ref().extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.0.iter().any(|e| *e == ext)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for ExtensionSet {
    fn default() -> Self {
        Self::parse(crate::DEFAULT_EXTENSIONS)
    }
}

/// The full, immutable configuration of one overlay mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Original directory that the overlay serves; the bytes are read
    /// through the auxiliary bind location, not through this path.
    pub source: PathBuf,
    pub path_maps: Vec<PathMapping>,
    pub dir_maps: Vec<DirMapping>,
    pub extensions: ExtensionSet,
    pub trace: u8,
}

impl MountConfig {
    /// True iff the file at `path` is eligible for content transformation:
    /// its final extension is in the configured set and at least one
    /// mapping exists to apply. This predicate is the single filter in
    /// front of every transform call.
    pub fn needs_transform<P: AsRef<Path>>(&self, path: P) -> bool {
        if self.path_maps.is_empty() && self.dir_maps.is_empty() {
            return false;
        }
        self.extensions.contains_path(path)
    }

    pub fn has_wsl_mapping(&self) -> bool {
        self.path_maps
            .iter()
            .any(|m| matches!(m.kind, PathKind::Wsl { .. }))
    }

    pub fn has_unc_mapping(&self) -> bool {
        self.path_maps.iter().any(|m| m.kind == PathKind::Unc)
    }

    /// Translate one path segment from the caller's container-encoded
    /// spelling to the on-disk native spelling.
    pub fn to_native_name<'a>(&'a self, name: &'a str) -> &'a str {
        for dm in self.dir_maps.iter() {
            if dm.container == name {
                return &dm.native;
            }
        }
        name
    }

    /// Translate one on-disk segment to the spelling presented to callers.
    pub fn to_presented_name<'a>(&'a self, name: &'a str) -> &'a str {
        for dm in self.dir_maps.iter() {
            if dm.native == name {
                return &dm.container;
            }
        }
        name
    }
}

/// Parse a `pathmap` string: `ENTRY (';' ENTRY)*`, `ENTRY := HOST ':' CONTAINER`.
///
/// A single colon immediately after a leading drive letter belongs to the
/// host path and is not an entry separator.
pub fn parse_path_map<S: AsRef<str>>(spec: S) -> Result<Vec<PathMapping>> {
    let mut maps = Vec::new();
    for entry in spec.as_ref().split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (from, to) = split_map_entry(entry)
            .ok_or_else(|| Error::InvalidPathMapping(entry.to_string()))?;
        maps.push(PathMapping::new(from, to)?);
    }
    Ok(maps)
}

/// Parse a `dirmap` string: `ENCODED ':' NATIVE (';' ...)*`. Encoded names
/// cannot contain ':' (the encoding replaces it), so the first colon splits.
pub fn parse_dir_map<S: AsRef<str>>(spec: S) -> Result<Vec<DirMapping>> {
    let mut maps = Vec::new();
    for entry in spec.as_ref().split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (container, native) = entry
            .split_once(':')
            .ok_or_else(|| Error::InvalidDirMapping(entry.to_string()))?;
        if container.is_empty() || native.is_empty() {
            return Err(Error::InvalidDirMapping(entry.to_string()));
        }
        maps.push(DirMapping {
            container: container.to_string(),
            native: native.to_string(),
        });
    }
    Ok(maps)
}

/// Encode an absolute project path into the flat directory-name token
/// used to identify its session storage.
pub fn encode_session_dir<S: AsRef<str>>(path: S) -> String {
    path.as_ref()
        .chars()
        .map(|c| {
            if SESSION_ENCODE_CHARS.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .collect()
}

/// Normalize a host path: backslashes become slashes, trailing slash dropped.
pub fn normalize_host_path(path: &str) -> String {
    let normalized: String = path
        .chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .collect();
    // a bare drive root like "d:/" keeps its slash
    let trimmed = normalized.trim_end_matches('/');
    if trimmed.len() == 2
        && trimmed.ends_with(':')
        && trimmed.as_bytes()[0].is_ascii_alphabetic()
    {
        format!("{trimmed}/")
    } else {
        trimmed.to_string()
    }
}

fn classify(from: &str) -> Result<PathKind> {
    let bytes = from.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Ok(PathKind::Drive {
            letter: bytes[0].to_ascii_lowercase(),
        });
    }
    if from.starts_with("//") {
        return Ok(PathKind::Unc);
    }
    if let Some(rest) = from.strip_prefix("/mnt/") {
        let rb = rest.as_bytes();
        if !rb.is_empty()
            && rb[0].is_ascii_alphabetic()
            && (rb.len() == 1 || rb[1] == b'/')
        {
            return Ok(PathKind::Wsl {
                letter: rb[0].to_ascii_lowercase(),
            });
        }
    }
    if from.starts_with('/') {
        return Ok(PathKind::Plain);
    }
    Err(Error::InvalidPathMapping(from.to_string()))
}

fn split_map_entry(entry: &str) -> Option<(&str, &str)> {
    let bytes = entry.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        if *b != b':' {
            continue;
        }
        // the drive-letter colon of the host path
        if idx == 1 && bytes[0].is_ascii_alphabetic() {
            continue;
        }
        return Some((&entry[..idx], &entry[idx + 1..]));
    }
    None
}
