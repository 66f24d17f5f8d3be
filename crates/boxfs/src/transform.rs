// Copyright (c) Contributors to the BoxFS project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/boxfs/boxfs

//! The two-pass, in-flight path transform.
//!
//! Pass 1 rewrites absolute path prefixes (drive, UNC, WSL) between their
//! host and container spellings; Pass 2 rewrites encoded project directory
//! names wherever they appear as a path segment. Both passes are streaming
//! byte walkers: one input cursor, one output builder, no regex and no
//! per-match intermediate allocation.
//!
//! Every function returns `None` when nothing matched so that callers can
//! pass the original bytes through untouched.

use crate::mapping::{DirMapping, MountConfig, PathKind, PathMapping};

#[cfg(test)]
#[path = "./transform_test.rs"]
mod transform_test;

/// How much of a file the quick-scan probe examines before deciding
/// that a full transform cannot be necessary.
pub const QUICK_SCAN_LIMIT: usize = 64 * 1024;

/// Bytes that end a path embedded in JSON/JSONL content.
const fn is_terminator(b: u8) -> bool {
    matches!(b, b'"' | b',' | b'}' | b']' | b' ' | b'\t' | b'\r' | b'\n')
}

/// A matched prefix must be followed by a terminator or another path
/// separator; anything else means we are looking at a longer sibling
/// name (`.../ccbox-web` when the mapping names `.../ccbox`).
fn at_boundary(buf: &[u8], pos: usize) -> bool {
    match buf.get(pos) {
        None => true,
        Some(&b) => is_terminator(b) || b == b'/' || b == b'\\',
    }
}

/// Length of the path separator at `i`: a slash, a JSON-escaped
/// backslash pair, or a bare backslash. Zero when `i` is not at a
/// separator.
fn separator_len(buf: &[u8], i: usize) -> usize {
    match buf[i] {
        b'/' => 1,
        b'\\' if buf.get(i + 1) == Some(&b'\\') => 2,
        b'\\' => 1,
        _ => 0,
    }
}

fn dir_terminator_at(buf: &[u8], pos: usize) -> bool {
    match buf.get(pos) {
        None => true,
        Some(&b) => matches!(b, b'/' | b'\\' | b'"' | b',' | b'}' | b']'),
    }
}

/// Transform a host-format buffer into its container-format spelling.
/// Returns `None` if the buffer contains nothing to rewrite.
pub fn to_container(buf: &[u8], cfg: &MountConfig) -> Option<Vec<u8>> {
    let pass1 = pass1_to_container(buf, &cfg.path_maps);
    let base = pass1.as_deref().unwrap_or(buf);
    match apply_dir_map(base, &cfg.dir_maps, true) {
        Some(out) => Some(out),
        None => pass1,
    }
}

/// Transform a container-format buffer back into its host-format
/// spelling. Returns `None` if the buffer contains nothing to rewrite.
///
/// The passes run in reverse order so that the composition is the exact
/// inverse of [`to_container`].
pub fn to_host(buf: &[u8], cfg: &MountConfig) -> Option<Vec<u8>> {
    let pass2 = apply_dir_map(buf, &cfg.dir_maps, false);
    let base = pass2.as_deref().unwrap_or(buf);
    match pass1_to_host(base, &cfg.path_maps) {
        Some(out) => Some(out),
        None => pass2,
    }
}

/// Pass 2: replace encoded directory names appearing as path segments.
///
/// A segment matches when preceded by a separator (`/`, `\`, or the JSON
/// escape `\\`) and followed by a separator, a structural character, or
/// the end of the buffer. `to_container` selects the direction: true
/// replaces native names with container names, false the reverse.
///
/// Known limitation: the match is purely lexical, so an encoded name
/// sitting inside a non-path string value is rewritten all the same.
pub fn apply_dir_map(buf: &[u8], maps: &[DirMapping], to_container: bool) -> Option<Vec<u8>> {
    if maps.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(buf.len() + 16);
    let mut changed = false;
    let mut i = 0;
    'outer: while i < buf.len() {
        let sep_len = separator_len(buf, i);
        if sep_len > 0 {
            let start = i + sep_len;
            for dm in maps {
                let (needle, replacement) = if to_container {
                    (dm.native.as_bytes(), dm.container.as_bytes())
                } else {
                    (dm.container.as_bytes(), dm.native.as_bytes())
                };
                if buf[start..].starts_with(needle)
                    && dir_terminator_at(buf, start + needle.len())
                {
                    out.extend_from_slice(&buf[i..start]);
                    out.extend_from_slice(replacement);
                    i = start + needle.len();
                    changed = true;
                    continue 'outer;
                }
            }
        }
        out.push(buf[i]);
        i += 1;
    }
    changed.then_some(out)
}

/// Bounded probe over the head of a file: true if any pattern that the
/// transform could rewrite appears, false if the file can be served
/// straight off the disk.
pub fn quick_scan(buf: &[u8], cfg: &MountConfig) -> bool {
    let head = &buf[..buf.len().min(QUICK_SCAN_LIMIT)];
    let wsl = cfg.has_wsl_mapping();
    let unc = cfg.has_unc_mapping();
    for (i, &b) in head.iter().enumerate() {
        if b.is_ascii_alphabetic() && head.get(i + 1) == Some(&b':') {
            return true;
        }
        if unc && b == b'\\' {
            return true;
        }
        if wsl && b == b'/' && head[i..].starts_with(b"/mnt/") {
            return true;
        }
    }
    for m in cfg.path_maps.iter() {
        if contains_subslice(head, m.to.as_bytes()) {
            return true;
        }
    }
    for dm in cfg.dir_maps.iter() {
        if contains_subslice(head, dm.native.as_bytes())
            || contains_subslice(head, dm.container.as_bytes())
        {
            return true;
        }
    }
    false
}

fn pass1_to_container(buf: &[u8], maps: &[PathMapping]) -> Option<Vec<u8>> {
    if maps.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(buf.len() + 16);
    let mut changed = false;
    let mut i = 0;
    while i < buf.len() {
        match rewrite_prefix_at(buf, i, maps, &mut out) {
            Some(next) => {
                i = next;
                changed = true;
            }
            None => {
                out.push(buf[i]);
                i += 1;
            }
        }
    }
    changed.then_some(out)
}

/// Attempt every mapping at position `i`; on a match, emit the container
/// prefix plus the slash-normalized remainder of the path and return the
/// input position to resume scanning from.
fn rewrite_prefix_at(
    buf: &[u8],
    i: usize,
    maps: &[PathMapping],
    out: &mut Vec<u8>,
) -> Option<usize> {
    let head = buf[i];
    for m in maps {
        let from = m.from.trim_end_matches('/').as_bytes();
        let matched_end = match m.kind {
            PathKind::Drive { letter } => {
                if !head.is_ascii_alphabetic()
                    || head.to_ascii_lowercase() != letter
                    || buf.get(i + 1) != Some(&b':')
                {
                    continue;
                }
                match_from_tail(buf, i + 2, &from[2..])
            }
            PathKind::Unc => {
                if head != b'\\' {
                    continue;
                }
                match_from_tail(buf, i, from)
            }
            PathKind::Wsl { .. } => {
                if !buf[i..].starts_with(b"/mnt/") {
                    continue;
                }
                match_from_tail(buf, i, from)
            }
            // both spellings already agree; nothing to rewrite
            PathKind::Plain => continue,
        };
        let Some(end) = matched_end else { continue };
        if !at_boundary(buf, end) {
            continue;
        }
        out.extend_from_slice(m.to.as_bytes());
        return Some(copy_suffix_to_container(buf, end, out));
    }
    None
}

/// Walk the host-side tail of a mapping against the buffer, JSON-unescaping
/// as it goes: a mapping `/` accepts `/`, `\`, or the two-byte escape `\\`.
/// All other bytes must match exactly.
fn match_from_tail(buf: &[u8], start: usize, tail: &[u8]) -> Option<usize> {
    let mut i = start;
    for &mc in tail {
        if mc == b'/' {
            if buf[i..].starts_with(b"\\\\") {
                i += 2;
            } else if matches!(buf.get(i), Some(&b'/') | Some(&b'\\')) {
                i += 1;
            } else {
                return None;
            }
        } else if buf.get(i) == Some(&mc) {
            i += 1;
        } else {
            return None;
        }
    }
    Some(i)
}

/// Copy the remainder of a matched path up to the next terminator,
/// collapsing backslash separators (escaped or not) into slashes.
fn copy_suffix_to_container(buf: &[u8], mut i: usize, out: &mut Vec<u8>) -> usize {
    while i < buf.len() && !is_terminator(buf[i]) {
        if buf[i..].starts_with(b"\\\\") {
            out.push(b'/');
            i += 2;
        } else if buf[i] == b'\\' {
            out.push(b'/');
            i += 1;
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }
    i
}

fn pass1_to_host(buf: &[u8], maps: &[PathMapping]) -> Option<Vec<u8>> {
    if maps.is_empty() {
        return None;
    }
    let mut out = Vec::with_capacity(buf.len() + 16);
    let mut changed = false;
    let mut i = 0;
    'outer: while i < buf.len() {
        for m in maps {
            if m.kind == PathKind::Plain {
                continue;
            }
            let to = m.to.as_bytes();
            if !buf[i..].starts_with(to) || !at_boundary(buf, i + to.len()) {
                continue;
            }
            emit_host_prefix(m, &mut out);
            i = copy_suffix_to_host(buf, i + to.len(), &mut out, m.kind);
            changed = true;
            continue 'outer;
        }
        out.push(buf[i]);
        i += 1;
    }
    changed.then_some(out)
}

/// Re-emit the host spelling of a mapping: drive and UNC prefixes restore
/// JSON-escaped backslash separators, WSL prefixes keep forward slashes.
/// The drive letter comes back in the case recorded in the mapping.
fn emit_host_prefix(m: &PathMapping, out: &mut Vec<u8>) {
    let from = m.from.trim_end_matches('/').as_bytes();
    match m.kind {
        PathKind::Wsl { .. } => out.extend_from_slice(from),
        _ => {
            for &b in from {
                if b == b'/' {
                    out.extend_from_slice(b"\\\\");
                } else {
                    out.push(b);
                }
            }
        }
    }
}

fn copy_suffix_to_host(buf: &[u8], mut i: usize, out: &mut Vec<u8>, kind: PathKind) -> usize {
    let escape = !matches!(kind, PathKind::Wsl { .. });
    while i < buf.len() && !is_terminator(buf[i]) {
        if escape && buf[i] == b'/' {
            out.extend_from_slice(b"\\\\");
        } else {
            out.push(buf[i]);
        }
        i += 1;
    }
    i
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
