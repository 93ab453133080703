// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::{Component, Path, PathBuf};

use crate::GuardError;

/// Resolve `raw_path` against `root` and prove the result stays inside `root`.
///
/// The target may not exist yet (`write_file` creates it), so resolution
/// splits the candidate at the deepest existing ancestor: that prefix is
/// canonicalized (following symlinks), while the not-yet-existing suffix is
/// appended lexically and must not contain `..`. Absolute candidates are
/// taken as-is and subjected to the same containment test.
pub fn resolve_guarded_path(root: &Path, raw_path: &str) -> Result<PathBuf, GuardError> {
    let escape = || GuardError::PathEscape(raw_path.to_string());

    let root = root.canonicalize().map_err(|_| escape())?;
    let candidate = {
        let raw = Path::new(raw_path);
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            root.join(raw)
        }
    };

    let resolved = resolve_with_missing_suffix(&candidate).ok_or_else(escape)?;
    if !resolved.starts_with(&root) {
        return Err(escape());
    }
    Ok(resolved)
}

/// Canonicalize the deepest existing ancestor of `candidate` and re-append
/// the remaining (not yet created) components. Returns `None` when the
/// missing suffix tries to traverse upward.
fn resolve_with_missing_suffix(candidate: &Path) -> Option<PathBuf> {
    if let Ok(resolved) = candidate.canonicalize() {
        return Some(resolved);
    }

    let mut existing = candidate.to_path_buf();
    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    while !existing.exists() {
        let name = existing.file_name()?.to_os_string();
        suffix.push(name);
        existing = existing.parent()?.to_path_buf();
    }

    let mut resolved = existing.canonicalize().ok()?;
    for name in suffix.iter().rev() {
        match Path::new(name).components().next() {
            Some(Component::Normal(_)) => resolved.push(name),
            // `..` or `.` in the missing tail cannot be trusted lexically.
            _ => return None,
        }
    }
    Some(resolved)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
