//! Best-effort canonicalization for paths that may not exist.
//!
//! `std::fs::canonicalize` requires the full path to exist, which is too
//! strict for the access log builder: a write target usually doesn't
//! exist until the command creates it, and a `failed_read` path by
//! definition never exists at all. Both still need a stable, comparable
//! form so that two accesses to the same path (one before it existed,
//! one after) land on the same key.

use std::path::{Path, PathBuf};

/// Canonicalize `path` as far as the filesystem allows.
///
/// Walks up to the nearest existing ancestor, canonicalizes that (which
/// resolves symlinks and `..`/`.` components along the way), then
/// reattaches the non-existent suffix verbatim. On Unix every path has
/// `/` as an ancestor, and `/` always exists, so this always succeeds.
pub fn canonicalize_best_effort(path: &Path) -> PathBuf
{
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }

    let mut suffix = Vec::new();
    let mut ancestor = path;
    loop {
        let Some(parent) = ancestor.parent() else {
            // No existing ancestor was found (shouldn't happen for an
            // absolute Unix path, since "/" always exists); fall back
            // to the path as given.
            return path.to_path_buf();
        };

        if let Some(name) = ancestor.file_name() {
            suffix.push(name.to_owned());
        }

        if let Ok(canon) = parent.canonicalize() {
            let mut result = canon;
            for component in suffix.iter().rev() {
                result.push(component);
            }
            return result;
        }

        ancestor = parent;
    }
}
