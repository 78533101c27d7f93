//! Path normalization helpers
//!
//! Cache keys and backend requests always use normalized absolute paths so
//! that `a/b/../c` and `a/c` hit the same entry. Normalization is purely
//! lexical: it must work for paths that do not exist yet.

use std::path::{Component, Path, PathBuf};

/// Normalize a path to an absolute form without consulting the filesystem.
///
/// Relative paths are resolved against the current directory; `.` and `..`
/// components are folded away lexically.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative path from `root` to `path`, as a `/`-separated string key.
/// Returns `None` when `path` is not under `root`.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// True when `path` equals `root` or lives anywhere under it.
pub fn is_under(root: &Path, path: &Path) -> bool {
    path.starts_with(root)
}

/// True when `path` is a direct child of `dir`.
pub fn is_direct_child(dir: &Path, path: &Path) -> bool {
    path.parent().map(|p| p == dir).unwrap_or(false)
}
