//! Repository detection
//!
//! Given a filesystem path, find the repository root that owns it and the
//! kind of backend that applies. Detection must not be fooled by stray VCS
//! metadata directories: an empty `.git` or `.svn` lying around does not
//! make its parent a repository, so every probe also checks for the control
//! file a live repository always carries.

use crate::config::CONTROL_DIR;
use crate::paths;
use std::path::{Path, PathBuf};

/// Marker-directory probe for one backend kind.
#[derive(Debug, Clone)]
pub struct RepositoryProbe {
    /// Backend kind, e.g. "git".
    pub vcs: &'static str,
    /// Metadata directory kept at the repository root, e.g. ".git".
    pub marker: &'static str,
    /// File inside the marker that a live repository always has.
    pub control_file: &'static str,
}

impl RepositoryProbe {
    /// True when `dir` is a live repository root for this backend.
    pub fn matches(&self, dir: &Path) -> bool {
        let marker = dir.join(self.marker);
        marker.is_dir() && marker.join(self.control_file).exists()
    }
}

/// Probes for the backend kinds this layer knows about.
pub fn builtin_probes() -> Vec<RepositoryProbe> {
    vec![
        RepositoryProbe {
            vcs: "local",
            marker: CONTROL_DIR,
            control_file: "state.json",
        },
        RepositoryProbe {
            vcs: "git",
            marker: ".git",
            control_file: "HEAD",
        },
        RepositoryProbe {
            vcs: "svn",
            marker: ".svn",
            control_file: "wc.db",
        },
        RepositoryProbe {
            vcs: "bzr",
            marker: ".bzr",
            control_file: "branch-format",
        },
    ]
}

/// Walk up from `path` and return the owning repository root and backend
/// kind, or `None` when no live repository encloses the path.
///
/// The path itself need not exist: a yet-to-be-created file under a live
/// root still resolves to that root.
pub fn detect(path: &Path) -> Option<(PathBuf, &'static str)> {
    detect_with(path, &builtin_probes())
}

pub fn detect_with(path: &Path, probes: &[RepositoryProbe]) -> Option<(PathBuf, &'static str)> {
    let start = paths::normalize(path);
    let mut current: Option<&Path> = Some(start.as_path());
    while let Some(dir) = current {
        for probe in probes {
            if probe.matches(dir) {
                return Some((dir.to_path_buf(), probe.vcs));
            }
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_scattered_dot_dirs_are_ignored() {
        let working = TempDir::new().unwrap();
        let path = working.path().join("test");
        fs::create_dir(&path).unwrap();
        // Stale metadata directories with no control files inside.
        fs::create_dir(working.path().join(".git")).unwrap();
        fs::create_dir(working.path().join(".svn")).unwrap();

        assert_eq!(detect(&path), None);
    }

    #[test]
    fn test_live_root_is_found_from_children() {
        let working = TempDir::new().unwrap();
        let root = working.path().join("repo");
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();

        let file = root.join("src").join("lib.rs");
        let (found, vcs) = detect(&file).expect("repository should be detected");
        assert_eq!(found, root);
        assert_eq!(vcs, "git");

        // Nonexistent paths under the root still resolve to it.
        let ghost = root.join("do").join("i").join("exist");
        assert_eq!(detect(&ghost).unwrap().0, root);
    }

    #[test]
    fn test_paths_above_root_are_not_owned() {
        let working = TempDir::new().unwrap();
        let root = working.path().join("repo");
        fs::create_dir_all(root.join(CONTROL_DIR)).unwrap();
        fs::write(root.join(CONTROL_DIR).join("state.json"), "{}").unwrap();

        assert_eq!(detect(&root).unwrap().1, "local");
        assert_eq!(detect(working.path()), None);
    }
}
