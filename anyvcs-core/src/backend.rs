//! Backend adapter boundary
//!
//! A backend wraps one concrete version control tool (git, svn, bzr, or the
//! built-in local backend). The repository facade and query scheduler depend
//! only on this trait; raw status entries are parsed into [`VersionInfo`]
//! snapshots by the scheduler before they reach the cache.

use crate::error::Result;
use crate::status::{VersionInfo, VersionStatus};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One entry of raw backend status output, prior to normalization.
#[derive(Debug, Clone)]
pub struct RawStatusEntry {
    pub path: PathBuf,
    pub status: VersionStatus,
    pub is_directory: bool,
    pub remote_status: Option<VersionStatus>,
}

impl RawStatusEntry {
    /// Convert raw backend output into a cacheable snapshot.
    pub fn into_info(self) -> VersionInfo {
        VersionInfo {
            path: crate::paths::normalize(&self.path),
            status: self.status,
            is_directory: self.is_directory,
            remote_status: self.remote_status,
        }
    }
}

/// The kind of change a revision applied to one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Add,
    Delete,
    Modify,
    Replace,
}

/// One backend-recorded change to the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Backend revision identifier (content hash, revision number, ...).
    pub id: String,
    pub message: String,
    pub author: String,
    pub email: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Per-line attribution for one line of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Revision identifier, or [`Annotation::WORKING_COPY`] for lines not
    /// yet committed.
    pub revision: String,
    pub author: String,
    pub email: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl Annotation {
    /// Synthetic revision label for uncommitted local edits.
    pub const WORKING_COPY: &'static str = "working copy";

    /// Author recorded for uncommitted local edits.
    pub const UNCOMMITTED_AUTHOR: &'static str = "<uncommitted>";

    /// Attribution for a line only present in the working copy.
    pub fn uncommitted() -> Self {
        Self {
            revision: Self::WORKING_COPY.to_string(),
            author: Self::UNCOMMITTED_AUTHOR.to_string(),
            email: None,
            date: None,
        }
    }

    pub fn has_email(&self) -> bool {
        self.email.is_some()
    }

    pub fn has_date(&self) -> bool {
        self.date.is_some()
    }
}

/// Static description of what a backend can do.
///
/// `repo_items_count` is the number of extra entries the backend reports for
/// its own metadata (e.g. a VCS control file) in a shallow directory query of
/// the root; `repo_items_count_recursive` is the recursive equivalent. The
/// offsets are backend-specific and must never be hardcoded by callers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub supports_locking: bool,
    pub supports_revert_revision: bool,
    pub repo_items_count: usize,
    pub repo_items_count_recursive: usize,
}

/// One item handed to [`VcsBackend::commit`].
#[derive(Debug, Clone)]
pub struct CommitItem {
    pub path: PathBuf,
    pub action: ChangeAction,
}

/// Interface implemented by every concrete version control backend.
///
/// All operations may fail with a [`crate::VcsError`] carrying a
/// human-readable message. Status queries are the hot path and are the only
/// operations routed through the background query scheduler.
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Repository root this backend manages.
    fn root(&self) -> &Path;

    fn capabilities(&self) -> Capabilities;

    /// Raw status of `path`; for directories the result covers the
    /// *interesting* entries underneath (anything not plainly unversioned
    /// and unchanged). `remote` additionally fills remote status.
    async fn status(&self, path: &Path, recursive: bool, remote: bool)
    -> Result<Vec<RawStatusEntry>>;

    async fn add(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Commit the given items. Returns the created revision.
    async fn commit(
        &self,
        items: &[CommitItem],
        message: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Revision>;

    /// Restore working contents of `path` to the last committed revision,
    /// or unschedule a pending add/delete.
    async fn revert(&self, path: &Path, recursive: bool) -> Result<()>;

    /// Undo the change a specific revision applied to `path`, leaving the
    /// inverse as an uncommitted working-copy modification.
    async fn revert_revision(&self, path: &Path, revision: &str) -> Result<()>;

    async fn move_path(&self, src: &Path, dst: &Path, force: bool) -> Result<()>;

    async fn delete(&self, path: &Path, force: bool, keep_local: bool) -> Result<()>;

    async fn lock(&self, paths: &[PathBuf]) -> Result<()>;

    async fn unlock(&self, paths: &[PathBuf]) -> Result<()>;

    async fn ignore(&self, paths: &[PathBuf]) -> Result<()>;

    async fn unignore(&self, paths: &[PathBuf]) -> Result<()>;

    /// Revisions that touched `path`, newest first.
    async fn history(&self, path: &Path) -> Result<Vec<Revision>>;

    /// Per-path actions recorded by one revision.
    async fn revision_changes(&self, revision: &str) -> Result<Vec<(PathBuf, ChangeAction)>>;

    /// Content of `path` as of `revision`.
    async fn text_at_revision(&self, path: &Path, revision: &str) -> Result<Bytes>;

    /// Content of `path` as last known to the backend, independent of
    /// working-directory edits.
    async fn base_text(&self, path: &Path) -> Result<Bytes>;

    /// Per-line attribution for the committed content of `path`, in file
    /// line order.
    async fn blame(&self, path: &Path) -> Result<Vec<Annotation>>;

    /// Unified diff of the working copy of `path` against its base text.
    async fn diff(&self, path: &Path) -> Result<String>;

    /// Materialize the repository content into `target`.
    async fn checkout(&self, target: &Path) -> Result<()>;

    /// Bring the working copy up to date with state committed elsewhere.
    async fn update(&self, path: &Path, recursive: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uncommitted_annotation() {
        let a = Annotation::uncommitted();
        assert_eq!(a.revision, Annotation::WORKING_COPY);
        assert_eq!(a.author, Annotation::UNCOMMITTED_AUTHOR);
        assert!(!a.has_email());
        assert!(!a.has_date());
    }

    #[test]
    fn test_raw_entry_normalizes_path() {
        let entry = RawStatusEntry {
            path: PathBuf::from("/repo/a/../b.txt"),
            status: VersionStatus::VERSIONED,
            is_directory: false,
            remote_status: None,
        };
        let info = entry.into_info();
        assert_eq!(info.path, PathBuf::from("/repo/b.txt"));
    }
}
