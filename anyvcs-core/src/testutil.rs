//! Shared test doubles

use crate::backend::{
    Annotation, Capabilities, ChangeAction, CommitItem, RawStatusEntry, Revision, VcsBackend,
};
use crate::error::{Result, VcsError};
use crate::status::VersionStatus;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Canned-response backend for cache/scheduler tests. Only `status` has
/// real behavior; every other operation reports itself unsupported.
pub(crate) struct StubBackend {
    pub root: PathBuf,
    pub entries: Vec<RawStatusEntry>,
    pub capabilities: Capabilities,
    pub delay: Duration,
    pub fail: bool,
    status_calls: AtomicUsize,
}

impl StubBackend {
    pub fn new(root: &str, entries: Vec<RawStatusEntry>) -> Self {
        Self {
            root: PathBuf::from(root),
            entries,
            capabilities: Capabilities::default(),
            delay: Duration::ZERO,
            fail: false,
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn raw_entry(path: &str, status: VersionStatus, is_directory: bool) -> RawStatusEntry {
    RawStatusEntry {
        path: PathBuf::from(path),
        status,
        is_directory,
        remote_status: None,
    }
}

#[async_trait]
impl VcsBackend for StubBackend {
    fn root(&self) -> &Path {
        &self.root
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn status(
        &self,
        _path: &Path,
        _recursive: bool,
        _remote: bool,
    ) -> Result<Vec<RawStatusEntry>> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(VcsError::Unavailable("stub offline".into()));
        }
        Ok(self.entries.clone())
    }

    async fn add(&self, _path: &Path, _recursive: bool) -> Result<()> {
        Err(VcsError::Unsupported("add"))
    }

    async fn commit(
        &self,
        _items: &[CommitItem],
        _message: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<Revision> {
        Err(VcsError::Unsupported("commit"))
    }

    async fn revert(&self, _path: &Path, _recursive: bool) -> Result<()> {
        Err(VcsError::Unsupported("revert"))
    }

    async fn revert_revision(&self, _path: &Path, _revision: &str) -> Result<()> {
        Err(VcsError::Unsupported("revert_revision"))
    }

    async fn move_path(&self, _src: &Path, _dst: &Path, _force: bool) -> Result<()> {
        Err(VcsError::Unsupported("move"))
    }

    async fn delete(&self, _path: &Path, _force: bool, _keep_local: bool) -> Result<()> {
        Err(VcsError::Unsupported("delete"))
    }

    async fn lock(&self, _paths: &[PathBuf]) -> Result<()> {
        Err(VcsError::Unsupported("lock"))
    }

    async fn unlock(&self, _paths: &[PathBuf]) -> Result<()> {
        Err(VcsError::Unsupported("unlock"))
    }

    async fn ignore(&self, _paths: &[PathBuf]) -> Result<()> {
        Err(VcsError::Unsupported("ignore"))
    }

    async fn unignore(&self, _paths: &[PathBuf]) -> Result<()> {
        Err(VcsError::Unsupported("unignore"))
    }

    async fn history(&self, _path: &Path) -> Result<Vec<Revision>> {
        Err(VcsError::Unsupported("history"))
    }

    async fn revision_changes(&self, _revision: &str) -> Result<Vec<(PathBuf, ChangeAction)>> {
        Err(VcsError::Unsupported("revision_changes"))
    }

    async fn text_at_revision(&self, _path: &Path, _revision: &str) -> Result<Bytes> {
        Err(VcsError::Unsupported("text_at_revision"))
    }

    async fn base_text(&self, _path: &Path) -> Result<Bytes> {
        Err(VcsError::Unsupported("base_text"))
    }

    async fn blame(&self, _path: &Path) -> Result<Vec<Annotation>> {
        Err(VcsError::Unsupported("blame"))
    }

    async fn diff(&self, _path: &Path) -> Result<String> {
        Err(VcsError::Unsupported("diff"))
    }

    async fn checkout(&self, _target: &Path) -> Result<()> {
        Err(VcsError::Unsupported("checkout"))
    }

    async fn update(&self, _path: &Path, _recursive: bool) -> Result<()> {
        Err(VcsError::Unsupported("update"))
    }
}
