//! Repository facade
//!
//! The public surface of the layer: status reads served through the
//! asynchronous cache, and mutating operations that drive the backend
//! directly on the caller's task and invalidate the cache afterwards.
//! Sequential ordering of add/commit/revert matters more than concurrency,
//! so mutating calls are never routed through the scheduler.

use crate::backend::{Annotation, Capabilities, ChangeAction, Revision, VcsBackend};
use crate::cache::{QueryKey, StatusCache};
use crate::changeset::ChangeSet;
use crate::config::VcsConfig;
use crate::error::{Result, VcsError};
use crate::paths;
use crate::progress::ProgressMonitor;
use crate::scheduler::{QueryScheduler, split_entries};
use crate::status::{QueryFlags, VersionInfo};
use lru::LruCache;
use similar::{ChangeTag, TextDiff};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// One open repository: a backend plus its status cache and query worker.
///
/// The scheduler's lifecycle is tied to this value; dropping the repository
/// stops the background worker.
pub struct Repository {
    backend: Arc<dyn VcsBackend>,
    cache: Arc<StatusCache>,
    scheduler: QueryScheduler,
    base_texts: Mutex<LruCache<PathBuf, String>>,
    root: PathBuf,
}

impl Repository {
    /// Open a repository over the given backend, reading the repository
    /// configuration from its root when present.
    pub fn open(backend: Arc<dyn VcsBackend>) -> Self {
        let config = VcsConfig::load(backend.root()).unwrap_or_default();
        Self::open_with_config(backend, &config)
    }

    pub fn open_with_config(backend: Arc<dyn VcsBackend>, config: &VcsConfig) -> Self {
        let cache = Arc::new(StatusCache::new());
        let scheduler = QueryScheduler::start(backend.clone(), cache.clone());
        let capacity = NonZeroUsize::new(config.base_text_cache_size.max(1)).unwrap();
        Self {
            root: backend.root().to_path_buf(),
            cache,
            scheduler,
            base_texts: Mutex::new(LruCache::new(capacity)),
            backend,
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn create_change_set(&self, root: &Path) -> ChangeSet {
        ChangeSet::new(paths::normalize(root))
    }

    // ── Status reads ───────────────────────────────────────────

    /// Status of one path.
    ///
    /// Without [`QueryFlags::IGNORE_CACHE`] this never blocks: a fresh cache
    /// hit is returned as-is, a stale hit is returned while a background
    /// refresh is scheduled, and an unknown path gets an optimistic
    /// placeholder. With the flag, the call waits for an authoritative
    /// backend answer (coalescing with any in-flight query for the path).
    pub async fn get_version_info(&self, path: &Path, flags: QueryFlags) -> Result<VersionInfo> {
        let path = paths::normalize(path);
        let key = QueryKey::new(path.clone(), false);
        let remote = flags.contains(QueryFlags::INCLUDE_REMOTE_STATUS);

        if flags.contains(QueryFlags::IGNORE_CACHE) {
            self.refresh_blocking(&key, remote).await?;
            if let Some(hit) = self.cache.get(&path) {
                return Ok(hit.info);
            }
            return Ok(VersionInfo::unversioned(path.clone(), path.is_dir()));
        }

        match self.cache.get(&path) {
            Some(hit) if hit.fresh => Ok(hit.info),
            Some(hit) => {
                debug!(
                    path = %path.display(),
                    age_ms = hit.age.as_millis() as u64,
                    "serving stale status, refresh scheduled"
                );
                self.scheduler.enqueue(key);
                Ok(hit.info)
            }
            None => {
                self.scheduler.enqueue(key);
                Ok(VersionInfo::pending(path.clone(), path.is_dir()))
            }
        }
    }

    /// Interesting entries under `root` at the requested granularity.
    ///
    /// Serves the last known listing (possibly empty) immediately and
    /// schedules a refresh when it is stale or missing. `include_remote`
    /// forces a blocking query, since remote state is never cached.
    pub async fn get_directory_version_info(
        &self,
        root: &Path,
        recursive: bool,
        include_remote: bool,
    ) -> Result<Vec<VersionInfo>> {
        let root = paths::normalize(root);
        let key = QueryKey::new(root.clone(), recursive);

        if include_remote {
            self.refresh_blocking(&key, true).await?;
            return Ok(self
                .cache
                .get_directory(&root, recursive)
                .map(|hit| hit.infos)
                .unwrap_or_default());
        }

        match self.cache.get_directory(&root, recursive) {
            Some(hit) if hit.fresh => Ok(hit.infos),
            Some(hit) => {
                self.scheduler.enqueue(key);
                Ok(hit.infos)
            }
            None => {
                self.scheduler.enqueue(key);
                Ok(Vec::new())
            }
        }
    }

    /// Drop cached knowledge about `path` (and its subtree, for a
    /// directory). Non-blocking; the next read triggers a refresh.
    pub fn clear_cached_version_info(&self, path: &Path) {
        self.cache.invalidate(&paths::normalize(path));
    }

    /// Run an authoritative query for `key`, coalescing with an in-flight
    /// one when present. Backend failures surface to the caller; the cache
    /// is left safe (previous value intact, in-flight slot released).
    async fn refresh_blocking(&self, key: &QueryKey, remote: bool) -> Result<()> {
        loop {
            if let Some(started) = self.cache.begin_query(key) {
                return match self.backend.status(&key.path, key.recursive, remote).await {
                    Ok(raw) => {
                        let (root_info, children) = split_entries(key, raw);
                        self.cache.publish(key, root_info, children, started);
                        Ok(())
                    }
                    Err(e) => {
                        self.cache.publish_failure(key);
                        Err(e)
                    }
                };
            }
            // Someone else's query is running; its result is ours too.
            self.cache.wait(key).await;
            let fresh = self
                .cache
                .get(&key.path)
                .map(|hit| hit.fresh)
                .unwrap_or(false);
            if fresh {
                return Ok(());
            }
        }
    }

    // ── Mutating operations ────────────────────────────────────

    /// Schedule `path` for addition. After the next cache refresh the path
    /// reports `ScheduledAdd` and is no longer add-eligible.
    pub async fn add(
        &self,
        path: &Path,
        recursive: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        let path = paths::normalize(path);
        monitor.begin("Adding", 1);
        let result = self.backend.add(&path, recursive).await;
        self.cache.invalidate(&path);
        monitor.end();
        result
    }

    /// Commit a changeset. On failure the cache is still invalidated for
    /// every item (never falsely fresh) and the changeset remains usable for
    /// a retry.
    pub async fn commit(
        &self,
        changes: &ChangeSet,
        monitor: &dyn ProgressMonitor,
    ) -> Result<Revision> {
        let items = changes.commit_items();
        monitor.begin("Committing", items.len());
        let result = self
            .backend
            .commit(&items, changes.global_comment(), changes.extended_properties())
            .await;
        for (done, item) in items.iter().enumerate() {
            self.cache.invalidate(&item.path);
            self.base_texts.lock().unwrap().pop(&item.path);
            monitor.step(done + 1);
        }
        monitor.end();
        result
    }

    /// Restore working contents to the last committed revision. Reverting
    /// an uncommitted add leaves the path unversioned; reverting a scheduled
    /// delete brings the path back to `Versioned`.
    pub async fn revert(
        &self,
        path: &Path,
        recursive: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        let path = paths::normalize(path);
        monitor.begin("Reverting", 1);
        let result = self.backend.revert(&path, recursive).await;
        self.cache.invalidate(&path);
        monitor.end();
        result
    }

    /// Undo the change one revision applied to `path`.
    pub async fn revert_revision(
        &self,
        path: &Path,
        revision: &Revision,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        if !self.backend.capabilities().supports_revert_revision {
            return Err(VcsError::Unsupported("revert-revision"));
        }
        let path = paths::normalize(path);
        monitor.begin("Reverting revision", 1);
        let result = self.backend.revert_revision(&path, &revision.id).await;
        self.cache.invalidate(&path);
        monitor.end();
        result
    }

    pub async fn move_file(
        &self,
        src: &Path,
        dst: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        self.move_path(src, dst, force, monitor).await
    }

    pub async fn move_directory(
        &self,
        src: &Path,
        dst: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        self.move_path(src, dst, force, monitor).await
    }

    async fn move_path(
        &self,
        src: &Path,
        dst: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        let src = paths::normalize(src);
        let dst = paths::normalize(dst);
        monitor.begin("Moving", 1);
        let result = self.backend.move_path(&src, &dst, force).await;
        self.cache.invalidate(&src);
        self.cache.invalidate(&dst);
        monitor.end();
        result
    }

    pub async fn delete_file(
        &self,
        path: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
        keep_local: bool,
    ) -> Result<()> {
        self.delete_path(path, force, monitor, keep_local).await
    }

    pub async fn delete_directory(
        &self,
        path: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
        keep_local: bool,
    ) -> Result<()> {
        self.delete_path(path, force, monitor, keep_local).await
    }

    async fn delete_path(
        &self,
        path: &Path,
        force: bool,
        monitor: &dyn ProgressMonitor,
        keep_local: bool,
    ) -> Result<()> {
        let path = paths::normalize(path);
        monitor.begin("Deleting", 1);
        let result = self.backend.delete(&path, force, keep_local).await;
        self.cache.invalidate(&path);
        monitor.end();
        result
    }

    /// Lock paths on a backend that supports it. Backends without locking
    /// report [`VcsError::Unsupported`]; this is not fatal to the caller.
    pub async fn lock(&self, monitor: &dyn ProgressMonitor, paths: &[PathBuf]) -> Result<()> {
        if !self.backend.capabilities().supports_locking {
            return Err(VcsError::Unsupported("lock"));
        }
        let normalized: Vec<PathBuf> = paths.iter().map(|p| paths::normalize(p)).collect();
        monitor.begin("Locking", normalized.len());
        let result = self.backend.lock(&normalized).await;
        for path in &normalized {
            self.cache.invalidate(path);
        }
        monitor.end();
        result
    }

    pub async fn unlock(&self, monitor: &dyn ProgressMonitor, paths: &[PathBuf]) -> Result<()> {
        if !self.backend.capabilities().supports_locking {
            return Err(VcsError::Unsupported("unlock"));
        }
        let normalized: Vec<PathBuf> = paths.iter().map(|p| paths::normalize(p)).collect();
        monitor.begin("Unlocking", normalized.len());
        let result = self.backend.unlock(&normalized).await;
        for path in &normalized {
            self.cache.invalidate(path);
        }
        monitor.end();
        result
    }

    /// Add paths to the backend's ignore list. Idempotent; an ignored path
    /// is never `ScheduledAdd`.
    pub async fn ignore(&self, paths: &[PathBuf]) -> Result<()> {
        let normalized: Vec<PathBuf> = paths.iter().map(|p| paths::normalize(p)).collect();
        let result = self.backend.ignore(&normalized).await;
        for path in &normalized {
            self.cache.invalidate(path);
        }
        result
    }

    pub async fn unignore(&self, paths: &[PathBuf]) -> Result<()> {
        let normalized: Vec<PathBuf> = paths.iter().map(|p| paths::normalize(p)).collect();
        let result = self.backend.unignore(&normalized).await;
        for path in &normalized {
            self.cache.invalidate(path);
        }
        result
    }

    pub async fn checkout(&self, target: &Path, monitor: &dyn ProgressMonitor) -> Result<()> {
        let target = paths::normalize(target);
        monitor.begin("Checking out", 1);
        let result = self.backend.checkout(&target).await;
        monitor.end();
        result
    }

    /// Bring the working copy up to date with state committed elsewhere.
    pub async fn update(
        &self,
        path: &Path,
        recursive: bool,
        monitor: &dyn ProgressMonitor,
    ) -> Result<()> {
        let path = paths::normalize(path);
        monitor.begin("Updating", 1);
        let result = self.backend.update(&path, recursive).await;
        self.cache.invalidate(&path);
        self.base_texts.lock().unwrap().clear();
        monitor.end();
        result
    }

    // ── History, content and attribution ───────────────────────

    /// Revisions that touched `path`, newest first. `since` truncates the
    /// result at (and excluding) the given revision.
    pub async fn get_history(
        &self,
        path: &Path,
        since: Option<&Revision>,
    ) -> Result<Vec<Revision>> {
        let mut revisions = self.backend.history(&paths::normalize(path)).await?;
        if let Some(since) = since {
            if let Some(pos) = revisions.iter().position(|r| r.id == since.id) {
                revisions.truncate(pos);
            }
        }
        Ok(revisions)
    }

    pub async fn get_revision_changes(
        &self,
        revision: &Revision,
    ) -> Result<Vec<(PathBuf, ChangeAction)>> {
        self.backend.revision_changes(&revision.id).await
    }

    pub async fn get_text_at_revision(&self, path: &Path, revision: &Revision) -> Result<String> {
        let bytes = self
            .backend
            .text_at_revision(&paths::normalize(path), &revision.id)
            .await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Content of `path` as last known to the backend, independent of
    /// working-directory edits. Served through a bounded LRU cache that is
    /// dropped for paths touched by commit/update.
    pub async fn get_base_text(&self, path: &Path) -> Result<String> {
        let path = paths::normalize(path);
        if let Some(text) = self.base_texts.lock().unwrap().get(&path) {
            return Ok(text.clone());
        }
        let bytes = self.backend.base_text(&path).await?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.base_texts.lock().unwrap().put(path, text.clone());
        Ok(text)
    }

    /// Per-line attribution in file line order. Lines changed since the
    /// last commit carry the synthetic "working copy" revision with author
    /// `<uncommitted>` and no email or date.
    pub async fn get_annotations(&self, path: &Path) -> Result<Vec<Annotation>> {
        let path = paths::normalize(path);
        let committed = self.backend.blame(&path).await?;
        let base = self.get_base_text(&path).await?;
        let working = tokio::fs::read_to_string(&path).await?;

        let diff = TextDiff::from_lines(base.as_str(), working.as_str());
        let mut annotations = Vec::new();
        for change in diff.iter_all_changes() {
            match change.tag() {
                ChangeTag::Equal => {
                    let annotation = change
                        .old_index()
                        .and_then(|i| committed.get(i).cloned())
                        .unwrap_or_else(Annotation::uncommitted);
                    annotations.push(annotation);
                }
                ChangeTag::Insert => annotations.push(Annotation::uncommitted()),
                ChangeTag::Delete => {}
            }
        }
        Ok(annotations)
    }

    /// Unified diff of the working copy of `path` against its base text.
    pub async fn generate_diff(&self, path: &Path) -> Result<String> {
        self.backend.diff(&paths::normalize(path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Capabilities;
    use crate::local::LocalVcs;
    use crate::progress::NullProgressMonitor;
    use crate::status::VersionStatus;
    use crate::testutil::StubBackend;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn open_local(dir: &TempDir) -> Repository {
        let vcs = LocalVcs::init(dir.path(), VcsConfig::default()).unwrap();
        Repository::open(Arc::new(vcs))
    }

    async fn eventually(mut condition: impl AsyncFnMut() -> bool) {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_uncached_read_returns_placeholder_then_refines() {
        let dir = TempDir::new().unwrap();
        let repo = open_local(&dir).await;
        let path = dir.path().join("testfile");
        fs::write(&path, "").unwrap();
        repo.add(&path, false, &NullProgressMonitor).await.unwrap();

        // Cache is empty: optimistic placeholder without the scheduled flag.
        let vi = repo.get_version_info(&path, QueryFlags::NONE).await.unwrap();
        assert_eq!(vi.status, VersionStatus::VERSIONED);

        // The scheduled background query eventually refines the answer.
        eventually(async || {
            let vi = repo.get_version_info(&path, QueryFlags::NONE).await.unwrap();
            vi.status.contains(VersionStatus::SCHEDULED_ADD)
        })
        .await;
    }

    #[tokio::test]
    async fn test_ignore_cache_returns_authoritative_status() {
        let dir = TempDir::new().unwrap();
        let repo = open_local(&dir).await;
        let path = dir.path().join("testfile");
        fs::write(&path, "").unwrap();
        repo.add(&path, false, &NullProgressMonitor).await.unwrap();

        let vi = repo
            .get_version_info(&path, QueryFlags::IGNORE_CACHE)
            .await
            .unwrap();
        assert!(vi.status.contains(VersionStatus::SCHEDULED_ADD));
        assert!(!vi.can_add());
    }

    #[tokio::test]
    async fn test_stale_listing_served_while_refresh_runs() {
        let dir = TempDir::new().unwrap();
        let repo = open_local(&dir).await;
        let path = dir.path().join("testfile");
        fs::write(&path, "").unwrap();
        repo.add(&path, false, &NullProgressMonitor).await.unwrap();

        // Populate the listing.
        assert!(
            repo.get_directory_version_info(dir.path(), false, false)
                .await
                .unwrap()
                .is_empty()
        );
        eventually(async || {
            repo.get_directory_version_info(dir.path(), false, false)
                .await
                .unwrap()
                .len()
                == 1
        })
        .await;

        // A second add makes the listing stale, but the old one is still
        // served immediately.
        let second = dir.path().join("testfile2");
        fs::write(&second, "").unwrap();
        repo.add(&second, false, &NullProgressMonitor).await.unwrap();
        let listing = repo
            .get_directory_version_info(dir.path(), false, false)
            .await
            .unwrap();
        assert_eq!(listing.len(), 1, "stale listing is best-effort");

        eventually(async || {
            repo.get_directory_version_info(dir.path(), false, false)
                .await
                .unwrap()
                .len()
                == 2
        })
        .await;
    }

    #[tokio::test]
    async fn test_lock_unsupported_is_typed_error() {
        let mut stub = StubBackend::new("/repo", vec![]);
        stub.capabilities = Capabilities {
            supports_locking: false,
            ..Capabilities::default()
        };
        let repo = Repository::open_with_config(Arc::new(stub), &VcsConfig::default());

        let result = repo
            .lock(&NullProgressMonitor, &[PathBuf::from("/repo/a")])
            .await;
        assert!(matches!(result, Err(VcsError::Unsupported("lock"))));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_changeset_usable() {
        let dir = TempDir::new().unwrap();
        let repo = open_local(&dir).await;
        let path = dir.path().join("testfile");
        fs::write(&path, "text").unwrap();
        repo.add(&path, false, &NullProgressMonitor).await.unwrap();

        let vi = repo
            .get_version_info(&path, QueryFlags::IGNORE_CACHE)
            .await
            .unwrap();
        let mut changes = repo.create_change_set(dir.path());
        changes.add_file(vi);

        // Empty comment: rejected, changeset not consumed.
        let err = repo.commit(&changes, &NullProgressMonitor).await;
        assert!(matches!(err, Err(VcsError::Rejected { op: "commit", .. })));

        changes.set_global_comment("Commit #0");
        repo.commit(&changes, &NullProgressMonitor).await.unwrap();
        let vi = repo
            .get_version_info(&path, QueryFlags::IGNORE_CACHE)
            .await
            .unwrap();
        assert_eq!(vi.status, VersionStatus::VERSIONED);
    }
}
