//! Built-in reference backend
//!
//! A complete [`VcsBackend`] over a real working directory, with repository
//! state kept in `.anyvcs/state.json`. Committed content lives in the state
//! file as content-addressed revisions; status is computed by comparing the
//! working directory against the committed tree and the scheduled-change
//! sets. The CLI runs against this backend, and it doubles as the test
//! vehicle for the facade, cache and scheduler.

use crate::backend::{
    Annotation, Capabilities, ChangeAction, CommitItem, RawStatusEntry, Revision, VcsBackend,
};
use crate::config::{CONTROL_DIR, VcsConfig};
use crate::error::{Result, VcsError};
use crate::paths;
use crate::status::VersionStatus;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

const STATE_FILE: &str = "state.json";

/// Extended-property keys this backend honors on commit.
pub const PROP_AUTHOR: &str = "Local.Author";
pub const PROP_EMAIL: &str = "Local.Email";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileRecord {
    content: String,
    /// Revision id that last touched each line, in file order.
    line_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RevisionRecord {
    id: String,
    message: String,
    author: String,
    email: Option<String>,
    timestamp: DateTime<Utc>,
    changes: Vec<(String, ChangeAction)>,
    /// Content after this revision, per changed file. Deletes have no entry.
    snapshots: BTreeMap<String, String>,
}

impl RevisionRecord {
    fn to_revision(&self) -> Revision {
        Revision {
            id: self.id.clone(),
            message: self.message.clone(),
            author: self.author.clone(),
            email: self.email.clone(),
            timestamp: self.timestamp,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VcsState {
    uuid: String,
    /// Oldest first.
    revisions: Vec<RevisionRecord>,
    /// Committed files, keyed by `/`-separated path relative to the root.
    tree: BTreeMap<String, FileRecord>,
    tracked_dirs: BTreeSet<String>,
    scheduled_add: BTreeSet<String>,
    scheduled_delete: BTreeSet<String>,
    scheduled_replace: BTreeSet<String>,
    ignored: BTreeSet<String>,
    locked: BTreeSet<String>,
}

/// Reference backend over a local working directory.
pub struct LocalVcs {
    root: PathBuf,
    uuid: String,
    config: VcsConfig,
    state: RwLock<VcsState>,
}

impl LocalVcs {
    /// Create a fresh repository at `root`.
    pub fn init(root: &Path, config: VcsConfig) -> Result<Self> {
        let root = paths::normalize(root);
        let control = root.join(CONTROL_DIR);
        if control.join(STATE_FILE).exists() {
            return Err(VcsError::Rejected {
                op: "init",
                reason: format!("repository already exists at {}", root.display()),
            });
        }
        fs::create_dir_all(&control)?;
        let state = VcsState {
            uuid: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        };
        persist(&root, &state)?;
        config.save(&root)?;
        debug!(root = %root.display(), uuid = %state.uuid, "initialized repository");
        Ok(Self {
            uuid: state.uuid.clone(),
            config,
            state: RwLock::new(state),
            root,
        })
    }

    /// Open an existing repository at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let root = paths::normalize(root);
        let state = load_state(&root)?;
        let config = VcsConfig::load(&root)?;
        Ok(Self {
            uuid: state.uuid.clone(),
            config,
            state: RwLock::new(state),
            root,
        })
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Relative state key for `path`; `None` when `path` is the root itself.
    fn rel(&self, path: &Path) -> Result<Option<String>> {
        let npath = paths::normalize(path);
        if npath == self.root {
            return Ok(None);
        }
        match paths::relative_key(&self.root, &npath) {
            Some(key) => Ok(Some(key)),
            None => Err(VcsError::NotFound(npath)),
        }
    }

    fn rel_file(&self, path: &Path) -> Result<String> {
        self.rel(path)?
            .ok_or_else(|| VcsError::NotFound(self.root.clone()))
    }

    fn abs(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn save(&self, state: &VcsState) -> Result<()> {
        persist(&self.root, state)
    }

    /// Status entry for one key, reading the working copy as needed.
    fn entry_for(&self, state: &VcsState, key: &str, remote: bool) -> RawStatusEntry {
        let abs = self.abs(key);
        let is_directory = abs.is_dir() || state.tracked_dirs.contains(key);
        let content = if is_directory {
            None
        } else {
            fs::read_to_string(&abs).ok()
        };
        let status = file_status(state, key, content.as_deref(), is_directory, abs.exists());
        let remote_status = remote.then(|| {
            if state.tree.contains_key(key) || state.tracked_dirs.contains(key) {
                VersionStatus::VERSIONED
            } else {
                VersionStatus::UNVERSIONED
            }
        });
        RawStatusEntry {
            path: abs,
            status,
            is_directory,
            remote_status,
        }
    }

    /// All keys with a working-copy or recorded presence under `dir`.
    fn collect_keys(&self, state: &VcsState, dir: &Path, recursive: bool) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();

        let mut stack = vec![dir.to_path_buf()];
        while let Some(current) = stack.pop() {
            let Ok(entries) = fs::read_dir(&current) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.file_name().map(|n| n == CONTROL_DIR).unwrap_or(false) {
                    continue;
                }
                let Some(key) = paths::relative_key(&self.root, &path) else {
                    continue;
                };
                keys.insert(key);
                if recursive && path.is_dir() {
                    stack.push(path);
                }
            }
        }

        let recorded = state
            .tree
            .keys()
            .chain(state.tracked_dirs.iter())
            .chain(state.scheduled_add.iter())
            .chain(state.scheduled_delete.iter())
            .chain(state.scheduled_replace.iter())
            .chain(state.ignored.iter())
            .chain(state.locked.iter());
        for key in recorded {
            let abs = self.abs(key);
            if !paths::is_under(dir, &abs) || abs == *dir {
                continue;
            }
            if recursive || paths::is_direct_child(dir, &abs) {
                keys.insert(key.clone());
            }
        }
        keys
    }

    /// Move the committed parents of a freshly committed key out of the
    /// scheduled set; committing a file implicitly commits its directories.
    fn commit_ancestors(state: &mut VcsState, key: &str) {
        let mut prefix = String::new();
        for part in key.split('/').take(key.split('/').count().saturating_sub(1)) {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            if state.scheduled_add.remove(&prefix) {
                state.tracked_dirs.insert(prefix.clone());
            }
        }
    }

    fn delete_one(
        &self,
        state: &mut VcsState,
        key: &str,
        force: bool,
        keep_local: bool,
    ) -> Result<()> {
        let abs = self.abs(key);
        if state.scheduled_add.remove(key) {
            state.locked.remove(key);
        } else if state.tree.contains_key(key) {
            if !force {
                let on_disk = fs::read_to_string(&abs).ok();
                let committed = state.tree.get(key).map(|r| r.content.as_str());
                if on_disk.as_deref() != committed {
                    return Err(VcsError::Rejected {
                        op: "delete",
                        reason: format!("{} has local modifications", abs.display()),
                    });
                }
            }
            state.scheduled_delete.insert(key.to_string());
        }
        state.scheduled_replace.remove(key);
        if !keep_local && abs.is_file() {
            fs::remove_file(&abs)?;
        }
        Ok(())
    }

    fn revert_one(&self, state: &mut VcsState, key: &str) -> Result<()> {
        if state.scheduled_add.remove(key) {
            // Uncommitted add: the file stays on disk, unversioned again.
            state.locked.remove(key);
            return Ok(());
        }
        state.scheduled_delete.remove(key);
        state.scheduled_replace.remove(key);
        if let Some(record) = state.tree.get(key) {
            let abs = self.abs(key);
            if let Some(parent) = abs.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&abs, &record.content)?;
        }
        Ok(())
    }

    fn move_one(&self, state: &mut VcsState, src_key: &str, dst_key: &str) {
        let src_was_versioned =
            state.tree.contains_key(src_key) || state.scheduled_add.contains(src_key);

        if !state.scheduled_add.remove(src_key) && state.tree.contains_key(src_key) {
            state.scheduled_delete.insert(src_key.to_string());
        }

        if state.tree.contains_key(dst_key) {
            if state.scheduled_delete.remove(dst_key) {
                // Moved back over its own scheduled delete: versioned again.
            } else {
                state.scheduled_replace.insert(dst_key.to_string());
            }
        } else if src_was_versioned {
            state.scheduled_add.insert(dst_key.to_string());
        }
    }
}

#[async_trait]
impl VcsBackend for LocalVcs {
    fn root(&self) -> &Path {
        &self.root
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_locking: true,
            supports_revert_revision: true,
            // The control directory is invisible to status queries.
            repo_items_count: 0,
            repo_items_count_recursive: 0,
        }
    }

    async fn status(
        &self,
        path: &Path,
        recursive: bool,
        remote: bool,
    ) -> Result<Vec<RawStatusEntry>> {
        let state = self.state.read().await;
        let npath = paths::normalize(path);

        let root_entry = match self.rel(&npath)? {
            None => RawStatusEntry {
                path: self.root.clone(),
                status: VersionStatus::VERSIONED,
                is_directory: true,
                remote_status: remote.then_some(VersionStatus::VERSIONED),
            },
            Some(key) => self.entry_for(&state, &key, remote),
        };

        let mut result = vec![root_entry.clone()];
        if root_entry.is_directory {
            for key in self.collect_keys(&state, &npath, recursive) {
                let entry = self.entry_for(&state, &key, remote);
                // Plain unversioned-and-unchanged entries are not interesting.
                if entry.status == VersionStatus::UNVERSIONED {
                    continue;
                }
                result.push(entry);
            }
        }
        Ok(result)
    }

    async fn add(&self, path: &Path, recursive: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let npath = paths::normalize(path);
        let key = self.rel_file(&npath)?;

        if state.ignored.contains(&key) {
            return Err(VcsError::Rejected {
                op: "add",
                reason: format!("{} is ignored", npath.display()),
            });
        }
        if state.tree.contains_key(&key)
            || state.tracked_dirs.contains(&key)
            || state.scheduled_add.contains(&key)
        {
            return Ok(());
        }
        if !npath.exists() {
            return Err(VcsError::NotFound(npath));
        }

        state.scheduled_add.insert(key.clone());
        if npath.is_dir() && recursive {
            for child in self.collect_keys(&state, &npath, true) {
                if !state.ignored.contains(&child)
                    && !state.tree.contains_key(&child)
                    && !state.tracked_dirs.contains(&child)
                {
                    state.scheduled_add.insert(child);
                }
            }
        }
        debug!(path = %npath.display(), recursive, "scheduled add");
        self.save(&state)
    }

    async fn commit(
        &self,
        items: &[CommitItem],
        message: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Revision> {
        if message.trim().is_empty() {
            return Err(VcsError::Rejected {
                op: "commit",
                reason: "empty commit message".to_string(),
            });
        }

        let mut state = self.state.write().await;

        // Resolve what the commit will do before touching any state.
        enum Planned {
            AddFile { key: String, content: String },
            AddDir { key: String },
            Replace { key: String, content: String },
            Modify { key: String, content: String },
            Delete { key: String },
        }
        let mut planned = Vec::new();
        for item in items {
            let key = self.rel_file(&item.path)?;
            let abs = self.abs(&key);
            if state.scheduled_add.contains(&key) {
                if abs.is_dir() {
                    planned.push(Planned::AddDir { key });
                } else {
                    let content = fs::read_to_string(&abs).map_err(|_| VcsError::Rejected {
                        op: "commit",
                        reason: format!("{} is scheduled for add but unreadable", abs.display()),
                    })?;
                    planned.push(Planned::AddFile { key, content });
                }
            } else if state.scheduled_delete.contains(&key) {
                planned.push(Planned::Delete { key });
            } else if state.scheduled_replace.contains(&key) {
                let content = fs::read_to_string(&abs)?;
                planned.push(Planned::Replace { key, content });
            } else if let Some(record) = state.tree.get(&key) {
                let content = fs::read_to_string(&abs)?;
                if content != record.content {
                    planned.push(Planned::Modify { key, content });
                }
            } else {
                return Err(VcsError::Rejected {
                    op: "commit",
                    reason: format!("{} is not scheduled for commit", abs.display()),
                });
            }
        }
        if planned.is_empty() {
            return Err(VcsError::Rejected {
                op: "commit",
                reason: "nothing to commit".to_string(),
            });
        }

        let author = properties
            .get(PROP_AUTHOR)
            .cloned()
            .unwrap_or_else(|| self.config.author.clone());
        let email = properties
            .get(PROP_EMAIL)
            .cloned()
            .or_else(|| self.config.email.clone());
        let timestamp = Utc::now();

        let mut hasher = Sha256::new();
        if let Some(parent) = state.revisions.last() {
            hasher.update(parent.id.as_bytes());
        }
        hasher.update(message.as_bytes());
        hasher.update(timestamp.to_rfc3339().as_bytes());
        let mut changes = Vec::new();
        let mut snapshots = BTreeMap::new();
        for plan in &planned {
            let (key, action) = match plan {
                Planned::AddFile { key, .. } | Planned::AddDir { key } => (key, ChangeAction::Add),
                Planned::Replace { key, .. } => (key, ChangeAction::Replace),
                Planned::Modify { key, .. } => (key, ChangeAction::Modify),
                Planned::Delete { key } => (key, ChangeAction::Delete),
            };
            hasher.update(key.as_bytes());
            changes.push((key.clone(), action));
        }
        let id = hex::encode(hasher.finalize());

        for plan in planned {
            match plan {
                Planned::AddFile { key, content } => {
                    let line_origins = vec![id.clone(); content.lines().count()];
                    snapshots.insert(key.clone(), content.clone());
                    Self::commit_ancestors(&mut state, &key);
                    state.scheduled_add.remove(&key);
                    state.tree.insert(
                        key,
                        FileRecord {
                            content,
                            line_origins,
                        },
                    );
                }
                Planned::AddDir { key } => {
                    Self::commit_ancestors(&mut state, &key);
                    state.scheduled_add.remove(&key);
                    state.tracked_dirs.insert(key);
                }
                Planned::Replace { key, content } | Planned::Modify { key, content } => {
                    let old = state.tree.get(&key).cloned().unwrap_or(FileRecord {
                        content: String::new(),
                        line_origins: Vec::new(),
                    });
                    let line_origins = merge_line_origins(&old, &content, &id);
                    snapshots.insert(key.clone(), content.clone());
                    state.scheduled_replace.remove(&key);
                    state.tree.insert(
                        key,
                        FileRecord {
                            content,
                            line_origins,
                        },
                    );
                }
                Planned::Delete { key } => {
                    state.scheduled_delete.remove(&key);
                    state.locked.remove(&key);
                    state.tree.remove(&key);
                }
            }
        }

        let record = RevisionRecord {
            id,
            message: message.to_string(),
            author,
            email,
            timestamp,
            changes,
            snapshots,
        };
        let revision = record.to_revision();
        state.revisions.push(record);
        self.save(&state)?;
        debug!(revision = %revision.id, "committed");
        Ok(revision)
    }

    async fn revert(&self, path: &Path, recursive: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let npath = paths::normalize(path);
        match self.rel(&npath)? {
            None => {
                for key in self.collect_keys(&state, &npath, true) {
                    self.revert_one(&mut state, &key)?;
                }
            }
            Some(key) => {
                if recursive || self.abs(&key).is_dir() {
                    for child in self.collect_keys(&state, &npath, true) {
                        self.revert_one(&mut state, &child)?;
                    }
                }
                self.revert_one(&mut state, &key)?;
            }
        }
        self.save(&state)
    }

    async fn revert_revision(&self, path: &Path, revision: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let key = self.rel_file(path)?;
        let idx = state
            .revisions
            .iter()
            .position(|r| r.id == revision)
            .ok_or_else(|| VcsError::UnknownRevision(revision.to_string()))?;

        let Some((_, action)) = state.revisions[idx]
            .changes
            .iter()
            .find(|(k, _)| k == &key)
            .cloned()
        else {
            return Ok(());
        };
        let abs = self.abs(&key);
        match action {
            ChangeAction::Add => {
                if abs.is_file() {
                    fs::remove_file(&abs)?;
                }
                if state.tree.contains_key(&key) {
                    state.scheduled_delete.insert(key);
                }
            }
            ChangeAction::Modify | ChangeAction::Replace | ChangeAction::Delete => {
                let previous = state.revisions[..idx]
                    .iter()
                    .rev()
                    .find_map(|r| r.snapshots.get(&key).cloned());
                if let Some(content) = previous {
                    fs::write(&abs, content)?;
                }
            }
        }
        self.save(&state)
    }

    async fn move_path(&self, src: &Path, dst: &Path, force: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let nsrc = paths::normalize(src);
        let ndst = paths::normalize(dst);
        let src_key = self.rel_file(&nsrc)?;
        let dst_key = self.rel_file(&ndst)?;

        if ndst.exists() && !force {
            return Err(VcsError::Rejected {
                op: "move",
                reason: format!("{} already exists", ndst.display()),
            });
        }
        if !nsrc.exists() {
            return Err(VcsError::NotFound(nsrc));
        }

        if nsrc.is_dir() {
            fs::rename(&nsrc, &ndst)?;
            let prefix = format!("{}/", src_key);
            let moved: Vec<String> = state
                .tree
                .keys()
                .chain(state.scheduled_add.iter())
                .filter(|k| k.starts_with(&prefix))
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            for old_key in moved {
                let new_key = format!("{}{}", dst_key, &old_key[src_key.len()..]);
                self.move_one(&mut state, &old_key, &new_key);
            }
            if state.tracked_dirs.contains(&src_key) {
                state.scheduled_delete.insert(src_key);
                state.scheduled_add.insert(dst_key);
            } else if state.scheduled_add.remove(&src_key) {
                state.scheduled_add.insert(dst_key);
            }
        } else {
            if ndst.is_file() {
                fs::remove_file(&ndst)?;
            }
            if let Some(parent) = ndst.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&nsrc, &ndst)?;
            self.move_one(&mut state, &src_key, &dst_key);
        }
        debug!(src = %nsrc.display(), dst = %ndst.display(), "moved");
        self.save(&state)
    }

    async fn delete(&self, path: &Path, force: bool, keep_local: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let npath = paths::normalize(path);
        let key = self.rel_file(&npath)?;

        if npath.is_dir() || state.tracked_dirs.contains(&key) {
            for child in self.collect_keys(&state, &npath, true) {
                if self.abs(&child).is_dir() {
                    if state.scheduled_add.remove(&child) {
                        continue;
                    }
                    if state.tracked_dirs.contains(&child) {
                        state.scheduled_delete.insert(child);
                    }
                } else {
                    self.delete_one(&mut state, &child, force, keep_local)?;
                }
            }
            if state.scheduled_add.remove(&key) {
                // Uncommitted directory add: fully unversioned again.
            } else if state.tracked_dirs.contains(&key) {
                state.scheduled_delete.insert(key);
            }
            if !keep_local && npath.is_dir() {
                fs::remove_dir_all(&npath)?;
            }
        } else {
            self.delete_one(&mut state, &key, force, keep_local)?;
        }
        self.save(&state)
    }

    async fn lock(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.write().await;
        for path in paths {
            let key = self.rel_file(path)?;
            if !state.tree.contains_key(&key) && !state.scheduled_add.contains(&key) {
                return Err(VcsError::Rejected {
                    op: "lock",
                    reason: format!("{} is not versioned", path.display()),
                });
            }
            state.locked.insert(key);
        }
        self.save(&state)
    }

    async fn unlock(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.write().await;
        for path in paths {
            let key = self.rel_file(path)?;
            state.locked.remove(&key);
        }
        self.save(&state)
    }

    async fn ignore(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.write().await;
        for path in paths {
            let key = self.rel_file(path)?;
            if state.scheduled_add.contains(&key) {
                return Err(VcsError::Rejected {
                    op: "ignore",
                    reason: format!("{} is scheduled for addition", path.display()),
                });
            }
            state.ignored.insert(key);
        }
        self.save(&state)
    }

    async fn unignore(&self, paths: &[PathBuf]) -> Result<()> {
        let mut state = self.state.write().await;
        for path in paths {
            let key = self.rel_file(path)?;
            state.ignored.remove(&key);
        }
        self.save(&state)
    }

    async fn history(&self, path: &Path) -> Result<Vec<Revision>> {
        let state = self.state.read().await;
        let key = self.rel(&paths::normalize(path))?;
        let revisions = state
            .revisions
            .iter()
            .rev()
            .filter(|r| match &key {
                None => true,
                Some(key) => r.changes.iter().any(|(k, _)| k == key),
            })
            .map(|r| r.to_revision())
            .collect();
        Ok(revisions)
    }

    async fn revision_changes(&self, revision: &str) -> Result<Vec<(PathBuf, ChangeAction)>> {
        let state = self.state.read().await;
        let record = state
            .revisions
            .iter()
            .find(|r| r.id == revision)
            .ok_or_else(|| VcsError::UnknownRevision(revision.to_string()))?;
        Ok(record
            .changes
            .iter()
            .map(|(key, action)| (self.abs(key), *action))
            .collect())
    }

    async fn text_at_revision(&self, path: &Path, revision: &str) -> Result<Bytes> {
        let state = self.state.read().await;
        let key = self.rel_file(path)?;
        let idx = state
            .revisions
            .iter()
            .position(|r| r.id == revision)
            .ok_or_else(|| VcsError::UnknownRevision(revision.to_string()))?;

        for record in state.revisions[..=idx].iter().rev() {
            if let Some(content) = record.snapshots.get(&key) {
                return Ok(Bytes::from(content.clone()));
            }
            if record
                .changes
                .iter()
                .any(|(k, a)| k == &key && *a == ChangeAction::Delete)
            {
                break;
            }
        }
        Err(VcsError::NotFound(paths::normalize(path)))
    }

    async fn base_text(&self, path: &Path) -> Result<Bytes> {
        let state = self.state.read().await;
        let key = self.rel_file(path)?;
        state
            .tree
            .get(&key)
            .map(|r| Bytes::from(r.content.clone()))
            .ok_or_else(|| VcsError::NotFound(paths::normalize(path)))
    }

    async fn blame(&self, path: &Path) -> Result<Vec<Annotation>> {
        let state = self.state.read().await;
        let key = self.rel_file(path)?;
        let record = state
            .tree
            .get(&key)
            .ok_or_else(|| VcsError::NotFound(paths::normalize(path)))?;

        let annotations = record
            .line_origins
            .iter()
            .map(|rev_id| {
                state
                    .revisions
                    .iter()
                    .find(|r| &r.id == rev_id)
                    .map(|r| Annotation {
                        revision: r.id.clone(),
                        author: r.author.clone(),
                        email: r.email.clone(),
                        date: Some(r.timestamp),
                    })
                    .unwrap_or_else(Annotation::uncommitted)
            })
            .collect();
        Ok(annotations)
    }

    async fn diff(&self, path: &Path) -> Result<String> {
        let state = self.state.read().await;
        let key = self.rel_file(path)?;
        let record = state
            .tree
            .get(&key)
            .ok_or_else(|| VcsError::NotFound(paths::normalize(path)))?;
        let working = fs::read_to_string(self.abs(&key)).unwrap_or_default();

        let diff = TextDiff::from_lines(record.content.as_str(), working.as_str());
        let mut unified = diff.unified_diff();
        unified
            .context_radius(3)
            .header(&format!("a/{}", key), &format!("b/{}", key));
        Ok(unified.to_string())
    }

    async fn checkout(&self, target: &Path) -> Result<()> {
        let state = self.state.read().await;
        let target = paths::normalize(target);
        fs::create_dir_all(target.join(CONTROL_DIR))?;

        for key in state.tracked_dirs.iter() {
            fs::create_dir_all(target.join(key))?;
        }
        for (key, record) in state.tree.iter() {
            let dest = target.join(key);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(dest, &record.content)?;
        }

        // The checked-out copy starts clean: committed state only.
        let clean = VcsState {
            uuid: state.uuid.clone(),
            revisions: state.revisions.clone(),
            tree: state.tree.clone(),
            tracked_dirs: state.tracked_dirs.clone(),
            ignored: state.ignored.clone(),
            ..Default::default()
        };
        persist(&target, &clean)?;
        self.config.save(&target)?;
        Ok(())
    }

    async fn update(&self, path: &Path, recursive: bool) -> Result<()> {
        let mut state = self.state.write().await;
        *state = load_state(&self.root)?;

        let npath = paths::normalize(path);
        for (key, record) in state.tree.iter() {
            let abs = self.abs(key);
            if !paths::is_under(&npath, &abs) {
                continue;
            }
            if !recursive && !paths::is_direct_child(&npath, &abs) {
                continue;
            }
            if !abs.exists() {
                if let Some(parent) = abs.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&abs, &record.content)?;
            }
        }
        Ok(())
    }
}

fn state_path(root: &Path) -> PathBuf {
    root.join(CONTROL_DIR).join(STATE_FILE)
}

fn load_state(root: &Path) -> Result<VcsState> {
    let path = state_path(root);
    if !path.exists() {
        return Err(VcsError::Unavailable(format!(
            "no repository at {}",
            root.display()
        )));
    }
    let data = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&data)?)
}

fn persist(root: &Path, state: &VcsState) -> Result<()> {
    let data = serde_json::to_string_pretty(state)?;
    fs::write(state_path(root), data)?;
    Ok(())
}

/// Flags for one path given the recorded state and working-copy content.
fn file_status(
    state: &VcsState,
    key: &str,
    on_disk: Option<&str>,
    is_directory: bool,
    exists: bool,
) -> VersionStatus {
    if state.ignored.contains(key) {
        return VersionStatus::UNVERSIONED | VersionStatus::IGNORED;
    }
    let mut status = if state.scheduled_add.contains(key) {
        VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD
    } else if state.scheduled_delete.contains(key) {
        VersionStatus::VERSIONED | VersionStatus::SCHEDULED_DELETE
    } else if state.scheduled_replace.contains(key) {
        VersionStatus::VERSIONED | VersionStatus::SCHEDULED_REPLACE
    } else if let Some(record) = state.tree.get(key) {
        let mut s = VersionStatus::VERSIONED;
        let modified = match on_disk {
            Some(content) => content != record.content,
            None => !is_directory && !exists,
        };
        if modified {
            s |= VersionStatus::MODIFIED;
        }
        s
    } else if state.tracked_dirs.contains(key) {
        VersionStatus::VERSIONED
    } else {
        VersionStatus::UNVERSIONED
    };
    if state.locked.contains(key) && status.contains(VersionStatus::VERSIONED) {
        status |= VersionStatus::LOCKED;
    }
    status
}

/// Carry line attribution across an edit: unchanged lines keep their origin,
/// inserted lines belong to the new revision.
fn merge_line_origins(old: &FileRecord, new_content: &str, rev_id: &str) -> Vec<String> {
    let diff = TextDiff::from_lines(old.content.as_str(), new_content);
    let mut origins = Vec::new();
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                let origin = change
                    .old_index()
                    .and_then(|i| old.line_origins.get(i).cloned())
                    .unwrap_or_else(|| rev_id.to_string());
                origins.push(origin);
            }
            ChangeTag::Insert => origins.push(rev_id.to_string()),
            ChangeTag::Delete => {}
        }
    }
    origins
}
