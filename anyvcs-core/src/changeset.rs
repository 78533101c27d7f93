//! Pending change collections submitted as one commit
//!
//! A changeset is created per commit operation and discarded after the
//! commit returns, successfully or not. It is never persisted; a failed
//! commit leaves the changeset intact so the caller can retry.

use crate::backend::{ChangeAction, CommitItem};
use crate::status::{VersionInfo, VersionStatus};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Ordered collection of pending file changes plus commit metadata.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    root_path: PathBuf,
    global_comment: String,
    extended_properties: HashMap<String, String>,
    items: Vec<ChangeSetItem>,
}

/// One file scheduled into a changeset.
#[derive(Debug, Clone)]
pub struct ChangeSetItem {
    pub info: VersionInfo,
    pub action: ChangeAction,
}

impl ChangeSet {
    pub fn new(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
            global_comment: String::new(),
            extended_properties: HashMap::new(),
            items: Vec::new(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Append a file to the changeset. Idempotent by path: adding the same
    /// path twice keeps the first entry.
    pub fn add_file(&mut self, info: VersionInfo) {
        if self.items.iter().any(|i| i.info.path == info.path) {
            return;
        }
        let action = action_for(info.status);
        self.items.push(ChangeSetItem { info, action });
    }

    pub fn items(&self) -> &[ChangeSetItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn global_comment(&self) -> &str {
        &self.global_comment
    }

    pub fn set_global_comment(&mut self, comment: impl Into<String>) {
        self.global_comment = comment.into();
    }

    /// Open string-keyed bag passed opaquely to the backend. Backends use
    /// namespaced keys for overrides, e.g. `Local.Author` / `Local.Email`.
    pub fn extended_properties(&self) -> &HashMap<String, String> {
        &self.extended_properties
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.extended_properties.insert(key.into(), value.into());
    }

    pub(crate) fn commit_items(&self) -> Vec<CommitItem> {
        self.items
            .iter()
            .map(|i| CommitItem {
                path: i.info.path.clone(),
                action: i.action,
            })
            .collect()
    }
}

fn action_for(status: VersionStatus) -> ChangeAction {
    if status.contains(VersionStatus::SCHEDULED_REPLACE) {
        ChangeAction::Replace
    } else if status.contains(VersionStatus::SCHEDULED_ADD) {
        ChangeAction::Add
    } else if status.contains(VersionStatus::SCHEDULED_DELETE) {
        ChangeAction::Delete
    } else {
        ChangeAction::Modify
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(path: &str, status: VersionStatus) -> VersionInfo {
        VersionInfo::new(path, status, false)
    }

    #[test]
    fn test_add_file_is_idempotent_by_path() {
        let mut changes = ChangeSet::new("/repo");
        let vi = info(
            "/repo/a",
            VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD,
        );
        changes.add_file(vi.clone());
        changes.add_file(vi);
        assert_eq!(changes.items().len(), 1);
    }

    #[test]
    fn test_action_derived_from_status() {
        let mut changes = ChangeSet::new("/repo");
        changes.add_file(info(
            "/repo/a",
            VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD,
        ));
        changes.add_file(info(
            "/repo/b",
            VersionStatus::VERSIONED | VersionStatus::SCHEDULED_DELETE,
        ));
        changes.add_file(info(
            "/repo/c",
            VersionStatus::VERSIONED | VersionStatus::MODIFIED,
        ));
        changes.add_file(info(
            "/repo/d",
            VersionStatus::VERSIONED
                | VersionStatus::SCHEDULED_REPLACE
                | VersionStatus::SCHEDULED_DELETE,
        ));

        let actions: Vec<ChangeAction> = changes.items().iter().map(|i| i.action).collect();
        assert_eq!(
            actions,
            vec![
                ChangeAction::Add,
                ChangeAction::Delete,
                ChangeAction::Modify,
                ChangeAction::Replace,
            ]
        );
    }

    #[test]
    fn test_comment_and_properties() {
        let mut changes = ChangeSet::new("/repo");
        changes.set_global_comment("Commit #0");
        changes.set_property("Local.Author", "author");
        changes.set_property("Local.Email", "email@service.domain");

        assert_eq!(changes.global_comment(), "Commit #0");
        assert_eq!(
            changes.extended_properties().get("Local.Author").unwrap(),
            "author"
        );
    }
}
