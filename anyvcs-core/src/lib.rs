//! AnyVcs Core Library
//!
//! Unified version control abstraction with an asynchronous status cache:
//! - Status model (VersionStatus flags, VersionInfo snapshots)
//! - Status cache with freshness tracking and query coalescing
//! - Background query scheduler per repository
//! - Repository facade (add/commit/revert/move/delete/lock/ignore,
//!   history, diffs, blame)
//! - Changesets submitted as one commit
//! - Backend adapter trait plus the built-in local reference backend
//! - Repository detection across backend kinds

pub mod backend;
pub mod cache;
pub mod changeset;
pub mod config;
pub mod detect;
pub mod error;
pub mod local;
pub mod paths;
pub mod progress;
pub mod repository;
pub mod status;

mod scheduler;

#[cfg(test)]
mod testutil;

pub use backend::{
    Annotation, Capabilities, ChangeAction, CommitItem, RawStatusEntry, Revision, VcsBackend,
};
pub use cache::{CacheHit, DirectoryHit, QueryKey, StatusCache};
pub use changeset::{ChangeSet, ChangeSetItem};
pub use config::{CONTROL_DIR, VcsConfig};
pub use detect::{RepositoryProbe, builtin_probes, detect, detect_with};
pub use error::{Result, VcsError};
pub use local::{LocalVcs, PROP_AUTHOR, PROP_EMAIL};
pub use progress::{LogProgressMonitor, NullProgressMonitor, ProgressMonitor};
pub use repository::Repository;
pub use status::{QueryFlags, VersionInfo, VersionStatus};
