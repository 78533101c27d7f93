//! Asynchronous status cache
//!
//! Maps normalized paths to the latest known [`VersionInfo`], amortizing
//! slow backend status queries behind stale-but-immediate reads. Freshness,
//! not correctness-by-construction, is the contract: a stale read is
//! expected and bounded by the scheduler's query latency, never by a TTL.
//!
//! File-level values and directory listings are tracked separately, and a
//! directory's shallow and recursive listings have independent freshness.
//! Invalidation is epoch-based: a query result computed before the last
//! invalidation of its target is published but never marked fresh, so a
//! completed query cannot resurrect pre-invalidation state.

use crate::paths;
use crate::status::VersionInfo;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Identity of one backend status query. At most one query per key is in
/// flight at any time; concurrent requests for the same key coalesce.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub path: PathBuf,
    pub recursive: bool,
}

impl QueryKey {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }
}

/// Cached value for one path, plus whether it is still trusted.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub info: VersionInfo,
    pub fresh: bool,
    pub age: Duration,
}

/// Cached directory listing at one granularity.
#[derive(Debug, Clone)]
pub struct DirectoryHit {
    pub infos: Vec<VersionInfo>,
    pub fresh: bool,
}

struct FileEntry {
    info: VersionInfo,
    fresh: bool,
    updated_at: Instant,
}

struct DirEntry {
    infos: Vec<VersionInfo>,
    fresh: bool,
}

struct InFlight {
    tx: watch::Sender<()>,
    started: u64,
}

struct CacheInner {
    /// Monotonic counter bumped on every invalidation.
    epoch: u64,
    files: HashMap<PathBuf, FileEntry>,
    dirs: HashMap<(PathBuf, bool), DirEntry>,
    /// Last invalidation epoch per path, kept while any in-flight query
    /// predates it.
    invalidated: HashMap<PathBuf, u64>,
    in_flight: HashMap<QueryKey, InFlight>,
}

/// The single shared mutable structure of the layer. All entry reads and
/// writes are mutually exclusive under one lock; backend latency dominates,
/// so per-entry locking buys nothing here.
pub struct StatusCache {
    inner: Mutex<CacheInner>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                epoch: 0,
                files: HashMap::new(),
                dirs: HashMap::new(),
                invalidated: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Last known value for `path`, fresh or not. `None` when the path has
    /// never been published.
    pub fn get(&self, path: &Path) -> Option<CacheHit> {
        let inner = self.inner.lock().unwrap();
        inner.files.get(path).map(|e| CacheHit {
            info: e.info.clone(),
            fresh: e.fresh,
            age: e.updated_at.elapsed(),
        })
    }

    /// Last known listing for `(root, recursive)`. A recursive hit is only
    /// fresh when the shallow listing of the same root is not known-stale:
    /// a stale shallow listing means direct children changed, which the
    /// recursive snapshot cannot have seen either.
    pub fn get_directory(&self, root: &Path, recursive: bool) -> Option<DirectoryHit> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.dirs.get(&(root.to_path_buf(), recursive))?;
        let mut fresh = entry.fresh;
        if recursive && fresh {
            if let Some(shallow) = inner.dirs.get(&(root.to_path_buf(), false)) {
                fresh = shallow.fresh;
            }
        }
        Some(DirectoryHit {
            infos: entry.infos.clone(),
            fresh,
        })
    }

    /// Mark `path` (and, for directories, its subtree and the listings that
    /// contain it) stale. Non-blocking; the next read triggers a refresh.
    pub fn invalidate(&self, path: &Path) {
        let mut inner = self.inner.lock().unwrap();
        inner.epoch += 1;
        let epoch = inner.epoch;
        inner.invalidated.insert(path.to_path_buf(), epoch);

        for (p, entry) in inner.files.iter_mut() {
            if p == path || paths::is_under(path, p) {
                entry.fresh = false;
            }
        }
        let parent = path.parent().map(|p| p.to_path_buf());
        for ((root, recursive), entry) in inner.dirs.iter_mut() {
            let direct = parent.as_deref() == Some(root.as_path());
            let inside = *recursive && paths::is_under(root, path);
            let above = paths::is_under(path, root);
            if root == path || direct || inside || above {
                entry.fresh = false;
            }
        }
    }

    /// Claim the in-flight slot for `key`. Returns the epoch snapshot to
    /// pass back to [`publish`](Self::publish), or `None` when another query
    /// for the same key is already running (coalesce by waiting instead).
    pub fn begin_query(&self, key: &QueryKey) -> Option<u64> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_flight.contains_key(key) {
            return None;
        }
        let started = inner.epoch;
        let (tx, _rx) = watch::channel(());
        inner.in_flight.insert(key.clone(), InFlight { tx, started });
        Some(started)
    }

    /// Wait until the in-flight query for `key`, if any, completes. Returns
    /// immediately when none is running.
    pub async fn wait(&self, key: &QueryKey) {
        let rx = {
            let inner = self.inner.lock().unwrap();
            inner.in_flight.get(key).map(|f| f.tx.subscribe())
        };
        if let Some(mut rx) = rx {
            // Err means the sender was dropped on publish, which is just as
            // good a wakeup as an explicit send.
            let _ = rx.changed().await;
        }
    }

    /// Install a completed query result and wake all waiters.
    ///
    /// `root_info` is the queried path's own entry; `children` are the
    /// interesting entries underneath it (empty for plain files). Entries
    /// whose target was invalidated after `started` are stored but left
    /// stale, so the next read re-queries. Unrelated cache entries are
    /// untouched.
    pub fn publish(
        &self,
        key: &QueryKey,
        root_info: Option<VersionInfo>,
        children: Vec<VersionInfo>,
        started: u64,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        let is_directory = root_info.as_ref().map(|i| i.is_directory).unwrap_or(true);
        if let Some(info) = root_info {
            let fresh = path_fresh_since(&inner, &info.path, started);
            inner.files.insert(
                info.path.clone(),
                FileEntry {
                    info,
                    fresh,
                    updated_at: now,
                },
            );
        }
        for info in &children {
            let fresh = path_fresh_since(&inner, &info.path, started);
            inner.files.insert(
                info.path.clone(),
                FileEntry {
                    info: info.clone(),
                    fresh,
                    updated_at: now,
                },
            );
        }
        if is_directory {
            let fresh = listing_fresh_since(&inner, &key.path, started);
            inner.dirs.insert(
                (key.path.clone(), key.recursive),
                DirEntry {
                    infos: children,
                    fresh,
                },
            );
        }

        self.finish(&mut inner, key);
    }

    /// Release the in-flight slot after a failed backend query, leaving any
    /// previous value in place, so waiters are not blocked indefinitely.
    pub fn publish_failure(&self, key: &QueryKey) {
        let mut inner = self.inner.lock().unwrap();
        self.finish(&mut inner, key);
    }

    fn finish(&self, inner: &mut CacheInner, key: &QueryKey) {
        if let Some(flight) = inner.in_flight.remove(key) {
            let _ = flight.tx.send(());
        }
        // Invalidation records are only needed while a query that predates
        // them is still running.
        let min_started = inner.in_flight.values().map(|f| f.started).min();
        match min_started {
            Some(min) => inner.invalidated.retain(|_, e| *e > min),
            None => inner.invalidated.clear(),
        }
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        self.inner.lock().unwrap().in_flight.len()
    }
}

impl Default for StatusCache {
    fn default() -> Self {
        Self::new()
    }
}

/// No invalidation after `started` covers `path`.
fn path_fresh_since(inner: &CacheInner, path: &Path, started: u64) -> bool {
    !inner
        .invalidated
        .iter()
        .any(|(p, e)| *e > started && (p.as_path() == path || paths::is_under(p, path)))
}

/// No invalidation after `started` touches anything in `root`'s listing.
fn listing_fresh_since(inner: &CacheInner, root: &Path, started: u64) -> bool {
    !inner.invalidated.iter().any(|(p, e)| {
        *e > started
            && (p.as_path() == root || paths::is_under(root, p) || paths::is_under(p, root))
    })
}
