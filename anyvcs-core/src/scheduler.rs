//! Background query scheduler
//!
//! A single worker task owned by each repository drains a queue of pending
//! status queries, invokes the backend, and publishes parsed results into
//! the status cache. The worker's lifecycle is tied to the repository:
//! spawned on open, aborted on drop. There is no cancellation of an
//! in-flight backend query; it always runs to completion and the epoch
//! check in the cache decides whether its result is trusted.

use crate::backend::VcsBackend;
use crate::cache::{QueryKey, StatusCache};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) struct QueryScheduler {
    tx: mpsc::UnboundedSender<QueryKey>,
    worker: JoinHandle<()>,
}

impl QueryScheduler {
    /// Spawn the worker task for one repository.
    pub fn start(backend: Arc<dyn VcsBackend>, cache: Arc<StatusCache>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(backend, cache, rx));
        Self { tx, worker }
    }

    /// Request an asynchronous refresh. Never blocks; duplicate requests
    /// for a key already in flight are coalesced by the worker.
    pub fn enqueue(&self, key: QueryKey) {
        let _ = self.tx.send(key);
    }
}

impl Drop for QueryScheduler {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker(
    backend: Arc<dyn VcsBackend>,
    cache: Arc<StatusCache>,
    mut rx: mpsc::UnboundedReceiver<QueryKey>,
) {
    while let Some(key) = rx.recv().await {
        let Some(started) = cache.begin_query(&key) else {
            // Same key already in flight; that query's publish serves this
            // request too.
            debug!(path = %key.path.display(), recursive = key.recursive, "coalesced status query");
            continue;
        };
        execute_query(backend.as_ref(), &cache, &key, started).await;
    }
}

/// Run one background status query and publish the outcome.
async fn execute_query(backend: &dyn VcsBackend, cache: &StatusCache, key: &QueryKey, started: u64) {
    match backend.status(&key.path, key.recursive, false).await {
        Ok(raw) => {
            let (root_info, children) = split_entries(key, raw);
            cache.publish(key, root_info, children, started);
        }
        Err(e) => {
            // Publish best-effort: keep whatever value was cached before and
            // release the in-flight slot so waiters are not stuck.
            warn!(path = %key.path.display(), error = %e, "backend status query failed");
            cache.publish_failure(key);
        }
    }
}

/// Separate raw backend output into the queried path's own entry and the
/// interesting entries underneath it. Shared with the facade's synchronous
/// (cache-bypassing) reads.
pub(crate) fn split_entries(
    key: &QueryKey,
    raw: Vec<crate::backend::RawStatusEntry>,
) -> (
    Option<crate::status::VersionInfo>,
    Vec<crate::status::VersionInfo>,
) {
    let mut root_info = None;
    let mut children = Vec::with_capacity(raw.len());
    for entry in raw {
        let info = entry.into_info();
        if info.path == key.path {
            root_info = Some(info);
        } else {
            children.push(info);
        }
    }
    (root_info, children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::VersionStatus;
    use crate::testutil::{StubBackend, raw_entry as entry};
    use std::path::Path;
    use std::time::Duration;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_worker_publishes_results() {
        let backend = Arc::new(StubBackend::new(
            "/repo",
            vec![
                entry("/repo", VersionStatus::VERSIONED, true),
                entry(
                    "/repo/a",
                    VersionStatus::VERSIONED | VersionStatus::SCHEDULED_ADD,
                    false,
                ),
            ],
        ));
        let cache = Arc::new(StatusCache::new());
        let scheduler = QueryScheduler::start(backend.clone(), cache.clone());

        scheduler.enqueue(QueryKey::new("/repo", false));
        wait_until(|| cache.get(Path::new("/repo/a")).is_some()).await;

        let hit = cache.get(Path::new("/repo/a")).unwrap();
        assert!(hit.fresh);
        assert!(hit.info.status.contains(VersionStatus::SCHEDULED_ADD));

        let listing = cache.get_directory(Path::new("/repo"), false).unwrap();
        assert!(listing.fresh);
        assert_eq!(listing.infos.len(), 1, "root entry is not part of its own listing");
    }

    #[tokio::test]
    async fn test_duplicate_of_in_flight_query_is_coalesced() {
        let backend = Arc::new(StubBackend::new(
            "/repo",
            vec![entry("/repo/a", VersionStatus::VERSIONED, false)],
        ));
        let cache = Arc::new(StatusCache::new());
        let scheduler = QueryScheduler::start(backend.clone(), cache.clone());

        // Simulate a synchronous query already holding the slot.
        let key = QueryKey::new("/repo/a", false);
        let started = cache.begin_query(&key).unwrap();

        scheduler.enqueue(key.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.status_calls(), 0, "worker must not duplicate an in-flight query");

        cache.publish(&key, None, vec![], started);
        // New requests for the same key query again.
        scheduler.enqueue(key.clone());
        wait_until(|| backend.status_calls() == 1).await;
    }

    #[tokio::test]
    async fn test_backend_failure_releases_waiters() {
        let mut stub = StubBackend::new("/repo", vec![]);
        stub.fail = true;
        let backend = Arc::new(stub);
        let cache = Arc::new(StatusCache::new());
        let scheduler = QueryScheduler::start(backend.clone(), cache.clone());

        let key = QueryKey::new("/repo/a", false);
        scheduler.enqueue(key.clone());
        wait_until(|| backend.status_calls() == 1).await;

        // Must return rather than hang, and the entry stays unknown.
        cache.wait(&key).await;
        assert!(cache.get(Path::new("/repo/a")).is_none());
    }
}
