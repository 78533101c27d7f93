//! Progress reporting sink for long-running operations
//!
//! The core invokes a monitor on long operations but never blocks on it.
//! Cancellation is cooperative: backends may poll `is_cancelled` between
//! steps, but an in-flight backend query always runs to completion.

use tracing::info;

/// Sink for start/step/end/cancel-check notifications.
pub trait ProgressMonitor: Send + Sync {
    fn begin(&self, _task: &str, _total_steps: usize) {}

    fn step(&self, _completed: usize) {}

    fn end(&self) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Monitor that swallows all notifications. Used by tests and quiet CLI runs.
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {}

/// Monitor that forwards progress to the tracing subscriber.
pub struct LogProgressMonitor;

impl ProgressMonitor for LogProgressMonitor {
    fn begin(&self, task: &str, total_steps: usize) {
        info!(task, total_steps, "operation started");
    }

    fn step(&self, completed: usize) {
        info!(completed, "operation progress");
    }

    fn end(&self) {
        info!("operation finished");
    }
}
