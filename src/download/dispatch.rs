//! Serial delivery of completion callbacks.
//!
//! All completions of a coordinator run on one dispatcher task, in the order
//! they were queued, so no two completions ever run concurrently.

use std::panic::AssertUnwindSafe;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue feeding the completion task.
#[derive(Debug, Clone)]
pub(crate) struct CompletionDispatcher {
    tx: mpsc::UnboundedSender<Job>,
}

impl CompletionDispatcher {
    /// Spawns the completion task on `runtime`.
    ///
    /// The task exits once every clone of the dispatcher is dropped and the
    /// queue is drained.
    pub(crate) fn spawn(runtime: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        runtime.spawn(async move {
            while let Some(job) = rx.recv().await {
                if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("completion handler panicked");
                }
            }
            debug!("completion dispatcher stopped");
        });
        Self { tx }
    }

    /// Queues `job` behind every previously queued completion.
    ///
    /// Runs `job` on the calling task if the completion task is gone (runtime
    /// shutting down).
    pub(crate) fn dispatch(&self, job: impl FnOnce() + Send + 'static) {
        if let Err(mpsc::error::SendError(job)) = self.tx.send(Box::new(job)) {
            warn!("completion dispatcher unavailable; running completion inline");
            job();
        }
    }
}
