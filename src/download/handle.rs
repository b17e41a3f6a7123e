//! Caller-visible lifecycle of one URL download.
//!
//! A [`DownloadHandle`] is created idle. [`DownloadHandle::download`] arms it
//! with a completion and spawns the transfer (held unless the handle resumes
//! immediately); [`resume`](DownloadHandle::resume),
//! [`suspend`](DownloadHandle::suspend) and [`cancel`](DownloadHandle::cancel)
//! drive the transfer through its control channel.
//!
//! Every `download()` gets a new generation. An attempt whose generation is
//! no longer current when it finishes is discarded, so the completion fires
//! exactly once per `download()` that was not superseded.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tracing::{debug, instrument};

use super::control::{Signal, TransferControl};
use super::dispatch::CompletionDispatcher;
use super::error::FetchError;
use super::fetcher::{ConditionalFetcher, FetchOutcome};
use crate::coordinator::ActiveDownloads;

/// Callback receiving the outcome of a download attempt.
///
/// Runs on the coordinator's completion task, never concurrently with
/// another completion of the same coordinator.
pub type Completion = Arc<dyn Fn(DownloadOutcome) + Send + Sync>;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// What a completion receives.
#[derive(Debug)]
pub struct DownloadOutcome {
    /// The requested URL.
    pub url: String,
    /// Cached file for the URL, when one is available.
    pub file_path: Option<PathBuf>,
    /// Whether `file_path` holds a current copy.
    pub success: bool,
    /// Failure reason when `success` is false.
    pub error: Option<FetchError>,
}

impl DownloadOutcome {
    fn from_fetch(url: &str, outcome: FetchOutcome) -> Self {
        Self {
            url: url.to_string(),
            file_path: outcome.file_path,
            success: outcome.success,
            error: outcome.error,
        }
    }
}

/// Lifecycle state of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created or armed, not running.
    Idle,
    /// Transfer allowed to proceed.
    Running,
    /// Transfer held between body chunks.
    Suspended,
    /// Cancelled through the handle.
    Cancelled,
    /// Last attempt succeeded.
    Completed,
    /// Last attempt failed.
    Failed,
}

impl TaskState {
    /// Returns true for states no live transfer can leave.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

/// Shared services a handle runs its attempts with.
#[derive(Debug, Clone)]
pub(crate) struct HandleContext {
    pub(crate) fetcher: Arc<ConditionalFetcher>,
    pub(crate) dispatcher: CompletionDispatcher,
    pub(crate) runtime: Handle,
    pub(crate) registry: Weak<ActiveDownloads>,
}

struct DownloadTask {
    state: TaskState,
    generation: u64,
    transfer: Option<TransferControl>,
    completion: Option<Completion>,
}

struct HandleInner {
    id: u64,
    url: String,
    resumes_immediately: bool,
    context: HandleContext,
    task: Mutex<DownloadTask>,
}

/// Handle to one URL download. Clones share state.
#[derive(Clone)]
pub struct DownloadHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for DownloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadHandle")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DownloadHandle {
    pub(crate) fn new(url: impl Into<String>, resumes_immediately: bool, context: HandleContext) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                resumes_immediately,
                context,
                task: Mutex::new(DownloadTask {
                    state: TaskState::Idle,
                    generation: 0,
                    transfer: None,
                    completion: None,
                }),
            }),
        }
    }

    /// Process-unique id of this handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The URL this handle downloads.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Whether `download` starts the transfer without waiting for `resume`.
    #[must_use]
    pub fn resumes_immediately(&self) -> bool {
        self.inner.resumes_immediately
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.task().state
    }

    /// Starts a new attempt reporting to `completion`.
    ///
    /// A transfer still in flight is cancelled and its outcome discarded.
    #[instrument(skip(self, completion), fields(url = %self.inner.url, handle_id = self.inner.id))]
    pub fn download(&self, completion: Completion) {
        self.start(completion, self.inner.resumes_immediately);
    }

    /// Lets the transfer run.
    ///
    /// Without a live transfer (never started, or finished) this starts a
    /// new attempt with the last completion passed to `download`.
    pub fn resume(&self) {
        let mut task = self.task();
        if task.state == TaskState::Running {
            return;
        }
        if matches!(task.state, TaskState::Idle | TaskState::Suspended)
            && let Some(transfer) = task.transfer.as_ref()
        {
            transfer.send(Signal::Run);
            task.state = TaskState::Running;
            return;
        }

        let Some(completion) = task.completion.clone() else {
            debug!(url = %self.inner.url, "resume before download; nothing to run");
            return;
        };
        drop(task);
        debug!(url = %self.inner.url, "restarting download");
        self.start(completion, true);
    }

    /// Holds a running transfer between body chunks.
    pub fn suspend(&self) {
        let mut task = self.task();
        if task.state == TaskState::Running
            && let Some(transfer) = task.transfer.as_ref()
        {
            transfer.send(Signal::Hold);
            task.state = TaskState::Suspended;
        }
    }

    /// Cancels the live transfer, if any.
    ///
    /// Its completion still fires, reporting a cancellation unless the
    /// payload was already placed.
    pub fn cancel(&self) {
        let mut task = self.task();
        if task.state.is_terminal() {
            return;
        }
        if let Some(transfer) = task.transfer.as_ref() {
            transfer.send(Signal::Cancel);
            task.state = TaskState::Cancelled;
        }
    }

    /// Returns the cached file for this handle's URL, if one exists.
    pub async fn cached_file_path(&self) -> Option<PathBuf> {
        self.inner
            .context
            .fetcher
            .cached_file_path(&self.inner.url)
            .await
    }

    fn task(&self) -> MutexGuard<'_, DownloadTask> {
        self.inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn start(&self, completion: Completion, run: bool) {
        let (generation, control) = {
            let mut task = self.task();
            if let Some(previous) = task.transfer.take() {
                previous.send(Signal::Cancel);
            }
            task.generation += 1;
            task.completion = Some(Arc::clone(&completion));
            let (transfer, control) =
                TransferControl::new(if run { Signal::Run } else { Signal::Hold });
            task.transfer = Some(transfer);
            task.state = if run {
                TaskState::Running
            } else {
                TaskState::Idle
            };
            (task.generation, control)
        };

        if let Some(registry) = self.inner.context.registry.upgrade() {
            registry.register(self.clone(), generation);
        }

        let weak = Arc::downgrade(&self.inner);
        let fetcher = Arc::clone(&self.inner.context.fetcher);
        let url = self.inner.url.clone();
        self.inner.context.runtime.spawn(async move {
            let mut control = control;
            // Validators are resolved only once the transfer may start; a
            // cancellation seen here is reported by `fetch`.
            let _ = control.ready().await;
            let lookup = fetcher.lookup(&url).await;
            let outcome = fetcher.fetch(&url, &lookup, &mut control).await;

            if let Some(inner) = weak.upgrade() {
                DownloadHandle { inner }.finish(generation, outcome, completion);
            } else {
                debug!(url = %url, "handle dropped; discarding outcome");
            }
        });
    }

    fn finish(&self, generation: u64, outcome: FetchOutcome, completion: Completion) {
        {
            let mut task = self.task();
            if task.generation != generation {
                debug!(url = %self.inner.url, generation, "superseded attempt discarded");
                return;
            }
            task.state = match &outcome.error {
                None => TaskState::Completed,
                Some(error) if error.is_cancelled() => TaskState::Cancelled,
                Some(_) => TaskState::Failed,
            };
            task.transfer = None;
        }

        let outcome = DownloadOutcome::from_fetch(&self.inner.url, outcome);
        let release = ActiveRelease {
            registry: Weak::clone(&self.inner.context.registry),
            url: self.inner.url.clone(),
            id: self.inner.id,
            generation,
        };
        self.inner.context.dispatcher.dispatch(move || {
            let _release = release;
            completion(outcome);
        });
    }
}

/// Releases one attempt's active-set slot once its completion has returned
/// or unwound.
struct ActiveRelease {
    registry: Weak<ActiveDownloads>,
    url: String,
    id: u64,
    generation: u64,
}

impl Drop for ActiveRelease {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade()
            && registry.release(&self.url, self.id, self.generation)
        {
            debug!(
                url = %self.url,
                handle_id = self.id,
                generation = self.generation,
                "released active download"
            );
        }
    }
}
