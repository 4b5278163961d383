//! Capture pipeline: a bounded queue drained by one background worker.
//!
//! Capture callbacks call [`CapturePipeline::on_notification_posted`], which
//! filters and enqueues without blocking. A single tokio task takes items in
//! FIFO order, hands each to the [`Dispatcher`], and then pauses for the
//! configured pacing interval so endpoints are not flooded.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use sync_core::filter::should_forward;
use sync_core::models::InboundNotification;
use sync_core::settings::{DEFAULT_PACING_MS, DEFAULT_QUEUE_CAPACITY};
use sync_store::config_store::ConfigStore;
use sync_store::run_state::RunState;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dispatcher::Dispatcher;

// ── Public types ──────────────────────────────────────────────────────────────

/// Lifecycle state of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Stopped,
    Starting,
    Running,
    /// Waiting for the worker to finish and the queue to be discarded.
    Stopping,
    /// The notification source went away; a restart may be pending.
    Disconnected,
    Restarting,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Disconnected => "disconnected",
            Self::Restarting => "restarting",
        }
    }

    fn accepts_notifications(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// What happened to a posted notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Queued,
    /// Rejected by the package filter.
    Filtered,
    /// The queue was full.
    Dropped,
    /// The pipeline is not accepting notifications.
    NotRunning,
}

/// Result of [`CapturePipeline::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// A stop is still in progress; nothing was started.
    Busy,
    /// Nothing to forward to; the pipeline stays stopped.
    NoConnections,
}

impl StartOutcome {
    /// User-facing message for outcomes other than a fresh start.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Started => None,
            Self::AlreadyRunning => Some("Service is already running"),
            Self::Busy => Some("Service is stopping; try again shortly"),
            Self::NoConnections => Some("No connections configured; add one before starting"),
        }
    }
}

/// Tuning knobs for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum queued notifications; further posts are dropped.
    pub queue_capacity: usize,
    /// Pause after each dispatch.
    pub pacing: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            pacing: Duration::from_millis(DEFAULT_PACING_MS),
        }
    }
}

// ── CapturePipeline ───────────────────────────────────────────────────────────

struct Worker {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl Worker {
    fn is_live(&self) -> bool {
        !self.handle.is_finished()
    }
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<InboundNotification>>>;

/// Bounded capture queue plus its single delivery worker.
pub struct CapturePipeline {
    config: PipelineConfig,
    store: Arc<ConfigStore>,
    dispatcher: Arc<Dispatcher>,
    run_state: Arc<RunState>,
    tx: mpsc::Sender<InboundNotification>,
    rx: SharedReceiver,
    state: Mutex<PipelineState>,
    worker: Mutex<Option<Worker>>,
    /// Serialises concurrent `stop`/`disconnect` calls.
    shutdown_lock: tokio::sync::Mutex<()>,
}

impl CapturePipeline {
    pub fn new(
        config: PipelineConfig,
        store: Arc<ConfigStore>,
        dispatcher: Arc<Dispatcher>,
        run_state: Arc<RunState>,
    ) -> Self {
        // tokio panics on a zero-capacity channel.
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            store,
            dispatcher,
            run_state,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            state: Mutex::new(PipelineState::Stopped),
            worker: Mutex::new(None),
            shutdown_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn state(&self) -> PipelineState {
        *lock(&self.state)
    }

    /// Whether a delivery worker is alive.
    pub fn is_active(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(Worker::is_live)
    }

    /// Number of notifications waiting for the worker.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Start the worker unless one is already alive.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> StartOutcome {
        let mut worker = lock(&self.worker);

        if worker.as_ref().is_some_and(Worker::is_live) {
            if !self.run_state.is_running() {
                tracing::warn!("worker alive but run flag cleared; restoring flag");
                self.run_state.set_running(true);
            }
            tracing::info!("start requested while already running");
            return StartOutcome::AlreadyRunning;
        }

        if self.state() == PipelineState::Stopping {
            tracing::info!("start requested while stopping; refusing");
            return StartOutcome::Busy;
        }

        if self.store.is_config_empty() {
            tracing::warn!("refusing to start: no connections configured");
            let mut state = lock(&self.state);
            if *state == PipelineState::Restarting {
                *state = PipelineState::Stopped;
            }
            return StartOutcome::NoConnections;
        }

        self.set_state(PipelineState::Starting);
        self.run_state.set_running(true);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(drain_loop(
            Arc::clone(&self.rx),
            Arc::clone(&self.dispatcher),
            self.config.pacing,
            cancel.clone(),
        ));
        *worker = Some(Worker { handle, cancel });

        self.set_state(PipelineState::Running);
        tracing::info!(
            queue_capacity = self.config.queue_capacity,
            pacing_ms = self.config.pacing.as_millis() as u64,
            "capture pipeline started"
        );
        StartOutcome::Started
    }

    /// Stop the worker, discard queued notifications and clear the run flag.
    ///
    /// A dispatch already in flight is allowed to finish.
    pub async fn stop(&self) {
        self.shutdown(PipelineState::Stopped).await;
    }

    /// Like [`stop`](Self::stop), but leaves the pipeline marked as
    /// disconnected so a supervisor can restart it.
    pub async fn disconnect(&self) {
        self.shutdown(PipelineState::Disconnected).await;
    }

    /// Capture callback for a newly posted notification. Never blocks.
    pub fn on_notification_posted(
        &self,
        source_package: &str,
        title: &str,
        body: &str,
    ) -> PostOutcome {
        if !self.state().accepts_notifications() {
            tracing::debug!(package = source_package, "pipeline not running; ignoring");
            return PostOutcome::NotRunning;
        }

        let filter = self.store.load_filter_list();
        if !should_forward(source_package, &filter) {
            tracing::info!(
                package = source_package,
                mode = filter.mode_name(),
                "notification filtered"
            );
            return PostOutcome::Filtered;
        }

        let notification = InboundNotification::new(source_package, title, body);
        match self.tx.try_send(notification) {
            Ok(()) => {
                tracing::debug!(package = source_package, "notification queued");
                PostOutcome::Queued
            }
            Err(TrySendError::Full(n)) => {
                tracing::warn!(
                    package = %n.source_package,
                    capacity = self.config.queue_capacity,
                    "notification queue full; dropping"
                );
                PostOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => PostOutcome::NotRunning,
        }
    }

    /// Capture callback for a removed notification. Logged only.
    pub fn on_notification_removed(&self, source_package: &str, title: &str) {
        tracing::info!(package = source_package, title, "notification removed");
    }

    /// Mark a stopped or disconnected pipeline as restarting.
    pub(crate) fn mark_restarting(&self) {
        let mut state = lock(&self.state);
        if matches!(*state, PipelineState::Stopped | PipelineState::Disconnected) {
            *state = PipelineState::Restarting;
        }
    }

    fn set_state(&self, next: PipelineState) {
        *lock(&self.state) = next;
    }

    async fn shutdown(&self, next: PipelineState) {
        let _serial = self.shutdown_lock.lock().await;

        // Stopping rejects new posts and makes `start` refuse until the old
        // worker has exited and released the receiver.
        let worker = {
            let mut slot = lock(&self.worker);
            self.set_state(PipelineState::Stopping);
            slot.take()
        };
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(e) = worker.handle.await {
                tracing::warn!(error = %e, "delivery worker ended abnormally");
            }
        }

        let discarded = self.discard_queued().await;
        if discarded > 0 {
            tracing::info!(discarded, "discarded queued notifications");
        }

        self.set_state(next);
        self.run_state.set_running(false);
        tracing::info!(state = next.as_str(), "capture pipeline stopped");
    }

    async fn discard_queued(&self) -> usize {
        let mut rx = self.rx.lock().await;
        let mut discarded = 0;
        while rx.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Worker loop ───────────────────────────────────────────────────────────────

async fn drain_loop(
    rx: SharedReceiver,
    dispatcher: Arc<Dispatcher>,
    pacing: Duration,
    cancel: CancellationToken,
) {
    let mut rx = rx.lock().await;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => item,
        };
        let Some(notification) = next else {
            break;
        };

        let report = dispatcher.dispatch(&notification).await;
        tracing::debug!(
            package = %notification.source_package,
            delivered = report.delivered,
            failed = report.failed,
            skipped = report.skipped,
            "dispatch finished"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pacing) => {}
        }
    }

    tracing::debug!("delivery worker exiting");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
