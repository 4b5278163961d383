//! Keeps the capture pipeline alive across listener disconnects and process
//! restarts.
//!
//! A disconnect stops the worker, persists a [`RestartTicket`] and arms one
//! deferred restart task. On process start, [`LifecycleSupervisor::resume`]
//! honours a pending ticket or recovers from a run flag left behind by a
//! crash.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use sync_store::config_store::ConfigStore;
use sync_store::restart_queue::{RestartQueue, RestartTicket};
use sync_store::run_state::RunState;
use tokio::task::JoinHandle;

use crate::pipeline::{CapturePipeline, StartOutcome};

/// What [`LifecycleSupervisor::resume`] decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeAction {
    /// A persisted restart was re-armed with this remaining delay.
    Scheduled(Duration),
    /// The run flag was stale; a restart was attempted immediately.
    Restarted(StartOutcome),
    /// Nothing to recover.
    Idle,
}

pub struct LifecycleSupervisor {
    pipeline: Arc<CapturePipeline>,
    run_state: Arc<RunState>,
    store: Arc<ConfigStore>,
    restarts: RestartQueue,
    restart_delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl LifecycleSupervisor {
    pub fn new(
        pipeline: Arc<CapturePipeline>,
        run_state: Arc<RunState>,
        store: Arc<ConfigStore>,
        restarts: RestartQueue,
        restart_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            pipeline,
            run_state,
            store,
            restarts,
            restart_delay,
            pending: Mutex::new(None),
        })
    }

    pub fn pipeline(&self) -> &Arc<CapturePipeline> {
        &self.pipeline
    }

    /// User-initiated start.
    pub fn start(&self) -> StartOutcome {
        let outcome = self.pipeline.start();
        if outcome == StartOutcome::Started {
            self.clear_ticket();
        }
        outcome
    }

    /// User-initiated stop. Cancels any pending restart.
    pub async fn stop(&self) {
        if let Some(task) = self.lock_pending().take() {
            task.abort();
        }
        self.pipeline.stop().await;
        self.clear_ticket();
    }

    /// The notification source went away: stop delivering and schedule a
    /// restart after the configured delay.
    pub async fn on_listener_disconnected(self: &Arc<Self>) {
        tracing::error!("notification listener disconnected");
        self.pipeline.disconnect().await;

        let ticket = RestartTicket::after(self.restart_delay, "listener disconnected");
        if let Err(e) = self.restarts.schedule(&ticket) {
            tracing::warn!(error = %e, "failed to persist restart ticket");
        }
        self.arm_restart(self.restart_delay);
    }

    /// Recover after the process was (re)created.
    pub fn resume(self: &Arc<Self>) -> ResumeAction {
        if let Some(ticket) = self.restarts.pending() {
            let delay = ticket.remaining(Utc::now());
            tracing::info!(
                reason = %ticket.reason,
                delay_ms = delay.as_millis() as u64,
                "resuming pending restart"
            );
            self.arm_restart(delay);
            return ResumeAction::Scheduled(delay);
        }

        if self.run_state.is_running() && !self.pipeline.is_active() {
            tracing::warn!("run flag set but no worker alive; restarting");
            return ResumeAction::Restarted(self.attempt_restart());
        }

        ResumeAction::Idle
    }

    /// [`resume`](Self::resume), then start unless recovery already did.
    pub fn resume_and_start(self: &Arc<Self>) -> StartOutcome {
        match self.resume() {
            ResumeAction::Restarted(StartOutcome::Started) => StartOutcome::Started,
            _ => self.start(),
        }
    }

    /// Restart the pipeline if it is not already running and there is
    /// somewhere to forward to. The pending ticket is consumed unless a stop
    /// was still in progress.
    pub fn attempt_restart(&self) -> StartOutcome {
        let outcome = if self.pipeline.is_active() {
            tracing::debug!("restart skipped: pipeline already running");
            StartOutcome::AlreadyRunning
        } else if self.store.is_config_empty() {
            tracing::warn!("restart skipped: no connections configured");
            StartOutcome::NoConnections
        } else {
            self.pipeline.mark_restarting();
            self.pipeline.start()
        };
        tracing::info!(outcome = ?outcome, "restart attempted");
        // A stop in progress leaves the ticket for the next resume.
        if outcome != StartOutcome::Busy {
            self.clear_ticket();
        }
        outcome
    }

    /// Whether a deferred restart task is waiting.
    pub fn restart_pending(&self) -> bool {
        self.lock_pending()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Spawn one deferred restart unless one is already waiting.
    fn arm_restart(self: &Arc<Self>, delay: Duration) {
        let mut pending = self.lock_pending();
        if pending.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!("restart already pending");
            return;
        }

        let this = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.attempt_restart();
        }));
    }

    fn clear_ticket(&self) {
        if let Err(e) = self.restarts.clear() {
            tracing::warn!(error = %e, "failed to clear restart ticket");
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
