//! Drives the pipeline from a stream of JSON-lines capture events.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sync_runtime::supervisor::LifecycleSupervisor;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One line of capture input.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CaptureEvent {
    Posted {
        package: String,
        #[serde(default)]
        title: String,
        #[serde(default)]
        body: String,
    },
    Removed {
        package: String,
        #[serde(default)]
        title: String,
    },
    Disconnected,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_event(line: &str) -> Option<serde_json::Result<CaptureEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    Some(serde_json::from_str(line))
}

async fn handle_event(supervisor: &Arc<LifecycleSupervisor>, event: CaptureEvent) {
    match event {
        CaptureEvent::Posted {
            package,
            title,
            body,
        } => {
            let outcome = supervisor
                .pipeline()
                .on_notification_posted(&package, &title, &body);
            tracing::debug!(package = %package, ?outcome, "capture event handled");
        }
        CaptureEvent::Removed { package, title } => {
            supervisor.pipeline().on_notification_removed(&package, &title);
        }
        CaptureEvent::Disconnected => supervisor.on_listener_disconnected().await,
    }
}

/// Feed every event from `input` to the supervisor until end of input.
///
/// Malformed lines are logged and skipped.
pub async fn drive<R>(supervisor: &Arc<LifecycleSupervisor>, input: R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        match parse_event(&line) {
            Some(Ok(event)) => handle_event(supervisor, event).await,
            Some(Err(e)) => tracing::warn!(error = %e, "skipping malformed capture event"),
            None => {}
        }
    }
    tracing::info!("capture input closed");
    Ok(())
}

/// Wait until the worker has taken every queued notification.
///
/// Returns early if the worker goes away (stop, disconnect) or `limit` passes.
pub async fn wait_for_drain(supervisor: &LifecycleSupervisor, limit: Duration) {
    let pipeline = supervisor.pipeline();
    let deadline = tokio::time::Instant::now() + limit;
    while pipeline.queued() > 0 && pipeline.is_active() {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(queued = pipeline.queued(), "gave up waiting for queue to drain");
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
