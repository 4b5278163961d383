//! Durable record of a pending pipeline restart.
//!
//! When the notification source disconnects, a [`RestartTicket`] is written so
//! that the restart still happens if the process is torn down before the delay
//! elapses. At most one ticket exists; scheduling again replaces it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::error::Result;

use crate::json_file::{read_json, remove_if_exists, write_json_atomic};

/// File holding the pending ticket.
pub const RESTART_FILE: &str = "restart_request.json";

/// A restart that should be attempted at or after `due_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartTicket {
    pub due_at: DateTime<Utc>,
    pub scheduled_at: DateTime<Utc>,
    pub reason: String,
}

impl RestartTicket {
    /// A ticket due `delay` from now.
    pub fn after(delay: Duration, reason: impl Into<String>) -> Self {
        let now = Utc::now();
        let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            due_at: now + delta,
            scheduled_at: now,
            reason: reason.into(),
        }
    }

    /// Time left until the ticket is due; zero when overdue.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.due_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// File-backed single-slot restart queue.
#[derive(Debug, Clone)]
pub struct RestartQueue {
    path: PathBuf,
}

impl RestartQueue {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(RESTART_FILE),
        }
    }

    /// The pending ticket, if any. Malformed tickets are logged and ignored.
    pub fn pending(&self) -> Option<RestartTicket> {
        match read_json::<RestartTicket>(&self.path) {
            Ok(ticket) => ticket,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %self.path.display(),
                    "ignoring unreadable restart ticket"
                );
                None
            }
        }
    }

    /// Persist `ticket`, replacing any pending one.
    pub fn schedule(&self, ticket: &RestartTicket) -> Result<()> {
        write_json_atomic(&self.path, ticket)?;
        tracing::info!(due_at = %ticket.due_at, reason = %ticket.reason, "restart scheduled");
        Ok(())
    }

    /// Remove the pending ticket.
    pub fn clear(&self) -> Result<()> {
        remove_if_exists(&self.path)
    }
}
