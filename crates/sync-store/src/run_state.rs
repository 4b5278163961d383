//! The "service is running" flag, held in memory and mirrored to disk.
//!
//! The persisted value survives process restarts but is advisory only: after a
//! crash it may claim the service is running when no worker exists. Owners
//! double-check the live pipeline before trusting it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::json_file::{read_json, write_json_atomic};

/// File holding the persisted flag.
pub const RUN_STATE_FILE: &str = "service_state.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PersistedRunState {
    running: bool,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

/// Shared handle to the service run flag.
///
/// Writes are last-write-wins; there is no transactional guarantee.
#[derive(Debug)]
pub struct RunState {
    running: AtomicBool,
    path: Option<PathBuf>,
}

impl RunState {
    /// Load the flag persisted in `dir`, defaulting to not running.
    pub fn load(dir: &Path) -> Self {
        let path = dir.join(RUN_STATE_FILE);
        let running = match read_json::<PersistedRunState>(&path) {
            Ok(state) => state.map(|s| s.running).unwrap_or(false),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "failed to read run state; assuming stopped"
                );
                false
            }
        };
        Self {
            running: AtomicBool::new(running),
            path: Some(path),
        }
    }

    /// A flag that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            running: AtomicBool::new(false),
            path: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set the flag and persist it. Persistence failures are logged only.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);

        let Some(path) = &self.path else {
            return;
        };
        let state = PersistedRunState {
            running,
            updated_at: Some(Utc::now()),
        };
        if let Err(e) = write_json_atomic(path, &state) {
            tracing::warn!(error = %e, running, "failed to persist run state");
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}
