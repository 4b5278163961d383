//! Domain layer for notifisync.
//!
//! Connection and filter models, the error taxonomy, the allow/deny policy,
//! the AES payload codec and command-line settings. Nothing here performs
//! file or network I/O.

pub mod crypto;
pub mod error;
pub mod filter;
pub mod models;
pub mod settings;

pub use error::{Result, SyncError};
