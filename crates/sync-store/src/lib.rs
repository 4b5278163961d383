//! Persistence layer for notifisync.
//!
//! JSON documents on disk: connection and filter configuration with a
//! fallback location, the advisory service run flag, and the durable restart
//! queue consulted when the process is recreated.

pub mod config_store;
pub mod json_file;
pub mod restart_queue;
pub mod run_state;
