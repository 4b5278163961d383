use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::models::CipherMode;

/// Directory under `$HOME` holding all persisted state.
pub const DEFAULT_DIR_NAME: &str = ".notifisync";

/// Default number of notifications that may wait for delivery.
pub const DEFAULT_QUEUE_CAPACITY: usize = 20;

/// Default delay between two deliveries, in milliseconds.
pub const DEFAULT_PACING_MS: u64 = 500;

/// Default delay before a restart after the listener disconnects.
pub const DEFAULT_RESTART_DELAY_SECS: u64 = 10;

/// Identifier of this application as a notification source.
pub const DEFAULT_SELF_PACKAGE: &str = "notifisync";

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Forward device notifications to Bark-style push endpoints
#[derive(Parser, Debug, Clone)]
#[command(
    name = "notifisync",
    about = "Forward device notifications to Bark-style push endpoints",
    version
)]
pub struct Settings {
    /// Directory holding connection, filter and service state files
    #[arg(long, global = true, env = "NOTIFISYNC_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Secondary directory used when writes to the config directory fail
    #[arg(long, global = true, env = "NOTIFISYNC_FALLBACK_DIR")]
    pub fallback_dir: Option<PathBuf>,

    /// Logging level
    #[arg(
        long,
        global = true,
        default_value = "INFO",
        value_parser = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL"]
    )]
    pub log_level: String,

    /// Append log output to this file as well as stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the forwarding pipeline, reading captured notifications from stdin
    Run(RunArgs),
    /// Manage forwarding connections
    #[command(subcommand)]
    Connection(ConnectionCommand),
    /// Manage the source application filter
    #[command(subcommand)]
    Filter(FilterCommand),
    /// Show service state, pending restarts and configuration summary
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Delay between two deliveries in milliseconds
    #[arg(long, default_value_t = DEFAULT_PACING_MS)]
    pub pacing_ms: u64,

    /// Number of notifications that may wait for delivery
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, value_parser = parse_capacity)]
    pub queue_capacity: usize,

    /// Delay before restarting after the notification source disconnects
    #[arg(long, default_value_t = DEFAULT_RESTART_DELAY_SECS)]
    pub restart_delay_secs: u64,

    /// Source identifier of this application; its notifications are never forwarded
    #[arg(long, default_value = DEFAULT_SELF_PACKAGE)]
    pub self_package: String,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            pacing_ms: DEFAULT_PACING_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            restart_delay_secs: DEFAULT_RESTART_DELAY_SECS,
            self_package: DEFAULT_SELF_PACKAGE.to_string(),
        }
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConnectionCommand {
    /// Add a Bark connection
    Add {
        /// Unique connection name
        #[arg(long)]
        name: String,
        /// Push endpoint URL
        #[arg(long)]
        address: String,
        /// Encrypt payloads with this cipher mode
        #[arg(long, value_parser = parse_cipher_mode, requires = "key")]
        cipher_mode: Option<CipherMode>,
        /// Encryption key (16 or 32 letters/digits)
        #[arg(long, requires = "cipher_mode")]
        key: Option<String>,
        /// Initialisation vector for CBC modes
        #[arg(long, requires = "cipher_mode")]
        iv: Option<String>,
        /// Request timeout in seconds
        #[arg(long, default_value_t = crate::models::DEFAULT_TIMEOUT_SECS)]
        timeout_secs: u64,
        /// Store the connection disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List stored connections
    List,
    /// Delete a connection
    Remove { name: String },
    /// Enable a connection
    Enable { name: String },
    /// Disable a connection
    Disable { name: String },
    /// Update a single connection field
    Set {
        name: String,
        /// enabled, address, type, timeoutSecs, cipherMode, key or iv
        field: String,
        value: String,
    },
    /// Send a test notification through one connection
    Test { name: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum FilterCommand {
    /// Print the current filter
    Show,
    /// Switch between allow-list and deny-list semantics
    Mode { mode: FilterModeArg },
    /// Add packages to the list
    Add {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Remove packages from the list
    Remove {
        #[arg(required = true)]
        packages: Vec<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterModeArg {
    /// Forward only listed packages
    Allow,
    /// Forward everything except listed packages
    Deny,
}

// ── Settings impl ──────────────────────────────────────────────────────────────

impl Settings {
    /// Parse process arguments and resolve derived values.
    pub fn load() -> Self {
        Self::resolve(Settings::parse())
    }

    /// Same as [`Settings::load`] but accepts an explicit argument list.
    pub fn try_load_from<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        Settings::try_parse_from(args).map(Self::resolve)
    }

    /// Apply the `--debug` flag.
    fn resolve(mut settings: Settings) -> Settings {
        if settings.debug {
            settings.log_level = "DEBUG".to_string();
        }
        settings
    }

    /// Config directory: the explicit flag, else `~/.notifisync`.
    pub fn resolved_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(DEFAULT_DIR_NAME)
        })
    }
}

fn parse_cipher_mode(raw: &str) -> Result<CipherMode, String> {
    raw.parse::<CipherMode>().map_err(|e| e.to_string())
}

fn parse_capacity(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("queue capacity must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
