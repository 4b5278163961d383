mod bootstrap;
mod capture;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use sync_core::models::{Connection, ConnectionField, Encryption, FieldValue};
use sync_core::settings::{
    Command, ConnectionCommand, FilterCommand, FilterModeArg, RunArgs, Settings,
};
use sync_runtime::dispatcher::Dispatcher;
use sync_runtime::pipeline::{CapturePipeline, PipelineConfig, StartOutcome};
use sync_runtime::supervisor::LifecycleSupervisor;
use sync_store::config_store::ConfigStore;
use sync_store::restart_queue::RestartQueue;
use sync_store::run_state::RunState;

/// Upper bound on how long `run` waits for queued notifications at end of input.
const DRAIN_LIMIT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load();
    let config_dir = settings.resolved_config_dir();

    bootstrap::ensure_directories(&config_dir)?;
    bootstrap::setup_logging(&settings.log_level, settings.log_file.as_deref())?;

    tracing::debug!(
        version = env!("CARGO_PKG_VERSION"),
        config_dir = %config_dir.display(),
        "notifisync starting"
    );

    let store = Arc::new(ConfigStore::new(
        config_dir.clone(),
        settings.fallback_dir.clone(),
    ));

    match &settings.command {
        Command::Run(args) => run(&config_dir, store, args).await,
        Command::Connection(cmd) => connection(store, cmd).await,
        Command::Filter(cmd) => filter(&store, cmd),
        Command::Status => status(&config_dir, &store),
    }
}

// ── run ────────────────────────────────────────────────────────────────────────

async fn run(config_dir: &Path, store: Arc<ConfigStore>, args: &RunArgs) -> Result<()> {
    let run_state = Arc::new(RunState::load(config_dir));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&store),
        args.self_package.clone(),
    )?);
    let pipeline = Arc::new(CapturePipeline::new(
        PipelineConfig {
            queue_capacity: args.queue_capacity,
            pacing: Duration::from_millis(args.pacing_ms),
        },
        Arc::clone(&store),
        dispatcher,
        Arc::clone(&run_state),
    ));
    let supervisor = LifecycleSupervisor::new(
        pipeline,
        run_state,
        store,
        RestartQueue::new(config_dir),
        Duration::from_secs(args.restart_delay_secs),
    );

    let outcome = supervisor.resume_and_start();
    if let Some(notice) = outcome.notice() {
        eprintln!("{notice}");
    }
    if outcome == StartOutcome::NoConnections {
        return Ok(());
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let interrupted = tokio::select! {
        result = capture::drive(&supervisor, stdin) => {
            result?;
            capture::wait_for_drain(&supervisor, DRAIN_LIMIT).await;
            false
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl+C received; shutting down");
            true
        }
    };

    supervisor.stop().await;
    if interrupted {
        // The blocking stdin reader would otherwise hold up runtime shutdown.
        std::process::exit(0);
    }
    Ok(())
}

// ── connection ─────────────────────────────────────────────────────────────────

async fn connection(store: Arc<ConfigStore>, cmd: &ConnectionCommand) -> Result<()> {
    match cmd {
        ConnectionCommand::Add {
            name,
            address,
            cipher_mode,
            key,
            iv,
            timeout_secs,
            disabled,
        } => {
            let mut conn = Connection::bark(name, address);
            conn.enabled = !disabled;
            conn.timeout_secs = *timeout_secs;
            if let (Some(mode), Some(key)) = (cipher_mode, key) {
                conn = conn.with_encryption(Encryption {
                    cipher_mode: *mode,
                    key: key.clone(),
                    iv: iv.clone(),
                });
            }
            store.add_connection(conn)?;
            println!("Added connection '{name}'");
        }
        ConnectionCommand::List => {
            let connections = store.try_load_connections()?;
            if connections.is_empty() {
                println!("No connections configured");
            }
            for (name, conn) in &connections {
                let cipher = conn
                    .encryption
                    .as_ref()
                    .map_or("plaintext", |e| e.cipher_mode.as_str());
                let state = if conn.enabled { "enabled" } else { "disabled" };
                let kind = conn.connection_type.to_string();
                println!(
                    "{name:<16} {kind:<5} {state:<8} {cipher:<11} {}",
                    conn.address
                );
            }
        }
        ConnectionCommand::Remove { name } => {
            if !store.delete_connection(name)? {
                bail!("no connection named '{name}'");
            }
            println!("Removed connection '{name}'");
        }
        ConnectionCommand::Enable { name } => {
            set_field(&store, name, "enabled", FieldValue::Bool(true))?
        }
        ConnectionCommand::Disable { name } => {
            set_field(&store, name, "enabled", FieldValue::Bool(false))?
        }
        ConnectionCommand::Set { name, field, value } => {
            let parsed: ConnectionField = field.parse()?;
            let value = parsed.parse_value(value)?;
            set_field(&store, name, field, value)?;
        }
        ConnectionCommand::Test { name } => {
            let dispatcher = Dispatcher::new(store, sync_core::settings::DEFAULT_SELF_PACKAGE)?;
            let status = dispatcher.send_test(name).await?;
            println!("Test message sent through '{name}': HTTP {status}");
        }
    }
    Ok(())
}

fn set_field(store: &ConfigStore, name: &str, field: &str, value: FieldValue) -> Result<()> {
    if !store.update_connection_field(name, field, value)? {
        bail!("no connection named '{name}'");
    }
    println!("Updated '{field}' on '{name}'");
    Ok(())
}

// ── filter ─────────────────────────────────────────────────────────────────────

fn filter(store: &ConfigStore, cmd: &FilterCommand) -> Result<()> {
    let updated = match cmd {
        FilterCommand::Show => store.load_filter_list(),
        FilterCommand::Mode { mode } => store.update_filter_list(|f| {
            f.deny_list = *mode == FilterModeArg::Deny;
        })?,
        FilterCommand::Add { packages } => store.update_filter_list(|f| {
            f.packages.extend(packages.iter().cloned());
        })?,
        FilterCommand::Remove { packages } => store.update_filter_list(|f| {
            for pkg in packages {
                f.packages.remove(pkg);
            }
        })?,
    };

    println!("Mode: {}-list", updated.mode_name());
    if updated.packages.is_empty() {
        println!("Packages: (none)");
    } else {
        println!("Packages:");
        for pkg in &updated.packages {
            println!("  {pkg}");
        }
    }
    Ok(())
}

// ── status ─────────────────────────────────────────────────────────────────────

fn status(config_dir: &Path, store: &ConfigStore) -> Result<()> {
    let run_state = RunState::load(config_dir);
    let connections = store.load_connections();
    let enabled = connections.values().filter(|c| c.enabled).count();
    let filter = store.load_filter_list();

    println!("Config directory: {}", config_dir.display());
    println!(
        "Service:          {}",
        if run_state.is_running() { "running" } else { "stopped" }
    );
    match RestartQueue::new(config_dir).pending() {
        Some(ticket) => println!(
            "Pending restart:  due {} ({})",
            ticket.due_at.to_rfc3339(),
            ticket.reason
        ),
        None => println!("Pending restart:  none"),
    }
    println!(
        "Connections:      {} ({enabled} enabled)",
        connections.len()
    );
    println!(
        "Filter:           {}-list, {} package(s)",
        filter.mode_name(),
        filter.packages.len()
    );
    Ok(())
}
