//! CLI command implementations
//!
//! `serve` boot sequence:
//! 1. Load and validate config, set log level
//! 2. Open the database
//! 3. Spawn the sweeper task
//! 4. Bind and serve HTTP, health SERVING
//!
//! Shutdown on Ctrl-C, strictly in this order:
//! 1. Health NOT_SERVING
//! 2. Stop accepting, drain in-flight requests
//! 3. Stop the sweeper, letting a running pass finish
//! 4. Flush and close the engine

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::watch;

use crate::config::TideConfig;
use crate::database::Database;
use crate::http_server::{HttpServer, HttpServerConfig};
use crate::kv::{KvError, KvResult, VersionedStore};
use crate::observability::{log_event, log_event_with_fields, Event, Logger};
use crate::storage::STORAGE_FORMAT_VERSION;
use crate::sweeper::{spawn_sweeper, ExpirySource};

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{write_error, write_response};

/// Parse arguments and run the selected command
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        // Best effort; the caller still prints to stderr and exits non-zero.
        let _ = write_error(e);
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init { config } => init(&config),
        Command::Serve { config, port } => serve(&config, port),
        Command::Sweep { config } => sweep(&config),
        Command::Stats { config } => stats(&config),
    }
}

fn load_config(path: &Path) -> CliResult<TideConfig> {
    let config = TideConfig::load(path)?;
    Logger::set_min_severity(config.log_severity());
    Ok(config)
}

/// A data directory with anything in it counts as initialized.
fn is_initialized(data_dir: &Path) -> bool {
    fs::read_dir(data_dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn open_initialized(config: TideConfig) -> CliResult<Database> {
    if !is_initialized(&config.data_dir) {
        return Err(CliError::not_initialized());
    }
    Ok(Database::open(config)?)
}

/// Create the data directory and stamp the storage format
pub fn init(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    if is_initialized(&config.data_dir) {
        return Err(CliError::already_initialized());
    }

    let data_dir = config.data_dir.display().to_string();
    let db = Database::open(config)?;
    let namespaces = db.store().namespaces();
    db.close()?;

    write_response(json!({
        "data_dir": data_dir,
        "format_version": STORAGE_FORMAT_VERSION,
        "namespaces": namespaces,
    }))
}

/// Serve HTTP and sweep until Ctrl-C
pub fn serve(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    let mut config = load_config(config_path)?;
    if let Some(port) = port {
        config.port = port;
    }
    log_event_with_fields(
        Event::BootStart,
        &[("config", &config_path.display().to_string())],
    );

    let db = open_initialized(config)?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::serve_failed(format!("Failed to create tokio runtime: {}", e)))?;
    let served = runtime.block_on(serve_until_signal(&db));

    // The engine closes even when serving failed.
    let closed = db.close();
    served?;
    closed?;
    log_event(Event::ShutdownComplete);
    Ok(())
}

async fn serve_until_signal(db: &Database) -> CliResult<()> {
    let (stop_sweeper, sweeper_stopped) = watch::channel(false);
    let sweeper = spawn_sweeper(
        Arc::new(db.sweeper()),
        db.config().sweep_interval(),
        sweeper_stopped,
    );

    let server = HttpServer::new(HttpServerConfig::from(db.config()), Arc::clone(db.store()));
    let served = server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                Logger::error("SIGNAL_HANDLER_FAILED", &[("reason", &e.to_string())]);
            }
            log_event(Event::ShutdownStart);
        })
        .await;

    // The sender is kept alive until here so the task only stops on request.
    let _ = stop_sweeper.send(true);
    if let Err(e) = sweeper.await {
        Logger::error("SWEEPER_JOIN_FAILED", &[("reason", &e.to_string())]);
    }

    served.map_err(|e| CliError::serve_failed(format!("HTTP server failed: {}", e)))
}

/// Run one sweeper pass and print its report
pub fn sweep(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let db = open_initialized(config)?;
    let report = db.sweeper().run_once();
    db.close()?;
    write_response(serde_json::to_value(report?)?)
}

/// Print namespaces and record counts
pub fn stats(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let db = open_initialized(config)?;
    let store = db.store();

    let mut namespaces = Vec::new();
    for name in store.namespaces() {
        let counts = store.namespace_stats(&name)?;
        namespaces.push(json!({
            "name": name,
            "live": counts.live,
            "expired_pending": counts.expired_pending,
            "tombstones": counts.tombstones,
            "value_bytes": counts.value_bytes,
        }));
    }
    let (due, corrupt) = count_due(store)?;
    let indexed = store.expiry_index_len()?;
    let output = json!({
        "namespaces": namespaces,
        "expiry_index_entries": indexed,
        "expiry_due": due,
        "expiry_corrupt": corrupt,
        "format_version": STORAGE_FORMAT_VERSION,
    });
    db.close()?;
    write_response(output)
}

/// Due expiry entries, and how many of them could not be decoded.
fn count_due(store: &VersionedStore) -> KvResult<(u64, u64)> {
    let mut due = 0;
    let mut corrupt = 0;
    for entry in store.expired_entries(store.now())? {
        match entry {
            Ok(_) => due += 1,
            Err(KvError::CorruptRecord(_)) => corrupt += 1,
            Err(e) => return Err(e),
        }
    }
    Ok((due, corrupt))
}
