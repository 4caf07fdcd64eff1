mod cli;
mod error;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use netweave_config::Config;
use netweave_core::{
    DeviceDiscovery, DeviceRegistry, IdentityDirectory, ManagerConfig, MemoryIdentityDirectory,
    MemoryStore, TopologyManager, TopologyStore,
};

use crate::cli::{Cli, Command, ReplayArgs};
use crate::error::DaemonError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<(), DaemonError> {
    let path = cli
        .global
        .config
        .unwrap_or_else(netweave_config::config_path);
    let config = netweave_config::load_config_from(&path)
        .map_err(|e| DaemonError::from_config(e, &path))?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config).await,
        Command::CheckConfig => {
            let text = config
                .to_toml()
                .map_err(|e| DaemonError::from_config(e, &path))?;
            print!("{text}");
            Ok(())
        }
        Command::Replay(args) => replay(config, &args).await,
    }
}

/// Wire the in-process store, registry, discovery and identity directory
/// into a manager.
async fn build_manager(config: ManagerConfig) -> Result<TopologyManager, DaemonError> {
    let store: Arc<dyn TopologyStore> = Arc::new(MemoryStore::new());
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&store), &config.discovery));
    let discovery = DeviceDiscovery::new(
        config.discovery.clone(),
        config.inference,
        registry,
        Vec::new(),
    );
    let identities: Arc<dyn IdentityDirectory> = Arc::new(MemoryIdentityDirectory::new());

    Ok(TopologyManager::with_identities(config, store, discovery, Some(identities)).await?)
}

async fn run_daemon(config: Config) -> Result<(), DaemonError> {
    let manager = build_manager(config.into_manager_config()).await?;
    manager.start().await?;

    let cfg = manager.config();
    info!(
        tenant = %cfg.tenant,
        site = %cfg.site,
        refresh = ?cfg.topology_update_interval,
        "netweaved running; press Ctrl-C to stop"
    );

    let signal = tokio::signal::ctrl_c().await;
    if let Err(ref e) = signal {
        warn!(error = %e, "failed to listen for shutdown signal");
    }

    info!("shutting down");
    manager.stop().await?;

    let stats = manager.get_stats().await;
    info!(
        devices = stats.total_devices,
        online = stats.online_devices,
        connections = stats.total_connections,
        updates = stats.topology_updates,
        "final topology"
    );

    signal.map_err(DaemonError::from)
}

async fn replay(config: Config, args: &ReplayArgs) -> Result<(), DaemonError> {
    let manager = build_manager(config.into_manager_config()).await?;
    let applied = replay_file(&manager, &args.file).await?;
    manager.refresh().await?;

    let snapshot = manager.get_topology().await;
    info!(
        applied,
        devices = snapshot.devices.len(),
        connections = snapshot.connections.len(),
        "replay complete"
    );

    let json = if args.pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{json}");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct ReplayRecord {
    topic: String,
    payload: serde_json::Value,
}

/// Push every record in a JSON-lines file through ingestion. Records the
/// manager rejects are logged and skipped. Returns how many were applied.
async fn replay_file(manager: &TopologyManager, path: &Path) -> Result<usize, DaemonError> {
    let text = tokio::fs::read_to_string(path).await?;

    let mut applied = 0;
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }

        let record: ReplayRecord = serde_json::from_str(raw)
            .map_err(|source| DaemonError::ReplayRecord { line, source })?;
        let payload = serde_json::to_vec(&record.payload)?;

        match manager.process_message(&record.topic, &payload).await {
            Ok(_) => applied += 1,
            Err(e) => warn!(line, topic = %record.topic, error = %e, "record skipped"),
        }
    }
    Ok(applied)
}
