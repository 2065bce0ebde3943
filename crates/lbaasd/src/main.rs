//! lbaasd — the LBaaS daemon.
//!
//! Runs the control plane and one appliance agent in a single process:
//! - State store (redb)
//! - Agent scheduler + service assembler (plugin driver)
//! - REST API
//! - Appliance agent: cluster coordinator, request serializer, periodic tasks
//!
//! The plugin casts to the agent over an in-process transport, and the agent
//! calls back into the plugin directly.
//!
//! # Usage
//!
//! ```text
//! lbaasd standalone --config /etc/lbaas/lbaasd.toml --port 9696
//! lbaasd check-config --config /etc/lbaas/lbaasd.toml
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lbaas_agent::AgentManager;
use lbaas_cluster::{ClusterCoordinator, RestFactory};
use lbaas_plugin::{LocalTransport, PluginDriver};
use lbaas_state::StateStore;

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "lbaasd", about = "LBaaS daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run plugin, API and agent in one process.
    Standalone {
        /// Configuration file with [agent] and [plugin] sections.
        #[arg(long, default_value = "/etc/lbaas/lbaasd.toml")]
        config: PathBuf,

        /// Port for the REST API.
        #[arg(long, default_value = "9696")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/lbaas")]
        data_dir: PathBuf,
    },
    /// Parse and validate a configuration file, then exit.
    CheckConfig {
        #[arg(long, default_value = "/etc/lbaas/lbaasd.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lbaasd=debug,lbaas=debug"));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    match cli.command {
        Command::Standalone {
            config,
            port,
            data_dir,
        } => run_standalone(config, port, data_dir).await,
        Command::CheckConfig { config } => check_config(config),
    }
}

fn check_config(path: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(&path)?;
    info!(
        path = %path.display(),
        host = %config.agent.host,
        ha_type = config.agent.ha_type.as_str(),
        appliances = config.agent.icontrol_hostnames.len(),
        "configuration is valid"
    );
    Ok(())
}

async fn run_standalone(config_path: PathBuf, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(&config_path)?;
    info!(host = %config.agent.host, "lbaas daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let db_path = data_dir.join("lbaas.redb");

    // ── Plugin side ────────────────────────────────────────────

    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let transport = Arc::new(LocalTransport::new());
    let driver = Arc::new(PluginDriver::new(
        state,
        config.plugin.clone(),
        transport.clone(),
    ));
    info!("plugin driver initialized");

    // ── Agent side ─────────────────────────────────────────────

    let factory = RestFactory::from_config(&config.agent);
    let cluster = ClusterCoordinator::connect(config.agent.clone(), &factory).await?;
    info!(
        appliances = config.agent.icontrol_hostnames.len(),
        "cluster coordinator connected"
    );

    let manager = Arc::new(AgentManager::new(Arc::new(cluster), driver.callbacks()));
    let mut requests = transport.register(&config.agent.host);
    if let Err(e) = manager.report_state().await {
        warn!(error = %e, "initial state report failed");
    }

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let mut handles = manager.spawn_periodic(shutdown_rx.clone());

    let pump_manager = manager.clone();
    let mut pump_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => {
                        pump_manager.dispatch(request);
                    }
                    None => break,
                },
                _ = pump_shutdown.changed() => break,
            }
        }
    }));

    // ── Start API server ───────────────────────────────────────

    let router = lbaas_api::build_router(driver, config.plugin.agent_down_secs);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    transport.unregister(&config.agent.host);
    for handle in handles {
        let _ = handle.await;
    }

    info!("lbaas daemon stopped");
    Ok(())
}
