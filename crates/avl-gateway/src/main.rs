//! AVL gateway: entry point.
//!
//! Accepts TCP connections from Teltonika-family GPS trackers speaking
//! Codec 8, acknowledges every identity and telemetry frame, and appends the
//! decoded position records to the configured store.
//!
//! # Usage
//!
//! ```text
//! avl-gateway [OPTIONS]
//!
//! Options:
//!   --config <PATH>  TOML configuration file [default: avl-gateway.toml]
//!   --bind   <IP>    Override server.bind_address
//!   --port   <PORT>  Override server.port
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable     | Overrides                    |
//! |--------------|------------------------------|
//! | `AVL_CONFIG` | `--config`                   |
//! | `AVL_BIND`   | `--bind`                     |
//! | `AVL_PORT`   | `--port`                     |
//! | `RUST_LOG`   | `log_level` from the file    |
//!
//! CLI args take precedence over environment variables, which take
//! precedence over the configuration file.

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use avl_gateway::infrastructure::network::run_server;
use avl_gateway::infrastructure::storage::config::{load_config, GatewayConfig};
use avl_gateway::infrastructure::storage::open_store;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// TCP gateway for Codec 8 GPS trackers.
#[derive(Debug, Parser)]
#[command(
    name = "avl-gateway",
    about = "TCP gateway for Teltonika Codec 8 GPS trackers",
    version
)]
struct Cli {
    /// Path of the TOML configuration file.
    ///
    /// A missing file is not an error; built-in defaults apply.
    #[arg(long, default_value = "avl-gateway.toml", env = "AVL_CONFIG")]
    config: PathBuf,

    /// IP address to bind the device listener to.
    #[arg(long, env = "AVL_BIND")]
    bind: Option<String>,

    /// TCP port for the device listener.
    #[arg(long, env = "AVL_PORT")]
    port: Option<u16>,
}

impl Cli {
    /// Loads the configuration file and applies the command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting bind address is not a valid IP address.
    fn into_gateway_config(self) -> anyhow::Result<GatewayConfig> {
        let mut config = load_config(&self.config).with_context(|| {
            format!("failed to load configuration from {}", self.config.display())
        })?;

        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }

        config
            .server
            .bind_addr()
            .context("invalid listener address")?;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_gateway_config()?;

    // RUST_LOG wins; otherwise the level from the configuration file.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let bind_addr = config.server.bind_addr()?;
    info!(
        "AVL gateway starting: listen={bind_addr}, storage={:?} at {}, namespace={:?}",
        config.storage.backend,
        config.storage.directory.display(),
        config.storage.namespace
    );

    let store = open_store(&config.storage);

    // ── Graceful shutdown flag ─────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C; stopping accept loop");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!("failed to listen for Ctrl+C signal: {e}");
            }
        }
    });

    run_server(bind_addr, config.session_settings(), store, running).await?;

    info!("AVL gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
