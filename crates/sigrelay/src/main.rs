//! # sigrelay
//!
//! Signaling relay binary: loads settings, installs logging and metrics,
//! and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sigrelay_server::RelayServer;
use sigrelay_server::shutdown::DEFAULT_SHUTDOWN_TIMEOUT;
use sigrelay_settings::RelaySettings;

/// Presence and signaling relay for peer-to-peer session setup.
#[derive(Parser, Debug)]
#[command(name = "sigrelay", version, about = "Presence and signaling relay")]
struct Cli {
    /// Settings file (defaults to `~/.sigrelay/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut RelaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    sigrelay_server::logging::init_subscriber(&args.log_level, args.json_logs);

    let path = args
        .config
        .clone()
        .unwrap_or_else(sigrelay_settings::settings_path);
    let mut settings = sigrelay_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply_overrides(&mut settings);
    settings.validate().context("Invalid settings")?;

    let metrics = sigrelay_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;

    let server = RelayServer::new(settings, Some(metrics));
    let handle = server.listen().await.context("Failed to start relay")?;
    tracing::info!(addr = %handle.addr, "sigrelay ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutdown requested");

    server
        .shutdown()
        .graceful_shutdown(handle.into_tasks(), Some(DEFAULT_SHUTDOWN_TIMEOUT))
        .await;
    tracing::info!("sigrelay stopped");
    Ok(())
}
