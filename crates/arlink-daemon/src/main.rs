//! arlink daemon
//!
//! Hosts one AR session and exposes its request surface over HTTP, with
//! session events pushed to WebSocket clients.

mod api;
mod config;
mod server;
mod state;
mod ws;

use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "arlink", about = "AR scene bridge daemon", version)]
struct Args {
    /// Configuration file (defaults are used when it is missing)
    #[arg(short, long, default_value = "arlink.toml")]
    config: PathBuf,

    /// Override the HTTP bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Log filter when RUST_LOG is unset (e.g. "debug" or "arlink_session=trace")
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Leave the session idle until a client calls /api/session/init
    #[arg(long)]
    no_autostart: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "arlink starting");

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    info!(
        path = %args.config.display(),
        assets = %config.assets.root,
        correction = ?config.engine.coordinate_correction,
        "Configuration ready"
    );

    let daemon = config.daemon.clone();
    let state = state::AppState::new(config).await?;
    if !args.no_autostart {
        state.start_session().await;
    }

    server::serve(state, &daemon).await
}
