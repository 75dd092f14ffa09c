//! # Scribe Server
//!
//! Presence server for the Scribe collaborative editor. Tracks who is viewing
//! each document and pushes JOIN / LEAVE events to every viewer.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! scribe
//!
//! # Run with custom config
//! scribe --config /path/to/scribe.toml
//!
//! # Run with environment overrides
//! SCRIBE__PORT=8080 SCRIBE__AUTH__JWT_SECRET=... scribe
//! ```

mod auth;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scribe=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match config_path() {
        Some(path) => config::Config::from_file(path)?,
        None => config::Config::load()?,
    };

    tracing::info!("Starting Scribe server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

/// Path given with `--config`, if any.
fn config_path() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}
