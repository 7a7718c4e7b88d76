//! Cast agent CLI
//!
//! Binary name: `cast-agent`

use std::path::PathBuf;

use anyhow::{Context, Result};

mod agent;
mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();

    let explicit = matches.get_one::<PathBuf>("config");
    let config = cast_core::load_config(explicit.map(PathBuf::as_path))
        .await
        .context("Failed to load configuration")?;

    init_tracing(&config.log_level);

    cli::dispatch(&matches, &config).await
}

/// `RUST_LOG` wins; otherwise log at the configured level.
fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
