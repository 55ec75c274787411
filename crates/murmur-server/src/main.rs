//! # murmur
//!
//! Realtime private messaging server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! murmur
//!
//! # Run with custom config
//! murmur --config /path/to/murmur.toml
//!
//! # Run with environment variables
//! MURMUR_PORT=3001 MURMUR_HOST=0.0.0.0 murmur
//! ```

use anyhow::Result;
use clap::Parser;
use murmur_server::{handlers, metrics, Config};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Realtime private messaging server
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
struct Args {
    /// Path to a TOML config file; overrides the default lookup
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,murmur_server=debug,murmur_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = match args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    tracing::info!("Starting murmur on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_config_forms() {
        let args = Args::try_parse_from(["murmur"]).unwrap();
        assert!(args.config.is_none());

        let args = Args::try_parse_from(["murmur", "--config=murmur.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("murmur.toml")));

        let args = Args::try_parse_from(["murmur", "-c", "/etc/murmur/murmur.toml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/murmur/murmur.toml")));

        assert!(Args::try_parse_from(["murmur", "--bogus"]).is_err());
    }

    #[test]
    fn test_args_help_requested() {
        let err = Args::try_parse_from(["murmur", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }
}
