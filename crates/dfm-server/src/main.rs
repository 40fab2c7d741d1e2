//! dfm-server binary entry point

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{filter::Targets, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use dfm_core::audit::AUDIT_TARGET;
use dfm_server::{DfmServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "dfm-server")]
#[command(about = "Drone Fleet Medication service")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load_with(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing; RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;

    let audit_file = match &config.audit_log_path {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
            let dir = dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            let file_name = path.file_name().context("audit_log_path must name a file")?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            Some(tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, file_name)))
        }
        None => None,
    };

    // Keep the guard alive so buffered audit lines are flushed on exit
    let (audit_layer, _audit_guard) = match audit_file {
        Some((writer, guard)) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(Targets::new().with_target(AUDIT_TARGET, tracing::Level::INFO));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(env_filter))
        .with(audit_layer)
        .init();

    // Create and run server
    let server = DfmServer::new(config)?;
    server.run().await?;

    Ok(())
}
