//! finstream terminal client.
//!
//! Streams one chart or chat feed and logs every update.

use anyhow::Result;
use clap::Parser;
use finstream_cli::config::{CONFIG_ENV, DEFAULT_CONFIG_PATH};
use finstream_cli::{AppConfig, Application};
use finstream_core::StreamKind;
use finstream_telemetry::{init_logging, Metrics};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "finstream")]
#[command(about = "Stream live chart and chat feeds from a finstream server", long_about = None)]
struct Args {
    /// Configuration file path (can also be set via FINSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Stream to open (line, pie, bar, chat); overrides the config file
    #[arg(short, long)]
    kind: Option<StreamKind>,

    /// Push interval in milliseconds; overrides the config file
    #[arg(short, long)]
    interval: Option<u64>,

    /// Print Prometheus metrics on exit
    #[arg(long)]
    print_metrics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    finstream_ws::init_crypto();

    let args = Args::parse();

    init_logging()?;

    info!("finstream v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > env var > default path
    let config_path = args
        .config
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let mut config = AppConfig::load(&config_path)?;

    if let Some(kind) = args.kind {
        config.stream.kind = kind;
    }
    if let Some(interval) = args.interval {
        config.stream.push_interval_ms = interval;
    }

    info!(
        config_path = %config_path,
        kind = %config.stream.kind,
        push_interval_ms = config.stream.push_interval_ms,
        "Configuration loaded"
    );

    let mut app = Application::new(config)?;
    app.run().await?;

    if args.print_metrics {
        println!("{}", Metrics::gather()?);
    }

    Ok(())
}
