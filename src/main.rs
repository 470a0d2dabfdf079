//! Torii Authgate - Reverse-proxy authentication/authorization gateway
//!
//! Sits behind an auth-subrequest directive and answers 200/401/403 for
//! each forwarded request.

use clap::Parser;
use std::path::PathBuf;
use torii_authgate::{config::Config, server::Server};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Torii Authgate - authentication/authorization gateway
#[derive(Parser, Debug)]
#[command(name = "torii-authgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Torii Authgate v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load(&args.config)?;
    info!("Loaded configuration from {:?}", args.config);

    // Start metrics endpoint
    let mut metrics_server = None;
    if config.metrics.enabled {
        let mut server = torii_authgate::metrics::server::MetricsServer::new(&config.metrics.address);
        let addr = server.start().await?;
        info!("Metrics listening on {}", addr);
        metrics_server = Some(server);
    }

    // Start gateway
    let server = Server::new(config).await?;
    let result = server.run().await;

    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }

    result?;
    Ok(())
}
