//! Gateway binary entry point.
//!
//! ```bash
//! # Default configuration file (config.toml)
//! modelmux-gateway
//!
//! # Explicit configuration, host and port
//! modelmux-gateway --config gateway.toml --host 0.0.0.0 --port 8080
//! ```

use clap::Parser;
use modelmux_gateway::{config::Config, server::create_server};
use std::net::SocketAddr;

/// Command line arguments for the gateway server.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured host address
    #[arg(long)]
    host: Option<String>,

    /// Logging filter, e.g. "info" or "modelmux_gateway=debug"
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    tracing_subscriber::fmt()
        .with_env_filter(config.logging.level.clone())
        .init();

    let addr = SocketAddr::new(config.server.host.parse()?, config.server.port);
    let app = create_server(config).await?;

    tracing::info!("starting modelmux gateway on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
