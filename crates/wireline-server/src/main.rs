//! Wireline relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port on all interfaces
//! wireline-server
//!
//! # Custom bind address and verbose logging
//! wireline-server --bind 127.0.0.1:5050 --log-level debug
//! ```

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use wireline_server::{Server, ServerRuntimeConfig};

/// Wireline relay server
#[derive(Parser, Debug)]
#[command(name = "wireline-server")]
#[command(about = "Store-less message relay with paired chat sessions")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4040")]
    bind: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("wireline relay starting");
    tracing::info!("binding to {}", args.bind);

    let config = ServerRuntimeConfig { bind_address: args.bind };
    let server = Server::bind(config).await?;

    tracing::info!("listening on {}", server.local_addr()?);

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
