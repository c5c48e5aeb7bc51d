#![forbid(unsafe_code)]

//! Serves the same-origin relay (`GET /api/proxy`) in front of the upstream
//! content API.

use std::{net::SocketAddr, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use moviebox_tools::{
    config::{DEFAULT_CONFIG_PATH, load_runtime_config_from},
    logging::init_logging,
    relay::{self, RelayState},
};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay browser requests to the MovieBox API.")]
struct Cli {
    #[arg(long = "config", value_name = "PATH", default_value = DEFAULT_CONFIG_PATH, help = "Path to the config file")]
    config: PathBuf,
    #[arg(long = "host", value_name = "ADDR", help = "Override MOVIEBOX_HOST")]
    host: Option<String>,
    #[arg(short = 'p', long = "port", value_name = "PORT", help = "Override MOVIEBOX_PORT")]
    port: Option<u16>,
    #[arg(long = "upstream", value_name = "URL", help = "Override UPSTREAM_BASE")]
    upstream: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging("info", false)?;
    let cli = Cli::parse();

    let mut runtime = load_runtime_config_from(&cli.config)?;
    if let Some(host) = cli.host {
        runtime.moviebox_host = host;
    }
    if let Some(port) = cli.port {
        runtime.moviebox_port = port;
    }
    if let Some(upstream) = cli.upstream {
        runtime.upstream_base = upstream;
    }

    let state = RelayState::new(&runtime.upstream_base);
    let app = relay::router(state);

    let addr = SocketAddr::new(
        runtime
            .moviebox_host
            .parse()
            .with_context(|| format!("parsing host {}", runtime.moviebox_host))?,
        runtime.moviebox_port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!(%addr, upstream = %runtime.upstream_base, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running relay server")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        error!(error = %err, "failed to install Ctrl+C handler");
    }
}
