//! voxshift SFU server

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use voxshift::{bind_server, ServerConfig};

/// voxshift - selective forwarding unit for pitch-shifted voice rooms
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "VOXSHIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Signaling listen address, overrides the configuration file
    #[arg(short, long, env = "VOXSHIFT_LISTEN")]
    listen: Option<SocketAddr>,

    /// Public IP advertised in transport candidates
    #[arg(long, env = "VOXSHIFT_ANNOUNCED_IP")]
    announced_ip: Option<String>,
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(ip) = &cli.announced_ip {
        config.set_announced_ip(ip);
    }

    for server in &config.ice_servers {
        info!("ICE server: {}", server.urls.join(", "));
    }

    let server = bind_server(&config)
        .await
        .context("starting the SFU")?;
    info!("voxshift listening on ws://{}", server.local_addr());

    server.run().await?;
    Ok(())
}
