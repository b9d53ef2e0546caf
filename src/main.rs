use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use traffic_relay::config::{ConfigFile, RelayOptions};
use traffic_relay::service::Service;
use traffic_relay::traffic::{default_factories, load_plugins};

#[derive(Parser)]
#[command(name = "traffic-relay")]
#[command(about = "A configurable HTTP(S) relay with a pluggable traffic-interception pipeline")]
struct Args {
    #[arg(short, long, default_value = "relay.yaml")]
    config: String,

    #[arg(long, default_value = "localhost")]
    host: String,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("traffic_relay={}", level))
        .init();

    info!("Starting traffic relay");

    let config = ConfigFile::from_path(&args.config).await?;
    let options = RelayOptions::read(&config)?;
    let plugins = load_plugins(&default_factories(), &config)?;

    let mut service = Service::new(options, plugins);
    service.start(&args.host).await?;

    info!(
        http = %service.http_url().unwrap_or_default(),
        ws = %service.ws_url().unwrap_or_default(),
        plugins = ?service.plugin_names(),
        "relay ready"
    );

    signal::ctrl_c().await?;
    warn!("Received CTRL+C, shutting down gracefully...");
    service.close().await;

    info!("Relay shutdown complete");
    Ok(())
}
