use anyhow::{Context, Result};
use clap::Parser;
use facegate_relay::BroadcastRelay;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facegate-relay", about = "Fan gating events out to every connected subscriber")]
struct Cli {
    /// Address to accept websocket subscribers on
    #[arg(short, long, default_value = "0.0.0.0:3001", env = "FACEGATE_RELAY_LISTEN")]
    listen: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let relay = BroadcastRelay::bind(&cli.listen)
        .await
        .with_context(|| format!("failed to bind {}", cli.listen))?;

    tokio::select! {
        result = relay.run() => result.context("broadcast relay stopped")?,
        _ = tokio::signal::ctrl_c() => tracing::info!("facegate-relay shutting down"),
    }

    Ok(())
}
