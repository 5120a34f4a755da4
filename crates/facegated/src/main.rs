use anyhow::{Context, Result};
use facegate_core::{IdentityStore, OnnxProvider, StoreConfig};
use facegate_hw::{StreamConfig, VideoSource};
use facegate_relay::{EventRelay, RelayConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod notify;
mod pipeline;
mod watcher;

use config::Config;
use pipeline::{Gate, GateConfig, Outputs};

const BUS_NAME: &str = "org.facegate.Gate1";
const OBJECT_PATH: &str = "/org/facegate/Gate1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("facegated starting");

    let config = Config::load()?;

    let store = Arc::new(
        IdentityStore::open(StoreConfig {
            db_path: config.db_path.clone(),
            faces_dir: Some(config.faces_dir.clone()),
            match_threshold: config.match_threshold,
            replace_threshold: config.replace_threshold,
        })
        .context("failed to open identity store")?,
    );

    let enroll_provider = OnnxProvider::load(&config.model_dir).context("failed to load enrollment models")?;
    let gate_provider = OnnxProvider::load(&config.model_dir).context("failed to load gating models")?;
    let engine = engine::spawn_engine(Arc::clone(&store), enroll_provider)?;

    let relay = config.relay_url.as_ref().map(|url| {
        Arc::new(EventRelay::spawn(RelayConfig {
            backoff: Duration::from_secs(config.relay_backoff_secs),
            ping_interval: Duration::from_secs(config.relay_ping_secs.max(1)),
            ..RelayConfig::new(url.clone())
        }))
    });

    let webhook = config
        .webhook_url
        .as_ref()
        .map(notify::Webhook::new)
        .transpose()
        .context("failed to build webhook client")?;

    let _watcher = watcher::spawn_reload_watcher(Arc::clone(&store), config.reload_interval());

    let source = VideoSource::parse(&config.video_source);
    let frames = source
        .open(&StreamConfig {
            width: config.stream_width,
            height: config.stream_height,
            drain_frames: config.drain_frames,
            ..StreamConfig::default()
        })
        .with_context(|| format!("failed to open video source {source}"))?;

    let gate = Gate::new(
        Arc::clone(&store),
        GateConfig {
            accept_threshold: config.accept_threshold,
            cooldown: config.cooldown(),
            attach_frames: config.attach_frames,
            jpeg_quality: config.jpeg_quality,
        },
    );
    let outputs = Outputs {
        runtime: tokio::runtime::Handle::current(),
        relay: relay.clone(),
        webhook,
    };
    let _pipeline = pipeline::spawn_pipeline(frames, gate_provider, gate, config.target_fps, outputs)?;

    let service = dbus_interface::GateService {
        store,
        engine,
        relay,
        video_source: config.video_source.clone(),
    };
    let builder = if config.system_bus {
        zbus::connection::Builder::system()?
    } else {
        zbus::connection::Builder::session()?
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(bus = BUS_NAME, system_bus = config.system_bus, "facegated ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facegated shutting down");

    Ok(())
}
