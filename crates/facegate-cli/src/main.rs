use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::Value;
use std::path::PathBuf;
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate enrollment and monitoring CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true, env = "FACEGATE_SYSTEM_BUS")]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the single face in an image
    Enroll {
        /// Identity name
        #[arg(short, long)]
        name: String,
        /// JPEG or PNG containing exactly one face
        image: PathBuf,
    },
    /// Enroll every image in a directory, file stem as the name
    EnrollBatch { directory: PathBuf },
    /// Remove an identity
    Revoke { name: String },
    /// List enrolled identities
    List,
    /// Show daemon status
    Status,
    /// Subscribe to a broadcast relay and print events
    Watch {
        /// e.g. ws://localhost:3001/ws/face-stream
        url: String,
        /// Keep the base64 frame in printed events
        #[arg(long)]
        frames: bool,
    },
}

#[zbus::proxy(
    interface = "org.facegate.Gate1",
    default_service = "org.facegate.Gate1",
    default_path = "/org/facegate/Gate1"
)]
trait Gate {
    async fn enroll(&self, name: &str, image: Vec<u8>) -> zbus::Result<String>;
    async fn enroll_batch(&self, directory: &str) -> zbus::Result<String>;
    async fn revoke(&self, name: &str) -> zbus::Result<String>;
    async fn list_identities(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let reply = match cli.command {
        Commands::Watch { url, frames } => return watch(&url, frames).await,
        Commands::Enroll { name, image } => {
            let bytes = std::fs::read(&image).with_context(|| format!("cannot read {}", image.display()))?;
            gate(cli.system).await?.enroll(&name, bytes).await?
        }
        Commands::EnrollBatch { directory } => {
            // The daemon resolves the path in its own working directory.
            let directory = directory
                .canonicalize()
                .with_context(|| format!("cannot resolve {}", directory.display()))?;
            gate(cli.system).await?.enroll_batch(&directory.to_string_lossy()).await?
        }
        Commands::Revoke { name } => gate(cli.system).await?.revoke(&name).await?,
        Commands::List => gate(cli.system).await?.list_identities().await?,
        Commands::Status => gate(cli.system).await?.status().await?,
    };

    report(&reply)
}

async fn gate(system: bool) -> Result<GateProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("cannot connect to D-Bus")?;
    GateProxy::new(&conn).await.context("facegated is not running")
}

/// Print a daemon reply; an unsuccessful reply becomes the process error.
fn report(reply: &str) -> Result<()> {
    let value: Value = serde_json::from_str(reply).context("malformed reply from facegated")?;
    if value["success"] == Value::Bool(false) {
        bail!("{}", value["message"].as_str().unwrap_or("request failed"));
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn watch(url: &str, frames: bool) -> Result<()> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .with_context(|| format!("cannot connect to {url}"))?;
    tracing::info!(url, "subscribed");
    let (_sink, mut incoming) = ws.split();

    while let Some(message) = incoming.next().await {
        match message? {
            Message::Text(text) => println!("{}", render_event(&text, frames)),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

/// One line per event; non-JSON payloads are printed as received.
fn render_event(text: &str, frames: bool) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(mut value) => {
            if !frames {
                if let Some(object) = value.as_object_mut() {
                    if object.get("frame").is_some_and(|f| !f.is_null()) {
                        object.insert("frame".into(), Value::String("<jpeg>".into()));
                    }
                }
            }
            value.to_string()
        }
        Err(_) => text.to_string(),
    }
}
