use facegate_core::{BatchOutcome, EmbeddingProvider, EnrollOutcome, IdentityStore, StoreError};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the enrollment thread.
enum EngineRequest {
    Enroll {
        name: String,
        image: RgbImage,
        reply: oneshot::Sender<Result<EnrollOutcome, StoreError>>,
    },
    EnrollBatch {
        directory: PathBuf,
        reply: oneshot::Sender<Result<BatchOutcome, StoreError>>,
    },
}

/// Clone-safe handle to the enrollment thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Enroll the single face in `image` under `name`.
    pub async fn enroll(&self, name: String, image: RgbImage) -> Result<EnrollOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll { name, image, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Enroll every eligible image in `directory`.
    pub async fn enroll_batch(&self, directory: PathBuf) -> Result<BatchOutcome, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::EnrollBatch { directory, reply })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }
}

/// Spawn the enrollment engine on a dedicated OS thread.
///
/// The thread owns its own provider so enrollment inference never competes
/// with the gating pipeline for a session lock.
pub fn spawn_engine<P>(store: Arc<IdentityStore>, mut provider: P) -> std::io::Result<EngineHandle>
where
    P: EmbeddingProvider + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("facegate-enroll".into())
        .spawn(move || {
            tracing::info!("enrollment engine started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { name, image, reply } => {
                        let _ = reply.send(store.enroll(&mut provider, &name, &image));
                    }
                    EngineRequest::EnrollBatch { directory, reply } => {
                        let _ = reply.send(store.enroll_batch(&mut provider, &directory));
                    }
                }
            }
            tracing::info!("enrollment engine exiting");
        })?;

    Ok(EngineHandle { tx })
}
