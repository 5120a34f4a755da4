//! Gating loop: one dedicated OS thread per video source.
//!
//! Each paced iteration reads the newest frame, detects faces, matches each
//! one against the identity store and emits exactly one [`GatingEvent`]
//! describing the last face. Flagged identities additionally raise an
//! outward notification, rate-limited per identity by [`Cooldown`].

use crate::notify::Webhook;
use chrono::{DateTime, Utc};
use facegate_core::{EmbeddingProvider, GateStatus, GatingEvent, IdentityStore, ProviderError};
use facegate_hw::frame::{draw_box, encode_jpeg_base64, PASS_COLOR, REJECT_COLOR};
use facegate_hw::{FrameSource, Pacer};
use facegate_relay::EventRelay;
use image::RgbImage;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;

const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Per-identity notification debounce.
pub struct Cooldown {
    interval: chrono::Duration,
    last: HashMap<String, DateTime<Utc>>,
}

impl Cooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX),
            last: HashMap::new(),
        }
    }

    /// True (and the clock restarts) when `name` was last notified at least one interval ago.
    ///
    /// Expired entries are dropped first, so only names notified within the
    /// last interval are retained.
    pub fn should_notify(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let interval = self.interval;
        self.last.retain(|_, last| now.signed_duration_since(*last) < interval);
        if self.last.contains_key(name) {
            return false;
        }
        self.last.insert(name.to_string(), now);
        true
    }
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Distance at or below which a face is attributed to its nearest identity.
    pub accept_threshold: f32,
    pub cooldown: Duration,
    pub attach_frames: bool,
    pub jpeg_quality: u8,
}

/// What one processed frame produced.
#[derive(Debug)]
pub struct Evaluation {
    pub event: GatingEvent,
    /// One entry per flagged face that cleared its cooldown; frames stripped.
    pub notifications: Vec<GatingEvent>,
}

pub struct Gate {
    store: Arc<IdentityStore>,
    config: GateConfig,
    cooldown: Cooldown,
}

impl Gate {
    pub fn new(store: Arc<IdentityStore>, config: GateConfig) -> Self {
        let cooldown = Cooldown::new(config.cooldown);
        Self { store, config, cooldown }
    }

    /// Classify every face in `image` and build the frame's event.
    pub fn evaluate<P>(&mut self, provider: &mut P, image: &RgbImage, now: DateTime<Utc>) -> Result<Evaluation, ProviderError>
    where
        P: EmbeddingProvider + ?Sized,
    {
        let faces = provider.detect(image)?;
        let mut event = GatingEvent::no_face(now.timestamp());
        let mut notifications = Vec::new();
        let mut annotated = self.config.attach_frames.then(|| image.clone());

        for face in &faces {
            let embedding = match provider.extract(image, face) {
                Ok(embedding) => embedding,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding extraction failed, skipping face");
                    continue;
                }
            };

            let nearest = self.store.match_embedding(&embedding);
            let (status, name, distance) = match nearest {
                Some(m) if m.distance <= self.config.accept_threshold => (GateStatus::Reject, Some(m.name), Some(m.distance)),
                Some(m) => (GateStatus::Pass, None, Some(m.distance)),
                None => (GateStatus::Pass, None, None),
            };

            tracing::info!(target: "gate", %status, name = name.as_deref(), distance, "face classified");

            let corners = face.corners();
            if let Some(canvas) = annotated.as_mut() {
                let color = if status == GateStatus::Reject { REJECT_COLOR } else { PASS_COLOR };
                draw_box(canvas, corners, color);
            }

            event.record_face(status, name, distance, corners);

            if let (GateStatus::Reject, Some(flagged)) = (status, event.name.as_deref()) {
                if self.cooldown.should_notify(flagged, now) {
                    tracing::info!(name = flagged, distance, "new occurrence of flagged identity");
                    notifications.push(event.without_frame());
                }
            }
        }

        if let Some(canvas) = annotated {
            match encode_jpeg_base64(&canvas, self.config.jpeg_quality) {
                Ok(jpeg) => event.frame = Some(jpeg),
                Err(e) => tracing::warn!(error = %e, "failed to encode frame"),
            }
        }

        Ok(Evaluation { event, notifications })
    }
}

/// Where events and notifications go.
pub struct Outputs {
    pub runtime: Handle,
    pub relay: Option<Arc<EventRelay>>,
    pub webhook: Option<Webhook>,
}

impl Outputs {
    fn publish(&self, evaluation: Evaluation) {
        if let Some(relay) = &self.relay {
            self.runtime.block_on(relay.send(&evaluation.event));
        }
        if let Some(webhook) = &self.webhook {
            for notification in evaluation.notifications {
                webhook.dispatch(&self.runtime, notification);
            }
        }
    }
}

/// Run the gating loop on a dedicated OS thread for the life of the process.
pub fn spawn_pipeline<P>(
    mut source: Box<dyn FrameSource>,
    mut provider: P,
    mut gate: Gate,
    target_fps: f32,
    outputs: Outputs,
) -> std::io::Result<JoinHandle<()>>
where
    P: EmbeddingProvider + Send + 'static,
{
    std::thread::Builder::new()
        .name("facegate-pipeline".into())
        .spawn(move || {
            let mut pacer = Pacer::new(target_fps);
            tracing::info!(source = %source.describe(), fps = target_fps, "gating pipeline started");
            loop {
                pacer.wait();
                let frame = match source.read() {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!(error = %e, "frame read failed, retrying");
                        std::thread::sleep(READ_RETRY_DELAY);
                        continue;
                    }
                };

                match gate.evaluate(&mut provider, &frame.image, Utc::now()) {
                    Ok(evaluation) => outputs.publish(evaluation),
                    Err(e) => tracing::warn!(error = %e, sequence = frame.sequence, "frame evaluation failed"),
                }
            }
        })
}
