//! facegate-core: identity store and face embedding pipeline.
//!
//! SCRFD finds faces, ArcFace turns each one into an embedding, and the
//! [`store::IdentityStore`] keeps the enrolled gallery that live frames are
//! matched against.

pub mod detector;
pub mod event;
pub mod provider;
pub mod recognizer;
pub mod snapshot;
pub mod store;
pub mod types;

use std::path::PathBuf;

pub use event::{GateStatus, GatingEvent};
pub use provider::{EmbeddingProvider, OnnxProvider, ProviderError};
pub use store::{BatchOutcome, EnrollOutcome, IdentityStore, StoreConfig, StoreError};
pub use types::{BoundingBox, Embedding, EuclideanMatcher, Gallery, MatchResult, Matcher};

/// System-wide model location used when `FACEGATE_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegate/models")
}
