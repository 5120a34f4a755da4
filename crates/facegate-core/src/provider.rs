//! Embedding provider seam.
//!
//! The store and the gating pipeline only see [`EmbeddingProvider`]. The
//! shipped implementation pairs the SCRFD detector with the ArcFace
//! recognizer.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Face detection and embedding extraction.
///
/// Implementations must be deterministic for identical input and return
/// vectors of one fixed dimensionality.
pub trait EmbeddingProvider {
    /// Face regions in `image`, most confident first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError>;

    /// Embedding of the face inside `face`.
    fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError> {
        (**self).detect(image)
    }

    fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, ProviderError> {
        (**self).extract(image, face)
    }
}

/// SCRFD + ArcFace over ONNX Runtime.
pub struct OnnxProvider {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxProvider {
    /// Load both models from `model_dir`. Fails fast when either file is missing.
    pub fn load(model_dir: &Path) -> Result<Self, ProviderError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingProvider for OnnxProvider {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, ProviderError> {
        Ok(self.detector.detect(image)?)
    }

    fn extract(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Embedding, ProviderError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}
