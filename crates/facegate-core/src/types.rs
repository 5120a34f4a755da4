use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer `[x1, y1, x2, y2]` corners, the form carried by gating events.
    pub fn corners(&self) -> [i32; 4] {
        [
            self.x.round() as i32,
            self.y.round() as i32,
            (self.x + self.width).round() as i32,
            (self.y + self.height).round() as i32,
        ]
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = ((self.x + self.width).min(other.x + other.width) - self.x.max(other.x)).max(0.0);
        let inter_h =
            ((self.y + self.height).min(other.y + other.height) - self.y.max(other.y)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

/// Face embedding vector. Every vector held by one store shares a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Enrolled identities keyed by name. Ordered so scans and ties are deterministic.
pub type Gallery = BTreeMap<String, Embedding>;

/// Nearest enrolled identity for a probe embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub name: String,
    pub distance: f32,
    /// Distance is strictly below the match threshold.
    pub matched: bool,
}

/// Strategy for comparing a probe embedding against a gallery of enrolled faces.
pub trait Matcher {
    /// Best candidate regardless of threshold; `None` only for an empty gallery.
    fn nearest(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> Option<MatchResult>;
}

/// Linear-scan Euclidean matcher. The first name in gallery order wins ties.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn nearest(&self, probe: &Embedding, gallery: &Gallery, threshold: f32) -> Option<MatchResult> {
        let mut best: Option<(&String, f32)> = None;

        for (name, embedding) in gallery {
            let distance = probe.euclidean_distance(embedding);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((name, distance));
            }
        }

        best.map(|(name, distance)| MatchResult {
            name: name.clone(),
            distance,
            matched: distance < threshold,
        })
    }
}
