//! Gating event wire schema.
//!
//! One event is produced per processed frame and serialized as a single JSON
//! text message:
//!
//! ```json
//! {"type":"face_event","name":null,"distance":0.8123,"status":"PASS",
//!  "box":[10,20,110,140],"timestamp":1700000000,"frame":"<base64 jpeg>"}
//! ```

use serde::{Deserialize, Serialize};

/// Classification of a processed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    /// No face in the frame.
    NoFace,
    /// Face present but not close to any enrolled identity; anonymous.
    Pass,
    /// Face matches an enrolled (flagged) identity.
    Reject,
}

impl std::fmt::Display for GateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GateStatus::NoFace => "NO_FACE",
            GateStatus::Pass => "PASS",
            GateStatus::Reject => "REJECT",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    FaceEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub name: Option<String>,
    pub distance: Option<f64>,
    pub status: GateStatus,
    #[serde(rename = "box")]
    pub bbox: Option<[i32; 4]>,
    /// Epoch seconds.
    pub timestamp: i64,
    /// Base64 JPEG of the (annotated) frame.
    pub frame: Option<String>,
}

impl GatingEvent {
    pub fn no_face(timestamp: i64) -> Self {
        Self {
            kind: EventKind::FaceEvent,
            name: None,
            distance: None,
            status: GateStatus::NoFace,
            bbox: None,
            timestamp,
            frame: None,
        }
    }

    /// Overwrite the detection fields with a newer face from the same frame.
    pub fn record_face(
        &mut self,
        status: GateStatus,
        name: Option<String>,
        distance: Option<f32>,
        bbox: [i32; 4],
    ) {
        self.status = status;
        self.name = name;
        self.distance = distance.map(round_distance);
        self.bbox = Some(bbox);
    }

    /// Copy without the frame payload, for consumers that only want the decision.
    pub fn without_frame(&self) -> Self {
        Self { frame: None, ..self.clone() }
    }
}

/// Distances travel with four decimals.
fn round_distance(distance: f32) -> f64 {
    (f64::from(distance) * 10_000.0).round() / 10_000.0
}
