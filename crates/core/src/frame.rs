//! Normalized inbound payloads.
//!
//! The realtime decoder turns every observed wire variant into these
//! types before the state machine sees them.

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Size};
use crate::types::{FoodLevel, FrameName, Timestamp};

/// A renderable camera image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameImage {
    pub mime_type: String,
    /// Standard base64 of the encoded image bytes.
    pub base64: String,
    /// Natural pixel size, when it could be determined.
    pub natural_size: Option<Size>,
}

impl FrameImage {
    /// `data:<mime>;base64,<payload>` form suitable for an `<img>` source.
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

/// One streamed camera frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub name: FrameName,
    pub image: FrameImage,
    pub received_at: Timestamp,
}

/// Which backend key scheme a detection event used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSchema {
    /// `detection_results` at the top of the payload.
    Current,
    /// Misspelled `deetction_results` and/or nested one level down.
    Legacy,
}

/// One model-proposed box before a color is attached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub bbox: BoundingBox,
    pub confidence: Option<f64>,
}

/// A decoded detection-result event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionBatch {
    pub frame_name: Option<FrameName>,
    pub food_level: Option<FoodLevel>,
    pub missing_dishes: u32,
    pub boxes: Vec<DetectionBox>,
    pub schema: DetectionSchema,
}
