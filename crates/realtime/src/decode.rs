//! Boundary decoder for inbound realtime payloads.
//!
//! Frames arrive in three shapes and detection results under two key
//! schemes. Everything is normalized here into [`Frame`] and
//! [`DetectionBatch`] so nothing past this module looks at raw JSON.
//!
//! | `frame_data` shape                        | [`FrameData`] variant |
//! |-------------------------------------------|-----------------------|
//! | `"data:image/png;base64,iVBOR..."`         | `DataUri`             |
//! | `{"base_64_img": "...", "width": 400, ..}` | `Envelope`            |
//! | `"iVBOR..."`                               | `Bare`                |

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use traycam_core::frame::{DetectionBatch, DetectionBox, DetectionSchema, Frame, FrameImage};
use traycam_core::geometry::{BoundingBox, Size};
use traycam_core::types::FoodLevel;

use crate::messages::{parse_message, RealtimeMessage, SubscriptionData, WelcomeData};

/// Image type assumed for payloads that do not declare one.
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

const CURRENT_DETECTIONS_KEY: &str = "detection_results";
const LEGACY_DETECTIONS_KEY: &str = "deetction_results";

/// Errors raised while normalizing an inbound payload.
///
/// These never reach the operator: the driver logs them and drops the
/// event.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The text frame was not a known `{event, data}` envelope.
    #[error("Envelope error: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// `frame_data` matched none of the known encodings.
    #[error("Unrecognized frame data: {0}")]
    UnrecognizedFrameData(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Invalid detection payload: {0}")]
    InvalidDetections(String),
}

/// A fully decoded inbound event.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Welcome(WelcomeData),
    SubscriptionConfirmed(SubscriptionData),
    Frame(Frame),
    Detections(DetectionBatch),
}

/// Parse and normalize one realtime text frame.
pub fn decode_message(text: &str) -> Result<InboundEvent, DecodeError> {
    match parse_message(text)? {
        RealtimeMessage::Welcome(data) => Ok(InboundEvent::Welcome(data)),
        RealtimeMessage::SubscriptionConfirmed(data) => {
            Ok(InboundEvent::SubscriptionConfirmed(data))
        }
        RealtimeMessage::StreamFrames(payload) => decode_frame(&payload).map(InboundEvent::Frame),
        RealtimeMessage::ModelResults(payload) => {
            decode_detections(&payload).map(InboundEvent::Detections)
        }
    }
}

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Object encoding of `frame_data`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FrameEnvelope {
    #[serde(alias = "base64", alias = "image", alias = "data")]
    pub base_64_img: String,
    #[serde(default)]
    pub img_name: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// The known encodings of `frame_data`.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameData {
    DataUri { mime_type: String, base64: String },
    Envelope(FrameEnvelope),
    Bare(String),
}

impl FrameData {
    /// Classify a raw `frame_data` value.
    pub fn classify(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) => match split_data_uri(s) {
                Some(parts) => {
                    let (mime_type, base64) = parts?;
                    Ok(Self::DataUri { mime_type, base64 })
                }
                None => Ok(Self::Bare(s.trim().to_string())),
            },
            Value::Object(_) => serde_json::from_value::<FrameEnvelope>(value.clone())
                .map(Self::Envelope)
                .map_err(|e| DecodeError::UnrecognizedFrameData(e.to_string())),
            other => Err(DecodeError::UnrecognizedFrameData(format!(
                "expected string or object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Name carried inside the payload itself, if any.
    pub fn image_name(&self) -> Option<&str> {
        match self {
            Self::Envelope(env) => env.img_name.as_deref(),
            _ => None,
        }
    }

    /// Decode into a renderable image, probing its natural size.
    pub fn into_image(self) -> Result<FrameImage, DecodeError> {
        let (mime_type, base64, declared) = match self {
            Self::DataUri { mime_type, base64 } => (mime_type, base64, None),
            Self::Bare(base64) => (DEFAULT_MIME_TYPE.to_string(), base64, None),
            Self::Envelope(env) => {
                let declared = match (env.width, env.height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => Some(Size::new(w as f64, h as f64)),
                    _ => None,
                };
                match split_data_uri(&env.base_64_img) {
                    Some(parts) => {
                        let (mime_type, base64) = parts?;
                        (mime_type, base64, declared)
                    }
                    None => (
                        env.mime_type
                            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
                        env.base_64_img.trim().to_string(),
                        declared,
                    ),
                }
            }
        };

        if base64.is_empty() {
            return Err(DecodeError::InvalidBase64("empty payload".into()));
        }
        let bytes = STANDARD
            .decode(base64.as_bytes())
            .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

        Ok(FrameImage {
            mime_type,
            base64,
            natural_size: probe_size(&bytes).or(declared),
        })
    }
}

/// Decode a `stream_frames` payload.
///
/// Accepts both `{title, data: {frame_name, frame_data}}` and the bare
/// `{frame_name, frame_data}` body.
pub fn decode_frame(payload: &Value) -> Result<Frame, DecodeError> {
    let body = titled_body(payload);
    let raw = body
        .get("frame_data")
        .ok_or(DecodeError::MissingField("frame_data"))?;
    let data = FrameData::classify(raw)?;

    let name = body
        .get("frame_name")
        .and_then(Value::as_str)
        .or_else(|| data.image_name())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .ok_or(DecodeError::MissingField("frame_name"))?;

    Ok(Frame {
        name,
        image: data.into_image()?,
        received_at: chrono::Utc::now(),
    })
}

/// Natural size from the image header, without decoding pixels.
pub fn probe_size(bytes: &[u8]) -> Option<Size> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?;
    let (width, height) = reader.into_dimensions().ok()?;
    Some(Size::new(width as f64, height as f64))
}

/// `Some(Ok((mime, base64)))` for a well-formed data URI, `Some(Err)`
/// for a `data:` string that is not base64, `None` otherwise.
fn split_data_uri(s: &str) -> Option<Result<(String, String), DecodeError>> {
    let rest = s.trim().strip_prefix("data:")?;
    let Some((header, payload)) = rest.split_once(',') else {
        return Some(Err(DecodeError::UnrecognizedFrameData(
            "data URI without payload".into(),
        )));
    };
    let Some(mime_type) = header.strip_suffix(";base64") else {
        return Some(Err(DecodeError::UnrecognizedFrameData(format!(
            "data URI is not base64 encoded: {header}"
        ))));
    };
    let mime_type = if mime_type.is_empty() {
        DEFAULT_MIME_TYPE
    } else {
        mime_type
    };
    Some(Ok((mime_type.to_string(), payload.trim().to_string())))
}

// ---------------------------------------------------------------------------
// Detections
// ---------------------------------------------------------------------------

/// Decode a detection-result payload under either key scheme.
///
/// The current scheme puts `detection_results` directly in the body. The
/// legacy scheme misspells the key as `deetction_results` and/or nests
/// the results one level down under `data` or `results`. Metadata
/// (`frame_name`, `food_level`, `missing_dishes`) is read from the level
/// holding the list first, then from the outer body.
pub fn decode_detections(payload: &Value) -> Result<DetectionBatch, DecodeError> {
    let body = titled_body(payload);
    let (holder, list, schema) = find_detection_list(body).ok_or(
        DecodeError::MissingField("detection_results"),
    )?;

    let entries = list.as_array().ok_or_else(|| {
        DecodeError::InvalidDetections(format!(
            "detection list is {}, expected array",
            json_kind(list)
        ))
    })?;

    let boxes = entries
        .iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            let parsed = parse_box(entry);
            if parsed.is_none() {
                tracing::debug!(index = i, entry = %entry, "Skipping unreadable detection box");
            }
            parsed
        })
        .collect();

    let lookup = |key: &str| holder.get(key).or_else(|| body.get(key));

    let frame_name = lookup("frame_name")
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let food_level = match lookup("food_level") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let percent = as_integer(v).ok_or_else(|| {
                DecodeError::InvalidDetections(format!("food_level is not a number: {v}"))
            })?;
            Some(
                FoodLevel::new(percent)
                    .map_err(|e| DecodeError::InvalidDetections(e.to_string()))?,
            )
        }
    };

    let missing_dishes = match lookup("missing_dishes") {
        None | Some(Value::Null) => 0,
        Some(v) => as_integer(v)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| {
                DecodeError::InvalidDetections(format!("missing_dishes is invalid: {v}"))
            })?,
    };

    Ok(DetectionBatch {
        frame_name,
        food_level,
        missing_dishes,
        boxes,
        schema,
    })
}

fn find_detection_list(body: &Value) -> Option<(&Value, &Value, DetectionSchema)> {
    if let Some(list) = body.get(CURRENT_DETECTIONS_KEY) {
        return Some((body, list, DetectionSchema::Current));
    }
    if let Some(list) = body.get(LEGACY_DETECTIONS_KEY) {
        return Some((body, list, DetectionSchema::Legacy));
    }
    ["data", "results"]
        .iter()
        .filter_map(|key| body.get(*key).filter(|v| v.is_object()))
        .find_map(|inner| {
            inner
                .get(CURRENT_DETECTIONS_KEY)
                .or_else(|| inner.get(LEGACY_DETECTIONS_KEY))
                .map(|list| (inner, list, DetectionSchema::Legacy))
        })
}

/// One box as `[x1, y1, x2, y2(, confidence)]`, `{bbox: [...], confidence}`
/// or `{x1, y1, x2, y2, confidence}`.
fn parse_box(entry: &Value) -> Option<DetectionBox> {
    let (coords, confidence) = match entry {
        Value::Array(values) => (corners(values)?, values.get(4).and_then(Value::as_f64)),
        Value::Object(obj) => {
            let coords = match obj.get("bbox").or_else(|| obj.get("box")) {
                Some(Value::Array(values)) => corners(values)?,
                _ => [
                    obj.get("x1")?.as_f64()?,
                    obj.get("y1")?.as_f64()?,
                    obj.get("x2")?.as_f64()?,
                    obj.get("y2")?.as_f64()?,
                ],
            };
            let confidence = obj
                .get("confidence")
                .or_else(|| obj.get("score"))
                .and_then(Value::as_f64);
            (coords, confidence)
        }
        _ => return None,
    };
    let [x1, y1, x2, y2] = coords;
    let bbox = BoundingBox::new(x1, y1, x2, y2);
    bbox.is_finite().then_some(DetectionBox { bbox, confidence })
}

fn corners(values: &[Value]) -> Option<[f64; 4]> {
    if values.len() < 4 {
        return None;
    }
    Some([
        values[0].as_f64()?,
        values[1].as_f64()?,
        values[2].as_f64()?,
        values[3].as_f64()?,
    ])
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Unwrap the `{title, data}` wrapper the backend puts around payloads.
fn titled_body(payload: &Value) -> &Value {
    match (payload.get("title"), payload.get("data")) {
        (Some(_), Some(inner)) if inner.is_object() => inner,
        _ => payload,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
