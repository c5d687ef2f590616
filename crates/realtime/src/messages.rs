//! Realtime channel framing.
//!
//! Every WebSocket text frame is a JSON envelope of the shape
//! `{"event": "<name>", "data": <payload>}`. This module deserializes the
//! envelope into a [`RealtimeMessage`]; the payloads of frame and
//! detection events are left raw for [`crate::decode`] to normalize.

use serde::{Deserialize, Serialize};
use traycam_core::wire::ControlCommand;

/// Topic that carries streamed camera frames.
pub const STREAM_FRAMES_TOPIC: &str = "stream_frames";

/// All known inbound realtime events.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum RealtimeMessage {
    /// Greeting sent right after the handshake.
    #[serde(rename = "welcome")]
    Welcome(WelcomeData),

    /// Acknowledges a `subscribe`.
    #[serde(rename = "subscription_confirmed")]
    SubscriptionConfirmed(SubscriptionData),

    /// A streamed camera frame. Payload shape varies, see [`crate::decode`].
    #[serde(rename = "stream_frames")]
    StreamFrames(serde_json::Value),

    /// Model output for a captured frame.
    #[serde(rename = "model_results", alias = "detection_results")]
    ModelResults(serde_json::Value),
}

/// Payload for `welcome` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct WelcomeData {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub server_time: Option<String>,
    pub client_id: String,
}

/// Payload for `subscription_confirmed` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionData {
    pub topic: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// An outbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMessage {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl OutboundMessage {
    /// `subscribe` to a topic. Must be re-sent after every reconnect.
    pub fn subscribe(topic: &str) -> Self {
        Self {
            event: "subscribe",
            data: serde_json::json!({ "topic": topic }),
        }
    }

    /// A control command carried over the realtime channel instead of
    /// HTTP. The command keeps its `{type, data}` shape inside the
    /// envelope.
    pub fn command(command: &ControlCommand) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: "subscribe",
            data: serde_json::to_value(command)?,
        })
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a realtime text frame into a typed message.
///
/// Returns `Err` for malformed JSON or unknown event names. Callers
/// should log and continue.
pub fn parse_message(text: &str) -> Result<RealtimeMessage, serde_json::Error> {
    serde_json::from_str(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use traycam_core::types::FoodLevel;
    use traycam_core::wire::StopStreamingData;

    #[test]
    fn parse_welcome_message() {
        let json = r#"{"event":"welcome","data":{"message":"Connected","server_time":"2024-05-01T10:00:00","client_id":"sid-1"}}"#;
        match parse_message(json).unwrap() {
            RealtimeMessage::Welcome(data) => {
                assert_eq!(data.client_id, "sid-1");
                assert_eq!(data.message, "Connected");
                assert!(data.server_time.is_some());
            }
            other => panic!("Expected Welcome, got {other:?}"),
        }
    }

    #[test]
    fn parse_subscription_confirmed() {
        let json = r#"{"event":"subscription_confirmed","data":{"topic":"stream_frames","status":"subscribed"}}"#;
        match parse_message(json).unwrap() {
            RealtimeMessage::SubscriptionConfirmed(data) => {
                assert_eq!(data.topic, STREAM_FRAMES_TOPIC);
                assert_eq!(data.status.as_deref(), Some("subscribed"));
            }
            other => panic!("Expected SubscriptionConfirmed, got {other:?}"),
        }
    }

    #[test]
    fn parse_stream_frames_keeps_raw_payload() {
        let json = r#"{"event":"stream_frames","data":{"title":"send_frames","data":{"frame_name":"f1","frame_data":"AAAA"}}}"#;
        match parse_message(json).unwrap() {
            RealtimeMessage::StreamFrames(payload) => {
                assert_eq!(payload["data"]["frame_name"], "f1");
            }
            other => panic!("Expected StreamFrames, got {other:?}"),
        }
    }

    #[test]
    fn detection_results_alias_accepted() {
        let json = r#"{"event":"detection_results","data":{"frame_name":"f1"}}"#;
        assert!(matches!(
            parse_message(json).unwrap(),
            RealtimeMessage::ModelResults(_)
        ));
    }

    #[test]
    fn parse_unknown_event_returns_error() {
        let json = r#"{"event":"request_image","data":{}}"#;
        assert!(parse_message(json).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
    }

    #[test]
    fn subscribe_envelope_shape() {
        let text = OutboundMessage::subscribe(STREAM_FRAMES_TOPIC).to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "subscribe");
        assert_eq!(value["data"]["topic"], "stream_frames");
    }

    #[test]
    fn command_envelope_wraps_type_and_data() {
        let command = ControlCommand::StopStreaming(StopStreamingData {
            frame_name: "f9".into(),
            food_level: FoodLevel::new(75).unwrap(),
        });
        let message = OutboundMessage::command(&command).unwrap();
        assert_eq!(message.data["type"], "stop_streaming");
        assert_eq!(message.data["data"]["frame_name"], "f9");
        assert_eq!(message.data["data"]["food_level"], 75);
    }
}
