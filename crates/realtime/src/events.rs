//! Events emitted by the session driver.
//!
//! These are notifications for UI layers and logs. The authoritative
//! state is the [`traycam_core::machine::SessionSnapshot`] published on
//! the driver's watch channel.

use serde::Serialize;
use traycam_core::types::{FoodLevel, FrameName};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The realtime channel is up and subscribed.
    Connected,

    /// Server greeting with the id it assigned to this client.
    Welcome { client_id: String },

    /// The server acknowledged a topic subscription.
    Subscribed { topic: String },

    /// The realtime channel dropped.
    Disconnected,

    /// A reconnect attempt is scheduled.
    Reconnecting { attempt: u32, delay_ms: u64 },

    /// Reconnection gave up. Terminal.
    ConnectionFailed { reason: String },

    FrameReceived { frame_name: FrameName },

    /// Detection results matched the frozen capture.
    DetectionsApplied {
        frame_name: Option<FrameName>,
        detections: usize,
        missing_dishes: u32,
    },

    /// Detection results were stale or arrived while streaming.
    DetectionsIgnored { frame_name: Option<FrameName> },

    /// A fire-and-forget control command could not be delivered.
    CommandFailed { kind: String, error: String },

    /// The mapping for a food level was accepted.
    SubmissionSucceeded { food_level: FoodLevel },

    /// The mapping was rejected; nothing local changed.
    SubmissionFailed { error: String },

    /// The cursor moved to the next food level.
    LevelAdvanced { food_level: FoodLevel },

    /// The terminal level was accepted and awaits confirmation.
    AwaitingFinalAck,

    /// The operator confirmed the final level.
    SessionCompleted,
}
