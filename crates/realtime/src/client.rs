//! WebSocket client for the realtime event channel.
//!
//! [`RealtimeClient`] holds the channel URL. Call
//! [`RealtimeClient::connect`] to establish a live [`RealtimeConnection`]
//! that is already subscribed to the frame topic.

use futures::SinkExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::messages::{OutboundMessage, STREAM_FRAMES_TOPIC};

pub type RealtimeStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the realtime channel.
#[derive(Debug, Clone)]
pub struct RealtimeClient {
    ws_url: String,
}

/// A live, subscribed realtime connection.
pub struct RealtimeConnection {
    /// Local identifier for log correlation. The server assigns its own
    /// client id in the `welcome` event.
    pub connection_id: String,
    pub ws_stream: RealtimeStream,
}

impl RealtimeClient {
    /// * `ws_url` - full WebSocket URL, e.g. `ws://host:5000/ws`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect and subscribe to the frame topic.
    ///
    /// The server only streams frames to subscribed clients, so the
    /// subscription is part of every (re)connect.
    pub async fn connect(&self) -> Result<RealtimeConnection, RealtimeClientError> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let (mut ws_stream, _response) = connect_async(self.ws_url.as_str())
            .await
            .map_err(|e| {
                RealtimeClientError::Connection(format!(
                    "Failed to connect to realtime channel at {}: {e}",
                    self.ws_url
                ))
            })?;

        let subscribe = OutboundMessage::subscribe(STREAM_FRAMES_TOPIC)
            .to_text()
            .map_err(|e| RealtimeClientError::Protocol(e.to_string()))?;
        ws_stream
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| RealtimeClientError::Protocol(format!("Subscribe failed: {e}")))?;

        tracing::info!(
            connection_id = %connection_id,
            topic = STREAM_FRAMES_TOPIC,
            "Connected to realtime channel at {}",
            self.ws_url,
        );

        Ok(RealtimeConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when working with the realtime client.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
