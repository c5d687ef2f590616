//! Realtime boundary for the tray-camera operator console.
//!
//! Decodes inbound realtime events into `traycam-core` types, manages the
//! WebSocket connection with exponential-backoff reconnection, wraps the
//! HTTP control/auth/lookup endpoints, and runs the async session driver
//! that feeds the core state machine.

pub mod api;
pub mod auth;
pub mod client;
pub mod decode;
pub mod driver;
pub mod events;
pub mod lookup;
pub mod messages;
pub mod reconnect;
