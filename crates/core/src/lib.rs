//! Client-side domain logic for the meal-tray capture console.
//!
//! Everything here is pure and synchronous: coordinate transforms, the
//! fixed color palette, per-capture annotation state, dish-mapping
//! reconciliation, and the [`machine::SessionMachine`] that owns them.
//! I/O lives in `traycam-realtime`.

pub mod annotation;
pub mod capture;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod machine;
pub mod mapping;
pub mod palette;
pub mod session;
pub mod types;
pub mod wire;
