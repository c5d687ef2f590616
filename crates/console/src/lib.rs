//! `traycam-console` library crate.
//!
//! Configuration, command parsing and text rendering for the operator
//! console. The binary entrypoint lives in `main.rs`.

pub mod commands;
pub mod config;
pub mod lifecycle;
pub mod render;
