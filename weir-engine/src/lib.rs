//! # weir-engine
//!
//! Audio session engine: resolves remote media URLs, decodes and re-encodes
//! them through an external ffmpeg process, paces the chunk stream to a
//! steady cadence, and multiplexes concurrent sessions onto one framed
//! output channel, all under an HTTP control surface.
//!
//! **Architecture:** per-session pipeline (locator → ffmpeg → pacing buffer
//! → transport) owned by a session manager; the active-session map is the
//! only cross-session shared state.

pub mod api;
pub mod config;
pub mod error;
pub mod locator;
pub mod pacing;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
