//! # weir-common
//!
//! Shared types for the weir audio session engine and its playback
//! collaborators: wire framing for the multiplexed audio channel, status
//! event records, output profiles, and control-API request/response bodies.
//!
//! Both `weir-engine` and downstream consumers depend on this crate so the
//! two sides of the wire can never drift apart.

pub mod api;
pub mod events;
pub mod profile;
pub mod protocol;

pub use events::{EngineEvent, EventBus};
pub use profile::OutputProfile;
pub use protocol::{FrameDecoder, FrameError, SESSION_ID_WIDTH};
