//! # Upstream Realtime Sessions
//!
//! Everything that talks to the speech-to-speech service.
//!
//! ## Key Components:
//! - **protocol**: wire events and the tenant → `session.update` mapping
//! - **transport**: the connector/sink seam
//! - **session**: `UpstreamSessionClient` and the per-call `Session`
//! - **voicelive**: the Azure VoiceLive WebSocket connector

pub mod protocol;
pub mod session;
pub mod transport;
pub mod voicelive;

pub use protocol::Event;
pub use session::{EventStream, Session, UpstreamSessionClient};
pub use transport::UpstreamConnector;
pub use voicelive::VoiceLiveConnector;
