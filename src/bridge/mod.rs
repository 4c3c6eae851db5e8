//! # Call Bridging
//!
//! ## Key Components:
//! - **frame**: inbound/outbound audio message encoding
//! - **registry**: live bridges, capacity limit and shutdown draining
//! - **audio_bridge**: the per-connection state machine and relay

pub mod audio_bridge;
pub mod frame;
pub mod registry;

pub use audio_bridge::{AudioBridge, BridgeContext, BridgeReport, ClientSink, CloseStatus};
pub use frame::{InboundMessage, OutboundFrame};
pub use registry::SessionRegistry;
