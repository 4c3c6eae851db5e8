//! Transport seam between the session client and the realtime service.
//!
//! `VoiceLiveConnector` is the production implementation; tests plug in an in-memory
//! connector that acknowledges sessions and records what was sent.

use crate::error::UpstreamError;
use crate::upstream::protocol::{ClientEvent, ServerEvent};
use async_trait::async_trait;
use futures_util::stream::BoxStream;

/// Decoded server events in arrival order. Ends when the service closes the connection.
pub type ServerEventStream = BoxStream<'static, Result<ServerEvent, UpstreamError>>;

/// Write half of an upstream connection.
#[async_trait]
pub trait UpstreamSink: Send + Sync {
    async fn send(&self, event: ClientEvent) -> Result<(), UpstreamError>;

    /// Send a close frame and release the connection.
    async fn close(&self) -> Result<(), UpstreamError>;
}

pub struct UpstreamChannel {
    pub sink: Box<dyn UpstreamSink>,
    pub events: ServerEventStream,
}

#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Open a raw connection for `model`. No session configuration has been sent yet.
    async fn connect(&self, model: &str) -> Result<UpstreamChannel, UpstreamError>;
}
