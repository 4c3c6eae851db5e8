//! # Audio Bridge
//!
//! Pairs one inbound telephony connection with one upstream realtime session and relays
//! audio both ways until either side goes away.
//!
//! ## State Machine:
//! ```text
//! Init ──► Connecting ──► Active ──► Closing ──► Closed
//!              │                                   ▲
//!              └───────── resolve/open failure ────┘
//! ```
//!
//! ## Close codes sent to the inbound client:
//! - **1000**: normal end (client hung up, upstream finished, shutdown)
//! - **4004**: routing key has no active tenant configuration
//! - **1013**: store unreachable after retries, registry full or draining
//! - **1011**: upstream session could not be opened
//!
//! The relay is lossy: malformed inbound frames and frames that arrive while the session
//! is not active are dropped, never retried.

use crate::bridge::frame::{decode_inbound, InboundMessage, OutboundFrame};
use crate::bridge::registry::{BridgeState, SessionRegistry};
use crate::config::BridgeConfig;
use crate::error::ResolveError;
use crate::state::BridgeMetrics;
use crate::tenant::{ConfigResolver, RetryPolicy, RoutingKey, TenantConfig};
use crate::upstream::{Event, EventStream, Session, UpstreamSessionClient};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// WebSocket close status the bridge ends a connection with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseStatus {
    Normal,
    NotFound,
    ServiceUnavailable,
    UpstreamError,
}

impl CloseStatus {
    pub fn code(self) -> u16 {
        match self {
            CloseStatus::Normal => 1000,
            CloseStatus::NotFound => 4004,
            CloseStatus::ServiceUnavailable => 1013,
            CloseStatus::UpstreamError => 1011,
        }
    }

    /// Fixed close reason; internal error text never reaches the client.
    pub fn reason(self) -> &'static str {
        match self {
            CloseStatus::Normal => "session ended",
            CloseStatus::NotFound => "configuration not found",
            CloseStatus::ServiceUnavailable => "service unavailable",
            CloseStatus::UpstreamError => "upstream error",
        }
    }
}

/// Outbound half of the inbound connection.
///
/// Implementations must not block: the WebSocket actor implementation just posts a
/// message to its mailbox.
pub trait ClientSink: Send + Sync {
    fn send_frame(&self, frame: OutboundFrame);
    fn close(&self, status: CloseStatus);
}

/// Shared collaborators every bridge runs with.
pub struct BridgeContext {
    pub resolver: Arc<ConfigResolver>,
    pub upstream: Arc<UpstreamSessionClient>,
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<RwLock<BridgeMetrics>>,
    pub settings: BridgeConfig,
    pub retry: RetryPolicy,
}

/// What happened to one bridged connection.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeReport {
    /// `None` when the registry refused the bridge
    pub bridge_id: Option<Uuid>,
    pub close: CloseStatus,
    pub reached_active: bool,
    pub frames_in: u64,
    pub frames_out: u64,
    pub frames_dropped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    ClientDisconnected,
    UpstreamEnded,
    UpstreamFailed,
    ShutdownRequested,
}

#[derive(Default)]
struct RelayCounters {
    frames_in: AtomicU64,
    frames_out: AtomicU64,
    frames_dropped: AtomicU64,
}

impl RelayCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

pub struct AudioBridge {
    ctx: Arc<BridgeContext>,
}

impl AudioBridge {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        Self { ctx }
    }

    /// Drive one connection from registration to close.
    ///
    /// `inbound` ends when the client disconnects. The client is closed exactly once,
    /// with the status in the returned report.
    pub async fn run(
        &self,
        routing_key: RoutingKey,
        mut inbound: mpsc::Receiver<InboundMessage>,
        client: Arc<dyn ClientSink>,
    ) -> BridgeReport {
        self.ctx.metrics.write().unwrap().connections += 1;
        let counters = RelayCounters::default();

        let registration = match self.ctx.registry.register(&routing_key) {
            Ok(registration) => registration,
            Err(err) => {
                warn!(routing_key = %routing_key, error = %err, "Bridge refused");
                return self.finish(None, CloseStatus::ServiceUnavailable, false, &counters, client.as_ref());
            }
        };
        let handle = registration.handle.clone();
        let bridge_id = handle.id;
        let mut close_signal = handle.close_signal();

        info!(bridge_id = %bridge_id, routing_key = %routing_key, "Bridge connecting");
        handle.set_state(BridgeState::Connecting);

        // `open` is never cancelled: it is bounded by the open timeout and must release
        // its transport itself. Only resolution races the close signal.
        let resolved = tokio::select! {
            result = self.resolve(&routing_key, bridge_id) => result,
            _ = close_signal.wait_for(|closing| *closing) => {
                info!(bridge_id = %bridge_id, "Shutdown requested while resolving");
                Err(CloseStatus::Normal)
            }
        };
        let config = match resolved {
            Ok(config) => config,
            Err(status) => {
                return self.finish(Some(bridge_id), status, false, &counters, client.as_ref());
            }
        };

        let opened = self.open(&routing_key, bridge_id, config).await;
        if handle.close_requested() {
            info!(bridge_id = %bridge_id, "Shutdown requested while opening");
            if let Ok(session) = &opened {
                self.close_upstream(bridge_id, session).await;
            }
            return self.finish(Some(bridge_id), CloseStatus::Normal, false, &counters, client.as_ref());
        }
        let session = match opened {
            Ok(session) => session,
            Err(status) => {
                return self.finish(Some(bridge_id), status, false, &counters, client.as_ref());
            }
        };

        handle.set_state(BridgeState::Active);
        self.ctx.metrics.write().unwrap().sessions_opened += 1;
        info!(bridge_id = %bridge_id, session_id = %session.id, "Bridge active");

        // Audio sent before the session was live is stale.
        let stale = Self::discard_pending(&mut inbound);
        if stale > 0 {
            counters.frames_dropped.fetch_add(stale, Ordering::Relaxed);
            debug!(bridge_id = %bridge_id, frames = stale, "Dropped audio received while connecting");
        }

        let mut events = self
            .ctx
            .upstream
            .receive_events(&session)
            .unwrap_or_else(|| futures_util::stream::empty().boxed());

        let reason = tokio::select! {
            reason = self.relay_inbound(&session, &mut inbound, &counters) => reason,
            reason = self.relay_upstream(&session, &mut events, client.as_ref(), &counters) => reason,
            _ = close_signal.wait_for(|closing| *closing) => EndReason::ShutdownRequested,
        };

        info!(bridge_id = %bridge_id, reason = ?reason, "Bridge closing");
        handle.set_state(BridgeState::Closing);
        drop(events);
        inbound.close();

        self.close_upstream(bridge_id, &session).await;

        let report = self.finish(Some(bridge_id), CloseStatus::Normal, true, &counters, client.as_ref());
        drop(registration);
        report
    }

    /// Connecting, first half: resolve the tenant with retry.
    async fn resolve(
        &self,
        routing_key: &RoutingKey,
        bridge_id: Uuid,
    ) -> Result<Arc<TenantConfig>, CloseStatus> {
        match self
            .ctx
            .resolver
            .resolve_with_retry(routing_key, &self.ctx.retry)
            .await
        {
            Ok(config) => Ok(config),
            Err(ResolveError::NotFound) => {
                warn!(bridge_id = %bridge_id, routing_key = %routing_key, "No configuration for routing key");
                Err(CloseStatus::NotFound)
            }
            Err(ResolveError::Unavailable(reason)) => {
                error!(bridge_id = %bridge_id, routing_key = %routing_key, reason = %reason, "Configuration store unavailable");
                Err(CloseStatus::ServiceUnavailable)
            }
        }
    }

    /// Connecting, second half: open the upstream session.
    async fn open(
        &self,
        routing_key: &RoutingKey,
        bridge_id: Uuid,
        config: Arc<TenantConfig>,
    ) -> Result<Session, CloseStatus> {
        self.ctx
            .upstream
            .open(routing_key, config)
            .await
            .map_err(|err| {
                error!(bridge_id = %bridge_id, routing_key = %routing_key, error = %err, "Upstream session failed to open");
                CloseStatus::UpstreamError
            })
    }

    /// Close the upstream session, bounded by `shutdown_timeout`.
    async fn close_upstream(&self, bridge_id: Uuid, session: &Session) {
        if tokio::time::timeout(self.ctx.settings.shutdown_timeout(), self.ctx.upstream.close(session))
            .await
            .is_err()
        {
            warn!(bridge_id = %bridge_id, session_id = %session.id, "Upstream close timed out");
        }
    }

    /// Empty the inbound queue without relaying; returns how many frames were discarded.
    fn discard_pending(inbound: &mut mpsc::Receiver<InboundMessage>) -> u64 {
        let mut discarded = 0;
        while inbound.try_recv().is_ok() {
            discarded += 1;
        }
        discarded
    }

    /// Inbound → upstream, in arrival order.
    async fn relay_inbound(
        &self,
        session: &Session,
        inbound: &mut mpsc::Receiver<InboundMessage>,
        counters: &RelayCounters,
    ) -> EndReason {
        while let Some(message) = inbound.recv().await {
            match decode_inbound(message, self.ctx.settings.max_frame_bytes) {
                Ok(frame) => {
                    RelayCounters::bump(&counters.frames_in);
                    if let Err(err) = self.ctx.upstream.send_audio(session, frame.as_bytes()).await {
                        warn!(session_id = %session.id, error = %err, "Upstream write failed");
                        return EndReason::UpstreamFailed;
                    }
                }
                Err(err) => {
                    RelayCounters::bump(&counters.frames_dropped);
                    debug!(session_id = %session.id, error = %err, "Dropping malformed inbound frame");
                }
            }
        }
        EndReason::ClientDisconnected
    }

    /// Upstream → inbound.
    async fn relay_upstream(
        &self,
        session: &Session,
        events: &mut EventStream,
        client: &dyn ClientSink,
        counters: &RelayCounters,
    ) -> EndReason {
        let encoding = self.ctx.settings.outbound_encoding;
        while let Some(event) = events.next().await {
            match event {
                Event::AudioOut(pcm16) => {
                    RelayCounters::bump(&counters.frames_out);
                    client.send_frame(OutboundFrame::encode(pcm16, encoding));
                }
                Event::SpeechStarted => {
                    info!(session_id = %session.id, "Caller speech started, interrupting response");
                    if let Err(err) = self.ctx.upstream.cancel_response(session).await {
                        debug!(session_id = %session.id, error = %err, "Response cancel not sent");
                    }
                }
                Event::SpeechStopped => {
                    debug!(session_id = %session.id, "Caller speech stopped");
                }
                Event::TranscriptDone { speaker, text } => {
                    info!(session_id = %session.id, speaker = ?speaker, text = %text, "Transcript");
                }
                Event::Error {
                    code,
                    message,
                    fatal: false,
                } => {
                    warn!(session_id = %session.id, code = ?code, message = %message, "Upstream reported an error");
                }
                Event::Error {
                    code,
                    message,
                    fatal: true,
                } => {
                    error!(session_id = %session.id, code = ?code, message = %message, "Fatal upstream error");
                    return EndReason::UpstreamFailed;
                }
            }
        }
        EndReason::UpstreamEnded
    }

    fn finish(
        &self,
        bridge_id: Option<Uuid>,
        status: CloseStatus,
        reached_active: bool,
        counters: &RelayCounters,
        client: &dyn ClientSink,
    ) -> BridgeReport {
        client.close(status);

        let report = BridgeReport {
            bridge_id,
            close: status,
            reached_active,
            frames_in: counters.frames_in.load(Ordering::Relaxed),
            frames_out: counters.frames_out.load(Ordering::Relaxed),
            frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
        };
        self.ctx.metrics.write().unwrap().record_bridge(&report);

        info!(
            bridge_id = ?bridge_id,
            close_code = status.code(),
            frames_in = report.frames_in,
            frames_out = report.frames_out,
            frames_dropped = report.frames_dropped,
            "Bridge closed"
        );
        report
    }
}
