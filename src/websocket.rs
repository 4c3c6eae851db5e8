//! # Inbound WebSocket Endpoint
//!
//! Telephony clients connect to `/ws/audio/{routing_key}` (or `/bridge/{routing_key}`)
//! and stream PCM16 audio. Each connection is an actix actor that owns one `AudioBridge`
//! task:
//!
//! ```text
//! client ──ws──► BridgeWebSocket ──mpsc (bounded)──► AudioBridge ──► upstream
//! client ◄─ws─── BridgeWebSocket ◄──── SendFrame ─── AudioBridge ◄── upstream
//! ```
//!
//! ## Message Handling:
//! - **Text**: base64 PCM16 (the existing client protocol)
//! - **Binary**: raw PCM16 little-endian
//! - **Ping/Pong**: heartbeat; silence longer than `client_timeout_secs` closes the socket
//! - **Close**: ends the inbound queue, which ends the bridge
//!
//! The queue between the actor and the bridge is bounded; when it is full the newest
//! frame is dropped and counted. Frames larger than `transport_frame_limit` are rejected
//! by the codec and close the connection.

use crate::bridge::{
    AudioBridge, BridgeContext, ClientSink, CloseStatus, InboundMessage, OutboundFrame,
};
use crate::error::AppError;
use crate::state::{AppState, BridgeMetrics};
use crate::tenant::RoutingKey;
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// One inbound connection.
pub struct BridgeWebSocket {
    routing_key: RoutingKey,
    bridge: Arc<BridgeContext>,
    metrics: Arc<RwLock<BridgeMetrics>>,
    /// Feeds the bridge task; `None` once the connection is finished
    inbound_tx: Option<mpsc::Sender<InboundMessage>>,
    last_heartbeat: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl BridgeWebSocket {
    pub fn new(routing_key: RoutingKey, app_state: &AppState) -> Self {
        let settings = &app_state.config.bridge;
        Self {
            routing_key,
            bridge: app_state.bridge.clone(),
            metrics: app_state.metrics.clone(),
            inbound_tx: None,
            last_heartbeat: Instant::now(),
            heartbeat_interval: settings.heartbeat_interval(),
            client_timeout: settings.client_timeout(),
        }
    }

    fn forward(&mut self, message: InboundMessage) {
        let Some(tx) = &self.inbound_tx else {
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.write().unwrap().record_queue_overflow();
                debug!(routing_key = %self.routing_key, "Inbound queue full, dropping frame");
            }
            Err(TrySendError::Closed(_)) => {
                debug!(routing_key = %self.routing_key, "Bridge finished, ignoring frame");
                self.inbound_tx = None;
            }
        }
    }
}

/// Audio for the client, posted by the bridge task.
#[derive(Message)]
#[rtype(result = "()")]
struct SendFrame(OutboundFrame);

/// Close the connection with the given status, posted by the bridge task.
#[derive(Message)]
#[rtype(result = "()")]
struct CloseConnection(CloseStatus);

/// `ClientSink` that posts to the connection's actor mailbox.
struct ActorClientSink {
    addr: Addr<BridgeWebSocket>,
}

impl ClientSink for ActorClientSink {
    fn send_frame(&self, frame: OutboundFrame) {
        self.addr.do_send(SendFrame(frame));
    }

    fn close(&self, status: CloseStatus) {
        self.addr.do_send(CloseConnection(status));
    }
}

impl Actor for BridgeWebSocket {
    type Context = ws::WebsocketContext<Self>;

    /// Start the heartbeat and the bridge task.
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(routing_key = %self.routing_key, "WebSocket connection started");

        let (tx, rx) = mpsc::channel(self.bridge.settings.inbound_queue_frames);
        self.inbound_tx = Some(tx);

        let bridge = AudioBridge::new(self.bridge.clone());
        let routing_key = self.routing_key.clone();
        let client: Arc<dyn ClientSink> = Arc::new(ActorClientSink {
            addr: ctx.address(),
        });
        actix_web::rt::spawn(async move {
            bridge.run(routing_key, rx, client).await;
        });

        let client_timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > client_timeout {
                warn!(routing_key = %act.routing_key, "WebSocket heartbeat timeout, closing connection");
                act.inbound_tx = None;
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.inbound_tx = None;
        info!(routing_key = %self.routing_key, "WebSocket connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for BridgeWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                self.forward(InboundMessage::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_heartbeat = Instant::now();
                self.forward(InboundMessage::Binary(data.to_vec()));
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!(routing_key = %self.routing_key, reason = ?reason, "Client closed WebSocket");
                self.inbound_tx = None;
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(routing_key = %self.routing_key, "Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(routing_key = %self.routing_key, error = %err, "WebSocket protocol error");
                self.inbound_tx = None;
                ctx.stop();
            }
        }
    }
}

impl Handler<SendFrame> for BridgeWebSocket {
    type Result = ();

    fn handle(&mut self, msg: SendFrame, ctx: &mut Self::Context) {
        match msg.0 {
            OutboundFrame::Text(text) => ctx.text(text),
            OutboundFrame::Binary(bytes) => ctx.binary(bytes),
        }
    }
}

impl Handler<CloseConnection> for BridgeWebSocket {
    type Result = ();

    fn handle(&mut self, msg: CloseConnection, ctx: &mut Self::Context) {
        let status = msg.0;
        debug!(routing_key = %self.routing_key, code = status.code(), "Closing WebSocket");
        self.inbound_tx = None;
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::from(status.code()),
            description: Some(status.reason().to_string()),
        }));
        ctx.stop();
    }
}

/// Upgrade handler for both bridge routes.
pub async fn bridge_websocket(
    req: HttpRequest,
    stream: web::Payload,
    path: web::Path<String>,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let raw_key = path.into_inner();
    let Some(routing_key) = RoutingKey::parse(&raw_key) else {
        warn!(routing_key = %raw_key, "Rejected WebSocket with invalid routing key");
        return Err(AppError::BadRequest("invalid routing key".to_string()).into());
    };

    info!(
        routing_key = %routing_key,
        peer = ?req.connection_info().peer_addr(),
        "New WebSocket connection request"
    );

    ws::WsResponseBuilder::new(BridgeWebSocket::new(routing_key, &app_state), &req, stream)
        .frame_size(transport_frame_limit(app_state.config.bridge.max_frame_bytes))
        .start()
}

/// Largest WebSocket payload the codec accepts for a given `max_frame_bytes`.
///
/// Twice the base64 size of the largest valid frame. Oversized frames below this limit
/// reach the bridge and are dropped as `TooLarge`; anything beyond it is a protocol
/// error and ends the connection.
pub fn transport_frame_limit(max_frame_bytes: usize) -> usize {
    max_frame_bytes.div_ceil(3) * 4 * 2
}
