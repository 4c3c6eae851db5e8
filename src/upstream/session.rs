//! # Upstream Session Client
//!
//! One `Session` per bridged call. Opening a session connects the transport, pushes the
//! tenant's `session.update` and waits for the service to acknowledge it, so a returned
//! session is always ready to receive audio.
//!
//! ## Lifecycle:
//! ```text
//! open() ──► Active ──close()──► Closing ──► Closed
//! ```
//! Closing is idempotent: a second `close` on a Closing or Closed session does nothing.

use crate::error::UpstreamError;
use crate::tenant::{RoutingKey, TenantConfig};
use crate::upstream::protocol::{ClientEvent, Event, ServerEvent, SessionSettings};
use crate::upstream::transport::{ServerEventStream, UpstreamConnector, UpstreamSink};
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bridge-facing events; transport failures arrive as a fatal `Event::Error`.
pub type EventStream = BoxStream<'static, Event>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

pub struct Session {
    pub id: Uuid,
    pub routing_key: RoutingKey,
    pub config: Arc<TenantConfig>,
    pub created_at: DateTime<Utc>,
    state: RwLock<SessionState>,
    sink: Box<dyn UpstreamSink>,
    events: Mutex<Option<ServerEventStream>>,
}

impl Session {
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }
}

pub struct UpstreamSessionClient {
    connector: Arc<dyn UpstreamConnector>,
    open_timeout: Duration,
    default_model: String,
}

impl UpstreamSessionClient {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        open_timeout: Duration,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            open_timeout,
            default_model: default_model.into(),
        }
    }

    /// Connect and configure a session for one call.
    ///
    /// The model comes from the tenant config, falling back to the deployment default.
    /// `session.created` is skipped while waiting
    /// for `session.updated`; an `error` before the acknowledgment means the service refused
    /// the configuration.
    pub async fn open(
        &self,
        routing_key: &RoutingKey,
        config: Arc<TenantConfig>,
    ) -> Result<Session, UpstreamError> {
        let id = Uuid::new_v4();
        let model = config.model.as_deref().unwrap_or(&self.default_model);
        info!(
            session_id = %id,
            routing_key = %routing_key,
            model = %model,
            voice = %config.voice.name,
            "Opening upstream session"
        );

        let channel = tokio::time::timeout(self.open_timeout, self.connector.connect(model))
            .await
            .map_err(|_| UpstreamError::Unavailable("connect timed out".to_string()))??;
        let sink = channel.sink;
        let mut events = channel.events;

        let update = ClientEvent::SessionUpdate {
            session: SessionSettings::from_tenant(&config),
        };
        let outcome = match tokio::time::timeout(
            self.open_timeout,
            await_acknowledgment(sink.as_ref(), &mut events, update, id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Unavailable(
                "session acknowledgment timed out".to_string(),
            )),
        };

        if let Err(err) = outcome {
            warn!(session_id = %id, routing_key = %routing_key, error = %err, "Upstream session open failed");
            if let Err(close_err) = sink.close().await {
                debug!(session_id = %id, error = %close_err, "Transport release after failed open");
            }
            return Err(err);
        }

        info!(session_id = %id, routing_key = %routing_key, "Upstream session active");
        Ok(Session {
            id,
            routing_key: routing_key.clone(),
            config,
            created_at: Utc::now(),
            state: RwLock::new(SessionState::Active),
            sink,
            events: Mutex::new(Some(events)),
        })
    }

    /// Forward one PCM16 frame. Frames sent to a session that is not active are dropped.
    pub async fn send_audio(&self, session: &Session, pcm16: &[u8]) -> Result<(), UpstreamError> {
        if !session.is_active() {
            debug!(session_id = %session.id, bytes = pcm16.len(), "Dropping audio for inactive session");
            return Ok(());
        }
        session.sink.send(ClientEvent::audio(pcm16)).await
    }

    /// Ask the service to stop the response in progress (caller barge-in).
    pub async fn cancel_response(&self, session: &Session) -> Result<(), UpstreamError> {
        if !session.is_active() {
            return Err(UpstreamError::Closed);
        }
        debug!(session_id = %session.id, "Cancelling active response");
        session.sink.send(ClientEvent::ResponseCancel).await
    }

    /// Hand out the session's event sequence. Only the first call gets it.
    pub fn receive_events(&self, session: &Session) -> Option<EventStream> {
        let events = session.events.lock().unwrap().take()?;
        let session_id = session.id;
        Some(
            events
                .filter_map(move |item| {
                    futures_util::future::ready(match item {
                        Ok(event) => event.into_event(),
                        Err(err) => {
                            warn!(session_id = %session_id, error = %err, "Upstream transport error");
                            Some(Event::Error {
                                code: None,
                                message: err.to_string(),
                                fatal: true,
                            })
                        }
                    })
                })
                .boxed(),
        )
    }

    pub async fn close(&self, session: &Session) {
        let previous = {
            let mut state = session.state.write().unwrap();
            let previous = *state;
            if previous == SessionState::Active {
                *state = SessionState::Closing;
            }
            previous
        };
        if previous != SessionState::Active {
            debug!(session_id = %session.id, state = ?previous, "Session already closing");
            return;
        }

        if let Err(err) = session.sink.close().await {
            debug!(session_id = %session.id, error = %err, "Upstream close was not clean");
        }
        session.events.lock().unwrap().take();
        *session.state.write().unwrap() = SessionState::Closed;

        let lifetime = Utc::now() - session.created_at;
        info!(
            session_id = %session.id,
            routing_key = %session.routing_key,
            duration_ms = lifetime.num_milliseconds(),
            "Upstream session closed"
        );
    }
}

/// Push the session configuration and wait for `session.updated`.
async fn await_acknowledgment(
    sink: &dyn UpstreamSink,
    events: &mut ServerEventStream,
    update: ClientEvent,
    session_id: Uuid,
) -> Result<(), UpstreamError> {
    sink.send(update).await?;
    while let Some(item) = events.next().await {
        match item? {
            ServerEvent::SessionUpdated {} => return Ok(()),
            ServerEvent::Error { error } => return Err(UpstreamError::Rejected(error.message)),
            other => {
                debug!(session_id = %session_id, event = ?other, "Skipping event before session acknowledgment")
            }
        }
    }
    Err(UpstreamError::Unavailable(
        "connection ended before session was acknowledged".to_string(),
    ))
}
