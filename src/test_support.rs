//! In-memory fakes shared by the unit tests.

use crate::bridge::{ClientSink, CloseStatus, OutboundFrame};
use crate::error::{StoreError, UpstreamError};
use crate::tenant::model::{TenantId, TenantRecord};
use crate::tenant::{ConfigStore, RoutingKey, TenantConfig};
use crate::upstream::protocol::{ClientEvent, ErrorDetail, ServerEvent};
use crate::upstream::transport::{UpstreamChannel, UpstreamSink};
use crate::upstream::UpstreamConnector;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Default tenant configuration with the given voice.
pub fn sample_config(voice: &str) -> TenantConfig {
    TenantRecord {
        voice: Some(voice.to_string()),
        ..TenantRecord::default()
    }
    .into_config(true)
}

/// Poll `condition` every few milliseconds; panics after two seconds.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Default)]
struct MemoryStoreInner {
    routes: HashMap<String, (TenantId, bool)>,
    tenants: HashMap<TenantId, (bool, Option<TenantConfig>)>,
    failing_lookups: u32,
    lookups: usize,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active route and tenant with `config`; replaces any previous entry.
    pub fn add_tenant(&self, key: &str, tenant: &str, config: TenantConfig) {
        let mut inner = self.inner.lock().unwrap();
        let id = TenantId(tenant.to_string());
        inner.routes.insert(key.to_string(), (id.clone(), true));
        inner.tenants.insert(id, (true, Some(config)));
    }

    /// Active route and tenant without any configuration record.
    pub fn add_route_only(&self, key: &str, tenant: &str) {
        let mut inner = self.inner.lock().unwrap();
        let id = TenantId(tenant.to_string());
        inner.routes.insert(key.to_string(), (id.clone(), true));
        inner.tenants.insert(id, (true, None));
    }

    pub fn deactivate_route(&self, key: &str) {
        if let Some(route) = self.inner.lock().unwrap().routes.get_mut(key) {
            route.1 = false;
        }
    }

    pub fn deactivate_tenant(&self, tenant: &str) {
        let id = TenantId(tenant.to_string());
        if let Some(entry) = self.inner.lock().unwrap().tenants.get_mut(&id) {
            entry.0 = false;
        }
    }

    /// The next `count` lookups fail with `StoreError::Unavailable`.
    pub fn fail_next_lookups(&self, count: u32) {
        self.inner.lock().unwrap().failing_lookups = count;
    }

    /// Every lookup call so far, failed ones included.
    pub fn lookup_count(&self) -> usize {
        self.inner.lock().unwrap().lookups
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn lookup(&self, key: &RoutingKey) -> Result<Option<TenantId>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.lookups += 1;
        if inner.failing_lookups > 0 {
            inner.failing_lookups -= 1;
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }

        let Some((tenant, true)) = inner.routes.get(key.as_str()).cloned() else {
            return Ok(None);
        };
        let tenant_active = inner.tenants.get(&tenant).is_some_and(|(active, _)| *active);
        Ok(tenant_active.then_some(tenant))
    }

    async fn fetch(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.tenants.get(tenant).and_then(|(active, config)| {
            config.clone().map(|mut config| {
                config.active = config.active && *active;
                config
            })
        }))
    }
}

type EventSender = mpsc::UnboundedSender<Result<ServerEvent, UpstreamError>>;

#[derive(Default)]
struct FakeConnection {
    model: String,
    sent: Vec<ClientEvent>,
    events: Option<EventSender>,
    closes: usize,
}

#[derive(Default)]
struct FakeUpstream {
    connections: Vec<FakeConnection>,
    reject_with: Option<String>,
    refuse_connect: bool,
    silent: bool,
}

/// Realtime service stand-in. Connections are numbered in connect order; inspecting a
/// connection that has not been made yet reads as empty.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<FakeUpstream>>,
}

impl FakeConnector {
    /// Acknowledges every `session.update`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `session.update` with an error event.
    pub fn rejecting(message: &str) -> Self {
        let connector = Self::default();
        connector.inner.lock().unwrap().reject_with = Some(message.to_string());
        connector
    }

    /// Fails every connect attempt.
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.inner.lock().unwrap().refuse_connect = true;
        connector
    }

    /// Accepts connections but never acknowledges the session.
    pub fn silent() -> Self {
        let connector = Self::default();
        connector.inner.lock().unwrap().silent = true;
        connector
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connections.len()
    }

    pub fn models(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.connections.iter().map(|c| c.model.clone()).collect()
    }

    /// Events written on a connection; empty if it does not exist yet.
    pub fn sent(&self, index: usize) -> Vec<ClientEvent> {
        let inner = self.inner.lock().unwrap();
        inner
            .connections
            .get(index)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// Decoded payloads of every `input_audio_buffer.append` on a connection.
    pub fn audio_sent(&self, index: usize) -> Vec<Vec<u8>> {
        self.sent(index)
            .into_iter()
            .filter_map(|event| match event {
                ClientEvent::InputAudioAppend { audio } => BASE64.decode(audio).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn emit(&self, index: usize, event: ServerEvent) {
        self.push(index, Ok(event));
    }

    /// Surface a transport error on the event stream.
    pub fn fail(&self, index: usize, reason: &str) {
        self.push(index, Err(UpstreamError::Unavailable(reason.to_string())));
    }

    /// End the event stream as if the service closed the connection.
    pub fn hang_up(&self, index: usize) {
        self.inner.lock().unwrap().connections[index].events = None;
    }

    pub fn close_count(&self, index: usize) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.connections.get(index).map_or(0, |c| c.closes)
    }

    pub fn is_closed(&self, index: usize) -> bool {
        self.close_count(index) > 0
    }

    fn push(&self, index: usize, item: Result<ServerEvent, UpstreamError>) {
        if let Some(events) = &self.inner.lock().unwrap().connections[index].events {
            let _ = events.send(item);
        }
    }
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, model: &str) -> Result<UpstreamChannel, UpstreamError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.refuse_connect {
            return Err(UpstreamError::Unavailable("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let index = inner.connections.len();
        inner.connections.push(FakeConnection {
            model: model.to_string(),
            events: Some(tx),
            ..FakeConnection::default()
        });
        Ok(UpstreamChannel {
            sink: Box::new(FakeSink {
                index,
                upstream: self.inner.clone(),
            }),
            events: UnboundedReceiverStream::new(rx).boxed(),
        })
    }
}

struct FakeSink {
    index: usize,
    upstream: Arc<Mutex<FakeUpstream>>,
}

#[async_trait]
impl UpstreamSink for FakeSink {
    async fn send(&self, event: ClientEvent) -> Result<(), UpstreamError> {
        let mut upstream = self.upstream.lock().unwrap();
        let reply = match (&event, &upstream.reject_with, upstream.silent) {
            (ClientEvent::SessionUpdate { .. }, _, true) => None,
            (ClientEvent::SessionUpdate { .. }, Some(message), _) => Some(ServerEvent::Error {
                error: ErrorDetail {
                    code: Some("invalid_request_error".to_string()),
                    message: message.clone(),
                },
            }),
            (ClientEvent::SessionUpdate { .. }, None, _) => Some(ServerEvent::SessionUpdated {}),
            _ => None,
        };

        let connection = &mut upstream.connections[self.index];
        if connection.closes > 0 {
            return Err(UpstreamError::Closed);
        }
        connection.sent.push(event);
        if let (Some(reply), Some(events)) = (reply, &connection.events) {
            let _ = events.send(Ok(reply));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), UpstreamError> {
        let mut upstream = self.upstream.lock().unwrap();
        let connection = &mut upstream.connections[self.index];
        connection.closes += 1;
        connection.events = None;
        Ok(())
    }
}

/// Inbound client stand-in that records what the bridge sends it.
#[derive(Default)]
pub struct RecordingClient {
    frames: Mutex<Vec<OutboundFrame>>,
    closes: Mutex<Vec<u16>>,
}

impl RecordingClient {
    pub fn frames(&self) -> Vec<OutboundFrame> {
        self.frames.lock().unwrap().clone()
    }

    pub fn closes(&self) -> Vec<u16> {
        self.closes.lock().unwrap().clone()
    }
}

impl ClientSink for RecordingClient {
    fn send_frame(&self, frame: OutboundFrame) {
        self.frames.lock().unwrap().push(frame);
    }

    fn close(&self, status: CloseStatus) {
        self.closes.lock().unwrap().push(status.code());
    }
}

mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconnected_index_reads_empty() {
        let connector = FakeConnector::new();
        assert!(connector.sent(0).is_empty());
        assert!(connector.audio_sent(0).is_empty());
        assert!(!connector.is_closed(0));

        let channel = connector.connect("gpt-realtime").await.unwrap();
        channel.sink.send(ClientEvent::audio(&[1, 0])).await.unwrap();
        assert_eq!(connector.audio_sent(0), vec![vec![1, 0]]);
        assert!(connector.sent(1).is_empty());
    }
}
