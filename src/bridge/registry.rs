//! # Session Registry
//!
//! Tracks every live bridge so the process can enforce its concurrency limit and
//! drain connections on shutdown.
//!
//! ## Thread Safety:
//! The bridge map sits behind a single `Mutex`; the live count is additionally
//! published on a `watch` channel so `shutdown_all` can wait for it to reach zero
//! without polling.
//!
//! ## Lifecycle of an entry:
//! 1. **register**: the bridge gets a fresh id (same routing key ⇒ new id every time)
//! 2. **request_close**: set by `shutdown_all`, observed by the bridge's relay loop
//! 3. **deregister**: runs when the `Registration` is dropped, on every exit path

use crate::error::RegistryError;
use crate::tenant::RoutingKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a bridge is in its lifecycle.
///
/// ## State Transitions:
/// Init → Connecting → Active → Closing → Closed, or Connecting → Closed on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    Init,
    Connecting,
    Active,
    Closing,
    Closed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Init => "init",
            BridgeState::Connecting => "connecting",
            BridgeState::Active => "active",
            BridgeState::Closing => "closing",
            BridgeState::Closed => "closed",
        }
    }
}

/// The registry's view of one bridge.
pub struct BridgeHandle {
    pub id: Uuid,
    pub routing_key: RoutingKey,
    pub created_at: DateTime<Utc>,
    state: RwLock<BridgeState>,
    close_tx: watch::Sender<bool>,
}

impl BridgeHandle {
    pub fn state(&self) -> BridgeState {
        *self.state.read().unwrap()
    }

    pub fn set_state(&self, state: BridgeState) {
        *self.state.write().unwrap() = state;
    }

    /// Ask the bridge to wind down. Safe to call repeatedly.
    pub fn request_close(&self) {
        self.close_tx.send_replace(true);
    }

    pub fn close_requested(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Receiver that observes `request_close`; use `wait_for(|closing| *closing)`.
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }
}

/// A successful registration. Dropping it deregisters the bridge.
pub struct Registration {
    pub handle: Arc<BridgeHandle>,
    registry: Arc<SessionRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.handle.id);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShutdownReport {
    /// Bridges asked to close
    pub requested: usize,
    /// Bridges still registered when the wait ended
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistrySummary {
    pub active_bridges: usize,
    pub max_bridges: usize,
    pub draining: bool,
    pub state_counts: HashMap<String, usize>,
}

struct RegistryInner {
    bridges: HashMap<Uuid, Arc<BridgeHandle>>,
    draining: bool,
}

pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    active_tx: watch::Sender<usize>,
    max_concurrent: usize,
}

impl SessionRegistry {
    pub fn new(max_concurrent: usize) -> Self {
        let (active_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(RegistryInner {
                bridges: HashMap::new(),
                draining: false,
            }),
            active_tx,
            max_concurrent,
        }
    }

    /// Track a new bridge for `routing_key`.
    ///
    /// ## Returns:
    /// - **Ok(Registration)**: bridge tracked in `Init` state
    /// - **Err(CapacityExceeded)**: `max_concurrent` bridges already live
    /// - **Err(Draining)**: shutdown has started
    pub fn register(
        self: &Arc<Self>,
        routing_key: &RoutingKey,
    ) -> Result<Registration, RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.draining {
            return Err(RegistryError::Draining);
        }
        if inner.bridges.len() >= self.max_concurrent {
            warn!(
                routing_key = %routing_key,
                max = self.max_concurrent,
                "Bridge capacity reached"
            );
            return Err(RegistryError::CapacityExceeded(self.max_concurrent));
        }

        let (close_tx, _) = watch::channel(false);
        let handle = Arc::new(BridgeHandle {
            id: Uuid::new_v4(),
            routing_key: routing_key.clone(),
            created_at: Utc::now(),
            state: RwLock::new(BridgeState::Init),
            close_tx,
        });
        inner.bridges.insert(handle.id, handle.clone());
        self.active_tx.send_replace(inner.bridges.len());
        debug!(bridge_id = %handle.id, routing_key = %routing_key, active = inner.bridges.len(), "Bridge registered");

        Ok(Registration {
            handle,
            registry: self.clone(),
        })
    }

    /// Remove a bridge. Unknown ids are ignored.
    pub fn deregister(&self, bridge_id: Uuid) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let removed = inner.bridges.remove(&bridge_id);
        if let Some(handle) = &removed {
            handle.set_state(BridgeState::Closed);
            self.active_tx.send_replace(inner.bridges.len());
            debug!(bridge_id = %bridge_id, active = inner.bridges.len(), "Bridge deregistered");
        }
        removed.is_some()
    }

    pub fn get(&self, bridge_id: Uuid) -> Option<Arc<BridgeHandle>> {
        self.inner.lock().unwrap().bridges.get(&bridge_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap().bridges.len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock().unwrap().draining
    }

    pub fn summary(&self) -> RegistrySummary {
        let inner = self.inner.lock().unwrap();
        let mut state_counts = HashMap::new();
        for handle in inner.bridges.values() {
            *state_counts
                .entry(handle.state().as_str().to_string())
                .or_insert(0) += 1;
        }
        RegistrySummary {
            active_bridges: inner.bridges.len(),
            max_bridges: self.max_concurrent,
            draining: inner.draining,
            state_counts,
        }
    }

    /// Stop accepting bridges, ask every live one to close and wait up to `timeout`
    /// for them to deregister.
    pub async fn shutdown_all(&self, timeout: Duration) -> ShutdownReport {
        let handles: Vec<Arc<BridgeHandle>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.draining = true;
            inner.bridges.values().cloned().collect()
        };

        info!(bridges = handles.len(), timeout_ms = timeout.as_millis() as u64, "Draining bridges");
        for handle in &handles {
            handle.request_close();
        }

        let mut active = self.active_tx.subscribe();
        let drained = tokio::time::timeout(timeout, active.wait_for(|count| *count == 0))
            .await
            .is_ok();

        let remaining = self.active_count();
        if drained {
            info!(requested = handles.len(), "All bridges closed");
        } else {
            warn!(requested = handles.len(), remaining = remaining, "Shutdown timeout with bridges still open");
        }
        ShutdownReport {
            requested: handles.len(),
            remaining,
        }
    }
}
