//! # Application State
//!
//! Shared state handed to every HTTP handler and WebSocket connection through
//! `web::Data<AppState>`.
//!
//! ## Ownership:
//! - `config` is loaded once at startup and never changes afterwards, so a plain `Arc`
//!   is enough
//! - `metrics` is updated by every bridge and read by the metrics endpoints, hence
//!   `Arc<RwLock<_>>`
//! - the resolver cache and the session registry do their own locking
//!
//! Cloning `AppState` only clones `Arc`s.

use crate::bridge::{BridgeContext, BridgeReport, CloseStatus, SessionRegistry};
use crate::config::AppConfig;
use crate::tenant::{ConfigResolver, ConfigStore, RetryPolicy};
use crate::upstream::{UpstreamConnector, UpstreamSessionClient};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<BridgeMetrics>>,
    pub start_time: Instant,
    pub resolver: Arc<ConfigResolver>,
    pub registry: Arc<SessionRegistry>,
    /// Collaborators each new bridge is started with
    pub bridge: Arc<BridgeContext>,
}

/// Process-wide bridge counters.
///
/// ## Close outcomes:
/// Every connection ends in exactly one of `normal_closures`, `not_found`,
/// `service_unavailable` or `upstream_errors`, so their sum equals `connections`
/// once all bridges have finished.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BridgeMetrics {
    pub connections: u64,
    pub sessions_opened: u64,
    pub normal_closures: u64,
    pub not_found: u64,
    pub service_unavailable: u64,
    pub upstream_errors: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    /// Malformed frames plus frames lost to a full inbound queue
    pub frames_dropped: u64,
}

impl BridgeMetrics {
    /// Fold a finished bridge's counters in.
    pub fn record_bridge(&mut self, report: &BridgeReport) {
        match report.close {
            CloseStatus::Normal => self.normal_closures += 1,
            CloseStatus::NotFound => self.not_found += 1,
            CloseStatus::ServiceUnavailable => self.service_unavailable += 1,
            CloseStatus::UpstreamError => self.upstream_errors += 1,
        }
        self.frames_in += report.frames_in;
        self.frames_out += report.frames_out;
        self.frames_dropped += report.frames_dropped;
    }

    pub fn record_queue_overflow(&mut self) {
        self.frames_dropped += 1;
    }
}

impl AppState {
    /// Wire the resolver, upstream client and registry together.
    ///
    /// ## Parameters:
    /// - **store**: where tenant configuration is read from (file or Supabase)
    /// - **connector**: how upstream sessions are opened (VoiceLive in production)
    pub fn new(
        config: AppConfig,
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Self {
        let resolver = Arc::new(ConfigResolver::new(
            store,
            Duration::from_secs(config.resolver.cache_ttl_secs),
        ));
        let registry = Arc::new(SessionRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        let metrics = Arc::new(RwLock::new(BridgeMetrics::default()));
        let upstream = Arc::new(UpstreamSessionClient::new(
            connector,
            config.upstream.open_timeout(),
            config.upstream.default_model.clone(),
        ));

        let bridge = Arc::new(BridgeContext {
            resolver: resolver.clone(),
            upstream,
            registry: registry.clone(),
            metrics: metrics.clone(),
            settings: config.bridge.clone(),
            retry: RetryPolicy::from(&config.resolver),
        });

        Self {
            config: Arc::new(config),
            metrics,
            start_time: Instant::now(),
            resolver,
            registry,
            bridge,
        }
    }

    /// Copy of the counters; the lock is released before the caller serializes them.
    pub fn get_metrics_snapshot(&self) -> BridgeMetrics {
        self.metrics.read().unwrap().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(close: CloseStatus) -> BridgeReport {
        BridgeReport {
            bridge_id: None,
            close,
            reached_active: close == CloseStatus::Normal,
            frames_in: 10,
            frames_out: 4,
            frames_dropped: 1,
        }
    }

    #[test]
    fn test_record_bridge() {
        let mut metrics = BridgeMetrics::default();
        metrics.record_bridge(&report(CloseStatus::Normal));
        metrics.record_bridge(&report(CloseStatus::NotFound));
        metrics.record_queue_overflow();

        assert_eq!(metrics.normal_closures, 1);
        assert_eq!(metrics.not_found, 1);
        assert_eq!(metrics.frames_in, 20);
        assert_eq!(metrics.frames_out, 8);
        assert_eq!(metrics.frames_dropped, 3);
    }
}
