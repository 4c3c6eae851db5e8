//! # Health and Metrics Endpoints
//!
//! - `GET /health`, `GET /api/v1/health`: liveness plus a short summary for load balancers
//!   and dashboards. Reports `draining` once shutdown has started.
//! - `GET /api/v1/metrics`: full bridge counters, registry state and tenant cache stats.

use crate::state::{AppState, BridgeMetrics};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let registry = state.registry.summary();

    let status = if state.registry.is_draining() {
        "draining"
    } else {
        "healthy"
    };

    HttpResponse::Ok().json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "environment": config.app.environment.as_str(),
            "host": config.server.host,
            "port": config.server.port
        },
        "modes": {
            "websocket": true,
            "local_audio": {
                "requested": config.app.enable_local_audio,
                "available": false
            }
        },
        "bridges": {
            "active": registry.active_bridges,
            "max": registry.max_bridges,
            "draining": registry.draining
        },
        "tenant_cache": state.resolver.cache_stats(),
        "metrics": {
            "connections": metrics.connections,
            "sessions_opened": metrics.sessions_opened,
            "failure_rate": failure_rate(&metrics)
        },
        "system": get_system_status(registry.active_bridges, registry.max_bridges)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let registry = state.registry.summary();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "bridges": metrics,
        "closures": {
            "normal": metrics.normal_closures,
            "not_found": metrics.not_found,
            "service_unavailable": metrics.service_unavailable,
            "upstream_error": metrics.upstream_errors,
            "failure_rate": failure_rate(&metrics)
        },
        "throughput": {
            "connections_per_minute": if uptime_seconds > 0 {
                metrics.connections as f64 * 60.0 / uptime_seconds as f64
            } else {
                0.0
            },
            "frames_in": metrics.frames_in,
            "frames_out": metrics.frames_out,
            "frames_dropped": metrics.frames_dropped
        },
        "registry": registry,
        "tenant_cache": state.resolver.cache_stats(),
        "performance": {
            "max_concurrent_sessions": state.config.performance.max_concurrent_sessions,
            "inbound_queue_frames": state.config.bridge.inbound_queue_frames
        }
    }))
}

/// Share of finished connections that did not end with a normal closure.
fn failure_rate(metrics: &BridgeMetrics) -> f64 {
    let failed = metrics.not_found + metrics.service_unavailable + metrics.upstream_errors;
    let finished = failed + metrics.normal_closures;
    if finished > 0 {
        failed as f64 / finished as f64
    } else {
        0.0
    }
}

fn get_system_status(active: usize, max: usize) -> serde_json::Value {
    let usage = if max > 0 {
        active as f64 / max as f64
    } else {
        0.0
    };

    let status = if usage > 0.9 {
        "high_load"
    } else if usage > 0.7 {
        "moderate_load"
    } else {
        "normal"
    };

    json!({
        "status": status,
        "session_usage_percent": (usage * 100.0).round(),
        "load_warnings": if usage > 0.8 {
            vec!["High bridge usage - consider increasing max_concurrent_sessions"]
        } else {
            vec![]
        }
    })
}
