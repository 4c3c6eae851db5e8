//! # HTTP Handlers
//!
//! ## Routes:
//! - `/health`, `/api/v1/health`, `/api/v1/metrics`: see `health`
//! - `/api/v1/config`: sanitized configuration
//! - `/api/v1/cache...`: tenant cache statistics, invalidation and refresh
//! - `/ws/audio/{routing_key}`, `/bridge/{routing_key}`: the audio WebSocket

pub mod cache;
pub mod config;

pub use cache::*;
pub use config::*;

use crate::{health, websocket};
use actix_web::web;

/// Every route the service exposes. Shared by `main` and the HTTP tests.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/cache", web::get().to(cache_stats))
            .route("/cache", web::delete().to(clear_cache))
            .route("/cache/{routing_key}", web::delete().to(invalidate_key))
            .route("/cache/{routing_key}/refresh", web::post().to(refresh_key)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/ws/audio/{routing_key}", web::get().to(websocket::bridge_websocket))
    .route("/bridge/{routing_key}", web::get().to(websocket::bridge_websocket));
}
