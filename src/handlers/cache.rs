//! Tenant cache administration.
//!
//! Operators use these after editing a tenant in the store, so the next call picks up the
//! change without waiting for the TTL.

use crate::{error::AppError, state::AppState, tenant::RoutingKey};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn cache_stats(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "cache": state.resolver.cache_stats()
    }))
}

pub async fn clear_cache(state: web::Data<AppState>) -> HttpResponse {
    let removed = state.resolver.invalidate(None);
    HttpResponse::Ok().json(json!({
        "status": "success",
        "removed": removed,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Re-read one tenant from the store and replace its cache entry.
pub async fn refresh_key(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let key = parse_key(path.into_inner())?;
    let config = state.resolver.refresh(&key).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "routing_key": key.as_str(),
        "voice": config.voice.name,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn invalidate_key(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let key = parse_key(path.into_inner())?;
    let removed = state.resolver.invalidate(Some(&key));
    if removed == 0 {
        return Err(AppError::NotFound(format!("no cached configuration for {key}")));
    }

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "routing_key": key.as_str(),
        "removed": removed,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

fn parse_key(raw_key: String) -> Result<RoutingKey, AppError> {
    RoutingKey::parse(&raw_key)
        .ok_or_else(|| AppError::BadRequest(format!("invalid routing key: {raw_key}")))
}
