//! # VoiceLive Bridge - Main Application Entry Point
//!
//! Multi-tenant bridge between telephony audio clients and the Azure VoiceLive realtime
//! speech API. Each inbound WebSocket is routed by its routing key (the dialed number) to
//! a tenant configuration, which shapes the upstream session it is bridged to.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, optional file, environment)
//! - **tenant**: tenant model, configuration stores and the caching `ConfigResolver`
//! - **upstream**: realtime API protocol and the `UpstreamSessionClient`
//! - **bridge**: the per-connection `AudioBridge` and the `SessionRegistry`
//! - **websocket**: actix actor adapting client sockets to bridges
//! - **health** / **handlers**: liveness, metrics, config view and cache administration
//! - **state** / **error**: shared state and HTTP error mapping
//!
//! ## Shutdown:
//! On SIGTERM or Ctrl+C the registry stops accepting bridges and asks every live one to
//! close; the HTTP server is stopped once they are gone or the shutdown timeout passes.

mod bridge;
mod config;
mod error;
mod handlers;
mod health;
mod state;
mod tenant;
mod upstream;
mod websocket;

#[cfg(test)]
mod test_support;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::{AppConfig, ConfigSource};
use state::AppState;
use std::sync::Arc;
use tenant::{ConfigStore, FileStore, SupabaseStore};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use upstream::VoiceLiveConnector;

#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    let config = AppConfig::load()?;
    config.validate()?;
    init_tracing(&config)?;

    info!("Starting voicelive-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        environment = config.app.environment.as_str(),
        config_source = ?config.app.config_source,
        "Configuration loaded: {}:{}",
        config.server.host,
        config.server.port
    );
    if config.app.enable_local_audio {
        warn!("Local audio mode requested but not available in this build; serving WebSocket only");
    }

    let store = build_store(&config)?;
    let connector = Arc::new(VoiceLiveConnector::new(&config.upstream));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let shutdown_timeout = config.bridge.shutdown_timeout();
    let app_state = AppState::new(config, store, connector);
    let registry = app_state.registry.clone();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(handlers::routes)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining bridges...");
            let report = registry.shutdown_all(shutdown_timeout).await;
            info!(requested = report.requested, remaining = report.remaining, "Bridges drained");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` wins; otherwise this crate logs at the configured level and actix at info.
fn init_tracing(config: &AppConfig) -> Result<()> {
    let default_filter = format!(
        "voicelive_bridge={},actix_web=info",
        config.app.effective_log_level().as_str()
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_ansi(config.app.use_ansi_logs()))
        .try_init()?;

    Ok(())
}

fn build_store(config: &AppConfig) -> Result<Arc<dyn ConfigStore>> {
    match config.app.config_source {
        ConfigSource::File => Ok(Arc::new(FileStore::from_path(&config.store.tenants_file)?)),
        ConfigSource::Store => {
            info!(url = %config.store.supabase_url, "Using Supabase tenant store");
            Ok(Arc::new(SupabaseStore::new(&config.store)?))
        }
    }
}

/// Resolves on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
