//! # Configuration Management
//!
//! This module loads the bridge configuration once at startup from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional configuration file (`config.toml`, `config.json`, ...)
//! - Environment variables with the `APP_` prefix (`APP_UPSTREAM__API_KEY`)
//! - Deployment/legacy variables (`PORT`, `APP_ENV`, `AZURE_VOICELIVE_*`, `SUPABASE_*`)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (`HOST`, `PORT`, `APP_ENV`, ...)
//! 2. `APP_`-prefixed environment variables, `__` separating nested keys
//! 3. Configuration file
//! 4. Default values
//!
//! The loaded `AppConfig` is immutable. Components receive the sections they need
//! through their constructors; nothing reads environment strings after startup.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
///
/// ## Sections:
/// - `server`: where the HTTP/WebSocket listener binds
/// - `app`: environment-level switches resolved once at startup
/// - `upstream`: the realtime speech API endpoint and credentials
/// - `store`: where tenant configuration comes from
/// - `resolver`: tenant cache and retry behaviour
/// - `bridge`: per-connection relay tuning
/// - `performance`: process-wide limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub app: AppSettings,
    pub upstream: UpstreamConfig,
    pub store: StoreConfig,
    pub resolver: ResolverConfig,
    pub bridge: BridgeConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "0.0.0.0"`: accept connections from any interface (containers)
/// - `port = 8000`: default port of existing deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Deployment environment. Replaces ad-hoc string comparisons with a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

/// Log verbosity for this crate's own targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Where tenant configuration is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    /// A local JSON document (development).
    File,
    /// The Supabase tables `client_sip_numbers` / `client_configurations`.
    Store,
}

/// Application-level switches.
///
/// ## Fields:
/// - `environment`: development, staging or production
/// - `log_level`: explicit verbosity; when absent it is derived from `environment`
/// - `enable_local_audio`: request for the local microphone mode (not available in this build)
/// - `config_source`: file or store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub environment: Environment,
    pub log_level: Option<LogLevel>,
    pub enable_local_audio: bool,
    pub config_source: ConfigSource,
}

impl AppSettings {
    /// Verbosity actually used: explicit setting, else debug in development and info elsewhere.
    pub fn effective_log_level(&self) -> LogLevel {
        self.log_level.unwrap_or(match self.environment {
            Environment::Development => LogLevel::Debug,
            Environment::Staging | Environment::Production => LogLevel::Info,
        })
    }

    /// Coloured console output is only wanted on a developer terminal.
    pub fn use_ansi_logs(&self) -> bool {
        self.environment == Environment::Development
    }
}

/// Realtime speech API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Resource endpoint, e.g. `https://my-resource.services.ai.azure.com`
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    /// Model used when a tenant record does not name one
    pub default_model: String,
    /// How long `open` waits for the session acknowledgment
    pub open_timeout_ms: u64,
}

impl UpstreamConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

/// Tenant configuration store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub supabase_url: String,
    pub supabase_key: String,
    pub request_timeout_ms: u64,
    /// JSON document used when `app.config_source = "file"`
    pub tenants_file: PathBuf,
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Tenant cache and store retry settings.
///
/// ## Retry schedule:
/// Attempt `n` (1-based retry number) waits `initial_backoff_ms * 2^(n-1)`,
/// capped at `max_backoff_ms`. `max_retries = 3` means four attempts in total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    pub cache_ttl_secs: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// How outbound audio is written to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundEncoding {
    /// Base64 PCM16 in text messages (the protocol existing clients speak)
    Base64,
    /// Raw PCM16 in binary messages
    Binary,
}

/// Per-connection relay tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Inbound frames buffered between the socket and the relay; extra frames are dropped
    pub inbound_queue_frames: usize,
    /// Largest accepted inbound frame after decoding, in bytes
    pub max_frame_bytes: usize,
    /// Upper bound for the teardown path
    pub shutdown_timeout_ms: u64,
    pub heartbeat_interval_secs: u64,
    pub client_timeout_secs: u64,
    pub outbound_encoding: OutboundEncoding,
}

impl BridgeConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}

/// Process-wide limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Maximum number of simultaneous bridges
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            app: AppSettings {
                environment: Environment::Development,
                log_level: None,
                enable_local_audio: false,
                config_source: ConfigSource::File,
            },
            upstream: UpstreamConfig {
                endpoint: String::new(),
                api_key: String::new(),
                api_version: "2025-10-01".to_string(),
                default_model: "gpt-realtime".to_string(),
                open_timeout_ms: 10_000,
            },
            store: StoreConfig {
                supabase_url: String::new(),
                supabase_key: String::new(),
                request_timeout_ms: 5_000,
                tenants_file: PathBuf::from("config/tenants.json"),
            },
            resolver: ResolverConfig {
                cache_ttl_secs: 300,
                max_retries: 3,
                initial_backoff_ms: 200,
                max_backoff_ms: 2_000,
            },
            bridge: BridgeConfig {
                inbound_queue_frames: 64,
                max_frame_bytes: 64 * 1024,
                shutdown_timeout_ms: 3_000,
                heartbeat_interval_secs: 30,
                client_timeout_secs: 60,
                outbound_encoding: OutboundEncoding::Base64,
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 100,
            },
        }
    }
}

/// Deployment variables that map straight onto a config key.
const DIRECT_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("APP_ENV", "app.environment"),
    ("AZURE_VOICELIVE_ENDPOINT", "upstream.endpoint"),
    ("AZURE_VOICELIVE_API_KEY", "upstream.api_key"),
    ("AZURE_VOICELIVE_MODEL", "upstream.default_model"),
    ("SUPABASE_URL", "store.supabase_url"),
    ("SUPABASE_SERVICE_ROLE_KEY", "store.supabase_key"),
];

impl AppConfig {
    /// Load configuration from defaults, the optional `config` file and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=9000`
    /// - `APP_APP__CONFIG_SOURCE=store`
    /// - `APP_BRIDGE__OUTBOUND_ENCODING=binary`
    /// - `PORT=3000`, `APP_ENV=production`, `SUPABASE_URL=...`
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        for (var, key) in DIRECT_OVERRIDES {
            if let Ok(value) = env::var(var) {
                settings = settings.set_override(*key, value)?;
            }
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.bridge.inbound_queue_frames == 0 {
            return Err(anyhow::anyhow!("Inbound queue must hold at least one frame"));
        }

        if self.bridge.max_frame_bytes < 2 {
            return Err(anyhow::anyhow!("Max frame size must fit at least one PCM16 sample"));
        }

        if self.resolver.cache_ttl_secs == 0 {
            return Err(anyhow::anyhow!("Tenant cache TTL must be greater than 0"));
        }

        if self.resolver.initial_backoff_ms > self.resolver.max_backoff_ms {
            return Err(anyhow::anyhow!(
                "Initial backoff ({}ms) exceeds max backoff ({}ms)",
                self.resolver.initial_backoff_ms,
                self.resolver.max_backoff_ms
            ));
        }

        if self.upstream.open_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Upstream open timeout must be greater than 0"));
        }

        if self.app.config_source == ConfigSource::Store
            && (self.store.supabase_url.is_empty() || self.store.supabase_key.is_empty())
        {
            return Err(anyhow::anyhow!(
                "config_source = store requires SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY"
            ));
        }

        Ok(())
    }
}
