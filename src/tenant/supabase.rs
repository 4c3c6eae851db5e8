//! # Supabase Tenant Store
//!
//! Reads tenants through Supabase's PostgREST interface:
//!
//! - `client_sip_numbers(sip_number, client_id, active)` joined with
//!   `clients(client_id, client_name, active)` maps a routing key to a tenant
//! - `client_configurations(client_id, ...)` holds one configuration row per tenant
//!
//! Network failures, timeouts and 5xx answers are `StoreError::Unavailable` so the
//! caller can retry; undecodable bodies are `StoreError::Malformed`.

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::tenant::model::{RoutingKey, TenantConfig, TenantId, TenantRecord};
use crate::tenant::store::ConfigStore;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ClientRow {
    client_name: Option<String>,
    #[serde(default)]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct SipNumberRow {
    client_id: TenantId,
    clients: Option<ClientRow>,
}

pub struct SupabaseStore {
    http: Client,
    base_url: String,
    api_key: String,
}

impl SupabaseStore {
    pub fn new(config: &StoreConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            http,
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            api_key: config.supabase_key.clone(),
        })
    }

    /// GET a PostgREST table and decode the JSON array it returns.
    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, StoreError> {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let response = self
            .http
            .get(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{table}: {e}")))?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(StoreError::Unavailable(format!("{table}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(StoreError::Malformed(format!("{table}: HTTP {status}")));
        }

        response
            .json::<Vec<T>>()
            .await
            .map_err(|e| StoreError::Malformed(format!("{table}: {e}")))
    }
}

#[async_trait]
impl ConfigStore for SupabaseStore {
    async fn lookup(&self, key: &RoutingKey) -> Result<Option<TenantId>, StoreError> {
        let rows: Vec<SipNumberRow> = self
            .select(
                "client_sip_numbers",
                &[
                    ("select", "client_id,clients(client_id,client_name,active)".to_string()),
                    ("sip_number", format!("eq.{}", key)),
                    ("active", "eq.true".to_string()),
                ],
            )
            .await?;

        let Some(row) = rows.into_iter().next() else {
            debug!(routing_key = %key, "No active SIP mapping");
            return Ok(None);
        };

        match row.clients {
            Some(client) if client.active => {
                debug!(
                    routing_key = %key,
                    tenant = %row.client_id,
                    client_name = client.client_name.as_deref().unwrap_or("?"),
                    "SIP mapping found"
                );
                Ok(Some(row.client_id))
            }
            _ => {
                warn!(routing_key = %key, "Tenant inactive for SIP number");
                Ok(None)
            }
        }
    }

    async fn fetch(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, StoreError> {
        let rows: Vec<TenantRecord> = self
            .select(
                "client_configurations",
                &[
                    ("select", "*".to_string()),
                    ("client_id", format!("eq.{}", tenant)),
                ],
            )
            .await?;

        Ok(rows.into_iter().next().map(|record| record.into_config(true)))
    }
}
