//! # Tenant Configuration Stores
//!
//! The resolver only needs two read paths from wherever tenants live:
//! `lookup` (routing key → tenant id, honouring active flags) and `fetch`
//! (tenant id → configuration). `FileStore` serves a local JSON document for
//! development; `SupabaseStore` (see `supabase.rs`) serves production.

use crate::error::StoreError;
use crate::tenant::model::{RoutingKey, TenantConfig, TenantId, TenantRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Read-only access to tenant mappings and configurations.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Active tenant mapped to this routing key, if any.
    ///
    /// Inactive mappings and inactive tenants both yield `Ok(None)`.
    async fn lookup(&self, key: &RoutingKey) -> Result<Option<TenantId>, StoreError>;

    /// Configuration record for a tenant, if one exists.
    async fn fetch(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, StoreError>;
}

#[derive(Debug, Deserialize)]
struct RouteEntry {
    tenant_id: TenantId,
    #[serde(default = "default_true")]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct TenantEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    config: Option<TenantRecord>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct TenantsDocument {
    #[serde(default)]
    routes: HashMap<String, RouteEntry>,
    #[serde(default)]
    tenants: HashMap<TenantId, TenantEntry>,
}

/// Tenants defined in a JSON document, loaded once.
///
/// ```json
/// {
///   "routes":  { "+5511999990001": { "tenant_id": "clinica", "active": true } },
///   "tenants": { "clinica": { "name": "Clínica", "active": true,
///                             "config": { "voice": "pt-BR-FranciscaNeural" } } }
/// }
/// ```
pub struct FileStore {
    routes: HashMap<String, RouteEntry>,
    tenants: HashMap<TenantId, TenantEntry>,
}

impl FileStore {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read tenants file {}: {}", path.display(), e))?;
        let store = Self::from_json(&raw)?;
        info!(
            path = %path.display(),
            routes = store.routes.len(),
            tenants = store.tenants.len(),
            "Loaded tenant configuration file"
        );
        Ok(store)
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let document: TenantsDocument = serde_json::from_str(raw)?;
        Ok(Self {
            routes: document.routes,
            tenants: document.tenants,
        })
    }
}

#[async_trait]
impl ConfigStore for FileStore {
    async fn lookup(&self, key: &RoutingKey) -> Result<Option<TenantId>, StoreError> {
        let Some(route) = self.routes.get(key.as_str()).filter(|r| r.active) else {
            return Ok(None);
        };
        let tenant_active = self
            .tenants
            .get(&route.tenant_id)
            .map(|t| t.active)
            .unwrap_or(false);
        Ok(tenant_active.then(|| route.tenant_id.clone()))
    }

    async fn fetch(&self, tenant: &TenantId) -> Result<Option<TenantConfig>, StoreError> {
        Ok(self.tenants.get(tenant).and_then(|entry| {
            entry.config.clone().map(|record| {
                debug!(tenant = %tenant, name = ?entry.name, "Tenant config read from file");
                record.into_config(entry.active)
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "routes": {
            "+5511999990001": { "tenant_id": "clinica" },
            "+5511999990002": { "tenant_id": "clinica", "active": false },
            "+5511999990003": { "tenant_id": "dormant" },
            "+5511999990004": { "tenant_id": "bare" }
        },
        "tenants": {
            "clinica": { "name": "Clínica", "config": { "voice": "pt-BR-FranciscaNeural" } },
            "dormant": { "active": false, "config": {} },
            "bare": { "name": "No config yet" }
        }
    }"#;

    fn key(raw: &str) -> RoutingKey {
        RoutingKey::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_active_route_resolves() {
        let store = FileStore::from_json(DOC).unwrap();
        let tenant = store.lookup(&key("+5511999990001")).await.unwrap().unwrap();
        assert_eq!(tenant, TenantId("clinica".into()));

        let config = store.fetch(&tenant).await.unwrap().unwrap();
        assert_eq!(config.voice.name, "pt-BR-FranciscaNeural");
        assert!(config.active);
    }

    #[tokio::test]
    async fn test_inactive_route_or_tenant_is_hidden() {
        let store = FileStore::from_json(DOC).unwrap();
        assert!(store.lookup(&key("+5511999990002")).await.unwrap().is_none());
        assert!(store.lookup(&key("+5511999990003")).await.unwrap().is_none());
        assert!(store.lookup(&key("+5500000000000")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tenant_without_config() {
        let store = FileStore::from_json(DOC).unwrap();
        let tenant = store.lookup(&key("+5511999990004")).await.unwrap().unwrap();
        assert!(store.fetch(&tenant).await.unwrap().is_none());
    }

    #[test]
    fn test_invalid_document_is_rejected() {
        assert!(FileStore::from_json("{ \"routes\": [] }").is_err());
    }
}
