//! Read-only view of the running configuration for operators.

use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

const REDACTED: &str = "***";

/// Secret fields as `(section, key)` pairs.
const SECRET_FIELDS: &[(&str, &str)] = &[("upstream", "api_key"), ("store", "supabase_key")];

/// Running configuration with credentials masked. Unset secrets stay empty so the
/// response still shows whether they were configured.
pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let mut config = serde_json::to_value(state.config.as_ref())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    redact_secrets(&mut config);

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config
    })))
}

fn redact_secrets(config: &mut Value) {
    for (section, key) in SECRET_FIELDS {
        if let Some(field) = config.get_mut(*section).and_then(|s| s.get_mut(*key)) {
            if field.as_str().is_some_and(|value| !value.is_empty()) {
                *field = Value::String(REDACTED.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::state::AppState;
    use crate::tenant::FileStore;
    use crate::test_support::FakeConnector;
    use actix_web::{test, App};
    use std::sync::Arc;

    #[actix_web::test]
    async fn test_get_config_hides_secrets() {
        let mut config = AppConfig::default();
        config.upstream.api_key = "vl-secret".to_string();
        config.upstream.endpoint = "https://res.services.ai.azure.com".to_string();
        let state = AppState::new(
            config,
            Arc::new(FileStore::from_json(r#"{"routes":{},"tenants":{}}"#).unwrap()),
            Arc::new(FakeConnector::new()),
        );
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/v1/config", web::get().to(get_config)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/config").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["config"]["upstream"]["api_key"], "***");
        assert_eq!(body["config"]["store"]["supabase_key"], "");
        assert_eq!(
            body["config"]["upstream"]["endpoint"],
            "https://res.services.ai.azure.com"
        );
        assert!(!body.to_string().contains("vl-secret"));
    }
}
