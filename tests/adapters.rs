use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use httpmock::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

use leadhub::delivery::Delivery;
use leadhub::integrations::{
    AdapterError, CrmAdapter, DestinationAdapter, IntegrationStore, SheetsAdapter,
    TenantIntegration, WebhookAdapter,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemIntegrationStore {
    persisted_configs: Mutex<Vec<(Uuid, Value)>>,
    sync_marks: Mutex<Vec<(Uuid, Option<String>)>>,
}

#[async_trait]
impl IntegrationStore for MemIntegrationStore {
    async fn persist_config(&self, integration_id: Uuid, config: &Value) -> Result<()> {
        self.persisted_configs
            .lock()
            .unwrap()
            .push((integration_id, config.clone()));
        Ok(())
    }

    async fn mark_synced(
        &self,
        integration_id: Uuid,
        _at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        self.sync_marks
            .lock()
            .unwrap()
            .push((integration_id, error.map(str::to_string)));
        Ok(())
    }
}

fn sample_delivery() -> Delivery {
    Delivery {
        id: Uuid::new_v4(),
        lead_id: Uuid::new_v4(),
        lead_offer_id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        status: "PENDING".to_string(),
        payload: json!({
            "lead": {"full_name": "Ada Lovelace", "email": "ada@example.com", "phone": "+54 (911) 5555-0001"},
            "qualification": {"rooms": "3"},
            "score": {"total": 87.5, "breakdown": {"budget": 30}},
            "conversation_summary": "Wants a 3-room apartment.",
        }),
        error_message: None,
        credit_ledger_id: None,
        sheets_delivered_at: None,
        crm_delivered_at: None,
        sheets_external_id: None,
        crm_external_id: None,
        delivered_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn integration(kind: &str, config: Value) -> TenantIntegration {
    TenantIntegration {
        id: Uuid::new_v4(),
        tenant_id: Uuid::new_v4(),
        integration_type: kind.to_string(),
        config,
        is_active: true,
        last_sync_at: None,
        last_error: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// CRM adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn crm_creates_webcontact_with_normalized_phone() {
    let server = MockServer::start_async().await;
    let webcontact_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/webcontact")
            .query_param("key", "tokko-key")
            .json_body_partial(
                json!({"phone": "+549115550001", "email": "ada@example.com"}).to_string(),
            );
        then.status(200).json_body(json!({"webcontact_id": "c_123"}));
    });

    let adapter = CrmAdapter::new();
    let config = json!({"type": "crm", "api_key": "tokko-key", "base_url": server.base_url()});
    let attempt = adapter
        .deliver(&sample_delivery(), &integration("crm", config))
        .await
        .unwrap();

    webcontact_mock.assert();
    assert_eq!(attempt.external_id.as_deref(), Some("c_123"));
    // The full request including the key is snapshotted for the sync log.
    assert_eq!(attempt.request["api_key"], "tokko-key");
}

#[tokio::test]
async fn crm_treats_success_status_with_error_body_as_failure() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/webcontact");
        then.status(200)
            .json_body(json!({"status": false, "message": "duplicated contact"}));
    });

    let adapter = CrmAdapter::new();
    let config = json!({"type": "crm", "api_key": "k", "base_url": server.base_url()});
    let err = adapter
        .deliver(&sample_delivery(), &integration("crm", config))
        .await
        .unwrap_err();

    match err {
        AdapterError::Rejected { detail, .. } => assert!(detail.contains("duplicated contact")),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn crm_surfaces_http_errors_as_rejections() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/webcontact");
        then.status(401).json_body(json!({"error": "invalid key"}));
    });

    let adapter = CrmAdapter::new();
    let config = json!({"type": "crm", "api_key": "bad", "base_url": server.base_url()});
    let err = adapter
        .deliver(&sample_delivery(), &integration("crm", config))
        .await
        .unwrap_err();

    match err {
        AdapterError::Rejected { detail, .. } => assert!(detail.contains("401")),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn crm_fails_fast_on_missing_config() {
    let adapter = CrmAdapter::new();
    let config = json!({"type": "crm", "api_key": "", "base_url": "https://crm.example"});
    let err = adapter
        .deliver(&sample_delivery(), &integration("crm", config))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Configuration { .. }));
}

// ---------------------------------------------------------------------------
// Webhook adapter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn webhook_posts_payload_verbatim_with_bearer_auth() {
    let server = MockServer::start_async().await;
    let delivery = sample_delivery();
    let hook_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/hooks/leads")
            .header("authorization", "Bearer hook-token")
            .header("x-source", "leadhub")
            .json_body(delivery.payload.clone());
        then.status(200).json_body(json!({"received": true}));
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = WebhookAdapter::new(store.clone());
    let config = json!({
        "type": "webhook",
        "url": server.url("/hooks/leads"),
        "headers": {"x-source": "leadhub"},
        "auth": {"style": "bearer", "token": "hook-token"},
    });
    let row = integration("webhook", config);
    let attempt = adapter.deliver(&delivery, &row).await.unwrap();

    hook_mock.assert();
    assert!(attempt.external_id.is_none());
    assert!(!attempt.request.to_string().contains("hook-token"));

    let marks = store.sync_marks.lock().unwrap();
    assert_eq!(marks.len(), 1);
    assert_eq!(marks[0].0, row.id);
    assert!(marks[0].1.is_none());
}

#[tokio::test]
async fn webhook_api_key_auth_and_custom_method() {
    let server = MockServer::start_async().await;
    let hook_mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/hooks/leads")
            .header("x-api-key", "k-123");
        then.status(204);
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = WebhookAdapter::new(store);
    let config = json!({
        "type": "webhook",
        "url": server.url("/hooks/leads"),
        "method": "put",
        "auth": {"style": "api_key", "header": "x-api-key", "key": "k-123"},
    });
    let attempt = adapter
        .deliver(&sample_delivery(), &integration("webhook", config))
        .await
        .unwrap();

    hook_mock.assert();

    // The header name is tenant-chosen, so field-name redaction in the sync
    // log cannot catch it. The key must already be gone from the snapshot.
    assert_eq!(attempt.request["headers"]["x-api-key"], "[REDACTED]");
    assert!(!attempt.request.to_string().contains("k-123"));
}

#[tokio::test]
async fn webhook_failure_records_last_error_on_the_integration() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/hooks/leads");
        then.status(503).json_body(json!({"error": "maintenance"}));
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = WebhookAdapter::new(store.clone());
    let config = json!({"type": "webhook", "url": server.url("/hooks/leads")});
    let row = integration("webhook", config);
    let err = adapter.deliver(&sample_delivery(), &row).await.unwrap_err();

    assert!(matches!(err, AdapterError::Rejected { .. }));
    let marks = store.sync_marks.lock().unwrap();
    assert_eq!(marks.len(), 1);
    assert!(marks[0].1.as_deref().unwrap().contains("503"));
}

#[tokio::test]
async fn webhook_rejects_unknown_method_before_any_network_io() {
    let store = Arc::new(MemIntegrationStore::default());
    let adapter = WebhookAdapter::new(store);
    let config = json!({"type": "webhook", "url": "https://x.example", "method": "FLY"});
    let err = adapter
        .deliver(&sample_delivery(), &integration("webhook", config))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Configuration { .. }));
}

// ---------------------------------------------------------------------------
// Sheets adapter
// ---------------------------------------------------------------------------

fn sheets_config(server: &MockServer, expires_at: DateTime<Utc>) -> Value {
    json!({
        "type": "sheets",
        "spreadsheet_id": "sheet-1",
        "range": "Leads!A:Z",
        "oauth": {
            "access_token": "live-token",
            "refresh_token": "refresh-1",
            "client_id": "client",
            "client_secret": "secret",
            "expires_at": expires_at.to_rfc3339(),
        },
        "token_uri": server.url("/token"),
        "api_base": server.base_url(),
    })
}

#[tokio::test]
async fn sheets_appends_row_and_returns_row_number() {
    let server = MockServer::start_async().await;
    let append_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/sheet-1/values/Leads!A:Z:append")
            .query_param("valueInputOption", "USER_ENTERED")
            .header("authorization", "Bearer live-token");
        then.status(200)
            .json_body(json!({"updates": {"updatedRange": "Leads!A7:J7"}}));
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = SheetsAdapter::new(store.clone());
    let config = sheets_config(&server, Utc::now() + Duration::hours(1));
    let attempt = adapter
        .deliver(&sample_delivery(), &integration("sheets", config))
        .await
        .unwrap();

    append_mock.assert();
    assert_eq!(attempt.external_id.as_deref(), Some("7"));
    // A healthy token is used as-is, nothing to persist.
    assert!(store.persisted_configs.lock().unwrap().is_empty());
}

#[tokio::test]
async fn sheets_refreshes_token_inside_expiry_window_and_persists_it() {
    let server = MockServer::start_async().await;
    let token_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/token")
            .body_contains("grant_type=refresh_token")
            .body_contains("refresh_token=refresh-1");
        then.status(200)
            .json_body(json!({"access_token": "fresh-token", "expires_in": 3600}));
    });
    let append_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/sheet-1/values/Leads!A:Z:append")
            .header("authorization", "Bearer fresh-token");
        then.status(200)
            .json_body(json!({"updates": {"updatedRange": "Leads!A8:J8"}}));
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = SheetsAdapter::new(store.clone());
    // One minute from expiry: inside the five-minute refresh window.
    let config = sheets_config(&server, Utc::now() + Duration::minutes(1));
    let row = integration("sheets", config);
    let attempt = adapter.deliver(&sample_delivery(), &row).await.unwrap();

    token_mock.assert();
    append_mock.assert();
    assert_eq!(attempt.external_id.as_deref(), Some("8"));

    let persisted = store.persisted_configs.lock().unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].0, row.id);
    assert_eq!(persisted[0].1["oauth"]["access_token"], "fresh-token");
}

#[tokio::test]
async fn sheets_rejects_config_without_any_credentials() {
    let store = Arc::new(MemIntegrationStore::default());
    let adapter = SheetsAdapter::new(store);
    let config = json!({"type": "sheets", "spreadsheet_id": "sheet-1"});
    let err = adapter
        .deliver(&sample_delivery(), &integration("sheets", config))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::Configuration { .. }));
}

#[tokio::test]
async fn sheets_surfaces_append_rejections_with_body() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST)
            .path("/v4/spreadsheets/sheet-1/values/Leads!A:Z:append");
        then.status(403)
            .json_body(json!({"error": {"message": "insufficient permissions"}}));
    });

    let store = Arc::new(MemIntegrationStore::default());
    let adapter = SheetsAdapter::new(store);
    let config = sheets_config(&server, Utc::now() + Duration::hours(1));
    let err = adapter
        .deliver(&sample_delivery(), &integration("sheets", config))
        .await
        .unwrap_err();

    match err {
        AdapterError::Rejected { detail, .. } => {
            assert!(detail.contains("403"));
            assert!(detail.contains("insufficient permissions"));
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}
