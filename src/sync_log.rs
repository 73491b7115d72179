use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Keys stripped from stored request snapshots. Matched case-insensitively
/// at every nesting level.
const SECRET_FIELDS: &[&str] = &[
    "api_key",
    "token",
    "access_token",
    "refresh_token",
    "client_secret",
    "private_key",
    "authorization",
    "key",
];

/// key: sync-log-entry -> one row per adapter invocation, never mutated
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub id: Uuid,
    pub integration_id: Uuid,
    pub delivery_id: Uuid,
    pub sync_type: String,
    pub status: SyncStatus,
    pub request_payload: Value,
    pub response_payload: Option<Value>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Success => "SUCCESS",
            SyncStatus::Failed => "FAILED",
        }
    }
}

impl SyncLogEntry {
    /// Captures one adapter exchange. The request snapshot is redacted here
    /// so no caller can accidentally persist a raw credential.
    #[allow(clippy::too_many_arguments)]
    pub fn capture(
        integration_id: Uuid,
        delivery_id: Uuid,
        sync_type: &str,
        status: SyncStatus,
        request_payload: &Value,
        response_payload: Option<Value>,
        error_message: Option<String>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            integration_id,
            delivery_id,
            sync_type: sync_type.to_string(),
            status,
            request_payload: redact_secrets(request_payload),
            response_payload,
            error_message,
            started_at,
            completed_at,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Recursively replaces known secret fields with a placeholder.
pub fn redact_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, inner) in map {
                let lowered = key.to_ascii_lowercase();
                if SECRET_FIELDS.contains(&lowered.as_str()) {
                    out.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    out.insert(key.clone(), redact_secrets(inner));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_secrets).collect()),
        other => other.clone(),
    }
}

/// key: sync-recorder -> append-only persistence seam
#[async_trait]
pub trait SyncRecorder: Send + Sync {
    async fn record(&self, entry: SyncLogEntry) -> Result<()>;
}

#[derive(Clone)]
pub struct PgSyncLog {
    pool: PgPool,
}

impl PgSyncLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncRecorder for PgSyncLog {
    async fn record(&self, entry: SyncLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_logs (
                id, integration_id, delivery_id, sync_type, status,
                request_payload, response_payload, error_message,
                started_at, completed_at, duration_ms
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(entry.id)
        .bind(entry.integration_id)
        .bind(entry.delivery_id)
        .bind(&entry.sync_type)
        .bind(entry.status.as_str())
        .bind(&entry.request_payload)
        .bind(&entry.response_payload)
        .bind(&entry.error_message)
        .bind(entry.started_at)
        .bind(entry.completed_at)
        .bind(entry.duration_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn redacts_known_secret_fields_at_any_depth() {
        let payload = json!({
            "api_key": "tokko-secret",
            "contact": {
                "email": "lead@example.com",
                "Authorization": "Bearer abc",
            },
            "attempts": [{"token": "t-1", "row": 3}],
        });

        let redacted = redact_secrets(&payload);

        assert_eq!(redacted["api_key"], "[REDACTED]");
        assert_eq!(redacted["contact"]["Authorization"], "[REDACTED]");
        assert_eq!(redacted["contact"]["email"], "lead@example.com");
        assert_eq!(redacted["attempts"][0]["token"], "[REDACTED]");
        assert_eq!(redacted["attempts"][0]["row"], 3);
    }

    #[test]
    fn capture_redacts_request_and_computes_duration() {
        let started = Utc::now();
        let completed = started + chrono::Duration::milliseconds(420);
        let entry = SyncLogEntry::capture(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "crm",
            SyncStatus::Failed,
            &json!({"api_key": "raw", "name": "Jo"}),
            None,
            Some("timed out".to_string()),
            started,
            completed,
        );

        assert_eq!(entry.request_payload["api_key"], "[REDACTED]");
        assert_eq!(entry.request_payload["name"], "Jo");
        assert_eq!(entry.duration_ms(), 420);
        assert_eq!(entry.status.as_str(), "FAILED");
    }
}
