use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::delivery::models::Delivery;
use super::models::{IntegrationKind, TenantIntegration};

/// key: adapter-error -> per-destination failure taxonomy
///
/// `Configuration` is fatal for the destination until the tenant fixes the
/// integration; `Transport` and `Rejected` are retriable. Snapshots ride
/// along so failures are sync-logged with the same fidelity as successes.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("configuration error: {detail}")]
    Configuration { detail: String },
    #[error("transport error: {detail}")]
    Transport {
        detail: String,
        request: Option<Value>,
    },
    #[error("destination rejected request: {detail}")]
    Rejected {
        detail: String,
        request: Option<Value>,
        response: Option<Value>,
    },
}

impl AdapterError {
    pub fn configuration(detail: impl Into<String>) -> Self {
        AdapterError::Configuration {
            detail: detail.into(),
        }
    }

    pub fn request_snapshot(&self) -> Option<&Value> {
        match self {
            AdapterError::Configuration { .. } => None,
            AdapterError::Transport { request, .. } => request.as_ref(),
            AdapterError::Rejected { request, .. } => request.as_ref(),
        }
    }

    pub fn response_snapshot(&self) -> Option<&Value> {
        match self {
            AdapterError::Rejected { response, .. } => response.as_ref(),
            _ => None,
        }
    }
}

/// Outcome of one successful adapter invocation. The request/response
/// snapshots feed the sync log; `external_id` is whatever identifier the
/// destination assigned (row number, contact id), if any.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub external_id: Option<String>,
    pub request: Value,
    pub response: Option<Value>,
}

/// key: destination-adapter -> uniform delivery contract
#[async_trait]
pub trait DestinationAdapter: Send + Sync {
    fn kind(&self) -> IntegrationKind;

    async fn deliver(
        &self,
        delivery: &Delivery,
        integration: &TenantIntegration,
    ) -> Result<DeliveryAttempt, AdapterError>;
}

/// Adapter lookup table handed to the orchestrator. Unknown integration
/// kinds simply have no entry and are reported as configuration failures.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<IntegrationKind, Arc<dyn DestinationAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn DestinationAdapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: IntegrationKind) -> Option<Arc<dyn DestinationAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

/// Writeback seam adapters use to persist refreshed credentials and sync
/// markers onto the integration row they were invoked with.
#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn persist_config(&self, integration_id: Uuid, config: &Value) -> Result<()>;

    async fn mark_synced(
        &self,
        integration_id: Uuid,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct PgIntegrationStore {
    pool: PgPool,
}

impl PgIntegrationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IntegrationStore for PgIntegrationStore {
    async fn persist_config(&self, integration_id: Uuid, config: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE tenant_integrations SET config = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(integration_id)
        .bind(config)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_synced(
        &self,
        integration_id: Uuid,
        at: DateTime<Utc>,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tenant_integrations SET last_sync_at = $2, last_error = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(integration_id)
        .bind(at)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
