use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::integrations::models::{IntegrationKind, TenantIntegration};
use super::models::{BillingEligibility, Delivery, DeliveryStatus};

/// key: delivery-store -> persistence seam owned by the orchestrator
///
/// Everything the pipeline touches outside the ledger goes through here, so
/// tests can swap in an in-memory implementation.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn load_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>>;

    async fn active_integrations(&self, tenant_id: Uuid) -> Result<Vec<TenantIntegration>>;

    /// Records a per-destination success regardless of the aggregate
    /// outcome, so a retry skips destinations that already landed.
    async fn mark_destination_delivered(
        &self,
        delivery_id: Uuid,
        kind: IntegrationKind,
        at: DateTime<Utc>,
        external_id: Option<&str>,
    ) -> Result<()>;

    async fn finalize_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error_message: Option<&str>,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn set_credit_ledger(&self, delivery_id: Uuid, ledger_id: Uuid) -> Result<()>;

    async fn update_lead_offer(
        &self,
        lead_offer_id: Uuid,
        pipeline_status: Option<&str>,
        eligibility: BillingEligibility,
        note: &str,
    ) -> Result<()>;

    async fn record_audit_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<()>;
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn load_delivery(&self, delivery_id: Uuid) -> Result<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>("SELECT * FROM deliveries WHERE id = $1")
            .bind(delivery_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(delivery)
    }

    async fn active_integrations(&self, tenant_id: Uuid) -> Result<Vec<TenantIntegration>> {
        let integrations = sqlx::query_as::<_, TenantIntegration>(
            "SELECT * FROM tenant_integrations WHERE tenant_id = $1 AND is_active = TRUE ORDER BY created_at ASC",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(integrations)
    }

    async fn mark_destination_delivered(
        &self,
        delivery_id: Uuid,
        kind: IntegrationKind,
        at: DateTime<Utc>,
        external_id: Option<&str>,
    ) -> Result<()> {
        match kind {
            IntegrationKind::Sheets => {
                sqlx::query(
                    "UPDATE deliveries SET sheets_delivered_at = $2, sheets_external_id = COALESCE($3, sheets_external_id), updated_at = NOW() WHERE id = $1",
                )
                .bind(delivery_id)
                .bind(at)
                .bind(external_id)
                .execute(&self.pool)
                .await?;
            }
            IntegrationKind::Crm => {
                sqlx::query(
                    "UPDATE deliveries SET crm_delivered_at = $2, crm_external_id = COALESCE($3, crm_external_id), updated_at = NOW() WHERE id = $1",
                )
                .bind(delivery_id)
                .bind(at)
                .bind(external_id)
                .execute(&self.pool)
                .await?;
            }
            // Webhooks carry no per-destination completion column; the
            // integration row's last_sync_at is their only marker.
            IntegrationKind::Webhook => {}
        }
        Ok(())
    }

    async fn finalize_delivery(
        &self,
        delivery_id: Uuid,
        status: DeliveryStatus,
        error_message: Option<&str>,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deliveries
            SET status = $2,
                error_message = $3,
                delivered_at = COALESCE($4, delivered_at),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(delivery_id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(delivered_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_credit_ledger(&self, delivery_id: Uuid, ledger_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE deliveries SET credit_ledger_id = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(delivery_id)
        .bind(ledger_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_lead_offer(
        &self,
        lead_offer_id: Uuid,
        pipeline_status: Option<&str>,
        eligibility: BillingEligibility,
        note: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE lead_offers
            SET status = COALESCE($2, status),
                billing_eligibility = $3,
                billing_note = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(lead_offer_id)
        .bind(pipeline_status)
        .bind(eligibility.as_str())
        .bind(note)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_audit_event(
        &self,
        tenant_id: Uuid,
        event_type: &str,
        payload: Value,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO activity_events (id, tenant_id, event_type, payload) VALUES ($1, $2, $3, $4)",
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(event_type)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
