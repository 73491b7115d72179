use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// key: delivery-status -> lifecycle
///
/// `Delivered` and `Refunded` are terminal; `Failed` re-enters `Pending`
/// when an operator retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Refunded,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
            DeliveryStatus::Refunded => "REFUNDED",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(DeliveryStatus::Pending),
            "DELIVERED" => Some(DeliveryStatus::Delivered),
            "FAILED" => Some(DeliveryStatus::Failed),
            "REFUNDED" => Some(DeliveryStatus::Refunded),
            _ => None,
        }
    }
}

/// key: delivery-model -> one handoff attempt
///
/// `payload` is frozen at creation by the qualification engine; later edits
/// to the lead never change what was (or will be) delivered.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Delivery {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub lead_offer_id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub payload: Value,
    pub error_message: Option<String>,
    pub credit_ledger_id: Option<Uuid>,
    pub sheets_delivered_at: Option<DateTime<Utc>>,
    pub crm_delivered_at: Option<DateTime<Utc>>,
    pub sheets_external_id: Option<String>,
    pub crm_external_id: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Delivery {
    pub fn status(&self) -> Option<DeliveryStatus> {
        DeliveryStatus::from_str(&self.status)
    }
}

/// Lead-offer pipeline status once a delivery lands.
pub const LEAD_OFFER_SENT_TO_DEVELOPER: &str = "SENT_TO_DEVELOPER";

/// Billing eligibility surfaced on the lead-offer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingEligibility {
    Chargeable,
    Pending,
}

impl BillingEligibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEligibility::Chargeable => "CHARGEABLE",
            BillingEligibility::Pending => "PENDING",
        }
    }
}

/// Typed view over the canonical payload for adapters that shape
/// destination-specific requests. Missing fields degrade to defaults; the
/// webhook adapter ships the raw payload and never goes through this.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryPayload {
    #[serde(default)]
    pub lead: LeadContact,
    #[serde(default)]
    pub qualification: Value,
    #[serde(default)]
    pub score: ScoreSnapshot,
    #[serde(default)]
    pub conversation_summary: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadContact {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoreSnapshot {
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub breakdown: Value,
}

impl DeliveryPayload {
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// key: delivery-outcome -> envelope returned to callers
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub delivery_id: Uuid,
    pub status: DeliveryStatus,
    pub charged: bool,
    pub balance: Option<i64>,
    pub error_message: Option<String>,
}
