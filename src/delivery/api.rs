use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;
use crate::ledger::CreditLedgerEntry;

use super::models::ProcessOutcome;
use super::orchestrator::Orchestrator;

/// key: delivery-api -> rest endpoints
pub async fn process_delivery(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(delivery_id): Path<Uuid>,
) -> AppResult<Json<ProcessOutcome>> {
    let outcome = orchestrator.process_delivery(delivery_id).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefundResponse {
    pub delivery_id: Uuid,
    pub ledger_entry: CreditLedgerEntry,
}

pub async fn refund_delivery(
    Extension(orchestrator): Extension<Arc<Orchestrator>>,
    Path(delivery_id): Path<Uuid>,
    Json(payload): Json<RefundRequest>,
) -> AppResult<Json<RefundResponse>> {
    let actor = payload.actor.as_deref().unwrap_or("operator");
    let entry = orchestrator
        .refund_delivery(delivery_id, &payload.reason, actor)
        .await?;
    Ok(Json(RefundResponse {
        delivery_id,
        ledger_entry: entry,
    }))
}
