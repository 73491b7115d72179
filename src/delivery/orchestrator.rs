use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::integrations::adapter::{AdapterError, AdapterRegistry, DeliveryAttempt};
use crate::integrations::models::{IntegrationKind, TenantIntegration};
use crate::ledger::{CreditLedgerEntry, LedgerStore, INSUFFICIENT_CREDITS};
use crate::sync_log::{SyncLogEntry, SyncRecorder, SyncStatus};

use super::models::{
    BillingEligibility, Delivery, DeliveryStatus, ProcessOutcome, LEAD_OFFER_SENT_TO_DEVELOPER,
};
use super::store::DeliveryStore;

/// key: delivery-orchestrator -> fan-out, aggregation, settlement
///
/// All collaborators are injected; the orchestrator owns the delivery row
/// for the duration of a run and is the only writer of its lifecycle.
pub struct Orchestrator {
    store: Arc<dyn DeliveryStore>,
    ledger: Arc<dyn LedgerStore>,
    sync_log: Arc<dyn SyncRecorder>,
    adapters: AdapterRegistry,
}

struct FanoutResult {
    kind: IntegrationKind,
    outcome: Result<DeliveryAttempt, AdapterError>,
    completed_at: DateTime<Utc>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        ledger: Arc<dyn LedgerStore>,
        sync_log: Arc<dyn SyncRecorder>,
        adapters: AdapterRegistry,
    ) -> Self {
        Self {
            store,
            ledger,
            sync_log,
            adapters,
        }
    }

    pub async fn process_delivery(&self, delivery_id: Uuid) -> AppResult<ProcessOutcome> {
        let delivery = self
            .store
            .load_delivery(delivery_id)
            .await?
            .ok_or(AppError::NotFound)?;

        match delivery.status() {
            Some(DeliveryStatus::Pending) | Some(DeliveryStatus::Failed) => {}
            _ => {
                return Err(AppError::BadRequest(format!(
                    "delivery {delivery_id} is not processable in status {}",
                    delivery.status
                )))
            }
        }

        // Billing eligibility gate. Exhausted credits are an expected
        // outcome, visibly distinct from a destination failure.
        let balance = tokio::time::timeout(
            Duration::from_secs(*config::LEDGER_CHECK_TIMEOUT_SECS),
            self.ledger.balance(delivery.tenant_id),
        )
        .await
        .map_err(|_| AppError::Message("billing eligibility check timed out".to_string()))?
        .map_err(AppError::from)?;

        if balance < 1 {
            self.store
                .finalize_delivery(
                    delivery.id,
                    DeliveryStatus::Failed,
                    Some(INSUFFICIENT_CREDITS),
                    None,
                )
                .await?;
            self.store
                .update_lead_offer(
                    delivery.lead_offer_id,
                    None,
                    BillingEligibility::Pending,
                    "Delivery held: tenant has no remaining credits",
                )
                .await?;
            info!(%delivery_id, tenant_id = %delivery.tenant_id, "delivery held for insufficient credits");
            return Ok(ProcessOutcome {
                delivery_id: delivery.id,
                status: DeliveryStatus::Failed,
                charged: false,
                balance: Some(balance),
                error_message: Some(INSUFFICIENT_CREDITS.to_string()),
            });
        }

        let integrations = self.store.active_integrations(delivery.tenant_id).await?;

        let mut errors: Vec<String> = Vec::new();
        let mut successes = 0usize;
        let mut runnable = Vec::new();

        for integration in &integrations {
            let Some(kind) = integration.kind() else {
                errors.push(format!(
                    "{}: no adapter registered for integration type",
                    integration.integration_type
                ));
                continue;
            };
            // Destinations that already landed are skipped so a retry never
            // appends a duplicate row or contact.
            if already_delivered(&delivery, kind) {
                successes += 1;
                continue;
            }
            runnable.push((kind, integration));
        }

        let results = join_all(
            runnable
                .iter()
                .map(|(kind, integration)| self.run_adapter(&delivery, *kind, integration)),
        )
        .await;

        for result in results {
            match result.outcome {
                Ok(attempt) => {
                    self.store
                        .mark_destination_delivered(
                            delivery.id,
                            result.kind,
                            result.completed_at,
                            attempt.external_id.as_deref(),
                        )
                        .await?;
                    successes += 1;
                }
                Err(err) => {
                    errors.push(format!("{}: {err}", result.kind.as_str()));
                }
            }
        }

        let all_succeeded = errors.is_empty() && (successes >= 1 || integrations.is_empty());

        if !all_succeeded {
            let message = errors.join("; ");
            self.store
                .finalize_delivery(delivery.id, DeliveryStatus::Failed, Some(&message), None)
                .await?;
            warn!(%delivery_id, error = %message, "delivery failed, credit not consumed");
            return Ok(ProcessOutcome {
                delivery_id: delivery.id,
                status: DeliveryStatus::Failed,
                charged: false,
                balance: Some(balance),
                error_message: Some(message),
            });
        }

        self.settle(&delivery, balance).await
    }

    /// Settlement runs strictly after every adapter outcome is known;
    /// credit is never consumed speculatively.
    async fn settle(&self, delivery: &Delivery, balance_before: i64) -> AppResult<ProcessOutcome> {
        let consume = self
            .ledger
            .consume_credit(
                delivery.tenant_id,
                delivery.id,
                delivery.lead_offer_id,
                &format!("Lead delivery {}", delivery.id),
            )
            .await;

        let failure = match consume {
            Ok(outcome) if outcome.charged => {
                let ledger_id = outcome
                    .ledger_id
                    .ok_or_else(|| AppError::Message("ledger charge returned no entry id".into()))?;
                let delivered_at = Utc::now();
                self.store
                    .finalize_delivery(
                        delivery.id,
                        DeliveryStatus::Delivered,
                        None,
                        Some(delivered_at),
                    )
                    .await?;
                self.store.set_credit_ledger(delivery.id, ledger_id).await?;
                self.store
                    .update_lead_offer(
                        delivery.lead_offer_id,
                        Some(LEAD_OFFER_SENT_TO_DEVELOPER),
                        BillingEligibility::Chargeable,
                        "Lead delivered and charged",
                    )
                    .await?;
                self.store
                    .record_audit_event(
                        delivery.tenant_id,
                        "delivery.completed",
                        json!({
                            "delivery_id": delivery.id,
                            "lead_id": delivery.lead_id,
                            "credit_ledger_id": ledger_id,
                            "balance_after": outcome.balance,
                        }),
                    )
                    .await?;
                info!(
                    delivery_id = %delivery.id,
                    tenant_id = %delivery.tenant_id,
                    balance_after = outcome.balance,
                    "delivery settled"
                );
                return Ok(ProcessOutcome {
                    delivery_id: delivery.id,
                    status: DeliveryStatus::Delivered,
                    charged: true,
                    balance: Some(outcome.balance),
                    error_message: None,
                });
            }
            Ok(outcome) => outcome
                .message
                .unwrap_or_else(|| INSUFFICIENT_CREDITS.to_string()),
            Err(err) => err.to_string(),
        };

        // Destinations already received the lead but billing did not land.
        // There is no general way to undo an external delivery, so the row
        // is rolled back to FAILED and surfaced for manual reconciliation.
        error!(
            delivery_id = %delivery.id,
            tenant_id = %delivery.tenant_id,
            balance_before,
            error = %failure,
            "ledger inconsistency: delivery succeeded externally but credit settlement failed"
        );
        self.store
            .finalize_delivery(delivery.id, DeliveryStatus::Failed, Some(&failure), None)
            .await?;
        self.store
            .update_lead_offer(
                delivery.lead_offer_id,
                None,
                BillingEligibility::Pending,
                "Delivery completed externally but was not charged",
            )
            .await?;
        Ok(ProcessOutcome {
            delivery_id: delivery.id,
            status: DeliveryStatus::Failed,
            charged: false,
            balance: None,
            error_message: Some(failure),
        })
    }

    /// One adapter call: bounded by its own timeout so a hung destination
    /// cannot stall or cancel its siblings, and always sync-logged.
    async fn run_adapter(
        &self,
        delivery: &Delivery,
        kind: IntegrationKind,
        integration: &TenantIntegration,
    ) -> FanoutResult {
        let started_at = Utc::now();
        let timeout = Duration::from_secs(*config::ADAPTER_TIMEOUT_SECS);

        let outcome = match self.adapters.get(kind) {
            None => Err(AdapterError::configuration(format!(
                "no adapter registered for {}",
                kind.as_str()
            ))),
            Some(adapter) => {
                match tokio::time::timeout(timeout, adapter.deliver(delivery, integration)).await {
                    Ok(result) => result,
                    Err(_) => Err(AdapterError::Transport {
                        detail: format!("timed out after {}s", timeout.as_secs()),
                        request: None,
                    }),
                }
            }
        };
        let completed_at = Utc::now();

        let entry = match &outcome {
            Ok(attempt) => SyncLogEntry::capture(
                integration.id,
                delivery.id,
                kind.as_str(),
                SyncStatus::Success,
                &attempt.request,
                attempt.response.clone(),
                None,
                started_at,
                completed_at,
            ),
            Err(err) => SyncLogEntry::capture(
                integration.id,
                delivery.id,
                kind.as_str(),
                SyncStatus::Failed,
                err.request_snapshot().unwrap_or(&Value::Null),
                err.response_snapshot().cloned(),
                Some(err.to_string()),
                started_at,
                completed_at,
            ),
        };
        if let Err(err) = self.sync_log.record(entry).await {
            warn!(?err, delivery_id = %delivery.id, sync_type = kind.as_str(), "failed to persist sync log entry");
        }

        FanoutResult {
            kind,
            outcome,
            completed_at,
        }
    }

    /// Compensating refund for a delivered lead that later proved invalid.
    /// The ledger flips the delivery to REFUNDED atomically with the refund
    /// row; this method only layers the lead-offer and audit side effects.
    pub async fn refund_delivery(
        &self,
        delivery_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> AppResult<CreditLedgerEntry> {
        let delivery = self
            .store
            .load_delivery(delivery_id)
            .await?
            .ok_or(AppError::NotFound)?;

        if delivery.status() == Some(DeliveryStatus::Refunded) {
            return Err(AppError::AlreadyRefunded);
        }

        let entry = self
            .ledger
            .refund_credit(
                delivery.tenant_id,
                delivery.id,
                delivery.lead_offer_id,
                reason,
                actor,
            )
            .await?;

        self.store
            .update_lead_offer(
                delivery.lead_offer_id,
                None,
                BillingEligibility::Pending,
                &format!("Delivery refunded: {reason}"),
            )
            .await?;
        self.store
            .record_audit_event(
                delivery.tenant_id,
                "delivery.refunded",
                json!({
                    "delivery_id": delivery.id,
                    "lead_id": delivery.lead_id,
                    "credit_ledger_id": entry.id,
                    "reason": reason,
                    "actor": actor,
                }),
            )
            .await?;
        info!(%delivery_id, reason, actor, "delivery refunded");

        Ok(entry)
    }
}

fn already_delivered(delivery: &Delivery, kind: IntegrationKind) -> bool {
    match kind {
        IntegrationKind::Sheets => delivery.sheets_delivered_at.is_some(),
        IntegrationKind::Crm => delivery.crm_delivered_at.is_some(),
        IntegrationKind::Webhook => false,
    }
}
