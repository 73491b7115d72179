use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::error::AppError;

pub const INSUFFICIENT_CREDITS: &str = "Insufficient credits";

/// key: ledger-transaction-type -> balance-affecting events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Purchase,
    Consumption,
    Refund,
    Adjustment,
    Bonus,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Consumption => "consumption",
            TransactionType::Refund => "refund",
            TransactionType::Adjustment => "adjustment",
            TransactionType::Bonus => "bonus",
        }
    }
}

/// key: ledger-entry -> append-only billing record
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditLedgerEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub transaction_type: String,
    pub amount: i64,
    pub balance_after: i64,
    pub delivery_id: Option<Uuid>,
    pub lead_offer_id: Option<Uuid>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a consumption attempt. Running out of credits is an expected
/// business branch, so it is reported here rather than as an error.
#[derive(Debug, Clone)]
pub struct ConsumeOutcome {
    pub charged: bool,
    pub ledger_id: Option<Uuid>,
    pub balance: i64,
    pub message: Option<String>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("delivery not found")]
    NotFound,
    #[error("delivery already refunded")]
    AlreadyRefunded,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("{0}")]
    Internal(String),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::NotFound => AppError::NotFound,
            LedgerError::AlreadyRefunded => AppError::AlreadyRefunded,
            LedgerError::Db(e) => AppError::Db(e),
            LedgerError::Internal(msg) => AppError::Message(msg),
        }
    }
}

/// key: ledger-store -> atomic settlement boundary
///
/// Implementations must serialize concurrent mutation per tenant: two
/// deliveries racing for the last credit must never both charge.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn balance(&self, tenant_id: Uuid) -> Result<i64, LedgerError>;

    async fn consume_credit(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        lead_offer_id: Uuid,
        description: &str,
    ) -> Result<ConsumeOutcome, LedgerError>;

    /// Appends the refund row, restores the balance and flips the delivery
    /// to `REFUNDED` inside one transaction. The ledger row and the status
    /// change are never independently observable.
    async fn refund_credit(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        lead_offer_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<CreditLedgerEntry, LedgerError>;
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn balance(&self, tenant_id: Uuid) -> Result<i64, LedgerError> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM tenant_credit_balances WHERE tenant_id = $1")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn consume_credit(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        lead_offer_id: Uuid,
        description: &str,
    ) -> Result<ConsumeOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // Per-tenant critical section: the balance row lock is the only
        // point where concurrent deliveries for one tenant serialize.
        let row = sqlx::query(
            "SELECT balance FROM tenant_credit_balances WHERE tenant_id = $1 FOR UPDATE",
        )
        .bind(tenant_id)
        .fetch_optional(&mut tx)
        .await?;

        let balance: i64 = match row {
            Some(row) => row.get("balance"),
            None => 0,
        };

        if balance < 1 {
            tx.rollback().await?;
            return Ok(ConsumeOutcome {
                charged: false,
                ledger_id: None,
                balance,
                message: Some(INSUFFICIENT_CREDITS.to_string()),
            });
        }

        let new_balance = balance - 1;
        sqlx::query(
            "UPDATE tenant_credit_balances SET balance = $2, updated_at = NOW() WHERE tenant_id = $1",
        )
        .bind(tenant_id)
        .bind(new_balance)
        .execute(&mut tx)
        .await?;

        let ledger_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO credit_ledger (
                id, tenant_id, transaction_type, amount, balance_after,
                delivery_id, lead_offer_id, description
            ) VALUES ($1, $2, $3, -1, $4, $5, $6, $7)
            "#,
        )
        .bind(ledger_id)
        .bind(tenant_id)
        .bind(TransactionType::Consumption.as_str())
        .bind(new_balance)
        .bind(delivery_id)
        .bind(lead_offer_id)
        .bind(description)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;

        Ok(ConsumeOutcome {
            charged: true,
            ledger_id: Some(ledger_id),
            balance: new_balance,
            message: None,
        })
    }

    async fn refund_credit(
        &self,
        tenant_id: Uuid,
        delivery_id: Uuid,
        lead_offer_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<CreditLedgerEntry, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM deliveries WHERE id = $1 FOR UPDATE")
                .bind(delivery_id)
                .fetch_optional(&mut tx)
                .await?;

        match status.as_deref() {
            None => return Err(LedgerError::NotFound),
            Some("REFUNDED") => return Err(LedgerError::AlreadyRefunded),
            Some(_) => {}
        }

        let balance: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO tenant_credit_balances (tenant_id, balance)
            VALUES ($1, 1)
            ON CONFLICT (tenant_id)
            DO UPDATE SET balance = tenant_credit_balances.balance + 1, updated_at = NOW()
            RETURNING balance
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&mut tx)
        .await?;

        let entry = sqlx::query_as::<_, CreditLedgerEntry>(
            r#"
            INSERT INTO credit_ledger (
                id, tenant_id, transaction_type, amount, balance_after,
                delivery_id, lead_offer_id, description
            ) VALUES ($1, $2, $3, 1, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(TransactionType::Refund.as_str())
        .bind(balance)
        .bind(delivery_id)
        .bind(lead_offer_id)
        .bind(format!("Refund by {actor}: {reason}"))
        .fetch_one(&mut tx)
        .await?;

        sqlx::query(
            "UPDATE deliveries SET status = 'REFUNDED', updated_at = NOW() WHERE id = $1",
        )
        .bind(delivery_id)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(entry)
    }
}
