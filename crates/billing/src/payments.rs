//! Payment ledger
//!
//! Append-only: a row is written on every successful charge or plan
//! purchase and never mutated afterwards, except for a status correction.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub description: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct PaymentLedger {
    pool: PgPool,
}

impl PaymentLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append a ledger row
    pub async fn record(
        &self,
        user_id: Uuid,
        amount_cents: i64,
        currency: &str,
        status: &str,
        description: &str,
    ) -> BillingResult<Payment> {
        let payment: Payment = sqlx::query_as(
            r#"
            INSERT INTO payments (user_id, amount_cents, currency, status, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, amount_cents, currency, status, description, created_at
            "#,
        )
        .bind(user_id)
        .bind(amount_cents)
        .bind(currency)
        .bind(status)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            payment_id = %payment.id,
            amount_cents = amount_cents,
            "Payment recorded"
        );

        Ok(payment)
    }

    /// Status correction, the only permitted mutation
    pub async fn correct_status(&self, payment_id: Uuid, status: &str) -> BillingResult<()> {
        let updated = sqlx::query("UPDATE payments SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(payment_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(BillingError::NotFound(format!("payment {}", payment_id)));
        }

        tracing::warn!(payment_id = %payment_id, status = %status, "Payment status corrected");
        Ok(())
    }
}
