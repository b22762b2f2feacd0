//! Billing invariants
//!
//! Runnable consistency checks for the subscription lifecycle. Each
//! invariant is a real SQL query; checks only read, never write, and can be
//! run after any job batch to verify the system is in a valid state.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// One detected inconsistency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// Users affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// System may be granting or charging incorrectly
    Critical,
    /// Data inconsistency that needs attention
    High,
    /// Potential issue, should investigate
    Medium,
    /// Minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of one full sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleOpenRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct MirrorMismatchRow {
    user_id: Uuid,
    profile_plan_id: Option<Uuid>,
    subscription_plan_id: Uuid,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingPeriodEndRow {
    sub_id: Uuid,
    user_id: Uuid,
    status: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MissingCanceledAtRow {
    sub_id: Uuid,
    user_id: Uuid,
}

pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return a summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_single_open_subscription().await?);
        violations.extend(self.check_profile_mirrors_subscription().await?);
        violations.extend(self.check_open_rows_have_period_end().await?);
        violations.extend(self.check_single_free_plan().await?);
        violations.extend(self.check_canceled_rows_have_canceled_at().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// At most one non-terminal subscription row per user. A second open row
    /// would let two jobs transition the same user concurrently.
    async fn check_single_open_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleOpenRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as sub_count
            FROM subscriptions
            WHERE status IN ('trialing', 'active', 'past_due')
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_open_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} open subscriptions (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({ "subscription_count": row.sub_count }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// The profile's cached plan must agree with the open subscription's
    /// plan. A lag here means a downgrade saga lost its follow-up write.
    async fn check_profile_mirrors_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MirrorMismatchRow> = sqlx::query_as(
            r#"
            SELECT p.id as user_id,
                   p.plan_id as profile_plan_id,
                   s.plan_id as subscription_plan_id,
                   s.status
            FROM profiles p
            JOIN subscriptions s ON s.user_id = p.id
            WHERE s.status IN ('trialing', 'active', 'past_due')
              AND p.plan_id IS DISTINCT FROM s.plan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "profile_mirrors_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: "Profile plan pointer disagrees with the open subscription"
                    .to_string(),
                context: serde_json::json!({
                    "profile_plan_id": row.profile_plan_id,
                    "subscription_plan_id": row.subscription_plan_id,
                    "subscription_status": row.status,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// `current_period_end` is required while a row is trialing or active.
    async fn check_open_rows_have_period_end(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingPeriodEndRow> = sqlx::query_as(
            r#"
            SELECT id as sub_id, user_id, status
            FROM subscriptions
            WHERE status IN ('trialing', 'active')
              AND current_period_end IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "open_rows_have_period_end".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Subscription {} is {} but has no current_period_end",
                    row.sub_id, row.status
                ),
                context: serde_json::json!({ "subscription_id": row.sub_id }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Exactly one active plan named `free`. Zero breaks every downgrade
    /// path; more than one makes the downgrade target ambiguous.
    async fn check_single_free_plan(&self) -> BillingResult<Vec<InvariantViolation>> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM plans WHERE name = 'free' AND is_active = true",
        )
        .fetch_one(&self.pool)
        .await?;

        if count == 1 {
            return Ok(Vec::new());
        }

        Ok(vec![InvariantViolation {
            invariant: "single_free_plan".to_string(),
            user_ids: Vec::new(),
            description: format!("Catalog has {} active plans named 'free' (expected 1)", count),
            context: serde_json::json!({ "free_plan_count": count }),
            severity: ViolationSeverity::Critical,
        }])
    }

    /// Canceled rows must record when they were canceled.
    async fn check_canceled_rows_have_canceled_at(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MissingCanceledAtRow> = sqlx::query_as(
            r#"
            SELECT id as sub_id, user_id
            FROM subscriptions
            WHERE status = 'canceled' AND canceled_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "canceled_rows_have_canceled_at".to_string(),
                user_ids: vec![row.user_id],
                description: format!("Subscription {} is canceled without canceled_at", row.sub_id),
                context: serde_json::json!({ "subscription_id": row.sub_id }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }
}
