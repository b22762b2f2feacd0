//! Subscription record store
//!
//! One state machine instance per user: at most one row outside the
//! `canceled` status. Rows are mutated only by the reconciliation jobs and by
//! the direct user/admin actions below; cancellation is a status transition,
//! never a row removal.

use serde::Serialize;
use sqlx::PgPool;
use taskdeck_shared::{BillingInterval, SubscriptionStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::payments::PaymentLedger;
use crate::plans::PlanCatalog;
use crate::profiles::ProfileService;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub user_id: Uuid,
    pub plan_id: Uuid,
    /// `trialing` | `active` | `past_due` | `canceled`
    pub status: String,
    pub current_period_start: OffsetDateTime,
    pub current_period_end: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub canceled_at: Option<OffsetDateTime>,
    /// Non-null means the processor reconciles this row; the batch jobs
    /// never touch it.
    pub stripe_subscription_id: Option<String>,
    pub last_reminder_sent_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

pub(crate) const SUBSCRIPTION_COLUMNS: &str =
    "id, user_id, plan_id, status, current_period_start, current_period_end, \
     cancel_at_period_end, canceled_at, stripe_subscription_id, last_reminder_sent_at, \
     created_at, updated_at";

impl Subscription {
    pub fn status(&self) -> Option<SubscriptionStatus> {
        self.status.parse().ok()
    }

    /// Non-terminal: still counts against the one-open-row-per-user invariant
    pub fn is_open(&self) -> bool {
        self.status().map(|s| !s.is_terminal()).unwrap_or(false)
    }

    pub fn is_processor_managed(&self) -> bool {
        self.stripe_subscription_id.is_some()
    }
}

#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    catalog: PlanCatalog,
    profiles: ProfileService,
    payments: PaymentLedger,
}

impl SubscriptionService {
    pub fn new(pool: PgPool) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let profiles = ProfileService::new(pool.clone());
        let payments = PaymentLedger::new(pool.clone());
        Self {
            pool,
            catalog,
            profiles,
            payments,
        }
    }

    /// The user's current open subscription, if any
    pub async fn find_current(&self, user_id: Uuid) -> BillingResult<Option<Subscription>> {
        let subscription: Option<Subscription> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE user_id = $1 AND status IN ('trialing', 'active', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(subscription)
    }

    /// Start a trial of a paid plan
    ///
    /// Rejected when the user already has an open subscription: the jobs
    /// depend on at most one row transitioning status per user.
    pub async fn start_trial(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        trial_days: i64,
    ) -> BillingResult<Subscription> {
        if trial_days <= 0 {
            return Err(BillingError::Invalid("trial_days must be positive".into()));
        }

        if self.find_current(user_id).await?.is_some() {
            return Err(BillingError::SubscriptionExists(user_id));
        }

        let plan = self.catalog.get(plan_id).await?;
        if !plan.is_active {
            return Err(BillingError::Invalid(format!(
                "plan '{}' is not active",
                plan.name
            )));
        }

        let now = OffsetDateTime::now_utc();
        let period_end = now + Duration::days(trial_days);

        let subscription: Subscription = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions
                (user_id, plan_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, 'trialing', $3, $4)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .bind(plan_id)
        .bind(now)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        self.profiles.set_plan(user_id, plan_id).await?;

        tracing::info!(
            user_id = %user_id,
            plan = %plan.name,
            trial_days = trial_days,
            "Trial started"
        );

        Ok(subscription)
    }

    /// Immediate purchase of a paid plan
    ///
    /// Records the period, mirrors the plan onto the profile, and appends a
    /// row to the payment ledger.
    pub async fn purchase(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        interval: BillingInterval,
    ) -> BillingResult<Subscription> {
        if self.find_current(user_id).await?.is_some() {
            return Err(BillingError::SubscriptionExists(user_id));
        }

        let plan = self.catalog.get(plan_id).await?;
        if !plan.is_active {
            return Err(BillingError::Invalid(format!(
                "plan '{}' is not active",
                plan.name
            )));
        }

        let (amount_cents, period_days) = match interval {
            BillingInterval::Monthly => (plan.price_monthly_cents, 30),
            BillingInterval::Yearly => (plan.price_yearly_cents, 365),
        };

        let now = OffsetDateTime::now_utc();
        let period_end = now + Duration::days(period_days);

        let subscription: Subscription = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions
                (user_id, plan_id, status, current_period_start, current_period_end)
            VALUES ($1, $2, 'active', $3, $4)
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .bind(plan_id)
        .bind(now)
        .bind(period_end)
        .fetch_one(&self.pool)
        .await?;

        self.profiles.set_plan(user_id, plan_id).await?;

        if amount_cents > 0 {
            self.payments
                .record(
                    user_id,
                    amount_cents,
                    "usd",
                    "succeeded",
                    &format!("{} plan ({})", plan.display_name, interval.as_str()),
                )
                .await?;
        }

        tracing::info!(
            user_id = %user_id,
            plan = %plan.name,
            interval = %interval.as_str(),
            amount_cents = amount_cents,
            "Plan purchased"
        );

        Ok(subscription)
    }

    /// Flag the open subscription to end at the period boundary
    pub async fn cancel_at_period_end(&self, user_id: Uuid) -> BillingResult<Subscription> {
        let subscription: Option<Subscription> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = true, updated_at = NOW()
            WHERE user_id = $1 AND status IN ('trialing', 'active', 'past_due')
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let subscription = subscription.ok_or(BillingError::SubscriptionNotFound(user_id))?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Cancellation scheduled for period end"
        );

        Ok(subscription)
    }

    /// Undo a scheduled cancellation while the period is still running
    pub async fn reactivate(&self, user_id: Uuid) -> BillingResult<Subscription> {
        let subscription: Option<Subscription> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET cancel_at_period_end = false, updated_at = NOW()
            WHERE user_id = $1
              AND status IN ('trialing', 'active', 'past_due')
              AND cancel_at_period_end = true
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let subscription = subscription.ok_or(BillingError::SubscriptionNotFound(user_id))?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            "Scheduled cancellation removed"
        );

        Ok(subscription)
    }

    /// Grant a trial on behalf of a user (admin action)
    pub async fn admin_grant_trial(
        &self,
        user_id: Uuid,
        plan_id: Uuid,
        trial_days: i64,
        granted_by: Uuid,
    ) -> BillingResult<Subscription> {
        let subscription = self.start_trial(user_id, plan_id, trial_days).await?;

        tracing::info!(
            user_id = %user_id,
            granted_by = %granted_by,
            subscription_id = %subscription.id,
            "Admin granted trial"
        );

        Ok(subscription)
    }
}
