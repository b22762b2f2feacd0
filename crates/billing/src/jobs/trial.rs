//! Trial expiration job
//!
//! Finds trial rows whose period has elapsed and that are not
//! processor-managed, and downgrades them to the free plan. The subscription
//! write is the state-defining step; the profile mirror is a required
//! follow-up (its failure is a per-row error), while notification and email
//! are best-effort.

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::jobs::{JobReport, RowAction, RowResult};
use crate::notify::{DispatcherClient, NotificationService, TemplateKind};
use crate::plans::{Plan, PlanCatalog};
use crate::profiles::ProfileService;
use crate::subscriptions::{Subscription, SUBSCRIPTION_COLUMNS};

pub struct TrialExpirationJob {
    pool: PgPool,
    catalog: PlanCatalog,
    profiles: ProfileService,
    notifications: NotificationService,
    dispatcher: DispatcherClient,
}

impl TrialExpirationJob {
    pub fn new(pool: PgPool, dispatcher: DispatcherClient) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let profiles = ProfileService::new(pool.clone());
        let notifications = NotificationService::new(pool.clone());
        Self {
            pool,
            catalog,
            profiles,
            notifications,
            dispatcher,
        }
    }

    /// Run one batch.
    ///
    /// Errors only on fatal misconfiguration (missing free plan) or a failed
    /// selection query; per-row failures are collected in the report.
    pub async fn run(&self) -> BillingResult<JobReport> {
        let now = OffsetDateTime::now_utc();

        // Missing free plan aborts the whole batch.
        let free_plan = self.catalog.free_plan().await?;

        let due: Vec<Subscription> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE status = 'trialing'
              AND current_period_end < $1
              AND stripe_subscription_id IS NULL
            ORDER BY current_period_end
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(matched = due.len(), "Trial expiration batch starting");

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for subscription in &due {
            match self.expire_row(subscription, &free_plan, now).await {
                Ok(Some(result)) => results.push(result),
                // Lost the race with an overlapping run; already handled.
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        error = %e,
                        "Failed to expire trial row"
                    );
                    errors.push(format!("user {}: {}", subscription.user_id, e));
                }
            }
        }

        let report = JobReport::from_parts(results, errors);
        tracing::info!(
            processed = report.processed,
            downgraded = report.count(RowAction::Downgraded),
            errors = report.errors.len(),
            "Trial expiration batch complete"
        );

        Ok(report)
    }

    /// Downgrade one expired trial.
    ///
    /// The guarded update narrows on `status = 'trialing'`: zero rows
    /// affected means another invocation already transitioned this row, and
    /// the row is skipped without error.
    async fn expire_row(
        &self,
        subscription: &Subscription,
        free_plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<Option<RowResult>> {
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', plan_id = $1, canceled_at = $2, updated_at = $2
            WHERE id = $3 AND status = 'trialing'
            "#,
        )
        .bind(free_plan.id)
        .bind(now)
        .bind(subscription.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        self.profiles
            .set_plan(subscription.user_id, free_plan.id)
            .await?;

        // Best-effort from here: the state-defining writes are done.
        let payload = serde_json::json!({
            "subscription_id": subscription.id,
            "plan_id": free_plan.id,
            "plan_name": free_plan.name,
        });
        if let Err(e) = self
            .notifications
            .create(
                subscription.user_id,
                "system",
                "Your trial has ended",
                "Your trial period is over and your account is now on the Free plan.",
                payload,
            )
            .await
        {
            tracing::warn!(
                user_id = %subscription.user_id,
                error = %e,
                "Failed to write trial-ended notification"
            );
        }

        match self.profiles.get(subscription.user_id).await {
            Ok(profile) => {
                let args = serde_json::json!({
                    "name": profile.display_name(),
                    "plan": free_plan.display_name,
                    "ended_at": now.unix_timestamp(),
                });
                self.dispatcher
                    .dispatch(
                        subscription.user_id,
                        TemplateKind::TrialEnded,
                        &profile.locale,
                        args,
                    )
                    .await;
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %subscription.user_id,
                    error = %e,
                    "Could not load profile for trial-ended email"
                );
            }
        }

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            "Trial expired, downgraded to free plan"
        );

        Ok(Some(RowResult {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            action: RowAction::Downgraded,
            days_left: None,
        }))
    }
}
