//! Renewal-or-downgrade job
//!
//! Finds paid rows whose period has elapsed and that are not
//! processor-managed. Each row gets at most one charge attempt per run: on
//! success the processor takes ownership of the row (its external id moves
//! it out of every batch predicate), on any charge failure or missing
//! prerequisites the row is downgraded to the free plan. A row whose period
//! has lapsed is never left open.

use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::jobs::{JobReport, RowAction, RowResult};
use crate::notify::{DispatcherClient, NotificationService, TemplateKind};
use crate::payments::PaymentLedger;
use crate::plans::{Plan, PlanCatalog};
use crate::processor::{ProcessorClient, RenewalOutcome};
use crate::profiles::{Profile, ProfileService};
use crate::subscriptions::{Subscription, SUBSCRIPTION_COLUMNS};

/// What to do with one elapsed row — decided before any I/O side effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalDecision {
    /// Both a stored payment method and a processor price exist
    AttemptCharge {
        customer_ref: String,
        payment_method: String,
        price_ref: String,
    },
    /// Missing prerequisites or user opted out; no charge attempt
    Downgrade { reason: &'static str },
}

/// Pure decision function for the renewal path.
///
/// A row flagged `cancel_at_period_end` is never charged. Otherwise a charge
/// is attempted only when the profile stores a customer + payment method and
/// the plan carries a monthly processor price.
pub fn decide_renewal(
    subscription: &Subscription,
    profile: &Profile,
    plan: &Plan,
) -> RenewalDecision {
    if subscription.cancel_at_period_end {
        return RenewalDecision::Downgrade {
            reason: "cancellation requested at period end",
        };
    }

    let (Some(customer_ref), Some(payment_method)) = (
        profile.stripe_customer_id.as_deref(),
        profile.payment_method_id.as_deref(),
    ) else {
        return RenewalDecision::Downgrade {
            reason: "no stored payment method",
        };
    };

    let Some(price_ref) = plan.stripe_price_monthly.as_deref() else {
        return RenewalDecision::Downgrade {
            reason: "plan has no processor price",
        };
    };

    RenewalDecision::AttemptCharge {
        customer_ref: customer_ref.to_string(),
        payment_method: payment_method.to_string(),
        price_ref: price_ref.to_string(),
    }
}

pub struct RenewalJob {
    pool: PgPool,
    catalog: PlanCatalog,
    profiles: ProfileService,
    payments: PaymentLedger,
    notifications: NotificationService,
    processor: ProcessorClient,
    dispatcher: DispatcherClient,
}

impl RenewalJob {
    pub fn new(pool: PgPool, processor: ProcessorClient, dispatcher: DispatcherClient) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let profiles = ProfileService::new(pool.clone());
        let payments = PaymentLedger::new(pool.clone());
        let notifications = NotificationService::new(pool.clone());
        Self {
            pool,
            catalog,
            profiles,
            payments,
            notifications,
            processor,
            dispatcher,
        }
    }

    pub async fn run(&self) -> BillingResult<JobReport> {
        let now = OffsetDateTime::now_utc();

        let free_plan = self.catalog.free_plan().await?;

        let due: Vec<Subscription> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE status IN ('active', 'trialing')
              AND current_period_end < $1
              AND stripe_subscription_id IS NULL
            ORDER BY current_period_end
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(matched = due.len(), "Renewal batch starting");

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for subscription in &due {
            match self.process_row(subscription, &free_plan, now).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        error = %e,
                        "Failed to process renewal row"
                    );
                    errors.push(format!("user {}: {}", subscription.user_id, e));
                }
            }
        }

        let report = JobReport::from_parts(results, errors);
        tracing::info!(
            processed = report.processed,
            charged = report.count(RowAction::Charged),
            downgraded = report.count(RowAction::Downgraded),
            errors = report.errors.len(),
            "Renewal batch complete"
        );

        Ok(report)
    }

    async fn process_row(
        &self,
        subscription: &Subscription,
        free_plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<Option<RowResult>> {
        let profile = self.profiles.get(subscription.user_id).await?;
        let plan = self.catalog.get(subscription.plan_id).await?;

        match decide_renewal(subscription, &profile, &plan) {
            RenewalDecision::AttemptCharge {
                customer_ref,
                payment_method,
                price_ref,
            } => {
                let outcome = self
                    .processor
                    .create_renewal(&customer_ref, &payment_method, &price_ref)
                    .await?;

                match outcome {
                    RenewalOutcome::Renewed {
                        external_subscription_id,
                        period_start,
                        period_end,
                    } => {
                        self.record_renewal(
                            subscription,
                            &plan,
                            &external_subscription_id,
                            period_start,
                            period_end,
                            now,
                        )
                        .await
                    }
                    RenewalOutcome::Declined { reason } => {
                        // Expected business outcome, not an error.
                        tracing::info!(
                            subscription_id = %subscription.id,
                            user_id = %subscription.user_id,
                            reason = %reason,
                            "Renewal charge declined, downgrading"
                        );
                        self.downgrade_row(subscription, &profile, free_plan, now)
                            .await
                    }
                }
            }
            RenewalDecision::Downgrade { reason } => {
                tracing::info!(
                    subscription_id = %subscription.id,
                    user_id = %subscription.user_id,
                    reason = reason,
                    "No renewal attempt, downgrading"
                );
                self.downgrade_row(subscription, &profile, free_plan, now)
                    .await
            }
        }
    }

    /// Persist a successful renewal. The non-null external id moves the row
    /// out of scope of all future batch runs.
    async fn record_renewal(
        &self,
        subscription: &Subscription,
        plan: &Plan,
        external_subscription_id: &str,
        period_start: OffsetDateTime,
        period_end: OffsetDateTime,
        now: OffsetDateTime,
    ) -> BillingResult<Option<RowResult>> {
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                stripe_subscription_id = $1,
                current_period_start = $2,
                current_period_end = $3,
                updated_at = $4
            WHERE id = $5
              AND status IN ('active', 'trialing')
              AND stripe_subscription_id IS NULL
            "#,
        )
        .bind(external_subscription_id)
        .bind(period_start)
        .bind(period_end)
        .bind(now)
        .bind(subscription.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            // The charge went through but an overlapping run changed the row
            // first. Surface loudly; reconciliation is manual here.
            tracing::warn!(
                subscription_id = %subscription.id,
                external_subscription_id = %external_subscription_id,
                "Renewal charged but row was already transitioned by another run"
            );
            return Ok(None);
        }

        self.payments
            .record(
                subscription.user_id,
                plan.price_monthly_cents,
                "usd",
                "succeeded",
                &format!("{} plan renewal", plan.display_name),
            )
            .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            external_subscription_id = %external_subscription_id,
            "Subscription renewed via processor"
        );

        Ok(Some(RowResult {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            action: RowAction::Charged,
            days_left: None,
        }))
    }

    /// Downgrade path shared by declines, missing payment methods, and
    /// requested cancellations.
    async fn downgrade_row(
        &self,
        subscription: &Subscription,
        profile: &Profile,
        free_plan: &Plan,
        now: OffsetDateTime,
    ) -> BillingResult<Option<RowResult>> {
        let updated = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'canceled', plan_id = $1, canceled_at = $2, updated_at = $2
            WHERE id = $3
              AND status IN ('active', 'trialing')
              AND stripe_subscription_id IS NULL
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
                "Your subscription has expired",
                "We could not renew your subscription; your account is now on the Free plan.",
                payload,
            )
            .await
        {
            tracing::warn!(
                user_id = %subscription.user_id,
                error = %e,
                "Failed to write subscription-expired notification"
            );
        }

        let args = serde_json::json!({
            "name": profile.display_name(),
            "plan": free_plan.display_name,
            "expired_at": now.unix_timestamp(),
        });
        self.dispatcher
            .dispatch(
                subscription.user_id,
                TemplateKind::SubscriptionExpired,
                &profile.locale,
                args,
            )
            .await;

        Ok(Some(RowResult {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            action: RowAction::Downgraded,
            days_left: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;
    use taskdeck_shared::PlanFeatures;
    use uuid::Uuid;

    fn plan(price_ref: Option<&str>) -> Plan {
        let now = OffsetDateTime::now_utc();
        Plan {
            id: Uuid::new_v4(),
            name: "pro".to_string(),
            display_name: "Pro".to_string(),
            price_monthly_cents: 900,
            price_yearly_cents: 9000,
            max_projects: None,
            max_tasks: None,
            features: Json(PlanFeatures::all()),
            stripe_price_monthly: price_ref.map(String::from),
            stripe_price_yearly: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn profile(customer: Option<&str>, payment_method: Option<&str>) -> Profile {
        let now = OffsetDateTime::now_utc();
        Profile {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            name: Some("Test User".to_string()),
            plan_id: None,
            stripe_customer_id: customer.map(String::from),
            payment_method_id: payment_method.map(String::from),
            locale: "en".to_string(),
            role: "member".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn subscription(cancel_at_period_end: bool) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status: "active".to_string(),
            current_period_start: now - time::Duration::days(30),
            current_period_end: Some(now - time::Duration::days(1)),
            cancel_at_period_end,
            canceled_at: None,
            stripe_subscription_id: None,
            last_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn charge_attempted_with_full_prerequisites() {
        let decision = decide_renewal(
            &subscription(false),
            &profile(Some("cus_1"), Some("pm_1")),
            &plan(Some("price_1")),
        );
        assert_eq!(
            decision,
            RenewalDecision::AttemptCharge {
                customer_ref: "cus_1".to_string(),
                payment_method: "pm_1".to_string(),
                price_ref: "price_1".to_string(),
            }
        );
    }

    #[test]
    fn missing_payment_method_downgrades_without_charge() {
        let decision = decide_renewal(
            &subscription(false),
            &profile(Some("cus_1"), None),
            &plan(Some("price_1")),
        );
        assert!(matches!(decision, RenewalDecision::Downgrade { .. }));
    }

    #[test]
    fn missing_customer_downgrades_without_charge() {
        let decision = decide_renewal(
            &subscription(false),
            &profile(None, Some("pm_1")),
            &plan(Some("price_1")),
        );
        assert!(matches!(decision, RenewalDecision::Downgrade { .. }));
    }

    #[test]
    fn plan_without_processor_price_downgrades() {
        let decision = decide_renewal(
            &subscription(false),
            &profile(Some("cus_1"), Some("pm_1")),
            &plan(None),
        );
        assert!(matches!(decision, RenewalDecision::Downgrade { .. }));
    }

    #[test]
    fn requested_cancellation_is_never_charged() {
        let decision = decide_renewal(
            &subscription(true),
            &profile(Some("cus_1"), Some("pm_1")),
            &plan(Some("price_1")),
        );
        assert_eq!(
            decision,
            RenewalDecision::Downgrade {
                reason: "cancellation requested at period end"
            }
        );
    }
}
