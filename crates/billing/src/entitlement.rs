//! Entitlement resolver
//!
//! Answers "what plan and features does this user have right now?".
//!
//! `resolve_entitlement` is the single authoritative function: pure,
//! deterministic, no I/O, callable from any feature gate. An open
//! subscription row always wins over the profile's cached `plan_id` — the
//! mirror is a best-effort follow-up write and may lag behind a job run.

use serde::Serialize;
use taskdeck_shared::PlanFeatures;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::plans::{Plan, PlanCatalog, FREE_PLAN_NAME};
use crate::profiles::{Profile, ProfileService};
use crate::subscriptions::Subscription;
use crate::subscriptions::SUBSCRIPTION_COLUMNS;

/// What determined the effective plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementSource {
    /// An open subscription row
    Subscription,
    /// The profile's cached plan pointer (no open subscription)
    Profile,
    /// Neither resolved to an active plan
    FreeFallback,
}

/// The resolved, currently granted plan
#[derive(Debug, Clone, Serialize)]
pub struct EffectivePlan {
    pub plan_id: Uuid,
    pub plan_name: String,
    pub features: PlanFeatures,
    pub max_projects: Option<i32>,
    pub max_tasks: Option<i32>,
    pub source: EntitlementSource,
    pub computed_at: OffsetDateTime,
}

impl EffectivePlan {
    fn from_plan(plan: &Plan, source: EntitlementSource, now: OffsetDateTime) -> Self {
        Self {
            plan_id: plan.id,
            plan_name: plan.name.clone(),
            features: plan.features.0,
            max_projects: plan.max_projects,
            max_tasks: plan.max_tasks,
            source,
            computed_at: now,
        }
    }
}

/// Resolve the effective plan for a user.
///
/// Resolution order:
/// 1. the plan of an open (non-terminal) subscription row,
/// 2. the profile's cached `plan_id`,
/// 3. the catalog entry named `free`.
///
/// A candidate that is missing from the catalog or inactive falls through to
/// the next step. There is no feature merging: the effective feature set is
/// exactly the resolved plan's.
///
/// Errors only when the `free` plan itself is absent from the catalog, the
/// same fatal misconfiguration that aborts the batch jobs.
pub fn resolve_entitlement(
    profile: &Profile,
    subscription: Option<&Subscription>,
    catalog: &[Plan],
) -> BillingResult<EffectivePlan> {
    let now = OffsetDateTime::now_utc();

    let active_plan = |plan_id: Uuid| {
        catalog
            .iter()
            .find(|p| p.id == plan_id && p.is_active)
    };

    if let Some(sub) = subscription.filter(|s| s.is_open()) {
        if let Some(plan) = active_plan(sub.plan_id) {
            return Ok(EffectivePlan::from_plan(
                plan,
                EntitlementSource::Subscription,
                now,
            ));
        }
    }

    if let Some(plan_id) = profile.plan_id {
        if let Some(plan) = active_plan(plan_id) {
            return Ok(EffectivePlan::from_plan(plan, EntitlementSource::Profile, now));
        }
    }

    let free = catalog
        .iter()
        .find(|p| p.name == FREE_PLAN_NAME && p.is_active)
        .ok_or(BillingError::MissingFreePlan)?;

    Ok(EffectivePlan::from_plan(
        free,
        EntitlementSource::FreeFallback,
        now,
    ))
}

/// Loads the inputs and delegates to [`resolve_entitlement`]
#[derive(Clone)]
pub struct EntitlementService {
    pool: sqlx::PgPool,
    catalog: PlanCatalog,
    profiles: ProfileService,
}

impl EntitlementService {
    pub fn new(pool: sqlx::PgPool) -> Self {
        let catalog = PlanCatalog::new(pool.clone());
        let profiles = ProfileService::new(pool.clone());
        Self {
            pool,
            catalog,
            profiles,
        }
    }

    pub async fn entitlement_for(&self, user_id: Uuid) -> BillingResult<EffectivePlan> {
        let profile = self.profiles.get(user_id).await?;

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

        let catalog = self.catalog.list_active().await?;

        resolve_entitlement(&profile, subscription.as_ref(), &catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::types::Json;

    fn plan(name: &str, active: bool) -> Plan {
        let now = OffsetDateTime::now_utc();
        Plan {
            id: Uuid::new_v4(),
            name: name.to_string(),
            display_name: name.to_string(),
            price_monthly_cents: if name == "free" { 0 } else { 900 },
            price_yearly_cents: if name == "free" { 0 } else { 9000 },
            max_projects: Some(3),
            max_tasks: Some(100),
            features: Json(if name == "free" {
                PlanFeatures::default()
            } else {
                PlanFeatures::all()
            }),
            stripe_price_monthly: None,
            stripe_price_yearly: None,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    fn profile(plan_id: Option<Uuid>) -> Profile {
        let now = OffsetDateTime::now_utc();
        Profile {
            id: Uuid::new_v4(),
            email: "user@example.com".to_string(),
            name: None,
            plan_id,
            stripe_customer_id: None,
            payment_method_id: None,
            locale: "en".to_string(),
            role: "member".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn subscription(plan_id: Uuid, status: &str) -> Subscription {
        let now = OffsetDateTime::now_utc();
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id,
            status: status.to_string(),
            current_period_start: now,
            current_period_end: Some(now + time::Duration::days(30)),
            cancel_at_period_end: false,
            canceled_at: None,
            stripe_subscription_id: None,
            last_reminder_sent_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn open_subscription_wins_over_stale_profile_mirror() {
        let free = plan("free", true);
        let pro = plan("pro", true);
        let catalog = vec![free.clone(), pro.clone()];

        // Profile still points at free, but an open trial of pro exists
        let profile = profile(Some(free.id));
        let sub = subscription(pro.id, "trialing");

        let effective = resolve_entitlement(&profile, Some(&sub), &catalog).unwrap();
        assert_eq!(effective.plan_id, pro.id);
        assert_eq!(effective.source, EntitlementSource::Subscription);
    }

    #[test]
    fn canceled_subscription_defers_to_profile() {
        let free = plan("free", true);
        let pro = plan("pro", true);
        let catalog = vec![free.clone(), pro.clone()];

        let profile = profile(Some(free.id));
        let sub = subscription(pro.id, "canceled");

        let effective = resolve_entitlement(&profile, Some(&sub), &catalog).unwrap();
        assert_eq!(effective.plan_id, free.id);
        assert_eq!(effective.source, EntitlementSource::Profile);
    }

    #[test]
    fn null_plan_pointer_falls_back_to_free() {
        let free = plan("free", true);
        let catalog = vec![free.clone(), plan("pro", true)];

        let effective = resolve_entitlement(&profile(None), None, &catalog).unwrap();
        assert_eq!(effective.plan_id, free.id);
        assert_eq!(effective.source, EntitlementSource::FreeFallback);
    }

    #[test]
    fn inactive_plan_pointer_falls_back_to_free() {
        let free = plan("free", true);
        let retired = plan("legacy", false);
        let catalog = vec![free.clone(), retired.clone()];

        let effective =
            resolve_entitlement(&profile(Some(retired.id)), None, &catalog).unwrap();
        assert_eq!(effective.plan_id, free.id);
        assert_eq!(effective.source, EntitlementSource::FreeFallback);
    }

    #[test]
    fn dangling_plan_pointer_falls_back_to_free() {
        let free = plan("free", true);
        let catalog = vec![free.clone()];

        let effective =
            resolve_entitlement(&profile(Some(Uuid::new_v4())), None, &catalog).unwrap();
        assert_eq!(effective.plan_id, free.id);
        assert_eq!(effective.source, EntitlementSource::FreeFallback);
    }

    #[test]
    fn missing_free_plan_is_fatal() {
        let catalog = vec![plan("pro", true)];
        let result = resolve_entitlement(&profile(None), None, &catalog);
        assert!(matches!(result, Err(BillingError::MissingFreePlan)));
    }

    #[test]
    fn no_feature_merging_across_plans() {
        let free = plan("free", true);
        let pro = plan("pro", true);
        let catalog = vec![free.clone(), pro.clone()];

        let effective =
            resolve_entitlement(&profile(Some(free.id)), None, &catalog).unwrap();
        // Free plan's feature set exactly, nothing inherited from pro
        assert_eq!(effective.features, PlanFeatures::default());
    }
}
