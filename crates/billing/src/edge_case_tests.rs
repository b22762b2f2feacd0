// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Subscription Lifecycle
//!
//! Cross-cutting boundary conditions that span more than one module:
//! - Entitlement after each job transition
//! - Renewal decision interplay with charge outcomes
//! - Reminder window disjointness across consecutive days
//! - Status and feature-set boundaries

use sqlx::types::Json;
use taskdeck_shared::{PlanFeature, PlanFeatures, SubscriptionStatus};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::entitlement::{resolve_entitlement, EntitlementSource};
use crate::plans::Plan;
use crate::profiles::Profile;
use crate::subscriptions::Subscription;

fn plan(name: &str, features: PlanFeatures) -> Plan {
    let now = OffsetDateTime::now_utc();
    Plan {
        id: Uuid::new_v4(),
        name: name.to_string(),
        display_name: name.to_string(),
        price_monthly_cents: if name == "free" { 0 } else { 900 },
        price_yearly_cents: if name == "free" { 0 } else { 9000 },
        max_projects: if name == "free" { Some(3) } else { None },
        max_tasks: if name == "free" { Some(100) } else { None },
        features: Json(features),
        stripe_price_monthly: None,
        stripe_price_yearly: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn profile(plan_id: Option<Uuid>, payment_method: bool) -> Profile {
    let now = OffsetDateTime::now_utc();
    Profile {
        id: Uuid::new_v4(),
        email: "user@example.com".to_string(),
        name: Some("Test User".to_string()),
        plan_id,
        stripe_customer_id: payment_method.then(|| "cus_1".to_string()),
        payment_method_id: payment_method.then(|| "pm_1".to_string()),
        locale: "en".to_string(),
        role: "member".to_string(),
        created_at: now,
        updated_at: now,
    }
}

fn subscription(plan_id: Uuid, status: &str, period_end: OffsetDateTime) -> Subscription {
    let now = OffsetDateTime::now_utc();
    Subscription {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        plan_id,
        status: status.to_string(),
        current_period_start: period_end - Duration::days(30),
        current_period_end: Some(period_end),
        cancel_at_period_end: false,
        canceled_at: None,
        stripe_subscription_id: None,
        last_reminder_sent_at: None,
        created_at: now,
        updated_at: now,
    }
}

mod trial_expiry_entitlement {
    use super::*;

    // =========================================================================
    // Trial lapses: the row is downgraded and the entitlement must flip from
    // the paid plan to free through the profile mirror
    // =========================================================================
    #[test]
    fn entitlement_flips_to_free_after_trial_downgrade() {
        let now = OffsetDateTime::now_utc();
        let free = plan("free", PlanFeatures::default());
        let pro = plan("pro", PlanFeatures::all());
        let catalog = vec![free.clone(), pro.clone()];

        // Before the batch: open trial of pro, profile mirrors pro
        let before_profile = profile(Some(pro.id), false);
        let before_sub = subscription(pro.id, "trialing", now - Duration::hours(1));
        let before = resolve_entitlement(&before_profile, Some(&before_sub), &catalog).unwrap();
        assert_eq!(before.plan_id, pro.id);
        assert_eq!(before.source, EntitlementSource::Subscription);

        // After the batch: row canceled onto free, mirror updated
        let mut after_sub = before_sub.clone();
        after_sub.status = "canceled".to_string();
        after_sub.plan_id = free.id;
        after_sub.canceled_at = Some(now);
        let after_profile = profile(Some(free.id), false);

        let after = resolve_entitlement(&after_profile, Some(&after_sub), &catalog).unwrap();
        assert_eq!(after.plan_id, free.id);
        assert_eq!(after.source, EntitlementSource::Profile);
        assert!(!after.features.has(PlanFeature::TimeTracking));
    }

    // =========================================================================
    // Mirror write lost: entitlement still degrades correctly because the
    // canceled row no longer wins and the dangling pointer falls to free
    // =========================================================================
    #[test]
    fn stale_mirror_after_downgrade_still_resolves_to_free() {
        let now = OffsetDateTime::now_utc();
        let free = plan("free", PlanFeatures::default());
        let pro = plan("pro", PlanFeatures::all());
        let catalog = vec![free.clone(), pro.clone()];

        let mut sub = subscription(pro.id, "canceled", now - Duration::hours(1));
        sub.canceled_at = Some(now);

        // Profile still points at a plan that was just retired
        let mut retired = pro.clone();
        retired.is_active = false;
        let catalog_with_retired = vec![free.clone(), retired.clone()];
        let stale_profile = profile(Some(retired.id), false);

        let effective =
            resolve_entitlement(&stale_profile, Some(&sub), &catalog_with_retired).unwrap();
        assert_eq!(effective.plan_id, free.id);
        assert_eq!(effective.source, EntitlementSource::FreeFallback);

        // Sanity: with the plan still active, the mirror wins instead
        let effective = resolve_entitlement(&stale_profile, Some(&sub), &catalog).unwrap();
        assert_eq!(effective.source, EntitlementSource::Profile);
    }
}

mod renewal_decisions {
    use super::*;
    use crate::jobs::{decide_renewal, RenewalDecision};

    // =========================================================================
    // A renewed row carries the external id and must fall out of every batch
    // predicate and count as open for entitlement
    // =========================================================================
    #[test]
    fn renewed_row_is_processor_managed_and_still_open() {
        let now = OffsetDateTime::now_utc();
        let pro = plan("pro", PlanFeatures::all());

        let mut sub = subscription(pro.id, "active", now + Duration::days(30));
        sub.stripe_subscription_id = Some("sub_ext_1".to_string());

        assert!(sub.is_processor_managed());
        assert!(sub.is_open());
        assert_eq!(sub.status(), Some(SubscriptionStatus::Active));

        let catalog = vec![plan("free", PlanFeatures::default()), pro.clone()];
        let effective =
            resolve_entitlement(&profile(Some(pro.id), true), Some(&sub), &catalog).unwrap();
        assert_eq!(effective.plan_id, pro.id);
        assert_eq!(effective.source, EntitlementSource::Subscription);
    }

    // =========================================================================
    // Opting out beats having a payment method: cancel_at_period_end rows
    // are downgraded even when a charge would succeed
    // =========================================================================
    #[test]
    fn opt_out_overrides_stored_payment_method() {
        let now = OffsetDateTime::now_utc();
        let mut pro = plan("pro", PlanFeatures::all());
        pro.stripe_price_monthly = Some("price_pro".to_string());

        let mut sub = subscription(pro.id, "active", now - Duration::hours(1));
        sub.cancel_at_period_end = true;

        let decision = decide_renewal(&sub, &profile(Some(pro.id), true), &pro);
        assert!(matches!(decision, RenewalDecision::Downgrade { .. }));
    }

    // =========================================================================
    // Trialing rows selected by the renewal batch use the same decision
    // logic as active ones
    // =========================================================================
    #[test]
    fn elapsed_trial_with_payment_method_is_charged() {
        let now = OffsetDateTime::now_utc();
        let mut pro = plan("pro", PlanFeatures::all());
        pro.stripe_price_monthly = Some("price_pro".to_string());

        let sub = subscription(pro.id, "trialing", now - Duration::hours(1));
        let decision = decide_renewal(&sub, &profile(Some(pro.id), true), &pro);
        assert!(matches!(decision, RenewalDecision::AttemptCharge { .. }));
    }
}

mod reminder_windows {
    use super::*;
    use crate::jobs::{reminder_window, ReminderWindow};

    // =========================================================================
    // One subscription observed across four consecutive daily runs gets
    // exactly one T-3 and one T-1 reminder, then expires out of scope
    // =========================================================================
    #[test]
    fn consecutive_daily_runs_emit_t3_then_t1_then_nothing() {
        let period_end = OffsetDateTime::now_utc() + Duration::days(10);

        let run = |days_before: i64| reminder_window(period_end - Duration::days(days_before), period_end);

        assert_eq!(run(4), None);
        assert_eq!(run(3), Some(ReminderWindow::TMinus3));
        assert_eq!(run(2), Some(ReminderWindow::TMinus3));
        assert_eq!(run(1), Some(ReminderWindow::TMinus1));
        assert_eq!(run(0), None); // exactly at period end: expiry, not reminder
        assert_eq!(run(-1), None);
    }

    // =========================================================================
    // The windows never overlap: days_left is unambiguous for any instant
    // =========================================================================
    #[test]
    fn days_left_is_unambiguous() {
        let now = OffsetDateTime::now_utc();
        for hours in 1..=72 {
            let window = reminder_window(now, now + Duration::hours(hours)).unwrap();
            let expected = if hours <= 24 { 1 } else { 3 };
            assert_eq!(window.days_left(), expected, "at {} hours out", hours);
        }
    }
}

mod status_boundaries {
    use super::*;

    // =========================================================================
    // past_due counts as open: it blocks new trials and wins entitlement,
    // but the batch jobs never select it
    // =========================================================================
    #[test]
    fn past_due_is_open_but_not_terminal() {
        let now = OffsetDateTime::now_utc();
        let pro = plan("pro", PlanFeatures::all());
        let sub = subscription(pro.id, "past_due", now - Duration::days(2));

        assert!(sub.is_open());
        assert_eq!(sub.status(), Some(SubscriptionStatus::PastDue));
        assert!(!SubscriptionStatus::PastDue.is_terminal());

        let catalog = vec![plan("free", PlanFeatures::default()), pro.clone()];
        let effective =
            resolve_entitlement(&profile(None, false), Some(&sub), &catalog).unwrap();
        assert_eq!(effective.source, EntitlementSource::Subscription);
    }

    // =========================================================================
    // An unknown status string from the database parses to no status and is
    // treated as closed
    // =========================================================================
    #[test]
    fn unknown_status_is_closed() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription(Uuid::new_v4(), "paused", now + Duration::days(1));
        assert_eq!(sub.status(), None);
        assert!(!sub.is_open());
    }

    // =========================================================================
    // The feature set is closed: a plan cannot grant a feature the platform
    // does not define, and granting all is explicit
    // =========================================================================
    #[test]
    fn feature_set_is_closed() {
        let err = serde_json::from_str::<PlanFeatures>(r#"{"teleportation": true}"#);
        assert!(err.is_err());

        let all = PlanFeatures::all();
        assert!(all.has(PlanFeature::Labels));
        assert!(all.has(PlanFeature::PrioritySupport));

        let none = PlanFeatures::default();
        assert!(!none.has(PlanFeature::Labels));
    }
}
