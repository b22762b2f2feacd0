//! Shared billing types
//!
//! The subscription status enum and the closed plan feature set. Statuses are
//! stored as text in Postgres; `as_str`/`FromStr` are the single mapping
//! between the enum and the wire/storage representation.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a subscription row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Time-boxed trial of a paid plan, no payment collected yet
    Trialing,
    /// Paid and in good standing
    Active,
    /// Period elapsed, renewal not yet resolved
    PastDue,
    /// Terminal: canceled by the user, an admin, or a downgrade job
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Terminal rows never transition again and never count against the
    /// one-non-terminal-row-per-user invariant.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Canceled)
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            other => Err(format!("unknown subscription status: {}", other)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing interval for paid plans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingInterval::Monthly => "monthly",
            BillingInterval::Yearly => "yearly",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "monthly" => Some(BillingInterval::Monthly),
            "yearly" | "annual" => Some(BillingInterval::Yearly),
            _ => None,
        }
    }
}

/// A single known feature identifier
///
/// Feature gates go through this enum rather than raw strings so a typo is a
/// compile error, not a silently disabled feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFeature {
    Labels,
    Attachments,
    TimeTracking,
    Calendar,
    RecurringTasks,
    PrioritySupport,
}

/// The closed feature set granted by a plan
///
/// Stored as jsonb on the `plans` table. `deny_unknown_fields` makes a
/// mistyped key in stored data a loud decode error; `default` makes a
/// missing key read as disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanFeatures {
    pub labels: bool,
    pub attachments: bool,
    pub time_tracking: bool,
    pub calendar: bool,
    pub recurring_tasks: bool,
    pub priority_support: bool,
}

impl PlanFeatures {
    /// Check a single feature gate
    pub fn has(&self, feature: PlanFeature) -> bool {
        match feature {
            PlanFeature::Labels => self.labels,
            PlanFeature::Attachments => self.attachments,
            PlanFeature::TimeTracking => self.time_tracking,
            PlanFeature::Calendar => self.calendar,
            PlanFeature::RecurringTasks => self.recurring_tasks,
            PlanFeature::PrioritySupport => self.priority_support,
        }
    }

    /// Everything enabled (top paid tier)
    pub fn all() -> Self {
        Self {
            labels: true,
            attachments: true,
            time_tracking: true,
            calendar: true,
            recurring_tasks: true,
            priority_support: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            SubscriptionStatus::Trialing,
            SubscriptionStatus::Active,
            SubscriptionStatus::PastDue,
            SubscriptionStatus::Canceled,
        ] {
            let parsed: SubscriptionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("expired".parse::<SubscriptionStatus>().is_err());
    }

    #[test]
    fn only_canceled_is_terminal() {
        assert!(SubscriptionStatus::Canceled.is_terminal());
        assert!(!SubscriptionStatus::Trialing.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::PastDue.is_terminal());
    }

    #[test]
    fn features_default_to_disabled() {
        let features: PlanFeatures = serde_json::from_str("{}").unwrap();
        assert!(!features.has(PlanFeature::Labels));
        assert!(!features.has(PlanFeature::PrioritySupport));
    }

    #[test]
    fn mistyped_feature_key_is_a_decode_error() {
        // "lables" is not a known feature; it must not decode silently
        let result: Result<PlanFeatures, _> = serde_json::from_str(r#"{"lables": true}"#);
        assert!(result.is_err());
    }

    #[test]
    fn interval_accepts_annual_alias() {
        assert_eq!(
            BillingInterval::from_str("annual"),
            Some(BillingInterval::Yearly)
        );
        assert_eq!(BillingInterval::from_str("weekly"), None);
    }
}
