// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Some subscription writes carry many columns
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TaskDeck Billing Module
//!
//! Subscription lifecycle for the task platform: plan catalog, entitlement
//! resolution, and the daily reconciliation jobs that move subscriptions
//! through their states.
//!
//! ## Features
//!
//! - **Plan Catalog**: CRUD over plans with a protected `free` fallback
//! - **Entitlements**: Resolve the effective plan for any user
//! - **Subscriptions**: Trials, purchases, cancellation, reactivation
//! - **Trial Expiration**: Daily downgrade of elapsed trials to free
//! - **Renewal**: Daily charge-or-downgrade for expired paid periods
//! - **Expiry Reminders**: T-3 / T-1 day heads-up notifications
//! - **Invariants**: Runnable consistency checks over billing state

pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod jobs;
pub mod notify;
pub mod payments;
pub mod plans;
pub mod processor;
pub mod profiles;
pub mod subscriptions;

#[cfg(test)]
mod edge_case_tests;

// Entitlement
pub use entitlement::{resolve_entitlement, EffectivePlan, EntitlementService, EntitlementSource};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Jobs
pub use jobs::{
    decide_renewal, reminder_window, ExpiryReminderJob, JobReport, ReminderWindow, RenewalDecision,
    RenewalJob, RowAction, RowResult, TrialExpirationJob,
};

// Notify
pub use notify::{DispatchResult, DispatcherClient, NotificationService, TemplateKind};

// Payments
pub use payments::{Payment, PaymentLedger};

// Plans
pub use plans::{NewPlan, Plan, PlanCatalog, PlanUpdate, FREE_PLAN_NAME};

// Processor
pub use processor::{ProcessorClient, RenewalOutcome};

// Profiles
pub use profiles::{Profile, ProfileService};

// Subscriptions
pub use subscriptions::{Subscription, SubscriptionService};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub catalog: PlanCatalog,
    pub entitlements: EntitlementService,
    pub subscriptions: SubscriptionService,
    pub profiles: ProfileService,
    pub payments: PaymentLedger,
    pub notifications: NotificationService,
    pub dispatcher: DispatcherClient,
    pub trial_expiration: TrialExpirationJob,
    pub renewal: RenewalJob,
    pub expiry_reminder: ExpiryReminderJob,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> Self {
        let processor = ProcessorClient::from_env();
        let dispatcher = DispatcherClient::from_env();
        Self::new(pool, processor, dispatcher)
    }

    /// Create a new billing service with explicit clients
    pub fn new(pool: PgPool, processor: ProcessorClient, dispatcher: DispatcherClient) -> Self {
        Self {
            catalog: PlanCatalog::new(pool.clone()),
            entitlements: EntitlementService::new(pool.clone()),
            subscriptions: SubscriptionService::new(pool.clone()),
            profiles: ProfileService::new(pool.clone()),
            payments: PaymentLedger::new(pool.clone()),
            notifications: NotificationService::new(pool.clone()),
            dispatcher: dispatcher.clone(),
            trial_expiration: TrialExpirationJob::new(pool.clone(), dispatcher.clone()),
            renewal: RenewalJob::new(pool.clone(), processor, dispatcher.clone()),
            expiry_reminder: ExpiryReminderJob::new(pool.clone(), dispatcher),
            invariants: InvariantChecker::new(pool),
        }
    }
}
