#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! TaskDeck Shared
//!
//! Types and database plumbing shared across the TaskDeck crates:
//! subscription status, billing interval, the closed plan feature set,
//! pool construction, and embedded migrations.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{BillingInterval, PlanFeature, PlanFeatures, SubscriptionStatus};
