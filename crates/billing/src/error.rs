//! Billing error types

use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Fatal for every batch job: the downgrade target does not exist.
    #[error("no active plan named 'free' in the catalog")]
    MissingFreePlan,

    #[error("{0} not found")]
    NotFound(String),

    #[error("plan {0} is still referenced by subscriptions or profiles")]
    PlanInUse(Uuid),

    #[error("user {0} already has an open subscription")]
    SubscriptionExists(Uuid),

    #[error("no open subscription for user {0}")]
    SubscriptionNotFound(Uuid),

    #[error("invalid input: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}
