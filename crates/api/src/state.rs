//! Application state

use sqlx::PgPool;
use std::sync::Arc;
use taskdeck_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = Arc::new(BillingService::from_env(pool.clone()));
        tracing::info!("Billing services initialized");

        Self {
            pool,
            config,
            billing,
        }
    }
}
