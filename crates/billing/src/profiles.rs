//! User profiles
//!
//! The profile carries a denormalized `plan_id` mirroring the user's current
//! effective plan. The mirror is a best-effort follow-up write in the
//! downgrade saga; entitlement resolution never trusts it when an open
//! subscription row exists.

use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    /// Cached pointer to the current effective plan
    pub plan_id: Option<Uuid>,
    pub stripe_customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    pub locale: String,
    pub role: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Profile {
    /// A renewal charge needs both the processor customer and a stored
    /// payment method.
    pub fn has_payment_method(&self) -> bool {
        self.stripe_customer_id.is_some() && self.payment_method_id.is_some()
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

#[derive(Clone)]
pub struct ProfileService {
    pool: PgPool,
}

impl ProfileService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, user_id: Uuid) -> BillingResult<Profile> {
        let profile: Option<Profile> = sqlx::query_as(
            r#"
            SELECT id, email, name, plan_id, stripe_customer_id, payment_method_id,
                   locale, role, created_at, updated_at
            FROM profiles
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        profile.ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))
    }

    /// Mirror the effective plan onto the profile row
    pub async fn set_plan(&self, user_id: Uuid, plan_id: Uuid) -> BillingResult<()> {
        let updated = sqlx::query(
            "UPDATE profiles SET plan_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(plan_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(BillingError::NotFound(format!("profile {}", user_id)));
        }

        Ok(())
    }
}
