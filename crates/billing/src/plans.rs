//! Plan catalog
//!
//! Read-mostly table of pricing tiers. The catalog invariant every job
//! depends on: exactly one active plan is named `free` at all times — it is
//! the downgrade target for trial expiry and failed renewals.

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::PgPool;
use taskdeck_shared::PlanFeatures;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// The internal name of the downgrade target plan
pub const FREE_PLAN_NAME: &str = "free";

/// A pricing tier
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Plan {
    pub id: Uuid,
    /// Internal name, unique (`free`, `pro`, `business`)
    pub name: String,
    pub display_name: String,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    /// None = unlimited
    pub max_projects: Option<i32>,
    /// None = unlimited
    pub max_tasks: Option<i32>,
    pub features: Json<PlanFeatures>,
    /// Processor price identifier for monthly billing
    pub stripe_price_monthly: Option<String>,
    /// Processor price identifier for yearly billing
    pub stripe_price_yearly: Option<String>,
    pub is_active: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

const PLAN_COLUMNS: &str = "id, name, display_name, price_monthly_cents, price_yearly_cents, \
     max_projects, max_tasks, features, stripe_price_monthly, stripe_price_yearly, \
     is_active, created_at, updated_at";

/// Fields for creating a new plan
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlan {
    pub name: String,
    pub display_name: String,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub max_projects: Option<i32>,
    pub max_tasks: Option<i32>,
    #[serde(default)]
    pub features: PlanFeatures,
    pub stripe_price_monthly: Option<String>,
    pub stripe_price_yearly: Option<String>,
}

/// Partial update for an existing plan
///
/// Only prices, limits, features, and processor price ids may change once a
/// plan is referenced by a live subscription; name and identity are fixed.
/// Nullable fields distinguish absent (keep) from explicit `null` (clear to
/// unlimited / detach the price id).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanUpdate {
    pub display_name: Option<String>,
    pub price_monthly_cents: Option<i64>,
    pub price_yearly_cents: Option<i64>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_projects: Option<Option<i32>>,
    #[serde(default, deserialize_with = "double_option")]
    pub max_tasks: Option<Option<i32>>,
    pub features: Option<PlanFeatures>,
    #[serde(default, deserialize_with = "double_option")]
    pub stripe_price_monthly: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub stripe_price_yearly: Option<Option<String>>,
    pub is_active: Option<bool>,
}

/// Nullable PATCH field: an absent key stays `None`, an explicit `null`
/// becomes `Some(None)`, a value becomes `Some(Some(v))`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(deserializer).map(Some)
}

/// The free plan is the downgrade target of every batch job; removing it
/// from the active catalog breaks the single-active-free-plan invariant.
fn guard_free_plan(name: &str, action: &'static str) -> BillingResult<()> {
    if name == FREE_PLAN_NAME {
        return Err(BillingError::Invalid(format!(
            "the '{}' plan cannot be {}",
            FREE_PLAN_NAME, action
        )));
    }
    Ok(())
}

/// Read and administer the plan catalog
#[derive(Clone)]
pub struct PlanCatalog {
    pool: PgPool,
}

impl PlanCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All active plans, cheapest first
    pub async fn list_active(&self) -> BillingResult<Vec<Plan>> {
        let plans: Vec<Plan> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE is_active = true ORDER BY price_monthly_cents",
            PLAN_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(plans)
    }

    pub async fn get(&self, plan_id: Uuid) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan {}", plan_id)))
    }

    pub async fn get_by_name(&self, name: &str) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE name = $1",
            PLAN_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or_else(|| BillingError::NotFound(format!("plan '{}'", name)))
    }

    /// The downgrade target for every batch job.
    ///
    /// Its absence is a fatal misconfiguration: callers must abort the whole
    /// batch, not treat it as a per-row error.
    pub async fn free_plan(&self) -> BillingResult<Plan> {
        let plan: Option<Plan> = sqlx::query_as(&format!(
            "SELECT {} FROM plans WHERE name = $1 AND is_active = true",
            PLAN_COLUMNS
        ))
        .bind(FREE_PLAN_NAME)
        .fetch_optional(&self.pool)
        .await?;

        plan.ok_or(BillingError::MissingFreePlan)
    }

    /// Create a plan (admin operation)
    pub async fn create_plan(&self, new_plan: NewPlan) -> BillingResult<Plan> {
        if new_plan.name.trim().is_empty() {
            return Err(BillingError::Invalid("plan name must not be empty".into()));
        }

        let plan: Plan = sqlx::query_as(&format!(
            r#"
            INSERT INTO plans
                (name, display_name, price_monthly_cents, price_yearly_cents,
                 max_projects, max_tasks, features, stripe_price_monthly, stripe_price_yearly)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(&new_plan.name)
        .bind(&new_plan.display_name)
        .bind(new_plan.price_monthly_cents)
        .bind(new_plan.price_yearly_cents)
        .bind(new_plan.max_projects)
        .bind(new_plan.max_tasks)
        .bind(Json(new_plan.features))
        .bind(&new_plan.stripe_price_monthly)
        .bind(&new_plan.stripe_price_yearly)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan created");
        Ok(plan)
    }

    /// Update price, limits, features, or processor price ids (admin operation)
    pub async fn update_plan(&self, plan_id: Uuid, update: PlanUpdate) -> BillingResult<Plan> {
        let current = self.get(plan_id).await?;

        if update.is_active == Some(false) {
            guard_free_plan(&current.name, "deactivated")?;
        }

        let display_name = update.display_name.unwrap_or(current.display_name);
        let price_monthly = update
            .price_monthly_cents
            .unwrap_or(current.price_monthly_cents);
        let price_yearly = update
            .price_yearly_cents
            .unwrap_or(current.price_yearly_cents);
        let max_projects = update.max_projects.unwrap_or(current.max_projects);
        let max_tasks = update.max_tasks.unwrap_or(current.max_tasks);
        let features = update.features.unwrap_or(current.features.0);
        let stripe_price_monthly = update
            .stripe_price_monthly
            .unwrap_or(current.stripe_price_monthly);
        let stripe_price_yearly = update
            .stripe_price_yearly
            .unwrap_or(current.stripe_price_yearly);
        let is_active = update.is_active.unwrap_or(current.is_active);

        let plan: Plan = sqlx::query_as(&format!(
            r#"
            UPDATE plans SET
                display_name = $1,
                price_monthly_cents = $2,
                price_yearly_cents = $3,
                max_projects = $4,
                max_tasks = $5,
                features = $6,
                stripe_price_monthly = $7,
                stripe_price_yearly = $8,
                is_active = $9,
                updated_at = NOW()
            WHERE id = $10
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(&display_name)
        .bind(price_monthly)
        .bind(price_yearly)
        .bind(max_projects)
        .bind(max_tasks)
        .bind(Json(features))
        .bind(&stripe_price_monthly)
        .bind(&stripe_price_yearly)
        .bind(is_active)
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(plan_id = %plan.id, name = %plan.name, "Plan updated");
        Ok(plan)
    }

    /// Delete a plan. Rejected while any subscription or profile references
    /// it — live plans are deactivated, never removed.
    pub async fn delete_plan(&self, plan_id: Uuid) -> BillingResult<()> {
        let plan = self.get(plan_id).await?;
        guard_free_plan(&plan.name, "deleted")?;

        let referenced: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM subscriptions WHERE plan_id = $1)
                OR EXISTS (SELECT 1 FROM profiles WHERE plan_id = $1)
            "#,
        )
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;

        if referenced {
            return Err(BillingError::PlanInUse(plan_id));
        }

        let deleted = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(plan_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(BillingError::NotFound(format!("plan {}", plan_id)));
        }

        tracing::info!(plan_id = %plan_id, "Plan deleted");
        Ok(())
    }
}
