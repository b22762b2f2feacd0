//! Plan catalog routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use taskdeck_billing::{NewPlan, Plan, PlanUpdate};
use taskdeck_shared::PlanFeatures;
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub price_monthly_cents: i64,
    pub price_yearly_cents: i64,
    pub max_projects: Option<i32>,
    pub max_tasks: Option<i32>,
    pub features: PlanFeatures,
}

impl From<Plan> for PlanResponse {
    fn from(plan: Plan) -> Self {
        Self {
            id: plan.id,
            name: plan.name,
            display_name: plan.display_name,
            price_monthly_cents: plan.price_monthly_cents,
            price_yearly_cents: plan.price_yearly_cents,
            max_projects: plan.max_projects,
            max_tasks: plan.max_tasks,
            features: plan.features.0,
        }
    }
}

/// GET /api/plans - active plans, cheapest first
pub async fn list_plans(State(state): State<AppState>) -> ApiResult<Json<Vec<PlanResponse>>> {
    let plans = state.billing.catalog.list_active().await?;
    Ok(Json(plans.into_iter().map(PlanResponse::from).collect()))
}

/// POST /api/admin/plans - create a plan
pub async fn create_plan(
    State(state): State<AppState>,
    Json(new_plan): Json<NewPlan>,
) -> ApiResult<(StatusCode, Json<PlanResponse>)> {
    let plan = state.billing.catalog.create_plan(new_plan).await?;
    Ok((StatusCode::CREATED, Json(plan.into())))
}

/// PATCH /api/admin/plans/{id} - update price, limits, features
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(update): Json<PlanUpdate>,
) -> ApiResult<Json<PlanResponse>> {
    let plan = state.billing.catalog.update_plan(plan_id, update).await?;
    Ok(Json(plan.into()))
}

/// DELETE /api/admin/plans/{id} - rejected with 409 while referenced
pub async fn delete_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.billing.catalog.delete_plan(plan_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
