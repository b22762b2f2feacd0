//! Subscription lifecycle and entitlement routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use taskdeck_billing::{EffectivePlan, Subscription};
use taskdeck_shared::BillingInterval;
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

/// Default trial length when the request does not specify one
const DEFAULT_TRIAL_DAYS: i64 = 14;

#[derive(Debug, Deserialize)]
pub struct StartTrialRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub trial_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub user_id: Uuid,
    pub plan_id: Uuid,
    pub interval: BillingInterval,
}

#[derive(Debug, Deserialize)]
pub struct UserActionRequest {
    pub user_id: Uuid,
}

/// GET /api/users/{id}/entitlement - the resolved effective plan
pub async fn get_entitlement(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<EffectivePlan>> {
    let effective = state.billing.entitlements.entitlement_for(user_id).await?;
    Ok(Json(effective))
}

/// POST /api/subscriptions/trial - start a trial of a paid plan
pub async fn start_trial(
    State(state): State<AppState>,
    Json(req): Json<StartTrialRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let trial_days = req.trial_days.unwrap_or(DEFAULT_TRIAL_DAYS);
    let subscription = state
        .billing
        .subscriptions
        .start_trial(req.user_id, req.plan_id, trial_days)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// POST /api/subscriptions/purchase - purchase a paid plan outright
pub async fn purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseRequest>,
) -> ApiResult<(StatusCode, Json<Subscription>)> {
    let subscription = state
        .billing
        .subscriptions
        .purchase(req.user_id, req.plan_id, req.interval)
        .await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// POST /api/subscriptions/cancel - schedule cancellation at period end
pub async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<UserActionRequest>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state
        .billing
        .subscriptions
        .cancel_at_period_end(req.user_id)
        .await?;
    Ok(Json(subscription))
}

/// POST /api/subscriptions/reactivate - undo a scheduled cancellation
pub async fn reactivate(
    State(state): State<AppState>,
    Json(req): Json<UserActionRequest>,
) -> ApiResult<Json<Subscription>> {
    let subscription = state.billing.subscriptions.reactivate(req.user_id).await?;
    Ok(Json(subscription))
}
