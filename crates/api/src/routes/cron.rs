//! Cron trigger endpoints
//!
//! Each endpoint runs one reconciliation batch synchronously and returns its
//! `JobReport`. Callers authenticate with the shared cron secret, sent either
//! as `x-cron-secret` or as a bearer token. The comparison is constant-time;
//! an unauthenticated request does no work at all.

use axum::{extract::State, http::HeaderMap, Json};
use subtle::ConstantTimeEq;
use taskdeck_billing::JobReport;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

fn authorize(headers: &HeaderMap, secret: &str) -> Result<(), ApiError> {
    let presented = headers
        .get("x-cron-secret")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .ok_or(ApiError::Unauthorized)?;

    if bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

pub async fn trial_expiration(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<JobReport>> {
    authorize(&headers, &state.config.cron_secret)?;

    tracing::info!("Trial expiration triggered via cron endpoint");
    let report = state.billing.trial_expiration.run().await?;
    Ok(Json(report))
}

pub async fn renewals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<JobReport>> {
    authorize(&headers, &state.config.cron_secret)?;

    tracing::info!("Renewal batch triggered via cron endpoint");
    let report = state.billing.renewal.run().await?;
    Ok(Json(report))
}

pub async fn expiry_reminders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<JobReport>> {
    authorize(&headers, &state.config.cron_secret)?;

    tracing::info!("Expiry reminders triggered via cron endpoint");
    let report = state.billing.expiry_reminder.run().await?;
    Ok(Json(report))
}
