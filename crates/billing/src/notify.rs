//! Notification dispatch
//!
//! Two halves: in-app notification rows written directly to the database,
//! and email requests handed to the external dispatcher service. The core
//! only builds template arguments and the locale; rendering and delivery are
//! the dispatcher's job. Both halves are best-effort follow-ups in the
//! downgrade saga — a failed notification never fails the row.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use uuid::Uuid;

use crate::error::BillingResult;

/// Template identifiers understood by the dispatcher service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    TrialEnded,
    SubscriptionExpired,
    ExpiryReminder,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::TrialEnded => "trial_ended",
            TemplateKind::SubscriptionExpired => "subscription_expired",
            TemplateKind::ExpiryReminder => "expiry_reminder",
        }
    }
}

/// Dispatcher response: `{ success, error? }`
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Writes in-app notification rows
#[derive(Clone)]
pub struct NotificationService {
    pool: PgPool,
}

impl NotificationService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        user_id: Uuid,
        kind: &str,
        title: &str,
        body: &str,
        payload: Value,
    ) -> BillingResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO notifications (user_id, kind, title, body, payload)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(title)
        .bind(body)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }
}

/// HTTP client for the external notification dispatcher
#[derive(Clone)]
pub struct DispatcherClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DispatcherClient {
    /// Build from `NOTIFY_SERVICE_URL` / `NOTIFY_API_KEY`; runs in disabled
    /// mode when either is unset.
    pub fn from_env() -> Self {
        let base_url = std::env::var("NOTIFY_SERVICE_URL").unwrap_or_default();
        let api_key = std::env::var("NOTIFY_API_KEY").unwrap_or_default();

        if base_url.is_empty() || api_key.is_empty() {
            tracing::warn!("Notification dispatcher not configured - emails will be skipped");
        } else {
            tracing::info!("Notification dispatcher client initialized");
        }

        Self {
            http: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty() && !self.api_key.is_empty()
    }

    /// Request delivery of one templated email.
    ///
    /// Retries transport failures with exponential backoff; after the last
    /// attempt the failure is reported in the result, not as an error —
    /// callers log it and move on.
    pub async fn dispatch(
        &self,
        user_id: Uuid,
        template: TemplateKind,
        locale: &str,
        args: Value,
    ) -> DispatchResult {
        if !self.is_enabled() {
            return DispatchResult {
                success: false,
                error: Some("dispatcher not configured".to_string()),
            };
        }

        let url = format!("{}/v1/dispatch", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "user_id": user_id,
            "template": template.as_str(),
            "locale": locale,
            "args": args,
        });

        let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(3);

        let result = Retry::spawn(strategy, || async {
            self.http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?
                .error_for_status()
        })
        .await;

        match result {
            Ok(response) => match response.json::<DispatchResult>().await {
                Ok(dispatch) => {
                    if !dispatch.success {
                        tracing::warn!(
                            user_id = %user_id,
                            template = template.as_str(),
                            error = ?dispatch.error,
                            "Dispatcher rejected email request"
                        );
                    }
                    dispatch
                }
                Err(e) => DispatchResult {
                    success: false,
                    error: Some(format!("bad dispatcher response: {}", e)),
                },
            },
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    template = template.as_str(),
                    error = %e,
                    "Email dispatch failed after retries"
                );
                DispatchResult {
                    success: false,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_kinds_are_stable_identifiers() {
        assert_eq!(TemplateKind::TrialEnded.as_str(), "trial_ended");
        assert_eq!(
            TemplateKind::SubscriptionExpired.as_str(),
            "subscription_expired"
        );
        assert_eq!(TemplateKind::ExpiryReminder.as_str(), "expiry_reminder");
    }

    #[tokio::test]
    async fn unconfigured_dispatcher_reports_failure_without_erroring() {
        let client = DispatcherClient::new("", "");
        let result = client
            .dispatch(
                Uuid::new_v4(),
                TemplateKind::TrialEnded,
                "en",
                serde_json::json!({}),
            )
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
