//! Expiry reminder job
//!
//! Finds rows expiring within the next three days and emits one reminder
//! notification + email per row. No subscription state changes — only the
//! `last_reminder_sent_at` stamp, which keeps a duplicate scheduler call in
//! the same UTC day from re-notifying the user.

use sqlx::PgPool;
use time::{Duration, OffsetDateTime};

use crate::error::BillingResult;
use crate::jobs::{JobReport, RowAction, RowResult};
use crate::notify::{DispatcherClient, NotificationService, TemplateKind};
use crate::profiles::ProfileService;
use crate::subscriptions::{Subscription, SUBSCRIPTION_COLUMNS};

/// Which reminder window a row falls in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderWindow {
    /// Expires within the next 24 hours
    TMinus1,
    /// Expires between 24 and 72 hours from now
    TMinus3,
}

impl ReminderWindow {
    pub fn days_left(&self) -> i64 {
        match self {
            ReminderWindow::TMinus1 => 1,
            ReminderWindow::TMinus3 => 3,
        }
    }
}

/// Place a period end into a reminder window.
///
/// The windows partition `(now, now+72h]`: a row is in exactly one of them
/// or in none, so a single invocation can never double-notify a user.
pub fn reminder_window(now: OffsetDateTime, period_end: OffsetDateTime) -> Option<ReminderWindow> {
    let remaining = period_end - now;
    if remaining <= Duration::ZERO {
        return None;
    }
    if remaining <= Duration::hours(24) {
        return Some(ReminderWindow::TMinus1);
    }
    if remaining <= Duration::hours(72) {
        return Some(ReminderWindow::TMinus3);
    }
    None
}

pub struct ExpiryReminderJob {
    pool: PgPool,
    profiles: ProfileService,
    notifications: NotificationService,
    dispatcher: DispatcherClient,
}

impl ExpiryReminderJob {
    pub fn new(pool: PgPool, dispatcher: DispatcherClient) -> Self {
        let profiles = ProfileService::new(pool.clone());
        let notifications = NotificationService::new(pool.clone());
        Self {
            pool,
            profiles,
            notifications,
            dispatcher,
        }
    }

    pub async fn run(&self) -> BillingResult<JobReport> {
        let now = OffsetDateTime::now_utc();
        let horizon = now + Duration::hours(72);

        // The sent-flag comparison is against the start of the current UTC
        // day: a second invocation the same day selects nothing.
        let due: Vec<Subscription> = sqlx::query_as(&format!(
            r#"
            SELECT {}
            FROM subscriptions
            WHERE status IN ('active', 'trialing')
              AND stripe_subscription_id IS NULL
              AND current_period_end > $1
              AND current_period_end <= $2
              AND (last_reminder_sent_at IS NULL
                   OR last_reminder_sent_at < date_trunc('day', $1::timestamptz))
            ORDER BY current_period_end
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await?;

        tracing::info!(matched = due.len(), "Expiry reminder batch starting");

        let mut results = Vec::new();
        let mut errors = Vec::new();

        for subscription in &due {
            match self.remind_row(subscription, now).await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        error = %e,
                        "Failed to send expiry reminder"
                    );
                    errors.push(format!("user {}: {}", subscription.user_id, e));
                }
            }
        }

        let report = JobReport::from_parts(results, errors);
        tracing::info!(
            processed = report.processed,
            errors = report.errors.len(),
            "Expiry reminder batch complete"
        );

        Ok(report)
    }

    async fn remind_row(
        &self,
        subscription: &Subscription,
        now: OffsetDateTime,
    ) -> BillingResult<Option<RowResult>> {
        let Some(period_end) = subscription.current_period_end else {
            // Selection requires a period end; a null here is racing state.
            return Ok(None);
        };

        let Some(window) = reminder_window(now, period_end) else {
            return Ok(None);
        };
        let days_left = window.days_left();

        let profile = self.profiles.get(subscription.user_id).await?;
        // Only varies the message copy; no state decision hangs on it.
        let has_payment_method = profile.has_payment_method();

        let body = if has_payment_method {
            format!(
                "Your subscription expires in {} day(s). We will attempt to renew it automatically.",
                days_left
            )
        } else {
            format!(
                "Your subscription expires in {} day(s). Add a payment method to keep your plan.",
                days_left
            )
        };

        let payload = serde_json::json!({
            "subscription_id": subscription.id,
            "days_left": days_left,
            "has_payment_method": has_payment_method,
            "period_end": period_end.unix_timestamp(),
        });
        self.notifications
            .create(
                subscription.user_id,
                "system",
                "Subscription expiring soon",
                &body,
                payload,
            )
            .await?;

        let args = serde_json::json!({
            "name": profile.display_name(),
            "days_left": days_left,
            "has_payment_method": has_payment_method,
            "period_end": period_end.unix_timestamp(),
        });
        self.dispatcher
            .dispatch(
                subscription.user_id,
                TemplateKind::ExpiryReminder,
                &profile.locale,
                args,
            )
            .await;

        sqlx::query(
            "UPDATE subscriptions SET last_reminder_sent_at = $1 WHERE id = $2",
        )
        .bind(now)
        .bind(subscription.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            subscription_id = %subscription.id,
            user_id = %subscription.user_id,
            days_left = days_left,
            "Expiry reminder sent"
        );

        Ok(Some(RowResult {
            subscription_id: subscription.id,
            user_id: subscription.user_id,
            action: RowAction::Reminded,
            days_left: Some(days_left),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(now: OffsetDateTime, hours: i64) -> Option<ReminderWindow> {
        reminder_window(now, now + Duration::hours(hours))
    }

    #[test]
    fn windows_partition_the_horizon() {
        let now = OffsetDateTime::now_utc();

        assert_eq!(at(now, 2), Some(ReminderWindow::TMinus1));
        assert_eq!(at(now, 24), Some(ReminderWindow::TMinus1));
        assert_eq!(at(now, 25), Some(ReminderWindow::TMinus3));
        assert_eq!(at(now, 48), Some(ReminderWindow::TMinus3));
        assert_eq!(at(now, 72), Some(ReminderWindow::TMinus3));
        assert_eq!(at(now, 73), None);
    }

    #[test]
    fn elapsed_periods_are_not_reminded() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(at(now, 0), None);
        assert_eq!(at(now, -5), None);
    }

    #[test]
    fn a_row_is_in_at_most_one_window() {
        let now = OffsetDateTime::now_utc();
        // Sweep the horizon in minutes; each point maps to exactly one
        // window or none, never both.
        for minutes in (0..=(74 * 60)).step_by(30) {
            let window = reminder_window(now, now + Duration::minutes(minutes));
            match minutes {
                0 => assert_eq!(window, None),
                m if m <= 24 * 60 => assert_eq!(window, Some(ReminderWindow::TMinus1)),
                m if m <= 72 * 60 => assert_eq!(window, Some(ReminderWindow::TMinus3)),
                _ => assert_eq!(window, None),
            }
        }
    }

    #[test]
    fn two_days_out_lands_in_t_minus_3() {
        // An active subscription expiring in 2 days is reminded from the
        // T-3 bucket only.
        let now = OffsetDateTime::now_utc();
        assert_eq!(at(now, 48), Some(ReminderWindow::TMinus3));
    }
}
