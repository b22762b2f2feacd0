//! Scheduled reconciliation jobs
//!
//! Three daily batches: trial expiration, renewal-or-downgrade, and expiry
//! reminders. Each run is a single pass over a snapshot of matching rows;
//! rows are processed in isolation and an error in one never aborts the
//! batch. Correctness under overlapping invocations rests on narrowing
//! selection predicates, not locks: every transition moves a row permanently
//! out of the predicate that selected it.

pub mod reminder;
pub mod renewal;
pub mod trial;

pub use reminder::{reminder_window, ExpiryReminderJob, ReminderWindow};
pub use renewal::{decide_renewal, RenewalDecision, RenewalJob};
pub use trial::TrialExpirationJob;

use serde::Serialize;
use uuid::Uuid;

/// What happened to one selected row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAction {
    /// Moved to the free plan
    Downgraded,
    /// Renewal charge succeeded; the processor owns the row now
    Charged,
    /// Reminder notification emitted, no state change
    Reminded,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowResult {
    pub subscription_id: Uuid,
    pub user_id: Uuid,
    pub action: RowAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub days_left: Option<i64>,
}

/// Aggregate result of one batch run.
///
/// This is the wire contract of the job trigger endpoints:
/// `{ success, processed, results, errors? }`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub success: bool,
    pub processed: usize,
    pub results: Vec<RowResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl JobReport {
    pub(crate) fn from_parts(results: Vec<RowResult>, errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            processed: results.len(),
            results,
            errors,
        }
    }

    /// Rows that ended in a given action
    pub fn count(&self, action: RowAction) -> usize {
        self.results.iter().filter(|r| r.action == action).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_wire_shape_matches_trigger_contract() {
        let report = JobReport::from_parts(
            vec![RowResult {
                subscription_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                action: RowAction::Downgraded,
                days_left: None,
            }],
            vec![],
        );

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["processed"], 1);
        assert_eq!(json["results"][0]["action"], "downgraded");
        // errors key omitted when empty
        assert!(json.get("errors").is_none());
    }

    #[test]
    fn row_errors_clear_success_but_keep_results() {
        let report = JobReport::from_parts(
            vec![RowResult {
                subscription_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                action: RowAction::Charged,
                days_left: None,
            }],
            vec!["user x: write failed".to_string()],
        );

        assert!(!report.success);
        assert_eq!(report.processed, 1);
        assert_eq!(report.count(RowAction::Charged), 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["errors"][0], "user x: write failed");
    }
}
