//! Audit trail accumulated by one pipeline invocation.
//!
//! An [`ActionHistory`] is built up in memory while an invocation runs and
//! turned into an immutable [`ActionRecord`] when the invocation hands it to
//! the history sink. Records are append-only; nothing updates them later.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ReportId, TaskAction};

/// One physical delivery registered by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentReport {
    /// Identifier minted for this attempt.
    pub sent_report_id: Uuid,
    pub receiver_name: String,
    /// Report the delivery was made from.
    pub source_report_id: ReportId,
    /// Name the receiver sees, for file-based transports.
    pub file_name: Option<String>,
    /// Number of items delivered.
    pub item_count: usize,
    /// Transport-specific detail, e.g. the remote location.
    pub params: Option<String>,
}

/// Mutable accumulator for a single invocation.
#[derive(Debug, Clone)]
pub struct ActionHistory {
    action_type: TaskAction,
    action_params: Option<String>,
    action_results: Vec<String>,
    reports_in: Vec<ReportId>,
    reports_out: Vec<SentReport>,
    started_at: DateTime<Utc>,
}

impl ActionHistory {
    #[must_use]
    pub fn new(action_type: TaskAction) -> Self {
        Self {
            action_type,
            action_params: None,
            action_results: Vec::new(),
            reports_in: Vec::new(),
            reports_out: Vec::new(),
            started_at: Utc::now(),
        }
    }

    /// Stamp the start with `at` instead of the wall clock.
    #[must_use]
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    #[must_use]
    pub fn action_type(&self) -> TaskAction {
        self.action_type
    }

    pub fn set_action_type(&mut self, action_type: TaskAction) {
        self.action_type = action_type;
    }

    /// Remember the raw input of the action, typically the queue message.
    pub fn track_action_params(&mut self, params: impl Into<String>) {
        self.action_params = Some(params.into());
    }

    /// Append a human-readable result line.
    pub fn track_action_result(&mut self, result: impl Into<String>) {
        self.action_results.push(result.into());
    }

    /// Record that the action consumed `report_id`. Repeats are ignored.
    pub fn track_existing_input_report(&mut self, report_id: ReportId) {
        if !self.reports_in.contains(&report_id) {
            self.reports_in.push(report_id);
        }
    }

    pub fn track_sent_report(&mut self, sent: SentReport) {
        self.reports_out.push(sent);
    }

    #[must_use]
    pub fn action_results(&self) -> &[String] {
        &self.action_results
    }

    #[must_use]
    pub fn input_reports(&self) -> &[ReportId] {
        &self.reports_in
    }

    #[must_use]
    pub fn sent_reports(&self) -> &[SentReport] {
        &self.reports_out
    }

    /// Freeze into the record handed to the history sink, finished now.
    #[must_use]
    pub fn into_record(self) -> ActionRecord {
        self.finish(Utc::now())
    }

    /// Freeze into the record handed to the history sink, finished at `at`.
    #[must_use]
    pub fn finish(self, at: DateTime<Utc>) -> ActionRecord {
        ActionRecord {
            action_type: self.action_type,
            action_params: self.action_params,
            action_results: self.action_results,
            consumed_report_ids: self.reports_in,
            sent_reports: self.reports_out,
            started_at: self.started_at,
            finished_at: at,
        }
    }
}

/// Immutable history entry for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub action_type: TaskAction,
    pub action_params: Option<String>,
    pub action_results: Vec<String>,
    pub consumed_report_ids: Vec<ReportId>,
    pub sent_reports: Vec<SentReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_freezes() {
        let mut history = ActionHistory::new(TaskAction::Send);
        history.track_action_params("{\"type\":\"receiver\"}");
        let report = ReportId::new();
        history.track_existing_input_report(report);
        history.track_existing_input_report(report);
        history.track_action_result("sent");
        history.set_action_type(TaskAction::SendError);

        let record = history.into_record();
        assert_eq!(record.action_type, TaskAction::SendError);
        assert_eq!(record.consumed_report_ids, vec![report]);
        assert_eq!(record.action_results, vec!["sent"]);
        assert_eq!(record.action_params.as_deref(), Some("{\"type\":\"receiver\"}"));
        assert!(record.finished_at >= record.started_at);
    }

    #[test]
    fn injected_times_are_kept() {
        let start = DateTime::parse_from_rfc3339("2030-06-01T08:00:00Z").unwrap().to_utc();
        let end = DateTime::parse_from_rfc3339("2030-06-01T08:00:05Z").unwrap().to_utc();
        let record = ActionHistory::new(TaskAction::Send)
            .with_started_at(start)
            .finish(end);
        assert_eq!(record.started_at, start);
        assert_eq!(record.finished_at, end);
    }

    #[test]
    fn tracks_sent_reports() {
        let mut history = ActionHistory::new(TaskAction::Send);
        history.track_sent_report(SentReport {
            sent_report_id: Uuid::new_v4(),
            receiver_name: "az-phd.elr".to_string(),
            source_report_id: ReportId::new(),
            file_name: Some("a.csv".to_string()),
            item_count: 1,
            params: None,
        });
        assert_eq!(history.sent_reports().len(), 1);
        assert_eq!(history.sent_reports()[0].file_name.as_deref(), Some("a.csv"));
    }
}
