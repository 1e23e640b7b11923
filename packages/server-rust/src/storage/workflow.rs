//! In-memory [`WorkflowStore`].
//!
//! Keeps one task per report, grouped by receiver. Retry tokens are stored
//! as text, the way a database column would hold them, and parsed again on
//! every fetch.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use relay_core::{ClockSource, EventAction, ReportHeader, ReportId, RetryToken, SystemClock};
use tracing::debug;
use uuid::Uuid;

use crate::traits::{NextAction, ReceiverBatch, ReceiverResult, WorkflowStore};

/// Delivery state of one report task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for (re)delivery.
    Pending,
    Delivered,
    /// Terminal failure; no further automatic attempts.
    SendError,
}

#[derive(Debug, Clone)]
struct TaskRecord {
    header: ReportHeader,
    retry_token: Option<String>,
    state: TaskState,
    next_action_at: DateTime<Utc>,
    lock_id: Option<Uuid>,
}

impl TaskRecord {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.lock_id.is_none() && self.next_action_at <= now
    }
}

/// Report tasks keyed by receiver full name.
pub struct InMemoryWorkflowStore {
    tasks: DashMap<String, Vec<TaskRecord>>,
    clock: Arc<dyn ClockSource>,
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkflowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Store that decides which tasks are due by `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            tasks: DashMap::new(),
            clock,
        }
    }

    /// Add a report as a pending task, due immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the header's retry token cannot be encoded.
    pub fn insert(&self, mut header: ReportHeader) -> anyhow::Result<ReportId> {
        let retry_token = header
            .retry_token
            .take()
            .map(|token| token.to_json())
            .transpose()?;
        let report_id = header.report_id;
        let record = TaskRecord {
            next_action_at: header.created_at,
            header,
            retry_token,
            state: TaskState::Pending,
            lock_id: None,
        };
        self.tasks
            .entry(record.header.receiver_name.clone())
            .or_default()
            .push(record);
        Ok(report_id)
    }

    fn find<T>(&self, report_id: ReportId, f: impl Fn(&TaskRecord) -> T) -> Option<T> {
        self.tasks.iter().find_map(|entry| {
            entry
                .value()
                .iter()
                .find(|task| task.header.report_id == report_id)
                .map(&f)
        })
    }

    #[must_use]
    pub fn state_of(&self, report_id: ReportId) -> Option<TaskState> {
        self.find(report_id, |task| task.state)
    }

    /// The persisted retry token of a report.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored token text is malformed.
    pub fn retry_token_of(&self, report_id: ReportId) -> anyhow::Result<Option<RetryToken>> {
        let text = self.find(report_id, |task| task.retry_token.clone()).flatten();
        Ok(RetryToken::from_json(text.as_deref())?)
    }

    /// When the report is next due, if it is still pending.
    #[must_use]
    pub fn next_action_at(&self, report_id: ReportId) -> Option<DateTime<Utc>> {
        self.find(report_id, |task| {
            (task.state == TaskState::Pending).then_some(task.next_action_at)
        })
        .flatten()
    }

    /// Receivers that have at least one pending task.
    #[must_use]
    pub fn pending_receivers(&self) -> Vec<String> {
        let mut receivers: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().iter().any(|t| t.state == TaskState::Pending))
            .map(|entry| entry.key().clone())
            .collect();
        receivers.sort();
        receivers
    }

    /// Receivers with at least one task that a fetch would return now.
    #[must_use]
    pub fn due_receivers(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut receivers: Vec<String> = self
            .tasks
            .iter()
            .filter(|entry| entry.value().iter().any(|t| t.is_due(now)))
            .map(|entry| entry.key().clone())
            .collect();
        receivers.sort();
        receivers
    }

    /// True if any task of `receiver_name` is locked by an invocation.
    #[must_use]
    pub fn is_locked(&self, receiver_name: &str) -> bool {
        self.tasks
            .get(receiver_name)
            .is_some_and(|tasks| tasks.iter().any(|t| t.lock_id.is_some()))
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn fetch_receiver_batch(
        &self,
        receiver_name: &str,
        max_headers: usize,
    ) -> anyhow::Result<ReceiverBatch> {
        let now = self.clock.now();
        let lock_id = Uuid::new_v4();
        let mut headers = Vec::new();

        if let Some(mut tasks) = self.tasks.get_mut(receiver_name) {
            // Every token is parsed before anything is locked, so a bad token
            // leaves no half-locked batch behind.
            let due = tasks
                .iter()
                .enumerate()
                .filter(|(_, task)| task.is_due(now))
                .take(max_headers)
                .map(|(index, task)| {
                    RetryToken::from_json(task.retry_token.as_deref())
                        .with_context(|| {
                            format!("stored retry token of report {}", task.header.report_id)
                        })
                        .map(|token| (index, token))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            for (index, token) in due {
                let task = &mut tasks[index];
                task.lock_id = Some(lock_id);
                headers.push(task.header.clone().with_retry_token(token));
            }
        }

        debug!(receiver = %receiver_name, count = headers.len(), "fetched receiver batch");
        Ok(ReceiverBatch {
            receiver_name: receiver_name.to_string(),
            headers,
            lock_id,
        })
    }

    async fn complete_receiver_batch(
        &self,
        batch: ReceiverBatch,
        result: &ReceiverResult,
    ) -> anyhow::Result<()> {
        let Some(mut tasks) = self.tasks.get_mut(&batch.receiver_name) else {
            return Ok(());
        };
        for task in tasks.iter_mut().filter(|t| t.lock_id == Some(batch.lock_id)) {
            task.lock_id = None;
            let token = result.token_for(task.header.report_id);
            match (&result.next_action, token) {
                (NextAction::Delivered, _) | (NextAction::Retry { .. }, None) => {
                    task.state = TaskState::Delivered;
                    task.retry_token = None;
                }
                (NextAction::Failed, _) => {
                    task.state = TaskState::SendError;
                    task.retry_token = None;
                }
                (NextAction::Retry { action, at }, Some(token)) => {
                    task.retry_token = Some(token.to_json()?);
                    task.next_action_at = *at;
                    task.state = if *action == EventAction::SendError {
                        TaskState::SendError
                    } else {
                        TaskState::Pending
                    };
                }
            }
        }
        Ok(())
    }

    async fn abandon_receiver_batch(&self, batch: ReceiverBatch) -> anyhow::Result<()> {
        if let Some(mut tasks) = self.tasks.get_mut(&batch.receiver_name) {
            for task in tasks.iter_mut().filter(|t| t.lock_id == Some(batch.lock_id)) {
                task.lock_id = None;
            }
        }
        Ok(())
    }
}
