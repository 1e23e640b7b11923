//! Send dispatch: the handler behind every `send` queue message.
//!
//! One invocation resolves a receiver event into a batch of due headers,
//! delivers them in order over a single transport session, turns leftover
//! retry items into new retry tokens, and reschedules the batch as a whole.
//!
//! # Failure boundary
//!
//! [`SendDispatcher::handle_message`] never returns an error. Anything that
//! escapes the batch (a malformed message, an unknown receiver, a session
//! that cannot be opened, a failing collaborator) becomes a terminal
//! `send_error` audit record. The queue infrastructure never redelivers a
//! message because of it; recovery happens only through retry tokens.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use relay_core::{
    ActionHistory, ClockSource, Event, EventAction, EventError, Receiver, ReportHeader, ReportId,
    RetryToken, SystemClock, TaskAction,
};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::config::DispatchConfig;
use super::session::SessionGuard;
use crate::traits::{
    ActionHistorySink, EventQueue, NextAction, ReceiverBatch, ReceiverCatalog, ReceiverResult,
    WorkflowStore,
};
use crate::transport::{Delivery, Transport, TransportError, TransportRegistry};

// ---------------------------------------------------------------------------
// Errors and outcomes
// ---------------------------------------------------------------------------

/// Failures that abort an invocation. Caught at the invocation boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Event(#[from] EventError),
    #[error("send events must name a receiver")]
    NotReceiverEvent,
    #[error("unknown receiver {0}")]
    UnknownReceiver(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Collaborator(#[from] anyhow::Error),
}

/// What one invocation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message was not a `send` event; nothing happened.
    Ignored { action: EventAction },
    /// Every header of the batch went through.
    Delivered { reports: usize },
    /// Some header left items behind; the batch comes back as `action` at `at`.
    RetryScheduled {
        action: EventAction,
        at: DateTime<Utc>,
    },
    /// The receiver has no usable transport.
    NotDeliverable,
    /// The invocation was aborted and recorded as a send error.
    Failed,
}

impl SendOutcome {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::Delivered { .. } => "delivered",
            Self::RetryScheduled {
                action: EventAction::SendError,
                ..
            } => "exhausted",
            Self::RetryScheduled { .. } => "retry",
            Self::NotDeliverable => "not_deliverable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// SendDispatcher
// ---------------------------------------------------------------------------

/// Queue-message handler for the send step.
///
/// Stateless between invocations; safe to share and to run concurrently for
/// different messages.
pub struct SendDispatcher {
    store: Arc<dyn WorkflowStore>,
    queue: Arc<dyn EventQueue>,
    history: Arc<dyn ActionHistorySink>,
    catalog: Arc<dyn ReceiverCatalog>,
    registry: TransportRegistry,
    config: DispatchConfig,
    clock: Arc<dyn ClockSource>,
}

impl SendDispatcher {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        queue: Arc<dyn EventQueue>,
        history: Arc<dyn ActionHistorySink>,
        catalog: Arc<dyn ReceiverCatalog>,
        registry: TransportRegistry,
    ) -> Self {
        Self {
            store,
            queue,
            history,
            catalog,
            registry,
            config: DispatchConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn ClockSource>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Handle one queue message.
    ///
    /// Records exactly one action-history entry unless the message is not a
    /// `send` event.
    pub async fn handle_message(&self, message: &str) -> SendOutcome {
        let span = info_span!(
            "send",
            receiver = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        async move {
            let start = Instant::now();
            info!(message = %message, "started send invocation");

            let mut history = ActionHistory::new(TaskAction::Send).with_started_at(self.clock.now());
            history.track_action_params(message);

            let outcome = match self.dispatch(message, &mut history).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    let result = format!("Send function unrecoverable exception for event: {message}");
                    error!(error = %err, "{result}");
                    history.set_action_type(TaskAction::SendError);
                    history.track_action_result(result);
                    SendOutcome::Failed
                }
            };

            if !matches!(outcome, SendOutcome::Ignored { .. }) {
                if let Err(err) = self.history.record(history.finish(self.clock.now())).await {
                    error!(error = %err, "failed to record action history");
                }
            }

            #[allow(clippy::cast_possible_truncation)]
            let duration_ms = start.elapsed().as_millis() as u64;
            let span = tracing::Span::current();
            span.record("duration_ms", duration_ms);
            span.record("outcome", outcome.label());
            metrics::counter!("relay_send_invocations_total", "outcome" => outcome.label())
                .increment(1);
            info!(duration_ms, outcome = %outcome, "send invocation complete");

            outcome
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        message: &str,
        history: &mut ActionHistory,
    ) -> Result<SendOutcome, DispatchError> {
        let event = Event::parse_queue_message(message)?;
        let action = event.event_action();
        if action != EventAction::Send {
            warn!(action = %action, "send function received an unhandled action");
            return Ok(SendOutcome::Ignored { action });
        }
        let Event::Receiver(event) = event else {
            return Err(DispatchError::NotReceiverEvent);
        };
        history.set_action_type(action.to_task_action());
        tracing::Span::current().record("receiver", event.receiver_name.as_str());

        let receiver = self
            .catalog
            .find_receiver(&event.receiver_name)
            .await?
            .ok_or_else(|| DispatchError::UnknownReceiver(event.receiver_name.clone()))?;
        let batch = self
            .store
            .fetch_receiver_batch(&receiver.full_name, self.config.max_files_per_session)
            .await?;

        // A full batch may have left due headers behind.
        let capped = !batch.headers.is_empty()
            && batch.headers.len() >= self.config.max_files_per_session;

        match self.deliver_batch(&receiver, &batch, history).await {
            Ok(result) => {
                let outcome = self.finish_batch(&receiver, batch, result).await?;
                if capped {
                    debug!("batch was capped, scheduling the rest");
                    self.queue
                        .enqueue(&Event::receiver(EventAction::Send, &receiver.full_name))
                        .await?;
                }
                Ok(outcome)
            }
            Err(err) => {
                if let Err(abandon) = self.store.abandon_receiver_batch(batch).await {
                    warn!(error = %abandon, "failed to release receiver batch");
                }
                Err(err)
            }
        }
    }

    /// Persist the batch result and schedule the retry event, if any.
    async fn finish_batch(
        &self,
        receiver: &Receiver,
        batch: ReceiverBatch,
        result: ReceiverResult,
    ) -> Result<SendOutcome, DispatchError> {
        let reports = batch.headers.len();
        self.store.complete_receiver_batch(batch, &result).await?;

        Ok(match result.next_action {
            NextAction::Delivered => SendOutcome::Delivered { reports },
            NextAction::Failed => SendOutcome::NotDeliverable,
            NextAction::Retry { action, at } => {
                let event = Event::receiver_at(action, &receiver.full_name, at);
                self.queue.enqueue(&event).await?;
                info!(action = %action, at = %at, "rescheduled receiver batch");
                SendOutcome::RetryScheduled { action, at }
            }
        })
    }

    async fn deliver_batch(
        &self,
        receiver: &Receiver,
        batch: &ReceiverBatch,
        history: &mut ActionHistory,
    ) -> Result<ReceiverResult, DispatchError> {
        if batch.headers.is_empty() {
            debug!("no headers due");
            return Ok(ReceiverResult::delivered(&batch.headers));
        }

        let transport = receiver
            .transport
            .as_ref()
            .and_then(|config| self.registry.transport_for(config));
        let Some(transport) = transport else {
            warn!(receiver = %receiver.full_name, "no transport defined");
            history.set_action_type(TaskAction::SendError);
            for header in &batch.headers {
                history.track_existing_input_report(header.report_id);
                history.track_action_result(format!(
                    "Not sending {} to {}: No transports defined",
                    header.report_id, receiver.full_name
                ));
                metrics::counter!("relay_send_reports_total", "outcome" => "not_deliverable")
                    .increment(1);
            }
            return Ok(ReceiverResult::failed(&batch.headers));
        };

        let session = transport.start_session(receiver).await?;
        let mut guard = SessionGuard::new(session, &receiver.full_name);
        let sent = self
            .send_all(transport.as_ref(), receiver, &batch.headers, &mut guard, history)
            .await;
        if let Err(err) = guard.release().await {
            warn!(receiver = %receiver.full_name, error = %err, "failed to close transport session");
        }
        let next_tokens = sent?;

        let next_action = self.batch_action(&next_tokens);
        Ok(ReceiverResult {
            next_tokens,
            next_action,
        })
    }

    /// Send every header in order over one session.
    async fn send_all(
        &self,
        transport: &dyn Transport,
        receiver: &Receiver,
        headers: &[ReportHeader],
        guard: &mut SessionGuard,
        history: &mut ActionHistory,
    ) -> Result<Vec<(ReportId, Option<RetryToken>)>, TransportError> {
        let mut next_tokens = Vec::with_capacity(headers.len());
        for header in headers {
            history.track_existing_input_report(header.report_id);
            let prior = header.retry_token.as_ref();
            let delivery = Delivery {
                receiver,
                header,
                sent_report_id: Uuid::new_v4(),
                retry_items: prior.map(|token| token.items.as_slice()),
                attempted_at: self.clock.now(),
            };
            let remaining = transport
                .send(&delivery, guard.session_mut(), history)
                .await?;
            let token = self.next_token(receiver, header, prior, remaining, history);
            next_tokens.push((header.report_id, token));
        }
        Ok(next_tokens)
    }

    /// Classify one header's result into its next retry token.
    fn next_token(
        &self,
        receiver: &Receiver,
        header: &ReportHeader,
        prior: Option<&RetryToken>,
        remaining: Vec<String>,
        history: &mut ActionHistory,
    ) -> Option<RetryToken> {
        let report_id = header.report_id;
        let service = &receiver.full_name;

        let Some(token) = RetryToken::next(prior, remaining) else {
            let result = format!("Successfully sent report: {report_id} to {service}");
            info!(report_id = %report_id, "{result}");
            history.track_action_result(result);
            metrics::counter!("relay_send_reports_total", "outcome" => "delivered").increment(1);
            return None;
        };

        if self.config.retry.is_exhausted(token.retry_count) {
            let result = format!("All retries failed. Send Error report for: {report_id} to {service}");
            info!(report_id = %report_id, retry_count = token.retry_count, "{result}");
            history.track_action_result(result);
            metrics::counter!("relay_send_reports_total", "outcome" => "exhausted").increment(1);
        } else {
            let at = self.config.retry.retry_at(token.retry_count, self.clock.now());
            let result = format!(
                "Send Failed. Will retry sending report: {report_id} to {service} at {}",
                at.to_rfc3339()
            );
            info!(report_id = %report_id, retry_count = token.retry_count, "{result}");
            history.track_action_result(result);
            metrics::counter!("relay_send_reports_total", "outcome" => "retry").increment(1);
        }
        Some(token)
    }

    /// One decision for the whole batch, keyed off the highest retry count in
    /// it. A header that has retried often therefore sets the delay, and the
    /// terminal action, for every header in the batch.
    fn batch_action(&self, next_tokens: &[(ReportId, Option<RetryToken>)]) -> NextAction {
        let max_retry_count = next_tokens
            .iter()
            .filter_map(|(_, token)| token.as_ref())
            .map(|token| token.retry_count)
            .max();
        let Some(retry_count) = max_retry_count else {
            return NextAction::Delivered;
        };
        let action = if self.config.retry.is_exhausted(retry_count) {
            EventAction::SendError
        } else {
            EventAction::Send
        };
        NextAction::Retry {
            action,
            at: self.config.retry.retry_at(retry_count, self.clock.now()),
        }
    }
}
