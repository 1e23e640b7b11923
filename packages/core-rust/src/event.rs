//! Queue events that drive the pipeline.
//!
//! # Wire format
//!
//! Events travel through the queue as JSON text tagged by `type`:
//!
//! ```json
//! {"type":"receiver","eventAction":"send","receiverName":"az-phd.elr","at":"2021-03-01T10:00:00Z"}
//! ```
//!
//! `at` is the earliest time the event should be handled and is omitted for
//! immediate events.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ReportId, TaskAction};

/// Errors from reading or writing queue messages.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("unparseable queue message: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("failed to encode queue message: {0}")]
    Encode(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// EventAction
// ---------------------------------------------------------------------------

/// Step of the pipeline an event asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    Process,
    Receive,
    Batch,
    Send,
    SendError,
    Wipe,
    None,
}

impl EventAction {
    /// Action recorded in history when this event is handled.
    #[must_use]
    pub fn to_task_action(self) -> TaskAction {
        match self {
            Self::Process => TaskAction::Process,
            Self::Receive => TaskAction::Receive,
            Self::Batch => TaskAction::Batch,
            Self::Send => TaskAction::Send,
            Self::SendError => TaskAction::SendError,
            Self::Wipe => TaskAction::Wipe,
            Self::None => TaskAction::None,
        }
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_task_action().fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Work addressed to every due report of one receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverEvent {
    pub event_action: EventAction,
    pub receiver_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

/// Work addressed to a single report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEvent {
    pub event_action: EventAction,
    pub report_id: ReportId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<DateTime<Utc>>,
}

/// A queue event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Receiver(ReceiverEvent),
    Report(ReportEvent),
}

impl Event {
    /// Receiver event, due now.
    pub fn receiver(action: EventAction, receiver_name: impl Into<String>) -> Self {
        Self::Receiver(ReceiverEvent {
            event_action: action,
            receiver_name: receiver_name.into(),
            at: None,
        })
    }

    /// Receiver event, due at `at`.
    pub fn receiver_at(
        action: EventAction,
        receiver_name: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self::Receiver(ReceiverEvent {
            event_action: action,
            receiver_name: receiver_name.into(),
            at: Some(at),
        })
    }

    #[must_use]
    pub fn event_action(&self) -> EventAction {
        match self {
            Self::Receiver(event) => event.event_action,
            Self::Report(event) => event.event_action,
        }
    }

    #[must_use]
    pub fn at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Receiver(event) => event.at,
            Self::Report(event) => event.at,
        }
    }

    /// Decode a queue message.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Parse`] if the text is not an event.
    pub fn parse_queue_message(message: &str) -> Result<Self, EventError> {
        serde_json::from_str(message).map_err(EventError::Parse)
    }

    /// Encode as a queue message.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Encode`] if serialization fails.
    pub fn to_queue_message(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(EventError::Encode)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn receiver_event_wire_format() {
        let at = Utc.with_ymd_and_hms(2021, 3, 1, 10, 0, 0).unwrap();
        let event = Event::receiver_at(EventAction::Send, "az-phd.elr", at);
        let message = event.to_queue_message().unwrap();
        assert_eq!(
            message,
            r#"{"type":"receiver","eventAction":"send","receiverName":"az-phd.elr","at":"2021-03-01T10:00:00Z"}"#
        );
        assert_eq!(Event::parse_queue_message(&message).unwrap(), event);
    }

    #[test]
    fn immediate_event_omits_at() {
        let message = Event::receiver(EventAction::SendError, "x.y")
            .to_queue_message()
            .unwrap();
        assert!(!message.contains("\"at\""));
        let parsed = Event::parse_queue_message(&message).unwrap();
        assert_eq!(parsed.event_action(), EventAction::SendError);
        assert_eq!(parsed.at(), None);
    }

    #[test]
    fn report_event_parses() {
        let id = ReportId::new();
        let message = format!(r#"{{"type":"report","eventAction":"process","reportId":"{id}"}}"#);
        match Event::parse_queue_message(&message).unwrap() {
            Event::Report(event) => {
                assert_eq!(event.report_id, id);
                assert_eq!(event.event_action, EventAction::Process);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn malformed_message_is_an_error() {
        assert!(matches!(
            Event::parse_queue_message("receiver&send&az-phd.elr"),
            Err(EventError::Parse(_))
        ));
    }

    #[test]
    fn actions_map_to_task_actions() {
        assert_eq!(EventAction::Send.to_task_action(), TaskAction::Send);
        assert_eq!(EventAction::SendError.to_task_action(), TaskAction::SendError);
        assert_eq!(EventAction::SendError.to_string(), "send_error");
    }
}
