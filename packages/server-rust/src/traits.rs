use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{ActionRecord, Event, EventAction, Receiver, ReportHeader, ReportId, RetryToken};
use uuid::Uuid;

/// Due headers of one receiver, locked for a single send invocation.
///
/// The lock is held by the store until the batch is handed back through
/// [`WorkflowStore::complete_receiver_batch`] or
/// [`WorkflowStore::abandon_receiver_batch`].
#[derive(Debug, Clone)]
pub struct ReceiverBatch {
    pub receiver_name: String,
    /// Headers in the order they are to be sent.
    pub headers: Vec<ReportHeader>,
    pub lock_id: Uuid,
}

/// What the send pipeline decided for a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// Every header was delivered.
    Delivered,
    /// At least one header left items behind. The whole batch comes back as
    /// one `action` event at `at`.
    Retry {
        action: EventAction,
        at: DateTime<Utc>,
    },
    /// The batch cannot be delivered at all (no transport).
    Failed,
}

/// Per-header outcome of a send invocation, handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverResult {
    /// Token for the next attempt of each header, `None` once delivered.
    pub next_tokens: Vec<(ReportId, Option<RetryToken>)>,
    pub next_action: NextAction,
}

impl ReceiverResult {
    /// Result for a batch whose headers all went through.
    #[must_use]
    pub fn delivered(headers: &[ReportHeader]) -> Self {
        Self {
            next_tokens: headers.iter().map(|h| (h.report_id, None)).collect(),
            next_action: NextAction::Delivered,
        }
    }

    /// Result for a batch that can never be delivered.
    #[must_use]
    pub fn failed(headers: &[ReportHeader]) -> Self {
        Self {
            next_tokens: headers.iter().map(|h| (h.report_id, None)).collect(),
            next_action: NextAction::Failed,
        }
    }

    /// The token assigned to `report_id`, if any.
    #[must_use]
    pub fn token_for(&self, report_id: ReportId) -> Option<&RetryToken> {
        self.next_tokens
            .iter()
            .find(|(id, _)| *id == report_id)
            .and_then(|(_, token)| token.as_ref())
    }
}

/// Fetch/lock access to the report task table.
///
/// Implementations: in-memory (tests, dry runs); a database-backed store
/// lives outside this crate.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Lock and return up to `max_headers` due headers for `receiver_name`,
    /// oldest first. Each header carries the retry token persisted by the
    /// previous attempt.
    async fn fetch_receiver_batch(
        &self,
        receiver_name: &str,
        max_headers: usize,
    ) -> anyhow::Result<ReceiverBatch>;

    /// Persist the outcome of a send invocation and release the lock.
    async fn complete_receiver_batch(
        &self,
        batch: ReceiverBatch,
        result: &ReceiverResult,
    ) -> anyhow::Result<()>;

    /// Release the lock without changing any header.
    async fn abandon_receiver_batch(&self, batch: ReceiverBatch) -> anyhow::Result<()>;
}

/// Re-enqueue side of the event queue. Delivery is at least once, at or after
/// the event's `at`.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn enqueue(&self, event: &Event) -> anyhow::Result<()>;
}

/// Polling side of a queue that holds scheduled events.
#[async_trait]
pub trait DueEvents: Send + Sync {
    /// Remove and return the raw messages due at or before `now`, earliest first.
    async fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>>;
}

/// Append-only audit sink. Safe to call from concurrent invocations.
#[async_trait]
pub trait ActionHistorySink: Send + Sync {
    async fn record(&self, record: ActionRecord) -> anyhow::Result<()>;
}

/// Read-only receiver configuration.
#[async_trait]
pub trait ReceiverCatalog: Send + Sync {
    async fn find_receiver(&self, full_name: &str) -> anyhow::Result<Option<Receiver>>;
}
