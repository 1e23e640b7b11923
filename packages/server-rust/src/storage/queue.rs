//! In-memory scheduled event queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_core::Event;

use crate::traits::{DueEvents, EventQueue};

/// Queue messages ordered by due time, then by arrival.
///
/// Events without a due time are due immediately.
#[derive(Debug, Default)]
pub struct InMemoryEventQueue {
    messages: Mutex<BTreeMap<(DateTime<Utc>, u64), String>>,
    seq: AtomicU64,
}

impl InMemoryEventQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue raw message text, due at `at`.
    pub fn push_message(&self, message: impl Into<String>, at: Option<DateTime<Utc>>) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let at = at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.messages.lock().insert((at, seq), message.into());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Due time of the earliest queued message.
    #[must_use]
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.messages.lock().keys().next().map(|(at, _)| *at)
    }

    /// Every queued message with its due time, earliest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(DateTime<Utc>, String)> {
        self.messages
            .lock()
            .iter()
            .map(|((at, _), message)| (*at, message.clone()))
            .collect()
    }
}

#[async_trait]
impl EventQueue for InMemoryEventQueue {
    async fn enqueue(&self, event: &Event) -> anyhow::Result<()> {
        self.push_message(event.to_queue_message()?, event.at());
        Ok(())
    }
}

#[async_trait]
impl DueEvents for InMemoryEventQueue {
    async fn take_due(&self, now: DateTime<Utc>) -> anyhow::Result<Vec<String>> {
        let mut messages = self.messages.lock();
        let later = messages.split_off(&(now, u64::MAX));
        let due = std::mem::replace(&mut *messages, later);
        Ok(due.into_values().collect())
    }
}
