use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::ActionRecord;
use tracing::debug;

use crate::traits::ActionHistorySink;

/// Append-only list of action records.
#[derive(Debug, Default)]
pub struct InMemoryActionHistory {
    records: Mutex<Vec<ActionRecord>>,
}

impl InMemoryActionHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl ActionHistorySink for InMemoryActionHistory {
    async fn record(&self, record: ActionRecord) -> anyhow::Result<()> {
        debug!(action = %record.action_type, results = record.action_results.len(), "recorded action");
        self.records.lock().push(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{ActionHistory, TaskAction};

    use super::*;

    #[tokio::test]
    async fn records_are_appended() {
        let sink = InMemoryActionHistory::new();
        assert!(sink.is_empty());

        sink.record(ActionHistory::new(TaskAction::Send).into_record())
            .await
            .unwrap();
        sink.record(ActionHistory::new(TaskAction::SendError).into_record())
            .await
            .unwrap();

        let records = sink.records();
        assert_eq!(sink.len(), 2);
        assert_eq!(records[0].action_type, TaskAction::Send);
        assert_eq!(records[1].action_type, TaskAction::SendError);
    }
}
