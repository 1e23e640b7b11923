use async_trait::async_trait;
use relay_core::{ActionHistory, Receiver, RetryItems, SentReport, TransportKind};
use tracing::debug;

use super::{Delivery, Transport, TransportError, TransportSession};

/// Accepts every report and delivers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

#[async_trait]
impl Transport for NullTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Null
    }

    async fn start_session(
        &self,
        _receiver: &Receiver,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError> {
        Ok(None)
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        _session: Option<&mut dyn TransportSession>,
        history: &mut ActionHistory,
    ) -> Result<RetryItems, TransportError> {
        debug!(report_id = %delivery.header.report_id, "discarding report");
        history.track_sent_report(SentReport {
            sent_report_id: delivery.sent_report_id,
            receiver_name: delivery.receiver.full_name.clone(),
            source_report_id: delivery.header.report_id,
            file_name: None,
            item_count: 0,
            params: None,
        });
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use relay_core::{BodyFormat, ReportHeader, TaskAction, TransportConfig};
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn everything_is_delivered() {
        let receiver = Receiver::new("ignore.null", Some(TransportConfig::Null));
        let header = ReportHeader::new("ignore.null", BodyFormat::Csv, "a");
        let mut history = ActionHistory::new(TaskAction::Send);

        assert!(NullTransport.start_session(&receiver).await.unwrap().is_none());
        let remaining = NullTransport
            .send(
                &Delivery {
                    receiver: &receiver,
                    header: &header,
                    sent_report_id: Uuid::new_v4(),
                    retry_items: None,
                    attempted_at: Utc::now(),
                },
                None,
                &mut history,
            )
            .await
            .unwrap();

        assert!(remaining.is_empty());
        assert_eq!(history.sent_reports().len(), 1);
        assert_eq!(history.sent_reports()[0].source_report_id, header.report_id);
    }
}
