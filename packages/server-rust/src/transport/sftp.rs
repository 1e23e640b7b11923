//! Secure-file-transfer transports.
//!
//! Both dialects open one connection per batch and deliver every report as a
//! single file, so the only retry item they ever hand back is the all-items
//! sentinel. The legacy dialect cannot replace files atomically and is fed a
//! `.part` file that is renamed into place once complete.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    ActionHistory, Receiver, RetryItems, SentReport, SftpTransportConfig, TransportConfig,
    TransportKind,
};
use tracing::{info, warn};

use super::remote::{RemoteFileConnector, RemoteFileStore};
use super::{delivery_file_name, downcast_session, Delivery, Transport, TransportError, TransportSession};

/// Suffix of in-progress uploads in the legacy dialect.
const PART_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SftpDialect {
    /// Files are written in one put.
    Current,
    /// Files are written under a temporary name, then renamed.
    Legacy,
}

impl SftpDialect {
    fn kind(self) -> TransportKind {
        match self {
            Self::Current => TransportKind::Sftp,
            Self::Legacy => TransportKind::SftpLegacy,
        }
    }
}

/// Open connection for one batch.
pub struct SftpSession {
    store: Box<dyn RemoteFileStore>,
    address: String,
}

#[async_trait]
impl TransportSession for SftpSession {
    async fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        self.store.close().await?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Secure-file-transfer transport in either dialect.
pub struct SftpTransport {
    dialect: SftpDialect,
    connector: Arc<dyn RemoteFileConnector>,
}

impl SftpTransport {
    pub fn new(dialect: SftpDialect, connector: Arc<dyn RemoteFileConnector>) -> Self {
        Self { dialect, connector }
    }

    #[must_use]
    pub fn dialect(&self) -> SftpDialect {
        self.dialect
    }

    fn address<'r>(&self, receiver: &'r Receiver) -> Result<&'r SftpTransportConfig, TransportError> {
        match (&receiver.transport, self.dialect) {
            (Some(TransportConfig::Sftp(address)), SftpDialect::Current)
            | (Some(TransportConfig::SftpLegacy(address)), SftpDialect::Legacy) => Ok(address),
            _ => Err(TransportError::Misconfigured {
                receiver: receiver.full_name.clone(),
                transport: self.kind(),
            }),
        }
    }

    async fn upload(
        &self,
        store: &mut dyn RemoteFileStore,
        file_name: &str,
        contents: &[u8],
    ) -> std::io::Result<()> {
        match self.dialect {
            SftpDialect::Current => store.put(file_name, contents).await,
            SftpDialect::Legacy => {
                let part = format!("{file_name}{PART_SUFFIX}");
                store.put(&part, contents).await?;
                store.rename(&part, file_name).await
            }
        }
    }
}

#[async_trait]
impl Transport for SftpTransport {
    fn kind(&self) -> TransportKind {
        self.dialect.kind()
    }

    async fn start_session(
        &self,
        receiver: &Receiver,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError> {
        let address = self.address(receiver)?;
        let store = self.connector.connect(address).await?;
        Ok(Some(Box::new(SftpSession {
            store,
            address: format!("{}:{}/{}", address.host, address.port, address.file_path),
        })))
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        session: Option<&mut dyn TransportSession>,
        history: &mut ActionHistory,
    ) -> Result<RetryItems, TransportError> {
        let session = downcast_session::<SftpSession>(session, self.kind())?;
        let header = delivery.header;
        let file_name = delivery_file_name(delivery)?;

        match self.upload(session.store.as_mut(), &file_name, &header.body).await {
            Ok(()) => {
                info!(
                    report_id = %header.report_id,
                    receiver = %delivery.receiver.full_name,
                    file_name = %file_name,
                    address = %session.address,
                    "uploaded report"
                );
                history.track_sent_report(SentReport {
                    sent_report_id: delivery.sent_report_id,
                    receiver_name: delivery.receiver.full_name.clone(),
                    source_report_id: header.report_id,
                    file_name: Some(file_name),
                    item_count: 1,
                    params: Some(session.address.clone()),
                });
                Ok(Vec::new())
            }
            Err(err) => {
                warn!(
                    report_id = %header.report_id,
                    receiver = %delivery.receiver.full_name,
                    file_name = %file_name,
                    error = %err,
                    "upload failed"
                );
                history.track_action_result(format!(
                    "Failed to upload {file_name} to {}: {err}",
                    session.address
                ));
                Ok(delivery.attempted_items())
            }
        }
    }
}
