//! Delivery mechanisms.
//!
//! Every receiver transport variant is served by one [`Transport`]:
//!
//! - [`sftp`]: secure file transfer, current and legacy dialects
//! - [`ssh`]: the SSH/SFTP connector behind the file-transfer transports
//! - [`email`]: one message per report through an HTTP mail API
//! - [`redox`]: partner clinical API, one request per message
//! - [`null`]: discards everything, for tests and dry runs
//! - [`registry`]: maps a receiver's configuration to its transport

pub mod email;
pub mod null;
pub mod redox;
pub mod registry;
pub mod remote;
pub mod sftp;
pub mod ssh;

#[cfg(test)]
mod fake_http;

use std::any::Any;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{
    all_items, ActionHistory, FileNameContext, Receiver, ReportHeader, RetryItems, TemplateError,
    TransportKind,
};
use uuid::Uuid;

pub use email::EmailTransport;
pub use null::NullTransport;
pub use redox::RedoxTransport;
pub use registry::TransportRegistry;
pub use remote::{LocalDirectoryConnector, RemoteFileConnector, RemoteFileStore};
pub use sftp::{SftpDialect, SftpTransport};
pub use ssh::{SshAuth, SshConnector, SshCredentials};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors a transport lets escape to the dispatcher.
///
/// Ordinary delivery failures are not errors: `send` reports them as retry
/// items. These variants abort the batch.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("authentication with {endpoint} failed: {reason}")]
    Authentication { endpoint: String, reason: String },
    #[error("could not reach {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{transport} transport requires a session")]
    MissingSession { transport: TransportKind },
    #[error("session does not belong to the {transport} transport")]
    WrongSession { transport: TransportKind },
    #[error("receiver {receiver} is not configured for the {transport} transport")]
    Misconfigured {
        receiver: String,
        transport: TransportKind,
    },
    #[error("failed to name delivered file: {0}")]
    FileName(#[from] TemplateError),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// TransportSession
// ---------------------------------------------------------------------------

/// Per-batch connection state owned by a transport.
///
/// The dispatcher opens at most one session per invocation and releases it
/// through [`close`](TransportSession::close) once the batch is done, or
/// through [`abort`](TransportSession::abort) if the invocation unwinds
/// before it got that far.
#[async_trait]
pub trait TransportSession: Send + Any {
    /// Gracefully release the session.
    async fn close(self: Box<Self>) -> Result<(), TransportError>;

    /// Synchronous best-effort release used when `close` cannot be awaited.
    fn abort(&mut self) {}

    /// Downcast support so a transport can recover its own session type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Recover the concrete session type a transport opened.
///
/// # Errors
///
/// Returns [`TransportError::MissingSession`] when there is no session and
/// [`TransportError::WrongSession`] when it belongs to another transport.
pub fn downcast_session<'s, T: TransportSession>(
    session: Option<&'s mut dyn TransportSession>,
    transport: TransportKind,
) -> Result<&'s mut T, TransportError> {
    session
        .ok_or(TransportError::MissingSession { transport })?
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or(TransportError::WrongSession { transport })
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// One delivery attempt of one report.
#[derive(Debug, Clone, Copy)]
pub struct Delivery<'a> {
    pub receiver: &'a Receiver,
    pub header: &'a ReportHeader,
    /// Minted fresh for every attempt so each physical artifact is unique.
    pub sent_report_id: Uuid,
    /// Items left over from the previous attempt, `None` on a first attempt.
    pub retry_items: Option<&'a [String]>,
    /// When the attempt is made, by the dispatcher's clock.
    pub attempted_at: DateTime<Utc>,
}

impl Delivery<'_> {
    /// The items this attempt covers, as they should be reported back when
    /// the whole attempt fails.
    #[must_use]
    pub fn attempted_items(&self) -> RetryItems {
        self.retry_items.map_or_else(all_items, <[String]>::to_vec)
    }
}

/// A delivery mechanism.
#[async_trait]
pub trait Transport: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Establish whatever state is shared by all sends to `receiver` in one
    /// batch. Stateless transports return `Ok(None)`.
    async fn start_session(
        &self,
        receiver: &Receiver,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError>;

    /// Deliver the report, or only the items named in `retry_items`, and
    /// return the items that still need delivery. Empty means delivered.
    ///
    /// Network and protocol failures are reported through the returned items
    /// so one outage never aborts the rest of the batch. An `Err` aborts the
    /// whole batch and is reserved for session-level problems.
    async fn send(
        &self,
        delivery: &Delivery<'_>,
        session: Option<&mut dyn TransportSession>,
        history: &mut ActionHistory,
    ) -> Result<RetryItems, TransportError>;
}

/// Name of the file a report is delivered as, including extension.
///
/// Uses the receiver's template when it has one, otherwise
/// `<organization>-<sent report id>-<timestamp>`, stamped with the attempt
/// time.
///
/// # Errors
///
/// Returns the template's rendering error.
pub fn delivery_file_name(delivery: &Delivery<'_>) -> Result<String, TemplateError> {
    let now = delivery.attempted_at;
    let receiver = delivery.receiver;
    let header = delivery.header;
    let base = match &receiver.file_name_template {
        Some(template) => template.file_name(&FileNameContext {
            receiving_organization: Some(receiver.organization()),
            schema_name: header.schema_name.as_deref(),
            processing_mode_code: receiver.processing_mode_code.as_deref(),
            created_at: now,
        })?,
        None => format!(
            "{}-{}-{}",
            receiver.organization(),
            delivery.sent_report_id,
            now.format("%Y%m%d%H%M%S"),
        ),
    };
    Ok(format!("{base}.{}", header.body_format.extension()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use relay_core::{BodyFormat, FileNameTemplate};

    use super::*;

    struct UnitSession;

    #[async_trait]
    impl TransportSession for UnitSession {
        async fn close(self: Box<Self>) -> Result<(), TransportError> {
            Ok(())
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    struct OtherSession;

    #[async_trait]
    impl TransportSession for OtherSession {
        async fn close(self: Box<Self>) -> Result<(), TransportError> {
            Ok(())
        }

        fn as_any_mut(&mut self) -> &mut dyn Any {
            self
        }
    }

    #[test]
    fn downcast_recovers_own_session() {
        let mut session = UnitSession;
        let result = downcast_session::<UnitSession>(Some(&mut session), TransportKind::Sftp);
        assert!(result.is_ok());
    }

    #[test]
    fn downcast_rejects_missing_and_foreign_sessions() {
        assert!(matches!(
            downcast_session::<UnitSession>(None, TransportKind::Redox),
            Err(TransportError::MissingSession { .. })
        ));
        let mut other = OtherSession;
        assert!(matches!(
            downcast_session::<UnitSession>(Some(&mut other), TransportKind::Redox),
            Err(TransportError::WrongSession { .. })
        ));
    }

    #[test]
    fn attempted_items_defaults_to_everything() {
        let receiver = Receiver::new("az-phd.elr", None);
        let header = ReportHeader::new("az-phd.elr", BodyFormat::Csv, "a");
        let first = Delivery {
            receiver: &receiver,
            header: &header,
            sent_report_id: Uuid::new_v4(),
            retry_items: None,
            attempted_at: Utc::now(),
        };
        assert_eq!(first.attempted_items(), all_items());

        let items = vec!["3".to_string()];
        let retry = Delivery {
            retry_items: Some(items.as_slice()),
            attempted_at: Utc::now(),
            ..first
        };
        assert_eq!(retry.attempted_items(), items);
    }

    #[test]
    fn default_file_name() {
        let receiver = Receiver::new("az-phd.elr", None);
        let header = ReportHeader::new("az-phd.elr", BodyFormat::Hl7Batch, "MSH|");
        let sent_report_id = Uuid::new_v4();
        let delivery = Delivery {
            receiver: &receiver,
            header: &header,
            sent_report_id,
            retry_items: None,
            attempted_at: Utc.with_ymd_and_hms(2021, 2, 3, 4, 5, 6).unwrap(),
        };
        assert_eq!(
            delivery_file_name(&delivery).unwrap(),
            format!("az-phd-{sent_report_id}-20210203040506.hl7")
        );
    }

    #[test]
    fn templated_file_name() {
        let mut receiver = Receiver::new("az-phd.elr", None);
        receiver.file_name_template = Some(
            FileNameTemplate::parse(&["cdcprime_", "receivingOrganization()", "_", "schemaBaseName()"])
                .unwrap()
                .upper_case(),
        );
        let header =
            ReportHeader::new("az-phd.elr", BodyFormat::Csv, "a").with_schema_name("az/pima-covid-19");
        let delivery = Delivery {
            receiver: &receiver,
            header: &header,
            sent_report_id: Uuid::new_v4(),
            retry_items: None,
            attempted_at: Utc::now(),
        };
        assert_eq!(
            delivery_file_name(&delivery).unwrap(),
            "CDCPRIME_AZ-PHD_PIMA-COVID-19.csv"
        );
    }
}
