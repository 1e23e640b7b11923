use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::file_name::FileNameTemplate;
use crate::retry::RetryToken;
use crate::transport_type::TransportConfig;

// ---------------------------------------------------------------------------
// ReportId
// ---------------------------------------------------------------------------

/// Opaque unique identifier of a report. Immutable once issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(pub Uuid);

impl ReportId {
    /// Mint a fresh random report identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ReportId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// BodyFormat
// ---------------------------------------------------------------------------

/// Content encoding tag of a report body.
///
/// Variant names use `SCREAMING_SNAKE_CASE` on the wire to match the
/// configuration files receivers are described in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BodyFormat {
    /// Tabular, comma-separated values.
    Csv,
    /// A single HL7 v2 message.
    Hl7,
    /// An HL7 v2 batch (several messages in one file).
    Hl7Batch,
    /// Newline-delimited JSON messages for the partner clinical API.
    Redox,
}

impl BodyFormat {
    /// File extension used when the body is written out as a file.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Hl7 | Self::Hl7Batch => "hl7",
            Self::Redox => "json",
        }
    }

    /// MIME type used when the body is attached or posted.
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Hl7 | Self::Hl7Batch => "application/hl7-v2",
            Self::Redox => "application/json",
        }
    }
}

// ---------------------------------------------------------------------------
// ReportHeader
// ---------------------------------------------------------------------------

/// One report destined for one receiver, as handed to the send pipeline by the
/// fetch step.
///
/// The dispatch core never mutates a header. A failed attempt produces a new
/// [`RetryToken`] that the completion step persists for the next fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportHeader {
    pub report_id: ReportId,
    /// Full name of the destination receiver (`organization.service`).
    pub receiver_name: String,
    pub body_format: BodyFormat,
    /// Present only if an earlier attempt left items undelivered.
    pub retry_token: Option<RetryToken>,
    pub created_at: DateTime<Utc>,
    /// Schema the body was translated to, if known.
    pub schema_name: Option<String>,
    /// Report payload, loaded by the fetch step.
    pub body: Bytes,
}

impl ReportHeader {
    /// Create a header for a never-attempted report.
    pub fn new(
        receiver_name: impl Into<String>,
        body_format: BodyFormat,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            report_id: ReportId::new(),
            receiver_name: receiver_name.into(),
            body_format,
            retry_token: None,
            created_at: Utc::now(),
            schema_name: None,
            body: body.into(),
        }
    }

    /// Attach the retry token left by a previous attempt.
    #[must_use]
    pub fn with_retry_token(mut self, token: Option<RetryToken>) -> Self {
        self.retry_token = token;
        self
    }

    #[must_use]
    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Destination configuration for reports. Read-only to the send pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receiver {
    /// Routing key, `organization.service`.
    pub full_name: String,
    /// Delivery mechanism. `None` is a configuration error.
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    /// Display name of the receiving organization; derived from `full_name`
    /// when not configured.
    #[serde(default)]
    pub organization_name: Option<String>,
    /// Template for the names of delivered files.
    #[serde(default)]
    pub file_name_template: Option<FileNameTemplate>,
    /// HL7 processing mode code (`t`, `p`, `d`).
    #[serde(default)]
    pub processing_mode_code: Option<String>,
}

impl Receiver {
    pub fn new(full_name: impl Into<String>, transport: Option<TransportConfig>) -> Self {
        Self {
            full_name: full_name.into(),
            transport,
            organization_name: None,
            file_name_template: None,
            processing_mode_code: None,
        }
    }

    /// Organization part of the receiver, falling back to the part of
    /// `full_name` before the first `.`.
    #[must_use]
    pub fn organization(&self) -> &str {
        match &self.organization_name {
            Some(name) => name,
            None => self
                .full_name
                .split_once('.')
                .map_or(self.full_name.as_str(), |(org, _)| org),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskAction
// ---------------------------------------------------------------------------

/// Action recorded against a task in the action history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    Receive,
    Process,
    Batch,
    Send,
    SendError,
    Wipe,
    None,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Receive => "receive",
            Self::Process => "process",
            Self::Batch => "batch",
            Self::Send => "send",
            Self::SendError => "send_error",
            Self::Wipe => "wipe",
            Self::None => "none",
        };
        f.write_str(name)
    }
}
