//! Receiver transport configuration.
//!
//! A receiver's transport is a closed set of variants keyed by a `type`
//! discriminator, e.g.
//!
//! ```json
//! { "type": "SFTP", "host": "sftp.example.org", "port": "22", "filePath": "./upload" }
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Sender address used by email transports that do not configure one.
pub const DEFAULT_EMAIL_SENDER: &str = "qtv1@cdc.gov";

fn default_email_sender() -> String {
    DEFAULT_EMAIL_SENDER.to_string()
}

/// Accepts a port written either as a JSON number or as a string.
fn deserialize_port<'de, D>(deserializer: D) -> Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortRepr {
        Number(u16),
        Text(String),
    }

    match PortRepr::deserialize(deserializer)? {
        PortRepr::Number(port) => Ok(port),
        PortRepr::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Delivery mechanism configured for a receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransportConfig {
    #[serde(rename = "SFTP")]
    Sftp(SftpTransportConfig),
    /// Same addressing as [`TransportConfig::Sftp`], spoken in the legacy
    /// server dialect.
    #[serde(rename = "SFTP_LEGACY")]
    SftpLegacy(SftpTransportConfig),
    #[serde(rename = "EMAIL")]
    Email(EmailTransportConfig),
    /// Partner clinical API.
    #[serde(rename = "REDOX")]
    Redox(RedoxTransportConfig),
    /// Discards reports; used for test and dry-run wiring.
    #[serde(rename = "NULL")]
    Null,
}

impl TransportConfig {
    /// The discriminator written in the `type` field.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Sftp(_) => TransportKind::Sftp,
            Self::SftpLegacy(_) => TransportKind::SftpLegacy,
            Self::Email(_) => TransportKind::Email,
            Self::Redox(_) => TransportKind::Redox,
            Self::Null => TransportKind::Null,
        }
    }
}

/// Payload-free discriminant of [`TransportConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Sftp,
    SftpLegacy,
    Email,
    Redox,
    Null,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Sftp => "SFTP",
            Self::SftpLegacy => "SFTP_LEGACY",
            Self::Email => "EMAIL",
            Self::Redox => "REDOX",
            Self::Null => "NULL",
        };
        f.write_str(tag)
    }
}

/// Address of a secure-file-transfer drop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SftpTransportConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    /// Remote directory files are written into.
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTransportConfig {
    pub addresses: Vec<String>,
    #[serde(default = "default_email_sender")]
    pub from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedoxTransportConfig {
    pub api_key: String,
    /// Overrides the deployment-wide partner API base URL.
    #[serde(default)]
    pub base_url: Option<String>,
}
