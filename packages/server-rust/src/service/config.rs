use std::path::PathBuf;
use std::time::Duration;

use relay_core::RetryPolicy;

use crate::transport::redox::DEFAULT_REDOX_BASE_URL;
use crate::transport::SshCredentials;

/// Reports handed to a transport in one invocation at most.
pub const DEFAULT_MAX_FILES_PER_SESSION: usize = 100;

/// Dispatcher configuration.
///
/// Controls batch size and retry scheduling. Injected rather than read from
/// process-wide state so tests can use their own retry tables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of headers fetched per receiver event.
    pub max_files_per_session: usize,
    /// Backoff applied to batches that left items undelivered.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_files_per_session: DEFAULT_MAX_FILES_PER_SESSION,
            retry: RetryPolicy::default(),
        }
    }
}

/// Deployment-wide transport settings, used to build a
/// [`TransportRegistry`](crate::transport::TransportRegistry).
///
/// A transport whose settings are missing is left unbound, and receivers
/// configured for it are treated as having no transport.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Login for secure-file-transfer drop servers. When set, file drops go
    /// to the receivers' hosts over SSH.
    pub sftp_credentials: Option<SshCredentials>,
    /// Local directory that stands in for every drop server. Only used when
    /// no SSH credentials are configured, for dry runs and tests.
    pub file_drop_root: Option<PathBuf>,
    /// Full send endpoint of the HTTP mail API.
    pub email_api_url: Option<String>,
    pub email_api_key: Option<String>,
    /// Partner API base URL for receivers that do not set their own.
    pub redox_base_url: String,
    pub redox_secret: Option<String>,
    /// Timeout applied to every outbound HTTP request.
    pub http_timeout: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            sftp_credentials: None,
            file_drop_root: None,
            email_api_url: None,
            email_api_key: None,
            redox_base_url: DEFAULT_REDOX_BASE_URL.to_string(),
            redox_secret: None,
            http_timeout: Duration::from_secs(30),
        }
    }
}
