//! Transport lookup by receiver configuration.

use std::sync::Arc;

use relay_core::TransportConfig;
use reqwest::Client;
use tracing::{debug, warn};

use super::{
    EmailTransport, LocalDirectoryConnector, NullTransport, RedoxTransport, RemoteFileConnector,
    SftpDialect, SftpTransport, SshConnector, Transport, TransportError,
};
use crate::service::config::TransportSettings;

/// The transports bound in this deployment.
///
/// Every configuration variant has a slot. Unbound slots resolve to `None`,
/// which the dispatcher treats the same as a receiver without a transport.
#[derive(Clone)]
pub struct TransportRegistry {
    sftp: Option<Arc<dyn Transport>>,
    sftp_legacy: Option<Arc<dyn Transport>>,
    email: Option<Arc<dyn Transport>>,
    redox: Option<Arc<dyn Transport>>,
    null: Arc<dyn Transport>,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportRegistry {
    /// A registry with only the null transport bound.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sftp: None,
            sftp_legacy: None,
            email: None,
            redox: None,
            null: Arc::new(NullTransport),
        }
    }

    #[must_use]
    pub fn with_sftp(mut self, transport: Arc<dyn Transport>) -> Self {
        self.sftp = Some(transport);
        self
    }

    #[must_use]
    pub fn with_sftp_legacy(mut self, transport: Arc<dyn Transport>) -> Self {
        self.sftp_legacy = Some(transport);
        self
    }

    #[must_use]
    pub fn with_email(mut self, transport: Arc<dyn Transport>) -> Self {
        self.email = Some(transport);
        self
    }

    #[must_use]
    pub fn with_redox(mut self, transport: Arc<dyn Transport>) -> Self {
        self.redox = Some(transport);
        self
    }

    #[must_use]
    pub fn with_null(mut self, transport: Arc<dyn Transport>) -> Self {
        self.null = transport;
        self
    }

    /// Bind both file-transfer dialects to one connector.
    #[must_use]
    pub fn with_file_transfer(self, connector: Arc<dyn RemoteFileConnector>) -> Self {
        self.with_sftp(Arc::new(SftpTransport::new(
            SftpDialect::Current,
            connector.clone(),
        )))
        .with_sftp_legacy(Arc::new(SftpTransport::new(SftpDialect::Legacy, connector)))
    }

    /// Bind every transport whose settings are present.
    ///
    /// File drops go over SSH when credentials are set. The local drop root
    /// is only bound without them.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Http`] if the HTTP client cannot be built.
    pub fn from_settings(settings: &TransportSettings) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(settings.http_timeout).build()?;
        let mut registry = Self::new();

        if let Some(credentials) = &settings.sftp_credentials {
            debug!(user = %credentials.user, "binding file transfer transports over ssh");
            registry = registry.with_file_transfer(Arc::new(SshConnector::new(
                credentials.clone(),
                settings.http_timeout,
            )));
        } else if let Some(root) = &settings.file_drop_root {
            warn!(root = %root.display(), "file drops go to a local directory, not to receiver hosts");
            registry = registry.with_file_transfer(Arc::new(LocalDirectoryConnector::new(root)));
        }
        if let (Some(url), Some(key)) = (&settings.email_api_url, &settings.email_api_key) {
            debug!(url = %url, "binding email transport");
            registry =
                registry.with_email(Arc::new(EmailTransport::new(client.clone(), url, key)));
        }
        if let Some(secret) = &settings.redox_secret {
            debug!(url = %settings.redox_base_url, "binding partner API transport");
            registry = registry.with_redox(Arc::new(RedoxTransport::new(
                client,
                &settings.redox_base_url,
                secret,
            )));
        }
        Ok(registry)
    }

    /// The transport serving `config`, if one is bound.
    #[must_use]
    pub fn transport_for(&self, config: &TransportConfig) -> Option<Arc<dyn Transport>> {
        match config {
            TransportConfig::Sftp(_) => self.sftp.clone(),
            TransportConfig::SftpLegacy(_) => self.sftp_legacy.clone(),
            TransportConfig::Email(_) => self.email.clone(),
            TransportConfig::Redox(_) => self.redox.clone(),
            TransportConfig::Null => Some(self.null.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use relay_core::{
        EmailTransportConfig, Receiver, RedoxTransportConfig, SftpTransportConfig, TransportKind,
    };

    use super::*;
    use crate::transport::{SshAuth, SshCredentials};

    fn sftp() -> SftpTransportConfig {
        SftpTransportConfig {
            host: "h".to_string(),
            port: 22,
            file_path: "/".to_string(),
        }
    }

    fn email() -> TransportConfig {
        TransportConfig::Email(EmailTransportConfig {
            addresses: vec!["a@example.org".to_string()],
            from: "qtv1@cdc.gov".to_string(),
        })
    }

    fn redox() -> TransportConfig {
        TransportConfig::Redox(RedoxTransportConfig {
            api_key: "k".to_string(),
            base_url: None,
        })
    }

    #[test]
    fn empty_registry_binds_only_null() {
        let registry = TransportRegistry::new();
        assert_eq!(
            registry.transport_for(&TransportConfig::Null).map(|t| t.kind()),
            Some(TransportKind::Null)
        );
        assert!(registry.transport_for(&TransportConfig::Sftp(sftp())).is_none());
        assert!(registry.transport_for(&email()).is_none());
        assert!(registry.transport_for(&redox()).is_none());
    }

    #[test]
    fn settings_bind_configured_transports() {
        let root = tempfile::tempdir().unwrap();
        let settings = TransportSettings {
            file_drop_root: Some(root.path().to_path_buf()),
            redox_secret: Some("s".to_string()),
            ..TransportSettings::default()
        };
        let registry = TransportRegistry::from_settings(&settings).unwrap();

        let kind = |config: &TransportConfig| registry.transport_for(config).map(|t| t.kind());
        assert_eq!(kind(&TransportConfig::Sftp(sftp())), Some(TransportKind::Sftp));
        assert_eq!(
            kind(&TransportConfig::SftpLegacy(sftp())),
            Some(TransportKind::SftpLegacy)
        );
        assert_eq!(kind(&redox()), Some(TransportKind::Redox));
        // No mail API configured.
        assert_eq!(kind(&email()), None);
    }

    #[tokio::test]
    async fn ssh_credentials_take_precedence_over_drop_root() {
        let root = tempfile::tempdir().unwrap();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let settings = TransportSettings {
            sftp_credentials: Some(SshCredentials {
                user: "relay".to_string(),
                auth: SshAuth::Password("pw".to_string()),
                known_hosts: None,
            }),
            file_drop_root: Some(root.path().to_path_buf()),
            http_timeout: std::time::Duration::from_secs(5),
            ..TransportSettings::default()
        };
        let registry = TransportRegistry::from_settings(&settings).unwrap();
        let config = TransportConfig::Sftp(SftpTransportConfig {
            host: "127.0.0.1".to_string(),
            port,
            file_path: "in".to_string(),
        });
        let transport = registry.transport_for(&config).unwrap();

        let result = transport.start_session(&Receiver::new("x.y", Some(config))).await;

        assert!(matches!(result, Err(TransportError::Connect { .. })));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn email_needs_url_and_key() {
        let settings = TransportSettings {
            email_api_url: Some("https://mail.example.org/v3/mail/send".to_string()),
            ..TransportSettings::default()
        };
        let registry = TransportRegistry::from_settings(&settings).unwrap();
        assert!(registry.transport_for(&email()).is_none());

        let settings = TransportSettings {
            email_api_key: Some("key".to_string()),
            ..settings
        };
        let registry = TransportRegistry::from_settings(&settings).unwrap();
        assert_eq!(
            registry.transport_for(&email()).map(|t| t.kind()),
            Some(TransportKind::Email)
        );
    }
}
