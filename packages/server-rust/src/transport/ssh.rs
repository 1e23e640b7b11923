//! SSH connector for the secure-file-transfer transports.
//!
//! [`SshConnector`] opens one SSH connection per batch, authenticates with
//! the deployment's [`SshCredentials`], and serves the drop directory over
//! the `sftp` subsystem.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use relay_core::SftpTransportConfig;
use russh::client::{self, Handle};
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::Disconnect;
use russh_sftp::client::SftpSession;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::remote::{RemoteFileConnector, RemoteFileStore};
use super::TransportError;

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// How the worker proves its identity to drop servers.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    /// OpenSSH or PEM private key on disk.
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(<redacted>)"),
            Self::PrivateKey { path, .. } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// Login used for every secure-file-transfer receiver.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub user: String,
    pub auth: SshAuth,
    /// `known_hosts` file that server keys are checked against. Without one
    /// any server key is accepted and its fingerprint logged.
    pub known_hosts: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Host key check
// ---------------------------------------------------------------------------

struct HostKeyCheck {
    host: String,
    port: u16,
    known_hosts: Option<PathBuf>,
}

impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint(HashAlg::Sha256);
        let Some(path) = &self.known_hosts else {
            debug!(host = %self.host, fingerprint = %fingerprint, "accepting unpinned server key");
            return Ok(true);
        };
        match russh::keys::check_known_hosts_path(&self.host, self.port, server_public_key, path) {
            Ok(known) => {
                if !known {
                    warn!(host = %self.host, fingerprint = %fingerprint, "server key not in known_hosts");
                }
                Ok(known)
            }
            Err(err) => {
                warn!(host = %self.host, error = %err, "server key rejected");
                Ok(false)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SshConnector
// ---------------------------------------------------------------------------

/// Connects to `host:port` over SSH and opens an SFTP session rooted at the
/// address's `filePath`.
#[derive(Debug, Clone)]
pub struct SshConnector {
    credentials: SshCredentials,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(credentials: SshCredentials, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
        }
    }

    async fn authenticate(
        &self,
        handle: &mut Handle<HostKeyCheck>,
        endpoint: &str,
    ) -> Result<(), TransportError> {
        let auth_error = |reason: String| TransportError::Authentication {
            endpoint: endpoint.to_string(),
            reason,
        };
        let user = self.credentials.user.as_str();
        let result = match &self.credentials.auth {
            SshAuth::Password(password) => handle.authenticate_password(user, password).await,
            SshAuth::PrivateKey { path, passphrase } => {
                let key = russh::keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|err| auth_error(format!("cannot load {}: {err}", path.display())))?;
                let hash = handle
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|err| auth_error(err.to_string()))?
                    .flatten();
                handle
                    .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash))
                    .await
            }
        };
        match result {
            Ok(outcome) if outcome.success() => Ok(()),
            Ok(_) => Err(auth_error(format!("server refused login for {user}"))),
            Err(err) => Err(auth_error(err.to_string())),
        }
    }

    async fn open(&self, address: &SftpTransportConfig) -> Result<SshStore, TransportError> {
        let endpoint = format!("{}:{}", address.host, address.port);
        let connect_error = |source: io::Error| TransportError::Connect {
            address: endpoint.clone(),
            source,
        };

        let config = Arc::new(client::Config {
            inactivity_timeout: Some(self.timeout),
            ..client::Config::default()
        });
        let handler = HostKeyCheck {
            host: address.host.clone(),
            port: address.port,
            known_hosts: self.credentials.known_hosts.clone(),
        };
        let mut handle = client::connect(config, (address.host.as_str(), address.port), handler)
            .await
            .map_err(|err| match err {
                russh::Error::UnknownKey => TransportError::Authentication {
                    endpoint: endpoint.clone(),
                    reason: "server key is not trusted".to_string(),
                },
                other => connect_error(io::Error::other(other)),
            })?;

        self.authenticate(&mut handle, &endpoint).await?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|err| connect_error(io::Error::other(err)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| connect_error(io::Error::other(err)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| connect_error(io::Error::other(err)))?;

        debug!(address = %endpoint, user = %self.credentials.user, "opened sftp session");
        Ok(SshStore {
            handle,
            sftp,
            dir: address.file_path.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RemoteFileConnector for SshConnector {
    async fn connect(
        &self,
        address: &SftpTransportConfig,
    ) -> Result<Box<dyn RemoteFileStore>, TransportError> {
        match tokio::time::timeout(self.timeout, self.open(address)).await {
            Ok(store) => Ok(Box::new(store?)),
            Err(_) => Err(TransportError::Connect {
                address: format!("{}:{}", address.host, address.port),
                source: io::Error::new(io::ErrorKind::TimedOut, "ssh handshake timed out"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SshStore
// ---------------------------------------------------------------------------

/// An authenticated SFTP session on one drop directory.
pub struct SshStore {
    handle: Handle<HostKeyCheck>,
    sftp: SftpSession,
    dir: String,
}

impl SshStore {
    fn remote_path(&self, name: &str) -> String {
        if self.dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{name}", self.dir)
        }
    }
}

#[async_trait]
impl RemoteFileStore for SshStore {
    async fn put(&mut self, path: &str, contents: &[u8]) -> io::Result<()> {
        let mut file = self
            .sftp
            .create(self.remote_path(path))
            .await
            .map_err(io::Error::other)?;
        file.write_all(contents).await?;
        file.shutdown().await
    }

    async fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let to = self.remote_path(to);
        if self.sftp.try_exists(to.clone()).await.map_err(io::Error::other)? {
            self.sftp.remove_file(to.clone()).await.map_err(io::Error::other)?;
        }
        self.sftp
            .rename(self.remote_path(from), to)
            .await
            .map_err(io::Error::other)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.sftp.close().await.map_err(io::Error::other)?;
        self.handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(io::Error::other)
    }
}
