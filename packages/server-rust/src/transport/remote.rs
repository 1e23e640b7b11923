//! Remote file stores behind the secure-file-transfer transports.
//!
//! The transports speak to a [`RemoteFileStore`] obtained from a
//! [`RemoteFileConnector`]. Real drops are reached over SSH through
//! [`SshConnector`](super::ssh::SshConnector). [`LocalDirectoryConnector`]
//! maps every `host:port/filePath` address onto a local directory tree and
//! never contacts the host; it serves dry runs and tests.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use relay_core::SftpTransportConfig;
use tracing::debug;

use super::TransportError;

/// Opens connections to remote file stores.
#[async_trait]
pub trait RemoteFileConnector: Send + Sync {
    /// Connect and authenticate against the store at `address`.
    async fn connect(
        &self,
        address: &SftpTransportConfig,
    ) -> Result<Box<dyn RemoteFileStore>, TransportError>;
}

/// An open connection to a remote file store. Paths are relative to the
/// address's `filePath`.
#[async_trait]
pub trait RemoteFileStore: Send {
    /// Write `contents` to `path`, replacing any existing file.
    async fn put(&mut self, path: &str, contents: &[u8]) -> io::Result<()>;

    /// Move `from` to `to`, replacing any existing file.
    async fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;

    /// Close the connection.
    async fn close(&mut self) -> io::Result<()>;
}

// ---------------------------------------------------------------------------
// LocalDirectoryConnector
// ---------------------------------------------------------------------------

/// Serves remote addresses from `<root>/<host>_<port>/<filePath>`.
#[derive(Debug, Clone)]
pub struct LocalDirectoryConnector {
    root: PathBuf,
}

impl LocalDirectoryConnector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that backs `address`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the host or file path would escape the root.
    pub fn directory_for(&self, address: &SftpTransportConfig) -> io::Result<PathBuf> {
        let host = format!("{}_{}", address.host, address.port);
        let mut dir = self.root.join(relative_path(&host)?);
        dir.push(relative_path(&address.file_path)?);
        Ok(dir)
    }
}

/// Keeps only the normal components of `path`; rejects `..`.
fn relative_path(path: &str) -> io::Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("path escapes the drop root: {path}"),
                ))
            }
        }
    }
    Ok(relative)
}

#[async_trait]
impl RemoteFileConnector for LocalDirectoryConnector {
    async fn connect(
        &self,
        address: &SftpTransportConfig,
    ) -> Result<Box<dyn RemoteFileStore>, TransportError> {
        let connect_error = |source| TransportError::Connect {
            address: format!("{}:{}", address.host, address.port),
            source,
        };
        let dir = self.directory_for(address).map_err(connect_error)?;
        tokio::fs::create_dir_all(&dir).await.map_err(connect_error)?;
        debug!(dir = %dir.display(), "opened local drop directory");
        Ok(Box::new(LocalDirectoryStore { dir }))
    }
}

/// A [`RemoteFileStore`] writing into one local directory.
#[derive(Debug)]
pub struct LocalDirectoryStore {
    dir: PathBuf,
}

impl LocalDirectoryStore {
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        Ok(self.dir.join(relative_path(path)?))
    }
}

#[async_trait]
impl RemoteFileStore for LocalDirectoryStore {
    async fn put(&mut self, path: &str, contents: &[u8]) -> io::Result<()> {
        tokio::fs::write(self.resolve(path)?, contents).await
    }

    async fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        tokio::fs::rename(self.resolve(from)?, self.resolve(to)?).await
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}
