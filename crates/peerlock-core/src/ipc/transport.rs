//! Local socket transport.
//!
//! # Platform Behavior
//! - **Linux/macOS**: Unix domain sockets. The listener removes its socket
//!   file when dropped.
//! - **Windows**: named pipes. A fresh pipe instance is created after each
//!   accepted connection so the next client always finds one waiting.

use crate::error::{PeerError, Result};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(windows)]
use tokio::net::windows::named_pipe::{
    ClientOptions, NamedPipeClient, NamedPipeServer, ServerOptions,
};

/// Server side of an accepted connection.
#[cfg(unix)]
pub type ServerStream = UnixStream;
/// Client side of a connection.
#[cfg(unix)]
pub type ClientStream = UnixStream;

#[cfg(windows)]
pub type ServerStream = NamedPipeServer;
#[cfg(windows)]
pub type ClientStream = NamedPipeClient;

/// Listening endpoint bound to a socket path.
#[derive(Debug)]
pub struct LocalListener {
    path: PathBuf,
    #[cfg(unix)]
    inner: UnixListener,
    /// Device and inode of the socket file this listener created.
    #[cfg(unix)]
    file_id: Option<(u64, u64)>,
    #[cfg(windows)]
    next: NamedPipeServer,
}

impl LocalListener {
    /// Bind the endpoint. Must be called from within a tokio runtime.
    ///
    /// On Unix a socket file left behind by a crashed server makes the
    /// first bind fail with `AddrInUse`; the file is removed and the bind
    /// retried once. Callers only bind after winning the instance lock, so
    /// any existing file is stale.
    #[cfg(unix)]
    pub fn bind(path: &Path) -> Result<Self> {
        let inner = match UnixListener::bind(path) {
            Ok(listener) => listener,
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                warn!("Removing stale endpoint {}", path.display());
                std::fs::remove_file(path).map_err(|e| PeerError::io_with_path(e, path))?;
                UnixListener::bind(path).map_err(|e| bind_error(path, e))?
            }
            Err(e) => return Err(bind_error(path, e)),
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner,
            file_id: socket_file_id(path),
        })
    }

    #[cfg(windows)]
    pub fn bind(path: &Path) -> Result<Self> {
        let next = ServerOptions::new()
            .first_pipe_instance(true)
            .create(path)
            .map_err(|e| bind_error(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            next,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next client connection.
    #[cfg(unix)]
    pub async fn accept(&mut self) -> io::Result<ServerStream> {
        let (stream, _) = self.inner.accept().await?;
        Ok(stream)
    }

    #[cfg(windows)]
    pub async fn accept(&mut self) -> io::Result<ServerStream> {
        self.next.connect().await?;
        let fresh = ServerOptions::new().create(&self.path)?;
        Ok(std::mem::replace(&mut self.next, fresh))
    }
}

#[cfg(unix)]
fn socket_file_id(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::symlink_metadata(path)
        .ok()
        .map(|meta| (meta.dev(), meta.ino()))
}

#[cfg(unix)]
impl Drop for LocalListener {
    fn drop(&mut self) {
        // A successor may already have replaced the file with its own socket.
        if self.file_id.is_none() || socket_file_id(&self.path) != self.file_id {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed endpoint {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove endpoint {}: {}", self.path.display(), e),
        }
    }
}

fn bind_error(path: &Path, err: io::Error) -> PeerError {
    PeerError::Bind {
        endpoint: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Open one connection to the endpoint at `path`.
///
/// The caller bounds the attempt with a timeout.
#[cfg(unix)]
pub async fn connect(path: &Path) -> io::Result<ClientStream> {
    UnixStream::connect(path).await
}

#[cfg(windows)]
pub async fn connect(path: &Path) -> io::Result<ClientStream> {
    use windows_sys::Win32::Foundation::ERROR_PIPE_BUSY;

    loop {
        match ClientOptions::new().open(path) {
            Ok(client) => return Ok(client),
            Err(e) if e.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
                tokio::time::sleep(crate::config::PeerConfig::PIPE_BUSY_RETRY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
