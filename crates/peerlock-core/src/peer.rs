//! Server/client role classification for one application identity.
//!
//! The first launch to take the write lock on the identity's lock file
//! becomes the server and binds the local endpoint. Every other launch is a
//! client and may forward one message per `send_message` call.
//!
//! # Example
//!
//! ```rust,ignore
//! use peerlock::InstancePeer;
//! use std::time::Duration;
//!
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let peer = InstancePeer::builder().app_id("org.example.viewer").sink(tx).build()?;
//!
//! if peer.is_server().await? {
//!     while let Some(message) = rx.recv().await {
//!         println!("another launch asked for: {}", message);
//!     }
//! } else {
//!     peer.send_message("open report.pdf", Duration::from_secs(5)).await?;
//! }
//! ```

use crate::config::PeerOptions;
use crate::error::{PeerError, Result};
use crate::ipc::{
    EndpointIdentity, LocalListener, LogSink, MessageSink, PeerClient, PeerServer,
    PeerServerHandle, ServerTimeouts,
};
use crate::lock::{AdvisoryLock, LockBackend, LockMode, LockWorker};
use crate::platform;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One launch's view of its application's single-instance rendezvous.
pub struct InstancePeer {
    identity: EndpointIdentity,
    options: PeerOptions,
    socket_path: PathBuf,
    sink: Arc<dyn MessageSink>,
    /// Dropped before `lock` so the endpoint closes while the lock is held.
    server: tokio::sync::Mutex<Option<PeerServerHandle>>,
    lock: LockWorker,
}

impl std::fmt::Debug for InstancePeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstancePeer")
            .field("identity", &self.identity)
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

impl InstancePeer {
    /// Create a builder for InstancePeer.
    pub fn builder() -> InstancePeerBuilder {
        InstancePeerBuilder::new()
    }

    /// Peer for an explicit application id with default options.
    pub fn new(app_id: impl Into<String>) -> Result<Self> {
        Self::builder().app_id(app_id).build()
    }

    /// Identity string the endpoint was derived from.
    pub fn application_id(&self) -> &str {
        self.identity.id()
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn options(&self) -> &PeerOptions {
        &self.options
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn lock_file_path(&self) -> &Path {
        self.lock.path()
    }

    /// Decide whether this launch is the server.
    ///
    /// Once this returns `true` it keeps returning `true` without touching
    /// the lock again. A `false` result is re-evaluated on every call, so a
    /// client is promoted if the previous server has exited. A lock that
    /// cannot be taken for any reason, including an unopenable lock file,
    /// makes this launch a client.
    ///
    /// Must be called from within a tokio runtime; becoming the server
    /// spawns the accept loop.
    pub async fn is_server(&self) -> Result<bool> {
        let mut server = self.server.lock().await;

        if self.lock.mode().await? != LockMode::NoLock {
            return Ok(true);
        }

        match self.lock.lock(LockMode::WriteLock, false).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("{} is already served; acting as client", self.identity);
                return Ok(false);
            }
            Err(e) => {
                warn!(
                    "Instance lock for {} unavailable ({}); acting as client",
                    self.identity, e
                );
                return Ok(false);
            }
        }

        info!("Acting as server for {}", self.identity);
        match LocalListener::bind(&self.socket_path) {
            Ok(listener) => {
                *server = Some(PeerServer::start(
                    listener,
                    Arc::clone(&self.sink),
                    ServerTimeouts::from(&self.options),
                ));
            }
            Err(e) => warn!("Listen on local socket failed: {}", e),
        }

        Ok(true)
    }

    /// Convenience negation of [`is_server`](Self::is_server).
    pub async fn is_client(&self) -> Result<bool> {
        Ok(!self.is_server().await?)
    }

    /// True while this peer is the server and its accept loop is running.
    pub async fn is_listening(&self) -> bool {
        self.server
            .lock()
            .await
            .as_ref()
            .map(PeerServerHandle::is_running)
            .unwrap_or(false)
    }

    /// Forward `message` to the server instance.
    ///
    /// # Errors
    ///
    /// - `SelfDelivery` if this launch is itself the server
    /// - `ConnectFailed`, `Timeout` or `AckMismatch` from the client path
    pub async fn send_message(&self, message: &str, timeout: Duration) -> Result<()> {
        if self.is_server().await? {
            return Err(PeerError::SelfDelivery);
        }

        PeerClient::new(&self.socket_path)
            .with_retry_delay(self.options.connect_retry_delay())
            .send(message, timeout)
            .await
            .inspect_err(|e| debug!("send_message to {} failed: {}", self.identity, e))
    }

    /// Stop serving and release the lock so another launch can take over.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(mut handle) = self.server.lock().await.take() {
            handle.shutdown();
        }
        self.lock.unlock().await?;
        Ok(())
    }
}

/// Builder for configuring InstancePeer initialization.
///
/// # Example
///
/// ```rust,ignore
/// let peer = InstancePeer::builder()
///     .app_id("org.example.viewer")
///     .lock_backend(LockBackend::Slots)
///     .sink(tx)
///     .build()?;
/// ```
pub struct InstancePeerBuilder {
    options: PeerOptions,
    sink: Option<Arc<dyn MessageSink>>,
}

impl Default for InstancePeerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl InstancePeerBuilder {
    pub fn new() -> Self {
        Self {
            options: PeerOptions::default(),
            sink: None,
        }
    }

    /// Replace all options at once.
    pub fn options(mut self, options: PeerOptions) -> Self {
        self.options = options;
        self
    }

    /// Identify the application explicitly instead of by executable path.
    pub fn app_id(mut self, app_id: impl Into<String>) -> Self {
        self.options.app_id = Some(app_id.into());
        self
    }

    pub fn lock_backend(mut self, backend: LockBackend) -> Self {
        self.options.lock_backend = backend;
        self
    }

    /// Directory for the lock file and, on Unix, the socket.
    ///
    /// Default: the system temporary directory
    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.temp_dir = Some(dir.into());
        self
    }

    /// Where received messages go. Default: logged and discarded.
    pub fn sink(mut self, sink: impl MessageSink) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Compute the endpoint identity and open the lock file.
    ///
    /// A lock file that cannot be opened is logged here and reported by
    /// the first `is_server` call.
    pub fn build(self) -> Result<InstancePeer> {
        self.options.validate()?;

        let identity = EndpointIdentity::resolve(self.options.app_id.as_deref())?;
        let temp_dir = self.options.resolved_temp_dir();
        let socket_path = identity.socket_path(&temp_dir);

        let mut lock = AdvisoryLock::with_max_readers(
            identity.lock_file_path(&temp_dir),
            self.options.lock_backend,
            self.options.max_readers,
        );
        if let Err(e) = lock.open() {
            warn!("Could not open lock file for {}: {}", identity, e);
        }

        debug!(
            "Instance peer for {} (endpoint {}, {})",
            identity.id(),
            identity.name(),
            platform::current_platform()
        );

        Ok(InstancePeer {
            identity,
            options: self.options,
            socket_path,
            sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
            server: tokio::sync::Mutex::new(None),
            lock: LockWorker::spawn(lock)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn unique_id() -> String {
        format!("peer-test-{}", uuid::Uuid::new_v4())
    }

    #[test]
    fn test_builder_paths() {
        let dir = TempDir::new().unwrap();
        let peer = InstancePeer::builder()
            .app_id("org.example.viewer")
            .temp_dir(dir.path())
            .build()
            .unwrap();

        assert_eq!(peer.application_id(), "org.example.viewer");
        assert!(peer.lock_file_path().starts_with(dir.path()));
        assert!(peer
            .lock_file_path()
            .to_string_lossy()
            .ends_with("-lockfile"));
        assert!(peer.lock_file_path().exists());
    }

    #[test]
    fn test_builder_rejects_invalid_options() {
        let result = InstancePeer::builder()
            .options(PeerOptions {
                max_readers: 0,
                ..PeerOptions::default()
            })
            .build();
        assert!(matches!(result, Err(PeerError::Config { .. })));
    }

    #[tokio::test]
    async fn test_is_server_is_memoized() {
        let dir = TempDir::new().unwrap();
        let peer = InstancePeer::builder()
            .app_id(unique_id())
            .temp_dir(dir.path())
            .build()
            .unwrap();

        assert!(peer.is_server().await.unwrap());
        assert!(peer.is_server().await.unwrap());
        assert!(!peer.is_client().await.unwrap());
        assert!(peer.is_listening().await);
    }

    #[tokio::test]
    async fn test_server_cannot_send_to_itself() {
        let dir = TempDir::new().unwrap();
        let peer = InstancePeer::builder()
            .app_id(unique_id())
            .temp_dir(dir.path())
            .build()
            .unwrap();

        let err = peer
            .send_message("hello", Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::SelfDelivery));
    }

    #[tokio::test]
    async fn test_shutdown_releases_role() {
        let dir = TempDir::new().unwrap();
        let id = unique_id();
        let first = InstancePeer::builder()
            .app_id(id.clone())
            .temp_dir(dir.path())
            .lock_backend(LockBackend::Region)
            .build()
            .unwrap();
        let second = InstancePeer::builder()
            .app_id(id)
            .temp_dir(dir.path())
            .lock_backend(LockBackend::Region)
            .build()
            .unwrap();

        assert!(first.is_server().await.unwrap());
        assert!(!second.is_server().await.unwrap());

        first.shutdown().await.unwrap();
        assert!(second.is_server().await.unwrap());
    }
}
