//! Local-socket server for the instance that won the lock.
//!
//! Accepts connections from client launches, reads one framed message per
//! connection, hands it to a `MessageSink` and acknowledges it.
//!
//! # Scheduling
//!
//! The accept loop runs as a single tokio task and services connections
//! inline, one at a time. A client that connects while another is mid
//! handshake waits in the listen backlog until the first one finishes or
//! times out.

use super::protocol::{decode_message, read_frame, write_ack};
use super::transport::LocalListener;
use crate::config::PeerOptions;
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Receives messages forwarded by client launches.
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync + 'static {
    /// Called once per fully received message, before it is acknowledged.
    async fn on_message(&self, message: String);
}

#[async_trait::async_trait]
impl MessageSink for mpsc::UnboundedSender<String> {
    async fn on_message(&self, message: String) {
        if self.send(message).is_err() {
            warn!("Message receiver dropped; discarding message");
        }
    }
}

#[async_trait::async_trait]
impl MessageSink for mpsc::Sender<String> {
    async fn on_message(&self, message: String) {
        if self.send(message).await.is_err() {
            warn!("Message receiver dropped; discarding message");
        }
    }
}

/// Sink that only logs. Used when the host registers none.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl MessageSink for LogSink {
    async fn on_message(&self, message: String) {
        info!("Received message ({} bytes) with no sink registered", message.len());
    }
}

/// Per-connection wait bounds.
#[derive(Debug, Clone, Copy)]
pub struct ServerTimeouts {
    /// Bound on each read while waiting for the length prefix.
    pub header: Duration,
    /// Bound on each read of the payload.
    pub stall: Duration,
    /// Bound on flushing the ack and on waiting for the client to hang up.
    pub linger: Duration,
}

impl From<&PeerOptions> for ServerTimeouts {
    fn from(opts: &PeerOptions) -> Self {
        Self {
            header: opts.header_timeout(),
            stall: opts.read_stall_timeout(),
            linger: opts.ack_linger(),
        }
    }
}

impl Default for ServerTimeouts {
    fn default() -> Self {
        Self::from(&PeerOptions::default())
    }
}

/// Handle to a running server. Dropping shuts the server down.
#[derive(Debug)]
pub struct PeerServerHandle {
    endpoint: PathBuf,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PeerServerHandle {
    /// Address the server is listening on.
    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Stop accepting connections.
    ///
    /// A connection already being serviced completes first.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for PeerServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Server that accepts client launches.
pub struct PeerServer;

impl PeerServer {
    /// Start serving on an already bound listener.
    pub fn start(
        listener: LocalListener,
        sink: Arc<dyn MessageSink>,
        timeouts: ServerTimeouts,
    ) -> PeerServerHandle {
        let endpoint = listener.path().to_path_buf();
        info!("Instance server listening on {}", endpoint.display());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task_handle = tokio::spawn(Self::accept_loop(listener, sink, timeouts, shutdown_rx));

        PeerServerHandle {
            endpoint,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        }
    }

    async fn accept_loop(
        mut listener: LocalListener,
        sink: Arc<dyn MessageSink>,
        timeouts: ServerTimeouts,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Instance server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok(stream) => {
                            Self::handle_connection(stream, &*sink, &timeouts).await;
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", listener.path().display(), e);
                        }
                    }
                }
            }
        }
    }

    /// Service one connection to completion. Never fails: a bad connection
    /// is dropped without emitting anything.
    pub async fn handle_connection<S>(mut stream: S, sink: &dyn MessageSink, timeouts: &ServerTimeouts)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let message = match Self::receive(&mut stream, timeouts).await {
            Ok(Some(message)) => message,
            Ok(None) => {
                debug!("Peer disconnected before sending a message");
                return;
            }
            Err(e) => {
                warn!("Message reception failed: {}", e);
                return;
            }
        };

        debug!("Received message of {} bytes", message.len());
        sink.on_message(message).await;

        match timeout(timeouts.linger, write_ack(&mut stream)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Failed to send ack: {}", e);
                return;
            }
            Err(_) => {
                debug!("Timed out sending ack");
                return;
            }
        }

        // Give the client a chance to read the ack before the socket closes.
        let _ = timeout(timeouts.linger, async {
            let mut buf = [0u8; 64];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => continue,
                }
            }
        })
        .await;
    }

    async fn receive<S>(stream: &mut S, timeouts: &ServerTimeouts) -> Result<Option<String>>
    where
        S: AsyncRead + Unpin,
    {
        match read_frame(stream, timeouts.header, timeouts.stall).await? {
            Some(payload) => Ok(Some(decode_message(payload)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::encode_frame;
    use tokio::io::AsyncWriteExt;

    fn fast() -> ServerTimeouts {
        ServerTimeouts {
            header: Duration::from_millis(200),
            stall: Duration::from_millis(100),
            linger: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_full_frame_is_emitted_and_acked() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(&encode_frame("open file.txt").unwrap()).await.unwrap();

        let serve = tokio::spawn(async move {
            PeerServer::handle_connection(server, &tx, &fast()).await;
        });

        let mut ack = [0u8; 3];
        client.read_exact(&mut ack).await.unwrap();
        assert_eq!(&ack, b"ack");
        drop(client);
        serve.await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("open file.txt"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_partial_frame_is_dropped_silently() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(&20u32.to_be_bytes()).await.unwrap();
        client.write_all(b"only part").await.unwrap();

        PeerServer::handle_connection(server, &tx, &fast()).await;

        let mut buf = Vec::new();
        client.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty(), "no ack for a partial frame");
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let (mut client, server) = tokio::io::duplex(256);

        client.write_all(&2u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xff, 0xfe]).await.unwrap();

        PeerServer::handle_connection(server, &tx, &fast()).await;
        drop(tx);
        assert!(rx.recv().await.is_none());
    }
}
