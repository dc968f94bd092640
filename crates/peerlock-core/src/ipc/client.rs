//! Client side of the handoff: deliver one message to the running server.
//!
//! Connection is attempted twice, each attempt bounded by half the caller's
//! timeout, with a short pause between them for a server that is still
//! binding its endpoint.
//!
//! A missing ack does not tell the client whether the server processed the
//! message. Callers must not assume a failed send was never seen.

use super::protocol::{read_ack, write_frame};
use super::transport::{self, ClientStream};
use crate::config::PeerConfig;
use crate::{PeerError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// Sends messages to the server listening on one endpoint.
#[derive(Debug, Clone)]
pub struct PeerClient {
    endpoint: PathBuf,
    retry_delay: Duration,
}

impl PeerClient {
    pub fn new(endpoint: impl Into<PathBuf>) -> Self {
        Self {
            endpoint: endpoint.into(),
            retry_delay: PeerConfig::CONNECT_RETRY_DELAY,
        }
    }

    /// Override the pause between connection attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn endpoint(&self) -> &Path {
        &self.endpoint
    }

    /// Send `message` and wait for the server's acknowledgement.
    ///
    /// `total` bounds each connection attempt (half each), the write, and
    /// the ack read separately.
    ///
    /// # Errors
    ///
    /// - `ConnectFailed` if neither connection attempt succeeds
    /// - `Timeout` if the write or the ack read expires
    /// - `AckMismatch` if the server answers with anything but the token
    pub async fn send(&self, message: &str, total: Duration) -> Result<()> {
        let mut stream = self.connect_with_retry(total / 2).await?;

        timeout(total, write_frame(&mut stream, message))
            .await
            .map_err(|_| PeerError::Timeout(total, "writing the message"))??;

        timeout(total, read_ack(&mut stream))
            .await
            .map_err(|_| PeerError::Timeout(total, "waiting for the ack"))??;

        debug!("Message of {} bytes acknowledged", message.len());
        Ok(())
    }

    async fn connect_with_retry(&self, per_attempt: Duration) -> Result<ClientStream> {
        for attempt in 1..=PeerConfig::CONNECT_ATTEMPTS {
            match timeout(per_attempt, transport::connect(&self.endpoint)).await {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(e)) => debug!(
                    "Connect attempt {} to {} failed: {}",
                    attempt,
                    self.endpoint.display(),
                    e
                ),
                Err(_) => debug!(
                    "Connect attempt {} to {} timed out after {:?}",
                    attempt,
                    self.endpoint.display(),
                    per_attempt
                ),
            }

            if attempt < PeerConfig::CONNECT_ATTEMPTS {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(PeerError::ConnectFailed {
            endpoint: self.endpoint.display().to_string(),
            attempts: PeerConfig::CONNECT_ATTEMPTS,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::ipc::server::{PeerServer, ServerTimeouts};
    use crate::ipc::transport::LocalListener;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_send_to_live_server() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let listener = LocalListener::bind(&path).unwrap();
        let mut handle = PeerServer::start(listener, Arc::new(tx), ServerTimeouts::default());

        PeerClient::new(&path)
            .send("hello", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_send_without_server_fails_within_bound() {
        let dir = TempDir::new().unwrap();
        let client = PeerClient::new(dir.path().join("nobody"));

        let started = Instant::now();
        let err = client
            .send("hello", Duration::from_millis(400))
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, PeerError::ConnectFailed { attempts: 2, .. }));
        assert!(elapsed >= PeerConfig::CONNECT_RETRY_DELAY);
        assert!(elapsed < Duration::from_millis(400 + 250 + 500));
    }

    #[tokio::test]
    async fn test_wrong_ack_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint");
        let mut listener = LocalListener::bind(&path).unwrap();

        let fake = tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await.unwrap();
            let mut body = vec![0u8; u32::from_be_bytes(len) as usize];
            stream.read_exact(&mut body).await.unwrap();
            stream.write_all(b"nak").await.unwrap();
        });

        let err = PeerClient::new(&path)
            .send("hello", Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::AckMismatch(_)));
        fake.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endpoint");
        let mut listener = LocalListener::bind(&path).unwrap();

        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let silent = tokio::spawn(async move {
            let _stream = listener.accept().await.unwrap();
            let _ = done_rx.await;
        });

        let err = PeerClient::new(&path)
            .send("hello", Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, PeerError::Timeout(..)));

        let _ = done_tx.send(());
        silent.await.unwrap();
    }
}
