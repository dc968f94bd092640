//! Centralized configuration for peerlock.
//!
//! Compile-time constants live in the `*Config` tables. `PeerOptions` carries
//! the runtime overrides a host application may want to tune.

use crate::lock::LockBackend;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Advisory lock configuration.
pub struct LockConfig;

impl LockConfig {
    /// Maximum number of concurrent reader slots. Matches the Windows
    /// `MAXIMUM_WAIT_OBJECTS` bound so a writer can wait on all of them at once.
    pub const MAX_READERS: usize = 64;
    pub const MUTEX_PREFIX: &'static str = "peerlock mutex ";
    pub const LOCKFILE_SUFFIX: &'static str = "-lockfile";
    /// Unix only: suffix of the sibling files that stand in for named mutexes.
    pub const MUTEX_FILE_SUFFIX: &'static str = ".mutex";
}

/// Endpoint naming and message protocol configuration.
pub struct PeerConfig;

impl PeerConfig {
    pub const ENDPOINT_TAG: &'static str = "singleapp";
    pub const PREFIX_LEN: usize = 6;
    pub const ACK_TOKEN: &'static [u8; 3] = b"ack";

    // Client
    pub const CONNECT_ATTEMPTS: u32 = 2;
    pub const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);
    pub const PIPE_BUSY_RETRY: Duration = Duration::from_millis(50);

    // Server
    pub const HEADER_TIMEOUT: Duration = Duration::from_secs(30);
    pub const READ_STALL_TIMEOUT: Duration = Duration::from_secs(2);
    pub const ACK_LINGER: Duration = Duration::from_secs(1);
    /// Upper bound on the initial payload reservation; the buffer grows past
    /// this as bytes actually arrive.
    pub const READ_CHUNK_SIZE: usize = 64 * 1024;
}

/// Runtime options for an `InstancePeer`.
///
/// Every field is optional in serialized form; missing fields fall back to the
/// constants above.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerOptions {
    /// Explicit application id. `None` uses the executable path.
    pub app_id: Option<String>,
    pub lock_backend: LockBackend,
    /// Directory for the lock file and (on Unix) the socket. `None` uses the
    /// system temporary directory.
    pub temp_dir: Option<PathBuf>,
    pub max_readers: usize,
    pub header_timeout_ms: u64,
    pub read_stall_timeout_ms: u64,
    pub ack_linger_ms: u64,
    pub connect_retry_delay_ms: u64,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            app_id: None,
            lock_backend: LockBackend::default(),
            temp_dir: None,
            max_readers: LockConfig::MAX_READERS,
            header_timeout_ms: PeerConfig::HEADER_TIMEOUT.as_millis() as u64,
            read_stall_timeout_ms: PeerConfig::READ_STALL_TIMEOUT.as_millis() as u64,
            ack_linger_ms: PeerConfig::ACK_LINGER.as_millis() as u64,
            connect_retry_delay_ms: PeerConfig::CONNECT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl PeerOptions {
    pub fn header_timeout(&self) -> Duration {
        Duration::from_millis(self.header_timeout_ms)
    }

    pub fn read_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.read_stall_timeout_ms)
    }

    pub fn ack_linger(&self) -> Duration {
        Duration::from_millis(self.ack_linger_ms)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    /// Resolve the directory holding the lock file and socket.
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(crate::platform::temp_dir)
    }

    /// Reject values that would make the protocol unusable.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_readers == 0 || self.max_readers > LockConfig::MAX_READERS {
            return Err(crate::PeerError::Config {
                message: format!(
                    "max_readers must be between 1 and {}, got {}",
                    LockConfig::MAX_READERS,
                    self.max_readers
                ),
            });
        }
        if self.read_stall_timeout_ms == 0 || self.header_timeout_ms == 0 {
            return Err(crate::PeerError::Config {
                message: "read timeouts must be non-zero".to_string(),
            });
        }
        if let Some(id) = &self.app_id {
            if id.is_empty() {
                return Err(crate::PeerError::Config {
                    message: "app_id must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}
