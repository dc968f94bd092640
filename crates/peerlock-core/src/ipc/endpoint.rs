//! Deterministic endpoint naming.
//!
//! Every launch of the same application by the same user (Unix) or in the
//! same session (Windows) derives the same name:
//!
//! ```text
//! <tag>-<prefix>-<checksum>-<discriminator>
//! singleapp-viewer-3f1c-3e8
//! ```
//!
//! The checksum is CRC-16/X-25 of the identity string. Sixteen bits keep the
//! name short; unrelated applications with the same prefix can collide.

use crate::config::{LockConfig, PeerConfig};
use crate::error::Result;
use crate::platform;
use std::fmt;
use std::path::{Path, PathBuf};

/// Immutable identity of an application's rendezvous point.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointIdentity {
    id: String,
    prefix: String,
    checksum: u16,
    discriminator: u32,
    name: String,
}

impl EndpointIdentity {
    /// Derive the identity for `app_id`, or for the running executable when
    /// `app_id` is `None`.
    pub fn resolve(app_id: Option<&str>) -> Result<Self> {
        let discriminator = platform::session_discriminator();
        match app_id {
            Some(id) => Ok(Self::from_parts(id, id, discriminator)),
            None => {
                let exe = platform::executable_identity()?;
                let file_name = exe.rsplit('/').next().unwrap_or(&exe).to_string();
                Ok(Self::from_parts(&exe, &file_name, discriminator))
            }
        }
    }

    /// Build an identity from an explicit id string and discriminator.
    pub fn new(id: &str, discriminator: u32) -> Self {
        Self::from_parts(id, id, discriminator)
    }

    fn from_parts(id: &str, prefix_source: &str, discriminator: u32) -> Self {
        let prefix = endpoint_prefix(prefix_source);
        let checksum = crc16_x25(id.as_bytes());
        let name = format!(
            "{}-{}-{:04x}-{:x}",
            PeerConfig::ENDPOINT_TAG,
            prefix,
            checksum,
            discriminator
        );

        Self {
            id: id.to_string(),
            prefix,
            checksum,
            discriminator,
            name,
        }
    }

    /// The identity string the name was derived from.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn discriminator(&self) -> u32 {
        self.discriminator
    }

    /// Endpoint name used for the socket and lock file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<dir>/<name>-lockfile`
    pub fn lock_file_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}{}", self.name, LockConfig::LOCKFILE_SUFFIX))
    }

    /// Address the local socket binds to and connects to.
    ///
    /// # Platform Behavior
    /// - **Linux/macOS**: `<dir>/<name>` (a Unix domain socket file)
    /// - **Windows**: `\\.\pipe\<name>` (`dir` is ignored)
    pub fn socket_path(&self, dir: &Path) -> PathBuf {
        #[cfg(unix)]
        {
            dir.join(&self.name)
        }

        #[cfg(windows)]
        {
            let _ = dir;
            PathBuf::from(format!(r"\\.\pipe\{}", self.name))
        }
    }
}

impl fmt::Display for EndpointIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Letters of `source`, truncated to `PeerConfig::PREFIX_LEN`.
pub fn endpoint_prefix(source: &str) -> String {
    source
        .chars()
        .filter(char::is_ascii_alphabetic)
        .take(PeerConfig::PREFIX_LEN)
        .collect()
}

/// CRC-16/X-25: reflected polynomial 0x1021, init 0xFFFF, final xor 0xFFFF.
pub fn crc16_x25(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 {
                (crc >> 1) ^ 0x8408
            } else {
                crc >> 1
            };
        }
    }
    !crc
}
