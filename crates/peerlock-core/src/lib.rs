//! Peerlock - single-instance coordination for desktop applications.
//!
//! Two building blocks:
//!
//! - [`AdvisoryLock`]: a cross-process reader/writer lock keyed by a file
//!   path, backed either by a set of named mutexes (reader slots) or by the
//!   operating system's native file locks.
//! - [`InstancePeer`]: decides whether the current launch is the server or
//!   a client for its application, and lets clients hand a text message to
//!   the server over a local socket.
//!
//! # Example
//!
//! ```rust,ignore
//! use peerlock::InstancePeer;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> peerlock::Result<()> {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     let peer = InstancePeer::builder().sink(tx).build()?;
//!
//!     if peer.is_client().await? {
//!         let args: Vec<String> = std::env::args().skip(1).collect();
//!         peer.send_message(&args.join(" "), Duration::from_secs(5)).await?;
//!         return Ok(());
//!     }
//!
//!     while let Some(message) = rx.recv().await {
//!         println!("forwarded: {}", message);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod ipc;
pub mod lock;
pub mod platform;

mod peer;

// Re-export commonly used types
pub use config::{LockConfig, PeerConfig, PeerOptions};
pub use error::{ErrorClass, PeerError, Result};
pub use ipc::{EndpointIdentity, LogSink, MessageSink, PeerClient, PeerServerHandle};
pub use lock::{AdvisoryLock, LockBackend, LockMode, LockStrategy};
pub use peer::{InstancePeer, InstancePeerBuilder};
