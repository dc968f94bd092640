//! Local IPC between the server instance and client launches.
//!
//! # Architecture
//!
//! - **Endpoint**: deterministic name shared by every launch of one application
//! - **Transport**: Unix domain socket or Windows named pipe bound to that name
//! - **Server**: runs in the instance holding the lock, emits received messages
//! - **Client**: connects, sends one framed message, waits for the ack
//! - **Protocol**: shared framing used by both

pub mod client;
pub mod endpoint;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::PeerClient;
pub use endpoint::EndpointIdentity;
pub use server::{LogSink, MessageSink, PeerServer, PeerServerHandle, ServerTimeouts};
pub use transport::LocalListener;
