//! Dedicated owner thread for an `AdvisoryLock`.
//!
//! Windows kernel mutexes can only be released by the thread that acquired
//! them, while async callers may be polled on any runtime worker. Every
//! operation is therefore sent to one thread that owns the lock for its
//! whole life. Dropping the worker joins that thread, so the lock has been
//! released by the time `drop` returns.

use super::{AdvisoryLock, LockMode};
use crate::error::{PeerError, Result};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

enum Command {
    Lock {
        mode: LockMode,
        block: bool,
        reply: oneshot::Sender<Result<bool>>,
    },
    Unlock {
        reply: oneshot::Sender<Result<bool>>,
    },
    Mode {
        reply: oneshot::Sender<LockMode>,
    },
}

/// Handle to the thread that owns an `AdvisoryLock`.
#[derive(Debug)]
pub struct LockWorker {
    path: PathBuf,
    commands: Option<mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl LockWorker {
    /// Move `lock` onto a new thread.
    pub fn spawn(lock: AdvisoryLock) -> Result<Self> {
        let path = lock.path().to_path_buf();
        let (tx, rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("peerlock-lock".to_string())
            .spawn(move || run(lock, rx))
            .map_err(|e| PeerError::io_with_path(e, &path))?;

        Ok(Self {
            path,
            commands: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// See [`AdvisoryLock::lock`].
    pub async fn lock(&self, mode: LockMode, block: bool) -> Result<bool> {
        self.request(|reply| Command::Lock { mode, block, reply })
            .await?
    }

    /// See [`AdvisoryLock::unlock`].
    pub async fn unlock(&self) -> Result<bool> {
        self.request(|reply| Command::Unlock { reply }).await?
    }

    pub async fn mode(&self) -> Result<LockMode> {
        self.request(|reply| Command::Mode { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .as_ref()
            .ok_or_else(|| self.stopped())?
            .send(command(reply))
            .map_err(|_| self.stopped())?;
        response.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> PeerError {
        PeerError::Primitive {
            operation: "lock worker",
            name: self.path.display().to_string(),
            message: "lock owner thread has stopped".to_string(),
            source: None,
        }
    }
}

impl Drop for LockWorker {
    fn drop(&mut self) {
        drop(self.commands.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Lock owner thread for {} panicked", self.path.display());
            }
        }
    }
}

fn run(mut lock: AdvisoryLock, commands: mpsc::Receiver<Command>) {
    for command in commands {
        match command {
            Command::Lock { mode, block, reply } => {
                let _ = reply.send(lock.lock(mode, block));
            }
            Command::Unlock { reply } => {
                let _ = reply.send(lock.unlock());
            }
            Command::Mode { reply } => {
                let _ = reply.send(lock.mode());
            }
        }
    }
    debug!("Lock owner thread for {} exiting", lock.path().display());
}
