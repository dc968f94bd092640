//! Cross-process advisory read/write locks on a file.
//!
//! `AdvisoryLock` is cooperative: it only excludes other participants that
//! lock the same path through this module. Two backends implement the same
//! contract:
//!
//! - [`LockBackend::Slots`] bounds readers with a fixed set of named mutex
//!   "slots". A reader holds one slot; a writer holds the allocation mutex
//!   plus every slot in use.
//! - [`LockBackend::Region`] takes shared/exclusive advisory locks on the
//!   file itself (`flock` on Unix, `LockFileEx` on Windows).
//!
//! Changing between read and write always unlocks first; there is no atomic
//! upgrade or downgrade.

mod region;
mod slots;
mod worker;

pub use region::RegionLock;
pub use slots::SlotLock;
pub use worker::LockWorker;

use crate::config::LockConfig;
use crate::error::{PeerError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Lock mode requested from or held by an `AdvisoryLock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    NoLock,
    ReadLock,
    WriteLock,
}

/// Which primitive family backs an `AdvisoryLock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockBackend {
    /// Named mutex slots. Default on Windows.
    Slots,
    /// Native advisory file locks. Default on Unix.
    Region,
}

impl Default for LockBackend {
    fn default() -> Self {
        if cfg!(windows) {
            LockBackend::Slots
        } else {
            LockBackend::Region
        }
    }
}

/// Primitive-level half of an advisory lock.
///
/// `AdvisoryLock` handles mode bookkeeping and transitions; a strategy only
/// acquires a mode from scratch and releases the mode it holds. On any
/// failure path `acquire` must leave nothing held.
pub trait LockStrategy: Send + std::fmt::Debug {
    /// Try to take `mode` (never `NoLock`). `Ok(false)` means contention.
    fn acquire(&mut self, file: &File, mode: LockMode, block: bool) -> Result<bool>;

    /// Release everything held for `mode`.
    fn release(&mut self, file: &File, mode: LockMode) -> Result<()>;
}

/// A per-file reader/writer lock usable across unrelated processes.
#[derive(Debug)]
pub struct AdvisoryLock {
    path: PathBuf,
    file: Option<File>,
    mode: LockMode,
    backend: LockBackend,
    strategy: Box<dyn LockStrategy>,
}

impl AdvisoryLock {
    /// Create a lock for `path` using the platform's default backend.
    ///
    /// The file is not touched until [`open`](Self::open).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(path, LockBackend::default())
    }

    /// Create a lock for `path` with an explicit backend.
    pub fn with_backend(path: impl Into<PathBuf>, backend: LockBackend) -> Self {
        Self::with_max_readers(path, backend, LockConfig::MAX_READERS)
    }

    /// Create a lock with a reader capacity other than
    /// [`LockConfig::MAX_READERS`]. Only the slots backend is bounded.
    pub fn with_max_readers(
        path: impl Into<PathBuf>,
        backend: LockBackend,
        max_readers: usize,
    ) -> Self {
        let path = path.into();
        let strategy: Box<dyn LockStrategy> = match backend {
            LockBackend::Slots => Box::new(SlotLock::new(&path, max_readers)),
            LockBackend::Region => Box::new(RegionLock::new()),
        };

        Self {
            path,
            file: None,
            mode: LockMode::NoLock,
            backend,
            strategy,
        }
    }

    /// Open (creating if needed) the lock file for reading and writing.
    pub fn open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| PeerError::io_with_path(e, parent))?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| PeerError::io_with_path(e, &self.path))?;

        debug!("Opened lock file {}", self.path.display());
        self.file = Some(file);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn backend(&self) -> LockBackend {
        self.backend
    }

    pub fn is_locked(&self) -> bool {
        self.mode != LockMode::NoLock
    }

    /// Acquire `mode`, waiting for it if `block` is set.
    ///
    /// Returns `Ok(false)` when the lock is held elsewhere and `block` is
    /// unset. Requesting the held mode is a no-op; requesting a different
    /// mode unlocks first, and another process may win the lock in between.
    pub fn lock(&mut self, mode: LockMode, block: bool) -> Result<bool> {
        let Some(file) = self.file.as_ref() else {
            warn!("lock(): file {} is not open", self.path.display());
            return Err(PeerError::LockFileNotOpen(self.path.clone()));
        };

        if mode == LockMode::NoLock {
            return self.unlock();
        }

        if mode == self.mode {
            return Ok(true);
        }

        if self.mode != LockMode::NoLock {
            let held = self.mode;
            self.mode = LockMode::NoLock;
            self.strategy.release(file, held)?;
        }

        match self.strategy.acquire(file, mode, block) {
            Ok(true) => {
                debug!("Acquired {:?} on {}", mode, self.path.display());
                self.mode = mode;
                Ok(true)
            }
            Ok(false) => {
                debug!("{:?} on {} is held elsewhere", mode, self.path.display());
                Ok(false)
            }
            Err(e) => {
                warn!("lock(): {}", e);
                Err(e)
            }
        }
    }

    /// Release the held mode. Succeeds without effect when unlocked.
    pub fn unlock(&mut self) -> Result<bool> {
        let Some(file) = self.file.as_ref() else {
            warn!("unlock(): file {} is not open", self.path.display());
            return Err(PeerError::LockFileNotOpen(self.path.clone()));
        };

        if self.mode == LockMode::NoLock {
            return Ok(true);
        }

        let held = self.mode;
        self.mode = LockMode::NoLock;
        self.strategy.release(file, held)?;
        debug!("Released {:?} on {}", held, self.path.display());
        Ok(true)
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if self.file.is_some() && self.is_locked() {
            if let Err(e) = self.unlock() {
                warn!("Failed to release {} on drop: {}", self.path.display(), e);
            }
        }
    }
}
