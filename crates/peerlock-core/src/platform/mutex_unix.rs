//! Named mutexes for Unix.
//!
//! Unix has no portable named kernel mutex that is released when its owner
//! dies, so a mutex is an exclusive `flock` on a file whose path is the
//! mutex name. `flock` locks belong to the open file description: two opens
//! of the same file conflict even inside one process, and the kernel drops
//! the lock when the owning process exits.
//!
//! Unlike a kernel object, the backing file outlives its last handle. `open`
//! therefore succeeds for any name that was created at some point; callers
//! treat an openable-but-unheld mutex the same as a missing one.

use crate::error::{PeerError, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use tracing::warn;

/// A system-wide mutex addressed by name. Released and closed on drop.
#[derive(Debug)]
pub struct NamedMutex {
    name: String,
    file: File,
    held: bool,
}

impl NamedMutex {
    /// Create the mutex if it does not exist, then open it.
    pub fn create(name: &str) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(name)
            .map_err(|e| PeerError::primitive("create mutex", name, e))?;

        Ok(Self {
            name: name.to_string(),
            file,
            held: false,
        })
    }

    /// Open an existing mutex. Returns `None` if it was never created.
    pub fn open(name: &str) -> Result<Option<Self>> {
        match OpenOptions::new().read(true).write(true).open(name) {
            Ok(file) => Ok(Some(Self {
                name: name.to_string(),
                file,
                held: false,
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PeerError::primitive("open mutex", name, e)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Acquire the mutex. Returns `false` if `block` is unset and another
    /// handle holds it.
    pub fn wait(&mut self, block: bool) -> Result<bool> {
        let result = if block {
            FileExt::lock_exclusive(&self.file)
        } else {
            FileExt::try_lock_exclusive(&self.file)
        };

        match result {
            Ok(()) => {
                self.held = true;
                Ok(true)
            }
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(PeerError::primitive("wait mutex", self.name.as_str(), e)),
        }
    }

    /// Release the mutex if held.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        FileExt::unlock(&self.file)
            .map_err(|e| PeerError::primitive("release mutex", self.name.as_str(), e))
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
    }
}

/// Acquire every mutex in `mutexes`, or none of them.
///
/// On contention or failure every mutex taken by this call is released
/// before returning.
pub fn wait_all(mutexes: &mut [NamedMutex], block: bool) -> Result<bool> {
    for idx in 0..mutexes.len() {
        let outcome = mutexes[idx].wait(block);
        if !matches!(outcome, Ok(true)) {
            for taken in &mut mutexes[..idx] {
                if let Err(e) = taken.release() {
                    warn!("{}", e);
                }
            }
            return outcome;
        }
    }
    Ok(true)
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}
