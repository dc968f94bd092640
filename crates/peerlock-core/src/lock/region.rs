//! Native advisory file-lock backend.
//!
//! Shared and exclusive locks are taken directly on the lock file through
//! `fs2` (`flock` on Unix, `LockFileEx` on Windows). The kernel tracks
//! readers, so there is no reader capacity bound.

use super::{LockMode, LockStrategy};
use crate::error::{PeerError, Result};
use fs2::FileExt;
use std::fs::File;
use std::io::ErrorKind;

#[derive(Debug, Default)]
pub struct RegionLock {
    held: bool,
}

impl RegionLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStrategy for RegionLock {
    fn acquire(&mut self, file: &File, mode: LockMode, block: bool) -> Result<bool> {
        let result = match (mode, block) {
            (LockMode::ReadLock, true) => FileExt::lock_shared(file),
            (LockMode::ReadLock, false) => FileExt::try_lock_shared(file),
            (LockMode::WriteLock, true) => FileExt::lock_exclusive(file),
            (LockMode::WriteLock, false) => FileExt::try_lock_exclusive(file),
            (LockMode::NoLock, _) => return Ok(true),
        };

        match result {
            Ok(()) => {
                self.held = true;
                Ok(true)
            }
            Err(e)
                if e.kind() == ErrorKind::WouldBlock
                    || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() =>
            {
                Ok(false)
            }
            Err(e) => Err(PeerError::primitive("lock file region", format!("{:?}", mode), e)),
        }
    }

    fn release(&mut self, file: &File, _mode: LockMode) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        FileExt::unlock(file).map_err(|e| PeerError::primitive("unlock file region", "lock file", e))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> File {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.path().join("region-lockfile"))
            .unwrap()
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (open(&dir), open(&dir));
        let (mut first, mut second) = (RegionLock::new(), RegionLock::new());

        assert!(first.acquire(&a, LockMode::ReadLock, false).unwrap());
        assert!(second.acquire(&b, LockMode::ReadLock, false).unwrap());
    }

    #[test]
    fn test_exclusive_excludes_shared() {
        let dir = TempDir::new().unwrap();
        let (a, b) = (open(&dir), open(&dir));
        let (mut writer, mut reader) = (RegionLock::new(), RegionLock::new());

        assert!(writer.acquire(&a, LockMode::WriteLock, false).unwrap());
        assert!(!reader.acquire(&b, LockMode::ReadLock, false).unwrap());

        writer.release(&a, LockMode::WriteLock).unwrap();
        assert!(reader.acquire(&b, LockMode::ReadLock, false).unwrap());
    }
}
