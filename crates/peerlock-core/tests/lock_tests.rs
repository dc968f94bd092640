//! Integration tests for AdvisoryLock.
//!
//! Every lock here opens the file separately, so each one behaves like a
//! distinct process for the native and emulated primitives.

use peerlock::{AdvisoryLock, LockBackend, LockMode, PeerError};
use std::path::Path;
use tempfile::TempDir;

fn open_lock(path: &Path, backend: LockBackend) -> AdvisoryLock {
    let mut lock = AdvisoryLock::with_backend(path, backend);
    lock.open().expect("Failed to open lock file");
    lock
}

fn backends() -> Vec<LockBackend> {
    // Windows named mutexes are re-entrant for the owning thread.
    if cfg!(unix) {
        vec![LockBackend::Region, LockBackend::Slots]
    } else {
        vec![LockBackend::Region]
    }
}

#[test]
fn test_writer_excludes_writer() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut a = open_lock(&path, backend);
        let mut b = open_lock(&path, backend);

        assert!(a.lock(LockMode::WriteLock, false).unwrap());
        assert!(!b.lock(LockMode::WriteLock, false).unwrap(), "{:?}", backend);
        assert_eq!(b.mode(), LockMode::NoLock);

        a.unlock().unwrap();
        assert!(b.lock(LockMode::WriteLock, false).unwrap());
    }
}

#[test]
fn test_writer_excludes_readers() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut writer = open_lock(&path, backend);
        let mut reader = open_lock(&path, backend);

        assert!(writer.lock(LockMode::WriteLock, false).unwrap());
        assert!(!reader.lock(LockMode::ReadLock, false).unwrap(), "{:?}", backend);

        writer.unlock().unwrap();
        assert!(reader.lock(LockMode::ReadLock, false).unwrap());
    }
}

#[test]
fn test_reader_excludes_writer() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut reader = open_lock(&path, backend);
        let mut writer = open_lock(&path, backend);

        assert!(reader.lock(LockMode::ReadLock, false).unwrap());
        assert!(!writer.lock(LockMode::WriteLock, false).unwrap(), "{:?}", backend);

        reader.unlock().unwrap();
        assert!(writer.lock(LockMode::WriteLock, false).unwrap());
    }
}

#[test]
fn test_readers_coexist() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut readers: Vec<_> = (0..4).map(|_| open_lock(&path, backend)).collect();

        for reader in readers.iter_mut() {
            assert!(reader.lock(LockMode::ReadLock, false).unwrap(), "{:?}", backend);
        }
        assert!(readers.iter().all(|r| r.mode() == LockMode::ReadLock));
    }
}

#[test]
fn test_dropping_holder_releases() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut contender = open_lock(&path, backend);

        {
            let mut holder = open_lock(&path, backend);
            assert!(holder.lock(LockMode::WriteLock, false).unwrap());
            assert!(!contender.lock(LockMode::WriteLock, false).unwrap());
        }

        assert!(contender.lock(LockMode::WriteLock, false).unwrap());
    }
}

#[test]
fn test_blocking_write_waits_for_reader() {
    for backend in backends() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app-lockfile");
        let mut reader = open_lock(&path, backend);
        assert!(reader.lock(LockMode::ReadLock, false).unwrap());

        let writer_path = path.clone();
        let waiter = std::thread::spawn(move || {
            let mut writer = open_lock(&writer_path, backend);
            writer.lock(LockMode::WriteLock, true).unwrap()
        });

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(!waiter.is_finished(), "{:?} writer did not block", backend);

        reader.unlock().unwrap();
        assert!(waiter.join().unwrap());
    }
}

#[cfg(unix)]
#[test]
fn test_reader_capacity_is_enforced() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app-lockfile");
    let mut readers: Vec<_> = (0..3)
        .map(|_| {
            let mut lock = AdvisoryLock::with_max_readers(&path, LockBackend::Slots, 3);
            lock.open().unwrap();
            lock
        })
        .collect();

    for reader in readers.iter_mut() {
        assert!(reader.lock(LockMode::ReadLock, false).unwrap());
    }

    let mut extra = AdvisoryLock::with_max_readers(&path, LockBackend::Slots, 3);
    extra.open().unwrap();
    let err = extra.lock(LockMode::ReadLock, false).unwrap_err();
    assert!(matches!(err, PeerError::TooManyReaders { limit: 3, .. }));
    assert_eq!(extra.mode(), LockMode::NoLock);

    // Freeing one slot makes room again.
    readers[1].unlock().unwrap();
    assert!(extra.lock(LockMode::ReadLock, false).unwrap());
}

#[test]
fn test_unopened_lock_reports_error() {
    let dir = TempDir::new().unwrap();
    let mut lock = AdvisoryLock::new(dir.path().join("never-opened"));

    let err = lock.lock(LockMode::ReadLock, false).unwrap_err();
    assert!(matches!(err, PeerError::LockFileNotOpen(_)));
    assert!(!err.is_retryable());
}
