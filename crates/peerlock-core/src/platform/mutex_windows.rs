//! Named kernel mutexes for Windows.
//!
//! Thin RAII layer over `CreateMutexW`/`OpenMutexW`. The kernel destroys a
//! mutex object once its last handle closes, so `open` only succeeds while
//! some process still holds a handle. A mutex abandoned by a dead owner is
//! treated as acquired.
//!
//! Kernel mutexes are owned by a thread and are recursive for that thread;
//! every wait and release must happen on the thread that created the lock.

#![allow(unsafe_code)]

use crate::error::{PeerError, Result};
use std::ffi::OsStr;
use std::os::windows::ffi::OsStrExt;
use tracing::warn;
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, ERROR_FILE_NOT_FOUND, HANDLE, WAIT_ABANDONED, WAIT_OBJECT_0,
    WAIT_TIMEOUT,
};
use windows_sys::Win32::System::RemoteDesktop::ProcessIdToSessionId;
use windows_sys::Win32::System::Threading::{
    CreateMutexW, GetCurrentProcessId, OpenMutexW, ReleaseMutex, WaitForMultipleObjects,
    WaitForSingleObject, INFINITE, MAXIMUM_WAIT_OBJECTS, MUTEX_MODIFY_STATE,
    SYNCHRONIZATION_SYNCHRONIZE,
};

/// A system-wide mutex addressed by name. Released and closed on drop.
#[derive(Debug)]
pub struct NamedMutex {
    name: String,
    handle: HANDLE,
    held: bool,
}

// SAFETY: a mutex HANDLE is a process-wide kernel handle value; moving it to
// another thread does not invalidate it.
unsafe impl Send for NamedMutex {}

fn to_wide(name: &str) -> Vec<u16> {
    OsStr::new(name).encode_wide().chain(std::iter::once(0)).collect()
}

impl NamedMutex {
    /// Create the mutex if it does not exist, then open it.
    pub fn create(name: &str) -> Result<Self> {
        let wide = to_wide(name);
        // SAFETY: `wide` is a NUL-terminated UTF-16 buffer that outlives the
        // call; null security attributes request the default descriptor.
        let handle = unsafe { CreateMutexW(std::ptr::null(), 0, wide.as_ptr()) };
        if handle.is_null() {
            return Err(PeerError::primitive(
                "CreateMutex",
                name,
                std::io::Error::last_os_error(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            handle,
            held: false,
        })
    }

    /// Open an existing mutex. Returns `None` if no process holds it open.
    pub fn open(name: &str) -> Result<Option<Self>> {
        let wide = to_wide(name);
        // SAFETY: as in `create`.
        let handle = unsafe {
            OpenMutexW(
                SYNCHRONIZATION_SYNCHRONIZE | MUTEX_MODIFY_STATE,
                0,
                wide.as_ptr(),
            )
        };
        if handle.is_null() {
            // SAFETY: reads this thread's last-error slot.
            if unsafe { GetLastError() } == ERROR_FILE_NOT_FOUND {
                return Ok(None);
            }
            return Err(PeerError::primitive(
                "OpenMutex",
                name,
                std::io::Error::last_os_error(),
            ));
        }

        Ok(Some(Self {
            name: name.to_string(),
            handle,
            held: false,
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Acquire the mutex. Returns `false` if `block` is unset and another
    /// thread holds it.
    pub fn wait(&mut self, block: bool) -> Result<bool> {
        // SAFETY: `self.handle` is a live mutex handle owned by `self`.
        let res = unsafe { WaitForSingleObject(self.handle, if block { INFINITE } else { 0 }) };
        match res {
            WAIT_OBJECT_0 | WAIT_ABANDONED => {
                self.held = true;
                Ok(true)
            }
            WAIT_TIMEOUT => Ok(false),
            _ => Err(PeerError::primitive(
                "WaitForSingleObject",
                self.name.as_str(),
                std::io::Error::last_os_error(),
            )),
        }
    }

    /// Release the mutex if held.
    pub fn release(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        self.held = false;
        // SAFETY: the calling thread owns the mutex (`held` was set by a
        // successful wait on this handle).
        if unsafe { ReleaseMutex(self.handle) } == 0 {
            return Err(PeerError::primitive(
                "ReleaseMutex",
                self.name.as_str(),
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}

impl Drop for NamedMutex {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("{}", e);
        }
        // SAFETY: the handle is owned by `self` and closed exactly once here.
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

/// Acquire every mutex in `mutexes` atomically, or none of them.
pub fn wait_all(mutexes: &mut [NamedMutex], block: bool) -> Result<bool> {
    if mutexes.is_empty() {
        return Ok(true);
    }
    if mutexes.len() > MAXIMUM_WAIT_OBJECTS as usize {
        return Err(PeerError::Config {
            message: format!(
                "cannot wait on {} mutexes (limit {})",
                mutexes.len(),
                MAXIMUM_WAIT_OBJECTS
            ),
        });
    }

    let handles: Vec<HANDLE> = mutexes.iter().map(|m| m.handle).collect();
    // SAFETY: `handles` holds live handles borrowed from `mutexes` for the
    // duration of the call.
    let res = unsafe {
        WaitForMultipleObjects(
            handles.len() as u32,
            handles.as_ptr(),
            1,
            if block { INFINITE } else { 0 },
        )
    };

    let count = handles.len() as u32;
    if (WAIT_OBJECT_0..WAIT_OBJECT_0 + count).contains(&res)
        || (WAIT_ABANDONED..WAIT_ABANDONED + count).contains(&res)
    {
        for mutex in mutexes.iter_mut() {
            mutex.held = true;
        }
        return Ok(true);
    }
    if res == WAIT_TIMEOUT {
        return Ok(false);
    }
    Err(PeerError::primitive(
        "WaitForMultipleObjects",
        mutexes[0].name.as_str(),
        std::io::Error::last_os_error(),
    ))
}

/// Terminal Services session id of the current process, 0 if unavailable.
pub(super) fn current_session_id() -> u32 {
    let mut session_id = 0u32;
    // SAFETY: `session_id` is a valid out-pointer for the duration of the call.
    let ok = unsafe { ProcessIdToSessionId(GetCurrentProcessId(), &mut session_id) };
    if ok == 0 {
        warn!(
            "ProcessIdToSessionId failed: {}",
            std::io::Error::last_os_error()
        );
        return 0;
    }
    session_id
}
