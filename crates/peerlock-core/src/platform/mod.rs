//! Platform abstraction layer for cross-platform compatibility.
//!
//! This module centralizes all platform-specific code to make it easy to find,
//! maintain, and extend. All `#[cfg]` blocks for OS-specific behavior should
//! live in this module rather than scattered throughout the codebase.
//!
//! # Architecture
//!
//! - `NamedMutex` - a system-wide mutex addressed by name
//! - `session_discriminator` - per-user (Unix) or per-session (Windows) id
//! - `mutex_name` - how a lock file path maps to a mutex name
//!
//! # Supported Platforms
//!
//! - **Linux/macOS**: mutexes are exclusive `flock`s on sibling files
//! - **Windows**: mutexes are kernel mutex objects

#[cfg(unix)]
mod mutex_unix;
#[cfg(windows)]
mod mutex_windows;

#[cfg(unix)]
pub use mutex_unix::{wait_all, NamedMutex};
#[cfg(windows)]
pub use mutex_windows::{wait_all, NamedMutex};

use std::path::{Path, PathBuf};

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// Identifier that keeps different users (Unix) or login sessions (Windows)
/// on the same host from sharing an endpoint.
///
/// # Platform Behavior
/// - **Linux/macOS**: the real user id
/// - **Windows**: the Terminal Services session id of this process
pub fn session_discriminator() -> u32 {
    #[cfg(unix)]
    {
        nix::unistd::getuid().as_raw()
    }

    #[cfg(windows)]
    {
        mutex_windows::current_session_id()
    }
}

/// System temporary directory used for the lock file and Unix sockets.
pub fn temp_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Name of the mutex guarding `lock_path`, or of reader slot `slot`.
///
/// # Platform Behavior
/// - **Linux/macOS**: a sibling file path, `<lock_path>.mutex[slot]`
/// - **Windows**: `"peerlock mutex " + lower-cased absolute path [+ slot]`
pub fn mutex_name(lock_path: &Path, slot: Option<usize>) -> String {
    let index = slot.map(|i| i.to_string()).unwrap_or_default();

    #[cfg(unix)]
    {
        format!(
            "{}{}{}",
            lock_path.display(),
            crate::config::LockConfig::MUTEX_FILE_SUFFIX,
            index
        )
    }

    #[cfg(windows)]
    {
        let absolute = std::path::absolute(lock_path).unwrap_or_else(|_| lock_path.to_path_buf());
        kernel_object_name(&absolute.to_string_lossy(), &index)
    }
}

/// Kernel object names treat `\` as a namespace separator, so the path is
/// written with `/` before it becomes part of a mutex name.
#[cfg_attr(not(windows), allow(dead_code))]
fn kernel_object_name(absolute_path: &str, index: &str) -> String {
    format!(
        "{}{}{}",
        crate::config::LockConfig::MUTEX_PREFIX,
        absolute_path.replace('\\', "/").to_lowercase(),
        index
    )
}

/// Path of the running executable in the form used for identity strings.
///
/// Separators are normalised to `/`; on Windows the path is lower-cased
/// because the file system is case-insensitive.
pub fn executable_identity() -> crate::Result<String> {
    let exe = std::env::current_exe()?;
    let path = exe.to_string_lossy().replace('\\', "/");

    #[cfg(windows)]
    {
        Ok(path.to_lowercase())
    }

    #[cfg(not(windows))]
    {
        Ok(path)
    }
}
