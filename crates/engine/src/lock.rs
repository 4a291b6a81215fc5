//! Single-instance lock for the pipeline.
//!
//! A lockfile whose content is the holder's PID as ASCII decimal, stored
//! under the user cache directory. A file pointing at a live process blocks
//! a second invocation; a file pointing at a dead process is stale and is
//! taken over.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Error type for lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process holds the lock.
    #[error("Lock {path} is held by PID {pid}")]
    Held { path: PathBuf, pid: u32 },

    /// The lockfile could not be read or written.
    #[error("Lock IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Default lock path: `$XDG_CACHE_HOME/mediathek.lock`, falling back to
/// `$HOME/.cache/mediathek.lock`, falling back to the system temp dir.
pub fn default_lock_path() -> PathBuf {
    if let Ok(xdg) = env::var("XDG_CACHE_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("mediathek.lock");
        }
    }
    if let Ok(home) = env::var("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home).join(".cache").join("mediathek.lock");
        }
    }
    env::temp_dir().join("mediathek.lock")
}

/// Checks whether a process with the given PID is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 performs the existence check without delivering anything.
    // EPERM still means the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // Without a liveness check, treat every recorded PID as live; the
    // operator can delete the lockfile manually.
    true
}

/// RAII guard for the single-instance lock. The lockfile is removed on
/// every exit path, including unwinding.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    /// Acquires the lock, taking over stale lockfiles of dead processes.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                match content.trim().parse::<u32>() {
                    Ok(pid) if pid != std::process::id() && pid_alive(pid) => {
                        return Err(LockError::Held {
                            path: path.to_path_buf(),
                            pid,
                        });
                    }
                    Ok(pid) => {
                        debug!(path = %path.display(), pid, "taking over stale lock");
                    }
                    Err(_) => {
                        warn!(path = %path.display(), "lockfile with unreadable content, taking over");
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LockError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        fs::write(path, std::process::id().to_string()).map_err(|e| LockError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Releases the lock explicitly. Dropping the guard does the same.
    pub fn release(mut self) {
        self.remove_file();
    }

    fn remove_file(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), "could not remove lockfile: {}", e);
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.remove_file();
    }
}
