//! Cross-process exclusive lock over a config directory.
//!
//! The lock is a `.moss.lock` file created with exclusive-create semantics and holding
//! a [`LockRecord`] of its owner. A lock whose owner process no longer exists, or
//! whose contents cannot be read, is treated as stale and removed.
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::LockError;

pub const LOCK_FILE_NAME: &str = ".moss.lock";
pub const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Identity of the process holding the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    /// Acquisition time in milliseconds since the epoch
    pub timestamp: i64,
    pub command: String,
    pub cwd: String,
}

impl LockRecord {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now().timestamp_millis(),
            command: std::env::args().collect::<Vec<_>>().join(" "),
            cwd: std::env::current_dir()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

enum Observed {
    Missing,
    Unreadable,
    Held(LockRecord),
}

pub struct ConfigLock {
    path: PathBuf,
    handle: Option<File>,
}

impl ConfigLock {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        Self {
            path: config_dir.as_ref().join(LOCK_FILE_NAME),
            handle: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_held(&self) -> bool {
        self.handle.is_some()
    }

    /// Acquire the lock, waiting up to `timeout` for a live holder to let go.
    ///
    /// At least one attempt is made even with a zero timeout. Acquiring a lock this
    /// instance already holds succeeds immediately.
    pub async fn acquire(&mut self, timeout: Duration) -> Result<(), LockError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let started = Instant::now();
        loop {
            match self.try_create().await {
                Ok(file) => {
                    debug!(path = %self.path.display(), "Acquired config lock");
                    self.handle = Some(file);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            // A freed or reclaimed lock is retried at once; only waiting on a
            // live holder spends the timeout.
            match self.observe().await {
                Observed::Held(record) if process_alive(record.pid).await => {
                    debug!(pid = record.pid, "Config lock is held, waiting");
                }
                Observed::Held(record) => {
                    // Another contender may have reclaimed it since we read it
                    if matches!(self.observe().await, Observed::Held(current) if current == record) {
                        warn!(pid = record.pid, "Removing config lock left by a dead process");
                        if remove_quietly(&self.path).await {
                            continue;
                        }
                    } else {
                        continue;
                    }
                }
                Observed::Unreadable => {
                    warn!(path = %self.path.display(), "Removing unreadable config lock");
                    if remove_quietly(&self.path).await {
                        continue;
                    }
                }
                Observed::Missing => continue,
            }

            if started.elapsed() >= timeout {
                break;
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }

        Err(LockError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    async fn try_create(&self) -> io::Result<File> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await?;

        let written = async {
            let body = serde_json::to_vec_pretty(&LockRecord::current()).map_err(io::Error::other)?;
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;

        match written {
            Ok(()) => Ok(file),
            Err(e) => {
                drop(file);
                remove_quietly(&self.path).await;
                Err(e)
            }
        }
    }

    async fn observe(&self) -> Observed {
        match fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(record) => Observed::Held(record),
                Err(_) => Observed::Unreadable,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Observed::Missing,
            Err(_) => Observed::Unreadable,
        }
    }

    /// Release the lock if this instance holds it. Never touches another owner's lock.
    pub async fn release(&mut self) {
        if let Some(file) = self.handle.take() {
            drop(file);
            remove_quietly(&self.path).await;
            debug!(path = %self.path.display(), "Released config lock");
        }
    }

    /// The current holder, if the lock file exists and is readable.
    pub async fn inspect(&self) -> Option<LockRecord> {
        match self.observe().await {
            Observed::Held(record) => Some(record),
            _ => None,
        }
    }

    /// Remove the lock file regardless of who holds it.
    pub async fn force_clear(&mut self) -> Result<(), LockError> {
        self.handle = None;
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ConfigLock {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Returns false only when the file is still there afterwards.
async fn remove_quietly(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Failed to remove lock file");
            false
        }
    }
}

/// Whether a process with this id currently exists.
#[cfg(unix)]
pub async fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 only performs the existence and permission checks.
    let result = unsafe { libc::kill(pid, 0) };
    // EPERM means the process exists but belongs to someone else.
    result == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Whether a process with this id currently exists.
#[cfg(not(unix))]
pub async fn process_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let filter = format!("PID eq {pid}");
    match tokio::process::Command::new("tasklist")
        .args(["/FI", filter.as_str(), "/NH"])
        .output()
        .await
    {
        Ok(output) if output.status.success() => {
            let pid = pid.to_string();
            String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .any(|token| token == pid)
        }
        _ => false,
    }
}
