use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use strand_core::error::{Result, StrandError};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Exclusive lock backed by a `create_new` file.
///
/// The file records the owning PID and when it was taken. A lock whose owner
/// is no longer running, or which is older than `stale_after`, is broken so a
/// crashed writer cannot block later runs forever.
#[derive(Debug, Clone)]
pub struct LockFile {
    path: PathBuf,
    timeout: Duration,
    stale_after: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockOwner {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held lock. Dropping it removes the lock file.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(5),
            stale_after: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the lock, polling until `timeout` elapses.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        loop {
            if let Some(guard) = self.try_acquire()? {
                return Ok(guard);
            }
            if self.is_stale() {
                warn!(path = %self.path.display(), "Breaking stale lock");
                if std::fs::remove_file(&self.path).is_ok() {
                    continue;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(StrandError::LockTimeout(self.path.display().to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// One attempt at creating the lock file. `None` if someone holds it.
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let owner = LockOwner {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        // The guard owns the file from here on, so a failed write still releases it.
        let guard = LockGuard {
            path: self.path.clone(),
        };
        file.write_all(serde_json::to_string(&owner)?.as_bytes())?;
        debug!(path = %self.path.display(), "Lock acquired");
        Ok(Some(guard))
    }

    /// Whether the current lock file belongs to a dead process or has
    /// outlived `stale_after`. A missing lock is not stale.
    pub fn is_stale(&self) -> bool {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return false,
        };
        let owner: LockOwner = match serde_json::from_str(&content) {
            Ok(owner) => owner,
            // Half-written by its owner, or garbage. Judge by file age.
            Err(_) => return self.file_age().is_some_and(|age| age > self.stale_after),
        };

        if !process_alive(owner.pid) {
            return true;
        }
        let age = Utc::now().signed_duration_since(owner.acquired_at);
        age.to_std().is_ok_and(|age| age > self.stale_after)
    }

    fn file_age(&self) -> Option<Duration> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        modified.elapsed().ok()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    // Without /proc only the age check applies.
    true
}
