//! Per-principal run lock.
//!
//! Only one export or import may run per principal at a time. The lock is
//! an advisory OS lock on `<lock dir>/<principal>.lock`, taken with a short
//! bounded wait. Losing the race is not an error: the caller skips the run.
//! The lock is released when the guard drops, on every exit path.

use crate::error::{Result, ResultExt};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Default wait for a contended lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(1000);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Written into the lock file so a skipped run can say who holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub principal: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

/// A held run lock.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to take the lock for `principal`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when another run holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock directory or file cannot be created.
    pub fn acquire(
        dir: &Path,
        principal: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<Option<Self>> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Creating lock directory {}", dir.display()))?;
        let path = lock_path(dir, principal);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("Opening lock file {}", path.display()))?;

        let deadline = Instant::now() + timeout;
        loop {
            if file.try_lock_exclusive().is_ok() {
                break;
            }
            if Instant::now() >= deadline {
                debug!(path = %path.display(), "Run lock is held elsewhere");
                return Ok(None);
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        let holder = LockHolder {
            pid: std::process::id(),
            principal: principal.to_string(),
            command: command.to_string(),
            started_at: Utc::now(),
        };
        write_holder(&mut file, &holder)
            .with_context(|| format!("Writing lock file {}", path.display()))?;
        debug!(path = %path.display(), "Run lock acquired");

        Ok(Some(Self { file, path }))
    }

    /// Who last took the lock for `principal`, if anyone ever did.
    #[must_use]
    pub fn holder(dir: &Path, principal: &str) -> Option<LockHolder> {
        let raw = fs::read_to_string(lock_path(dir, principal)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        debug!(path = %self.path.display(), "Run lock released");
    }
}

/// Lock file for a principal; anything unsafe in a file name becomes `_`.
#[must_use]
pub fn lock_path(dir: &Path, principal: &str) -> PathBuf {
    let safe: String = principal
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{safe}.lock"))
}

fn write_holder(file: &mut File, holder: &LockHolder) -> std::io::Result<()> {
    let json = serde_json::to_string(holder).map_err(std::io::Error::other)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.sync_all()
}
