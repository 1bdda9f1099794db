use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant, SystemTime},
};

use chrono::Utc;
use log::{debug, warn};

use crate::error::{RosError, RosResult};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn lock_path(table: &Path) -> PathBuf {
    let mut name = table.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    table.with_file_name(name)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age > stale_after)
        .unwrap_or(false)
}

/// Remove the lock file at `path` if it is older than `stale_after`.
/// The file is first renamed to a name private to this process, so two
/// waiters never both remove it; if the renamed file turns out to be a fresh
/// lock taken in between, it is linked back in place.
fn take_over_stale(path: &Path, stale_after: Duration) -> bool {
    if !is_stale(path, stale_after) {
        return false;
    }
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(
        ".stale.{}.{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    let aside = path.with_file_name(name);
    if fs::rename(path, &aside).is_err() {
        // another waiter moved it first
        return false;
    }
    if !is_stale(&aside, stale_after) {
        if let Err(err) = fs::hard_link(&aside, path) {
            warn!("Cannot restore live lock {}: {}", path.display(), err);
        }
        let _ = fs::remove_file(&aside);
        return false;
    }
    warn!("Removed stale lock {}", path.display());
    let _ = fs::remove_file(&aside);
    true
}

/// Exclusive writer lock on a table, held as a `<table>.lock` file.
/// The file is removed when the lock is dropped.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    /// Wait up to `timeout` for the lock. Lock files older than `stale_after`
    /// are removed first.
    pub fn acquire(table: &Path, timeout: Duration, stale_after: Duration) -> RosResult<Self> {
        let path = lock_path(table);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{} {}", std::process::id(), Utc::now().to_rfc3339())?;
                    debug!("[LOCK] acquired {}", path.display());
                    return Ok(WriterLock { path });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if take_over_stale(&path, stale_after) {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(RosError::CacheLocked(table.to_path_buf()));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!("Cannot remove lock {}: {}", self.path.display(), err);
        } else {
            debug!("[LOCK] released {}", self.path.display());
        }
    }
}
