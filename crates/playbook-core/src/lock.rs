//! Per-file advisory locks shared by every mutating path.
//!
//! The lock for `playbook.yaml` is the sibling file `playbook.yaml.lock`;
//! its existence is the lock. Acquisition uses exclusive create, so exactly
//! one process on the host can hold it. A lock whose mtime is older than
//! `STALE_LOCK_THRESHOLD` is treated as abandoned by a crashed process and
//! removed.
//!
//! Nesting is permitted on distinct files only; callers that span multiple
//! files acquire locks in ascending lexicographic path order.

use crate::error::{PlaybookError, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

pub const STALE_LOCK_THRESHOLD: Duration = Duration::from_secs(30);

const DEFAULT_RETRIES: u32 = 20;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Held lock on a target path. Removing the lock file on drop covers every
/// exit path, including panics inside the critical section.
struct LockGuard {
    lock_path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // A missing lock file on release is not an error.
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn lock_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".lock");
    target.with_file_name(name)
}

fn is_stale(lock_path: &Path) -> bool {
    match std::fs::metadata(lock_path).and_then(|m| m.modified()) {
        Ok(mtime) => SystemTime::now()
            .duration_since(mtime)
            .map(|age| age > STALE_LOCK_THRESHOLD)
            .unwrap_or(false),
        // Vanished between attempts — not stale, just gone.
        Err(_) => false,
    }
}

fn acquire(target: &Path, opts: LockOptions) -> Result<LockGuard> {
    let lock_path = lock_path_for(target);
    let mut attempts = 0u32;

    loop {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                use std::io::Write as _;
                let _ = write!(file, "{}", std::process::id());
                return Ok(LockGuard { lock_path });
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                // Double-check staleness before removing: the holder may have
                // refreshed or released between the two stats.
                if is_stale(&lock_path) && is_stale(&lock_path) {
                    match std::fs::remove_file(&lock_path) {
                        Ok(()) => continue,
                        Err(e) if e.kind() == ErrorKind::NotFound => continue,
                        Err(e) => return Err(e.into()),
                    }
                }
                if attempts >= opts.retries {
                    return Err(PlaybookError::LockTimeout {
                        path: target.to_path_buf(),
                    });
                }
                attempts += 1;
                std::thread::sleep(opts.retry_delay);
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let parent = lock_path.parent().unwrap_or(Path::new("."));
                std::fs::create_dir_all(parent)?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Run `op` with exclusive access to `target` among cooperating processes
/// on this host. The lock is released on all exit paths.
pub fn with_lock<T>(target: &Path, op: impl FnOnce() -> Result<T>) -> Result<T> {
    with_lock_opts(target, LockOptions::default(), op)
}

pub fn with_lock_opts<T>(
    target: &Path,
    opts: LockOptions,
    op: impl FnOnce() -> Result<T>,
) -> Result<T> {
    let guard = acquire(target, opts)?;
    let result = op();
    drop(guard);
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
