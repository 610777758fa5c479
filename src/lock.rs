//! Cross-process locking and atomic file writes.
//!
//! Every CLI mutation holds an exclusive `fs2` lock on `.trellis/trellis.lock`
//! for its whole duration, so concurrent `trellis` processes apply their
//! changes one at a time. Audit appends take a lock of their own.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use tracing::debug;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 25;

fn is_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }
    // Windows reports sharing/lock violations as raw OS errors 32 and 33.
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Exclusive lock guard; released on drop.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Wait up to `timeout_ms` for an exclusive lock, creating the file if needed.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    debug!(path = %path.display(), "lock acquired");
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if is_contended(&err) => {
                    if Instant::now() >= deadline {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(Duration::from_millis(LOCK_RETRY_INTERVAL_MS));
                }
                Err(err) => return Err(Error::Io(err)),
            }
        }
    }

    /// Take the lock only if nobody holds it.
    #[cfg(test)]
    fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(err) if is_contended(&err) => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Write to a temp file next to `path`, then rename over it.
///
/// Readers see either the old contents or the new, never a partial write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::InvalidArgument(format!("not a file path: {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));

    let mut temp = File::create(&temp_path)?;
    temp.write_all(data)?;
    temp.sync_all()?;
    drop(temp);

    fs::rename(&temp_path, path)?;
    Ok(())
}
