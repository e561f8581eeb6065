//! Startup mutual exclusion.
//!
//! Each broker takes an advisory exclusive lock on a well-known file before
//! serving; a second instance pointed at the same file must fail to start.
//! The lock file doubles as the PID file: the owner's PID is written into it
//! after the lock is held.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock {path} is held by another instance")]
    Held { path: PathBuf },

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// An acquired broker lock. Dropping it releases the lock; the file itself
/// is left behind with the last owner's PID.
#[derive(Debug)]
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Acquire the lock at `path` and record our PID, or fail if another
    /// process (or another handle in this one) holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| LockError::Io {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(io_err)?;

        file.try_lock_exclusive()
            .map_err(|_| LockError::Held { path: path.clone() })?;

        file.set_len(0).map_err(io_err)?;
        file.write_all(std::process::id().to_string().as_bytes())
            .map_err(io_err)?;
        file.flush().map_err(io_err)?;

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquirer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.lock");

        let held = PidLock::acquire(&path).unwrap();
        assert!(matches!(
            PidLock::acquire(&path),
            Err(LockError::Held { .. })
        ));

        drop(held);
        PidLock::acquire(&path).unwrap();
    }

    #[test]
    fn lock_file_records_the_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.lock");

        let _held = PidLock::acquire(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }
}
