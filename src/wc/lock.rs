//! Per-directory advisory lock.
//!
//! The lock file is the serialization point for all working-copy
//! mutation: the installer and directory close both take it, and a
//! pending log is only ever replayed under it. The sentinel carries JSON
//! holder metadata for diagnostics; the create-new open is the actual
//! exclusion mechanism.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::paths;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LockMeta {
    pub pid: u32,
    pub acquired_at_ms: u64,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("working copy `{0}` is locked")]
    Held(PathBuf),
    #[error("`{0}` is not a working-copy directory")]
    NotWorkingCopy(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub struct AdmLock {
    path: PathBuf,
    released: bool,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl AdmLock {
    /// Take the exclusive lock on `dir`'s admin area.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        if !paths::adm_dir(dir).is_dir() {
            return Err(LockError::NotWorkingCopy(dir.to_path_buf()));
        }
        let path = paths::lock_path(dir);
        let file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held(dir.to_path_buf()));
            }
            Err(err) => return Err(LockError::Io(err)),
        };
        let meta = LockMeta {
            pid: std::process::id(),
            acquired_at_ms: now_ms(),
        };
        // Metadata is diagnostic only; the create-new open above is what
        // excludes other holders.
        if let Err(err) = serde_json::to_writer(&file, &meta) {
            tracing::warn!("failed to write lock metadata for {}: {err}", dir.display());
        }
        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn release(mut self) -> Result<(), LockError> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for AdmLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wc_dir() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(paths::adm_dir(temp.path())).unwrap();
        temp
    }

    #[test]
    fn second_acquire_fails_while_held() {
        let temp = wc_dir();
        let lock = AdmLock::acquire(temp.path()).unwrap();
        assert!(matches!(
            AdmLock::acquire(temp.path()),
            Err(LockError::Held(_))
        ));
        lock.release().unwrap();
        AdmLock::acquire(temp.path()).unwrap();
    }

    #[test]
    fn drop_releases_the_lock() {
        let temp = wc_dir();
        {
            let _lock = AdmLock::acquire(temp.path()).unwrap();
        }
        assert!(!paths::lock_path(temp.path()).exists());
    }

    #[test]
    fn unversioned_directory_cannot_be_locked() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            AdmLock::acquire(temp.path()),
            Err(LockError::NotWorkingCopy(_))
        ));
    }
}
