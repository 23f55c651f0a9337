//! Working-copy errors.
//!
//! Invariant violations and obstructions are surfaced and never retried;
//! the first error on an editor callback aborts the whole edit. Cleanup
//! along the unwind path is best-effort and must not mask the original
//! error.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::lock::LockError;

pub type WcResult<T> = std::result::Result<T, WcError>;

#[derive(Debug, Error)]
pub enum WcError {
    #[error("`{0}` is not a versioned resource")]
    EntryNotFound(PathBuf),
    #[error("`{0}` has no ancestry information")]
    EntryMissingUrl(PathBuf),
    #[error("obstructed update: `{0}` is in the way")]
    ObstructedUpdate(PathBuf),
    #[error("`{0}` is not a working-copy directory")]
    NotDirectory(PathBuf),
    #[error("bogus path `{0}`")]
    BadFilename(PathBuf),
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    #[error("`{0}` has inconsistent line endings")]
    InconsistentEol(PathBuf),
    #[error("corrupt metadata at {path}: {source}")]
    CorruptMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt log in {dir}: {reason}")]
    CorruptLog { dir: PathBuf, reason: String },
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
