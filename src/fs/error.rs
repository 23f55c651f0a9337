//! Failure taxonomy of the DAG layer.
//!
//! Invariant violations are surfaced and never retried; there is no
//! transient class here.

use thiserror::Error;

use super::id::{NodeId, Revnum, TxnId};

pub type FsResult<T> = std::result::Result<T, FsError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("node revision {0} not found")]
    NotFound(NodeId),
    #[error("attempted directory operation on non-directory node {0}")]
    NotDirectory(NodeId),
    #[error("attempted file operation on non-file node {0}")]
    NotFile(NodeId),
    #[error("attempted to mutate node {0} outside its transaction")]
    NotMutable(NodeId),
    #[error("entry `{0}` already exists")]
    AlreadyExists(String),
    #[error("`{0}` is not a single path component")]
    NotSinglePathComponent(String),
    #[error("no entry named `{0}`")]
    NoSuchEntry(String),
    #[error("directory `{0}` is not empty")]
    DirNotEmpty(String),
    #[error("checksum mismatch on {id}: expected {expected}, actual {actual}")]
    ChecksumMismatch {
        id: NodeId,
        expected: String,
        actual: String,
    },
    #[error("no such transaction {0}")]
    NoSuchTransaction(TxnId),
    #[error("no such revision {0}")]
    NoSuchRevision(Revnum),
}
