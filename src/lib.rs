//! strata: a version-control working-copy engine over an immutable,
//! content-addressed revision DAG.
//!
//! Two subsystems, loosely coupled through revision numbers and node
//! identities:
//!
//! - [`fs`] — the history model: node revisions with predecessor chains
//!   and copy provenance, readable at committed revisions and writable
//!   inside single-writer transactions.
//! - [`wc`] — the working copy: admin areas, pristine bases, the
//!   journaled update log, the update editor and the file installer that
//!   merges incoming changes with local modifications across process
//!   interruptions.

#![forbid(unsafe_code)]

pub mod fs;
pub mod wc;

pub use fs::{DagNode, FsError, FsResult, FsStore, NodeId, NodeKind, Revnum, TxnId};
pub use wc::{UpdateEditor, WcError, WcResult};
