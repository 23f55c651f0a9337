//! The revision DAG: immutable history of versioned trees.
//!
//! Nodes are identified by [`NodeId`]s carrying node identity, copy
//! lineage, transaction membership and committed revision. [`FsStore`]
//! holds node revisions, content-addressed representations, committed
//! revision roots and open transactions; [`DagNode`] is the read/write
//! surface over it. Mutation happens only inside a transaction, and
//! [`FsStore::commit_txn`] atomically freezes a transaction into the next
//! committed revision.

pub mod dag;
mod error;
mod id;
mod node_rev;
mod store;

pub use dag::{
    clone_root, is_ancestor, is_parent, is_single_path_component, revision_root,
    things_different, txn_base_root, txn_root, walk_predecessors, DagNode, Walk,
};
pub use error::{FsError, FsResult};
pub use id::{CopyId, NodeId, NodeIdentity, Revnum, TxnId};
pub use node_rev::{NodeKind, NodeRevision, RepKey};
pub use store::{DirEntries, DirEntry, FsStore, PropList};
