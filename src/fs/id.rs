//! Node-revision identities.
//!
//! A [`NodeId`] names exactly one immutable node revision. It carries four
//! pieces of identity: the node line (`node`), the copy lineage (`copy`),
//! the owning transaction (present iff the revision is still mutable) and
//! the committed revision number (present iff the revision is frozen).
//! A node is never both mutable and committed.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of a node line, preserved across successors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeIdentity(pub u64);

/// Identity of a copy lineage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CopyId(pub u64);

/// A committed revision number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Revnum(pub u64);

impl fmt::Display for Revnum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxnId(Uuid);

impl TxnId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0.simple())
    }
}

/// Identity of one node revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub node: NodeIdentity,
    pub copy: CopyId,
    /// Present iff this revision belongs to an uncommitted transaction.
    pub txn: Option<TxnId>,
    /// Present iff this revision was frozen by a commit.
    pub revision: Option<Revnum>,
}

impl NodeId {
    pub fn committed(node: NodeIdentity, copy: CopyId, revision: Revnum) -> Self {
        Self {
            node,
            copy,
            txn: None,
            revision: Some(revision),
        }
    }

    pub fn transactional(node: NodeIdentity, copy: CopyId, txn: TxnId) -> Self {
        Self {
            node,
            copy,
            txn: Some(txn),
            revision: None,
        }
    }

    /// A revision may be modified only while it belongs to a transaction.
    pub fn is_mutable(&self) -> bool {
        self.txn.is_some()
    }

    pub fn is_committed(&self) -> bool {
        self.revision.is_some()
    }

    /// Two ids are related when they name the same node line, regardless of
    /// copy lineage or revision.
    pub fn is_related(&self, other: &NodeId) -> bool {
        self.node == other.node
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node.0, self.copy.0)?;
        match (self.txn, self.revision) {
            (Some(txn), _) => write!(f, ".{txn}"),
            (None, Some(rev)) => write!(f, ".{rev}"),
            (None, None) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relatedness_ignores_copy_and_revision() {
        let a = NodeId::committed(NodeIdentity(1), CopyId(0), Revnum(3));
        let b = NodeId::transactional(NodeIdentity(1), CopyId(2), TxnId::generate());
        let c = NodeId::committed(NodeIdentity(2), CopyId(0), Revnum(3));
        assert!(a.is_related(&b));
        assert!(!a.is_related(&c));
    }

    #[test]
    fn mutable_and_committed_are_disjoint() {
        let t = NodeId::transactional(NodeIdentity(1), CopyId(0), TxnId::generate());
        let c = NodeId::committed(NodeIdentity(1), CopyId(0), Revnum(1));
        assert!(t.is_mutable() && !t.is_committed());
        assert!(c.is_committed() && !c.is_mutable());
    }
}
