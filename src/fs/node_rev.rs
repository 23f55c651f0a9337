//! The immutable value a [`NodeId`] resolves to.

use serde::{Deserialize, Serialize};

use super::id::{NodeId, Revnum};

/// Kind of a versioned node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Dir,
}

/// Opaque key naming a representation in the store.
///
/// Equal keys imply identical content; unequal keys are conservatively
/// treated as "changed" without looking at the bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepKey(pub String);

/// One node revision. Created inside a transaction, frozen at commit,
/// never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeRevision {
    pub kind: NodeKind,
    /// The previous revision of the same node line, if any.
    pub predecessor: Option<NodeId>,
    /// Length of the predecessor chain; `None` means unknown.
    pub predecessor_count: Option<u32>,
    /// The node that originated the current copy lineage.
    pub copyroot: Option<NodeId>,
    /// Where this node was copied from, when it heads a copy lineage.
    pub copyfrom: Option<(Revnum, String)>,
    pub data_rep: Option<RepKey>,
    pub prop_rep: Option<RepKey>,
    /// A mutable text stream is open iff this is set.
    pub edit_rep: Option<RepKey>,
    pub created_path: String,
}

impl NodeRevision {
    pub fn new(kind: NodeKind, created_path: impl Into<String>) -> Self {
        Self {
            kind,
            predecessor: None,
            predecessor_count: Some(0),
            copyroot: None,
            copyfrom: None,
            data_rep: None,
            prop_rep: None,
            edit_rep: None,
            created_path: created_path.into(),
        }
    }
}
