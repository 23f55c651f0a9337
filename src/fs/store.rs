//! In-memory filesystem store.
//!
//! `FsStore` plays both collaborator roles the DAG surface depends on: the
//! representation store (resolving [`RepKey`]s to file text, directory
//! entries and property lists) and the transaction store (allocating nodes
//! and successors, tracking transaction roots, promoting transactions to
//! committed revisions).
//!
//! Representations are content-addressed: the key is the SHA-256 of the
//! serialized value, so identical content shares a key and key equality is
//! a sound "unchanged" test.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

use super::error::{FsError, FsResult};
use super::id::{CopyId, NodeId, NodeIdentity, Revnum, TxnId};
use super::node_rev::{NodeKind, NodeRevision, RepKey};

/// One directory entry: a name maps to a node and its kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub id: NodeId,
    pub kind: NodeKind,
}

pub type DirEntries = BTreeMap<String, DirEntry>;
pub type PropList = BTreeMap<String, String>;

#[derive(Clone, Debug)]
enum Representation {
    FileText(Vec<u8>),
    DirEntries(DirEntries),
    Props(PropList),
}

#[derive(Clone, Debug)]
struct Txn {
    root: NodeId,
    base_root: NodeId,
}

pub struct FsStore {
    nodes: HashMap<NodeId, NodeRevision>,
    reps: HashMap<RepKey, Representation>,
    /// Root node id per committed revision, indexed by revision number.
    revisions: Vec<NodeId>,
    txns: HashMap<TxnId, Txn>,
    next_node: u64,
    next_copy: u64,
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

impl FsStore {
    /// Create a filesystem holding revision 0: an empty root directory.
    pub fn new() -> Self {
        let mut store = Self {
            nodes: HashMap::new(),
            reps: HashMap::new(),
            revisions: Vec::new(),
            txns: HashMap::new(),
            next_node: 0,
            next_copy: 0,
        };
        let mut root = NodeRevision::new(NodeKind::Dir, "/");
        root.data_rep = Some(store.put_dir(DirEntries::new()));
        let root_id = NodeId::committed(
            store.alloc_node_identity(),
            store.alloc_copy_id(),
            Revnum(0),
        );
        store.nodes.insert(root_id, root);
        store.revisions.push(root_id);
        store
    }

    pub fn youngest(&self) -> Revnum {
        Revnum(self.revisions.len() as u64 - 1)
    }

    pub fn revision_root(&self, rev: Revnum) -> FsResult<NodeId> {
        self.revisions
            .get(rev.0 as usize)
            .copied()
            .ok_or(FsError::NoSuchRevision(rev))
    }

    fn alloc_node_identity(&mut self) -> NodeIdentity {
        self.next_node += 1;
        NodeIdentity(self.next_node)
    }

    fn alloc_copy_id(&mut self) -> CopyId {
        self.next_copy += 1;
        CopyId(self.next_copy)
    }

    /// Allocate a fresh copy lineage identity.
    pub(crate) fn new_copy_id(&mut self) -> CopyId {
        self.alloc_copy_id()
    }

    // ---- transactions -------------------------------------------------

    /// Open a transaction based on the given committed revision. The
    /// transaction root starts out aliased to the base root; it is cloned
    /// on first mutation.
    pub fn begin_txn(&mut self, base: Revnum) -> FsResult<TxnId> {
        let base_root = self.revision_root(base)?;
        let txn = TxnId::generate();
        self.txns.insert(
            txn,
            Txn {
                root: base_root,
                base_root,
            },
        );
        Ok(txn)
    }

    pub fn txn_root(&self, txn: TxnId) -> FsResult<NodeId> {
        Ok(self.txn(txn)?.root)
    }

    pub fn txn_base_root(&self, txn: TxnId) -> FsResult<NodeId> {
        Ok(self.txn(txn)?.base_root)
    }

    fn txn(&self, txn: TxnId) -> FsResult<&Txn> {
        self.txns.get(&txn).ok_or(FsError::NoSuchTransaction(txn))
    }

    pub(crate) fn set_txn_root(&mut self, txn: TxnId, root: NodeId) -> FsResult<()> {
        self.txns
            .get_mut(&txn)
            .ok_or(FsError::NoSuchTransaction(txn))?
            .root = root;
        Ok(())
    }

    // ---- node revisions -----------------------------------------------

    pub fn node_rev(&self, id: NodeId) -> FsResult<&NodeRevision> {
        self.nodes.get(&id).ok_or(FsError::NotFound(id))
    }

    /// Store a brand-new node revision inside `txn`, returning its id.
    pub(crate) fn create_node(
        &mut self,
        noderev: NodeRevision,
        copy: CopyId,
        txn: TxnId,
    ) -> NodeId {
        let id = NodeId::transactional(self.alloc_node_identity(), copy, txn);
        self.nodes.insert(id, noderev);
        id
    }

    /// Store a mutable successor of `old`, keeping its node-line identity.
    pub(crate) fn create_successor(
        &mut self,
        old: NodeId,
        noderev: NodeRevision,
        copy: CopyId,
        txn: TxnId,
    ) -> NodeId {
        let id = NodeId::transactional(old.node, copy, txn);
        self.nodes.insert(id, noderev);
        id
    }

    /// Replace the node revision behind a mutable id.
    pub(crate) fn update_node(&mut self, id: NodeId, noderev: NodeRevision) -> FsResult<()> {
        if !id.is_mutable() {
            return Err(FsError::NotMutable(id));
        }
        if !self.nodes.contains_key(&id) {
            return Err(FsError::NotFound(id));
        }
        self.nodes.insert(id, noderev);
        Ok(())
    }

    // ---- representations ----------------------------------------------

    fn put_rep(&mut self, key_material: &[u8], rep: Representation) -> RepKey {
        let key = RepKey(sha256_hex(key_material));
        self.reps.insert(key.clone(), rep);
        key
    }

    pub(crate) fn put_text(&mut self, bytes: Vec<u8>) -> RepKey {
        let mut material = b"text\0".to_vec();
        material.extend_from_slice(&bytes);
        self.put_rep(&material, Representation::FileText(bytes))
    }

    pub(crate) fn put_dir(&mut self, entries: DirEntries) -> RepKey {
        let serialized = format!("{entries:?}");
        let mut material = b"dir\0".to_vec();
        material.extend_from_slice(serialized.as_bytes());
        self.put_rep(&material, Representation::DirEntries(entries))
    }

    pub(crate) fn put_props(&mut self, props: PropList) -> RepKey {
        let serialized = format!("{props:?}");
        let mut material = b"props\0".to_vec();
        material.extend_from_slice(serialized.as_bytes());
        self.put_rep(&material, Representation::Props(props))
    }

    pub(crate) fn text(&self, key: &RepKey) -> FsResult<&[u8]> {
        match self.reps.get(key) {
            Some(Representation::FileText(bytes)) => Ok(bytes),
            _ => Err(FsError::NoSuchEntry(key.0.clone())),
        }
    }

    pub(crate) fn dir(&self, key: &RepKey) -> FsResult<&DirEntries> {
        match self.reps.get(key) {
            Some(Representation::DirEntries(entries)) => Ok(entries),
            _ => Err(FsError::NoSuchEntry(key.0.clone())),
        }
    }

    pub(crate) fn props(&self, key: &RepKey) -> FsResult<&PropList> {
        match self.reps.get(key) {
            Some(Representation::Props(props)) => Ok(props),
            _ => Err(FsError::NoSuchEntry(key.0.clone())),
        }
    }

    // ---- commit --------------------------------------------------------

    /// Atomically promote every node of `txn` to a new committed revision.
    ///
    /// Mutable nodes reachable from the transaction root receive committed
    /// ids carrying the new revision number; directory entries referring to
    /// mutable children are rewritten bottom-up. An unfinished text edit is
    /// sealed as the node's data. The transaction is dropped afterwards.
    pub fn commit_txn(&mut self, txn: TxnId) -> FsResult<Revnum> {
        let root = self.txn_root(txn)?;
        let new_rev = Revnum(self.revisions.len() as u64);
        let new_root = self.promote(root, txn, new_rev)?;
        self.revisions.push(new_root);
        self.txns.remove(&txn);
        Ok(new_rev)
    }

    fn promote(&mut self, id: NodeId, txn: TxnId, new_rev: Revnum) -> FsResult<NodeId> {
        if id.txn != Some(txn) {
            // Committed (or foreign) nodes pass through untouched.
            return Ok(id);
        }
        let mut noderev = self.node_rev(id)?.clone();

        if noderev.kind == NodeKind::Dir {
            if let Some(rep) = noderev.data_rep.clone() {
                let entries = self.dir(&rep)?.clone();
                let mut promoted = DirEntries::new();
                let mut changed = false;
                for (name, entry) in entries {
                    let child = self.promote(entry.id, txn, new_rev)?;
                    changed |= child != entry.id;
                    promoted.insert(
                        name,
                        DirEntry {
                            id: child,
                            kind: entry.kind,
                        },
                    );
                }
                if changed {
                    noderev.data_rep = Some(self.put_dir(promoted));
                }
            }
        } else if let Some(edit) = noderev.edit_rep.take() {
            // Seal a still-open text edit at commit time.
            noderev.data_rep = Some(edit);
        }

        let new_id = NodeId::committed(id.node, id.copy, new_rev);
        self.nodes.remove(&id);
        self.nodes.insert(new_id, noderev);
        Ok(new_id)
    }
}

impl Default for FsStore {
    fn default() -> Self {
        Self::new()
    }
}
