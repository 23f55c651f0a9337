//! The DAG node surface: read and write access to node revisions.
//!
//! A [`DagNode`] is a handle combining a [`NodeId`] with a cached
//! [`NodeRevision`]. `kind` and `created_path` are populated eagerly when
//! the handle is built; everything else is read through the cache, which a
//! handle refreshes after any mutation it performs itself. Handles are
//! plain owned values; several may exist for one id, each with its own
//! cache, and a handle used for mutation must not be shared across
//! transactions.

use super::error::{FsError, FsResult};
use super::id::{CopyId, NodeId, Revnum, TxnId};
use super::node_rev::{NodeKind, NodeRevision, RepKey};
use super::store::{sha256_hex, DirEntries, DirEntry, FsStore, PropList};

/// Control value returned by a predecessor-walk visitor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Walk {
    Continue,
    Done,
}

/// A name is a valid entry name iff it is one non-empty path component.
pub fn is_single_path_component(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() || parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[derive(Clone, Debug)]
pub struct DagNode {
    id: NodeId,
    kind: NodeKind,
    created_path: String,
    cache: Option<NodeRevision>,
}

impl DagNode {
    /// Fetch the node revision for `id` and build a fresh handle.
    pub fn get(store: &FsStore, id: NodeId) -> FsResult<DagNode> {
        let noderev = store.node_rev(id)?.clone();
        Ok(DagNode {
            id,
            kind: noderev.kind,
            created_path: noderev.created_path.clone(),
            cache: Some(noderev),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn created_path(&self) -> &str {
        &self.created_path
    }

    /// True iff this node may be mutated inside `txn`.
    ///
    /// Membership is checked against the node's own transaction; a node
    /// mutable in some *other* transaction is not mutable here.
    pub fn check_mutable(&self, txn: TxnId) -> bool {
        self.id.txn == Some(txn)
    }

    pub fn revision(&self) -> Option<Revnum> {
        self.id.revision
    }

    fn invalidate(&mut self) {
        self.cache = None;
    }

    fn noderev<'a>(&'a mut self, store: &FsStore) -> FsResult<&'a NodeRevision> {
        if self.cache.is_none() {
            self.cache = Some(store.node_rev(self.id)?.clone());
        }
        Ok(self.cache.as_ref().expect("cache populated above"))
    }

    pub fn predecessor(&mut self, store: &FsStore) -> FsResult<Option<NodeId>> {
        Ok(self.noderev(store)?.predecessor)
    }

    pub fn predecessor_count(&mut self, store: &FsStore) -> FsResult<Option<u32>> {
        Ok(self.noderev(store)?.predecessor_count)
    }

    pub fn copyroot(&mut self, store: &FsStore) -> FsResult<Option<NodeId>> {
        Ok(self.noderev(store)?.copyroot)
    }

    pub fn copyfrom(&mut self, store: &FsStore) -> FsResult<Option<(Revnum, String)>> {
        Ok(self.noderev(store)?.copyfrom.clone())
    }

    // ---- directories ---------------------------------------------------

    /// The entry mapping of a directory node.
    pub fn dir_entries(&mut self, store: &FsStore) -> FsResult<DirEntries> {
        if self.kind != NodeKind::Dir {
            return Err(FsError::NotDirectory(self.id));
        }
        let noderev = self.noderev(store)?;
        match &noderev.data_rep {
            Some(key) => Ok(store.dir(key)?.clone()),
            None => Ok(DirEntries::new()),
        }
    }

    /// Open the child named `name`, failing `NoSuchEntry` if absent.
    pub fn open(&mut self, store: &FsStore, name: &str) -> FsResult<DagNode> {
        if !is_single_path_component(name) {
            return Err(FsError::NotSinglePathComponent(name.to_string()));
        }
        let entries = self.dir_entries(store)?;
        let entry = entries
            .get(name)
            .ok_or_else(|| FsError::NoSuchEntry(name.to_string()))?;
        DagNode::get(store, entry.id)
    }

    fn mutate_entries(
        &mut self,
        store: &mut FsStore,
        txn: TxnId,
        mutate: impl FnOnce(&mut DirEntries),
    ) -> FsResult<()> {
        if self.kind != NodeKind::Dir {
            return Err(FsError::NotDirectory(self.id));
        }
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        let mut noderev = store.node_rev(self.id)?.clone();
        let mut entries = match &noderev.data_rep {
            Some(key) => store.dir(key)?.clone(),
            None => DirEntries::new(),
        };
        mutate(&mut entries);
        noderev.data_rep = Some(store.put_dir(entries));
        store.update_node(self.id, noderev)?;
        self.invalidate();
        Ok(())
    }

    /// Add or overwrite the entry `name → id` in this directory.
    ///
    /// The caller must ensure `id` does not name an ancestor of this
    /// directory; the entry table itself cannot detect the cycle.
    pub fn set_entry(
        &mut self,
        store: &mut FsStore,
        name: &str,
        id: NodeId,
        kind: NodeKind,
        txn: TxnId,
    ) -> FsResult<()> {
        if !is_single_path_component(name) {
            return Err(FsError::NotSinglePathComponent(name.to_string()));
        }
        self.mutate_entries(store, txn, |entries| {
            entries.insert(name.to_string(), DirEntry { id, kind });
        })
    }

    fn make_entry(
        &mut self,
        store: &mut FsStore,
        parent_path: &str,
        name: &str,
        kind: NodeKind,
        txn: TxnId,
    ) -> FsResult<DagNode> {
        if !is_single_path_component(name) {
            return Err(FsError::NotSinglePathComponent(name.to_string()));
        }
        if self.kind != NodeKind::Dir {
            return Err(FsError::NotDirectory(self.id));
        }
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        let entries = self.dir_entries(store)?;
        if entries.contains_key(name) {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let noderev = NodeRevision::new(kind, join_path(parent_path, name));
        // The child joins its parent's copy lineage.
        let child_id = store.create_node(noderev, self.id.copy, txn);

        // The child was just created, so it has no ancestors and cannot be
        // an ancestor of this directory.
        self.mutate_entries(store, txn, |entries| {
            entries.insert(name.to_string(), DirEntry { id: child_id, kind });
        })?;
        DagNode::get(store, child_id)
    }

    /// Create a fresh file node under this directory.
    pub fn make_file(
        &mut self,
        store: &mut FsStore,
        parent_path: &str,
        name: &str,
        txn: TxnId,
    ) -> FsResult<DagNode> {
        self.make_entry(store, parent_path, name, NodeKind::File, txn)
    }

    /// Create a fresh directory node under this directory.
    pub fn make_dir(
        &mut self,
        store: &mut FsStore,
        parent_path: &str,
        name: &str,
        txn: TxnId,
    ) -> FsResult<DagNode> {
        self.make_entry(store, parent_path, name, NodeKind::Dir, txn)
    }

    /// Obtain a mutable version of the child named `name` inside `txn`.
    ///
    /// If the child is already mutable in this transaction it is returned
    /// as is. Otherwise a successor node is created: the predecessor
    /// pointer is set to the current child, the predecessor count bumped
    /// (left alone when unknown), the created path refreshed, and the
    /// parent entry replaced with the clone.
    pub fn clone_child(
        &mut self,
        store: &mut FsStore,
        parent_path: &str,
        name: &str,
        copy: CopyId,
        txn: TxnId,
    ) -> FsResult<DagNode> {
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        if !is_single_path_component(name) {
            return Err(FsError::NotSinglePathComponent(name.to_string()));
        }

        let cur = self.open(store, name)?;
        if cur.check_mutable(txn) {
            return Ok(cur);
        }

        let mut noderev = store.node_rev(cur.id)?.clone();
        noderev.predecessor = Some(cur.id);
        if let Some(count) = noderev.predecessor_count {
            noderev.predecessor_count = Some(count + 1);
        }
        noderev.created_path = join_path(parent_path, name);
        let kind = noderev.kind;
        let new_id = store.create_successor(cur.id, noderev, copy, txn);

        self.mutate_entries(store, txn, |entries| {
            entries.insert(name.to_string(), DirEntry { id: new_id, kind });
        })?;
        DagNode::get(store, new_id)
    }

    /// Remove the entry `name` from this directory.
    ///
    /// With `require_empty`, deleting a non-empty directory fails
    /// `DirNotEmpty`.
    pub fn delete(
        &mut self,
        store: &mut FsStore,
        name: &str,
        txn: TxnId,
        require_empty: bool,
    ) -> FsResult<()> {
        if !is_single_path_component(name) {
            return Err(FsError::NotSinglePathComponent(name.to_string()));
        }
        let entries = self.dir_entries(store)?;
        let entry = entries
            .get(name)
            .ok_or_else(|| FsError::NoSuchEntry(name.to_string()))?;
        if require_empty && entry.kind == NodeKind::Dir {
            let mut child = DagNode::get(store, entry.id)?;
            if !child.dir_entries(store)?.is_empty() {
                return Err(FsError::DirNotEmpty(name.to_string()));
            }
        }
        self.mutate_entries(store, txn, |entries| {
            entries.remove(name);
        })
    }

    /// Insert `entry → from` into this directory.
    ///
    /// With `preserve_history` the new entry gets a successor node whose
    /// revision records the copy source and which starts a fresh copy
    /// lineage rooted at itself. Without it, the entry simply aliases
    /// `from`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy(
        &mut self,
        store: &mut FsStore,
        entry: &str,
        from: &DagNode,
        preserve_history: bool,
        from_rev: Revnum,
        from_path: &str,
        txn: TxnId,
    ) -> FsResult<()> {
        let id = if preserve_history {
            let mut noderev = store.node_rev(from.id)?.clone();
            noderev.predecessor = Some(from.id);
            if let Some(count) = noderev.predecessor_count {
                noderev.predecessor_count = Some(count + 1);
            }
            noderev.copyfrom = Some((from_rev, from_path.to_string()));
            noderev.created_path = join_path(&self.created_path, entry);
            let copy = store.new_copy_id();
            let new_id = store.create_successor(from.id, noderev, copy, txn);

            // The copy heads its own lineage.
            let mut copied = store.node_rev(new_id)?.clone();
            copied.copyroot = Some(new_id);
            store.update_node(new_id, copied)?;
            new_id
        } else {
            from.id
        };
        self.set_entry(store, entry, id, from.kind, txn)
    }

    // ---- proplists -----------------------------------------------------

    pub fn get_proplist(&mut self, store: &FsStore) -> FsResult<PropList> {
        let noderev = self.noderev(store)?;
        match &noderev.prop_rep {
            Some(key) => Ok(store.props(key)?.clone()),
            None => Ok(PropList::new()),
        }
    }

    pub fn set_proplist(
        &mut self,
        store: &mut FsStore,
        props: PropList,
        txn: TxnId,
    ) -> FsResult<()> {
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        let mut noderev = store.node_rev(self.id)?.clone();
        noderev.prop_rep = Some(store.put_props(props));
        store.update_node(self.id, noderev)?;
        self.invalidate();
        Ok(())
    }

    // ---- file contents -------------------------------------------------

    fn require_file(&self) -> FsResult<()> {
        if self.kind != NodeKind::File {
            return Err(FsError::NotFile(self.id));
        }
        Ok(())
    }

    pub fn get_contents(&mut self, store: &FsStore) -> FsResult<Vec<u8>> {
        self.require_file()?;
        let noderev = self.noderev(store)?;
        match &noderev.data_rep {
            Some(key) => Ok(store.text(key)?.to_vec()),
            None => Ok(Vec::new()),
        }
    }

    pub fn file_length(&mut self, store: &FsStore) -> FsResult<u64> {
        Ok(self.get_contents(store)?.len() as u64)
    }

    /// Hex SHA-256 of the committed contents.
    pub fn file_checksum(&mut self, store: &FsStore) -> FsResult<String> {
        Ok(sha256_hex(&self.get_contents(store)?))
    }

    /// Append bytes to the node's open text edit, starting one if needed.
    pub fn append_contents(
        &mut self,
        store: &mut FsStore,
        bytes: &[u8],
        txn: TxnId,
    ) -> FsResult<()> {
        self.require_file()?;
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        let mut noderev = store.node_rev(self.id)?.clone();
        let mut staged = match &noderev.edit_rep {
            Some(key) => store.text(key)?.to_vec(),
            None => Vec::new(),
        };
        staged.extend_from_slice(bytes);
        noderev.edit_rep = Some(store.put_text(staged));
        store.update_node(self.id, noderev)?;
        self.invalidate();
        Ok(())
    }

    /// Close the open text edit, validating the caller's checksum against
    /// the staged bytes. A node without an open edit is a no-op.
    pub fn finalize_edits(
        &mut self,
        store: &mut FsStore,
        expected_checksum: Option<&str>,
        txn: TxnId,
    ) -> FsResult<()> {
        self.require_file()?;
        if !self.check_mutable(txn) {
            return Err(FsError::NotMutable(self.id));
        }
        let mut noderev = store.node_rev(self.id)?.clone();
        let Some(edit) = noderev.edit_rep.take() else {
            return Ok(());
        };
        if let Some(expected) = expected_checksum {
            let actual = sha256_hex(store.text(&edit)?);
            if expected != actual {
                return Err(FsError::ChecksumMismatch {
                    id: self.id,
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        noderev.data_rep = Some(edit);
        store.update_node(self.id, noderev)?;
        self.invalidate();
        Ok(())
    }

    fn rep_keys(&mut self, store: &FsStore) -> FsResult<(Option<RepKey>, Option<RepKey>)> {
        let noderev = self.noderev(store)?;
        Ok((noderev.prop_rep.clone(), noderev.data_rep.clone()))
    }
}

// ---- roots -------------------------------------------------------------

/// The root directory of a committed revision.
pub fn revision_root(store: &FsStore, rev: Revnum) -> FsResult<DagNode> {
    DagNode::get(store, store.revision_root(rev)?)
}

/// The root directory of a transaction.
pub fn txn_root(store: &FsStore, txn: TxnId) -> FsResult<DagNode> {
    DagNode::get(store, store.txn_root(txn)?)
}

/// The root the transaction was based on.
pub fn txn_base_root(store: &FsStore, txn: TxnId) -> FsResult<DagNode> {
    DagNode::get(store, store.txn_base_root(txn)?)
}

/// The mutable root of a transaction, cloning it from the base root on
/// first use.
pub fn clone_root(store: &mut FsStore, txn: TxnId) -> FsResult<DagNode> {
    let root = store.txn_root(txn)?;
    let base = store.txn_base_root(txn)?;
    if root == base {
        let mut noderev = store.node_rev(base)?.clone();
        noderev.predecessor = Some(base);
        if let Some(count) = noderev.predecessor_count {
            noderev.predecessor_count = Some(count + 1);
        }
        let new_root = store.create_successor(base, noderev, base.copy, txn);
        store.set_txn_root(txn, new_root)?;
    }
    DagNode::get(store, store.txn_root(txn)?)
}

// ---- traversal and comparison ------------------------------------------

/// Walk the predecessor chain of `node`, newest to oldest.
///
/// The visitor sees each predecessor in turn and, after the last real
/// node, is invoked once more with `None` to signal exhaustion. Returning
/// [`Walk::Done`] stops the traversal early.
pub fn walk_predecessors(
    store: &FsStore,
    node: &DagNode,
    mut visit: impl FnMut(Option<&DagNode>) -> FsResult<Walk>,
) -> FsResult<()> {
    let mut current = Some(node.clone());
    while let Some(mut this_node) = current.take() {
        let next = match this_node.predecessor(store)? {
            Some(id) => Some(DagNode::get(store, id)?),
            None => None,
        };
        if visit(next.as_ref())? == Walk::Done {
            return Ok(());
        }
        current = next;
    }
    Ok(())
}

fn search_predecessors(
    store: &FsStore,
    target: NodeId,
    from: &DagNode,
    parent_only: bool,
) -> FsResult<bool> {
    let mut found = false;
    walk_predecessors(store, from, |node| {
        if let Some(node) = node {
            if node.id() == target {
                found = true;
            }
            if parent_only {
                return Ok(Walk::Done);
            }
        }
        Ok(Walk::Continue)
    })?;
    Ok(found)
}

/// True iff `a` appears somewhere on `b`'s predecessor chain.
/// Relatedness is a prerequisite: unrelated nodes are never ancestors.
pub fn is_ancestor(store: &FsStore, a: &DagNode, b: &DagNode) -> FsResult<bool> {
    if !a.id().is_related(&b.id()) {
        return Ok(false);
    }
    search_predecessors(store, a.id(), b, false)
}

/// True iff `a` is `b`'s immediate predecessor.
pub fn is_parent(store: &FsStore, a: &DagNode, b: &DagNode) -> FsResult<bool> {
    if !a.id().is_related(&b.id()) {
        return Ok(false);
    }
    search_predecessors(store, a.id(), b, true)
}

/// Compare two nodes at the representation level.
///
/// Returns `(props_changed, contents_changed)`. Equal rep keys mean
/// unchanged; this never inspects content.
pub fn things_different(
    store: &FsStore,
    n1: &mut DagNode,
    n2: &mut DagNode,
) -> FsResult<(bool, bool)> {
    let (props1, data1) = n1.rep_keys(store)?;
    let (props2, data2) = n2.rep_keys(store)?;
    Ok((props1 != props2, data1 != data2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (FsStore, TxnId, DagNode) {
        let mut store = FsStore::new();
        let txn = store.begin_txn(Revnum(0)).unwrap();
        let root = clone_root(&mut store, txn).unwrap();
        (store, txn, root)
    }

    #[test]
    fn make_then_open_returns_same_node() {
        let (mut store, txn, mut root) = setup();
        let made = root.make_file(&mut store, "", "a", txn).unwrap();
        let opened = root.open(&store, "a").unwrap();
        assert_eq!(made.id(), opened.id());
        assert_eq!(opened.created_path(), "/a");
        assert_eq!(opened.kind(), NodeKind::File);
    }

    #[test]
    fn make_entry_rejects_duplicates_and_bad_names() {
        let (mut store, txn, mut root) = setup();
        root.make_file(&mut store, "", "a", txn).unwrap();
        assert!(matches!(
            root.make_file(&mut store, "", "a", txn),
            Err(FsError::AlreadyExists(_))
        ));
        assert!(matches!(
            root.make_dir(&mut store, "", "x/y", txn),
            Err(FsError::NotSinglePathComponent(_))
        ));
        assert!(matches!(
            root.make_dir(&mut store, "", "..", txn),
            Err(FsError::NotSinglePathComponent(_))
        ));
    }

    #[test]
    fn immutable_parent_refuses_mutation() {
        let mut store = FsStore::new();
        let txn = store.begin_txn(Revnum(0)).unwrap();
        let mut committed_root = revision_root(&store, Revnum(0)).unwrap();
        assert!(matches!(
            committed_root.make_file(&mut store, "", "a", txn),
            Err(FsError::NotMutable(_))
        ));
    }

    #[test]
    fn clone_child_returns_existing_mutable_child() {
        let (mut store, txn, mut root) = setup();
        let made = root.make_dir(&mut store, "", "d", txn).unwrap();
        let copy = made.id().copy;
        let cloned = root.clone_child(&mut store, "", "d", copy, txn).unwrap();
        assert_eq!(made.id(), cloned.id());
    }

    #[test]
    fn clone_child_of_committed_node_links_predecessor() {
        let (mut store, txn, mut root) = setup();
        root.make_file(&mut store, "", "f", txn).unwrap();
        let rev = store.commit_txn(txn).unwrap();

        let txn2 = store.begin_txn(rev).unwrap();
        let mut root2 = clone_root(&mut store, txn2).unwrap();
        let old = root2.open(&store, "f").unwrap();
        let copy = old.id().copy;
        let mut clone = root2
            .clone_child(&mut store, "", "f", copy, txn2)
            .unwrap();

        assert!(clone.check_mutable(txn2));
        assert_eq!(clone.predecessor(&store).unwrap(), Some(old.id()));
        assert_eq!(clone.id().node, old.id().node);
        let entries = root2.dir_entries(&store).unwrap();
        assert_eq!(entries.get("f").unwrap().id, clone.id());
    }

    #[test]
    fn delete_refuses_nonempty_dir_when_required() {
        let (mut store, txn, mut root) = setup();
        let mut dir = root.make_dir(&mut store, "", "d", txn).unwrap();
        dir.make_file(&mut store, "/d", "f", txn).unwrap();
        assert!(matches!(
            root.delete(&mut store, "d", txn, true),
            Err(FsError::DirNotEmpty(_))
        ));
        root.delete(&mut store, "d", txn, false).unwrap();
        assert!(matches!(
            root.open(&store, "d"),
            Err(FsError::NoSuchEntry(_))
        ));
    }

    #[test]
    fn copy_with_history_starts_new_lineage() {
        let (mut store, txn, mut root) = setup();
        root.make_file(&mut store, "", "src", txn).unwrap();
        let rev = store.commit_txn(txn).unwrap();

        let txn2 = store.begin_txn(rev).unwrap();
        let mut root2 = clone_root(&mut store, txn2).unwrap();
        let from = root2.open(&store, "src").unwrap();
        root2
            .copy(&mut store, "dst", &from, true, rev, "/src", txn2)
            .unwrap();

        let mut dst = root2.open(&store, "dst").unwrap();
        assert_eq!(
            dst.copyfrom(&store).unwrap(),
            Some((rev, "/src".to_string()))
        );
        assert_eq!(dst.copyroot(&store).unwrap(), Some(dst.id()));
        assert_eq!(dst.predecessor(&store).unwrap(), Some(from.id()));
        assert_ne!(dst.id().copy, from.id().copy);
    }

    #[test]
    fn soft_copy_aliases_the_source() {
        let (mut store, txn, mut root) = setup();
        let from = root.make_file(&mut store, "", "src", txn).unwrap();
        root.copy(&mut store, "dst", &from, false, Revnum(0), "/src", txn)
            .unwrap();
        let dst = root.open(&store, "dst").unwrap();
        assert_eq!(dst.id(), from.id());
    }

    #[test]
    fn walk_sees_predecessors_newest_first_then_none() {
        let (mut store, txn, mut root) = setup();
        root.make_file(&mut store, "", "f", txn).unwrap();
        let mut rev = store.commit_txn(txn).unwrap();
        let mut ids = vec![revision_root(&store, rev).unwrap().open(&store, "f").unwrap().id()];

        for _ in 0..2 {
            let txn = store.begin_txn(rev).unwrap();
            let mut root = clone_root(&mut store, txn).unwrap();
            let copy = ids[ids.len() - 1].copy;
            let mut f = root.clone_child(&mut store, "", "f", copy, txn).unwrap();
            f.append_contents(&mut store, b"x", txn).unwrap();
            f.finalize_edits(&mut store, None, txn).unwrap();
            rev = store.commit_txn(txn).unwrap();
            ids.push(
                revision_root(&store, rev)
                    .unwrap()
                    .open(&store, "f")
                    .unwrap()
                    .id(),
            );
        }

        let newest = revision_root(&store, rev)
            .unwrap()
            .open(&store, "f")
            .unwrap();
        let mut seen = Vec::new();
        walk_predecessors(&store, &newest, |node| {
            seen.push(node.map(|n| n.id()));
            Ok(Walk::Continue)
        })
        .unwrap();
        assert_eq!(seen, vec![Some(ids[1]), Some(ids[0]), None]);
    }

    #[test]
    fn ancestry_requires_relatedness() {
        let (mut store, txn, mut root) = setup();
        let a = root.make_file(&mut store, "", "a", txn).unwrap();
        let b = root.make_file(&mut store, "", "b", txn).unwrap();
        assert!(!is_ancestor(&store, &a, &b).unwrap());
        assert!(!is_parent(&store, &a, &b).unwrap());
    }

    #[test]
    fn parent_is_only_the_immediate_predecessor() {
        let (mut store, txn, mut root) = setup();
        root.make_file(&mut store, "", "f", txn).unwrap();
        let r1 = store.commit_txn(txn).unwrap();
        let gen0 = revision_root(&store, r1).unwrap().open(&store, "f").unwrap();

        let txn = store.begin_txn(r1).unwrap();
        let mut root = clone_root(&mut store, txn).unwrap();
        let mut f = root
            .clone_child(&mut store, "", "f", gen0.id().copy, txn)
            .unwrap();
        f.append_contents(&mut store, b"1", txn).unwrap();
        let r2 = store.commit_txn(txn).unwrap();
        let gen1 = revision_root(&store, r2).unwrap().open(&store, "f").unwrap();

        let txn = store.begin_txn(r2).unwrap();
        let mut root = clone_root(&mut store, txn).unwrap();
        let mut f = root
            .clone_child(&mut store, "", "f", gen1.id().copy, txn)
            .unwrap();
        f.append_contents(&mut store, b"2", txn).unwrap();
        let r3 = store.commit_txn(txn).unwrap();
        let gen2 = revision_root(&store, r3).unwrap().open(&store, "f").unwrap();

        assert!(is_parent(&store, &gen1, &gen2).unwrap());
        assert!(!is_parent(&store, &gen0, &gen2).unwrap());
        assert!(is_ancestor(&store, &gen0, &gen2).unwrap());
    }

    #[test]
    fn finalize_edits_validates_checksum() {
        let (mut store, txn, mut root) = setup();
        let mut f = root.make_file(&mut store, "", "f", txn).unwrap();
        f.append_contents(&mut store, b"hello", txn).unwrap();
        let err = f
            .finalize_edits(&mut store, Some("deadbeef"), txn)
            .unwrap_err();
        assert!(matches!(err, FsError::ChecksumMismatch { .. }));

        let good = sha256_hex(b"hello");
        f.append_contents(&mut store, b"", txn).unwrap();
        f.finalize_edits(&mut store, Some(&good), txn).unwrap();
        assert_eq!(f.get_contents(&store).unwrap(), b"hello");
    }

    #[test]
    fn things_different_compares_rep_keys_only() {
        let (mut store, txn, mut root) = setup();
        let mut a = root.make_file(&mut store, "", "a", txn).unwrap();
        let mut b = root.make_file(&mut store, "", "b", txn).unwrap();
        a.append_contents(&mut store, b"same", txn).unwrap();
        a.finalize_edits(&mut store, None, txn).unwrap();
        b.append_contents(&mut store, b"same", txn).unwrap();
        b.finalize_edits(&mut store, None, txn).unwrap();

        let (props, contents) = things_different(&store, &mut a, &mut b).unwrap();
        assert!(!props);
        assert!(!contents);

        let mut props_map = PropList::new();
        props_map.insert("k".into(), "v".into());
        a.set_proplist(&mut store, props_map, txn).unwrap();
        let (props, _) = things_different(&store, &mut a, &mut b).unwrap();
        assert!(props);
    }
}
