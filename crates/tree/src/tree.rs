//! Assembled, completeness-checked trees.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use grove_primitives::Hash;

use crate::node::{NodeId, TreeNode};
use crate::store::NodeStore;

/// A complete content-addressed tree.
///
/// Assembly succeeds only when every node reachable from the root is
/// present in the store, so a `HashTree` is complete by construction and
/// stays complete: nodes are immutable once verified.
///
/// The zero root hash denotes the empty tree.
#[derive(Clone, Debug)]
pub struct HashTree {
    root: Hash,
    nodes: HashMap<Hash, Arc<TreeNode>>,
}

impl HashTree {
    /// Assemble the tree rooted at `root` from already-verified nodes.
    ///
    /// Returns `None` if any reachable node is missing from the store.
    #[must_use]
    pub fn assemble(root: Hash, store: &NodeStore) -> Option<Self> {
        let mut nodes = HashMap::new();

        if root.is_zero() {
            return Some(Self { root, nodes });
        }

        let mut queue = VecDeque::from([root]);
        while let Some(hash) = queue.pop_front() {
            if nodes.contains_key(&hash) {
                continue;
            }

            let node = store.get(&hash)?;
            for (_, child) in node.children() {
                if !nodes.contains_key(&child) {
                    queue.push_back(child);
                }
            }
            let _ = nodes.insert(hash, node);
        }

        Some(Self { root, nodes })
    }

    /// Walk the partial tree under `root` and report every node that is
    /// referenced by a stored parent but absent from the store.
    ///
    /// This is the local-first resolution step: acquisitions seed their
    /// frontier from it, resuming from whatever an earlier (possibly
    /// abandoned) acquisition already verified. Each distinct hash is
    /// reported at most once, under the first position it was seen at.
    #[must_use]
    pub fn missing_from(root: Hash, store: &NodeStore) -> Vec<(NodeId, Hash)> {
        let mut missing = Vec::new();

        if root.is_zero() {
            return missing;
        }

        let mut seen: HashSet<Hash> = HashSet::from([root]);
        let mut queue = VecDeque::from([(NodeId::root(), root)]);

        while let Some((id, hash)) = queue.pop_front() {
            let Some(node) = store.get(&hash) else {
                missing.push((id, hash));
                continue;
            };

            for (branch, child) in node.children() {
                if let Some(child_id) = id.child(branch) {
                    if seen.insert(child) {
                        queue.push_back((child_id, child));
                    }
                }
            }
        }

        missing
    }

    #[must_use]
    pub const fn root_hash(&self) -> Hash {
        self.root
    }

    /// Number of distinct nodes in the tree.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn get(&self, hash: &Hash) -> Option<&TreeNode> {
        self.nodes.get(hash).map(Arc::as_ref)
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    /// Leaf payloads in depth-first branch order.
    ///
    /// Each distinct leaf contributes once, at its first position.
    #[must_use]
    pub fn leaves(&self) -> Vec<&[u8]> {
        let mut leaves = Vec::new();

        if self.root.is_zero() {
            return leaves;
        }

        let mut seen: HashSet<Hash> = HashSet::from([self.root]);
        let mut stack = vec![self.root];

        while let Some(hash) = stack.pop() {
            let Some(node) = self.nodes.get(&hash) else {
                continue;
            };

            if let Some(payload) = node.payload() {
                leaves.push(payload);
                continue;
            }

            // Push in reverse so branch 0 pops first.
            for (_, child) in node.children().into_iter().rev() {
                if seen.insert(child) {
                    stack.push(child);
                }
            }
        }

        leaves
    }
}
