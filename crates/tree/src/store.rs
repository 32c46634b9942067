//! Shared cache of verified nodes.

use std::collections::HashMap;
use std::sync::Arc;

use grove_primitives::Hash;
use parking_lot::RwLock;

use crate::node::TreeNode;

/// Append-only store mapping content hash to verified node.
///
/// Shared across every in-flight acquisition: concurrent readers, and
/// insert-if-absent writers. Content under a hash is never replaced;
/// callers must verify a node against its hash before inserting it, so a
/// hash can only ever map to one value. A `get` miss means "not yet
/// acquired", never an error.
#[derive(Clone, Debug, Default)]
pub struct NodeStore {
    inner: Arc<RwLock<HashMap<Hash, Arc<TreeNode>>>>,
}

impl NodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, hash: &Hash) -> Option<Arc<TreeNode>> {
        self.inner.read().get(hash).cloned()
    }

    #[must_use]
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().contains_key(hash)
    }

    /// Insert a verified node under its content hash.
    ///
    /// Returns `true` if the node was newly inserted, `false` if the hash
    /// was already present (re-insertion is a no-op).
    pub fn put(&self, hash: Hash, node: TreeNode) -> bool {
        let mut inner = self.inner.write();
        match inner.entry(hash) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                let _ = entry.insert(Arc::new(node));
                true
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
