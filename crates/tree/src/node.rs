//! Tree node addressing, serialization, and verification.

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};
use grove_primitives::Hash;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of child slots in an interior node (one per 4-bit branch index).
pub const BRANCH_FACTOR: usize = 16;

/// Maximum tree depth: one nibble of the 256-bit path per level.
pub const MAX_DEPTH: u8 = 64;

/// Maximum serialized size of a single node.
///
/// Bounds what a peer response can make us decode. Anything larger is
/// rejected as malformed before deserialization is attempted.
pub const MAX_NODE_BYTES: usize = 256 * 1024;

/// Positional address of a node within a tree.
///
/// A `(depth, path)` pair: `path` holds one 4-bit branch index per level,
/// and only the first `depth` nibbles are significant. Two nodes at the
/// same position in different versions of a tree share a `NodeId` but not
/// (necessarily) a content hash.
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct NodeId {
    depth: u8,
    path: [u8; 32],
}

impl NodeId {
    /// The address of the root node.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            depth: 0,
            path: [0; 32],
        }
    }

    #[must_use]
    pub const fn depth(&self) -> u8 {
        self.depth
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.depth == 0
    }

    /// The address of this node's child under `branch`.
    ///
    /// Returns `None` at [`MAX_DEPTH`]; a node that deep advertising
    /// children is violating the protocol.
    ///
    /// # Panics
    ///
    /// Panics if `branch >= BRANCH_FACTOR`. Branch indices come from
    /// iterating a node's child slots, so this is unreachable for
    /// verified nodes.
    #[must_use]
    pub fn child(&self, branch: u8) -> Option<Self> {
        assert!(
            usize::from(branch) < BRANCH_FACTOR,
            "branch index out of range"
        );

        if self.depth >= MAX_DEPTH {
            return None;
        }

        let mut path = self.path;
        let byte = usize::from(self.depth / 2);
        if self.depth % 2 == 0 {
            path[byte] = (branch << 4) | (path[byte] & 0x0f);
        } else {
            path[byte] = (path[byte] & 0xf0) | branch;
        }

        Some(Self {
            depth: self.depth + 1,
            path,
        })
    }

    fn nibble(&self, level: u8) -> u8 {
        let byte = self.path[usize::from(level / 2)];
        if level % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@", self.depth)?;
        for level in 0..self.depth {
            write!(f, "{:x}", self.nibble(level))?;
        }
        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({self})")
    }
}

/// A single node of a content-addressed tree.
///
/// The wire form is borsh; the content hash is computed over a
/// domain-separated serialization so a leaf can never collide with an
/// interior node.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TreeNode {
    /// Interior node: one slot per branch, `None` marks an empty subtree.
    Inner {
        children: [Option<Hash>; BRANCH_FACTOR],
    },

    /// Leaf node: an opaque serialized transaction.
    Leaf { payload: Vec<u8> },
}

impl TreeNode {
    /// Build a leaf over opaque payload bytes.
    #[must_use]
    pub const fn leaf(payload: Vec<u8>) -> Self {
        Self::Leaf { payload }
    }

    /// Build an interior node with no children.
    #[must_use]
    pub const fn empty_inner() -> Self {
        Self::Inner {
            children: [None; BRANCH_FACTOR],
        }
    }

    /// Set the child hash under `branch`, returning the updated node.
    ///
    /// # Panics
    ///
    /// Panics if `branch >= BRANCH_FACTOR` or if called on a leaf.
    #[must_use]
    pub fn with_child(mut self, branch: u8, hash: Hash) -> Self {
        match &mut self {
            Self::Inner { children } => {
                children[usize::from(branch)] = Some(hash);
                self
            }
            Self::Leaf { .. } => panic!("leaf nodes have no children"),
        }
    }

    #[must_use]
    pub const fn is_inner(&self) -> bool {
        matches!(self, Self::Inner { .. })
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }

    /// The leaf payload, if this is a leaf.
    #[must_use]
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Leaf { payload } => Some(payload),
            Self::Inner { .. } => None,
        }
    }

    /// Present children as `(branch, hash)` pairs, in branch order.
    #[must_use]
    pub fn children(&self) -> Vec<(u8, Hash)> {
        match self {
            Self::Inner { children } => children
                .iter()
                .enumerate()
                .filter_map(|(branch, child)| child.map(|hash| (branch as u8, hash)))
                .collect(),
            Self::Leaf { .. } => vec![],
        }
    }

    /// Compute the content hash of this node.
    ///
    /// Leaf: `H("leaf" || payload)`. Interior: `H("node" || slot * 16)`
    /// where an empty slot contributes the zero hash.
    #[must_use]
    pub fn content_hash(&self) -> Hash {
        let mut hasher = Sha256::new();

        match self {
            Self::Leaf { payload } => {
                hasher.update(b"leaf");
                hasher.update(payload);
            }
            Self::Inner { children } => {
                hasher.update(b"node");
                for child in children {
                    hasher.update(child.unwrap_or_else(Hash::zero).as_bytes());
                }
            }
        }

        let bytes: [u8; 32] = hasher.finalize().into();
        bytes.into()
    }

    /// Serialize to the wire form.
    pub fn encode(&self) -> std::io::Result<Vec<u8>> {
        borsh::to_vec(self)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    #[error("undecodable node bytes")]
    Malformed(#[from] std::io::Error),

    #[error("node exceeds size limit ({len} bytes)")]
    Oversized { len: usize },

    #[error("degenerate node (empty leaf or childless interior)")]
    Degenerate,

    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: Hash, actual: Hash },
}

/// Decode untrusted bytes and check them against the advertised hash.
///
/// This is the only path by which peer-supplied bytes become a
/// [`TreeNode`]: decode failures and hash mismatches are both protocol
/// violations by the responding peer, handled identically by the caller's
/// retry accounting.
pub fn verify_node(expected: &Hash, bytes: &[u8]) -> Result<TreeNode, VerifyError> {
    if bytes.len() > MAX_NODE_BYTES {
        return Err(VerifyError::Oversized { len: bytes.len() });
    }

    let node = TreeNode::try_from_slice(bytes)?;

    let degenerate = match &node {
        TreeNode::Leaf { payload } => payload.is_empty(),
        TreeNode::Inner { children } => children.iter().all(Option::is_none),
    };
    if degenerate {
        return Err(VerifyError::Degenerate);
    }

    let actual = node.content_hash();
    if actual != *expected {
        return Err(VerifyError::HashMismatch {
            expected: *expected,
            actual,
        });
    }

    Ok(node)
}
