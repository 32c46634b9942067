//! Content-addressed hash trees.
//!
//! This crate provides the tree-shaped data model for transaction set
//! acquisition, independent of any network or peer machinery:
//!
//! - **`NodeId`**: the positional address of a node (depth + branch path),
//!   distinct from its content hash
//! - **`TreeNode`**: an interior node (child hashes by branch) or a leaf
//!   (opaque payload bytes), with deterministic content hashing
//! - **`verify_node`**: decode untrusted bytes and check them against the
//!   hash a parent advertised
//! - **`NodeStore`**: the shared, append-only cache of verified nodes
//! - **`HashTree`**: a fully assembled, completeness-checked tree

pub mod node;
pub mod store;
pub mod tree;

pub use node::{verify_node, NodeId, TreeNode, VerifyError, BRANCH_FACTOR, MAX_DEPTH};
pub use store::NodeStore;
pub use tree::HashTree;
