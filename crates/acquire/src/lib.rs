//! Acquisition of content-addressed hash trees from untrusted peers.
//!
//! A node that learns the root hash of a transaction set it does not hold
//! reconstructs the tree by asking peers for the missing nodes, verifying
//! every response against the hash its parent advertised, and assembling
//! the result once nothing reachable is missing.
//!
//! ## Architecture
//!
//! ```text
//! AcquisitionRegistry
//! ├── Deduplicates: one TreeAcquisition per root hash in flight
//! ├── Routes: peer responses via the outstanding-request index
//! ├── Drives: periodic tick (retry, rotation, teardown)
//! └── Delegates to:
//!     ├── TreeAcquisition - per-root state machine (frontier, waiters)
//!     ├── PeerRequestSet  - per-acquisition peer selection/failure state
//!     ├── NodeRequester   - outbound requests (injected)
//!     └── PeerDirectory   - candidate peer membership (injected)
//! ```
//!
//! Each acquisition is a single-consumer state machine: events (start,
//! peer response, timer tick) are applied under the acquisition's own
//! lock and yield the batched requests to send, so network I/O never
//! happens while state is held. Verified nodes land in the shared
//! [`grove_tree::NodeStore`], which later acquisitions consult before
//! touching the network.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod peer_set;
pub mod registry;

pub use acquisition::{AcquireEvent, AcquireState, AcquisitionStats, PeerRequest, TreeAcquisition};
pub use config::AcquireConfig;
pub use error::AcquireError;
pub use peer_set::PeerRequestSet;
pub use registry::{AcquisitionRegistry, NodeRequester, PeerDirectory, RegistryStats};
