//! Per-root acquisition state machine.

use std::collections::HashMap;
use std::fmt;

use grove_primitives::Hash;
use grove_tree::{verify_node, HashTree, NodeId, NodeStore, TreeNode, MAX_DEPTH};
use libp2p_identity::PeerId;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AcquireConfig;
use crate::error::AcquireError;
use crate::peer_set::PeerRequestSet;

/// Lifecycle of an acquisition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AcquireState {
    /// The root node has not been verified yet.
    Empty,
    /// Root verified; descendants still missing.
    PartialRoot,
    /// Every reachable node verified. Terminal.
    Complete,
    /// Retry budget or deadline exhausted. Terminal.
    Failed,
}

/// An event consumed by [`TreeAcquisition::handle`].
#[derive(Debug)]
pub enum AcquireEvent {
    /// Consult the local store, then issue the initial requests.
    Start,

    /// A batch of `(node_id, bytes)` pairs from one peer.
    Response {
        peer: PeerId,
        nodes: Vec<(NodeId, Vec<u8>)>,
    },

    /// Periodic retry/rotation tick.
    Tick,
}

/// A batched outbound node request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerRequest {
    pub peer: PeerId,
    pub target: Hash,
    pub node_ids: Vec<NodeId>,
}

/// Completion channel handed to [`TreeAcquisition::add_waiter`].
pub type Waiter = oneshot::Sender<Result<HashTree, AcquireError>>;

#[derive(Debug)]
struct FrontierEntry {
    expected: Hash,
    outstanding: Option<(PeerId, Instant)>,
}

/// Point-in-time view of one acquisition, for diagnostics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct AcquisitionStats {
    pub state: AcquireState,
    pub frontier: usize,
    pub failed_attempts: u32,
    pub peers: usize,
    pub waiters: usize,
}

/// One in-flight tree reconstruction.
///
/// A single-consumer state machine: the registry serializes events
/// (start, peer responses, timer ticks) through [`Self::handle`], which
/// mutates the frontier/peer bookkeeping and returns the batched
/// requests to put on the wire. No network I/O happens in here.
///
/// The frontier maps each known-missing position to the content hash its
/// verified parent advertised, which is what peer responses are checked
/// against: nothing unverifiable is ever accepted, and nothing is stored
/// before it verifies.
#[derive(Debug)]
pub struct TreeAcquisition {
    target: Hash,
    state: AcquireState,
    have_root: bool,
    frontier: HashMap<NodeId, FrontierEntry>,
    peers: PeerRequestSet,
    waiters: Vec<Waiter>,
    failed_attempts: u32,
    failure: Option<AcquireError>,
    deadline: Instant,
    store: NodeStore,
    config: AcquireConfig,
}

impl TreeAcquisition {
    #[must_use]
    pub fn new(
        target: Hash,
        candidates: Vec<PeerId>,
        store: NodeStore,
        config: AcquireConfig,
    ) -> Self {
        Self {
            target,
            state: AcquireState::Empty,
            have_root: false,
            frontier: HashMap::new(),
            peers: PeerRequestSet::new(candidates, config.max_peer_failures),
            waiters: Vec::new(),
            failed_attempts: 0,
            failure: None,
            deadline: Instant::now() + config.overall_timeout,
            store,
            config,
        }
    }

    #[must_use]
    pub const fn target(&self) -> Hash {
        self.target
    }

    #[must_use]
    pub const fn state(&self) -> AcquireState {
        self.state
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.state, AcquireState::Complete | AcquireState::Failed)
    }

    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// True when the frontier is non-empty but every known peer has hit
    /// the failure threshold, so only alternates can make progress.
    #[must_use]
    pub fn needs_peers(&self) -> bool {
        !self.is_terminal() && !self.frontier.is_empty() && self.peers.is_exhausted()
    }

    /// Merge alternate candidates into the peer set.
    pub fn add_peers(&mut self, candidates: impl IntoIterator<Item = PeerId>) -> usize {
        self.peers.add_peers(candidates)
    }

    /// Register a completion channel.
    ///
    /// On an already-terminal acquisition the result is delivered
    /// immediately.
    pub fn add_waiter(&mut self, waiter: Waiter) {
        match self.state {
            AcquireState::Complete => {
                let result = HashTree::assemble(self.target, &self.store)
                    .ok_or(AcquireError::Abandoned {
                        target: self.target,
                    });
                let _ = waiter.send(result);
            }
            AcquireState::Failed => {
                let error = self.failure.unwrap_or(AcquireError::Abandoned {
                    target: self.target,
                });
                let _ = waiter.send(Err(error));
            }
            AcquireState::Empty | AcquireState::PartialRoot => self.waiters.push(waiter),
        }
    }

    #[must_use]
    pub fn stats(&self) -> AcquisitionStats {
        AcquisitionStats {
            state: self.state,
            frontier: self.frontier.len(),
            failed_attempts: self.failed_attempts,
            peers: self.peers.len(),
            waiters: self.waiters.len(),
        }
    }

    /// Apply one event and return the requests to send.
    pub fn handle(&mut self, event: AcquireEvent) -> Vec<PeerRequest> {
        if self.is_terminal() {
            return vec![];
        }

        match event {
            AcquireEvent::Start => self.on_start(),
            AcquireEvent::Response { peer, nodes } => self.on_response(peer, nodes),
            AcquireEvent::Tick => self.on_tick(),
        }
    }

    fn on_start(&mut self) -> Vec<PeerRequest> {
        // Local-first: anything a previous acquisition already verified
        // is reused; only the genuinely missing positions go on the wire.
        self.have_root = self.store.contains(&self.target);
        let missing = HashTree::missing_from(self.target, &self.store);

        if missing.is_empty() {
            let _ = self.check_complete();
            return vec![];
        }

        if self.have_root {
            self.state = AcquireState::PartialRoot;
        }

        for (id, hash) in missing {
            let _ = self.frontier.insert(
                id,
                FrontierEntry {
                    expected: hash,
                    outstanding: None,
                },
            );
        }

        debug!(
            target = %self.target,
            missing = self.frontier.len(),
            have_root = self.have_root,
            "starting tree acquisition"
        );

        self.trigger()
    }

    fn on_response(&mut self, peer: PeerId, nodes: Vec<(NodeId, Vec<u8>)>) -> Vec<PeerRequest> {
        self.peers.record_response(&peer);

        for (node_id, bytes) in nodes {
            if self.is_terminal() {
                break;
            }

            let Some(entry) = self.frontier.get(&node_id) else {
                debug!(
                    target = %self.target,
                    %peer,
                    %node_id,
                    "discarding response for a node no longer missing"
                );
                continue;
            };
            let expected = entry.expected;

            match verify_node(&expected, &bytes) {
                Err(err) => self.record_failure(&peer, &node_id, &err),
                Ok(node) => {
                    if node.is_inner() && node_id.depth() >= MAX_DEPTH {
                        self.record_failure(&peer, &node_id, &"interior node at maximum depth");
                        continue;
                    }
                    self.accept(node_id, expected, &node);
                }
            }
        }

        if self.is_terminal() || self.check_complete() {
            return vec![];
        }

        // Follow up on newly discovered children without waiting for the
        // next tick.
        self.trigger()
    }

    fn on_tick(&mut self) -> Vec<PeerRequest> {
        let now = Instant::now();

        self.waiters.retain(|waiter| !waiter.is_closed());

        if now >= self.deadline {
            self.fail(AcquireError::DeadlineExceeded {
                target: self.target,
            });
            return vec![];
        }

        // Rotate peers whose requests went stale. One attempt is charged
        // per stale peer, not per node id, since a batch was one request.
        let mut stale_peers: Vec<PeerId> = Vec::new();
        for entry in self.frontier.values_mut() {
            if let Some((peer, since)) = entry.outstanding {
                if now.duration_since(since) >= self.config.request_timeout {
                    entry.outstanding = None;
                    if !stale_peers.contains(&peer) {
                        stale_peers.push(peer);
                    }
                }
            }
        }

        for peer in stale_peers {
            debug!(target = %self.target, %peer, "node request timed out, rotating peer");
            self.peers.mark_failed(&peer);
            self.note_failed_attempt();
            if self.is_terminal() {
                return vec![];
            }
        }

        if !self.frontier.is_empty()
            && !self.peers.has_outstanding()
            && self.peers.choose_peer().is_none()
        {
            // No eligible peer at all. Transient from the caller's point
            // of view, but it consumes budget so an acquisition whose
            // entire peer set went bad still terminates.
            debug!(target = %self.target, "no eligible peer for missing nodes");
            self.note_failed_attempt();
            if self.is_terminal() {
                return vec![];
            }
        }

        self.trigger()
    }

    /// Verify-and-store a node, then expand the frontier with its
    /// unresolved children.
    fn accept(&mut self, node_id: NodeId, hash: Hash, node: &TreeNode) {
        let _ = self.store.put(hash, node.clone());

        // Every position expecting this hash is now satisfied, not just
        // the one the response named.
        self.frontier.retain(|_, entry| entry.expected != hash);

        if node_id.is_root() {
            self.have_root = true;
            self.state = AcquireState::PartialRoot;
            debug!(target = %self.target, "verified root node");
        }

        for (branch, child) in node.children() {
            if self.store.contains(&child) {
                continue;
            }
            let Some(child_id) = node_id.child(branch) else {
                continue;
            };
            let _ = self.frontier.entry(child_id).or_insert(FrontierEntry {
                expected: child,
                outstanding: None,
            });
        }
    }

    fn record_failure(&mut self, peer: &PeerId, node_id: &NodeId, reason: &dyn fmt::Display) {
        warn!(
            target = %self.target,
            %peer,
            %node_id,
            %reason,
            "rejecting node response"
        );

        if let Some(entry) = self.frontier.get_mut(node_id) {
            if matches!(entry.outstanding, Some((holder, _)) if holder == *peer) {
                entry.outstanding = None;
            }
        }

        self.peers.mark_failed(peer);
        self.note_failed_attempt();
    }

    fn note_failed_attempt(&mut self) {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.config.retry_budget {
            self.fail(AcquireError::RetryExhausted {
                target: self.target,
            });
        }
    }

    /// Check for completion; the frontier is already up to date when
    /// this runs, so it cannot report complete while a child is still
    /// being expanded.
    fn check_complete(&mut self) -> bool {
        if !self.frontier.is_empty() || !(self.have_root || self.target.is_zero()) {
            return false;
        }

        match HashTree::assemble(self.target, &self.store) {
            Some(tree) => {
                self.complete_with(tree);
                true
            }
            None => {
                // The store is append-only, so assembly can only miss if
                // the frontier lost track of a reachable node; reseed.
                warn!(target = %self.target, "frontier drained with nodes still missing, reseeding");
                for (id, hash) in HashTree::missing_from(self.target, &self.store) {
                    let _ = self.frontier.insert(
                        id,
                        FrontierEntry {
                            expected: hash,
                            outstanding: None,
                        },
                    );
                }
                false
            }
        }
    }

    fn complete_with(&mut self, tree: HashTree) {
        info!(
            target = %self.target,
            nodes = tree.len(),
            "tree acquisition complete"
        );

        self.state = AcquireState::Complete;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(tree.clone()));
        }
    }

    fn fail(&mut self, error: AcquireError) {
        warn!(target = %self.target, %error, "tree acquisition failed");

        self.state = AcquireState::Failed;
        self.failure = Some(error);
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(error));
        }
    }

    /// Assign every unrequested frontier entry to a chosen peer, in
    /// shallow-first order, coalescing up to `max_batch` ids per peer.
    fn trigger(&mut self) -> Vec<PeerRequest> {
        let mut unassigned: Vec<NodeId> = self
            .frontier
            .iter()
            .filter(|(_, entry)| entry.outstanding.is_none())
            .map(|(id, _)| *id)
            .collect();
        unassigned.sort_unstable();

        let now = Instant::now();
        let mut requests = Vec::new();
        let mut remaining = unassigned.as_slice();

        while !remaining.is_empty() {
            let Some(peer) = self.peers.choose_peer() else {
                break;
            };

            let take = remaining.len().min(self.config.max_batch);
            let (batch, rest) = remaining.split_at(take);
            remaining = rest;

            for id in batch {
                if let Some(entry) = self.frontier.get_mut(id) {
                    entry.outstanding = Some((peer, now));
                }
            }
            self.peers.mark_requested(&peer, now);

            debug!(
                target = %self.target,
                %peer,
                count = batch.len(),
                "requesting tree nodes"
            );

            requests.push(PeerRequest {
                peer,
                target: self.target,
                node_ids: batch.to_vec(),
            });
        }

        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grove_tree::TreeNode;

    fn config() -> AcquireConfig {
        AcquireConfig::default()
    }

    fn store_with(nodes: &[&TreeNode]) -> NodeStore {
        let store = NodeStore::new();
        for node in nodes {
            let _ = store.put(node.content_hash(), (*node).clone());
        }
        store
    }

    /// Root with leaves under branches 2 and 7.
    fn two_leaf_nodes() -> (TreeNode, TreeNode, TreeNode) {
        let a = TreeNode::leaf(b"tx-a".to_vec());
        let b = TreeNode::leaf(b"tx-b".to_vec());
        let root = TreeNode::empty_inner()
            .with_child(2, a.content_hash())
            .with_child(7, b.content_hash());
        (root, a, b)
    }

    fn respond(node_id: NodeId, node: &TreeNode) -> (NodeId, Vec<u8>) {
        (node_id, node.encode().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_completes_from_local_store() {
        let (root, a, b) = two_leaf_nodes();
        let store = store_with(&[&root, &a, &b]);
        let target = root.content_hash();

        let mut acq = TreeAcquisition::new(target, vec![PeerId::random()], store, config());
        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);

        let requests = acq.handle(AcquireEvent::Start);

        assert!(requests.is_empty(), "nothing should hit the network");
        assert_eq!(acq.state(), AcquireState::Complete);
        assert_eq!(rx.try_recv().unwrap().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requests_root() {
        let target = Hash::new(b"unknown tree");
        let peer = PeerId::random();
        let mut acq = TreeAcquisition::new(target, vec![peer], NodeStore::new(), config());

        let requests = acq.handle(AcquireEvent::Start);

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].peer, peer);
        assert_eq!(requests[0].target, target);
        assert_eq!(requests[0].node_ids, vec![NodeId::root()]);
        assert_eq!(acq.state(), AcquireState::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_target_completes_immediately() {
        let mut acq =
            TreeAcquisition::new(Hash::zero(), vec![PeerId::random()], NodeStore::new(), config());
        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);

        let requests = acq.handle(AcquireEvent::Start);

        assert!(requests.is_empty());
        assert_eq!(acq.state(), AcquireState::Complete);
        assert!(rx.try_recv().unwrap().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_response_expands_frontier() {
        let (root, _a, _b) = two_leaf_nodes();
        let target = root.content_hash();
        let peers: Vec<_> = (0..2).map(|_| PeerId::random()).collect();

        let mut acq = TreeAcquisition::new(target, peers, NodeStore::new(), config());
        let initial = acq.handle(AcquireEvent::Start);
        let root_peer = initial[0].peer;

        let follow_up = acq.handle(AcquireEvent::Response {
            peer: root_peer,
            nodes: vec![respond(NodeId::root(), &root)],
        });

        assert_eq!(acq.state(), AcquireState::PartialRoot);
        assert_eq!(acq.stats().frontier, 2);

        let requested: Vec<NodeId> = follow_up
            .iter()
            .flat_map(|request| request.node_ids.clone())
            .collect();
        let root_id = NodeId::root();
        assert!(requested.contains(&root_id.child(2).unwrap()));
        assert!(requested.contains(&root_id.child(7).unwrap()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_leaf_tree_completes() {
        let leaf = TreeNode::leaf(b"only tx".to_vec());
        let target = leaf.content_hash();
        let peer = PeerId::random();

        let mut acq = TreeAcquisition::new(target, vec![peer], NodeStore::new(), config());
        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);

        let _ = acq.handle(AcquireEvent::Start);
        let requests = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &leaf)],
        });

        assert!(requests.is_empty());
        assert_eq!(acq.state(), AcquireState::Complete);

        let tree = rx.try_recv().unwrap().unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.leaves(), vec![b"only tx".as_slice()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_response_rotates_to_other_peer() {
        let target = Hash::new(b"some tree");
        let peers: Vec<_> = (0..2).map(|_| PeerId::random()).collect();

        let mut acq = TreeAcquisition::new(target, peers, NodeStore::new(), config());
        let initial = acq.handle(AcquireEvent::Start);
        let bad_peer = initial[0].peer;

        let retries = acq.handle(AcquireEvent::Response {
            peer: bad_peer,
            nodes: vec![(NodeId::root(), b"garbage".to_vec())],
        });

        assert_eq!(retries.len(), 1);
        assert_ne!(retries[0].peer, bad_peer);
        assert_eq!(retries[0].node_ids, vec![NodeId::root()]);
        assert!(!acq.is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_payload_is_never_stored() {
        let leaf = TreeNode::leaf(b"real".to_vec());
        let target = leaf.content_hash();
        let peer = PeerId::random();
        let store = NodeStore::new();

        let mut acq = TreeAcquisition::new(target, vec![peer], store.clone(), config());
        let _ = acq.handle(AcquireEvent::Start);

        let forged = TreeNode::leaf(b"forged".to_vec());
        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &forged)],
        });

        assert!(store.is_empty());
        assert!(!acq.is_terminal());

        // A correct response afterwards still completes.
        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &leaf)],
        });
        assert_eq!(acq.state(), AcquireState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_response_is_noop() {
        let leaf = TreeNode::leaf(b"tx".to_vec());
        let target = leaf.content_hash();
        let peer = PeerId::random();
        let store = NodeStore::new();

        let mut acq = TreeAcquisition::new(target, vec![peer], store.clone(), config());
        let _ = acq.handle(AcquireEvent::Start);

        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &leaf)],
        });
        assert_eq!(acq.state(), AcquireState::Complete);
        assert_eq!(store.len(), 1);

        let requests = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &leaf)],
        });
        assert!(requests.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrequested_but_needed_node_is_accepted() {
        let (root, a, b) = two_leaf_nodes();
        let target = root.content_hash();
        let peers: Vec<_> = (0..2).map(|_| PeerId::random()).collect();

        let mut acq = TreeAcquisition::new(target, peers.clone(), NodeStore::new(), config());
        let initial = acq.handle(AcquireEvent::Start);
        let asked = initial[0].peer;
        let other = peers.iter().copied().find(|peer| *peer != asked).unwrap();

        // A peer we never asked proactively supplies the whole tree.
        let _ = acq.handle(AcquireEvent::Response {
            peer: other,
            nodes: vec![respond(NodeId::root(), &root)],
        });
        let root_id = NodeId::root();
        let _ = acq.handle(AcquireEvent::Response {
            peer: other,
            nodes: vec![
                respond(root_id.child(2).unwrap(), &a),
                respond(root_id.child(7).unwrap(), &b),
            ],
        });

        assert_eq!(acq.state(), AcquireState::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_bounds_bad_responses() {
        let target = Hash::new(b"hostile tree");
        let peer = PeerId::random();
        let cfg = AcquireConfig {
            retry_budget: 3,
            max_peer_failures: 10,
            ..config()
        };

        let mut acq = TreeAcquisition::new(target, vec![peer], NodeStore::new(), cfg);
        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);
        let _ = acq.handle(AcquireEvent::Start);

        for attempt in 1..=2 {
            let _ = acq.handle(AcquireEvent::Response {
                peer,
                nodes: vec![(NodeId::root(), b"junk".to_vec())],
            });
            assert!(!acq.is_terminal(), "still retrying after attempt {attempt}");
        }

        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![(NodeId::root(), b"junk".to_vec())],
        });

        assert_eq!(acq.state(), AcquireState::Failed);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            AcquireError::RetryExhausted { target }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_rotates_stale_request() {
        let target = Hash::new(b"slow tree");
        let peers: Vec<_> = (0..2).map(|_| PeerId::random()).collect();
        let cfg = config();

        let mut acq = TreeAcquisition::new(target, peers, NodeStore::new(), cfg);
        let initial = acq.handle(AcquireEvent::Start);
        let slow_peer = initial[0].peer;

        tokio::time::advance(cfg.request_timeout + tokio::time::Duration::from_millis(1)).await;

        let retries = acq.handle(AcquireEvent::Tick);
        assert_eq!(retries.len(), 1);
        assert_ne!(retries[0].peer, slow_peer);
        assert_eq!(retries[0].node_ids, vec![NodeId::root()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_request_survives_tick() {
        let target = Hash::new(b"tree");
        let mut acq =
            TreeAcquisition::new(target, vec![PeerId::random()], NodeStore::new(), config());
        let _ = acq.handle(AcquireEvent::Start);

        let requests = acq.handle(AcquireEvent::Tick);
        assert!(requests.is_empty(), "in-flight request is not stale yet");
        assert_eq!(acq.stats().failed_attempts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fails_acquisition() {
        let target = Hash::new(b"tree");
        let cfg = config();
        let mut acq = TreeAcquisition::new(target, vec![PeerId::random()], NodeStore::new(), cfg);
        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);
        let _ = acq.handle(AcquireEvent::Start);

        tokio::time::advance(cfg.overall_timeout + tokio::time::Duration::from_secs(1)).await;
        let requests = acq.handle(AcquireEvent::Tick);

        assert!(requests.is_empty());
        assert_eq!(acq.state(), AcquireState::Failed);
        assert_eq!(
            rx.try_recv().unwrap().unwrap_err(),
            AcquireError::DeadlineExceeded { target }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_starved_ticks_consume_budget() {
        let target = Hash::new(b"tree nobody has");
        let cfg = AcquireConfig {
            retry_budget: 2,
            max_peer_failures: 1,
            ..config()
        };
        let peer = PeerId::random();

        let mut acq = TreeAcquisition::new(target, vec![peer], NodeStore::new(), cfg);
        let _ = acq.handle(AcquireEvent::Start);

        // Burn the only peer.
        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![(NodeId::root(), b"junk".to_vec())],
        });
        assert!(acq.needs_peers());

        let _ = acq.handle(AcquireEvent::Tick);
        assert_eq!(acq.state(), AcquireState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_waiter_gets_result_immediately() {
        let leaf = TreeNode::leaf(b"tx".to_vec());
        let target = leaf.content_hash();
        let peer = PeerId::random();

        let mut acq = TreeAcquisition::new(target, vec![peer], NodeStore::new(), config());
        let _ = acq.handle(AcquireEvent::Start);
        let _ = acq.handle(AcquireEvent::Response {
            peer,
            nodes: vec![respond(NodeId::root(), &leaf)],
        });
        assert_eq!(acq.state(), AcquireState::Complete);

        let (tx, mut rx) = oneshot::channel();
        acq.add_waiter(tx);
        assert_eq!(rx.try_recv().unwrap().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_waiters_are_pruned() {
        let target = Hash::new(b"tree");
        let mut acq =
            TreeAcquisition::new(target, vec![PeerId::random()], NodeStore::new(), config());
        let _ = acq.handle(AcquireEvent::Start);

        let (tx, rx) = oneshot::channel();
        acq.add_waiter(tx);
        assert!(acq.has_waiters());

        drop(rx);
        let _ = acq.handle(AcquireEvent::Tick);
        assert!(!acq.has_waiters());
    }
}
