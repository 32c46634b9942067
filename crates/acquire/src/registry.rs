//! Process-wide table of in-flight acquisitions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use grove_primitives::Hash;
use grove_tree::{HashTree, NodeId, NodeStore};
use libp2p_identity::PeerId;
use serde::Serialize;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

use crate::acquisition::{AcquireEvent, PeerRequest, TreeAcquisition};
use crate::config::AcquireConfig;
use crate::error::AcquireError;

/// Outbound request transport.
///
/// Fire-and-forget: no delivery guarantee is assumed, and errors only
/// feed diagnostics. The eventual response (or its absence) is observed
/// through [`AcquisitionRegistry::dispatch`] and the tick-driven
/// timeout.
#[async_trait]
pub trait NodeRequester: Send + Sync {
    async fn request_nodes(
        &self,
        peer: PeerId,
        target: Hash,
        node_ids: Vec<NodeId>,
    ) -> eyre::Result<()>;
}

/// Peer membership source.
///
/// Supplies the candidate peers believed to possibly hold a given tree:
/// peers that announced the root hash, or simply everyone connected when
/// nothing better is known. The registry queries it when an acquisition
/// is created and again when its peer set runs dry.
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn candidate_peers(&self, target: &Hash) -> Vec<PeerId>;
}

/// Point-in-time view of the registry, for diagnostics.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct RegistryStats {
    /// In-flight acquisitions.
    pub in_flight: usize,
    /// Entries in the outstanding-request index.
    pub outstanding_requests: usize,
}

#[derive(Default)]
struct Inner {
    /// One acquisition per root hash in flight.
    acquisitions: HashMap<Hash, Arc<Mutex<TreeAcquisition>>>,

    /// Outstanding-request index: routes `(peer, node_id)` responses to
    /// the acquisition that asked.
    requests: HashMap<(PeerId, NodeId), Hash>,
}

/// Deduplicating front door for tree acquisitions.
///
/// Keyed by target root hash: concurrent `acquire` calls for the same
/// root share one acquisition and one set of network requests. Incoming
/// responses are routed through the outstanding-request index, and a
/// periodic [`tick`](Self::tick) drives retries, peer rotation, and
/// teardown of finished or abandoned acquisitions.
///
/// Lock order is registry table, then acquisition; each acquisition's
/// events serialize through its own lock while distinct acquisitions
/// proceed in parallel.
pub struct AcquisitionRegistry {
    store: NodeStore,
    requester: Arc<dyn NodeRequester>,
    directory: Arc<dyn PeerDirectory>,
    config: AcquireConfig,
    inner: Mutex<Inner>,
}

impl AcquisitionRegistry {
    #[must_use]
    pub fn new(
        store: NodeStore,
        requester: Arc<dyn NodeRequester>,
        directory: Arc<dyn PeerDirectory>,
        config: AcquireConfig,
    ) -> Self {
        Self {
            store,
            requester,
            directory,
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    #[must_use]
    pub const fn store(&self) -> &NodeStore {
        &self.store
    }

    /// Acquire the tree rooted at `target`, joining an in-flight
    /// acquisition if one exists.
    ///
    /// Resolves once the tree is complete and verified, or with the
    /// terminal [`AcquireError`]. Dropping the returned future abandons
    /// only this caller's interest; the acquisition itself is torn down
    /// when no waiters remain.
    pub async fn acquire(&self, target: Hash) -> Result<HashTree, AcquireError> {
        if let Some(tree) = HashTree::assemble(target, &self.store) {
            return Ok(tree);
        }

        let (tx, rx) = oneshot::channel();

        // Join an in-flight acquisition before paying for a directory
        // query.
        let pending = {
            let inner = self.inner.lock().await;
            if let Some(acquisition) = inner.acquisitions.get(&target) {
                acquisition.lock().await.add_waiter(tx);
                None
            } else {
                Some(tx)
            }
        };

        if let Some(tx) = pending {
            let candidates = self.directory.candidate_peers(&target).await;

            let requests = {
                let mut inner = self.inner.lock().await;
                match inner.acquisitions.get(&target) {
                    // Someone else created it while we queried the
                    // directory.
                    Some(acquisition) => {
                        acquisition.lock().await.add_waiter(tx);
                        vec![]
                    }
                    None => {
                        let mut acquisition = TreeAcquisition::new(
                            target,
                            candidates,
                            self.store.clone(),
                            self.config,
                        );
                        acquisition.add_waiter(tx);

                        let requests = acquisition.handle(AcquireEvent::Start);
                        if !acquisition.is_terminal() {
                            let _ = inner
                                .acquisitions
                                .insert(target, Arc::new(Mutex::new(acquisition)));
                            Self::index_requests(&mut inner, &requests);
                        }
                        requests
                    }
                }
            };

            self.submit(requests).await;
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(AcquireError::Abandoned { target }),
        }
    }

    /// Route a peer response to the acquisition that requested it.
    ///
    /// Responses matching no outstanding request (late, duplicate, or
    /// unsolicited) are logged and dropped; they are never an error.
    pub async fn dispatch(&self, peer: PeerId, nodes: Vec<(NodeId, Vec<u8>)>) {
        let acquisition = {
            let mut inner = self.inner.lock().await;

            let target = nodes
                .iter()
                .find_map(|(node_id, _)| inner.requests.get(&(peer, *node_id)).copied());
            let Some(target) = target else {
                debug!(
                    %peer,
                    count = nodes.len(),
                    "ignoring response matching no outstanding request"
                );
                return;
            };

            for (node_id, _) in &nodes {
                if inner.requests.get(&(peer, *node_id)) == Some(&target) {
                    let _ = inner.requests.remove(&(peer, *node_id));
                }
            }

            let Some(acquisition) = inner.acquisitions.get(&target).cloned() else {
                debug!(%peer, %target, "ignoring response for finished acquisition");
                return;
            };
            acquisition
        };

        let requests = {
            let mut acquisition = acquisition.lock().await;
            acquisition.handle(AcquireEvent::Response { peer, nodes })
        };

        self.record_and_submit(requests).await;
    }

    /// Advance every in-flight acquisition: rotate stale requests,
    /// replenish starved peer sets, and remove acquisitions that are
    /// terminal or have no waiters left.
    ///
    /// Driven by an external scheduler at a fixed interval; this is the
    /// only retry trigger besides response ingestion itself.
    pub async fn tick(&self) {
        let snapshot: Vec<(Hash, Arc<Mutex<TreeAcquisition>>)> = {
            let inner = self.inner.lock().await;
            inner
                .acquisitions
                .iter()
                .map(|(target, acquisition)| (*target, acquisition.clone()))
                .collect()
        };

        let mut outgoing = Vec::new();
        let mut finished = Vec::new();

        for (target, acquisition) in snapshot {
            let needs_peers = acquisition.lock().await.needs_peers();
            if needs_peers {
                let alternates = self.directory.candidate_peers(&target).await;
                let _ = acquisition.lock().await.add_peers(alternates);
            }

            let mut guard = acquisition.lock().await;
            let requests = guard.handle(AcquireEvent::Tick);
            if guard.is_terminal() || !guard.has_waiters() {
                // Requests from an acquisition being swept would only
                // orphan index entries.
                finished.push(target);
            } else {
                outgoing.extend(requests);
            }
        }

        if !finished.is_empty() {
            let mut inner = self.inner.lock().await;
            for target in finished {
                let Some(acquisition) = inner.acquisitions.get(&target).cloned() else {
                    continue;
                };

                // Re-check under both locks: a waiter may have joined
                // since the tick pass.
                let guard = acquisition.lock().await;
                if guard.is_terminal() || !guard.has_waiters() {
                    debug!(%target, state = ?guard.state(), "removing acquisition");
                    let _ = inner.acquisitions.remove(&target);
                    inner.requests.retain(|_, owner| *owner != target);
                }
            }
        }

        self.record_and_submit(outgoing).await;
    }

    #[must_use = "registry stats are a snapshot"]
    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        RegistryStats {
            in_flight: inner.acquisitions.len(),
            outstanding_requests: inner.requests.len(),
        }
    }

    fn index_requests(inner: &mut Inner, requests: &[PeerRequest]) {
        for request in requests {
            for node_id in &request.node_ids {
                let _ = inner
                    .requests
                    .insert((request.peer, *node_id), request.target);
            }
        }
    }

    async fn record_and_submit(&self, requests: Vec<PeerRequest>) {
        if requests.is_empty() {
            return;
        }

        {
            let mut inner = self.inner.lock().await;
            Self::index_requests(&mut inner, &requests);
        }

        self.submit(requests).await;
    }

    async fn submit(&self, requests: Vec<PeerRequest>) {
        for PeerRequest {
            peer,
            target,
            node_ids,
        } in requests
        {
            let count = node_ids.len();
            if let Err(err) = self.requester.request_nodes(peer, target, node_ids).await {
                warn!(%peer, %target, count, error = %err, "failed to send node request");
            }
        }
    }
}

impl fmt::Debug for AcquisitionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AcquisitionRegistry")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
