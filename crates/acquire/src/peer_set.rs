//! Per-acquisition peer bookkeeping and selection.

use libp2p_identity::PeerId;
use rand::seq::SliceRandom;
use tokio::time::Instant;
use tracing::debug;

#[derive(Clone, Debug)]
struct PeerEntry {
    peer: PeerId,
    outstanding: bool,
    failures: u32,
    last_asked: Option<Instant>,
}

impl PeerEntry {
    const fn new(peer: PeerId) -> Self {
        Self {
            peer,
            outstanding: false,
            failures: 0,
            last_asked: None,
        }
    }
}

/// The peers believed to possibly hold one acquisition's data.
///
/// Tracks, per peer: an outstanding-request flag and a failure count.
/// Failure counts are scoped to this acquisition only; a peer that lacks
/// one particular subtree is not penalized for any other acquisition.
/// Candidate order is shuffled on construction so load spreads across
/// the mesh.
#[derive(Clone, Debug)]
pub struct PeerRequestSet {
    entries: Vec<PeerEntry>,
    max_failures: u32,
}

impl PeerRequestSet {
    #[must_use]
    pub fn new(mut candidates: Vec<PeerId>, max_failures: u32) -> Self {
        candidates.sort_unstable();
        candidates.dedup();
        candidates.shuffle(&mut rand::thread_rng());

        Self {
            entries: candidates.into_iter().map(PeerEntry::new).collect(),
            max_failures,
        }
    }

    /// Merge replacement candidates, keeping state for peers already
    /// known. Returns how many peers were actually new.
    pub fn add_peers(&mut self, candidates: impl IntoIterator<Item = PeerId>) -> usize {
        let mut added = 0;
        for peer in candidates {
            if self.entries.iter().any(|entry| entry.peer == peer) {
                continue;
            }
            self.entries.push(PeerEntry::new(peer));
            added += 1;
        }

        if added > 0 {
            debug!(added, total = self.entries.len(), "added alternate peers");
        }
        added
    }

    /// Pick the next peer to query.
    ///
    /// Eligible peers have no outstanding request and fewer failures than
    /// the threshold. Among those, prefer the fewest failures, breaking
    /// ties by least recently asked (never-asked first). `None` means the
    /// caller has to wait for the next tick.
    #[must_use]
    pub fn choose_peer(&self) -> Option<PeerId> {
        self.entries
            .iter()
            .filter(|entry| !entry.outstanding && entry.failures < self.max_failures)
            .min_by_key(|entry| (entry.failures, entry.last_asked))
            .map(|entry| entry.peer)
    }

    /// Flag a request as in flight to `peer`.
    pub fn mark_requested(&mut self, peer: &PeerId, now: Instant) {
        if let Some(entry) = self.entry_mut(peer) {
            entry.outstanding = true;
            entry.last_asked = Some(now);
        }
    }

    /// A response arrived from `peer`; it may be asked again.
    pub fn record_response(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entry_mut(peer) {
            entry.outstanding = false;
        }
    }

    /// Count a failure (timeout or bad response) against `peer` and clear
    /// its outstanding flag. At the threshold the peer stops being
    /// selected for this acquisition.
    pub fn mark_failed(&mut self, peer: &PeerId) {
        if let Some(entry) = self.entry_mut(peer) {
            entry.outstanding = false;
            entry.failures += 1;
        }
    }

    #[must_use]
    pub fn failures(&self, peer: &PeerId) -> u32 {
        self.entries
            .iter()
            .find(|entry| entry.peer == *peer)
            .map_or(0, |entry| entry.failures)
    }

    /// True when every known peer is at the failure threshold (or none
    /// are known), so no request can be issued until alternates arrive.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.entries
            .iter()
            .all(|entry| entry.failures >= self.max_failures)
    }

    #[must_use]
    pub fn has_outstanding(&self) -> bool {
        self.entries.iter().any(|entry| entry.outstanding)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, peer: &PeerId) -> Option<&mut PeerEntry> {
        self.entries.iter_mut().find(|entry| entry.peer == *peer)
    }
}
