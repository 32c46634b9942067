//! Acquisition configuration with sensible defaults.
//!
//! Batch sizes and retry/timeout constants are operationally tuned
//! values, not protocol invariants; everything here can be overridden
//! per registry.

use tokio::time;

/// Default timeout for a single outstanding node request (2 seconds).
/// A request older than this rotates to another peer.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;

/// Default deadline for an entire acquisition (30 seconds).
pub const DEFAULT_OVERALL_TIMEOUT_SECS: u64 = 30;

/// Default retry budget: total failed attempts (bad responses, request
/// timeouts, starved ticks) an acquisition absorbs before giving up.
pub const DEFAULT_RETRY_BUDGET: u32 = 20;

/// Default per-peer failure threshold within one acquisition. A peer at
/// the threshold is no longer selected for that acquisition, but is not
/// penalized anywhere else.
pub const DEFAULT_MAX_PEER_FAILURES: u32 = 3;

/// Default maximum number of node ids coalesced into one request.
pub const DEFAULT_MAX_BATCH: usize = 64;

/// Acquisition configuration.
///
/// Controls timing, retry accounting, and request batching for tree
/// acquisitions.
#[derive(Copy, Clone, Debug)]
pub struct AcquireConfig {
    /// Timeout for a single outstanding node request
    pub request_timeout: time::Duration,

    /// Deadline for the entire acquisition
    pub overall_timeout: time::Duration,

    /// Total failed attempts before the acquisition fails
    pub retry_budget: u32,

    /// Per-peer failure threshold within one acquisition
    pub max_peer_failures: u32,

    /// Maximum node ids per outbound request
    pub max_batch: usize,
}

impl Default for AcquireConfig {
    fn default() -> Self {
        Self {
            request_timeout: time::Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            overall_timeout: time::Duration::from_secs(DEFAULT_OVERALL_TIMEOUT_SECS),
            retry_budget: DEFAULT_RETRY_BUDGET,
            max_peer_failures: DEFAULT_MAX_PEER_FAILURES,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}
