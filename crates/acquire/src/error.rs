use grove_primitives::Hash;
use thiserror::Error;

/// Terminal outcome delivered to waiters when an acquisition cannot
/// complete.
///
/// Verification failures and unresponsive peers are absorbed into retry
/// accounting and never surface here; only exhausting the acquisition's
/// budget or deadline does.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum AcquireError {
    #[error("acquisition of {target} exhausted its retry budget")]
    RetryExhausted { target: Hash },

    #[error("acquisition of {target} exceeded its deadline")]
    DeadlineExceeded { target: Hash },

    #[error("acquisition of {target} was abandoned before completing")]
    Abandoned { target: Hash },
}
