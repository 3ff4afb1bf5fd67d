use crate::container::{CancelReason, Reason};
use thiserror::Error;

/// Programming errors raised by the engine itself.
///
/// These are never used for domain rejections; those travel as a [`Reason`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("the promise has already been settled")]
    AlreadySettled,
    #[error("rethrow can only be used inside a reject or cancel handler")]
    RethrowOutsideHandler,
    #[error("a promise cannot adopt itself")]
    CircularAdoption,
    #[error("progress must be within [0, 1], got {0}")]
    InvalidProgress(f32),
    #[error("the cancelation source has been disposed")]
    SourceDisposed,
    #[error("the deferred was dropped before it settled its promise")]
    ProducerDropped,
    #[error("race or first over an empty set of promises")]
    NothingToRace,
    #[error(
        "{promises} promise nodes alive, {handles} handles and {sources} cancelation sources were never released"
    )]
    Leaked {
        promises: usize,
        handles: usize,
        sources: usize,
    },
}

/// Failure side of awaiting a promise.
#[derive(Debug, Clone, Error)]
pub enum AwaitError {
    /// The awaited promise was rejected and nothing upstream handled it.
    #[error("unhandled rejection: {0}")]
    Rejected(Reason),
    #[error("promise was canceled: {0}")]
    Canceled(CancelReason),
}

impl AwaitError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, AwaitError::Canceled(_))
    }

    /// The rejection reason, when this is [`AwaitError::Rejected`].
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            AwaitError::Rejected(reason) => Some(reason),
            AwaitError::Canceled(_) => None,
        }
    }
}
