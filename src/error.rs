//! Error taxonomy shared by the transport seam and the dialog engine.

use thiserror::Error;

/// Failures reported by the authenticated transport.
///
/// Every variant is fatal to the [`Session`](crate::Session) that observed it:
/// the running scenario is aborted and its remaining steps are marked errored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection lost: {0}")]
    Disconnected(String),

    #[error("flood wait: retry after {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("peer flood: the account is limited")]
    PeerFlood,

    #[error("slow mode: retry after {seconds}s")]
    SlowModeWait { seconds: u64 },

    #[error("write forbidden in {0}")]
    WriteForbidden(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("update stream closed")]
    StreamClosed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Why a single step could not be dispatched or resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    /// The tapped label is not part of the most recently observed keyboard.
    /// Raised before any network call is made.
    #[error("button {label:?} not found in the last keyboard (available: {available:?})")]
    ButtonNotFound {
        label: String,
        available: Vec<String>,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl StepError {
    /// Whether this error ends the whole session rather than just the step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StepError::Transport(_))
    }
}
