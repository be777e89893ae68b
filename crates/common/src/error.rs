//! Central error types (thiserror-based).

use futures::channel::oneshot::Canceled;
use thiserror::Error;

use crate::codec::VideoCodec;

/// Decoder creation and operation errors.
///
/// `Clone` so the same failure can be reported through a decoder event and
/// returned to the caller that triggered it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Decoder creation failed for {codec:?}: {reason}")]
    CreateFailed { codec: VideoCodec, reason: String },

    #[error("No decoder available")]
    NoDecoder,

    #[error("Decoder config mismatch: shared decoder is {expected}, requested {got}")]
    ConfigMismatch { expected: String, got: String },

    #[error("Decoder {op} failed: {reason}")]
    OperationFailed { op: &'static str, reason: String },

    #[error("Task queue is shut down")]
    QueueShutDown,

    #[error("Shared decoder manager is shut down")]
    ShutDown,
}

impl DecodeError {
    pub fn operation(op: &'static str, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            op,
            reason: reason.into(),
        }
    }
}

/// Rejection reason of an asynchronous decoder init.
///
/// `Clone` because one rejection is observed by every waiter of a shared
/// init promise.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Decoder init failed: {0}")]
    Failed(String),

    #[error("Decoder init canceled")]
    Canceled,

    #[error("No decoder to initialize")]
    NoDecoder,
}

/// The resolver went away without answering.
impl From<Canceled> for InitError {
    fn from(_: Canceled) -> Self {
        Self::Canceled
    }
}

/// Convenience Result type for decoder operations.
pub type DecodeResult<T> = Result<T, DecodeError>;
