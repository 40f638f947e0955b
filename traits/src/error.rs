//! error type for a single send or sequence lookup

use crate::classify::{classify, ErrorClass};
use thiserror::Error;

/// failure of one physical send (or sequence fetch) as reported by the
/// backend or the egress transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// backend says the sequence number is stale, duplicate or an
    /// underpriced replacement.
    #[error("sequence conflict: {0}")]
    SequenceConflict(String),

    /// congestion, temporary fee or budget rejection.
    #[error("transient rejection: {0}")]
    Transient(String),

    /// backend rejection carrying only a message; classified by the caller.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("no route available")]
    RouteUnavailable,

    #[error("request timed out")]
    Timeout,

    /// egress/network failure (proxy refused, connection reset, ...).
    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation not supported")]
    Unsupported,
}

impl SendError {
    /// retry class of this failure
    #[inline]
    pub fn class(&self) -> ErrorClass {
        classify(self)
    }

    /// true when the failure is attributable to the egress route.
    ///
    /// transport failures always are. otherwise a failure counts against
    /// the route exactly when it classifies as transient (congestion, rate
    /// limit), whether it arrives structured or as a raw rejection message.
    #[inline]
    pub fn is_route_fault(&self) -> bool {
        match self {
            SendError::Transport(_) | SendError::Timeout => true,
            _ => self.class() == ErrorClass::Transient,
        }
    }
}
