//! error types for sequence allocation

use swarm_traits::{IdentityId, SendError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// authoritative fetch failed, cache left unchanged
    #[error("sequence fetch failed: {0}")]
    Backend(#[from] SendError),

    /// reconcile worker is gone (runtime shutting down)
    #[error("reconcile channel closed")]
    Closed,

    #[error("no sequence known for identity {0}")]
    UnknownIdentity(IdentityId),
}

/// result type alias
pub type Result<T> = std::result::Result<T, Error>;
