//! error types for the dispatcher

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no identities to dispatch for")]
    NoIdentities,

    #[error("route pool is empty")]
    NoRoutes,

    #[error("sequence error: {0}")]
    Sequence(#[from] swarm_sequence::Error),
}

/// result type alias
pub type Result<T> = std::result::Result<T, Error>;
