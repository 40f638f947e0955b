//! per-identity sequence numbers (nonces) for the dispatch core.
//!
//! - **IdentityLocks**: one async mutex per identity; `IdentityGuard` is the
//!   only way to mutate an identity's sequence
//! - **SequenceAllocator**: O(1) cached reads, `advance` after an accepted
//!   send, single-flight `reconcile` against the authoritative backend
//!
//! invariant: an identity's cached sequence never decreases.

pub mod allocator;
pub mod error;
pub mod lock;

pub use allocator::{SequenceAllocator, SequenceConfig};
pub use error::{Error, Result};
pub use lock::{IdentityGuard, IdentityLocks};
