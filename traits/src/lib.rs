//! shared types and collaborator traits for swarm_* crates.
//!
//! the dispatch core never talks to a backend, a signer or a log directly.
//! it consumes the traits below:
//!
//! - **Ledger**: authoritative sequence lookup + one physical send per call
//! - **PayloadBuilder**: turns (identity, sequence, budget) into opaque bytes
//! - **EventSink**: write-only structured events

pub mod classify;
pub mod error;
pub mod event;

pub use classify::{classify, classify_message, ErrorClass};
pub use error::SendError;
pub use event::{Event, EventSink, NoopSink};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// signing principal, address-like and opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// index of a route inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteId(pub usize);

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

/// egress configuration of a route (proxy url or similar).
///
/// never interpreted by the core, only handed back to `Ledger::send`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Egress(String);

impl Egress {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Egress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// signed, ready-to-send submission bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload(pub Vec<u8>);

impl Payload {
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// per-submission execution cost limits (gas limit / gas price).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBudget {
    pub limit: u64,
    pub price: u128,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            limit: 100_000,
            price: 1_000_000_000, // 1 gwei
        }
    }
}

/// backend transaction hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// result of an accepted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub hash: TxHash,
    /// confirmations observed so far (0 = accepted, not yet included).
    pub depth: u64,
}

impl Receipt {
    pub fn accepted(hash: impl Into<String>) -> Self {
        Self {
            hash: TxHash(hash.into()),
            depth: 0,
        }
    }
}

/// remote ledger endpoint.
///
/// `get_sequence` is authoritative and must only be reached through the
/// sequence allocator. `send` performs exactly one physical send through
/// the given egress.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// authoritative next sequence number for the identity.
    async fn get_sequence(&self, identity: &IdentityId) -> Result<u64, SendError>;

    /// send a payload through one egress route.
    async fn send(&self, egress: &Egress, payload: &Payload) -> Result<Receipt, SendError>;

    /// wait until the transaction is `depth` blocks deep.
    ///
    /// default implementation reports `Unsupported`.
    async fn wait_for_depth(&self, hash: &TxHash, depth: u64) -> Result<Receipt, SendError> {
        let _ = (hash, depth);
        Err(SendError::Unsupported)
    }
}

/// blanket impl for Arc<T> - just forwards.
#[async_trait]
impl<T: Ledger + ?Sized> Ledger for Arc<T> {
    #[inline]
    async fn get_sequence(&self, identity: &IdentityId) -> Result<u64, SendError> {
        (**self).get_sequence(identity).await
    }

    #[inline]
    async fn send(&self, egress: &Egress, payload: &Payload) -> Result<Receipt, SendError> {
        (**self).send(egress, payload).await
    }

    #[inline]
    async fn wait_for_depth(&self, hash: &TxHash, depth: u64) -> Result<Receipt, SendError> {
        (**self).wait_for_depth(hash, depth).await
    }
}

/// builds signed payloads. pure: no side effects relevant to dispatch.
pub trait PayloadBuilder: Send + Sync {
    fn build(
        &self,
        identity: &IdentityId,
        sequence: u64,
        budget: &ResourceBudget,
    ) -> Result<Payload, SendError>;
}

impl<T: PayloadBuilder + ?Sized> PayloadBuilder for Arc<T> {
    #[inline]
    fn build(
        &self,
        identity: &IdentityId,
        sequence: u64,
        budget: &ResourceBudget,
    ) -> Result<Payload, SendError> {
        (**self).build(identity, sequence, budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLedger;

    #[async_trait]
    impl Ledger for FixedLedger {
        async fn get_sequence(&self, _identity: &IdentityId) -> Result<u64, SendError> {
            Ok(7)
        }

        async fn send(&self, egress: &Egress, _payload: &Payload) -> Result<Receipt, SendError> {
            Ok(Receipt::accepted(egress.as_str()))
        }
    }

    #[tokio::test]
    async fn test_arc_forwards() {
        let ledger: Arc<dyn Ledger> = Arc::new(FixedLedger);
        let wrapped = Arc::new(ledger);

        let seq = wrapped.get_sequence(&"a".into()).await.unwrap();
        assert_eq!(seq, 7);

        let receipt = wrapped
            .send(&Egress::new("http://p1"), &Payload(vec![1]))
            .await
            .unwrap();
        assert_eq!(receipt.hash.0, "http://p1");
    }

    #[tokio::test]
    async fn test_wait_for_depth_default_unsupported() {
        let ledger = FixedLedger;
        let err = ledger
            .wait_for_depth(&TxHash("0x1".into()), 3)
            .await
            .unwrap_err();
        assert_eq!(err, SendError::Unsupported);
    }

    #[test]
    fn test_display() {
        assert_eq!(RouteId(3).to_string(), "route-3");
        assert_eq!(IdentityId::new("0xabc").to_string(), "0xabc");
        assert_eq!(Egress::new("socks5://h:1").as_str(), "socks5://h:1");
    }
}
