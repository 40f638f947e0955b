//! in-process simulated ledger.
//!
//! stands in for a real backend so the dispatcher can be exercised end to
//! end: keeps one sequence per identity, accepts only the next one, and
//! injects faults per egress or at random.

use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use swarm_traits::{
    Egress, IdentityId, Ledger, Payload, PayloadBuilder, Receipt, ResourceBudget, SendError,
    TxHash,
};

/// random rejections, all classified as transient
const TRANSIENT_FAULTS: &[&str] = &[
    "txpool is full",
    "too many requests",
    "transaction underpriced",
];

#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// probability in `[0, 1]` that a live send fails transiently
    pub fail_rate: f64,
    /// egresses whose every send fails at the transport
    pub dead: HashSet<String>,
    /// delay of every send
    pub latency: Duration,
    /// initial sequence of identities the backend has not seen
    pub start: u64,
}

impl SimConfig {
    /// clamped to `[0, 1]`
    pub fn with_fail_rate(mut self, rate: f64) -> Self {
        self.fail_rate = rate.clamp(0.0, 1.0);
        self
    }

    pub fn with_dead(mut self, egress: impl Into<String>) -> Self {
        self.dead.insert(egress.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_start(mut self, start: u64) -> Self {
        self.start = start;
        self
    }
}

#[derive(Debug)]
pub struct SimLedger {
    config: SimConfig,
    sequences: Mutex<HashMap<IdentityId, u64>>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl SimLedger {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            sequences: Mutex::new(HashMap::new()),
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// backend-side sequence, as if another client had been sending
    pub fn set_sequence(&self, identity: IdentityId, sequence: u64) {
        self.sequences().insert(identity, sequence);
    }

    pub fn sequence(&self, identity: &IdentityId) -> Option<u64> {
        self.sequences().get(identity).copied()
    }

    #[inline]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn sequences(&self) -> MutexGuard<'_, HashMap<IdentityId, u64>> {
        self.sequences.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn random_fault(&self) -> Option<SendError> {
        if self.config.fail_rate <= 0.0 {
            return None;
        }
        let mut rng = rand::thread_rng();
        if !rng.gen_bool(self.config.fail_rate) {
            return None;
        }
        let msg = TRANSIENT_FAULTS[rng.gen_range(0..TRANSIENT_FAULTS.len())];
        Some(SendError::Rejected(msg.to_string()))
    }

    fn apply(&self, identity: IdentityId, sequence: u64) -> Result<Receipt, SendError> {
        let mut sequences = self.sequences();
        let expected = sequences.entry(identity.clone()).or_insert(self.config.start);

        if sequence < *expected {
            return Err(SendError::Rejected(format!(
                "nonce too low: next nonce {}, tx nonce {}",
                expected, sequence
            )));
        }
        if sequence > *expected {
            return Err(SendError::Rejected(format!(
                "nonce too high: next nonce {}, tx nonce {}",
                expected, sequence
            )));
        }

        *expected += 1;
        let n = self.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(Receipt::accepted(format!("0x{:016x}{:08x}", n, sequence)))
    }
}

#[async_trait]
impl Ledger for SimLedger {
    async fn get_sequence(&self, identity: &IdentityId) -> Result<u64, SendError> {
        let start = self.config.start;
        Ok(*self.sequences().entry(identity.clone()).or_insert(start))
    }

    async fn send(&self, egress: &Egress, payload: &Payload) -> Result<Receipt, SendError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }

        if self.config.dead.contains(egress.as_str()) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SendError::Transport(format!("connection refused by {}", egress)));
        }

        let result = match self.random_fault() {
            Some(fault) => Err(fault),
            None => decode(payload).and_then(|(identity, sequence)| self.apply(identity, sequence)),
        };
        if result.is_err() {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn wait_for_depth(&self, hash: &TxHash, depth: u64) -> Result<Receipt, SendError> {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency * depth.min(u32::MAX as u64) as u32).await;
        }
        Ok(Receipt {
            hash: hash.clone(),
            depth,
        })
    }
}

/// payload layout: `identity:sequence:limit:price`
#[derive(Debug, Default, Clone, Copy)]
pub struct SimBuilder;

impl PayloadBuilder for SimBuilder {
    fn build(
        &self,
        identity: &IdentityId,
        sequence: u64,
        budget: &ResourceBudget,
    ) -> Result<Payload, SendError> {
        if identity.as_str().contains(':') {
            return Err(SendError::Rejected(format!("invalid identity {}", identity)));
        }
        let text = format!("{}:{}:{}:{}", identity, sequence, budget.limit, budget.price);
        Ok(Payload(text.into_bytes()))
    }
}

fn decode(payload: &Payload) -> Result<(IdentityId, u64), SendError> {
    let malformed = || SendError::Rejected("malformed payload".into());
    let text = std::str::from_utf8(payload.as_bytes()).map_err(|_| malformed())?;
    let mut fields = text.split(':');
    let identity = fields.next().filter(|s| !s.is_empty()).ok_or_else(malformed)?;
    let sequence = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(malformed)?;
    Ok((IdentityId::new(identity), sequence))
}
