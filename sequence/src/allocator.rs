//! per-identity sequence cache with single-flight reconciliation.
//!
//! reads are O(1) cache hits. authoritative re-fetches go through one
//! background worker consuming a channel: at most one `get_sequence` call
//! is in flight system-wide, requests are served FIFO, and consecutive
//! calls start at least `spacing` apart regardless of which identity
//! asked. this channel talks to the ledger directly, never through a route.

use crate::error::{Error, Result};
use crate::lock::IdentityGuard;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use swarm_traits::{Event, EventSink, IdentityId, Ledger};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// sequence allocator configuration
#[derive(Debug, Clone)]
pub struct SequenceConfig {
    /// minimum spacing between two authoritative calls
    pub spacing: Duration,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            spacing: Duration::from_millis(200),
        }
    }
}

impl SequenceConfig {
    pub fn with_spacing(mut self, spacing: Duration) -> Self {
        self.spacing = spacing;
        self
    }
}

type Cache = Arc<RwLock<HashMap<IdentityId, u64>>>;

/// queued re-fetch request
struct Request {
    identity: IdentityId,
    reply: oneshot::Sender<Result<u64>>,
}

#[inline]
fn read(cache: &Cache) -> RwLockReadGuard<'_, HashMap<IdentityId, u64>> {
    cache.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline]
fn write(cache: &Cache) -> RwLockWriteGuard<'_, HashMap<IdentityId, u64>> {
    cache.write().unwrap_or_else(PoisonError::into_inner)
}

pub struct SequenceAllocator {
    cache: Cache,
    requests: mpsc::UnboundedSender<Request>,
}

impl SequenceAllocator {
    /// create the allocator and spawn its reconcile worker.
    ///
    /// must be called from within a tokio runtime. the worker exits once
    /// the allocator is dropped.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        events: Arc<dyn EventSink>,
        config: SequenceConfig,
    ) -> Self {
        let cache: Cache = Arc::new(RwLock::new(HashMap::new()));
        let (requests, rx) = mpsc::unbounded_channel();

        tokio::spawn(serve(rx, ledger, events, Arc::clone(&cache), config.spacing));

        Self { cache, requests }
    }

    /// cached sequence number, no suspension
    #[inline]
    pub fn current(&self, identity: &IdentityId) -> Option<u64> {
        read(&self.cache).get(identity).copied()
    }

    /// seed a value (startup configuration, tests)
    pub fn set(&self, identity: IdentityId, sequence: u64) {
        write(&self.cache).insert(identity, sequence);
    }

    /// number of identities with a cached value
    pub fn len(&self) -> usize {
        read(&self.cache).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// step the identity's sequence by exactly one after an accepted send
    pub fn advance(&self, guard: &IdentityGuard) -> Result<u64> {
        let mut cache = write(&self.cache);
        let seq = cache
            .get_mut(guard.identity())
            .ok_or_else(|| Error::UnknownIdentity(guard.identity().clone()))?;
        *seq += 1;
        Ok(*seq)
    }

    /// re-fetch the authoritative value for the guarded identity.
    ///
    /// the returned value may equal the previous cached one.
    pub async fn reconcile(&self, guard: &IdentityGuard) -> Result<u64> {
        self.fetch(guard.identity().clone()).await
    }

    /// seed the cache with one authoritative fetch per identity
    pub async fn bootstrap(&self, identities: &[IdentityId]) -> Result<()> {
        let mut pending = Vec::with_capacity(identities.len());
        for identity in identities {
            pending.push(self.submit(identity.clone())?);
        }
        for reply in pending {
            reply.await.map_err(|_| Error::Closed)??;
        }
        log::info!("sequence: bootstrapped {} identities", identities.len());
        Ok(())
    }

    async fn fetch(&self, identity: IdentityId) -> Result<u64> {
        let reply = self.submit(identity)?;
        reply.await.map_err(|_| Error::Closed)?
    }

    fn submit(&self, identity: IdentityId) -> Result<oneshot::Receiver<Result<u64>>> {
        let (reply, rx) = oneshot::channel();
        self.requests
            .send(Request { identity, reply })
            .map_err(|_| Error::Closed)?;
        Ok(rx)
    }
}

/// the single reconcile worker
async fn serve(
    mut rx: mpsc::UnboundedReceiver<Request>,
    ledger: Arc<dyn Ledger>,
    events: Arc<dyn EventSink>,
    cache: Cache,
    spacing: Duration,
) {
    let mut last_call: Option<Instant> = None;
    // identities whose backend value sits behind the cache
    let mut stalled: HashSet<IdentityId> = HashSet::new();

    while let Some(request) = rx.recv().await {
        if let Some(last) = last_call {
            let wait = spacing.saturating_sub(last.elapsed());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        last_call = Some(Instant::now());

        let identity = request.identity;
        let reply = match ledger.get_sequence(&identity).await {
            Ok(fetched) => {
                let (previous, current) = store(&cache, &identity, fetched);
                if fetched < current {
                    if stalled.insert(identity.clone()) {
                        // a cache ahead of the backend never self-corrects, so
                        // "nonce too high" repeats until the backend catches up
                        log::error!(
                            "sequence: backend reports {} for {} behind cached {}, \
                             keeping cache until the backend catches up",
                            fetched,
                            identity,
                            current
                        );
                    } else {
                        log::warn!(
                            "sequence: {} still behind cache ({} < {})",
                            identity,
                            fetched,
                            current
                        );
                    }
                } else if stalled.remove(&identity) {
                    log::info!("sequence: backend caught up for {} at {}", identity, current);
                }
                log::debug!(
                    "sequence: {} reconciled {:?} -> {}",
                    identity,
                    previous,
                    current
                );
                events.emit(&Event::SequenceReconciled {
                    identity,
                    previous,
                    current,
                });
                Ok(current)
            }
            Err(e) => {
                log::warn!("sequence: fetch for {} failed: {}", identity, e);
                events.emit(&Event::ReconcileFailed {
                    identity,
                    error: e.to_string(),
                });
                Err(Error::Backend(e))
            }
        };

        // requester may have given up
        let _ = request.reply.send(reply);
    }

    log::debug!("sequence: reconcile worker stopped");
}

/// write a fetched value, never moving the cache backwards
fn store(cache: &Cache, identity: &IdentityId, fetched: u64) -> (Option<u64>, u64) {
    let mut cache = write(cache);
    let previous = cache.get(identity).copied();
    let current = match previous {
        Some(cached) if cached > fetched => cached,
        _ => fetched,
    };
    cache.insert(identity.clone(), current);
    (previous, current)
}
