//! end-to-end runs against an in-memory backend

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swarm_dispatch::{Dispatcher, DispatcherConfig, WorkerConfig, WorkerContext};
use swarm_route::{RouteConfig, RoutePool};
use swarm_sequence::{IdentityLocks, SequenceAllocator, SequenceConfig};
use swarm_traits::{
    Egress, Event, EventSink, IdentityId, Ledger, Payload, PayloadBuilder, Receipt,
    ResourceBudget, SendError,
};

const DEAD: &str = "http://10.9.9.9:3128";

#[derive(Default)]
struct Chain {
    next: Mutex<HashMap<IdentityId, u64>>,
    accepted: Mutex<Vec<(IdentityId, u64)>>,
    busy: Mutex<HashSet<IdentityId>>,
    overlaps: AtomicUsize,
    dead_sends: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl Chain {
    fn with(identities: &[(&str, u64)]) -> Arc<Self> {
        let chain = Chain::default();
        {
            let mut next = chain.next.lock().unwrap();
            for (id, seq) in identities {
                next.insert(IdentityId::new(*id), *seq);
            }
        }
        Arc::new(chain)
    }
}

#[async_trait]
impl Ledger for Chain {
    async fn get_sequence(&self, identity: &IdentityId) -> Result<u64, SendError> {
        Ok(self.next.lock().unwrap().get(identity).copied().unwrap_or(0))
    }

    async fn send(&self, egress: &Egress, payload: &Payload) -> Result<Receipt, SendError> {
        if egress.as_str() == DEAD {
            self.dead_sends.fetch_add(1, Ordering::SeqCst);
            return Err(SendError::Transport("connection refused".into()));
        }

        let text = String::from_utf8_lossy(payload.as_bytes()).into_owned();
        let (identity, sequence) = text.rsplit_once(':').unwrap();
        let identity = IdentityId::new(identity);
        let sequence: u64 = sequence.parse().unwrap();

        if !self.busy.lock().unwrap().insert(identity.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.busy.lock().unwrap().remove(&identity);

        let mut next = self.next.lock().unwrap();
        let expected = next.entry(identity.clone()).or_insert(0);
        if sequence != *expected {
            return Err(SendError::Rejected(format!(
                "nonce too low: next nonce {}, tx nonce {}",
                expected, sequence
            )));
        }
        *expected += 1;
        self.accepted.lock().unwrap().push((identity, sequence));
        Ok(Receipt::accepted(format!("0x{:x}", sequence)))
    }
}

impl EventSink for Chain {
    fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Text;

impl PayloadBuilder for Text {
    fn build(
        &self,
        identity: &IdentityId,
        sequence: u64,
        _budget: &ResourceBudget,
    ) -> Result<Payload, SendError> {
        Ok(Payload(format!("{}:{}", identity, sequence).into_bytes()))
    }
}

fn dispatcher(chain: &Arc<Chain>, egresses: &[&str], identities: &[&str]) -> Dispatcher {
    let ctx = Arc::new(WorkerContext {
        routes: Arc::new(RoutePool::new(
            egresses.iter().map(|e| Egress::new(*e)),
            RouteConfig::default().with_min_interval(Duration::from_millis(100)),
            chain.clone(),
            chain.clone(),
        )),
        sequences: Arc::new(SequenceAllocator::new(
            chain.clone(),
            chain.clone(),
            SequenceConfig::default(),
        )),
        locks: Arc::new(IdentityLocks::new()),
        ledger: chain.clone(),
        builder: Arc::new(Text),
        events: chain.clone(),
        config: WorkerConfig::default(),
    });
    Dispatcher::new(
        DispatcherConfig::default(),
        identities.iter().map(|i| IdentityId::new(*i)).collect(),
        ctx,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_even_split_over_identities() {
    let chain = Chain::with(&[("alice", 3), ("bob", 40)]);
    let dispatcher = dispatcher(
        &chain,
        &["http://10.0.0.1:3128", "http://10.0.0.2:3128", "http://10.0.0.3:3128"],
        &["alice", "bob"],
    );

    dispatcher.bootstrap().await.unwrap();
    let report = dispatcher.run(4).await;

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 0);
    let sequences = &dispatcher.context().sequences;
    assert_eq!(sequences.current(&IdentityId::new("alice")), Some(5));
    assert_eq!(sequences.current(&IdentityId::new("bob")), Some(42));
}

#[tokio::test(start_paused = true)]
async fn test_sequences_consecutive_without_overlap() {
    let chain = Chain::with(&[("a", 0), ("b", 100), ("c", 7)]);
    let egresses: Vec<String> = (1..=10).map(|i| format!("http://10.0.1.{}:3128", i)).collect();
    let egresses: Vec<&str> = egresses.iter().map(String::as_str).collect();
    let dispatcher = dispatcher(&chain, &egresses, &["a", "b", "c"]);

    dispatcher.bootstrap().await.unwrap();
    let report = dispatcher.run(30).await;

    assert_eq!(report.succeeded, 30);
    assert_eq!(chain.overlaps.load(Ordering::SeqCst), 0);

    let accepted = chain.accepted.lock().unwrap().clone();
    for (name, start) in [("a", 0u64), ("b", 100), ("c", 7)] {
        let seqs: Vec<u64> = accepted
            .iter()
            .filter(|(id, _)| id.as_str() == name)
            .map(|(_, s)| *s)
            .collect();
        let expected: Vec<u64> = (start..start + 10).collect();
        assert_eq!(seqs, expected, "identity {}", name);
    }
}

#[tokio::test(start_paused = true)]
async fn test_dead_route_leaves_rotation() {
    let chain = Chain::with(&[("a", 0)]);
    let dispatcher = dispatcher(
        &chain,
        &["http://10.0.0.1:3128", DEAD, "http://10.0.0.3:3128"],
        &["a"],
    );

    dispatcher.bootstrap().await.unwrap();
    let report = dispatcher.run(12).await;

    assert_eq!(report.succeeded, 12);
    assert_eq!(chain.dead_sends.load(Ordering::SeqCst), 3);

    let stats = dispatcher.context().routes.stats();
    assert_eq!(stats.healthy, 2);
    assert_eq!(stats.unhealthy, 1);

    let events = chain.events.lock().unwrap();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::RouteDemoted { failures: 3, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_drifted_cache_recovers() {
    let chain = Chain::with(&[("a", 0)]);
    let dispatcher = dispatcher(&chain, &["http://10.0.0.1:3128"], &["a"]);

    dispatcher.bootstrap().await.unwrap();
    // someone else spent two sequences behind our back
    chain.next.lock().unwrap().insert(IdentityId::new("a"), 2);

    let report = dispatcher.run(3).await;

    assert_eq!(report.succeeded, 3);
    assert_eq!(
        dispatcher.context().sequences.current(&IdentityId::new("a")),
        Some(5)
    );
}
