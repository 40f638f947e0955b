//! fan a target count of submissions out over identities

use crate::error::{Error, Result};
use crate::worker::{SubmissionOutcome, SubmissionResult, SubmissionWorker, WorkerContext};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use swarm_traits::IdentityId;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// workers admitted at once across all identities
pub const DEFAULT_CONCURRENCY: usize = 150;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub concurrency: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl DispatcherConfig {
    /// clamped to at least one
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

/// split `total` into `n` shares differing by at most one, larger first.
///
/// `partition(17, 5) == [4, 4, 3, 3, 3]`
pub fn partition(total: usize, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let base = total / n;
    let extra = total % n;
    (0..n).map(|i| base + usize::from(i < extra)).collect()
}

/// interleave identities round-robin up to each one's share
fn admission_order(identities: &[IdentityId], shares: &[usize]) -> Vec<IdentityId> {
    let rounds = shares.iter().copied().max().unwrap_or(0);
    let mut order = Vec::with_capacity(shares.iter().sum());
    for round in 0..rounds {
        for (identity, &share) in identities.iter().zip(shares) {
            if round < share {
                order.push(identity.clone());
            }
        }
    }
    order
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentityTally {
    pub succeeded: usize,
    pub failed: usize,
    /// highest sequence accepted for this identity during the run
    pub last_sequence: Option<u64>,
}

/// aggregate result of one `run`
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    pub target: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    /// accepted submissions per second
    pub throughput: f64,
    pub identities: BTreeMap<String, IdentityTally>,
    pub failures: BTreeMap<String, usize>,
}

impl DispatchReport {
    fn new(target: usize) -> Self {
        Self {
            target,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &SubmissionOutcome) {
        let tally = self
            .identities
            .entry(outcome.identity.to_string())
            .or_default();
        match &outcome.result {
            SubmissionResult::Succeeded { sequence, .. } => {
                self.succeeded += 1;
                tally.succeeded += 1;
                tally.last_sequence = tally.last_sequence.max(Some(*sequence));
            }
            SubmissionResult::Failed { class, .. } => {
                self.failed += 1;
                tally.failed += 1;
                *self.failures.entry(format!("{:?}", class)).or_default() += 1;
            }
        }
    }

    fn record_panic(&mut self, error: JoinError) {
        log::error!("dispatcher: worker task died: {}", error);
        self.failed += 1;
        *self.failures.entry("Panicked".to_string()).or_default() += 1;
    }

    fn finish(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_millis() as u64;
        let secs = elapsed.as_secs_f64();
        self.throughput = if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        };
    }

    #[inline]
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }
}

pub struct Dispatcher {
    config: DispatcherConfig,
    identities: Vec<IdentityId>,
    ctx: Arc<WorkerContext>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        config: DispatcherConfig,
        identities: Vec<IdentityId>,
        ctx: Arc<WorkerContext>,
    ) -> Result<Self> {
        if identities.is_empty() {
            return Err(Error::NoIdentities);
        }
        if ctx.routes.is_empty() {
            return Err(Error::NoRoutes);
        }
        Ok(Self {
            config,
            identities,
            ctx,
            next_id: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn identities(&self) -> &[IdentityId] {
        &self.identities
    }

    #[inline]
    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.ctx
    }

    /// fetch authoritative sequences for identities with no cached value
    pub async fn bootstrap(&self) -> Result<()> {
        let missing: Vec<IdentityId> = self
            .identities
            .iter()
            .filter(|id| self.ctx.sequences.current(id).is_none())
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        self.ctx.sequences.bootstrap(&missing).await?;
        Ok(())
    }

    /// run `target` logical submissions to completion.
    ///
    /// per-submission failures land in the report, never in an error.
    pub async fn run(&self, target: usize) -> DispatchReport {
        let started = Instant::now();
        let shares = partition(target, self.identities.len());
        let order = admission_order(&self.identities, &shares);

        log::info!(
            "dispatcher: {} submissions over {} identities, {} routes, cap {}",
            target,
            self.identities.len(),
            self.ctx.routes.len(),
            self.config.concurrency
        );

        let slots = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers = JoinSet::new();
        let mut report = DispatchReport::new(target);

        for identity in order {
            // never closed while we hold it
            let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
                break;
            };

            while let Some(joined) = workers.try_join_next() {
                fold(&mut report, joined);
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let worker = SubmissionWorker::new(id, identity, Arc::clone(&self.ctx));
            workers.spawn(async move {
                let outcome = worker.run().await;
                drop(permit);
                outcome
            });
        }

        while let Some(joined) = workers.join_next().await {
            fold(&mut report, joined);
        }

        report.finish(started.elapsed());
        let pool = self.ctx.routes.stats();
        log::info!(
            "dispatcher: done {}/{} ok, {} failed in {}ms ({:.1}/s), routes {}/{} healthy",
            report.succeeded,
            target,
            report.failed,
            report.elapsed_ms,
            report.throughput,
            pool.healthy,
            pool.total
        );
        report
    }
}

fn fold(report: &mut DispatchReport, joined: std::result::Result<SubmissionOutcome, JoinError>) {
    match joined {
        Ok(outcome) => report.record(&outcome),
        Err(e) => report.record_panic(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{context, MemoryLedger};
    use swarm_route::RouteConfig;

    fn ids(names: &[&str]) -> Vec<IdentityId> {
        names.iter().map(|n| IdentityId::new(*n)).collect()
    }

    #[test]
    fn test_partition_uneven() {
        assert_eq!(partition(17, 5), vec![4, 4, 3, 3, 3]);
        assert_eq!(partition(4, 2), vec![2, 2]);
        assert_eq!(partition(2, 4), vec![1, 1, 0, 0]);
        assert_eq!(partition(5, 0), Vec::<usize>::new());
    }

    #[test]
    fn test_partition_sums_to_total() {
        for total in 0..50 {
            for n in 1..9 {
                let shares = partition(total, n);
                assert_eq!(shares.iter().sum::<usize>(), total);
                let max = shares.iter().max().copied().unwrap_or(0);
                let min = shares.iter().min().copied().unwrap_or(0);
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn test_admission_interleaves() {
        let order = admission_order(&ids(&["a", "b", "c"]), &[2, 2, 1]);
        assert_eq!(order, ids(&["a", "b", "c", "a", "b"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_empty_inputs() {
        let ledger = Arc::new(MemoryLedger::new());
        let ctx = context(&ledger, 1, RouteConfig::default());
        assert!(matches!(
            Dispatcher::new(DispatcherConfig::default(), vec![], Arc::clone(&ctx)),
            Err(Error::NoIdentities)
        ));

        let empty = context(&ledger, 0, RouteConfig::default());
        assert!(matches!(
            Dispatcher::new(DispatcherConfig::default(), ids(&["a"]), empty),
            Err(Error::NoRoutes)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bootstrap_then_run() {
        let ledger = Arc::new(
            MemoryLedger::new()
                .with_sequence("a", 10)
                .with_sequence("b", 20),
        );
        let ctx = context(&ledger, 3, RouteConfig::default());
        let dispatcher =
            Dispatcher::new(DispatcherConfig::default(), ids(&["a", "b"]), Arc::clone(&ctx))
                .unwrap();

        dispatcher.bootstrap().await.unwrap();
        let report = dispatcher.run(4).await;

        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 0);
        assert_eq!(ctx.sequences.current(&IdentityId::new("a")), Some(12));
        assert_eq!(ctx.sequences.current(&IdentityId::new("b")), Some(22));
        assert_eq!(report.identities["a"].last_sequence, Some(11));
        assert_eq!(report.identities["b"].succeeded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_bounds_in_flight() {
        let names: Vec<String> = (0..8).map(|i| format!("id{}", i)).collect();
        let mut ledger = MemoryLedger::new().with_latency(Duration::from_millis(50));
        for name in &names {
            ledger = ledger.with_sequence(name, 0);
        }
        let ledger = Arc::new(ledger);
        let ctx = context(
            &ledger,
            16,
            RouteConfig::default().with_min_interval(Duration::from_millis(1)),
        );
        let identities: Vec<IdentityId> = names.iter().map(IdentityId::new).collect();
        for id in &identities {
            ctx.sequences.set(id.clone(), 0);
        }

        let dispatcher = Dispatcher::new(
            DispatcherConfig::default().with_concurrency(3),
            identities,
            Arc::clone(&ctx),
        )
        .unwrap();
        let report = dispatcher.run(24).await;

        assert_eq!(report.succeeded, 24);
        assert!(ledger.max_in_flight() <= 3);
        assert_eq!(ledger.overlaps(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_reported_not_raised() {
        let ledger = Arc::new(
            MemoryLedger::new()
                .with_sequence("a", 0)
                .always(swarm_traits::SendError::Rejected("execution reverted".into())),
        );
        let ctx = context(&ledger, 2, RouteConfig::default());
        ctx.sequences.set(IdentityId::new("a"), 0);

        let dispatcher =
            Dispatcher::new(DispatcherConfig::default(), ids(&["a"]), Arc::clone(&ctx)).unwrap();
        let report = dispatcher.run(3).await;

        assert_eq!(report.succeeded, 0);
        assert_eq!(report.failed, 3);
        assert_eq!(report.completed(), 3);
        assert_eq!(report.failures["Fatal"], 3);
        assert_eq!(ctx.sequences.current(&IdentityId::new("a")), Some(0));
    }
}
