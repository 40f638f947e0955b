//! single egress route: FIFO task queue, health state and rate-limited drain
//!
//! a route owns its queue. tasks enter through `enqueue` and leave only
//! through the route's own drain loop, which never runs twice at once:
//! the `processing` flag is claimed with a compare-exchange before a drain
//! is spawned and released when the queue runs dry.

use crate::config::RouteConfig;
use crate::task::{Task, TaskResult};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use swarm_traits::{Egress, Event, EventSink, Ledger, RouteId, SendError};
use tokio::time::Instant;

/// collaborators shared by every route of a pool
pub(crate) struct Shared {
    pub(crate) config: RouteConfig,
    pub(crate) ledger: Arc<dyn Ledger>,
    pub(crate) events: Arc<dyn EventSink>,
}

/// point-in-time view of a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub id: RouteId,
    pub egress: Egress,
    pub healthy: bool,
    pub failures: u32,
    pub queued: usize,
    pub dispatched: u64,
}

/// one egress path
pub struct Route {
    id: RouteId,
    egress: Egress,
    healthy: AtomicBool,
    /// consecutive failures, 0..=max_failures
    failures: AtomicU32,
    /// a drain loop currently owns the queue
    processing: AtomicBool,
    dispatched: AtomicU64,
    /// start of the most recent dispatch
    last_dispatch: Mutex<Option<Instant>>,
    demoted_at: Mutex<Option<Instant>>,
    queue: Mutex<VecDeque<Task>>,
    shared: Arc<Shared>,
}

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// uniform random delay in [0, max]
#[inline]
fn jitter(max: Duration) -> Duration {
    let max_us = max.as_micros() as u64;
    if max_us == 0 {
        return Duration::ZERO;
    }
    Duration::from_micros(rand::thread_rng().gen_range(0..=max_us))
}

impl Route {
    pub(crate) fn new(id: RouteId, egress: Egress, shared: Arc<Shared>) -> Self {
        Self {
            id,
            egress,
            healthy: AtomicBool::new(true),
            failures: AtomicU32::new(0),
            processing: AtomicBool::new(false),
            dispatched: AtomicU64::new(0),
            last_dispatch: Mutex::new(None),
            demoted_at: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            shared,
        }
    }

    #[inline]
    pub fn id(&self) -> RouteId {
        self.id
    }

    #[inline]
    pub fn egress(&self) -> &Egress {
        &self.egress
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    #[inline]
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    /// number of tasks waiting in the queue
    #[inline]
    pub fn queued(&self) -> usize {
        lock(&self.queue).len()
    }

    /// number of physical sends started on this route
    #[inline]
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    #[inline]
    pub fn last_dispatch(&self) -> Option<Instant> {
        *lock(&self.last_dispatch)
    }

    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot {
            id: self.id,
            egress: self.egress.clone(),
            healthy: self.is_healthy(),
            failures: self.failures(),
            queued: self.queued(),
            dispatched: self.dispatched(),
        }
    }

    /// append a task and make sure a drain loop is running.
    ///
    /// must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, task: Task) {
        lock(&self.queue).push_back(task);
        self.kick();
    }

    /// spawn the drain loop unless one already owns the queue
    #[inline]
    fn kick(self: &Arc<Self>) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(Arc::clone(self).drain());
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let task = match self.next_task() {
                Some(task) => task,
                None => {
                    self.processing.store(false, Ordering::Release);

                    // an enqueue may have landed between the empty pop and the store
                    let pending = !lock(&self.queue).is_empty();
                    if pending
                        && self
                            .processing
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        continue;
                    }
                    return;
                }
            };

            self.pace().await;

            // health may have been changed through the pool while we slept
            if !self.is_healthy() {
                task.complete(Err(SendError::RouteUnavailable));
                continue;
            }

            let result = self.dispatch(&task).await;
            task.complete(result);
        }
    }

    /// pop the head task, or fail the whole backlog if the route is unhealthy
    fn next_task(&self) -> Option<Task> {
        let mut queue = lock(&self.queue);
        if self.is_healthy() {
            return queue.pop_front();
        }

        let backlog: Vec<Task> = queue.drain(..).collect();
        drop(queue);

        if !backlog.is_empty() {
            log::warn!(
                "route: {} unhealthy, rejecting {} queued tasks",
                self.id,
                backlog.len()
            );
        }
        for task in backlog {
            task.complete(Err(SendError::RouteUnavailable));
        }
        None
    }

    /// sleep until min_interval has passed since the last dispatch, plus jitter
    async fn pace(&self) {
        let config = &self.shared.config;
        let last = self.last_dispatch();
        let wait = match last {
            Some(last) => config.min_interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        };
        let delay = wait + jitter(config.jitter);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn dispatch(&self, task: &Task) -> TaskResult {
        *lock(&self.last_dispatch) = Some(Instant::now());
        self.dispatched.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "route: {} dispatch identity={} seq={} bytes={}",
            self.id,
            task.identity,
            task.sequence,
            task.payload.len()
        );

        let result = self.shared.ledger.send(&self.egress, &task.payload).await;
        match &result {
            Err(e) if e.is_route_fault() => {
                log::debug!("route: {} send failed: {}", self.id, e);
                self.record_failure();
            }
            // a backend verdict still proves the path works
            _ => self.record_success(),
        }
        result
    }

    /// reset failure counter and mark healthy
    pub(crate) fn record_success(&self) {
        self.failures.store(0, Ordering::Release);
        if !self.healthy.swap(true, Ordering::AcqRel) {
            *lock(&self.demoted_at) = None;
            log::info!("route: {} recovered", self.id);
            self.shared
                .events
                .emit(&Event::RouteRecovered { route: self.id });
        }
    }

    /// count a failure, demote once the threshold is reached
    pub(crate) fn record_failure(&self) {
        let max = self.shared.config.max_failures;
        let previous = self
            .failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |f| {
                Some(f.saturating_add(1).min(max))
            })
            .unwrap_or(max);
        let failures = previous.saturating_add(1).min(max);

        if failures >= max && self.healthy.swap(false, Ordering::AcqRel) {
            *lock(&self.demoted_at) = Some(Instant::now());
            log::warn!(
                "route: {} ({}) demoted after {} consecutive failures",
                self.id,
                self.egress,
                failures
            );
            self.shared.events.emit(&Event::RouteDemoted {
                route: self.id,
                failures,
            });
        }
    }

    /// hand a demoted route out again once `after` has elapsed.
    ///
    /// the route comes back with one failure of headroom: a single failure
    /// demotes it again and restarts the clock, a single success heals it.
    pub(crate) fn try_reinstate(&self, now: Instant, after: Duration) -> bool {
        if self.is_healthy() {
            return false;
        }

        let mut demoted_at = lock(&self.demoted_at);
        match *demoted_at {
            Some(at) if now.saturating_duration_since(at) >= after => {}
            _ => return false,
        }
        *demoted_at = None;
        drop(demoted_at);

        let headroom = self.shared.config.max_failures.saturating_sub(1);
        self.failures.store(headroom, Ordering::Release);
        self.healthy.store(true, Ordering::Release);

        log::info!("route: {} reinstated (half-open)", self.id);
        self.shared
            .events
            .emit(&Event::RouteReinstated { route: self.id });
        true
    }

    /// operator reset: healthy with a clean counter
    pub(crate) fn reset(&self) {
        self.failures.store(0, Ordering::Release);
        *lock(&self.demoted_at) = None;
        if !self.healthy.swap(true, Ordering::AcqRel) {
            log::info!("route: {} reset", self.id);
            self.shared
                .events
                .emit(&Event::RouteRecovered { route: self.id });
        }
    }
}
