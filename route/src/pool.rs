//! route pool: round-robin selection and health bookkeeping

use crate::config::RouteConfig;
use crate::route::{Route, RouteSnapshot, Shared};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use swarm_traits::{Egress, EventSink, Ledger, RouteId};
use tokio::time::Instant;

/// pool statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    /// tasks waiting across all route queues
    pub queued: usize,
}

/// fixed set of routes. routes are never removed, only demoted.
pub struct RoutePool {
    routes: Vec<Arc<Route>>,
    /// round-robin cursor, advanced once per scanned route
    cursor: AtomicUsize,
    shared: Arc<Shared>,
}

impl RoutePool {
    /// create a pool with one route per egress, in the given order
    pub fn new(
        egresses: impl IntoIterator<Item = Egress>,
        config: RouteConfig,
        ledger: Arc<dyn Ledger>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let shared = Arc::new(Shared {
            config,
            ledger,
            events,
        });

        let routes = egresses
            .into_iter()
            .enumerate()
            .map(|(i, egress)| Arc::new(Route::new(RouteId(i), egress, Arc::clone(&shared))))
            .collect();

        Self {
            routes,
            cursor: AtomicUsize::new(0),
            shared,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    #[inline]
    pub fn config(&self) -> &RouteConfig {
        &self.shared.config
    }

    #[inline]
    pub fn route(&self, id: RouteId) -> Option<&Arc<Route>> {
        self.routes.get(id.0)
    }

    #[inline]
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    /// next healthy route, round-robin.
    ///
    /// scans at most once around the pool. with half-open reinstatement
    /// configured, a demoted route whose demotion is old enough is handed
    /// out again when the cursor reaches it, healthy neighbours or
    /// not. `None` means no route is available.
    pub fn select(&self) -> Option<Arc<Route>> {
        let n = self.routes.len();
        if n == 0 {
            return None;
        }

        let reinstate = self
            .shared
            .config
            .reinstate_after
            .map(|after| (Instant::now(), after));

        for _ in 0..n {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % n;
            let route = &self.routes[idx];
            if route.is_healthy() {
                return Some(Arc::clone(route));
            }
            if let Some((now, after)) = reinstate {
                if route.try_reinstate(now, after) {
                    return Some(Arc::clone(route));
                }
            }
        }

        None
    }

    /// reset failure counter and mark healthy. false if the id is unknown.
    pub fn report_success(&self, id: RouteId) -> bool {
        match self.route(id) {
            Some(route) => {
                route.record_success();
                true
            }
            None => false,
        }
    }

    /// count a failure, demote at the threshold. false if the id is unknown.
    pub fn report_failure(&self, id: RouteId) -> bool {
        match self.route(id) {
            Some(route) => {
                route.record_failure();
                true
            }
            None => false,
        }
    }

    /// external reset of a demoted route
    pub fn reset(&self, id: RouteId) -> bool {
        match self.route(id) {
            Some(route) => {
                route.reset();
                true
            }
            None => false,
        }
    }

    /// reset every route
    pub fn reset_all(&self) {
        for route in &self.routes {
            route.reset();
        }
    }

    #[inline]
    pub fn healthy_count(&self) -> usize {
        self.routes.iter().filter(|r| r.is_healthy()).count()
    }

    pub fn stats(&self) -> PoolStats {
        let healthy = self.healthy_count();
        PoolStats {
            total: self.routes.len(),
            healthy,
            unhealthy: self.routes.len() - healthy,
            queued: self.routes.iter().map(|r| r.queued()).sum(),
        }
    }

    pub fn snapshot(&self) -> Vec<RouteSnapshot> {
        self.routes.iter().map(|r| r.snapshot()).collect()
    }
}
