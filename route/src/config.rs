//! configuration for egress routes

use std::time::Duration;

/// consecutive failures before a route is marked unhealthy
pub const MAX_FAILURES: u32 = 3;

/// route pool configuration
#[derive(Debug, Clone)]
pub struct RouteConfig {
    /// minimum spacing between two dispatch starts on the same route
    pub min_interval: Duration,
    /// upper bound of the uniform random delay added on top of the spacing
    pub jitter: Duration,
    /// consecutive failures before demotion
    pub max_failures: u32,
    /// half-open reinstatement delay for demoted routes (None = never)
    pub reinstate_after: Option<Duration>,
}

impl Default for RouteConfig {
    #[inline]
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1000),
            jitter: Duration::from_millis(100),
            max_failures: MAX_FAILURES,
            reinstate_after: None,
        }
    }
}

impl RouteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// set per-route minimum dispatch interval
    #[inline]
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    #[inline]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// set failure threshold (clamped to at least 1)
    #[inline]
    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// enable half-open reinstatement of demoted routes
    #[inline]
    pub fn with_reinstate_after(mut self, after: Duration) -> Self {
        self.reinstate_after = Some(after);
        self
    }
}
