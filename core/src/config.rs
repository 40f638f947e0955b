//! configuration for the swarm binary.
//!
//! every value comes from a `--flag value` argument, falling back to an
//! environment variable, falling back to the per-crate default.

use crate::sim::SimConfig;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use swarm_dispatch::{DispatcherConfig, WorkerConfig};
use swarm_route::RouteConfig;
use swarm_sequence::SequenceConfig;
use swarm_traits::{Egress, IdentityId, ResourceBudget};
use thiserror::Error;

/// submissions per run when none is given
pub const DEFAULT_TARGET: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("invalid value for {flag}: {value:?}")]
    Invalid { flag: &'static str, value: String },

    #[error("failed to read route file {path}: {source}")]
    RouteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// binary configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// egress routes, in rotation order.
    pub routes: Vec<Egress>,
    /// identities to submit for.
    pub identities: Vec<IdentityId>,
    /// logical submissions per run.
    pub target: usize,
    /// print the report as json.
    pub json: bool,
    pub route: RouteConfig,
    pub sequence: SequenceConfig,
    pub worker: WorkerConfig,
    pub dispatcher: DispatcherConfig,
    /// simulated backend.
    pub sim: SimConfig,
}

impl Config {
    pub fn new(routes: Vec<Egress>, identities: Vec<IdentityId>) -> Self {
        Self {
            routes,
            identities,
            target: DEFAULT_TARGET,
            json: false,
            route: RouteConfig::default(),
            sequence: SequenceConfig::default(),
            worker: WorkerConfig::default(),
            dispatcher: DispatcherConfig::default(),
            sim: SimConfig::default(),
        }
    }

    pub fn with_target(mut self, target: usize) -> Self {
        self.target = target;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// build from command line arguments, falling back to `env`.
    ///
    /// `env` is `|name| std::env::var(name).ok()` in the binary.
    pub fn from_args<E>(args: &[String], env: E) -> Result<Self, ConfigError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let get = |flag: &str, var: &str| arg_value(args, flag).or_else(|| env(var));

        let mut routes = match get("--routes", "SWARM_ROUTES") {
            Some(path) => load_routes(path)?,
            None => Vec::new(),
        };
        if let Some(list) = get("--route", "SWARM_ROUTE_LIST") {
            routes.extend(split_list(&list).map(Egress::new));
        }
        if routes.is_empty() {
            return Err(ConfigError::Missing("routes (--routes FILE or --route a,b)"));
        }

        let identities: Vec<IdentityId> = get("--identities", "SWARM_IDENTITIES")
            .map(|list| split_list(&list).map(IdentityId::new).collect())
            .unwrap_or_default();
        if identities.is_empty() {
            return Err(ConfigError::Missing("identities (--identities a,b)"));
        }

        let mut config = Config::new(routes, identities)
            .with_json(has_flag(args, "--json") || env("SWARM_JSON").is_some_and(|v| v == "1"));

        if let Some(target) = parse(get("--target", "SWARM_TARGET"), "--target")? {
            config = config.with_target(target);
        }
        if let Some(cap) = parse(get("--concurrency", "SWARM_CONCURRENCY"), "--concurrency")? {
            config.dispatcher = config.dispatcher.with_concurrency(cap);
        }

        // route pacing and health
        if let Some(ms) = parse(
            get("--min-interval-ms", "SWARM_MIN_INTERVAL_MS"),
            "--min-interval-ms",
        )? {
            config.route = config.route.with_min_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(get("--jitter-ms", "SWARM_JITTER_MS"), "--jitter-ms")? {
            config.route = config.route.with_jitter(Duration::from_millis(ms));
        }
        if let Some(n) = parse(get("--max-failures", "SWARM_MAX_FAILURES"), "--max-failures")? {
            config.route = config.route.with_max_failures(n);
        }
        if let Some(ms) = parse(
            get("--reinstate-after-ms", "SWARM_REINSTATE_AFTER_MS"),
            "--reinstate-after-ms",
        )? {
            config.route = config.route.with_reinstate_after(Duration::from_millis(ms));
        }

        // worker retry policy
        if let Some(n) = parse(get("--max-retries", "SWARM_MAX_RETRIES"), "--max-retries")? {
            config.worker = config.worker.with_max_retries(n);
        }
        if let Some(ms) = parse(
            get("--nonce-delay-ms", "SWARM_NONCE_DELAY_MS"),
            "--nonce-delay-ms",
        )? {
            config.worker = config.worker.with_nonce_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = parse(
            get("--transient-delay-ms", "SWARM_TRANSIENT_DELAY_MS"),
            "--transient-delay-ms",
        )? {
            config.worker = config.worker.with_transient_delay(Duration::from_millis(ms));
        }
        if let Some(depth) = parse(
            get("--confirm-depth", "SWARM_CONFIRM_DEPTH"),
            "--confirm-depth",
        )? {
            config.worker = config.worker.with_confirm_depth(depth);
        }
        let mut budget = ResourceBudget::default();
        if let Some(limit) = parse(get("--budget-limit", "SWARM_BUDGET_LIMIT"), "--budget-limit")? {
            budget.limit = limit;
        }
        if let Some(price) = parse(get("--budget-price", "SWARM_BUDGET_PRICE"), "--budget-price")? {
            budget.price = price;
        }
        config.worker = config.worker.with_budget(budget);

        if let Some(ms) = parse(
            get("--reconcile-spacing-ms", "SWARM_RECONCILE_SPACING_MS"),
            "--reconcile-spacing-ms",
        )? {
            config.sequence = config.sequence.with_spacing(Duration::from_millis(ms));
        }

        // simulated backend
        if let Some(rate) = parse::<f64>(
            get("--fail-rate", "SWARM_SIM_FAIL_RATE"),
            "--fail-rate",
        )? {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid {
                    flag: "--fail-rate",
                    value: rate.to_string(),
                });
            }
            config.sim = config.sim.with_fail_rate(rate);
        }
        if let Some(list) = get("--dead", "SWARM_SIM_DEAD") {
            for egress in split_list(&list) {
                config.sim = config.sim.with_dead(egress);
            }
        }
        if let Some(ms) = parse(get("--latency-ms", "SWARM_SIM_LATENCY_MS"), "--latency-ms")? {
            config.sim = config.sim.with_latency(Duration::from_millis(ms));
        }
        if let Some(start) = parse(
            get("--start-sequence", "SWARM_SIM_START"),
            "--start-sequence",
        )? {
            config.sim = config.sim.with_start(start);
        }

        Ok(config)
    }
}

/// parse a route list: one egress per line, `#` comments and blank lines skipped
pub fn parse_routes(text: &str) -> Vec<Egress> {
    text.lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(Egress::new)
        .collect()
}

/// read and parse a route list file
pub fn load_routes(path: impl AsRef<Path>) -> Result<Vec<Egress>, ConfigError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::RouteFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_routes(&text))
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse<T: FromStr>(value: Option<String>, flag: &'static str) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { flag, value: v })
        })
        .transpose()
}

pub fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
