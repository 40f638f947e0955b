//! swarm core: configuration, wiring and the simulated backend.

pub mod config;
pub mod sim;
pub mod sink;

pub use config::{Config, ConfigError};
pub use sim::{SimBuilder, SimConfig, SimLedger};
pub use sink::LogSink;

use std::sync::Arc;
use swarm_dispatch::{Dispatcher, WorkerContext};
use swarm_route::RoutePool;
use swarm_sequence::{IdentityLocks, SequenceAllocator};
use swarm_traits::{EventSink, Ledger, PayloadBuilder};

/// wire pool, allocator and locks into a dispatcher.
///
/// must be called from within a tokio runtime.
pub fn assemble(
    config: &Config,
    ledger: Arc<dyn Ledger>,
    builder: Arc<dyn PayloadBuilder>,
    events: Arc<dyn EventSink>,
) -> swarm_dispatch::Result<Dispatcher> {
    let routes = RoutePool::new(
        config.routes.iter().cloned(),
        config.route.clone(),
        Arc::clone(&ledger),
        Arc::clone(&events),
    );
    let sequences = SequenceAllocator::new(
        Arc::clone(&ledger),
        Arc::clone(&events),
        config.sequence.clone(),
    );

    let ctx = WorkerContext {
        routes: Arc::new(routes),
        sequences: Arc::new(sequences),
        locks: Arc::new(IdentityLocks::new()),
        ledger,
        builder,
        events,
        config: config.worker.clone(),
    };

    Dispatcher::new(
        config.dispatcher.clone(),
        config.identities.clone(),
        Arc::new(ctx),
    )
}
