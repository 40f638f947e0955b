//! submission dispatch over a route pool
//!
//! - **Dispatcher**: splits a target count evenly over identities and admits
//!   workers under a global concurrency cap
//! - **SubmissionWorker**: one logical submission; holds its identity lock,
//!   sends through a route, reconciles or backs off on failure
//! - retry policy follows `swarm_traits::ErrorClass`
//!
//! # example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarm_dispatch::{Dispatcher, DispatcherConfig, WorkerConfig, WorkerContext};
//! use swarm_route::{RouteConfig, RoutePool};
//! use swarm_sequence::{IdentityLocks, SequenceAllocator, SequenceConfig};
//! use swarm_traits::{Egress, IdentityId, Ledger, NoopSink, PayloadBuilder};
//!
//! async fn fire(ledger: Arc<dyn Ledger>, builder: Arc<dyn PayloadBuilder>) {
//!     let events = Arc::new(NoopSink);
//!     let ctx = Arc::new(WorkerContext {
//!         routes: Arc::new(RoutePool::new(
//!             vec![Egress::new("http://10.0.0.1:3128")],
//!             RouteConfig::default(),
//!             ledger.clone(),
//!             events.clone(),
//!         )),
//!         sequences: Arc::new(SequenceAllocator::new(
//!             ledger.clone(),
//!             events.clone(),
//!             SequenceConfig::default(),
//!         )),
//!         locks: Arc::new(IdentityLocks::new()),
//!         ledger,
//!         builder,
//!         events,
//!         config: WorkerConfig::default(),
//!     });
//!
//!     let dispatcher = Dispatcher::new(
//!         DispatcherConfig::default(),
//!         vec![IdentityId::new("0xabc")],
//!         ctx,
//!     )
//!     .unwrap();
//!     dispatcher.bootstrap().await.unwrap();
//!     let report = dispatcher.run(10).await;
//!     println!("{} ok", report.succeeded);
//! }
//! ```

pub mod dispatcher;
pub mod error;
pub mod worker;

pub use swarm_traits::{classify, classify_message, ErrorClass};
pub use dispatcher::{
    partition, DispatchReport, Dispatcher, DispatcherConfig, IdentityTally, DEFAULT_CONCURRENCY,
};
pub use error::{Error, Result};
pub use worker::{
    SubmissionOutcome, SubmissionResult, SubmissionWorker, WorkerConfig, WorkerContext,
    WorkerState, MAX_RETRIES, NONCE_DELAY, TRANSIENT_DELAY,
};
