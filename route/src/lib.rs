//! egress route pool for submission dispatch
//!
//! spreads outbound sends over many egress paths (proxies) while keeping
//! each path under its own rate limit.
//!
//! # architecture
//!
//! - **RoutePool**: fixed set of routes, round-robin `select()`, health reports
//! - **Route**: FIFO task queue drained by at most one loop, paced to
//!   one dispatch per `min_interval` (+ jitter)
//! - **Task**: one physical send attempt with a oneshot completion handle
//!
//! # example
//!
//! ```no_run
//! use std::sync::Arc;
//! use swarm_route::{RouteConfig, RoutePool, Task};
//! use swarm_traits::{Egress, Ledger, NoopSink, Payload, ResourceBudget};
//!
//! async fn send_one(ledger: Arc<dyn Ledger>) {
//!     let pool = RoutePool::new(
//!         vec![Egress::new("http://10.0.0.1:3128"), Egress::new("http://10.0.0.2:3128")],
//!         RouteConfig::default(),
//!         ledger,
//!         Arc::new(NoopSink),
//!     );
//!
//!     let route = pool.select().expect("no healthy route");
//!     let budget = ResourceBudget::default();
//!     let (task, handle) = Task::new("0xabc".into(), 0, Payload(vec![]), budget);
//!     route.enqueue(task);
//!     let _result = handle.await;
//! }
//! ```

pub mod config;
pub mod pool;
pub mod route;
pub mod task;

pub use config::{RouteConfig, MAX_FAILURES};
pub use pool::{PoolStats, RoutePool};
pub use route::{Route, RouteSnapshot};
pub use task::{Task, TaskHandle, TaskResult};
