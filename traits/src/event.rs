//! structured events emitted by the dispatch core.

use crate::{IdentityId, RouteId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// route crossed the failure threshold and left rotation.
    RouteDemoted { route: RouteId, failures: u32 },
    /// unhealthy route succeeded (or was reset) and is healthy again.
    RouteRecovered { route: RouteId },
    /// demoted route handed out again as a half-open trial.
    RouteReinstated { route: RouteId },
    SequenceReconciled {
        identity: IdentityId,
        previous: Option<u64>,
        current: u64,
    },
    ReconcileFailed { identity: IdentityId, error: String },
    /// logical submission reached a terminal outcome.
    SubmissionFinished {
        id: u64,
        identity: IdentityId,
        attempts: u32,
        succeeded: bool,
        sequence: Option<u64>,
    },
}

/// observability sink. the core only emits, never reads back.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

impl<T: EventSink + ?Sized> EventSink for std::sync::Arc<T> {
    #[inline]
    fn emit(&self, event: &Event) {
        (**self).emit(event)
    }
}

/// discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EventSink for NoopSink {
    #[inline]
    fn emit(&self, _event: &Event) {}
}
