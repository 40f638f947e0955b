//! event sink that writes to the log facade

use swarm_traits::{Event, EventSink};

/// logs every event; route health and reconcile failures at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::RouteDemoted { route, failures } => {
                log::warn!("route: {} demoted after {} failures", route, failures)
            }
            Event::RouteRecovered { route } => log::info!("route: {} recovered", route),
            Event::RouteReinstated { route } => {
                log::info!("route: {} reinstated (half-open)", route)
            }
            Event::SequenceReconciled {
                identity,
                previous,
                current,
            } => match previous {
                Some(prev) if prev != current => {
                    log::info!("sequence: {} {} -> {}", identity, prev, current)
                }
                Some(_) => log::debug!("sequence: {} unchanged at {}", identity, current),
                None => log::info!("sequence: {} starts at {}", identity, current),
            },
            Event::ReconcileFailed { identity, error } => {
                log::warn!("sequence: reconcile for {} failed: {}", identity, error)
            }
            Event::SubmissionFinished {
                id,
                identity,
                attempts,
                succeeded,
                sequence,
            } => log::debug!(
                "worker: #{} {} finished ok={} attempts={} seq={:?}",
                id,
                identity,
                succeeded,
                attempts,
                sequence
            ),
        }
    }
}
