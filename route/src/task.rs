//! route-bound send attempt

use swarm_traits::{IdentityId, Payload, Receipt, ResourceBudget, SendError};
use tokio::sync::oneshot;

/// outcome delivered to the submitting worker
pub type TaskResult = Result<Receipt, SendError>;

/// receiving half held by the worker while the task is queued
pub type TaskHandle = oneshot::Receiver<TaskResult>;

/// one physical send attempt, consumed exactly once by a route drain.
#[derive(Debug)]
pub struct Task {
    pub identity: IdentityId,
    pub sequence: u64,
    pub payload: Payload,
    pub budget: ResourceBudget,
    done: oneshot::Sender<TaskResult>,
}

impl Task {
    /// create a task and the handle its result will arrive on
    pub fn new(
        identity: IdentityId,
        sequence: u64,
        payload: Payload,
        budget: ResourceBudget,
    ) -> (Self, TaskHandle) {
        let (done, handle) = oneshot::channel();
        (
            Self {
                identity,
                sequence,
                payload,
                budget,
                done,
            },
            handle,
        )
    }

    /// deliver the result. a worker that went away is not an error.
    #[inline]
    pub fn complete(self, result: TaskResult) {
        let _ = self.done.send(result);
    }
}
