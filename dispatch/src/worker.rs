//! per-submission state machine

use std::sync::Arc;
use std::time::Duration;
use swarm_route::{RoutePool, Task};
use swarm_sequence::{IdentityGuard, IdentityLocks, SequenceAllocator};
use swarm_traits::{
    classify, ErrorClass, Event, EventSink, IdentityId, Ledger, PayloadBuilder, Receipt,
    ResourceBudget, SendError, TxHash,
};

/// attempts per submission (sends, including route-unavailable selections)
pub const MAX_RETRIES: u32 = 5;

/// base delay before a reconcile; attempt n waits `n * NONCE_DELAY`
pub const NONCE_DELAY: Duration = Duration::from_millis(1000);

/// delay before resending after a transient failure
pub const TRANSIENT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_retries: u32,
    pub nonce_delay: Duration,
    pub transient_delay: Duration,
    pub budget: ResourceBudget,
    /// wait for this many confirmations after acceptance (best effort)
    pub confirm_depth: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            nonce_delay: NONCE_DELAY,
            transient_delay: TRANSIENT_DELAY,
            budget: ResourceBudget::default(),
            confirm_depth: None,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// clamped to at least one attempt
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_nonce_delay(mut self, delay: Duration) -> Self {
        self.nonce_delay = delay;
        self
    }

    pub fn with_transient_delay(mut self, delay: Duration) -> Self {
        self.transient_delay = delay;
        self
    }

    pub fn with_budget(mut self, budget: ResourceBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn with_confirm_depth(mut self, depth: u64) -> Self {
        self.confirm_depth = Some(depth);
        self
    }
}

/// everything a worker borrows from the run
pub struct WorkerContext {
    pub routes: Arc<RoutePool>,
    pub sequences: Arc<SequenceAllocator>,
    pub locks: Arc<IdentityLocks>,
    pub ledger: Arc<dyn Ledger>,
    pub builder: Arc<dyn PayloadBuilder>,
    pub events: Arc<dyn EventSink>,
    pub config: WorkerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Preparing,
    Sending,
    Reconciling,
    RetryingTransient,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Succeeded {
        sequence: u64,
        hash: String,
    },
    Failed {
        class: ErrorClass,
        /// retry budget ran out rather than a terminal error
        exhausted: bool,
        reason: String,
    },
}

impl SubmissionResult {
    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionResult::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub id: u64,
    pub identity: IdentityId,
    pub attempts: u32,
    pub result: SubmissionResult,
}

/// one logical submission for one identity.
///
/// holds the identity lock for its whole lifetime, so at most one worker
/// per identity is past `Preparing` at any time.
pub struct SubmissionWorker {
    id: u64,
    identity: IdentityId,
    attempts: u32,
    last_error: Option<ErrorClass>,
    state: WorkerState,
    ctx: Arc<WorkerContext>,
}

impl SubmissionWorker {
    pub fn new(id: u64, identity: IdentityId, ctx: Arc<WorkerContext>) -> Self {
        Self {
            id,
            identity,
            attempts: 0,
            last_error: None,
            state: WorkerState::Preparing,
            ctx,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn state(&self) -> WorkerState {
        self.state
    }

    #[inline]
    pub fn last_error(&self) -> Option<ErrorClass> {
        self.last_error
    }

    /// drive the submission to a terminal state
    pub async fn run(mut self) -> SubmissionOutcome {
        let guard = self.ctx.locks.lock(&self.identity).await;
        let result = self.drive(&guard).await;
        drop(guard);

        let sequence = match &result {
            SubmissionResult::Succeeded { sequence, hash } => {
                self.state = WorkerState::Succeeded;
                log::debug!(
                    "worker: #{} {} seq {} accepted as {} after {} attempt(s)",
                    self.id,
                    self.identity,
                    sequence,
                    hash,
                    self.attempts
                );
                Some(*sequence)
            }
            SubmissionResult::Failed { class, reason, .. } => {
                self.state = WorkerState::Failed;
                log::warn!(
                    "worker: #{} {} failed after {} attempt(s) ({:?}): {}",
                    self.id,
                    self.identity,
                    self.attempts,
                    class,
                    reason
                );
                None
            }
        };

        self.ctx.events.emit(&Event::SubmissionFinished {
            id: self.id,
            identity: self.identity.clone(),
            attempts: self.attempts,
            succeeded: result.is_success(),
            sequence,
        });

        SubmissionOutcome {
            id: self.id,
            identity: self.identity,
            attempts: self.attempts,
            result,
        }
    }

    async fn drive(&mut self, guard: &IdentityGuard) -> SubmissionResult {
        let max = self.ctx.config.max_retries.max(1);
        let mut reason = String::new();

        while self.attempts < max {
            self.attempts += 1;
            self.state = WorkerState::Sending;

            let error = match self.send_once().await {
                Ok((sequence, receipt)) => return self.accept(guard, sequence, receipt).await,
                Err(error) => error,
            };

            let class = classify(&error);
            self.last_error = Some(class);
            reason = error.to_string();
            log::debug!(
                "worker: #{} {} attempt {}/{} failed ({:?}): {}",
                self.id,
                self.identity,
                self.attempts,
                max,
                class,
                reason
            );

            match class {
                ErrorClass::SequenceConflict => {
                    if self.attempts >= max {
                        break;
                    }
                    self.state = WorkerState::Reconciling;
                    if let Err(e) = self.reconcile(guard).await {
                        return SubmissionResult::Failed {
                            class,
                            exhausted: false,
                            reason: format!("{}; reconcile failed: {}", reason, e),
                        };
                    }
                }
                ErrorClass::Transient | ErrorClass::RouteUnavailable => {
                    if self.attempts < max {
                        self.state = WorkerState::RetryingTransient;
                        tokio::time::sleep(self.ctx.config.transient_delay).await;
                    }
                }
                ErrorClass::Fatal => {
                    return SubmissionResult::Failed {
                        class,
                        exhausted: false,
                        reason,
                    };
                }
            }
        }

        SubmissionResult::Failed {
            class: self.last_error.unwrap_or(ErrorClass::Fatal),
            exhausted: true,
            reason,
        }
    }

    /// one physical attempt: build, pick a route, enqueue, await
    async fn send_once(&self) -> Result<(u64, Receipt), SendError> {
        let sequence = self
            .ctx
            .sequences
            .current(&self.identity)
            .ok_or_else(|| SendError::SequenceConflict("no cached sequence".into()))?;

        let budget = self.ctx.config.budget;
        let payload = self.ctx.builder.build(&self.identity, sequence, &budget)?;

        let route = self.ctx.routes.select().ok_or(SendError::RouteUnavailable)?;
        log::trace!(
            "worker: #{} {} seq {} -> {}",
            self.id,
            self.identity,
            sequence,
            route.id()
        );

        let (task, handle) = Task::new(self.identity.clone(), sequence, payload, budget);
        route.enqueue(task);

        // sender dropped: the route went away with our task queued
        let receipt = handle.await.unwrap_or(Err(SendError::RouteUnavailable))?;
        Ok((sequence, receipt))
    }

    async fn accept(
        &self,
        guard: &IdentityGuard,
        sequence: u64,
        receipt: Receipt,
    ) -> SubmissionResult {
        if let Err(e) = self.ctx.sequences.advance(guard) {
            return SubmissionResult::Failed {
                class: ErrorClass::Fatal,
                exhausted: false,
                reason: e.to_string(),
            };
        }

        if let Some(depth) = self.ctx.config.confirm_depth {
            self.confirm(&receipt.hash, depth).await;
        }

        SubmissionResult::Succeeded {
            sequence,
            hash: receipt.hash.0,
        }
    }

    async fn confirm(&self, hash: &TxHash, depth: u64) {
        match self.ctx.ledger.wait_for_depth(hash, depth).await {
            Ok(receipt) => log::debug!(
                "worker: #{} {} reached depth {}",
                self.id,
                receipt.hash,
                receipt.depth
            ),
            Err(e) => log::warn!(
                "worker: #{} wait for depth {} on {}: {}",
                self.id,
                depth,
                hash,
                e
            ),
        }
    }

    /// refresh the cached sequence, backing off `n * nonce_delay` per try
    async fn reconcile(&mut self, guard: &IdentityGuard) -> swarm_sequence::Result<u64> {
        let tries = self.ctx.config.max_retries.max(1);
        let mut last = swarm_sequence::Error::Closed;

        for n in 1..=tries {
            tokio::time::sleep(self.ctx.config.nonce_delay * n).await;
            match self.ctx.sequences.reconcile(guard).await {
                Ok(sequence) => {
                    log::debug!(
                        "worker: #{} {} reconciled to {}",
                        self.id,
                        self.identity,
                        sequence
                    );
                    return Ok(sequence);
                }
                Err(e) => {
                    log::debug!("worker: #{} reconcile try {}/{}: {}", self.id, n, tries, e);
                    last = e;
                }
            }
        }

        Err(last)
    }
}
