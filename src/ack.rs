// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Acknowledgement reconciliation.
//!
//! A post-ack event names a `(origin, internal id, queue, reason)` and
//! asks this side to remove the same message its source just removed.
//! The catch is that the referenced message may still be in flight:
//! its own replay can race the ack through persistence, it may sit in
//! the queue's intermediate (not-yet-visible) additions, or it may
//! have been pushed out to paged storage. The reconciler works through
//! those tiers as an explicit state machine:
//!
//! ```text
//! Direct ──miss──▶ AfterFlush ──miss──▶ Paged
//!   │ (queue scan)    │ (wait for I/O,     │ (scan paged storage,
//!   │                 │  flush intermediate,│  unless the reason is
//!   ▼                 ▼  retry)             ▼  Expired)
//!  apply             apply               apply / settle-and-drop
//! ```
//!
//! Stages advance monotonically and each runs at most once, so every
//! ack terminates in bounded work. Whatever the outcome, the delivery
//! is settled: an ack that cannot be applied (queue gone, reference
//! purged) is dropped with a warning rather than stalling the stream.
//!
//! Every state-machine step runs on the handler runtime: the
//! after-I/O hook is awaited as a future rather than executing
//! reconciliation on a storage callback thread.

use crate::config::MirrorConfig;
use crate::event::AckReason;
use crate::message::{MessageReference, ReferenceIdSupplier};
use crate::metrics;
use crate::post_office::{PostOffice, Queue, Storage};
use crate::scope::ControllerScope;
use crate::settle::SettleToken;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// One remote acknowledgement awaiting local reconciliation.
#[derive(Debug, Clone)]
pub struct PendingAck {
    pub origin: String,
    pub internal_id: u64,
    pub queue: String,
    pub reason: AckReason,
}

/// Stage of the reconciliation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RetryStage {
    /// Scan the in-memory queue directly.
    Direct,
    /// Wait for in-flight persistence, flush the queue's intermediate
    /// additions, then retry the scan.
    AfterFlush,
    /// Scan paged storage (skipped entirely for expired acks).
    Paged,
}

impl RetryStage {
    /// The next stage, if any. Strictly ascending: no stage repeats.
    pub fn next(self) -> Option<RetryStage> {
        match self {
            Self::Direct => Some(Self::AfterFlush),
            Self::AfterFlush => Some(Self::Paged),
            Self::Paged => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::AfterFlush => "after_flush",
            Self::Paged => "paged",
        }
    }
}

/// Result of handing an ack to the reconciler.
pub enum AckOutcome {
    /// The reconciler took ownership; it will settle when done.
    Handled,
    /// The ack was dropped (target queue missing); the caller still
    /// owns settlement.
    NotApplied(SettleToken),
}

/// Locates and applies remote acknowledgements.
pub struct AckReconciler {
    post_office: Arc<dyn PostOffice>,
    storage: Arc<dyn Storage>,
    supplier: Arc<ReferenceIdSupplier>,
    log_consumer_check: bool,
}

impl AckReconciler {
    pub fn new(
        post_office: Arc<dyn PostOffice>,
        storage: Arc<dyn Storage>,
        supplier: Arc<ReferenceIdSupplier>,
        config: &MirrorConfig,
    ) -> Self {
        Self {
            post_office,
            storage,
            supplier,
            log_consumer_check: config.log_consumer_check,
        }
    }

    /// Reconcile one remote ack.
    ///
    /// The first stage runs inline; on a miss the remaining stages are
    /// spawned so a stalled ack never blocks the event stream behind it.
    pub async fn post_acknowledge(&self, ack: PendingAck, token: SettleToken) -> AckOutcome {
        let queue = match self.post_office.locate_queue(&ack.queue).await {
            Some(queue) => queue,
            None => {
                warn!(
                    queue = %ack.queue,
                    origin = %ack.origin,
                    internal_id = ack.internal_id,
                    "queue not found on mirror target, ignoring ack"
                );
                metrics::record_ack_dropped("queue_missing");
                return AckOutcome::NotApplied(token);
            }
        };

        // A mirrored queue is not normally consumed on the target side.
        if self.log_consumer_check && queue.consumer_count() > 0 {
            debug!(
                queue = %ack.queue,
                consumers = queue.consumer_count(),
                internal_id = ack.internal_id,
                "queue has consumers while delivering ack"
            );
        }

        trace!(
            queue = %ack.queue,
            origin = %ack.origin,
            internal_id = ack.internal_id,
            reason = ack.reason.as_str(),
            "reconciling remote ack"
        );

        let mut task = RetryTask {
            queue,
            storage: Arc::clone(&self.storage),
            supplier: Arc::clone(&self.supplier),
            ack,
            token: Some(token),
        };

        if matches!(task.step(RetryStage::Direct).await, StepOutcome::Resolved) {
            return AckOutcome::Handled;
        }

        tokio::spawn(ControllerScope::enter(task.run(RetryStage::AfterFlush)));
        AckOutcome::Handled
    }
}

enum StepOutcome {
    /// The ack was applied or deliberately dropped; settlement is
    /// scheduled. The machine stops.
    Resolved,
    /// The reference was not found at this stage.
    Missed,
}

/// The reconciliation state for one ack, driven stage by stage.
struct RetryTask {
    queue: Arc<dyn Queue>,
    storage: Arc<dyn Storage>,
    supplier: Arc<ReferenceIdSupplier>,
    ack: PendingAck,
    token: Option<SettleToken>,
}

impl RetryTask {
    /// Drive the machine from `start` until a stage resolves.
    async fn run(mut self, start: RetryStage) {
        let mut stage = start;
        loop {
            if matches!(self.step(stage).await, StepOutcome::Resolved) {
                return;
            }
            match stage.next() {
                Some(next) => {
                    debug!(
                        queue = %self.ack.queue,
                        origin = %self.ack.origin,
                        internal_id = self.ack.internal_id,
                        from = stage.as_str(),
                        to = next.as_str(),
                        "reference not found, advancing retry stage"
                    );
                    stage = next;
                }
                None => return,
            }
        }
    }

    /// Execute a single stage.
    async fn step(&mut self, stage: RetryStage) -> StepOutcome {
        match stage {
            RetryStage::Direct => self.try_remove(stage).await,
            RetryStage::AfterFlush => {
                // Let a racing replay finish persisting, then make its
                // additions visible before retrying.
                self.storage.drained().await;
                self.queue.flush_intermediate().await;
                self.try_remove(stage).await
            }
            RetryStage::Paged => self.paged_step().await,
        }
    }

    /// Attempt removal from the in-memory queue; apply on a hit.
    async fn try_remove(&mut self, stage: RetryStage) -> StepOutcome {
        let reference = self
            .queue
            .remove_with_supplied_id(&self.ack.origin, self.ack.internal_id, &self.supplier)
            .await;
        match reference {
            Some(reference) => {
                metrics::record_ack_stage_hit(stage.as_str());
                self.apply(reference).await;
                self.settle();
                StepOutcome::Resolved
            }
            None => StepOutcome::Missed,
        }
    }

    /// The paged stage always resolves: it applies, or settles and
    /// drops.
    async fn paged_step(&mut self) -> StepOutcome {
        if self.ack.reason == AckReason::Expired {
            // No need to chase an expired message into paging: it will
            // expire again when depaged.
            debug!(
                queue = %self.ack.queue,
                internal_id = self.ack.internal_id,
                "expired ack, skipping paged scan"
            );
            metrics::record_ack_dropped("expired_skip_paging");
            self.settle();
            return StepOutcome::Resolved;
        }

        // A depage may have just made the reference visible; retry the
        // cheap removal once before committing to a scan.
        if matches!(self.try_remove(RetryStage::Paged).await, StepOutcome::Resolved) {
            return StepOutcome::Resolved;
        }

        let Some(subscription) = self.queue.page_subscription() else {
            debug!(
                queue = %self.ack.queue,
                origin = %self.ack.origin,
                internal_id = self.ack.internal_id,
                "reference not found and queue is not paging; it may have been purged"
            );
            metrics::record_ack_dropped("not_found");
            self.settle();
            return StepOutcome::Resolved;
        };

        let compare = paged_identity_comparator(
            Arc::clone(&self.supplier),
            self.ack.origin.clone(),
            self.ack.internal_id,
        );
        match subscription.scan(&compare).await {
            Some(index) => {
                if let Err(e) = subscription.ack_at(index).await {
                    warn!(
                        queue = %self.ack.queue,
                        internal_id = self.ack.internal_id,
                        error = %e,
                        "failed to ack paged reference"
                    );
                } else {
                    metrics::record_ack_stage_hit(RetryStage::Paged.as_str());
                }
            }
            None => {
                debug!(
                    queue = %self.ack.queue,
                    origin = %self.ack.origin,
                    internal_id = self.ack.internal_id,
                    "reference not found after paged scan; it may have been purged"
                );
                metrics::record_ack_dropped("not_found");
            }
        }
        self.settle();
        StepOutcome::Resolved
    }

    /// Apply the ack to a removed reference, with no consumer attached.
    async fn apply(&self, reference: MessageReference) {
        let applied = match self.ack.reason {
            AckReason::Expired => self.queue.expire(reference).await,
            reason => self.queue.acknowledge(reference, reason).await,
        };
        if let Err(e) = applied {
            warn!(
                queue = %self.ack.queue,
                internal_id = self.ack.internal_id,
                error = %e,
                "failed to apply mirrored ack"
            );
        }
    }

    /// Defer settlement until in-flight persistence completes.
    fn settle(&mut self) {
        if let Some(token) = self.token.take() {
            self.storage
                .execute_on_completion(token.into_completion().into_op());
        }
    }
}

/// 3-way comparator matching paged references against one replicated
/// identity. Equal origins compare by internal id; a reference from a
/// different origin always orders `Less` so the scan advances past it.
pub fn paged_identity_comparator(
    supplier: Arc<ReferenceIdSupplier>,
    origin: String,
    internal_id: u64,
) -> impl Fn(&MessageReference) -> Ordering + Send + Sync {
    move |reference| {
        if supplier.origin_of(reference) == origin {
            let ref_id = supplier.internal_id_of(reference).unwrap_or(0);
            ref_id.cmp(&internal_id)
        } else {
            Ordering::Less
        }
    }
}
