// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replay transactions.
//!
//! Each replayed message is applied inside one transaction so the
//! duplicate-id insert and the queue additions share a single outcome:
//! commit publishes both, abort discards both. The commit of the
//! durable record is the linearization point for "message replicated";
//! everything scheduled on the transaction runs strictly after it.
//!
//! Settle operations are registered separately from ordinary commit
//! operations: a delivery must be settled even when its transaction
//! aborts (otherwise credit stops flowing and the stream stalls), so
//! on abort the settle operations are re-routed to the storage layer's
//! after-I/O hook instead of being dropped.

use crate::dedup::StagedId;
use crate::error::Result;
use crate::post_office::{CompletionFn, Storage};
use std::sync::Arc;

/// State shared by one replayed message's effects.
pub struct MirrorTransaction {
    storage: Arc<dyn Storage>,
    staged: Vec<StagedId>,
    commit_ops: Vec<CompletionFn>,
    settle_ops: Vec<CompletionFn>,
    committed: bool,
}

impl MirrorTransaction {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            staged: Vec::new(),
            commit_ops: Vec::new(),
            settle_ops: Vec::new(),
            committed: false,
        }
    }

    /// Bind a tentative duplicate-id insert to this transaction.
    pub fn stage_duplicate(&mut self, staged: StagedId) {
        self.staged.push(staged);
    }

    /// Register an operation to run after commit (queue additions and
    /// other routing effects).
    pub fn add_commit_op(&mut self, op: CompletionFn) {
        self.commit_ops.push(op);
    }

    /// Register a settle operation. Runs after commit like a commit
    /// operation, but survives an abort by draining to the storage
    /// layer's after-I/O hook.
    pub fn add_settle_op(&mut self, op: CompletionFn) {
        self.settle_ops.push(op);
    }

    /// Commit: durably record the transaction, publish staged
    /// duplicate ids, run commit operations, then settle operations.
    pub async fn commit(mut self) -> Result<()> {
        self.storage.commit_record().await?;

        for staged in self.staged.drain(..) {
            staged.confirm();
        }
        for op in self.commit_ops.drain(..) {
            op();
        }
        for op in self.settle_ops.drain(..) {
            op();
        }
        self.committed = true;
        Ok(())
    }

    /// Abort: discard staged inserts and commit operations, keep the
    /// settle path alive.
    pub fn abort(self) {
        // Drop does the work.
    }
}

impl Drop for MirrorTransaction {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // Staged ids revert by dropping; routing effects are discarded.
        self.staged.clear();
        self.commit_ops.clear();
        for op in self.settle_ops.drain(..) {
            self.storage.execute_on_completion(op);
        }
    }
}
