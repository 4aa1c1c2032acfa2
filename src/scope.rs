//! Task-local marker suppressing re-mirroring of replayed operations.
//!
//! Applying a replicated event mutates the local post office, and those
//! mutations are observed by the local mirror *source*, which would
//! happily mirror them right back, creating a replication loop. The
//! loop is broken here: every dispatch runs inside a scoped task-local
//! marker, and the source checks [`ControllerScope::is_active()`]
//! before emitting an outbound mirror event.
//!
//! The marker is bound with stack discipline around the dispatch
//! future (and around spawned ack-retry continuations), never stored
//! in process-global state, so it cannot leak past the operation that
//! set it.

use std::future::Future;

tokio::task_local! {
    static CONTROLLER_IN_USE: ();
}

/// Scoped marker identifying mirror-induced mutations.
pub struct ControllerScope;

impl ControllerScope {
    /// Run a future with the controller marker bound.
    pub async fn enter<F: Future>(fut: F) -> F::Output {
        CONTROLLER_IN_USE.scope((), fut).await
    }

    /// Whether the current task is applying a mirrored event.
    ///
    /// The local mirror source must skip mirroring any operation
    /// observed while this returns `true`.
    pub fn is_active() -> bool {
        CONTROLLER_IN_USE.try_with(|_| ()).is_ok()
    }
}
