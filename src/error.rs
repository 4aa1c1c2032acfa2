// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror target.
//!
//! The guiding rule is that the replication stream must not stall: a
//! failure while applying one event is localized to that event, logged,
//! and the delivery is still settled so credit keeps flowing back to the
//! source. Errors therefore fall into two buckets: the ones that are
//! *expected* during normal convergence (an address deleted twice, a
//! queue created twice) and the ones that are genuine per-event failures.
//!
//! # Error Categories
//!
//! | Error Type | Policy |
//! |------------|--------|
//! | `AddressExists` | Idempotent success on add |
//! | `AddressNotFound` | Idempotent success on delete |
//! | `QueueExists` | Idempotent success on create |
//! | `QueueNotFound` | Idempotent success on delete; warn + drop on ack |
//! | `Descriptor` | Malformed admin JSON; warn, settle |
//! | `MissingAnnotation` | Malformed event; warn, settle |
//! | `BadBody` | Body of the wrong shape; warn, settle |
//! | `Routing` | Per-target routing failure; warn, continue |
//! | `Storage` | Journal/persistence failure; warn, settle |
//! | `PostOffice` | Any other broker-side failure; warn, settle |
//!
//! Use [`MirrorError::is_idempotent()`] to check whether an admin
//! operation should treat the error as success.

use thiserror::Error;

/// Result type alias for mirror target operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while applying replicated events.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// The address is already registered.
    ///
    /// Raised by the post office on `add_address`. The admin applier
    /// treats this as success, since the source owns the address lifecycle
    /// and may legitimately replay an add we have already seen.
    #[error("address already exists: {0}")]
    AddressExists(String),

    /// The address is not registered.
    ///
    /// Raised by the post office on `remove_address`. Treated as
    /// success on delete: it was removed from somewhere else.
    #[error("address does not exist: {0}")]
    AddressNotFound(String),

    /// The queue already exists.
    ///
    /// Raised by the post office on `create_queue`. Treated as success.
    #[error("queue already exists: {0}")]
    QueueExists(String),

    /// The queue does not exist.
    ///
    /// Treated as success on delete. On an ack it means the target
    /// queue is gone; the ack is dropped (warn) and the delivery is
    /// settled so the source does not block on orphaned acks.
    #[error("queue does not exist: {0}")]
    QueueNotFound(String),

    /// An administrative descriptor body failed to parse.
    ///
    /// Admin events carry their address/queue descriptors as JSON
    /// strings. A parse failure is malformed data at the source; the
    /// event is logged and settled.
    #[error("descriptor parse error: {0}")]
    Descriptor(#[from] serde_json::Error),

    /// A required annotation is absent or of the wrong type.
    #[error("missing or ill-typed annotation: {0}")]
    MissingAnnotation(&'static str),

    /// The event body does not have the shape its kind requires.
    #[error("bad event body: expected {expected}")]
    BadBody { expected: &'static str },

    /// Routing a replayed message to one named target queue failed.
    ///
    /// Only the failing target is affected; remaining targets are
    /// still routed.
    #[error("routing error on queue {queue}: {message}")]
    Routing { queue: String, message: String },

    /// Persistence-layer failure (journal record, id generation).
    #[error("storage error: {0}")]
    Storage(String),

    /// Any other broker-side failure surfaced by a collaborator.
    #[error("post office error: {0}")]
    PostOffice(String),
}

impl MirrorError {
    /// Check whether an administrative operation should treat this
    /// error as success.
    ///
    /// Add/create collisions and delete misses are the normal noise of
    /// two brokers converging; they are logged at debug and swallowed.
    pub fn is_idempotent(&self) -> bool {
        matches!(
            self,
            Self::AddressExists(_)
                | Self::AddressNotFound(_)
                | Self::QueueExists(_)
                | Self::QueueNotFound(_)
        )
    }
}
