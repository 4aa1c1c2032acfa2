//! Idempotent application of administrative events.
//!
//! The source broker owns address and queue lifecycle; this side just
//! follows along. Replays, races with local operators, and reconnect
//! retransmissions all make "already exists" and "does not exist" the
//! normal case rather than an error, so every operation here is
//! idempotent. Failures that are not idempotent noise are logged at
//! warn and swallowed; an administrative event must never stall the
//! stream.

use crate::metrics;
use crate::post_office::{AddressInfo, DeleteQueueSpec, PostOffice, QueueConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Applies address and queue events against the local post office.
pub struct AdminApplier {
    post_office: Arc<dyn PostOffice>,
}

impl AdminApplier {
    pub fn new(post_office: Arc<dyn PostOffice>) -> Self {
        Self { post_office }
    }

    /// Register an address; succeeds silently if already present.
    pub async fn add_address(&self, info: AddressInfo) {
        debug!(address = %info.name, "adding address");
        match self.post_office.add_address(info.clone()).await {
            Ok(()) => metrics::record_admin("add_address", "applied"),
            Err(e) if e.is_idempotent() => {
                debug!(address = %info.name, "address already present");
                metrics::record_admin("add_address", "already_exists");
            }
            Err(e) => {
                warn!(address = %info.name, error = %e, "failed to add address");
                metrics::record_admin("add_address", "error");
            }
        }
    }

    /// Remove an address; a missing address is success.
    pub async fn delete_address(&self, info: AddressInfo) {
        debug!(address = %info.name, "deleting address");
        match self.post_office.remove_address(&info.name).await {
            Ok(()) => metrics::record_admin("delete_address", "applied"),
            Err(e) if e.is_idempotent() => {
                // It was removed from somewhere else, which is fine.
                debug!(address = %info.name, "address was previously removed");
                metrics::record_admin("delete_address", "not_existent");
            }
            Err(e) => {
                warn!(address = %info.name, error = %e, "failed to delete address");
                metrics::record_admin("delete_address", "error");
            }
        }
    }

    /// Create a queue; an existing queue is success.
    pub async fn create_queue(&self, config: QueueConfig) {
        debug!(queue = %config.name, address = %config.address, "creating queue");
        let name = config.name.clone();
        match self.post_office.create_queue(config).await {
            Ok(()) => metrics::record_admin("create_queue", "applied"),
            Err(e) if e.is_idempotent() => {
                debug!(queue = %name, "queue could not be created, already existed");
                metrics::record_admin("create_queue", "already_exists");
            }
            Err(e) => {
                warn!(queue = %name, error = %e, "failed to create queue");
                metrics::record_admin("create_queue", "error");
            }
        }
    }

    /// Destroy a queue; a missing queue is success. The destroy is
    /// forced and skips consumer checks; the source owns lifecycle.
    pub async fn delete_queue(&self, address: &str, queue: &str) {
        debug!(queue = %queue, address = %address, "destroying queue");
        match self
            .post_office
            .delete_queue(address, queue, DeleteQueueSpec::mirrored())
            .await
        {
            Ok(()) => metrics::record_admin("delete_queue", "applied"),
            Err(e) if e.is_idempotent() => {
                debug!(queue = %queue, "queue was previously removed");
                metrics::record_admin("delete_queue", "not_existent");
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "failed to destroy queue");
                metrics::record_admin("delete_queue", "error");
            }
        }
    }
}
