//! Configuration for the mirror target.
//!
//! Configuration is passed to [`MirrorTarget::new()`](crate::MirrorTarget::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use mirror_target::config::MirrorConfig;
//!
//! let config = MirrorConfig {
//!     local_node_id: "node-1".into(),
//!     ..Default::default()
//! };
//! assert_eq!(config.cache_namespace, "$mirror");
//! ```
//!
//! # Sizing
//!
//! The duplicate-id caches and the settle-token pool are both sized to
//! the link's credit window, which is the maximum number of deliveries
//! that can be in flight at once. `dedup_window` overrides that for the
//! caches only, useful in tests that want to observe FIFO eviction
//! without pushing a full window of messages through.

use serde::{Deserialize, Serialize};

/// Configuration for one mirror target endpoint.
///
/// # Fields
///
/// - `local_node_id`: identity of this broker. Substituted as the
///   origin of message references that carry no origin property.
/// - `cache_namespace`: prefix for the durable duplicate-id cache keys
///   (`"<namespace>_<origin>"` in the post office's cache registry).
/// - `dedup_window`: optional override for the duplicate-id cache
///   capacity. Defaults to the link's credit window.
/// - `log_consumer_check`: when enabled and debug logging is active,
///   an ack against a queue that has live consumers is logged; a
///   mirrored queue is not normally consumed on the target side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// The identity of the local broker.
    pub local_node_id: String,

    /// Namespace prefix for persisted duplicate-id caches.
    #[serde(default = "default_cache_namespace")]
    pub cache_namespace: String,

    /// Override for the duplicate-id cache capacity.
    #[serde(default)]
    pub dedup_window: Option<usize>,

    /// Log acks that land on queues with live consumers.
    #[serde(default = "default_true")]
    pub log_consumer_check: bool,
}

fn default_cache_namespace() -> String {
    "$mirror".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            local_node_id: "local.dev.node.default".to_string(),
            cache_namespace: default_cache_namespace(),
            dedup_window: None,
            log_consumer_check: true,
        }
    }
}

impl MirrorConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            ..Default::default()
        }
    }

    /// The duplicate-id cache capacity for a link with the given
    /// credit window.
    pub fn dedup_capacity(&self, credit_window: usize) -> usize {
        self.dedup_window.unwrap_or(credit_window)
    }
}
