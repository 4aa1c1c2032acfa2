//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Event demultiplexing by kind
//! - Replay outcomes (applied / duplicate)
//! - Ack reconciliation stages and outcomes
//! - Administrative event outcomes
//! - Settlement volume
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `mirror_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current
//! state, histograms track distributions.
//!
//! # Usage
//!
//! ```rust,no_run
//! use mirror_target::metrics;
//!
//! // In the demux after resolving the event kind
//! metrics::record_event("data_message");
//!
//! // In the reconciler when a stage locates the reference
//! metrics::record_ack_stage_hit("direct");
//! ```

use metrics::{counter, histogram};
use std::time::Duration;

/// Record one demultiplexed event by kind.
pub fn record_event(kind: &str) {
    counter!("mirror_events_total", "kind" => kind.to_string()).increment(1);
}

/// Record an unrecognized control event (logged and settled).
pub fn record_unknown_event() {
    counter!("mirror_events_unknown_total").increment(1);
}

/// Record a replayed message committed into the post office.
pub fn record_replay_applied(origin: &str) {
    counter!("mirror_replay_applied_total", "origin" => origin.to_string()).increment(1);
}

/// Record a suppressed retransmission.
pub fn record_replay_duplicate(origin: &str) {
    counter!("mirror_replay_duplicate_total", "origin" => origin.to_string()).increment(1);
}

/// Record a failed replay (logged, settled, not applied).
pub fn record_replay_failed(origin: &str) {
    counter!("mirror_replay_failed_total", "origin" => origin.to_string()).increment(1);
}

/// Record replay commit latency.
pub fn record_replay_duration(duration: Duration) {
    histogram!("mirror_replay_duration_seconds").record(duration.as_secs_f64());
}

/// Record an ack located and applied at the given stage.
pub fn record_ack_stage_hit(stage: &str) {
    counter!("mirror_ack_applied_total", "stage" => stage.to_string()).increment(1);
}

/// Record an ack dropped without being applied.
pub fn record_ack_dropped(reason: &str) {
    counter!("mirror_ack_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// Record an administrative event outcome.
pub fn record_admin(operation: &str, outcome: &str) {
    counter!(
        "mirror_admin_events_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record one settled delivery.
pub fn record_settle() {
    counter!("mirror_settled_total").increment(1);
}

/// Record a malformed event (parse failure; settled without applying).
pub fn record_malformed_event(kind: &str) {
    counter!("mirror_malformed_events_total", "kind" => kind.to_string()).increment(1);
}
