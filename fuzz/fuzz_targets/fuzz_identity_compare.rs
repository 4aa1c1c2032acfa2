//! Fuzz target for the paged-identity comparator.
//!
//! The paged scan trusts this comparator to be a total, consistent
//! 3-way order over references; a panic or an inconsistent answer
//! would corrupt ack reconciliation on paged queues.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mirror_target::ack::paged_identity_comparator;
use mirror_target::message::{Message, MessageReference, ReferenceIdSupplier};
use std::cmp::Ordering;
use std::sync::Arc;

fuzz_target!(|data: (String, u64, String, u64, bool)| {
    let (target_origin, target_id, ref_origin, ref_id, bare) = data;

    let supplier = Arc::new(ReferenceIdSupplier::new("local-node"));
    let compare = paged_identity_comparator(supplier, target_origin.clone(), target_id);

    let mut message = Message::new("a1", Bytes::new());
    if !bare {
        message.set_replicated_identity(&ref_origin, ref_id);
    }
    let reference = MessageReference::new(Arc::new(message));

    let ordering = compare(&reference);

    let effective_origin = if bare { "local-node" } else { ref_origin.as_str() };
    if effective_origin == target_origin {
        let effective_id = if bare { 0 } else { ref_id };
        assert_eq!(ordering, effective_id.cmp(&target_id));
    } else {
        // Foreign origins always advance the scan.
        assert_eq!(ordering, Ordering::Less);
    }

    // Deterministic: same input, same answer.
    assert_eq!(compare(&reference), ordering);
});
