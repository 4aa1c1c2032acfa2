//! Fuzz target for event-kind and ack-reason decoding.
//!
//! Both decoders face the wire directly: event-kind labels come from
//! whatever the source put in the annotation, ack reasons from an
//! arbitrary integer. Neither may panic, and unknown inputs must
//! degrade the documented way (kind -> None, reason -> Normal).

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_target::event::{AckReason, EventKind};

fuzz_target!(|data: (Option<&str>, i64)| {
    let (label, reason_byte) = data;

    let kind = EventKind::resolve(label);
    if label.is_none() {
        assert_eq!(kind, Some(EventKind::DataMessage));
    }
    if let Some(kind) = kind {
        // Labels are stable and never empty.
        assert!(!kind.as_str().is_empty());
    }

    let reason = AckReason::from_wire(reason_byte);
    // Decoding is total and re-encoding stays in the wire range.
    assert!((0..=4).contains(&reason.as_wire()));
});
