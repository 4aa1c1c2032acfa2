//! Fuzz target for administrative descriptor parsing.
//!
//! Admin event bodies are JSON strings produced by the source broker.
//! The parsers must never panic on arbitrary input, and descriptors we
//! emit ourselves must round-trip.

#![no_main]

use libfuzzer_sys::fuzz_target;
use mirror_target::post_office::{AddressInfo, QueueConfig};

fuzz_target!(|body: &str| {
    // Should return Err on garbage, never panic.
    let _ = AddressInfo::from_json(body);
    let _ = QueueConfig::from_json(body);

    // Anything that parses must survive a round-trip.
    if let Ok(info) = AddressInfo::from_json(body) {
        let reparsed = AddressInfo::from_json(&info.to_json()).expect("round-trip");
        assert_eq!(reparsed.name, info.name);
    }
    if let Ok(config) = QueueConfig::from_json(body) {
        let reparsed = QueueConfig::from_json(&config.to_json()).expect("round-trip");
        assert_eq!(reparsed.name, config.name);
        assert_eq!(reparsed.address, config.address);
    }
});
