//! Fuzz target: gateway configuration loading.
//!
//! Arbitrary documents are either rejected with an error or produce a
//! configuration whose routes all name a configured backend.

#![no_main]

use bastion_gateway::GatewayConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(json) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = GatewayConfig::from_json(json) {
        for route in config.routes.iter() {
            assert!(config.backends.contains_key(&route.backend));
        }
    }
});
