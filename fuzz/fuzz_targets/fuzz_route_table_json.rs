//! Fuzz target: route table deserialization and longest-prefix lookup.
//!
//! Any table that deserializes must answer lookups without panicking, and a
//! hit must actually cover the probed path.

#![no_main]

use bastion_core::RouteTable;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(table) = serde_json::from_slice::<RouteTable>(data) else {
        return;
    };
    for route in table.iter() {
        let child = format!("{}/child", route.prefix.trim_end_matches('/'));
        if let Some(hit) = table.longest_match(&child) {
            assert!(hit.matches(&child));
            assert!(hit.prefix.len() >= route.prefix.len() || !route.matches(&child));
        }
    }
});
