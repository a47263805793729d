//! Fuzz target: `X-Forwarded-For` first-hop extraction.

#![no_main]

use bastion_limiter::first_forwarded_hop;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(chain) = std::str::from_utf8(data) {
        let _ = first_forwarded_hop(chain);
    }
});
