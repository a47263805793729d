//! Fuzz target: `Authorization` header parsing.
//!
//! Arbitrary header values must never panic, and an accepted token is
//! always a non-empty, whitespace-free slice of the input.

#![no_main]

use bastion_auth::parse_bearer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(token) = parse_bearer(Some(raw)) {
        assert!(!token.is_empty());
        assert!(!token.contains(char::is_whitespace));
        assert!(raw.contains(token));
    }
});
