//! Fuzz target for tunnel configuration inputs
//!
//! Role names and secrets come from the command line and config files.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shroud_core::{Role, TunnelConfig};
use shroud_crypto::SessionKey;

#[derive(Debug, Arbitrary)]
struct ConfigInput {
    listen_addr: String,
    remote_addr: String,
    role: String,
    secret: String,
}

fuzz_target!(|input: ConfigInput| {
    let role = input.role.parse::<Role>().unwrap_or_default();

    if let Ok(key) = SessionKey::derive(&input.secret) {
        assert!(key.as_bytes().iter().all(u8::is_ascii_hexdigit));
    }

    let _ = TunnelConfig::new(input.listen_addr, input.remote_addr, role, &input.secret);
});
