//! Fuzz target for ARQ segment parsing
//!
//! Datagrams come straight off the network, so decoding must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shroud_transport::arq::Segment;

fuzz_target!(|data: &[u8]| {
    if let Ok(segment) = Segment::decode(data) {
        // Anything accepted re-encodes to the same bytes
        assert_eq!(segment.encode().as_deref(), Ok(data));
    }
});
