//! Fuzz target for signed metadata parsing
//!
//! Exercises both container forms (signed/signatures and payload envelopes),
//! the tagged link/layout payload, and the structural validation applied at
//! load time.

#![no_main]

use intoto::canonical::encode_canonical;
use intoto::models::SignedMetadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(metadata) = SignedMetadata::from_slice(data) {
        let _ = encode_canonical(metadata.metadata());
        let _ = metadata.metadata().type_name();
        let _ = metadata.signatures().len();

        // Whatever parsed must serialize and parse again
        if let Ok(json) = metadata.to_json_pretty() {
            let reparsed = SignedMetadata::from_slice(&json).expect("reparse");
            assert_eq!(reparsed.metadata(), metadata.metadata());
        }
    }
});
