//! Fuzz target for key loading
//!
//! Covers PEM framing, SPKI/PKCS#8/PKCS#1/SEC1 decoding for every supported
//! key type, and certificate-derived keys.

#![no_main]

use intoto::signature::Key;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(key) = Key::from_pem(text) {
        // Key ids are stable across private and public forms
        let public = key.public_only();
        assert_eq!(public.key_id(), key.key_id());
        let _ = key.derive_key_id();
        let _ = key.verify(b"message", data);
    }

    let _ = Key::from_certificate_pem(text);
});
