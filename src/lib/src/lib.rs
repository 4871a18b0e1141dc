//! An implementation of in-toto software supply chain verification.

// `LayoutVerifier::verify()` is what most users need: it checks a signed layout against the links recorded by
// functionaries. `runlib::in_toto_run()` and `SignedMetadata::sign()` are what functionaries use to produce links.

#![forbid(unsafe_code)]

mod error;

/// Canonical JSON encoding
///
/// The byte representation signatures over legacy metadata are computed on.
pub mod canonical;

/// Pre-authentication encoding and signature envelopes
pub mod envelope;

/// Keys, key identifiers, and signature schemes
pub mod signature;

/// X.509 functionary certificates
///
/// Chain validation against the roots and intermediates embedded in a layout,
/// and the constraints that bind a certificate identity to a step.
pub mod certificate;

/// Link and layout metadata
pub mod models;

/// Artifact rules and the engine that checks them
pub mod rules;

/// Recording artifacts and command results into links
pub mod runlib;

/// Time sources
///
/// Layout expiry and certificate validity are checked against a pluggable
/// clock, so verification can be pinned to a known point in time.
pub mod time;

/// Layout verification
pub mod verify;

pub use error::*;

pub mod reexports {
    pub use {ct_codecs, log, regex, thiserror};
}
