mod keys;
mod providers;

pub use keys::*;
pub use providers::{provider_for, EcdsaP256Provider, Ed25519Provider, RsaPssProvider, SignatureProvider};

use crate::error::InTotoError;
use ct_codecs::{Decoder, Encoder, Hex};
use serde::{Deserialize, Serialize};

/// A detached signature as stored in metadata containers.
///
/// In the legacy `signed`/`signatures` container `sig` is hex; inside an
/// envelope it is base64. `cert` carries the signer's PEM certificate when
/// the functionary is identified by certificate rather than by a static key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub keyid: String,
    pub sig: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cert: String,
}

/// Sign `data` and return a hex-encoded [`Signature`].
///
/// If the key was derived from a certificate, the certificate is attached.
pub fn generate_signature(data: &[u8], key: &Key) -> Result<Signature, InTotoError> {
    let raw = key.sign(data)?;
    Ok(Signature {
        keyid: key.key_id().to_string(),
        sig: Hex::encode_to_string(raw)?,
        cert: key.certificate().unwrap_or_default().to_string(),
    })
}

/// Verify a hex-encoded [`Signature`] over `data` with `key`.
///
/// A signature that is not valid hex counts as a failed verification.
pub fn verify_signature(data: &[u8], signature: &Signature, key: &Key) -> Result<(), InTotoError> {
    let raw = Hex::decode_to_vec(&signature.sig, None).map_err(|_| InTotoError::InvalidSignature)?;
    key.verify(data, &raw)
}
