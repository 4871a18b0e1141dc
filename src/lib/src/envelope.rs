//! Authenticated envelopes.
//!
//! An envelope carries an opaque typed payload plus detached signatures. What
//! gets signed is never the payload itself but its pre-authentication
//! encoding (PAE), which binds the payload type to the payload bytes:
//!
//! ```text
//! le64(n) || le64(len(f1)) || f1 || ... || le64(len(fn)) || fn
//! ```
//!
//! where `le64` is an 8-byte little-endian unsigned integer.

use crate::error::InTotoError;
use crate::signature::{Key, Signature};

use base64::{engine::general_purpose::STANDARD as BASE64, engine::general_purpose::URL_SAFE, Engine};
use serde::{Deserialize, Serialize};

/// Payload type of in-toto link and layout metadata.
pub const PAYLOAD_TYPE_INTOTO: &str = "application/vnd.in-toto+json";

/// Pre-authentication encoding of a sequence of byte strings.
pub fn pae(fields: &[&[u8]]) -> Vec<u8> {
    let len = 8 + fields.iter().map(|f| 8 + f.len()).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(&(fields.len() as u64).to_le_bytes());
    for field in fields {
        out.extend_from_slice(&(field.len() as u64).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}

/// Something that can add a signature to an envelope.
pub trait EnvelopeSigner {
    fn key_id(&self) -> String;
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, InTotoError>;
}

/// Something that can check envelope signatures.
///
/// [`verify_envelope`] hands a signature only to verifiers that recognize its
/// key id. `verify` returns [`InTotoError::UnknownKey`] when called with a key
/// id it does not recognize.
pub trait EnvelopeVerifier {
    fn recognizes(&self, keyid: &str) -> bool;
    fn verify(&self, keyid: &str, data: &[u8], signature: &[u8]) -> Result<(), InTotoError>;
}

impl EnvelopeSigner for Key {
    fn key_id(&self) -> String {
        Key::key_id(self).to_string()
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, InTotoError> {
        Key::sign(self, data)
    }
}

impl EnvelopeVerifier for Key {
    fn recognizes(&self, keyid: &str) -> bool {
        keyid == self.key_id()
    }

    fn verify(&self, keyid: &str, data: &[u8], signature: &[u8]) -> Result<(), InTotoError> {
        if !self.recognizes(keyid) {
            return Err(InTotoError::UnknownKey(keyid.to_string()));
        }
        Key::verify(self, data, signature)
    }
}

/// A signed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "payloadType")]
    pub payload_type: String,
    pub payload: String,
    pub signatures: Vec<Signature>,
}

impl Envelope {
    /// The decoded payload bytes.
    pub fn decode_payload(&self) -> Result<Vec<u8>, InTotoError> {
        decode_b64(&self.payload)
            .map_err(|_| InTotoError::ParseError("envelope payload is not base64".to_string()))
    }

    /// The exact bytes covered by this envelope's signatures.
    pub fn signed_bytes(&self) -> Result<Vec<u8>, InTotoError> {
        let payload = self.decode_payload()?;
        Ok(pae(&[self.payload_type.as_bytes(), &payload]))
    }

    /// Append a signature from `signer` over the current payload.
    pub fn add_signature(&mut self, signer: &dyn EnvelopeSigner) -> Result<(), InTotoError> {
        let data = self.signed_bytes()?;
        let sig = signer.sign(&data)?;
        self.signatures.push(Signature {
            keyid: signer.key_id(),
            sig: BASE64.encode(sig),
            cert: String::new(),
        });
        Ok(())
    }

    /// Verify the signature made by one specific key.
    ///
    /// Unlike [`verify_envelope`], signatures from other keys are ignored.
    /// Fails with [`InTotoError::SignatureNotFound`] if `key` did not sign.
    pub fn verify_key(&self, key: &Key) -> Result<(), InTotoError> {
        if self.signatures.is_empty() {
            return Err(InTotoError::NoSignatures);
        }
        let signature = self
            .signatures
            .iter()
            .find(|s| s.keyid == key.key_id())
            .ok_or_else(|| InTotoError::SignatureNotFound(key.key_id().to_string()))?;
        let data = self.signed_bytes()?;
        let raw = decode_b64(&signature.sig).map_err(|_| InTotoError::InvalidSignature)?;
        key.verify(&data, &raw)
    }
}

/// Build an envelope over `payload`, signed once by every signer.
pub fn sign_envelope(
    payload_type: &str,
    payload: &[u8],
    signers: &[&dyn EnvelopeSigner],
) -> Result<Envelope, InTotoError> {
    if signers.is_empty() {
        return Err(InTotoError::UsageError("at least one signer is required"));
    }
    let data = pae(&[payload_type.as_bytes(), payload]);
    let mut signatures = Vec::with_capacity(signers.len());
    for signer in signers {
        let sig = signer.sign(&data)?;
        signatures.push(Signature {
            keyid: signer.key_id(),
            sig: BASE64.encode(sig),
            cert: String::new(),
        });
    }
    Ok(Envelope {
        payload_type: payload_type.to_string(),
        payload: BASE64.encode(payload),
        signatures,
    })
}

/// Verify every signature of an envelope.
///
/// Each signature is checked by the first verifier that recognizes its key
/// id. A recognized signature that does not decode or verify fails the whole
/// envelope. A signature that no verifier recognizes fails it with
/// [`InTotoError::UnknownKey`], whatever its encoding.
pub fn verify_envelope(envelope: &Envelope, verifiers: &[&dyn EnvelopeVerifier]) -> Result<(), InTotoError> {
    if envelope.signatures.is_empty() {
        return Err(InTotoError::NoSignatures);
    }
    let data = envelope.signed_bytes()?;

    for signature in &envelope.signatures {
        let Some(verifier) = verifiers.iter().find(|v| v.recognizes(&signature.keyid)) else {
            return Err(InTotoError::UnknownKey(signature.keyid.clone()));
        };
        let raw = decode_b64(&signature.sig).map_err(|_| InTotoError::InvalidSignature)?;
        if let Err(e) = verifier.verify(&signature.keyid, &data, &raw) {
            log::debug!("Envelope signature by '{}' rejected: {}", signature.keyid, e);
            return Err(e);
        }
    }
    Ok(())
}

fn decode_b64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(s).or_else(|_| URL_SAFE.decode(s))
}
