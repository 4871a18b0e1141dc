use super::Metadata;
use crate::canonical::{encode_canonical, encode_canonical_value};
use crate::envelope::{Envelope, PAYLOAD_TYPE_INTOTO};
use crate::error::InTotoError;
use crate::signature::{generate_signature, verify_signature, Key, Signature};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// The legacy container: the payload next to its inline signatures.
///
/// Signatures cover the canonical encoding of `signed`. A container read
/// from JSON keeps the `signed` object exactly as it was written, so fields
/// another producer wrote as `null` or left out are signed and verified the
/// way they appear on the wire.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMetablock")]
pub struct Metablock {
    signed: Metadata,
    signed_value: Option<Value>,
    signatures: Vec<Signature>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetablock {
    signed: Value,
    signatures: Vec<Signature>,
}

impl TryFrom<RawMetablock> for Metablock {
    type Error = serde_json::Error;

    fn try_from(raw: RawMetablock) -> Result<Self, Self::Error> {
        let signed = Metadata::deserialize(&raw.signed)?;
        Ok(Metablock {
            signed,
            signed_value: Some(raw.signed),
            signatures: raw.signatures,
        })
    }
}

impl Metablock {
    pub fn new(signed: impl Into<Metadata>) -> Self {
        Metablock {
            signed: signed.into(),
            signed_value: None,
            signatures: Vec::new(),
        }
    }

    pub fn signed(&self) -> &Metadata {
        &self.signed
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn signed_bytes(&self) -> Result<Vec<u8>, InTotoError> {
        match &self.signed_value {
            Some(value) => encode_canonical_value(value),
            None => encode_canonical(&self.signed),
        }
    }

    /// Append a signature by `key`. Existing signatures are left untouched.
    pub fn sign(&mut self, key: &Key) -> Result<(), InTotoError> {
        let signature = generate_signature(&self.signed_bytes()?, key)?;
        self.signatures.push(signature);
        Ok(())
    }

    /// Verify the signature made by `key`.
    pub fn verify_signature(&self, key: &Key) -> Result<(), InTotoError> {
        if self.signatures.is_empty() {
            return Err(InTotoError::NoSignatures);
        }
        let signature = self
            .signatures
            .iter()
            .find(|s| s.keyid == key.key_id())
            .ok_or_else(|| InTotoError::SignatureNotFound(key.key_id().to_string()))?;
        verify_signature(&self.signed_bytes()?, signature, key)
    }
}

impl Serialize for Metablock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Metablock", 2)?;
        match &self.signed_value {
            Some(value) => state.serialize_field("signed", value)?,
            None => state.serialize_field("signed", &self.signed)?,
        }
        state.serialize_field("signatures", &self.signatures)?;
        state.end()
    }
}

/// Signed link or layout metadata in either container form.
#[derive(Debug, Clone, PartialEq)]
pub enum SignedMetadata {
    Metablock(Metablock),
    /// The envelope plus its decoded payload.
    Envelope { envelope: Envelope, metadata: Metadata },
}

impl SignedMetadata {
    /// Wrap metadata in an unsigned legacy container.
    pub fn new_metablock(metadata: impl Into<Metadata>) -> Self {
        SignedMetadata::Metablock(Metablock::new(metadata))
    }

    /// Wrap metadata in an unsigned envelope whose payload is its canonical
    /// encoding.
    pub fn new_envelope(metadata: impl Into<Metadata>) -> Result<Self, InTotoError> {
        let metadata = metadata.into();
        let payload = encode_canonical(&metadata)?;
        Ok(SignedMetadata::Envelope {
            envelope: Envelope {
                payload_type: PAYLOAD_TYPE_INTOTO.to_string(),
                payload: BASE64.encode(payload),
                signatures: Vec::new(),
            },
            metadata,
        })
    }

    /// Parse either container form and check the payload's structural
    /// invariants.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, InTotoError> {
        let value: Value = serde_json::from_slice(bytes)?;
        let signed = if value.get("payloadType").is_some() {
            let envelope: Envelope = serde_json::from_value(value)?;
            if envelope.payload_type != PAYLOAD_TYPE_INTOTO {
                return Err(InTotoError::InvalidMetadata(format!(
                    "unsupported payload type '{}'",
                    envelope.payload_type
                )));
            }
            let metadata: Metadata = serde_json::from_slice(&envelope.decode_payload()?)?;
            SignedMetadata::Envelope { envelope, metadata }
        } else {
            SignedMetadata::Metablock(serde_json::from_value(value)?)
        };
        signed.metadata().validate()?;
        Ok(signed)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, InTotoError> {
        let path = path.as_ref();
        log::debug!("Loading metadata from {}", path.display());
        Self::from_slice(&fs::read(path)?)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, InTotoError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), InTotoError> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            SignedMetadata::Metablock(mb) => mb.signed(),
            SignedMetadata::Envelope { metadata, .. } => metadata,
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        match self {
            SignedMetadata::Metablock(mb) => mb.signatures(),
            SignedMetadata::Envelope { envelope, .. } => &envelope.signatures,
        }
    }

    pub fn is_envelope(&self) -> bool {
        matches!(self, SignedMetadata::Envelope { .. })
    }

    /// Append a signature by `key`, attaching the key's certificate if any.
    pub fn sign(&mut self, key: &Key) -> Result<(), InTotoError> {
        match self {
            SignedMetadata::Metablock(mb) => mb.sign(key),
            SignedMetadata::Envelope { envelope, .. } => {
                envelope.add_signature(key)?;
                if let (Some(cert), Some(last)) = (key.certificate(), envelope.signatures.last_mut()) {
                    last.cert = cert.to_string();
                }
                Ok(())
            }
        }
    }

    /// Verify the signature made by `key`.
    pub fn verify_signature(&self, key: &Key) -> Result<(), InTotoError> {
        match self {
            SignedMetadata::Metablock(mb) => mb.verify_signature(key),
            SignedMetadata::Envelope { envelope, .. } => envelope.verify_key(key),
        }
    }
}

impl Serialize for SignedMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            SignedMetadata::Metablock(mb) => mb.serialize(serializer),
            SignedMetadata::Envelope { envelope, .. } => envelope.serialize(serializer),
        }
    }
}

impl From<Metablock> for SignedMetadata {
    fn from(mb: Metablock) -> Self {
        SignedMetadata::Metablock(mb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Link;
    use ct_codecs::{Encoder, Hex};

    fn sample_link() -> Link {
        let mut link = Link::new("build");
        link.command = vec!["make".to_string(), "all".to_string()];
        link.products.insert(
            "app".to_string(),
            [("sha256".to_string(), "aa".repeat(32))].into_iter().collect(),
        );
        link
    }

    #[test]
    fn test_metablock_sign_and_verify() {
        let key = Key::generate_ed25519().unwrap();
        let other = Key::generate_ecdsa().unwrap();
        let mut signed = SignedMetadata::new_metablock(sample_link());

        assert!(matches!(signed.verify_signature(&key), Err(InTotoError::NoSignatures)));
        signed.sign(&key).unwrap();
        signed.verify_signature(&key.public_only()).unwrap();
        assert!(matches!(
            signed.verify_signature(&other),
            Err(InTotoError::SignatureNotFound(_))
        ));

        signed.sign(&other).unwrap();
        assert_eq!(signed.signatures().len(), 2);
        signed.verify_signature(&key).unwrap();
        signed.verify_signature(&other).unwrap();
    }

    #[test]
    fn test_envelope_sign_and_verify() {
        let key = Key::generate_rsa(1024).unwrap();
        let mut signed = SignedMetadata::new_envelope(sample_link()).unwrap();
        signed.sign(&key).unwrap();
        assert!(signed.is_envelope());
        signed.verify_signature(&key.public_only()).unwrap();

        let bytes = signed.to_json_pretty().unwrap();
        let parsed = SignedMetadata::from_slice(&bytes).unwrap();
        assert_eq!(parsed, signed);
        parsed.verify_signature(&key).unwrap();
    }

    #[test]
    fn test_envelope_payload_is_canonical() {
        let signed = SignedMetadata::new_envelope(sample_link()).unwrap();
        let SignedMetadata::Envelope { envelope, metadata } = &signed else {
            panic!("expected an envelope");
        };
        assert_eq!(envelope.payload_type, PAYLOAD_TYPE_INTOTO);
        assert_eq!(envelope.decode_payload().unwrap(), encode_canonical(metadata).unwrap());
    }

    #[test]
    fn test_tampered_metablock_fails() {
        let key = Key::generate_ed25519().unwrap();
        let mut mb = Metablock::new(sample_link());
        mb.sign(&key).unwrap();

        let mut json = serde_json::to_value(&mb).unwrap();
        json["signed"]["command"]
            .as_array_mut()
            .unwrap()
            .push(Value::from("install"));
        let tampered: Metablock = serde_json::from_value(json).unwrap();
        assert!(matches!(tampered.verify_signature(&key), Err(InTotoError::InvalidSignature)));
    }

    /// Sign the canonical encoding of `signed` exactly as given and wrap it
    /// in a legacy container.
    fn signed_by_producer(signed: Value, key: &Key) -> Vec<u8> {
        let sig = key.sign(&encode_canonical_value(&signed).unwrap()).unwrap();
        let container = serde_json::json!({
            "signed": signed,
            "signatures": [{"keyid": key.key_id(), "sig": Hex::encode_to_string(sig).unwrap()}],
        });
        serde_json::to_vec(&container).unwrap()
    }

    #[test]
    fn test_layout_with_null_collections_verifies() {
        let key = Key::generate_ed25519().unwrap();
        let signed = serde_json::json!({
            "_type": "layout",
            "expires": "2100-01-01T00:00:00Z",
            "keys": {},
            "inspect": null,
            "steps": [{
                "_type": "step",
                "name": "build",
                "expected_command": null,
                "expected_materials": [],
                "expected_products": [],
                "pubkeys": null
            }]
        });
        let bytes = signed_by_producer(signed, &key);

        let loaded = SignedMetadata::from_slice(&bytes).unwrap();
        let layout = loaded.metadata().as_layout().unwrap();
        assert!(layout.inspect.is_empty());
        assert_eq!(layout.steps[0].threshold, 1);
        loaded.verify_signature(&key).unwrap();

        // Dumping keeps the bytes the producer signed.
        let reloaded = SignedMetadata::from_slice(&loaded.to_json_pretty().unwrap()).unwrap();
        reloaded.verify_signature(&key).unwrap();

        // Co-signing signs the same bytes.
        let other = Key::generate_ecdsa().unwrap();
        let mut cosigned = reloaded;
        cosigned.sign(&other).unwrap();
        cosigned.verify_signature(&key).unwrap();
        cosigned.verify_signature(&other).unwrap();
    }

    #[test]
    fn test_link_with_null_collections_verifies() {
        let key = Key::generate_ecdsa().unwrap();
        let signed = serde_json::json!({
            "_type": "link",
            "name": "build",
            "command": ["make"],
            "materials": null,
            "products": {},
            "byproducts": null,
            "environment": null
        });
        let loaded = SignedMetadata::from_slice(&signed_by_producer(signed, &key)).unwrap();
        assert!(loaded.metadata().as_link().unwrap().materials.is_empty());
        loaded.verify_signature(&key).unwrap();
    }

    #[test]
    fn test_load_and_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.link");
        let key = Key::generate_ed25519().unwrap();
        let mut signed = SignedMetadata::new_metablock(sample_link());
        signed.sign(&key).unwrap();
        signed.dump(&path).unwrap();

        let loaded = SignedMetadata::load(&path).unwrap();
        assert!(!loaded.is_envelope());
        assert_eq!(loaded.metadata().as_link().unwrap().name, "build");
        loaded.verify_signature(&key).unwrap();
    }

    #[test]
    fn test_container_shape_errors() {
        // Missing signatures.
        let res = SignedMetadata::from_slice(br#"{"signed":{"_type":"link","name":"x"}}"#);
        assert!(res.is_err());

        // Unknown payload type.
        let payload = BASE64.encode(br#"{"_type":"link","name":"x"}"#);
        let json = format!(r#"{{"payloadType":"text/plain","payload":"{}","signatures":[]}}"#, payload);
        assert!(matches!(
            SignedMetadata::from_slice(json.as_bytes()),
            Err(InTotoError::InvalidMetadata(_))
        ));

        // Structural validation runs at load.
        let bad = br#"{"signed":{"_type":"link","name":"x","materials":{"a":{"sha256":"zz"}}},"signatures":[]}"#;
        assert!(matches!(
            SignedMetadata::from_slice(bad),
            Err(InTotoError::InvalidMetadata(_))
        ));
    }

    #[test]
    fn test_certificate_attached_to_envelope_signature() {
        let kp = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, "builder");
        let cert = params.self_signed(&kp).unwrap();
        let cert_key = Key::from_certificate_pem(&cert.pem()).unwrap();
        let signing_key = Key::from_pem(&kp.serialize_pem()).unwrap();
        assert_eq!(cert_key.key_id(), signing_key.key_id());

        let mut signed = SignedMetadata::new_envelope(sample_link()).unwrap();
        signed.sign(&signing_key).unwrap();
        assert!(signed.signatures()[0].cert.is_empty());

        let bound = signing_key.with_certificate(&cert.pem()).unwrap();
        signed.sign(&bound).unwrap();
        assert_eq!(signed.signatures()[1].cert, cert.pem().trim());
        signed.verify_signature(&cert_key).unwrap();
    }
}
