//! Per-algorithm signing and verification.
//!
//! Each supported key type has one [`SignatureProvider`] implementation. The
//! provider is chosen from the key's type tag when it is built; nothing here
//! inspects key material to guess an algorithm.

use super::keys::{Key, KeyType, Scheme};
use crate::error::InTotoError;

use ct_codecs::{Decoder, Hex};
use p256::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use sha2::Sha256;

/// Signing capability for one key.
///
/// Implementations fail closed: a signature of the wrong size or encoding is
/// an [`InTotoError::InvalidSignature`], never a panic or a pass.
pub trait SignatureProvider {
    /// Sign `message`, returning the raw signature bytes.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, InTotoError>;

    /// Check a raw signature over `message`.
    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), InTotoError>;
}

/// Build the provider matching the key's type and scheme.
pub fn provider_for(key: &Key) -> Result<Box<dyn SignatureProvider>, InTotoError> {
    let keytype = key.key_type();
    let scheme = key.scheme();
    match keytype {
        KeyType::Ed25519 => {
            expect_scheme(keytype, scheme, &Scheme::Ed25519)?;
            Ok(Box::new(Ed25519Provider::from_key(key)?))
        }
        KeyType::Ecdsa => {
            expect_scheme(keytype, scheme, &Scheme::EcdsaSha2Nistp256)?;
            Ok(Box::new(EcdsaP256Provider::from_key(key)?))
        }
        KeyType::Rsa => {
            expect_scheme(keytype, scheme, &Scheme::RsassaPssSha256)?;
            Ok(Box::new(RsaPssProvider::from_key(key)?))
        }
        KeyType::Other(name) => Err(InTotoError::UnsupportedKeyType(name.clone())),
    }
}

fn expect_scheme(keytype: &KeyType, scheme: &Scheme, expected: &Scheme) -> Result<(), InTotoError> {
    if scheme == expected {
        Ok(())
    } else {
        Err(InTotoError::UnsupportedScheme(format!(
            "{} is not supported for {} keys",
            scheme, keytype
        )))
    }
}

/// Ed25519 signatures.
pub struct Ed25519Provider {
    pk: ed25519_compact::PublicKey,
    sk: Option<ed25519_compact::SecretKey>,
}

impl Ed25519Provider {
    fn from_key(key: &Key) -> Result<Self, InTotoError> {
        let pk_bytes = Hex::decode_to_vec(key.public(), None)
            .map_err(|_| InTotoError::InvalidKey("ed25519 public key is not hex".to_string()))?;
        let pk = ed25519_compact::PublicKey::from_slice(&pk_bytes)
            .map_err(|e| InTotoError::InvalidKey(format!("ed25519 public key: {}", e)))?;
        let sk = match key.private() {
            "" => None,
            private => {
                let sk_bytes = Hex::decode_to_vec(private, None).map_err(|_| {
                    InTotoError::InvalidKey("ed25519 private key is not hex".to_string())
                })?;
                Some(
                    ed25519_compact::SecretKey::from_slice(&sk_bytes)
                        .map_err(|e| InTotoError::InvalidKey(format!("ed25519 private key: {}", e)))?,
                )
            }
        };
        Ok(Self { pk, sk })
    }
}

impl SignatureProvider for Ed25519Provider {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, InTotoError> {
        let sk = self
            .sk
            .as_ref()
            .ok_or(InTotoError::UsageError("signing requires a private key"))?;
        Ok(sk.sign(message, None)[..].to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), InTotoError> {
        let signature = ed25519_compact::Signature::from_slice(signature)
            .map_err(|_| InTotoError::InvalidSignature)?;
        self.pk
            .verify(message, &signature)
            .map_err(|_| InTotoError::InvalidSignature)
    }
}

/// ECDSA over NIST P-256 with SHA-256. Signatures are ASN.1 DER encoded.
pub struct EcdsaP256Provider {
    vk: p256::ecdsa::VerifyingKey,
    sk: Option<p256::ecdsa::SigningKey>,
}

impl EcdsaP256Provider {
    fn from_key(key: &Key) -> Result<Self, InTotoError> {
        let vk = p256::ecdsa::VerifyingKey::from_public_key_pem(key.public())
            .map_err(|e| InTotoError::InvalidKey(format!("ecdsa public key: {}", e)))?;
        let sk = match key.private() {
            "" => None,
            private => Some(parse_ecdsa_private(private)?),
        };
        Ok(Self { vk, sk })
    }
}

pub(crate) fn parse_ecdsa_private(pem: &str) -> Result<p256::ecdsa::SigningKey, InTotoError> {
    if let Ok(sk) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        return Ok(sk);
    }
    let secret = p256::SecretKey::from_sec1_pem(pem)
        .map_err(|e| InTotoError::InvalidKey(format!("ecdsa private key: {}", e)))?;
    Ok(p256::ecdsa::SigningKey::from(secret))
}

impl SignatureProvider for EcdsaP256Provider {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, InTotoError> {
        use p256::ecdsa::signature::Signer;

        let sk = self
            .sk
            .as_ref()
            .ok_or(InTotoError::UsageError("signing requires a private key"))?;
        let signature: p256::ecdsa::Signature = sk.sign(message);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), InTotoError> {
        use p256::ecdsa::signature::Verifier;

        let signature = p256::ecdsa::Signature::from_der(signature)
            .map_err(|_| InTotoError::InvalidSignature)?;
        self.vk
            .verify(message, &signature)
            .map_err(|_| InTotoError::InvalidSignature)
    }
}

/// RSASSA-PSS with SHA-256 and a salt as long as the digest.
pub struct RsaPssProvider {
    public: rsa::RsaPublicKey,
    private: Option<rsa::RsaPrivateKey>,
}

impl RsaPssProvider {
    fn from_key(key: &Key) -> Result<Self, InTotoError> {
        let public = rsa::RsaPublicKey::from_public_key_pem(key.public())
            .map_err(|e| InTotoError::InvalidKey(format!("rsa public key: {}", e)))?;
        let private = match key.private() {
            "" => None,
            private => Some(parse_rsa_private(private)?),
        };
        Ok(Self { public, private })
    }
}

pub(crate) fn parse_rsa_private(pem: &str) -> Result<rsa::RsaPrivateKey, InTotoError> {
    if let Ok(sk) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(sk);
    }
    rsa::RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| InTotoError::InvalidKey(format!("rsa private key: {}", e)))
}

impl SignatureProvider for RsaPssProvider {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, InTotoError> {
        let private = self
            .private
            .as_ref()
            .ok_or(InTotoError::UsageError("signing requires a private key"))?;
        let signing_key = rsa::pss::BlindedSigningKey::<Sha256>::new(private.clone());
        let mut rng = rsa::rand_core::OsRng;
        let signature = signing_key
            .try_sign_with_rng(&mut rng, message)
            .map_err(|e| InTotoError::InternalError(format!("rsa-pss signing failed: {}", e)))?;
        Ok(signature.to_vec())
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), InTotoError> {
        use rsa::signature::Verifier;

        let verifying_key = rsa::pss::VerifyingKey::<Sha256>::new(self.public.clone());
        let signature = rsa::pss::Signature::try_from(signature)
            .map_err(|_| InTotoError::InvalidSignature)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| InTotoError::InvalidSignature)
    }
}
