//! Certificate-identified functionaries.
//!
//! A step may authorize functionaries by certificate attributes instead of by
//! static key id. A link signed with a certificate counts for such a step when
//! the certificate chains to one of the layout's root CAs and its identity
//! satisfies one of the step's [`CertificateConstraint`]s.

use crate::error::InTotoError;

use rustls_pki_types::{CertificateDer, TrustAnchor, UnixTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};
use webpki::{EndEntityCert, KeyUsage};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Wildcard accepted by every constraint attribute.
pub const ALLOW_ALL: &str = "*";

/// Attributes a certificate must present to act as a functionary.
///
/// `common_name` is either [`ALLOW_ALL`] or the exact subject CN. `uris` is
/// either `["*"]` or the exact set of URI SANs: extra or missing URIs both
/// fail, and an empty list requires a certificate without URI SANs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateConstraint {
    #[serde(default)]
    pub common_name: String,
    #[serde(default)]
    pub uris: Vec<String>,
}

impl CertificateConstraint {
    /// A constraint that accepts any certificate.
    pub fn allow_all() -> Self {
        CertificateConstraint {
            common_name: ALLOW_ALL.to_string(),
            uris: vec![ALLOW_ALL.to_string()],
        }
    }

    pub fn check(&self, identity: &CertificateIdentity) -> bool {
        if self.common_name != ALLOW_ALL && self.common_name != identity.common_name {
            return false;
        }
        check_constraint_attribute(&self.uris, &identity.uris)
    }
}

fn check_constraint_attribute(allowed: &[String], presented: &[String]) -> bool {
    if allowed.len() == 1 && allowed[0] == ALLOW_ALL {
        return true;
    }

    let mut unmet: BTreeSet<&str> = allowed.iter().map(String::as_str).collect();
    for value in presented {
        // Unexpected value, or one already consumed.
        if !unmet.remove(value.as_str()) {
            return false;
        }
    }
    unmet.is_empty()
}

/// The identity attributes constraints are evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub common_name: String,
    pub uris: Vec<String>,
}

impl CertificateIdentity {
    /// Extract the subject CN and URI SANs of a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self, InTotoError> {
        let (_, cert) = X509Certificate::from_der(der)?;

        let mut common_name = String::new();
        for rdn in cert.subject().iter() {
            for attr in rdn.iter() {
                if attr.attr_type() == &oid_registry::OID_X509_COMMON_NAME {
                    if let Ok(cn) = attr.as_str() {
                        common_name = cn.to_string();
                    }
                }
            }
        }

        let mut uris = Vec::new();
        if let Some(san_ext) = cert.get_extension_unique(&oid_registry::OID_X509_EXT_SUBJECT_ALT_NAME)? {
            if let ParsedExtension::SubjectAlternativeName(san) = san_ext.parsed_extension() {
                for name in &san.general_names {
                    if let GeneralName::URI(uri) = name {
                        uris.push(uri.to_string());
                    }
                }
            }
        }

        Ok(CertificateIdentity { common_name, uris })
    }

    pub fn from_pem(cert_pem: &str) -> Result<Self, InTotoError> {
        Self::from_der(&certificate_der(cert_pem)?)
    }
}

/// Decode a single PEM `CERTIFICATE` block.
pub fn certificate_der(cert_pem: &str) -> Result<Vec<u8>, InTotoError> {
    let block = pem::parse(cert_pem)?;
    if block.tag() != "CERTIFICATE" {
        return Err(InTotoError::CertificateError(format!(
            "expected a CERTIFICATE block, got '{}'",
            block.tag()
        )));
    }
    Ok(block.contents().to_vec())
}

/// Trust anchors and intermediates used to validate functionary
/// certificates.
#[derive(Debug, Default)]
pub struct CertificatePool {
    roots: Vec<TrustAnchor<'static>>,
    intermediates: Vec<CertificateDer<'static>>,
}

impl CertificatePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust a root CA given as PEM.
    pub fn add_root_pem(&mut self, cert_pem: &str) -> Result<(), InTotoError> {
        let der = CertificateDer::from(certificate_der(cert_pem)?);
        let anchor = webpki::anchor_from_trusted_cert(&der)
            .map_err(|e| InTotoError::CertificateError(format!("Failed to create trust anchor: {:?}", e)))?
            .to_owned();
        self.roots.push(anchor);
        Ok(())
    }

    /// Make an intermediate CA available for path building.
    pub fn add_intermediate_pem(&mut self, cert_pem: &str) -> Result<(), InTotoError> {
        self.intermediates
            .push(CertificateDer::from(certificate_der(cert_pem)?));
        Ok(())
    }

    pub fn has_roots(&self) -> bool {
        !self.roots.is_empty()
    }

    /// Verify that `cert_pem` chains to a trusted root at time `at` and is
    /// usable for client authentication (or has no extended key usage).
    pub fn verify(&self, cert_pem: &str, at: SystemTime) -> Result<(), InTotoError> {
        if self.roots.is_empty() {
            return Err(InTotoError::CertificateError("No trusted root CA".to_string()));
        }
        let der = CertificateDer::from(certificate_der(cert_pem)?);
        let cert = EndEntityCert::try_from(&der)
            .map_err(|e| InTotoError::CertificateError(format!("Failed to parse certificate: {:?}", e)))?;
        let since_epoch = at
            .duration_since(UNIX_EPOCH)
            .map_err(|_| InTotoError::CertificateError("Verification time precedes the epoch".to_string()))?;

        cert.verify_for_usage(
            webpki::ALL_VERIFICATION_ALGS,
            &self.roots,
            &self.intermediates,
            UnixTime::since_unix_epoch(since_epoch),
            KeyUsage::client_auth(),
            None,
            None,
        )
        .map_err(|e| InTotoError::CertificateError(format!("{:?}", e)))?;
        Ok(())
    }
}
