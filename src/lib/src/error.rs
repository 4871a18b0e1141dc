use crate::verify::Finding;

/// The in-toto error type.
#[derive(Debug, thiserror::Error)]
pub enum InTotoError {
    #[error("Internal error: [{0}]")]
    InternalError(String),

    #[error("Canonical encoding error: {0}")]
    EncodingError(String),

    #[error("I/O error")]
    IOError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("UTF-8 error")]
    UTF8Error(#[from] std::str::Utf8Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Unsupported signature scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("No signatures found")]
    NoSignatures,

    #[error("No signature found for key '{0}'")]
    SignatureNotFound(String),

    #[error("Unknown key '{0}'")]
    UnknownKey(String),

    #[error("Certificate verification failed: {0}")]
    CertificateError(String),

    #[error("X509 error: {0}")]
    X509Error(String),

    #[error("Time error: {0}")]
    TimeError(String),

    #[error("Layout is not signed by any trusted key: {0}")]
    UntrustedLayout(String),

    #[error("Layout has expired on '{0}'")]
    LayoutExpired(String),

    #[error(
        "Step '{step}' requires {required} link metadata file(s), {verified} out of {available} available link(s) have a valid signature from an authorized signer"
    )]
    ThresholdNotMet {
        step: String,
        required: usize,
        verified: usize,
        available: usize,
    },

    #[error("Links '{first}' and '{second}' of step '{step}' report different {field}")]
    DivergentLinks {
        step: String,
        first: String,
        second: String,
        field: &'static str,
    },

    #[error("Inspection '{name}' returned a non-zero value: {code}")]
    InspectionFailed { name: String, code: i64 },

    #[error("Artifact verification failed with {} violation(s)", .0.len())]
    PolicyViolations(Vec<Finding>),

    #[error("Invalid artifact rule: {0}")]
    RuleSyntax(String),

    #[error("Invalid pattern: {0}")]
    PatternError(String),

    #[error("Usage error: {0}")]
    UsageError(&'static str),
}

/// Coarse classification of an [`InTotoError`].
///
/// Policy errors are the expected "not trusted" outcomes of a verification;
/// everything else means the inputs could not be processed at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Encoding,
    Crypto,
    Structural,
    Policy,
    RuleSyntax,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Encoding => "encoding",
            ErrorKind::Crypto => "crypto",
            ErrorKind::Structural => "structural",
            ErrorKind::Policy => "policy",
            ErrorKind::RuleSyntax => "rule-syntax",
            ErrorKind::Io => "io",
        };
        f.write_str(s)
    }
}

impl InTotoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InTotoError::EncodingError(_) => ErrorKind::Encoding,
            InTotoError::UnsupportedKeyType(_)
            | InTotoError::UnsupportedScheme(_)
            | InTotoError::InvalidKey(_)
            | InTotoError::InvalidSignature
            | InTotoError::NoSignatures
            | InTotoError::SignatureNotFound(_)
            | InTotoError::UnknownKey(_)
            | InTotoError::CertificateError(_)
            | InTotoError::UntrustedLayout(_) => ErrorKind::Crypto,
            InTotoError::LayoutExpired(_)
            | InTotoError::ThresholdNotMet { .. }
            | InTotoError::DivergentLinks { .. }
            | InTotoError::InspectionFailed { .. }
            | InTotoError::PolicyViolations(_) => ErrorKind::Policy,
            InTotoError::RuleSyntax(_) | InTotoError::PatternError(_) => ErrorKind::RuleSyntax,
            InTotoError::IOError(_) => ErrorKind::Io,
            InTotoError::InternalError(_)
            | InTotoError::JsonError(_)
            | InTotoError::UTF8Error(_)
            | InTotoError::ParseError(_)
            | InTotoError::InvalidMetadata(_)
            | InTotoError::X509Error(_)
            | InTotoError::TimeError(_)
            | InTotoError::UsageError(_) => ErrorKind::Structural,
        }
    }

    /// Returns true if this error means verification ran to completion and
    /// trust was not established.
    pub fn is_policy_failure(&self) -> bool {
        self.kind() == ErrorKind::Policy
    }
}

impl From<x509_parser::nom::Err<x509_parser::error::X509Error>> for InTotoError {
    fn from(err: x509_parser::nom::Err<x509_parser::error::X509Error>) -> Self {
        InTotoError::X509Error(format!("{:?}", err))
    }
}

impl From<x509_parser::error::X509Error> for InTotoError {
    fn from(err: x509_parser::error::X509Error) -> Self {
        InTotoError::X509Error(format!("{:?}", err))
    }
}

impl From<pem::PemError> for InTotoError {
    fn from(err: pem::PemError) -> Self {
        InTotoError::ParseError(format!("PEM: {}", err))
    }
}

impl From<ct_codecs::Error> for InTotoError {
    fn from(err: ct_codecs::Error) -> Self {
        InTotoError::ParseError(format!("Encoding: {:?}", err))
    }
}
