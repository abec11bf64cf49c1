#![forbid(unsafe_code)]

/// Errors produced while securing or verifying a message.
///
/// Every variant aborts processing of the message it was raised for; policy
/// mismatches are reported as outcomes, not errors. Use [`Error::kind`] to
/// classify a failure.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("invalid security header: {0}")]
    InvalidSecurity(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("unresolvable reference: {0}")]
    UnresolvableReference(String),

    #[error("security token already registered: {0}")]
    DuplicateToken(String),

    #[error("processor chain error: {0}")]
    Chain(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("digest mismatch for reference: {0}")]
    DigestMismatch(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("message expired: {0}")]
    Expired(String),

    #[error("message is stale: {0}")]
    Stale(String),

    #[error("message not yet valid: {0}")]
    NotYetValid(String),

    #[error("replayed message: {0}")]
    Replay(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Failure classes used for diagnostics and for deciding what is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or incomplete header, unresolvable reference, duplicate token.
    Structural,
    /// Signature/MAC mismatch, unsupported algorithm, decryption failure.
    Cryptographic,
    /// Expired, stale, not yet valid or replayed timestamp.
    Temporal,
    /// Holder-of-key or sender-vouches proof failed.
    Authentication,
    /// I/O and everything that does not fit elsewhere.
    Other,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::XmlParse(_)
            | Self::InvalidSecurity(_)
            | Self::MissingElement(_)
            | Self::MissingAttribute(_)
            | Self::UnresolvableReference(_)
            | Self::DuplicateToken(_)
            | Self::Chain(_) => ErrorKind::Structural,
            Self::UnsupportedAlgorithm(_)
            | Self::Crypto(_)
            | Self::SignatureInvalid(_)
            | Self::DigestMismatch(_)
            | Self::Decryption(_)
            | Self::Encryption(_)
            | Self::Key(_)
            | Self::KeyNotFound(_)
            | Self::Certificate(_)
            | Self::Base64(_) => ErrorKind::Cryptographic,
            Self::Expired(_) | Self::Stale(_) | Self::NotYetValid(_) | Self::Replay(_) => {
                ErrorKind::Temporal
            }
            Self::AuthenticationFailed(_) => ErrorKind::Authentication,
            Self::InvalidPolicy(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
