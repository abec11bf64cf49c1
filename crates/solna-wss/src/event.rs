#![forbid(unsafe_code)]

//! Security events: the record of what was observed while processing.
//!
//! Processors append events; the policy matcher and the SAML confirmation
//! check read them.  Events are never modified once logged.

use chrono::{DateTime, Utc};
use solna_keys::TokenKind;
use solna_xml::{path_to_string, QName};

/// What an algorithm URI was used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlgorithmUsage {
    Signature,
    Digest,
    Canonicalization,
    Encryption,
}

/// The confirmation method a SAML assertion declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectConfirmation {
    HolderOfKey,
    SenderVouches,
    Bearer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A `wsu:Timestamp` was processed.  `violation` is set when the
    /// timestamp failed a check that was not enforced.
    Timestamp {
        created: DateTime<Utc>,
        expires: Option<DateTime<Utc>>,
        violation: Option<String>,
    },
    /// The digest of an element was verified against a trusted reference.
    SignedElement {
        path: Vec<QName>,
        id: String,
        token: String,
    },
    /// A `SignatureValue` verified with the given token.
    SignatureValue { token: String, algorithm: String },
    /// A token was accepted and registered.
    TokenValidated { token: String, kind: TokenKind },
    /// An `EncryptedData` was decrypted (inbound) or produced (outbound).
    EncryptedPart {
        path: Vec<QName>,
        id: String,
        algorithm: String,
        content_only: bool,
    },
    /// A SAML assertion was accepted.
    SamlToken {
        id: String,
        issuer: String,
        confirmation: SubjectConfirmation,
    },
    /// A direct child of the security header, in document order.
    HeaderChild { name: QName },
    /// An algorithm was applied.
    Algorithm { uri: String, usage: AlgorithmUsage },
}

impl SecurityEvent {
    /// Short label used in logs and diagnostics.
    pub fn describe(&self) -> String {
        match self {
            Self::Timestamp { created, .. } => format!("timestamp created {created}"),
            Self::SignedElement { path, token, .. } => {
                format!("signed {} by {token}", path_to_string(path))
            }
            Self::SignatureValue { token, .. } => format!("signature by {token}"),
            Self::TokenValidated { token, kind } => format!("{kind} token {token}"),
            Self::EncryptedPart { path, .. } => format!("encrypted {}", path_to_string(path)),
            Self::SamlToken { id, .. } => format!("SAML assertion {id}"),
            Self::HeaderChild { name } => format!("header child {name}"),
            Self::Algorithm { uri, usage } => format!("{usage:?} algorithm {uri}"),
        }
    }
}

/// Synchronous observer of the security event log.
pub trait SecurityEventListener: Send {
    fn on_event(&mut self, event: &SecurityEvent);
}

impl<F> SecurityEventListener for F
where
    F: FnMut(&SecurityEvent) + Send,
{
    fn on_event(&mut self, event: &SecurityEvent) {
        self(event)
    }
}
