#![forbid(unsafe_code)]

//! Inbound and outbound configuration.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use solna_core::{algorithm, ns};
use solna_keys::{Key, KeyResolver, NoKeys, X509Certificate};
use solna_xml::QName;

use crate::replay::{ReplayCache, DEFAULT_REPLAY_LIMIT};

/// Configuration for verifying incoming messages.
#[derive(Clone)]
pub struct SecurityProperties {
    /// Reject expired, stale and future timestamps (otherwise only record).
    pub strict_timestamp: bool,
    /// Maximum age of a timestamp's `Created`.
    pub timestamp_ttl: Duration,
    /// Tolerated clock skew for a `Created` in the future.
    pub timestamp_future_ttl: Duration,
    /// Enforce the Basic Security Profile rules for encrypted data.
    pub strict_compliance: bool,
    /// Evaluate time-based checks at this instant instead of now.
    pub verification_time: Option<DateTime<Utc>>,
    /// Remove `wsse:Security` from the output.
    pub strip_security_header: bool,
    /// Extra unqualified attribute names treated as element ids.
    pub id_attrs: Vec<String>,
    pub resolver: Arc<dyn KeyResolver>,
    pub replay_cache: Option<Arc<dyn ReplayCache>>,
    /// Client certificate of an authenticated transport channel.
    pub transport_certificate: Option<X509Certificate>,
    /// Bound on events buffered for any one element.
    pub max_buffered_events: usize,
}

impl SecurityProperties {
    pub fn new(resolver: Arc<dyn KeyResolver>) -> Self {
        Self {
            resolver,
            ..Self::default()
        }
    }

    pub fn with_strict_timestamp(mut self, strict: bool) -> Self {
        self.strict_timestamp = strict;
        self
    }

    pub fn with_timestamp_ttl(mut self, ttl: Duration) -> Self {
        self.timestamp_ttl = ttl;
        self
    }

    pub fn with_timestamp_future_ttl(mut self, ttl: Duration) -> Self {
        self.timestamp_future_ttl = ttl;
        self
    }

    pub fn with_strict_compliance(mut self, strict: bool) -> Self {
        self.strict_compliance = strict;
        self
    }

    pub fn with_verification_time(mut self, at: DateTime<Utc>) -> Self {
        self.verification_time = Some(at);
        self
    }

    pub fn with_strip_security_header(mut self, strip: bool) -> Self {
        self.strip_security_header = strip;
        self
    }

    pub fn with_id_attr(mut self, name: &str) -> Self {
        self.id_attrs.push(name.to_owned());
        self
    }

    pub fn with_replay_cache(mut self, cache: Arc<dyn ReplayCache>) -> Self {
        self.replay_cache = Some(cache);
        self
    }

    pub fn with_transport_certificate(mut self, cert: X509Certificate) -> Self {
        self.transport_certificate = Some(cert);
        self
    }

    pub fn with_max_buffered_events(mut self, limit: usize) -> Self {
        self.max_buffered_events = limit;
        self
    }

    /// The instant time-based checks are evaluated at.
    pub fn now(&self) -> DateTime<Utc> {
        self.verification_time.unwrap_or_else(Utc::now)
    }
}

impl Default for SecurityProperties {
    fn default() -> Self {
        Self {
            strict_timestamp: true,
            timestamp_ttl: Duration::seconds(300),
            timestamp_future_ttl: Duration::zero(),
            strict_compliance: true,
            verification_time: None,
            strip_security_header: false,
            id_attrs: Vec::new(),
            resolver: Arc::new(NoKeys),
            replay_cache: None,
            transport_certificate: None,
            max_buffered_events: DEFAULT_REPLAY_LIMIT,
        }
    }
}

impl fmt::Debug for SecurityProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityProperties")
            .field("strict_timestamp", &self.strict_timestamp)
            .field("timestamp_ttl", &self.timestamp_ttl)
            .field("timestamp_future_ttl", &self.timestamp_future_ttl)
            .field("strict_compliance", &self.strict_compliance)
            .field("verification_time", &self.verification_time)
            .field("strip_security_header", &self.strip_security_header)
            .field("id_attrs", &self.id_attrs)
            .field("replay_cache", &self.replay_cache.is_some())
            .field("transport_certificate", &self.transport_certificate)
            .finish_non_exhaustive()
    }
}

/// Outbound actions, applied in the order timestamp, signature, encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Timestamp,
    Signature,
    Encryption,
}

/// How the outbound signature names its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyReference {
    /// A `wsse:Reference`: to an included BinarySecurityToken for
    /// certificates, to the key name for shared keys.
    DirectReference,
    IssuerSerial,
    SubjectKeyIdentifier,
    KeyName,
}

/// An element to encrypt, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurePart {
    pub name: QName,
    /// Encrypt the children only, keeping the element itself.
    pub content_only: bool,
}

impl SecurePart {
    pub fn element(name: QName) -> Self {
        Self {
            name,
            content_only: false,
        }
    }

    pub fn content(name: QName) -> Self {
        Self {
            name,
            content_only: true,
        }
    }
}

/// Configuration for securing outgoing messages.
#[derive(Debug, Clone)]
pub struct OutboundProperties {
    pub actions: Vec<Action>,
    pub timestamp_ttl: Duration,
    /// Creation time for the timestamp instead of now.
    pub timestamp_created: Option<DateTime<Utc>>,
    pub signature_key: Option<Key>,
    pub signature_algorithm: String,
    pub digest_algorithm: String,
    pub c14n_algorithm: String,
    /// Elements to sign; empty means the SOAP body plus the timestamp when
    /// one is added.
    pub signature_parts: Vec<QName>,
    pub signature_key_reference: KeyReference,
    pub encryption_key: Option<Key>,
    pub encryption_algorithm: String,
    /// Elements to encrypt; empty means the content of the SOAP body.
    pub encryption_parts: Vec<SecurePart>,
    /// Mark the security header `mustUnderstand`.
    pub must_understand: bool,
}

impl OutboundProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timestamp(mut self, ttl: Duration) -> Self {
        self.push_action(Action::Timestamp);
        self.timestamp_ttl = ttl;
        self
    }

    pub fn with_signature(mut self, key: Key, algorithm: &str) -> Self {
        self.push_action(Action::Signature);
        self.signature_key = Some(key);
        self.signature_algorithm = algorithm.to_owned();
        self
    }

    pub fn with_encryption(mut self, key: Key, algorithm: &str) -> Self {
        self.push_action(Action::Encryption);
        self.encryption_key = Some(key);
        self.encryption_algorithm = algorithm.to_owned();
        self
    }

    pub fn with_digest_algorithm(mut self, algorithm: &str) -> Self {
        self.digest_algorithm = algorithm.to_owned();
        self
    }

    pub fn with_signature_part(mut self, name: QName) -> Self {
        self.signature_parts.push(name);
        self
    }

    pub fn with_encryption_part(mut self, part: SecurePart) -> Self {
        self.encryption_parts.push(part);
        self
    }

    pub fn with_key_reference(mut self, reference: KeyReference) -> Self {
        self.signature_key_reference = reference;
        self
    }

    pub fn with_timestamp_created(mut self, at: DateTime<Utc>) -> Self {
        self.timestamp_created = Some(at);
        self
    }

    pub fn has_action(&self, action: Action) -> bool {
        self.actions.contains(&action)
    }

    fn push_action(&mut self, action: Action) {
        if !self.has_action(action) {
            self.actions.push(action);
        }
    }

    /// Signature parts with the default applied.
    pub fn effective_signature_parts(&self, soap_ns: &str) -> Vec<QName> {
        if !self.signature_parts.is_empty() {
            return self.signature_parts.clone();
        }
        let mut parts = Vec::new();
        if self.has_action(Action::Timestamp) {
            parts.push(QName::new(ns::WSU, ns::node::TIMESTAMP));
        }
        parts.push(QName::new(soap_ns, ns::node::BODY));
        parts
    }

    /// Encryption parts with the default applied.
    pub fn effective_encryption_parts(&self, soap_ns: &str) -> Vec<SecurePart> {
        if !self.encryption_parts.is_empty() {
            return self.encryption_parts.clone();
        }
        vec![SecurePart::content(QName::new(soap_ns, ns::node::BODY))]
    }
}

impl Default for OutboundProperties {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
            timestamp_ttl: Duration::seconds(300),
            timestamp_created: None,
            signature_key: None,
            signature_algorithm: algorithm::HMAC_SHA256.to_owned(),
            digest_algorithm: algorithm::SHA256.to_owned(),
            c14n_algorithm: algorithm::EXC_C14N.to_owned(),
            signature_parts: Vec::new(),
            signature_key_reference: KeyReference::DirectReference,
            encryption_key: None,
            encryption_algorithm: algorithm::AES256_CBC.to_owned(),
            encryption_parts: Vec::new(),
            must_understand: true,
        }
    }
}
