#![forbid(unsafe_code)]

//! In-memory key store implementing [`KeyResolver`].

use std::time::SystemTime;

use solna_core::Error;
use tracing::debug;

use crate::key::Key;
use crate::reference::TokenReference;
use crate::resolver::KeyResolver;
use crate::token::{SecurityToken, TokenKind};
use crate::trust::TrustAnchors;
use crate::x509::X509Certificate;

/// Manages a collection of named keys and certificates, and the trust
/// anchors that certificates sent in messages must chain to.
#[derive(Debug, Default, Clone)]
pub struct KeysManager {
    keys: Vec<Key>,
    trust: TrustAnchors,
}

impl KeysManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key.  A later key with the same name shadows nothing: lookups
    /// return the first match.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Builder form of [`Self::add_key`].
    pub fn with_key(mut self, key: Key) -> Self {
        self.add_key(key);
        self
    }

    pub fn add_trusted_certificate(&mut self, cert: X509Certificate) {
        self.trust.add_trusted(cert);
    }

    pub fn with_trusted_certificate(mut self, cert: X509Certificate) -> Self {
        self.add_trusted_certificate(cert);
        self
    }

    /// Add an untrusted certificate usable for building chains.
    pub fn add_intermediate_certificate(&mut self, cert: X509Certificate) {
        self.trust.add_intermediate(cert);
    }

    pub fn with_intermediate_certificate(mut self, cert: X509Certificate) -> Self {
        self.add_intermediate_certificate(cert);
        self
    }

    pub fn trust_anchors(&self) -> &TrustAnchors {
        &self.trust
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name == name)
    }

    /// Find the key whose certificate has the given issuer DN and serial.
    pub fn find_by_issuer_serial(&self, issuer: &str, serial: &str) -> Option<&Key> {
        self.keys.iter().find(|k| {
            k.certificate()
                .is_some_and(|c| c.matches_issuer_serial(issuer, serial))
        })
    }

    /// Find the key whose certificate has the given subject key identifier.
    pub fn find_by_subject_key_identifier(&self, ski: &[u8]) -> Option<&Key> {
        self.keys.iter().find(|k| {
            k.certificate()
                .and_then(|c| c.subject_key_identifier().ok())
                .is_some_and(|own| own == ski)
        })
    }

    /// The first key, for single-key setups.
    pub fn first_key(&self) -> Result<&Key, Error> {
        self.keys
            .first()
            .ok_or_else(|| Error::KeyNotFound("no keys in manager".into()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyResolver for KeysManager {
    fn resolve(&self, reference: &TokenReference) -> Result<SecurityToken, Error> {
        let key = match reference {
            TokenReference::Direct { uri, .. } => {
                if uri.starts_with('#') {
                    return Err(Error::UnresolvableReference(format!(
                        "{uri} does not name a token in the message"
                    )));
                }
                self.find_by_name(uri)
            }
            TokenReference::KeyName(name) | TokenReference::SamlAssertionId(name) => {
                self.find_by_name(name)
            }
            TokenReference::IssuerSerial { issuer, serial } => {
                self.find_by_issuer_serial(issuer, serial)
            }
            TokenReference::SubjectKeyIdentifier(ski) => self.find_by_subject_key_identifier(ski),
        };
        let key = key.ok_or_else(|| Error::KeyNotFound(format!("no key for {reference}")))?;
        debug!(key = %key.name, %reference, "resolved key");
        Ok(key.to_token())
    }

    fn check_trust(&self, token: &SecurityToken, at: SystemTime) -> Result<(), Error> {
        match token.kind {
            TokenKind::Symmetric | TokenKind::Saml => Ok(()),
            TokenKind::X509 | TokenKind::Https => {
                let leaf = token.certificate().ok_or_else(|| {
                    Error::Certificate(format!("token {} carries no certificate", token.id))
                })?;
                // a certificate configured with one of our keys is trusted as is
                if self.keys.iter().any(|key| key.certificate() == Some(leaf)) {
                    return leaf.check_validity(at);
                }
                self.trust.validate(&token.certificates, at)
            }
            TokenKind::PublicKey => {
                let key = token.key()?;
                let known = self
                    .keys
                    .iter()
                    .any(|own| !own.material.is_secret() && own.material.matches(key));
                if known || self.trust.trusts_key(key) {
                    Ok(())
                } else {
                    Err(Error::Certificate(format!(
                        "public key of token {} is not trusted",
                        token.id
                    )))
                }
            }
        }
    }
}
