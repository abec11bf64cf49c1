#![forbid(unsafe_code)]

//! Security tokens: credentials extracted from (or bound to) a message.

use std::fmt;

use solna_core::Error;
use solna_crypto::KeyMaterial;

use crate::x509::X509Certificate;

/// What kind of credential a token carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// X.509 certificate (BinarySecurityToken or X509Data).
    X509,
    /// Bare public key (`ds:KeyValue`).
    PublicKey,
    /// Shared secret resolved by name or reference.
    Symmetric,
    /// SAML 1.1 / 2.0 assertion.
    Saml,
    /// Authenticated transport channel (TLS client certificate).
    Https,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::X509 => "X509",
            Self::PublicKey => "KeyValue",
            Self::Symmetric => "Symmetric",
            Self::Saml => "SAML",
            Self::Https => "HTTPS",
        };
        f.write_str(s)
    }
}

/// Where a token came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOrigin {
    /// Parsed from an element of the security header.
    Header,
    /// Embedded in a `ds:KeyInfo`.
    KeyInfo,
    /// Supplied by the key resolver.
    Resolver,
    /// Supplied by configuration (transport credentials).
    Transport,
}

/// A verified credential.  Immutable once registered.
#[derive(Clone)]
pub struct SecurityToken {
    pub id: String,
    pub kind: TokenKind,
    /// Leaf first.
    pub certificates: Vec<X509Certificate>,
    pub key: Option<KeyMaterial>,
    pub origin: TokenOrigin,
    /// Index of the security event that introduced this token.
    pub introduced_by: Option<usize>,
}

impl SecurityToken {
    /// A token carrying an X.509 certificate; the key is the certificate's
    /// subject public key.
    pub fn x509(id: impl Into<String>, cert: X509Certificate, origin: TokenOrigin) -> Result<Self, Error> {
        let key = cert.public_key()?;
        Ok(Self {
            id: id.into(),
            kind: TokenKind::X509,
            certificates: vec![cert],
            key: Some(key),
            origin,
            introduced_by: None,
        })
    }

    pub fn public_key(id: impl Into<String>, key: KeyMaterial, origin: TokenOrigin) -> Self {
        Self {
            id: id.into(),
            kind: TokenKind::PublicKey,
            certificates: Vec::new(),
            key: Some(key),
            origin,
            introduced_by: None,
        }
    }

    pub fn symmetric(id: impl Into<String>, secret: Vec<u8>, origin: TokenOrigin) -> Self {
        Self {
            id: id.into(),
            kind: TokenKind::Symmetric,
            certificates: Vec::new(),
            key: Some(KeyMaterial::Secret(secret)),
            origin,
            introduced_by: None,
        }
    }

    /// The transport (TLS client) credential.
    pub fn https(cert: X509Certificate) -> Result<Self, Error> {
        let mut token = Self::x509("transport", cert, TokenOrigin::Transport)?;
        token.kind = TokenKind::Https;
        Ok(token)
    }

    /// Leaf certificate, if any.
    pub fn certificate(&self) -> Option<&X509Certificate> {
        self.certificates.first()
    }

    /// Key material, or a `KeyNotFound` error naming this token.
    pub fn key(&self) -> Result<&KeyMaterial, Error> {
        self.key
            .as_ref()
            .ok_or_else(|| Error::KeyNotFound(format!("token {} carries no key", self.id)))
    }

    /// Does this token hold `cert` as its leaf certificate?
    pub fn has_certificate(&self, cert: &X509Certificate) -> bool {
        self.certificate() == Some(cert)
    }

    /// Does this token's key match `key` (public halves compared)?
    pub fn has_key(&self, key: &KeyMaterial) -> bool {
        self.key.as_ref().is_some_and(|k| k.matches(key))
    }
}

impl fmt::Debug for SecurityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityToken")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("origin", &self.origin)
            .field("certificate", &self.certificate())
            .field("key", &self.key)
            .finish()
    }
}
