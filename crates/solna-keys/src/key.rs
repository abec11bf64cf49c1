#![forbid(unsafe_code)]

//! Named keys held by a [`crate::KeysManager`].

use solna_crypto::KeyMaterial;

use crate::token::{SecurityToken, TokenOrigin};
use crate::x509::X509Certificate;

/// A named key with an optional certificate chain (leaf first).
#[derive(Debug, Clone)]
pub struct Key {
    pub name: String,
    pub material: KeyMaterial,
    pub certificates: Vec<X509Certificate>,
}

impl Key {
    pub fn new(name: impl Into<String>, material: KeyMaterial) -> Self {
        Self {
            name: name.into(),
            material,
            certificates: Vec::new(),
        }
    }

    /// A shared secret (HMAC or content-encryption key).
    pub fn secret(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(name, KeyMaterial::Secret(bytes))
    }

    pub fn with_certificate(mut self, cert: X509Certificate) -> Self {
        self.certificates.push(cert);
        self
    }

    pub fn certificate(&self) -> Option<&X509Certificate> {
        self.certificates.first()
    }

    /// The token a resolver hands out for this key.
    pub fn to_token(&self) -> SecurityToken {
        let mut token = match &self.material {
            KeyMaterial::Secret(bytes) => {
                SecurityToken::symmetric(&self.name, bytes.clone(), TokenOrigin::Resolver)
            }
            other => SecurityToken::public_key(&self.name, other.clone(), TokenOrigin::Resolver),
        };
        if !self.certificates.is_empty() {
            token.kind = crate::token::TokenKind::X509;
            token.certificates = self.certificates.clone();
        }
        token
    }
}
