#![forbid(unsafe_code)]

//! The key/credential resolution collaborator.

use std::time::SystemTime;

use solna_core::Error;

use crate::reference::TokenReference;
use crate::token::{SecurityToken, TokenKind};

/// Resolves token references that the message itself cannot satisfy:
/// external URIs, key names, issuer+serial and subject key identifiers of
/// certificates that were not sent inline, and SAML assertion ids.
///
/// Implementations fail with [`Error::KeyNotFound`] for unknown references.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, reference: &TokenReference) -> Result<SecurityToken, Error>;

    /// Decide whether a credential the message carries itself (a
    /// certificate or a bare public key) may be used to verify it at `at`.
    ///
    /// Without trust anchors nothing asymmetric is trusted.
    fn check_trust(&self, token: &SecurityToken, at: SystemTime) -> Result<(), Error> {
        let _ = at;
        match token.kind {
            TokenKind::Symmetric | TokenKind::Saml => Ok(()),
            TokenKind::X509 | TokenKind::PublicKey | TokenKind::Https => Err(Error::Certificate(
                format!("no trust anchors configured for {} token {}", token.kind, token.id),
            )),
        }
    }
}

/// A resolver that knows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoKeys;

impl KeyResolver for NoKeys {
    fn resolve(&self, reference: &TokenReference) -> Result<SecurityToken, Error> {
        Err(Error::KeyNotFound(format!("no key resolver configured for {reference}")))
    }
}
