#![forbid(unsafe_code)]

//! Turning a `ds:KeyInfo` into a registered security token.
//!
//! Tokens already registered for this message are preferred; anything else
//! goes to the configured [`solna_keys::KeyResolver`] and the result is
//! registered so later references find it directly.

use std::sync::Arc;
use std::time::SystemTime;

use solna_core::Error;
use solna_keys::keyinfo::parse_key_info;
use solna_keys::{KeyInfoContent, SecurityToken, TokenKind, TokenOrigin, TokenReference};
use solna_xml::XmlElement;
use tracing::debug;

use crate::properties::SecurityProperties;
use crate::security::SecurityContext;

/// Resolve the token a KeyInfo names.
pub(crate) fn resolve_key_info(
    key_info: Option<&XmlElement>,
    security: &mut SecurityContext,
    properties: &SecurityProperties,
) -> Result<Arc<SecurityToken>, Error> {
    let key_info = key_info.ok_or_else(|| Error::MissingElement("KeyInfo".into()))?;
    let content = parse_key_info(key_info)?.ok_or_else(|| {
        Error::KeyNotFound(format!(
            "KeyInfo at {} names no supported key",
            solna_xml::path_to_string(&key_info.path)
        ))
    })?;
    resolve_content(content, security, properties)
}

pub(crate) fn resolve_content(
    content: KeyInfoContent,
    security: &mut SecurityContext,
    properties: &SecurityProperties,
) -> Result<Arc<SecurityToken>, Error> {
    match content {
        KeyInfoContent::Reference(reference) => resolve_reference(&reference, security, properties),
        KeyInfoContent::KeyValue(key) => {
            if let Some(existing) = security.tokens_with_key(&key).next() {
                return Ok(Arc::clone(existing));
            }
            let id = format!("KeyValue-{}", security.tokens().len() + 1);
            security.register_token(SecurityToken::public_key(id, key, TokenOrigin::KeyInfo))
        }
        KeyInfoContent::Certificate(cert) => {
            if let Some(existing) = security.tokens_with_certificate(&cert).next() {
                return Ok(Arc::clone(existing));
            }
            let id = format!("X509-{}", security.tokens().len() + 1);
            security.register_token(SecurityToken::x509(id, cert, TokenOrigin::KeyInfo)?)
        }
    }
}

/// Resolve a token reference against the message, then the resolver.
pub(crate) fn resolve_reference(
    reference: &TokenReference,
    security: &mut SecurityContext,
    properties: &SecurityProperties,
) -> Result<Arc<SecurityToken>, Error> {
    if let Some(token) = security.find_token(reference) {
        debug!(%reference, token = %token.id, "reference resolved in message");
        return Ok(Arc::clone(token));
    }
    if reference.local_id().is_some() {
        return Err(Error::UnresolvableReference(format!(
            "{reference} does not name a token of this message"
        )));
    }
    let token = properties.resolver.resolve(reference)?;
    debug!(%reference, token = %token.id, kind = %token.kind, "reference resolved by key resolver");
    if let Some(existing) = security.token(&token.id) {
        return Ok(Arc::clone(existing));
    }
    security.register_token(token)
}

/// Refuse to verify with a credential the message supplied unless the
/// resolver trusts it.  Keys the resolver or the transport configuration
/// supplied are trusted as they are.
pub(crate) fn ensure_trusted(token: &SecurityToken, properties: &SecurityProperties) -> Result<(), Error> {
    match token.origin {
        TokenOrigin::Resolver | TokenOrigin::Transport => Ok(()),
        TokenOrigin::Header | TokenOrigin::KeyInfo => {
            properties.resolver.check_trust(token, SystemTime::from(properties.now()))
        }
    }
}

/// [`ensure_trusted`] for message signatures, which may also be made with
/// the subject key of an accepted SAML assertion.
pub(crate) fn ensure_signer_trusted(
    token: &SecurityToken,
    security: &SecurityContext,
    properties: &SecurityProperties,
) -> Result<(), Error> {
    if let Some(key) = &token.key {
        if let Some(saml) = security
            .tokens_with_key(key)
            .find(|candidate| candidate.kind == TokenKind::Saml)
        {
            debug!(token = %token.id, assertion = %saml.id, "key confirmed by SAML assertion");
            return Ok(());
        }
    }
    ensure_trusted(token, properties)
}

/// Resolve a shared key by name.
pub(crate) fn resolve_by_name(
    name: &str,
    security: &mut SecurityContext,
    properties: &SecurityProperties,
) -> Result<Arc<SecurityToken>, Error> {
    resolve_reference(&TokenReference::KeyName(name.to_owned()), security, properties)
}
