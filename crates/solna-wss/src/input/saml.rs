#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use solna_core::{ns, Error};
use solna_keys::{SecurityToken, TokenKind, TokenOrigin, TokenReference};
use solna_xml::{Namespace, StartElement, XmlElement, XmlEvent, XmlTree};
use tracing::{debug, info};

use super::Captured;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::is_body;
use crate::dsig::{check_digest, parse_signature, verify_signed_info, ReferenceDigest};
use crate::event::{SecurityEvent, SubjectConfirmation};
use crate::properties::SecurityProperties;
use crate::resolve::{ensure_trusted, resolve_key_info};
use crate::saml::{SamlAssertion, SubjectKey};

/// Accepts a SAML assertion from the security header as a token.
pub struct SamlTokenProcessor {
    captured: Captured,
    /// Bindings in scope at the assertion's parent.
    scope: Vec<Namespace>,
    properties: Arc<SecurityProperties>,
}

impl SamlTokenProcessor {
    pub fn new(start: StartElement, scope: Vec<Namespace>, properties: Arc<SecurityProperties>) -> Result<Self, Error> {
        Ok(Self {
            captured: Captured::new(start, properties.max_buffered_events)?,
            scope,
            properties,
        })
    }

    fn accept(&self, tree: &XmlTree, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let element = tree.root();
        let assertion = SamlAssertion::parse(element)?;
        let now = self.properties.now();
        assertion.check_conditions(now)?;

        let signed = match element.child(ns::DSIG, ns::node::SIGNATURE) {
            Some(signature) => {
                self.verify_enveloped(tree, signature, &assertion.id, chain)?;
                true
            }
            None => false,
        };

        let mut token = SecurityToken {
            id: assertion.id.clone(),
            kind: TokenKind::Saml,
            certificates: Vec::new(),
            key: None,
            origin: TokenOrigin::Header,
            introduced_by: None,
        };
        match &assertion.subject_key {
            Some(SubjectKey::Certificate(cert)) => {
                token.key = Some(cert.public_key()?);
                token.certificates.push(cert.clone());
            }
            Some(SubjectKey::Key(key)) => token.key = Some(key.clone()),
            None => {}
        }

        let confirmation = assertion.confirmation();
        if !signed && confirmation != SubjectConfirmation::HolderOfKey {
            // an unsigned assertion cannot vouch for a key
            token.key = None;
            token.certificates.clear();
        }
        if confirmation == SubjectConfirmation::HolderOfKey && !signed {
            // only a secret the resolver holds for this assertion vouches for it
            let secret = self
                .properties
                .resolver
                .resolve(&TokenReference::SamlAssertionId(assertion.id.clone()))
                .ok()
                .and_then(|resolved| resolved.key)
                .filter(|key| key.is_secret())
                .ok_or_else(|| {
                    Error::AuthenticationFailed(format!(
                        "holder-of-key assertion {} is unsigned and no secret is known for it",
                        assertion.id
                    ))
                })?;
            token.key = Some(secret);
        }

        if let Some(cache) = &self.properties.replay_cache {
            let until = assertion
                .not_on_or_after
                .unwrap_or(now + self.properties.timestamp_ttl);
            if !cache.check_and_record(&format!("saml#{}", assertion.id), until, now)? {
                return Err(Error::Replay(format!("SAML assertion {} was seen before", assertion.id)));
            }
        }

        let security = chain.security_mut();
        security.register_token(token)?;
        security.register_event(SecurityEvent::SamlToken {
            id: assertion.id.clone(),
            issuer: assertion.issuer.clone(),
            confirmation,
        });
        info!(id = %assertion.id, issuer = %assertion.issuer, ?confirmation, signed, "SAML assertion accepted");

        if confirmation != SubjectConfirmation::Bearer {
            chain.add_processor(Box::new(SamlConfirmationProcessor::new(assertion.id, confirmation)));
        }
        Ok(())
    }

    /// Check the issuer's enveloped signature over the whole assertion.
    fn verify_enveloped(
        &self,
        tree: &XmlTree,
        signature: &XmlElement,
        id: &str,
        chain: &mut ChainHandle<'_>,
    ) -> Result<(), Error> {
        let parsed = parse_signature(signature)?;
        let token = resolve_key_info(parsed.key_info.as_ref(), chain.security_mut(), &self.properties)?;
        // the issuer is never vouched for by another assertion
        if token.kind == TokenKind::Saml {
            return Err(Error::InvalidSecurity(format!(
                "SAML assertion {id} is signed with the key of assertion {}",
                token.id
            )));
        }
        ensure_trusted(&token, &self.properties)?;
        let scope = merged_scope(&[
            self.scope.as_slice(),
            tree.root().namespaces.as_slice(),
            signature.namespaces.as_slice(),
        ]);
        verify_signed_info(
            &parsed.signed_info,
            &parsed.signed_info_events,
            &scope,
            token.key()?,
            &parsed.signature_value,
        )?;

        let [reference] = parsed.signed_info.references.as_slice() else {
            return Err(Error::InvalidSecurity(format!(
                "signature of SAML assertion {id} must hold exactly one reference"
            )));
        };
        if reference.target_id()? != id || !reference.enveloped {
            return Err(Error::InvalidSecurity(format!(
                "signature of SAML assertion {id} does not envelope it"
            )));
        }
        let events = tree.events();
        let start = events
            .first()
            .and_then(XmlEvent::as_start)
            .ok_or_else(|| Error::XmlParse(format!("SAML assertion {id} has no start tag")))?;
        let mut digest = ReferenceDigest::for_reference(reference, start, &self.scope)?;
        for event in &events[1..] {
            digest.write(event)?;
        }
        check_digest(reference, &digest.finish(), &start.path)?;
        debug!(%id, issuer_key = %token.id, "SAML assertion signature verified");
        Ok(())
    }
}

fn merged_scope(levels: &[&[Namespace]]) -> Vec<Namespace> {
    let mut scope = BTreeMap::new();
    for binding in levels.iter().flat_map(|level| level.iter()) {
        scope.insert(binding.prefix.clone(), binding.uri.clone());
    }
    scope
        .into_iter()
        .filter(|(_, uri)| !uri.is_empty())
        .map(|(prefix, uri)| Namespace::new(prefix, uri))
        .collect()
}

impl Processor for SamlTokenProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SamlToken
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(tree) = self.captured.push(&event)? {
            self.accept(&tree, chain)?;
            chain.remove_self();
        }
        chain.forward(event)
    }
}

/// Checks, once the body has been seen, that the message proves the
/// assertion's confirmation method.
///
/// Holder-of-key: a signature was made with the subject's key, or the
/// transport channel authenticated it.  Sender-vouches: one token signed
/// both the assertion and the body, or the transport is authenticated.
pub struct SamlConfirmationProcessor {
    assertion: String,
    method: SubjectConfirmation,
    evaluated: bool,
}

impl SamlConfirmationProcessor {
    pub fn new(assertion: String, method: SubjectConfirmation) -> Self {
        Self {
            assertion,
            method,
            evaluated: false,
        }
    }

    fn evaluate(&self, chain: &ChainHandle<'_>) -> Result<(), Error> {
        let security = chain.security();
        let saml = security.token(&self.assertion).ok_or_else(|| {
            Error::AuthenticationFailed(format!("SAML assertion {} is not registered", self.assertion))
        })?;
        let proves = |token: &SecurityToken| {
            saml.certificate().is_some_and(|cert| token.has_certificate(cert))
                || saml.key.as_ref().is_some_and(|key| token.has_key(key))
        };
        let transport: Vec<&SecurityToken> = security
            .tokens()
            .iter()
            .map(|t| &**t)
            .filter(|t| t.kind == TokenKind::Https)
            .collect();

        let confirmed = match self.method {
            SubjectConfirmation::HolderOfKey => {
                security
                    .signing_tokens()
                    .into_iter()
                    .any(|t| t.id == saml.id || proves(&**t))
                    || transport.iter().any(|t| proves(t))
            }
            SubjectConfirmation::SenderVouches => {
                let mut signed_assertion = HashSet::new();
                let mut signed_body = HashSet::new();
                for event in security.events() {
                    if let SecurityEvent::SignedElement { path, id, token } = event {
                        if *id == self.assertion {
                            signed_assertion.insert(token.as_str());
                        }
                        if is_body(path) {
                            signed_body.insert(token.as_str());
                        }
                    }
                }
                signed_assertion.intersection(&signed_body).next().is_some() || !transport.is_empty()
            }
            SubjectConfirmation::Bearer => true,
        };
        if confirmed {
            debug!(assertion = %self.assertion, method = ?self.method, "subject confirmation satisfied");
            Ok(())
        } else {
            Err(Error::AuthenticationFailed(format!(
                "{:?} confirmation of SAML assertion {} is not proven by the message",
                self.method, self.assertion
            )))
        }
    }
}

impl Processor for SamlConfirmationProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SamlConfirmation
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn after(&self) -> &[ProcessorKind] {
        &[ProcessorKind::SignatureReference, ProcessorKind::Decrypt]
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if !self.evaluated && event.is_end() && is_body(chain.document().path()) {
            self.evaluate(chain)?;
            self.evaluated = true;
            chain.remove_self();
        }
        chain.forward(event)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if self.evaluated {
            Ok(())
        } else {
            Err(Error::AuthenticationFailed(format!(
                "message ended before the confirmation of SAML assertion {} could be checked",
                self.assertion
            )))
        }
    }
}
