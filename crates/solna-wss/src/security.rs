#![forbid(unsafe_code)]

//! Per-message security state shared by every processor of a chain.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use solna_core::Error;
use solna_keys::{SecurityToken, TokenKind, TokenReference, X509Certificate};
use solna_crypto::KeyMaterial;
use tracing::debug;

use crate::event::{SecurityEvent, SecurityEventListener};
use crate::dsig::DigestedReference;

/// Token registry, event log and listeners for one message.
#[derive(Default)]
pub struct SecurityContext {
    tokens: Vec<Arc<SecurityToken>>,
    index: HashMap<String, usize>,
    events: Vec<SecurityEvent>,
    listeners: Vec<Box<dyn SecurityEventListener>>,
    digested: Vec<DigestedReference>,
}

impl SecurityContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a verified token.  Ids are unique for the lifetime of the
    /// message; a second registration under the same id fails.
    pub fn register_token(&mut self, mut token: SecurityToken) -> Result<Arc<SecurityToken>, Error> {
        if self.index.contains_key(&token.id) {
            return Err(Error::DuplicateToken(token.id));
        }
        token.introduced_by = Some(self.events.len());
        self.register_event(SecurityEvent::TokenValidated {
            token: token.id.clone(),
            kind: token.kind,
        });
        debug!(token = %token.id, kind = %token.kind, "registered security token");
        let token = Arc::new(token);
        self.index.insert(token.id.clone(), self.tokens.len());
        self.tokens.push(Arc::clone(&token));
        Ok(token)
    }

    pub fn token(&self, id: &str) -> Option<&Arc<SecurityToken>> {
        self.index.get(id).map(|&i| &self.tokens[i])
    }

    /// Registered tokens in registration order.
    pub fn tokens(&self) -> &[Arc<SecurityToken>] {
        &self.tokens
    }

    /// Find a registered token satisfying `reference`.
    pub fn find_token(&self, reference: &TokenReference) -> Option<&Arc<SecurityToken>> {
        match reference {
            TokenReference::Direct { .. } => reference.local_id().and_then(|id| self.token(id)),
            TokenReference::SamlAssertionId(id) => {
                self.token(id).filter(|t| t.kind == TokenKind::Saml)
            }
            TokenReference::IssuerSerial { issuer, serial } => self.tokens.iter().find(|t| {
                t.certificate()
                    .is_some_and(|c| c.matches_issuer_serial(issuer, serial))
            }),
            TokenReference::SubjectKeyIdentifier(ski) => self.tokens.iter().find(|t| {
                t.certificate()
                    .and_then(|c| c.subject_key_identifier().ok())
                    .is_some_and(|own| &own == ski)
            }),
            TokenReference::KeyName(name) => self.token(name),
        }
    }

    /// Tokens holding `cert` as their leaf certificate.
    pub fn tokens_with_certificate<'a>(
        &'a self,
        cert: &'a X509Certificate,
    ) -> impl Iterator<Item = &'a Arc<SecurityToken>> + 'a {
        self.tokens.iter().filter(move |t| t.has_certificate(cert))
    }

    /// Tokens whose key matches `key`.
    pub fn tokens_with_key<'a>(
        &'a self,
        key: &'a KeyMaterial,
    ) -> impl Iterator<Item = &'a Arc<SecurityToken>> + 'a {
        self.tokens.iter().filter(move |t| t.has_key(key))
    }

    /// Append to the event log and notify listeners.
    pub fn register_event(&mut self, event: SecurityEvent) {
        for listener in &mut self.listeners {
            listener.on_event(&event);
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[SecurityEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<SecurityEvent> {
        self.events
    }

    pub fn add_listener(&mut self, listener: Box<dyn SecurityEventListener>) {
        self.listeners.push(listener);
    }

    /// Ids of tokens that produced a verified `SignatureValue`.
    pub fn signing_tokens(&self) -> Vec<&Arc<SecurityToken>> {
        let mut out: Vec<&Arc<SecurityToken>> = Vec::new();
        for event in &self.events {
            if let SecurityEvent::SignatureValue { token, .. } = event {
                if let Some(t) = self.token(token) {
                    if !out.iter().any(|seen| seen.id == t.id) {
                        out.push(t);
                    }
                }
            }
        }
        out
    }

    pub(crate) fn digested_mut(&mut self) -> &mut Vec<DigestedReference> {
        &mut self.digested
    }

    pub(crate) fn take_digested(&mut self) -> Vec<DigestedReference> {
        std::mem::take(&mut self.digested)
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("tokens", &self.tokens.iter().map(|t| &t.id).collect::<Vec<_>>())
            .field("events", &self.events.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
