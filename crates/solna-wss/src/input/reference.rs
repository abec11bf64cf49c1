#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use solna_core::Error;
use solna_xml::{QName, XmlEvent};
use tracing::{debug, trace};

use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::{ContextFlag, NamespaceTracker};
use crate::dsig::{check_digest, ReferenceDigest, ReferenceSpec};
use crate::event::{AlgorithmUsage, SecurityEvent};
use crate::properties::SecurityProperties;

struct ActiveDigest {
    spec: ReferenceSpec,
    id: String,
    path: Vec<QName>,
    digest: ReferenceDigest,
    /// Injected or replayed: the document cursor does not follow the
    /// element, so its flag is cleared when the digest completes.
    detached: bool,
}

/// Digests the elements a verified `SignedInfo` references.
///
/// Each referenced id must appear exactly once in the message.  A second
/// element carrying an id that was already digested (or is being digested)
/// fails the message, and so does a reference whose target never showed up.
pub struct SignatureReferenceProcessor {
    token: String,
    pending: Vec<ReferenceSpec>,
    active: Vec<ActiveDigest>,
    verified: HashSet<String>,
    tracker: NamespaceTracker,
    properties: Arc<SecurityProperties>,
}

impl SignatureReferenceProcessor {
    pub fn new(
        references: Vec<ReferenceSpec>,
        token: String,
        properties: Arc<SecurityProperties>,
    ) -> Result<Self, Error> {
        for reference in &references {
            reference.target_id()?;
        }
        Ok(Self {
            token,
            pending: references,
            active: Vec::new(),
            verified: HashSet::new(),
            tracker: NamespaceTracker::default(),
            properties,
        })
    }

    /// Feed one event, live or replayed from the header buffer.
    pub fn observe(&mut self, event: &XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let mut index = 0;
        while index < self.active.len() {
            if self.active[index].digest.write(event)? {
                let done = self.active.remove(index);
                self.complete(done, chain)?;
            } else {
                index += 1;
            }
        }

        let XmlEvent::StartElement(start) = event else {
            return Ok(());
        };
        let scope = self.tracker.enter(start, chain.document());
        let Some(id) = start.id(&self.properties.id_attrs) else {
            return Ok(());
        };
        if self.verified.contains(id) || self.active.iter().any(|a| a.id == id) {
            return Err(Error::InvalidSecurity(format!(
                "id \"{id}\" of a signed element occurs more than once"
            )));
        }

        let mut position = 0;
        while position < self.pending.len() {
            if self.pending[position].target_id()? != id {
                position += 1;
                continue;
            }
            let spec = self.pending.remove(position);
            trace!(%id, element = %start.name, "digesting referenced element");
            let digest = ReferenceDigest::for_reference(&spec, start, &scope)?;
            self.active.push(ActiveDigest {
                spec,
                id: id.to_owned(),
                path: start.path.clone(),
                digest,
                detached: start.path != chain.document().path(),
            });
        }
        if self.active.iter().any(|a| a.id == id) {
            chain.document_mut().set_flag(ContextFlag::SignedContent);
        }
        Ok(())
    }

    fn complete(&mut self, done: ActiveDigest, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if done.detached {
            chain.document_mut().clear_flag(ContextFlag::SignedContent);
        }
        let computed = done.digest.finish();
        check_digest(&done.spec, &computed, &done.path)?;
        debug!(id = %done.id, token = %self.token, "reference digest verified");
        let security = chain.security_mut();
        security.register_event(SecurityEvent::SignedElement {
            path: done.path,
            id: done.id.clone(),
            token: self.token.clone(),
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: done.spec.digest_method,
            usage: AlgorithmUsage::Digest,
        });
        self.verified.insert(done.id);
        Ok(())
    }
}

impl Processor for SignatureReferenceProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SignatureReference
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(&event, chain)?;
        chain.forward(event)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(&event, chain)?;
        chain.forward(event)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let missing: Vec<&str> = self
            .pending
            .iter()
            .map(|r| r.uri.as_str())
            .chain(self.active.iter().map(|a| a.spec.uri.as_str()))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::UnresolvableReference(format!(
                "signed by {}: no element found for {}",
                self.token,
                missing.join(", ")
            )))
        }
    }
}
