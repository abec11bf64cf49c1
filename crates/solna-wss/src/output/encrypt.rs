#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_core::{algorithm, ns, Error};
use solna_crypto::cipher;
use solna_xml::{write_events, Attribute, Namespace, QName, XmlEvent};
use tracing::{debug, info};

use super::{ds, wsse, xenc, HeaderTail, TailStep};
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::{is_security_header, NamespaceTracker};
use crate::dsig::encode;
use crate::event::{AlgorithmUsage, SecurityEvent};
use crate::properties::{OutboundProperties, SecurePart};

/// A part being collected for encryption.
struct Capture {
    part: SecurePart,
    element_path: Vec<QName>,
    /// Bindings in scope where the plaintext will sit.
    scope: Vec<Namespace>,
    /// Elements opened inside the capture and not yet closed.
    open: usize,
    events: Vec<XmlEvent>,
}

/// Replaces each part to encrypt with an `xenc:EncryptedData`.
///
/// Content parts keep their element and have the children replaced;
/// element parts are replaced whole.
pub struct EncryptOutput {
    properties: Arc<OutboundProperties>,
    parts: Vec<SecurePart>,
    found: Vec<bool>,
    tracker: NamespaceTracker,
    current: Option<Capture>,
    generated: usize,
}

impl EncryptOutput {
    pub fn new(properties: Arc<OutboundProperties>) -> Result<Self, Error> {
        if properties.encryption_key.is_none() {
            return Err(Error::Key("encryption requested without a key".into()));
        }
        cipher::from_uri(&properties.encryption_algorithm)?;
        Ok(Self {
            properties,
            parts: Vec::new(),
            found: Vec::new(),
            tracker: NamespaceTracker::default(),
            current: None,
            generated: 0,
        })
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(capture) = self.current.as_mut() {
            match &event {
                XmlEvent::StartElement(_) => capture.open += 1,
                XmlEvent::EndElement(_) if capture.open == 0 => {
                    // end tag of a content part: the element itself stays
                    if let Some(done) = self.current.take() {
                        self.encrypt(done, chain)?;
                    }
                    return chain.forward(event);
                }
                XmlEvent::EndElement(_) => capture.open -= 1,
                _ => {}
            }
            capture.events.push(event);
            if !capture.part.content_only && capture.open == 0 {
                if let Some(done) = self.current.take() {
                    self.encrypt(done, chain)?;
                }
            }
            return Ok(());
        }

        match &event {
            XmlEvent::StartElement(start) => {
                if start.depth() == 1 {
                    self.parts = self.properties.effective_encryption_parts(&start.name.ns);
                    self.found = vec![false; self.parts.len()];
                }
                let scope = self.tracker.enter(start, chain.document());
                let in_header = start.path.len() >= 3 && is_security_header(&start.path[..3]);
                let matched = self.parts.iter().position(|part| part.name == start.name);
                if let (Some(index), false) = (matched, in_header) {
                    self.found[index] = true;
                    let part = self.parts[index].clone();
                    let element_path = start.path.clone();
                    if part.content_only {
                        self.current = Some(Capture {
                            part,
                            element_path,
                            scope: self.tracker.current().to_vec(),
                            open: 0,
                            events: Vec::new(),
                        });
                        return chain.forward(event);
                    }
                    self.current = Some(Capture {
                        part,
                        element_path,
                        scope,
                        open: 1,
                        events: vec![event],
                    });
                    return Ok(());
                }
            }
            XmlEvent::EndDocument => {
                if let Some((part, _)) = self.parts.iter().zip(&self.found).find(|(_, found)| !**found) {
                    return Err(Error::MissingElement(format!("{} to encrypt", part.name)));
                }
            }
            _ => {}
        }
        chain.forward(event)
    }

    fn encrypt(&mut self, mut capture: Capture, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let properties = Arc::clone(&self.properties);
        let key = properties
            .encryption_key
            .as_ref()
            .ok_or_else(|| Error::Key("encryption requested without a key".into()))?;
        let content_only = capture.part.content_only;
        let parent_path = if content_only {
            capture.element_path.clone()
        } else {
            capture.element_path[..capture.element_path.len() - 1].to_vec()
        };

        // the plaintext carries the bindings it relies on
        for event in capture.events.iter_mut() {
            let Some(start) = event.as_start_mut() else { continue };
            if start.path.len() != parent_path.len() + 1 {
                continue;
            }
            for binding in &capture.scope {
                let unqualified = binding.prefix.is_empty() && start.name.ns.is_empty();
                if !unqualified && !start.namespaces.iter().any(|own| own.prefix == binding.prefix) {
                    start.namespaces.push(binding.clone());
                }
            }
        }
        let plaintext = write_events(&capture.events);
        let ciphertext = cipher::from_uri(&properties.encryption_algorithm)?
            .encrypt(key.material.secret()?, plaintext.as_bytes())?;

        self.generated += 1;
        let id = format!("ED-{}", self.generated);
        let type_uri = if content_only {
            algorithm::ENC_TYPE_CONTENT
        } else {
            algorithm::ENC_TYPE_ELEMENT
        };
        {
            let mut sub = chain.sub_chain_at(parent_path)?;
            sub.start_with(
                xenc(ns::node::ENCRYPTED_DATA),
                vec![
                    Attribute::new(QName::local(ns::attr::ID), id.as_str()),
                    Attribute::new(QName::local(ns::attr::TYPE), type_uri),
                ],
                vec![Namespace::new(ns::prefix::ENC, ns::ENC)],
            )?;
            sub.leaf(
                xenc(ns::node::ENCRYPTION_METHOD),
                vec![Attribute::new(QName::local(ns::attr::ALGORITHM), properties.encryption_algorithm.as_str())],
                "",
            )?;
            sub.start_with(
                ds(ns::node::KEY_INFO),
                Vec::new(),
                vec![Namespace::new(ns::prefix::DSIG, ns::DSIG)],
            )?;
            sub.start_with(
                wsse(ns::node::SECURITY_TOKEN_REFERENCE),
                Vec::new(),
                vec![Namespace::new(ns::prefix::WSSE, ns::WSSE)],
            )?;
            sub.leaf(
                wsse(ns::node::REFERENCE),
                vec![Attribute::new(QName::local(ns::attr::URI), key.name.as_str())],
                "",
            )?;
            sub.end()?;
            sub.end()?;
            sub.start_with(xenc(ns::node::CIPHER_DATA), Vec::new(), Vec::new())?;
            sub.leaf(xenc(ns::node::CIPHER_VALUE), Vec::new(), &encode(&ciphertext))?;
            sub.end()?;
            sub.end()?;
        }
        debug!(%id, content_only, bytes = plaintext.len(), "part encrypted");

        let security = chain.security_mut();
        security.register_event(SecurityEvent::EncryptedPart {
            path: capture.element_path,
            id,
            algorithm: properties.encryption_algorithm.clone(),
            content_only,
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: properties.encryption_algorithm.clone(),
            usage: AlgorithmUsage::Encryption,
        });
        Ok(())
    }
}

impl Processor for EncryptOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::EncryptOutput
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn after(&self) -> &[ProcessorKind] {
        &[ProcessorKind::SignatureOutput, ProcessorKind::TimestampOutput]
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        match &self.current {
            Some(capture) => Err(Error::Chain(format!(
                "message ended inside {} to encrypt",
                capture.part.name
            ))),
            None => Ok(()),
        }
    }
}

/// Appends `xenc:ReferenceList` naming every `EncryptedData` written.
pub struct EncryptEndingOutput {
    tail: HeaderTail,
}

impl EncryptEndingOutput {
    pub fn new() -> Self {
        Self {
            tail: HeaderTail::default(),
        }
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        match self.tail.observe(event, chain.document())? {
            TailStep::Forward(event) => chain.forward(event),
            TailStep::Held => Ok(()),
            TailStep::Release(events) => {
                let ids: Vec<String> = chain
                    .security()
                    .events()
                    .iter()
                    .filter_map(|event| match event {
                        SecurityEvent::EncryptedPart { id, .. } => Some(id.clone()),
                        _ => None,
                    })
                    .collect();
                if !ids.is_empty() {
                    let (security_path, _) = self.tail.security()?;
                    let mut sub = chain.sub_chain_at(security_path.to_vec())?;
                    sub.start_with(
                        xenc(ns::node::REFERENCE_LIST),
                        Vec::new(),
                        vec![Namespace::new(ns::prefix::ENC, ns::ENC)],
                    )?;
                    for id in &ids {
                        sub.leaf(
                            xenc(ns::node::DATA_REFERENCE),
                            vec![Attribute::new(QName::local(ns::attr::URI), format!("#{id}"))],
                            "",
                        )?;
                    }
                    sub.end()?;
                    info!(parts = ids.len(), "message encrypted");
                }
                for event in events {
                    chain.forward(event)?;
                }
                Ok(())
            }
        }
    }
}

impl Default for EncryptEndingOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for EncryptEndingOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::EncryptEndingOutput
    }

    fn phase(&self) -> Phase {
        Phase::PostProcess
    }

    fn after(&self) -> &[ProcessorKind] {
        &[ProcessorKind::SignatureEndingOutput]
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if self.tail.is_holding() {
            return Err(Error::Chain("message ended before the reference list could be written".into()));
        }
        Ok(())
    }
}
