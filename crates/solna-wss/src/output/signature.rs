#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_c14n::C14nMode;
use solna_core::{algorithm, ns, Error};
use solna_keys::Key;
use solna_xml::{Attribute, Namespace, QName, XmlEvent};
use tracing::{debug, info};

use super::{ds, wsse, wsu, HeaderTail, TailStep};
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind, SubChain};
use crate::context::NamespaceTracker;
use crate::dsig::{encode, sign_signed_info, signed_info_events, DigestedReference, ReferenceDigest};
use crate::event::{AlgorithmUsage, SecurityEvent};
use crate::properties::{KeyReference, OutboundProperties};

const BST_ID: &str = "X509-1";

struct OpenDigest {
    id: String,
    path: Vec<QName>,
    digest: ReferenceDigest,
}

/// Digests the parts to be signed as they stream past, giving each a
/// `wsu:Id` when it has none.
pub struct SignatureOutput {
    properties: Arc<OutboundProperties>,
    c14n: C14nMode,
    parts: Vec<QName>,
    found: Vec<bool>,
    tracker: NamespaceTracker,
    open: Vec<OpenDigest>,
    generated: usize,
}

impl SignatureOutput {
    pub fn new(properties: Arc<OutboundProperties>) -> Result<Self, Error> {
        if properties.signature_key.is_none() {
            return Err(Error::Key("signature requested without a signing key".into()));
        }
        Ok(Self {
            c14n: C14nMode::from_uri(&properties.c14n_algorithm)?,
            properties,
            parts: Vec::new(),
            found: Vec::new(),
            tracker: NamespaceTracker::default(),
            open: Vec::new(),
            generated: 0,
        })
    }

    fn observe(&mut self, mut event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let mut begin = None;
        if let XmlEvent::StartElement(start) = &mut event {
            if start.depth() == 1 {
                self.parts = self.properties.effective_signature_parts(&start.name.ns);
                self.found = vec![false; self.parts.len()];
            }
            let scope = self.tracker.enter(start, chain.document());
            if let Some(index) = self.parts.iter().position(|part| *part == start.name) {
                self.found[index] = true;
                let id = match start.id(&[]) {
                    Some(id) => id.to_owned(),
                    None => {
                        self.generated += 1;
                        let id = format!("{}-{}", start.name.local, self.generated);
                        let declared = scope
                            .iter()
                            .chain(start.namespaces.iter())
                            .any(|b| b.prefix == ns::prefix::WSU && b.uri == ns::WSU);
                        if !declared {
                            start.namespaces.push(Namespace::new(ns::prefix::WSU, ns::WSU));
                        }
                        start.attributes.push(Attribute::new(wsu(ns::attr::ID), id.as_str()));
                        self.tracker.enter(start, chain.document());
                        id
                    }
                };
                begin = Some((id, scope));
            }
        }

        // enclosing digests see the event as it leaves, generated id included
        let mut index = 0;
        while index < self.open.len() {
            if self.open[index].digest.write(&event)? {
                let done = self.open.remove(index);
                self.complete(done, chain);
            } else {
                index += 1;
            }
        }
        if let (Some((id, scope)), XmlEvent::StartElement(start)) = (begin, &event) {
            let digest = ReferenceDigest::start(
                &self.properties.digest_algorithm,
                self.c14n,
                &[],
                false,
                start,
                &scope,
            )?;
            debug!(%id, element = %start.name, "digesting part to sign");
            self.open.push(OpenDigest {
                id,
                path: start.path.clone(),
                digest,
            });
        }

        if matches!(event, XmlEvent::EndDocument) {
            self.check_complete()?;
        }
        chain.forward(event)
    }

    fn complete(&mut self, done: OpenDigest, chain: &mut ChainHandle<'_>) {
        let key_name = self
            .properties
            .signature_key
            .as_ref()
            .map(|key| key.name.clone())
            .unwrap_or_default();
        let security = chain.security_mut();
        security.digested_mut().push(DigestedReference {
            id: done.id.clone(),
            digest_method: self.properties.digest_algorithm.clone(),
            digest: done.digest.finish(),
        });
        security.register_event(SecurityEvent::SignedElement {
            path: done.path,
            id: done.id,
            token: key_name,
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: self.properties.digest_algorithm.clone(),
            usage: AlgorithmUsage::Digest,
        });
    }

    fn check_complete(&self) -> Result<(), Error> {
        if let Some(open) = self.open.first() {
            return Err(Error::InvalidSecurity(format!("part {} to sign never closed", open.id)));
        }
        match self.parts.iter().zip(&self.found).find(|(_, found)| !**found) {
            Some((part, _)) => Err(Error::MissingElement(format!("{part} to sign"))),
            None => Ok(()),
        }
    }
}

impl Processor for SignatureOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SignatureOutput
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn after(&self) -> &[ProcessorKind] {
        &[ProcessorKind::TimestampOutput]
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }
}

/// Appends `ds:Signature` (and the certificate token it references) to the
/// security header once every signed part has been digested.
pub struct SignatureEndingOutput {
    properties: Arc<OutboundProperties>,
    tail: HeaderTail,
}

impl SignatureEndingOutput {
    pub fn new(properties: Arc<OutboundProperties>) -> Self {
        Self {
            properties,
            tail: HeaderTail::default(),
        }
    }

    fn write_signature(&self, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let properties = &self.properties;
        let key = properties
            .signature_key
            .as_ref()
            .ok_or_else(|| Error::Key("signature requested without a signing key".into()))?;
        let references = chain.security_mut().take_digested();
        if references.is_empty() {
            return Err(Error::MissingElement("no part of the message was signed".into()));
        }
        let (security_path, security_scope) = self.tail.security()?;
        let c14n = C14nMode::from_uri(&properties.c14n_algorithm)?;

        let mut signature_path = security_path.to_vec();
        signature_path.push(ds(ns::node::SIGNATURE));
        let signed_info = signed_info_events(&signature_path, c14n, &properties.signature_algorithm, &references);
        let mut inherited = security_scope.to_vec();
        inherited.push(Namespace::new(ns::prefix::DSIG, ns::DSIG));
        let value = sign_signed_info(&signed_info, c14n, &inherited, &properties.signature_algorithm, &key.material)?;

        let reference = properties.signature_key_reference;
        let mut sub = chain.sub_chain_at(security_path.to_vec())?;
        if let (Some(cert), KeyReference::DirectReference) = (key.certificate(), reference) {
            sub.start_with(
                wsse(ns::node::BINARY_SECURITY_TOKEN),
                vec![
                    Attribute::new(wsu(ns::attr::ID), BST_ID),
                    Attribute::new(QName::local(ns::attr::VALUE_TYPE), algorithm::X509_V3),
                    Attribute::new(QName::local(ns::attr::ENCODING_TYPE), algorithm::BASE64_BINARY),
                ],
                Vec::new(),
            )?;
            sub.text(cert.to_base64())?;
            sub.end()?;
        }
        sub.start_with(
            ds(ns::node::SIGNATURE),
            vec![Attribute::new(QName::local(ns::attr::ID), "SIG-1")],
            vec![Namespace::new(ns::prefix::DSIG, ns::DSIG)],
        )?;
        for event in signed_info {
            sub.emit(event)?;
        }
        sub.leaf(ds(ns::node::SIGNATURE_VALUE), Vec::new(), &encode(&value))?;
        sub.start_with(ds(ns::node::KEY_INFO), Vec::new(), Vec::new())?;
        write_key_info(&mut sub, key, reference)?;
        sub.end()?;
        sub.end()?;
        drop(sub);

        info!(key = %key.name, algorithm = %properties.signature_algorithm, references = references.len(), "message signed");
        let security = chain.security_mut();
        security.register_event(SecurityEvent::SignatureValue {
            token: key.name.clone(),
            algorithm: properties.signature_algorithm.clone(),
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: properties.signature_algorithm.clone(),
            usage: AlgorithmUsage::Signature,
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: c14n.uri().to_owned(),
            usage: AlgorithmUsage::Canonicalization,
        });
        Ok(())
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        match self.tail.observe(event, chain.document())? {
            TailStep::Forward(event) => chain.forward(event),
            TailStep::Held => Ok(()),
            TailStep::Release(events) => {
                self.write_signature(chain)?;
                for event in events {
                    chain.forward(event)?;
                }
                Ok(())
            }
        }
    }
}

/// The `ds:KeyInfo` content naming the signing key.
fn write_key_info(sub: &mut SubChain<'_, '_>, key: &Key, reference: KeyReference) -> Result<(), Error> {
    if reference == KeyReference::KeyName {
        return sub.leaf(ds(ns::node::KEY_NAME), Vec::new(), &key.name);
    }
    sub.start_with(wsse(ns::node::SECURITY_TOKEN_REFERENCE), Vec::new(), Vec::new())?;
    match (reference, key.certificate()) {
        (KeyReference::DirectReference, Some(_)) => sub.leaf(
            wsse(ns::node::REFERENCE),
            vec![
                Attribute::new(QName::local(ns::attr::URI), format!("#{BST_ID}")),
                Attribute::new(QName::local(ns::attr::VALUE_TYPE), algorithm::X509_V3),
            ],
            "",
        )?,
        (KeyReference::DirectReference, None) => sub.leaf(
            wsse(ns::node::REFERENCE),
            vec![Attribute::new(QName::local(ns::attr::URI), key.name.as_str())],
            "",
        )?,
        (KeyReference::IssuerSerial, Some(cert)) => {
            sub.start_with(ds(ns::node::X509_DATA), Vec::new(), Vec::new())?;
            sub.start_with(ds(ns::node::X509_ISSUER_SERIAL), Vec::new(), Vec::new())?;
            sub.leaf(ds(ns::node::X509_ISSUER_NAME), Vec::new(), &cert.issuer())?;
            sub.leaf(ds(ns::node::X509_SERIAL_NUMBER), Vec::new(), &cert.serial_decimal())?;
            sub.end()?;
            sub.end()?;
        }
        (KeyReference::SubjectKeyIdentifier, Some(cert)) => sub.leaf(
            wsse(ns::node::KEY_IDENTIFIER),
            vec![
                Attribute::new(QName::local(ns::attr::VALUE_TYPE), algorithm::X509_SKI),
                Attribute::new(QName::local(ns::attr::ENCODING_TYPE), algorithm::BASE64_BINARY),
            ],
            &encode(&cert.subject_key_identifier()?),
        )?,
        (other, None) => {
            return Err(Error::Key(format!(
                "{other:?} key reference needs a certificate for key {}",
                key.name
            )))
        }
        (KeyReference::KeyName, Some(_)) => {}
    }
    sub.end()
}

impl Processor for SignatureEndingOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SignatureEndingOutput
    }

    fn phase(&self) -> Phase {
        Phase::PostProcess
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if self.tail.is_holding() {
            return Err(Error::Chain("message ended before the signature could be written".into()));
        }
        Ok(())
    }
}
