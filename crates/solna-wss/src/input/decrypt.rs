#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_core::{algorithm, ns, Error};
use solna_crypto::cipher;
use solna_keys::keyinfo::check_single_token_reference;
use solna_keys::SecurityToken;
use solna_xml::{read_fragment, ElementBuffer, Namespace, QName, StartElement, XmlElement, XmlEvent, XmlTree};
use tracing::{debug, warn};

use super::Captured;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::{ContextFlag, NamespaceTracker};
use crate::dsig::decode;
use crate::event::{AlgorithmUsage, SecurityEvent};
use crate::properties::SecurityProperties;
use crate::resolve::{resolve_by_name, resolve_key_info};

/// Reads an `xenc:ReferenceList` and hands its targets to a
/// [`DecryptProcessor`].
pub struct ReferenceListProcessor {
    captured: Captured,
    properties: Arc<SecurityProperties>,
}

impl ReferenceListProcessor {
    pub fn new(start: StartElement, properties: Arc<SecurityProperties>) -> Result<Self, Error> {
        Ok(Self {
            captured: Captured::new(start, properties.max_buffered_events)?,
            properties,
        })
    }
}

impl Processor for ReferenceListProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::ReferenceList
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(tree) = self.captured.push(&event)? {
            let ids = tree
                .root()
                .children_named(ns::ENC, ns::node::DATA_REFERENCE)
                .map(|reference| {
                    let uri = reference.attribute(ns::attr::URI).unwrap_or("");
                    uri.strip_prefix('#')
                        .filter(|id| !id.is_empty())
                        .map(str::to_owned)
                        .ok_or_else(|| {
                            Error::UnresolvableReference(format!("DataReference \"{uri}\" is not an id reference"))
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            debug!(count = ids.len(), "encrypted data announced");
            chain.add_processor(Box::new(DecryptProcessor::new(ids, Arc::clone(&self.properties))));
            chain.remove_self();
        }
        chain.forward(event)
    }
}

struct PendingData {
    buffer: ElementBuffer,
    parent_path: Vec<QName>,
    scope: Vec<Namespace>,
}

/// Replaces each announced `xenc:EncryptedData` with its plaintext.
///
/// The ciphertext element is swallowed; the decrypted events are injected
/// below its parent so every later processor sees the plain message.
pub struct DecryptProcessor {
    ids: Vec<String>,
    current: Option<PendingData>,
    tracker: NamespaceTracker,
    properties: Arc<SecurityProperties>,
}

impl DecryptProcessor {
    pub fn new(ids: Vec<String>, properties: Arc<SecurityProperties>) -> Self {
        Self {
            ids,
            current: None,
            tracker: NamespaceTracker::default(),
            properties,
        }
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(current) = self.current.as_mut() {
            if current.buffer.push(event)? {
                if let Some(done) = self.current.take() {
                    self.decrypt(done, chain)?;
                }
            }
            return Ok(());
        }

        if let XmlEvent::StartElement(start) = &event {
            let scope = self.tracker.enter(start, chain.document());
            if start.name.is(ns::ENC, ns::node::ENCRYPTED_DATA) {
                let announced = start
                    .id(&self.properties.id_attrs)
                    .and_then(|id| self.ids.iter().position(|known| known == id));
                if let Some(position) = announced {
                    self.ids.remove(position);
                    if start.path == chain.document().path() {
                        chain.document_mut().set_flag(ContextFlag::EncryptedContent);
                    }
                    let (_, parent) = start.path.split_last().ok_or_else(|| {
                        Error::Chain("EncryptedData start tag carries no element path".into())
                    })?;
                    let parent_path = parent.to_vec();
                    let mut buffer = ElementBuffer::with_limit(self.properties.max_buffered_events);
                    buffer.push(event)?;
                    self.current = Some(PendingData {
                        buffer,
                        parent_path,
                        scope,
                    });
                    return Ok(());
                }
            }
        }
        chain.forward(event)
    }

    fn decrypt(&mut self, pending: PendingData, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let tree = XmlTree::from_events(pending.buffer.into_events())?;
        let data = tree.root();
        let id = data.id().unwrap_or_default().to_owned();
        let uri = data
            .required_child(ns::ENC, ns::node::ENCRYPTION_METHOD)?
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute(format!("Algorithm on EncryptionMethod of {id}")))?
            .to_owned();
        let content_only = data.attribute(ns::attr::TYPE) == Some(algorithm::ENC_TYPE_CONTENT);
        if self.properties.strict_compliance && !cipher::is_bsp_approved(&uri) {
            return Err(Error::UnsupportedAlgorithm(format!(
                "{uri} on EncryptedData {id} is not allowed by the Basic Security Profile"
            )));
        }

        let token = self.resolve_key(data, &id, chain)?;
        let cipher_value = data
            .required_child(ns::ENC, ns::node::CIPHER_DATA)?
            .required_child(ns::ENC, ns::node::CIPHER_VALUE)?;
        let ciphertext = decode(&cipher_value.text(), "CipherValue")?;
        let plaintext = cipher::from_uri(&uri)?.decrypt(token.key()?.secret()?, &ciphertext)?;
        let text = String::from_utf8(plaintext)
            .map_err(|e| Error::Decryption(format!("EncryptedData {id} is not UTF-8 text: {e}")))?;
        let events = read_fragment(&text, &pending.parent_path, &pending.scope)?;

        let path = if content_only {
            pending.parent_path.clone()
        } else {
            let mut roots = events
                .iter()
                .filter_map(XmlEvent::as_start)
                .filter(|s| s.path.len() == pending.parent_path.len() + 1);
            match (roots.next(), roots.next()) {
                (Some(root), None) => root.path.clone(),
                _ => {
                    return Err(Error::Decryption(format!(
                        "EncryptedData {id} of type Element does not hold exactly one element"
                    )))
                }
            }
        };
        debug!(%id, key = %token.id, algorithm = %uri, content_only, "decrypted");
        let security = chain.security_mut();
        security.register_event(SecurityEvent::EncryptedPart {
            path,
            id,
            algorithm: uri.clone(),
            content_only,
        });
        security.register_event(SecurityEvent::Algorithm {
            uri,
            usage: AlgorithmUsage::Encryption,
        });

        let mut sub = chain.sub_chain_at(pending.parent_path)?;
        for event in events {
            sub.emit(event)?;
        }
        Ok(())
    }

    /// Strict: the KeyInfo must hold a single SecurityTokenReference.
    /// Lenient: whatever the KeyInfo says, then shared keys by name.
    fn resolve_key(
        &self,
        data: &XmlElement,
        id: &str,
        chain: &mut ChainHandle<'_>,
    ) -> Result<Arc<SecurityToken>, Error> {
        let key_info = data.child(ns::DSIG, ns::node::KEY_INFO);
        if self.properties.strict_compliance {
            let key_info =
                key_info.ok_or_else(|| Error::MissingElement(format!("KeyInfo in EncryptedData {id}")))?;
            check_single_token_reference(key_info)?;
            return resolve_key_info(Some(key_info), chain.security_mut(), &self.properties);
        }

        let err = match resolve_key_info(key_info, chain.security_mut(), &self.properties) {
            Ok(token) => return Ok(token),
            Err(err) => err,
        };
        for name in fallback_names(key_info, id) {
            if let Ok(token) = resolve_by_name(&name, chain.security_mut(), &self.properties) {
                warn!(%id, key = %name, %err, "KeyInfo did not resolve, using key by name");
                return Ok(token);
            }
        }
        Err(err)
    }
}

/// Key names to try for a KeyInfo that does not resolve: `ds:KeyName`s,
/// then external `wsse:Reference` URIs, then the EncryptedData id.
fn fallback_names(key_info: Option<&XmlElement>, id: &str) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(key_info) = key_info {
        names.extend(
            key_info
                .children_named(ns::DSIG, ns::node::KEY_NAME)
                .map(XmlElement::trimmed_text)
                .filter(|name| !name.is_empty()),
        );
        names.extend(
            key_info
                .children_named(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE)
                .flat_map(|str_elem| str_elem.children_named(ns::WSSE, ns::node::REFERENCE))
                .filter_map(|reference| reference.attribute(ns::attr::URI))
                .filter(|uri| !uri.is_empty() && !uri.starts_with('#'))
                .map(str::to_owned),
        );
    }
    if !id.is_empty() {
        names.push(id.to_owned());
    }
    names
}

impl Processor for DecryptProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Decrypt
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn before(&self) -> &[ProcessorKind] {
        &[ProcessorKind::SignatureReference]
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if self.ids.is_empty() && self.current.is_none() {
            return Ok(());
        }
        Err(Error::UnresolvableReference(format!(
            "no EncryptedData found for {}",
            self.ids.join(", ")
        )))
    }
}
