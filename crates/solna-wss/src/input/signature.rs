#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_core::{ns, Error};
use solna_xml::{Namespace, StartElement, XmlEvent};
use tracing::debug;

use super::{Captured, SignatureReferenceProcessor};
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::dsig::{parse_signature, verify_signed_info};
use crate::event::{AlgorithmUsage, SecurityEvent};
use crate::properties::SecurityProperties;
use crate::resolve::{ensure_signer_trusted, resolve_key_info};

/// Verifies the `SignatureValue` of a header `ds:Signature`.
///
/// The signature is buffered whole.  Once it closes the signing token is
/// resolved from `KeyInfo` and `SignedInfo` is checked; digests are left to a
/// [`SignatureReferenceProcessor`], which first catches up on the header
/// events already seen and then watches the rest of the message.
pub struct SignatureProcessor {
    captured: Captured,
    depth: usize,
    /// Bindings in scope at `SignedInfo`'s parent.
    signed_info_scope: Option<Vec<Namespace>>,
    properties: Arc<SecurityProperties>,
}

impl SignatureProcessor {
    pub fn new(start: StartElement, properties: Arc<SecurityProperties>) -> Result<Self, Error> {
        Ok(Self {
            depth: start.depth(),
            captured: Captured::new(start, properties.max_buffered_events)?,
            signed_info_scope: None,
            properties,
        })
    }

    fn verify(
        &mut self,
        signature: &solna_xml::XmlElement,
        chain: &mut ChainHandle<'_>,
    ) -> Result<SignatureReferenceProcessor, Error> {
        let parsed = parse_signature(signature)?;
        let scope = self.signed_info_scope.take().unwrap_or_default();
        let token = resolve_key_info(parsed.key_info.as_ref(), chain.security_mut(), &self.properties)?;
        ensure_signer_trusted(&token, chain.security(), &self.properties)?;
        verify_signed_info(
            &parsed.signed_info,
            &parsed.signed_info_events,
            &scope,
            token.key()?,
            &parsed.signature_value,
        )?;
        debug!(
            token = %token.id,
            algorithm = %parsed.signed_info.signature_method,
            references = parsed.signed_info.references.len(),
            "signature value verified"
        );

        let info = parsed.signed_info;
        let security = chain.security_mut();
        security.register_event(SecurityEvent::SignatureValue {
            token: token.id.clone(),
            algorithm: info.signature_method.clone(),
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: info.signature_method.clone(),
            usage: AlgorithmUsage::Signature,
        });
        security.register_event(SecurityEvent::Algorithm {
            uri: info.c14n.uri().to_owned(),
            usage: AlgorithmUsage::Canonicalization,
        });
        SignatureReferenceProcessor::new(info.references, token.id.clone(), Arc::clone(&self.properties))
    }
}

impl Processor for SignatureProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Signature
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let XmlEvent::StartElement(start) = &event {
            if start.depth() == self.depth + 1 && start.name.is(ns::DSIG, ns::node::SIGNED_INFO) {
                self.signed_info_scope = Some(chain.document().inherited_namespaces());
            }
        }
        if let Some(tree) = self.captured.push(&event)? {
            let mut references = self.verify(tree.root(), chain)?;
            // the header so far, this signature included
            let seen = chain.replay().events().to_vec();
            for past in &seen {
                references.observe(past, chain)?;
            }
            chain.add_processor(Box::new(references));
            chain.remove_self();
        }
        chain.forward(event)
    }
}
