#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_core::{algorithm, ns, Error};
use solna_keys::{SecurityToken, TokenOrigin, X509Certificate};
use solna_xml::{StartElement, XmlEvent};
use tracing::warn;

use super::Captured;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::properties::SecurityProperties;

/// Registers a `wsse:BinarySecurityToken` carrying an X.509 certificate.
pub struct BinarySecurityTokenProcessor {
    captured: Captured,
}

impl BinarySecurityTokenProcessor {
    pub fn new(start: StartElement, properties: Arc<SecurityProperties>) -> Result<Self, Error> {
        Ok(Self {
            captured: Captured::new(start, properties.max_buffered_events)?,
        })
    }
}

impl Processor for BinarySecurityTokenProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::BinarySecurityToken
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(tree) = self.captured.push(&event)? {
            let bst = tree.root();
            let id = bst
                .id()
                .ok_or_else(|| Error::MissingAttribute("wsu:Id on BinarySecurityToken".into()))?;
            let value_type = bst.attribute(ns::attr::VALUE_TYPE).unwrap_or(algorithm::X509_V3);
            if let Some(encoding) = bst.attribute(ns::attr::ENCODING_TYPE) {
                if encoding != algorithm::BASE64_BINARY {
                    return Err(Error::UnsupportedAlgorithm(format!(
                        "BinarySecurityToken {id} encoding {encoding}"
                    )));
                }
            }
            if value_type == algorithm::X509_V3 {
                let cert = X509Certificate::from_base64(&bst.text())?;
                let token = SecurityToken::x509(id, cert, TokenOrigin::Header)?;
                chain.security_mut().register_token(token)?;
            } else {
                warn!(%id, %value_type, "ignoring BinarySecurityToken of unsupported type");
            }
            chain.remove_self();
        }
        chain.forward(event)
    }
}
