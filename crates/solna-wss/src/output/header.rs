#![forbid(unsafe_code)]

use solna_core::{ns, Error};
use solna_xml::{Attribute, Namespace, QName, StartElement, XmlEvent};
use tracing::debug;

use super::wsse;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::is_security_header;

/// Writes an empty `wsse:Security` header for the other outbound
/// processors to fill, creating `soap:Header` when the envelope has none.
pub struct SecurityHeaderOutput {
    must_understand: bool,
    envelope: Option<QName>,
    written: bool,
}

impl SecurityHeaderOutput {
    pub fn new(must_understand: bool) -> Self {
        Self {
            must_understand,
            envelope: None,
            written: false,
        }
    }

    fn security_start(&self, parent: &[QName]) -> StartElement {
        let mut start = StartElement::new(wsse(ns::node::SECURITY), parent);
        start.namespaces = vec![
            Namespace::new(ns::prefix::WSSE, ns::WSSE),
            Namespace::new(ns::prefix::WSU, ns::WSU),
        ];
        if self.must_understand {
            if let Some(envelope) = &self.envelope {
                let value = if envelope.ns == ns::SOAP12 { "true" } else { "1" };
                start.attributes.push(Attribute::new(
                    QName::prefixed(envelope.prefix.as_str(), envelope.ns.as_str(), ns::attr::MUST_UNDERSTAND),
                    value,
                ));
            }
        }
        start
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let XmlEvent::StartElement(start) = &event else {
            return chain.forward(event);
        };
        if is_security_header(&start.path) {
            return Err(Error::InvalidSecurity("message already carries a wsse:Security header".into()));
        }
        match start.path.as_slice() {
            [envelope] if ns::is_soap(&envelope.ns) && envelope.local == ns::node::ENVELOPE => {
                self.envelope = Some(envelope.clone());
                chain.forward(event)
            }
            [envelope, header] if !self.written && header.is(&envelope.ns, ns::node::HEADER) => {
                let parent = start.path.clone();
                let security = self.security_start(&parent);
                chain.forward(event)?;
                let mut sub = chain.sub_chain_at(parent)?;
                sub.start(security)?;
                sub.end()?;
                self.written = true;
                debug!("security header added to existing soap:Header");
                Ok(())
            }
            [envelope, body] if !self.written && body.is(&envelope.ns, ns::node::BODY) => {
                let root = vec![envelope.clone()];
                let header = QName::prefixed(envelope.prefix.as_str(), envelope.ns.as_str(), ns::node::HEADER);
                let mut header_path = root.clone();
                header_path.push(header.clone());
                let security = self.security_start(&header_path);
                {
                    let mut sub = chain.sub_chain_at(root)?;
                    sub.start(StartElement::new(header, &[]))?;
                    sub.start(security)?;
                    sub.end()?;
                    sub.end()?;
                }
                self.written = true;
                debug!("soap:Header created for the security header");
                chain.forward(event)
            }
            _ => chain.forward(event),
        }
    }
}

impl Processor for SecurityHeaderOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SecurityHeaderOutput
    }

    fn phase(&self) -> Phase {
        Phase::PreProcess
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn finish(&mut self, _chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if self.written {
            Ok(())
        } else {
            Err(Error::MissingElement("soap:Body (no place for the security header)".into()))
        }
    }
}
