#![forbid(unsafe_code)]

use std::sync::Arc;

use solna_core::{ns, Error};
use solna_xml::{StartElement, XmlEvent};
use tracing::{debug, trace};

use super::{
    BinarySecurityTokenProcessor, ReferenceListProcessor, SamlTokenProcessor, SignatureProcessor,
    TimestampProcessor,
};
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::is_security_header;
use crate::event::SecurityEvent;
use crate::properties::SecurityProperties;

/// Dispatcher for the `wsse:Security` header.
///
/// Records every event inside the header in the replay buffer, logs each
/// direct child as a `HeaderChild` event and adds the processor that
/// validates it.
pub struct SecurityHeaderProcessor {
    properties: Arc<SecurityProperties>,
    seen_header: bool,
    seen_timestamp: bool,
}

impl SecurityHeaderProcessor {
    pub fn new(properties: Arc<SecurityProperties>) -> Self {
        Self {
            properties,
            seen_header: false,
            seen_timestamp: false,
        }
    }

    fn dispatch_child(&mut self, start: &StartElement, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        chain.security_mut().register_event(SecurityEvent::HeaderChild {
            name: start.name.clone(),
        });
        let properties = Arc::clone(&self.properties);
        let name = &start.name;
        let processor: Box<dyn Processor> = if name.is(ns::WSSE, ns::node::BINARY_SECURITY_TOKEN) {
            Box::new(BinarySecurityTokenProcessor::new(start.clone(), properties)?)
        } else if name.is(ns::WSU, ns::node::TIMESTAMP) {
            if self.seen_timestamp {
                return Err(Error::InvalidSecurity(
                    "security header carries more than one wsu:Timestamp".into(),
                ));
            }
            self.seen_timestamp = true;
            Box::new(TimestampProcessor::new(start.clone(), properties)?)
        } else if name.is(ns::DSIG, ns::node::SIGNATURE) {
            Box::new(SignatureProcessor::new(start.clone(), properties)?)
        } else if name.is(ns::ENC, ns::node::REFERENCE_LIST) {
            Box::new(ReferenceListProcessor::new(start.clone(), properties)?)
        } else if name.is(ns::SAML1, ns::node::ASSERTION) || name.is(ns::SAML2, ns::node::ASSERTION) {
            let scope = chain.document().inherited_namespaces();
            Box::new(SamlTokenProcessor::new(start.clone(), scope, properties)?)
        } else {
            trace!(element = %name, "no processor for header child");
            return Ok(());
        };
        debug!(element = %name, "processing header child");
        chain.add_processor(processor);
        Ok(())
    }
}

impl Processor for SecurityHeaderProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::SecurityHeader
    }

    fn phase(&self) -> Phase {
        Phase::PreProcess
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let security_depth = 3;
        match &event {
            XmlEvent::StartElement(start) if is_security_header(&start.path) => {
                if self.seen_header {
                    return Err(Error::InvalidSecurity(
                        "message carries more than one wsse:Security header".into(),
                    ));
                }
                self.seen_header = true;
            }
            XmlEvent::EndElement(_) if chain.document().depth() == security_depth => {}
            _ => {
                chain.replay_mut().record(&event)?;
                if let XmlEvent::StartElement(start) = &event {
                    if start.depth() == security_depth + 1 {
                        self.dispatch_child(start, chain)?;
                    }
                }
            }
        }
        chain.forward(event)
    }
}
