#![forbid(unsafe_code)]

//! Whole-message entry points.
//!
//! [`InboundPipeline`] and [`OutboundPipeline`] build a fresh
//! [`ProcessorChain`] per message from their properties, push every event
//! through it and collect what comes out of the tail.

use std::sync::Arc;

use solna_core::Error;
use solna_keys::SecurityToken;
use solna_xml::{read_events, write_events, XmlEvent};
use tracing::{debug, info};

use crate::chain::ProcessorChain;
use crate::event::{SecurityEvent, SecurityEventListener};
use crate::input::{HeaderStripProcessor, SecurityHeaderProcessor};
use crate::output::{
    EncryptEndingOutput, EncryptOutput, SecurityHeaderOutput, SignatureEndingOutput, SignatureOutput,
    TimestampOutput,
};
use crate::properties::{Action, OutboundProperties, SecurityProperties};
use crate::security::SecurityContext;

/// The result of running a message through a pipeline.
#[derive(Debug)]
pub struct ProcessedMessage {
    /// Events that left the chain.
    pub events: Vec<XmlEvent>,
    pub security_events: Vec<SecurityEvent>,
    pub tokens: Vec<Arc<SecurityToken>>,
}

impl ProcessedMessage {
    fn collect(mut chain: ProcessorChain) -> Self {
        let events = chain.take_output();
        let security = chain.into_security();
        let tokens = security.tokens().to_vec();
        Self {
            events,
            security_events: security.into_events(),
            tokens,
        }
    }

    /// Serialize the output events.
    pub fn to_xml(&self) -> String {
        write_events(&self.events)
    }

    /// Events of one shape, e.g. every signed element.
    pub fn events_matching<'a, P>(&'a self, predicate: P) -> impl Iterator<Item = &'a SecurityEvent>
    where
        P: Fn(&SecurityEvent) -> bool + 'a,
    {
        self.security_events.iter().filter(move |event| predicate(event))
    }
}

/// Verifies and decrypts incoming messages.
#[derive(Debug, Clone)]
pub struct InboundPipeline {
    properties: Arc<SecurityProperties>,
}

impl InboundPipeline {
    pub fn new(properties: SecurityProperties) -> Self {
        Self {
            properties: Arc::new(properties),
        }
    }

    pub fn properties(&self) -> &SecurityProperties {
        &self.properties
    }

    fn chain(&self, security: SecurityContext) -> Result<ProcessorChain, Error> {
        let mut chain = ProcessorChain::with_replay_limit(security, self.properties.max_buffered_events);
        if let Some(cert) = &self.properties.transport_certificate {
            let token = chain.security_mut().register_token(SecurityToken::https(cert.clone())?)?;
            debug!(token = %token.id, "transport token registered");
        }
        chain.add_processor(Box::new(SecurityHeaderProcessor::new(Arc::clone(&self.properties))))?;
        if self.properties.strip_security_header {
            chain.add_processor(Box::new(HeaderStripProcessor))?;
        }
        Ok(chain)
    }

    pub fn process(&self, events: impl IntoIterator<Item = XmlEvent>) -> Result<ProcessedMessage, Error> {
        self.run(SecurityContext::new(), events)
    }

    /// Like [`process`](Self::process), notifying `listener` of each
    /// security event as it is logged.
    pub fn process_with_listener(
        &self,
        events: impl IntoIterator<Item = XmlEvent>,
        listener: Box<dyn SecurityEventListener>,
    ) -> Result<ProcessedMessage, Error> {
        let mut security = SecurityContext::new();
        security.add_listener(listener);
        self.run(security, events)
    }

    pub fn process_str(&self, xml: &str) -> Result<ProcessedMessage, Error> {
        self.process(read_events(xml)?)
    }

    fn run(
        &self,
        security: SecurityContext,
        events: impl IntoIterator<Item = XmlEvent>,
    ) -> Result<ProcessedMessage, Error> {
        let mut chain = self.chain(security)?;
        for event in events {
            chain.push(event)?;
        }
        chain.finish()?;
        let message = ProcessedMessage::collect(chain);
        info!(
            events = message.security_events.len(),
            tokens = message.tokens.len(),
            "inbound message processed"
        );
        Ok(message)
    }
}

/// Secures outgoing messages.
#[derive(Debug, Clone)]
pub struct OutboundPipeline {
    properties: Arc<OutboundProperties>,
}

impl OutboundPipeline {
    pub fn new(properties: OutboundProperties) -> Self {
        Self {
            properties: Arc::new(properties),
        }
    }

    pub fn properties(&self) -> &OutboundProperties {
        &self.properties
    }

    fn chain(&self) -> Result<ProcessorChain, Error> {
        let properties = &self.properties;
        let mut chain = ProcessorChain::new(SecurityContext::new());
        chain.add_processor(Box::new(SecurityHeaderOutput::new(properties.must_understand)))?;
        if properties.has_action(Action::Timestamp) {
            chain.add_processor(Box::new(TimestampOutput::new(
                properties.timestamp_created,
                properties.timestamp_ttl,
            )))?;
        }
        if properties.has_action(Action::Signature) {
            chain.add_processor(Box::new(SignatureOutput::new(Arc::clone(properties))?))?;
        }
        if properties.has_action(Action::Encryption) {
            chain.add_processor(Box::new(EncryptOutput::new(Arc::clone(properties))?))?;
        }
        if properties.has_action(Action::Signature) {
            chain.add_processor(Box::new(SignatureEndingOutput::new(Arc::clone(properties))))?;
        }
        if properties.has_action(Action::Encryption) {
            chain.add_processor(Box::new(EncryptEndingOutput::new()))?;
        }
        Ok(chain)
    }

    pub fn process(&self, events: impl IntoIterator<Item = XmlEvent>) -> Result<ProcessedMessage, Error> {
        let mut chain = self.chain()?;
        for event in events {
            chain.push(event)?;
        }
        chain.finish()?;
        let message = ProcessedMessage::collect(chain);
        info!(actions = ?self.properties.actions, "outbound message secured");
        Ok(message)
    }

    pub fn process_str(&self, xml: &str) -> Result<ProcessedMessage, Error> {
        self.process(read_events(xml)?)
    }
}
