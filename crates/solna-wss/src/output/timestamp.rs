#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use solna_core::{ns, Error};
use solna_xml::{Attribute, XmlEvent};
use tracing::debug;

use super::wsu;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::context::is_security_header;
use crate::event::SecurityEvent;

/// Writes `wsu:Timestamp` as the first child of the security header.
pub struct TimestampOutput {
    created: Option<DateTime<Utc>>,
    ttl: Duration,
}

impl TimestampOutput {
    /// `created` defaults to the moment the header is written.
    pub fn new(created: Option<DateTime<Utc>>, ttl: Duration) -> Self {
        Self { created, ttl }
    }

    fn observe(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let parent = match &event {
            XmlEvent::StartElement(start) if is_security_header(&start.path) => start.path.clone(),
            _ => return chain.forward(event),
        };
        chain.forward(event)?;

        let created = self.created.unwrap_or_else(Utc::now);
        let expires = created + self.ttl;
        let format = |at: DateTime<Utc>| at.to_rfc3339_opts(SecondsFormat::Millis, true);
        {
            let mut sub = chain.sub_chain_at(parent)?;
            sub.start_with(
                wsu(ns::node::TIMESTAMP),
                vec![Attribute::new(wsu(ns::attr::ID), "TS-1")],
                Vec::new(),
            )?;
            sub.leaf(wsu(ns::node::CREATED), Vec::new(), &format(created))?;
            sub.leaf(wsu(ns::node::EXPIRES), Vec::new(), &format(expires))?;
            sub.end()?;
        }
        debug!(%created, %expires, "timestamp written");
        chain.security_mut().register_event(SecurityEvent::Timestamp {
            created,
            expires: Some(expires),
            violation: None,
        });
        chain.remove_self();
        Ok(())
    }
}

impl Processor for TimestampOutput {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::TimestampOutput
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }

    fn process_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        self.observe(event, chain)
    }
}
