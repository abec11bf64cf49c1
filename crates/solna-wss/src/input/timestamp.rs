#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use solna_core::{ns, Error};
use solna_xml::{StartElement, XmlElement, XmlEvent};
use tracing::{debug, warn};

use super::Captured;
use crate::chain::{ChainHandle, Phase, Processor, ProcessorKind};
use crate::event::SecurityEvent;
use crate::properties::SecurityProperties;
use crate::saml::parse_instant;

/// Validates `wsu:Timestamp`.
///
/// In strict mode an expired, stale or future timestamp aborts the message;
/// otherwise the violation is only recorded on the `Timestamp` event.
pub struct TimestampProcessor {
    captured: Captured,
    properties: Arc<SecurityProperties>,
}

impl TimestampProcessor {
    pub fn new(start: StartElement, properties: Arc<SecurityProperties>) -> Result<Self, Error> {
        Ok(Self {
            captured: Captured::new(start, properties.max_buffered_events)?,
            properties,
        })
    }

    fn validate(&self, timestamp: &XmlElement, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        let created = timestamp
            .child(ns::WSU, ns::node::CREATED)
            .ok_or_else(|| Error::MissingElement("wsu:Created in wsu:Timestamp".into()))?;
        let created = parse_instant(&created.text(), "wsu:Created")?;
        let expires = timestamp
            .child(ns::WSU, ns::node::EXPIRES)
            .map(|e| parse_instant(&e.text(), "wsu:Expires"))
            .transpose()?;
        if expires.is_some_and(|expires| expires < created) {
            return Err(Error::InvalidSecurity("wsu:Expires precedes wsu:Created".into()));
        }

        let now = self.properties.now();
        let violation = match self.check(created, expires, now) {
            Ok(()) => None,
            Err(err) if self.properties.strict_timestamp => return Err(err),
            Err(err) => {
                warn!(%err, "accepting invalid timestamp, strict checking is disabled");
                Some(err.to_string())
            }
        };
        debug!(%created, ?expires, valid = violation.is_none(), "timestamp processed");

        if let Some(cache) = &self.properties.replay_cache {
            let key = format!("{}#{}", timestamp.id().unwrap_or(""), created.to_rfc3339());
            let until = expires.unwrap_or(created + self.properties.timestamp_ttl);
            if !cache.check_and_record(&key, until, now)? {
                return Err(Error::Replay(format!("timestamp created {created} was seen before")));
            }
        }

        chain.security_mut().register_event(SecurityEvent::Timestamp {
            created,
            expires,
            violation,
        });
        Ok(())
    }

    fn check(&self, created: DateTime<Utc>, expires: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(expires) = expires {
            if expires < now {
                return Err(Error::Expired(format!("timestamp expired at {expires}")));
            }
        }
        if created < now - self.properties.timestamp_ttl {
            return Err(Error::Stale(format!(
                "timestamp created at {created} is older than {}s",
                self.properties.timestamp_ttl.num_seconds()
            )));
        }
        if created > now + self.properties.timestamp_future_ttl {
            return Err(Error::NotYetValid(format!("timestamp created in the future ({created})")));
        }
        Ok(())
    }
}

impl Processor for TimestampProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Timestamp
    }

    fn phase(&self) -> Phase {
        Phase::Processing
    }

    fn process_header_event(&mut self, event: XmlEvent, chain: &mut ChainHandle<'_>) -> Result<(), Error> {
        if let Some(tree) = self.captured.push(&event)? {
            self.validate(tree.root(), chain)?;
            chain.remove_self();
        }
        chain.forward(event)
    }
}
