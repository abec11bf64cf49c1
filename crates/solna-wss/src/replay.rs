#![forbid(unsafe_code)]

//! Replay protection across messages, and the in-message replay buffer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use solna_core::Error;
use solna_xml::XmlEvent;

/// Cross-message first-use store for timestamps and assertion ids.
///
/// Shared between concurrently processed messages, so implementations do
/// their own locking.
pub trait ReplayCache: Send + Sync {
    /// Record `id` as used until `expires`.  Returns `false` if it was
    /// already recorded and has not yet expired.
    fn check_and_record(&self, id: &str, expires: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool, Error>;
}

/// In-process [`ReplayCache`].
#[derive(Debug, Default)]
pub struct MemoryReplayCache {
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryReplayCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReplayCache for MemoryReplayCache {
    fn check_and_record(&self, id: &str, expires: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool, Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Other("replay cache lock poisoned".into()))?;
        entries.retain(|_, until| *until > now);
        if entries.contains_key(id) {
            return Ok(false);
        }
        entries.insert(id.to_owned(), expires);
        Ok(true)
    }
}

/// Default bound on buffered header events.
pub const DEFAULT_REPLAY_LIMIT: usize = 50_000;

/// The security header's events, kept so that a processor registered late
/// (a reference verifier created once its signature verified) can still see
/// header elements that streamed past before it existed.
#[derive(Debug)]
pub struct ReplayBuffer {
    events: Vec<XmlEvent>,
    limit: usize,
}

impl ReplayBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            limit,
        }
    }

    pub(crate) fn record(&mut self, event: &XmlEvent) -> Result<(), Error> {
        if self.events.len() >= self.limit {
            return Err(Error::InvalidSecurity(format!(
                "security header exceeds {} events",
                self.limit
            )));
        }
        self.events.push(event.clone());
        Ok(())
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }
}

impl Default for ReplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_LIMIT)
    }
}
