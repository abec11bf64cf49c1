#![forbid(unsafe_code)]

//! Bounded capture of a single element's events.

use crate::event::{StartElement, XmlEvent};
use solna_core::Error;

/// Default upper bound on the number of events one buffer may hold.
pub const DEFAULT_EVENT_LIMIT: usize = 100_000;

/// Collects the events of one element, from its start tag to the matching
/// end tag.
#[derive(Debug, Clone)]
pub struct ElementBuffer {
    events: Vec<XmlEvent>,
    depth: usize,
    limit: usize,
}

impl ElementBuffer {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_EVENT_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            depth: 0,
            limit,
        }
    }

    /// Append an event.  Returns `true` once the root element has closed.
    ///
    /// The first event pushed must be a start tag.
    pub fn push(&mut self, event: XmlEvent) -> Result<bool, Error> {
        if self.is_complete() {
            return Err(Error::Other("element buffer already complete".into()));
        }
        if self.events.is_empty() && !event.is_start() {
            return Err(Error::Other(format!(
                "element buffer must begin with a start tag, got {}",
                event.describe()
            )));
        }
        if self.events.len() >= self.limit {
            return Err(Error::InvalidSecurity(format!(
                "buffered element exceeds {} events",
                self.limit
            )));
        }
        match &event {
            XmlEvent::StartElement(_) => self.depth += 1,
            XmlEvent::EndElement(_) => self.depth -= 1,
            _ => {}
        }
        self.events.push(event);
        Ok(self.depth == 0)
    }

    /// Has the root element closed?
    pub fn is_complete(&self) -> bool {
        !self.events.is_empty() && self.depth == 0
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The root start tag, if any event has been captured.
    pub fn start(&self) -> Option<&StartElement> {
        self.events.first().and_then(XmlEvent::as_start)
    }

    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<XmlEvent> {
        self.events
    }
}

impl Default for ElementBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_events;

    #[test]
    fn test_completes_on_matching_end() {
        let events = read_events("<a><b><a/></b></a>").unwrap();
        let mut buffer = ElementBuffer::new();
        let mut done_at = None;
        for (i, event) in events.into_iter().skip(1).enumerate() {
            if buffer.push(event).unwrap() {
                done_at = Some(i);
                break;
            }
        }
        assert_eq!(done_at, Some(5));
        assert!(buffer.is_complete());
        assert_eq!(buffer.start().unwrap().name.local, "a");
        assert_eq!(buffer.events().len(), 6);
    }

    #[test]
    fn test_rejects_leading_text() {
        let mut buffer = ElementBuffer::new();
        assert!(buffer.push(XmlEvent::Characters("x".into())).is_err());
    }

    #[test]
    fn test_limit_enforced() {
        let events = read_events("<a><b/><c/></a>").unwrap();
        let mut buffer = ElementBuffer::with_limit(3);
        let results: Vec<_> = events.into_iter().skip(1).map(|e| buffer.push(e)).collect();
        assert!(results[..3].iter().all(|r| r.is_ok()));
        assert!(matches!(results[3], Err(Error::InvalidSecurity(_))));
    }
}
