#![forbid(unsafe_code)]

//! Inbound processors.
//!
//! [`SecurityHeaderProcessor`] watches the `wsse:Security` header and adds a
//! dedicated processor for each child it recognizes.  Those processors
//! capture their element, validate it once it closes and then either remove
//! themselves or hand over to a deferred processor (reference verification,
//! decryption, SAML confirmation) that watches the rest of the message.

mod bst;
mod decrypt;
mod header;
mod reference;
mod saml;
mod signature;
mod strip;
mod timestamp;

pub use bst::BinarySecurityTokenProcessor;
pub use decrypt::{DecryptProcessor, ReferenceListProcessor};
pub use header::SecurityHeaderProcessor;
pub use reference::SignatureReferenceProcessor;
pub use saml::{SamlConfirmationProcessor, SamlTokenProcessor};
pub use signature::SignatureProcessor;
pub use strip::HeaderStripProcessor;
pub use timestamp::TimestampProcessor;

use solna_core::Error;
use solna_xml::{ElementBuffer, StartElement, XmlEvent, XmlTree};

/// Capture of one header child, from the start tag the header processor saw
/// to its matching end tag.
struct Captured {
    buffer: Option<ElementBuffer>,
}

impl Captured {
    fn new(start: StartElement, limit: usize) -> Result<Self, Error> {
        let mut buffer = ElementBuffer::with_limit(limit);
        buffer.push(XmlEvent::StartElement(start))?;
        Ok(Self { buffer: Some(buffer) })
    }

    /// Add an event; returns the materialized element once it closes.
    fn push(&mut self, event: &XmlEvent) -> Result<Option<XmlTree>, Error> {
        let Some(buffer) = self.buffer.as_mut() else {
            return Ok(None);
        };
        if !buffer.push(event.clone())? {
            return Ok(None);
        }
        match self.buffer.take() {
            Some(buffer) => XmlTree::from_events(buffer.into_events()).map(Some),
            None => Ok(None),
        }
    }
}
