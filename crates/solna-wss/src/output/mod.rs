#![forbid(unsafe_code)]

//! Outbound processors.
//!
//! The chain receives an unsecured envelope.  [`SecurityHeaderOutput`]
//! writes an empty `wsse:Security` header, [`TimestampOutput`] fills in the
//! timestamp, [`SignatureOutput`] and [`EncryptOutput`] work on the body as
//! it streams past, and the two ending processors hold the rest of the
//! message back at the header's end tag so that the signature and the
//! reference list can be appended once everything they cover has been seen.

mod encrypt;
mod header;
mod signature;
mod timestamp;

pub use crate::dsig::DigestedReference;
pub use encrypt::{EncryptEndingOutput, EncryptOutput};
pub use header::SecurityHeaderOutput;
pub use signature::{SignatureEndingOutput, SignatureOutput};
pub use timestamp::TimestampOutput;

use solna_core::{ns, Error};
use solna_xml::{Namespace, QName, XmlEvent};

use crate::context::{is_security_header, DocumentContext, NamespaceTracker};

pub(crate) fn wsse(local: &str) -> QName {
    QName::prefixed(ns::prefix::WSSE, ns::WSSE, local)
}

pub(crate) fn wsu(local: &str) -> QName {
    QName::prefixed(ns::prefix::WSU, ns::WSU, local)
}

pub(crate) fn ds(local: &str) -> QName {
    QName::prefixed(ns::prefix::DSIG, ns::DSIG, local)
}

pub(crate) fn xenc(local: &str) -> QName {
    QName::prefixed(ns::prefix::ENC, ns::ENC, local)
}

/// What [`HeaderTail::observe`] decided about an event.
pub(crate) enum TailStep {
    Forward(XmlEvent),
    Held,
    /// The document ended: the held events (header end tag first, end of
    /// document last) are ready to be released.
    Release(Vec<XmlEvent>),
}

/// Holds every event from the end tag of `wsse:Security` to the end of the
/// document.
#[derive(Default)]
pub(crate) struct HeaderTail {
    tracker: NamespaceTracker,
    /// Path of the security header and the bindings in scope on it.
    security: Option<(Vec<QName>, Vec<Namespace>)>,
    held: Option<Vec<XmlEvent>>,
}

impl HeaderTail {
    pub(crate) fn observe(&mut self, event: XmlEvent, document: &DocumentContext) -> Result<TailStep, Error> {
        if let Some(held) = self.held.as_mut() {
            let end = matches!(event, XmlEvent::EndDocument);
            held.push(event);
            if end {
                return Ok(TailStep::Release(self.held.take().unwrap_or_default()));
            }
            return Ok(TailStep::Held);
        }
        match &event {
            XmlEvent::StartElement(start) => {
                self.tracker.enter(start, document);
                if is_security_header(&start.path) {
                    self.security = Some((start.path.clone(), self.tracker.current().to_vec()));
                }
            }
            XmlEvent::EndElement(name) if name.is(ns::WSSE, ns::node::SECURITY) && self.security.is_some() => {
                self.held = Some(vec![event]);
                return Ok(TailStep::Held);
            }
            XmlEvent::EndDocument => {
                return Err(Error::InvalidSecurity("message ended without a security header".into()));
            }
            _ => {}
        }
        Ok(TailStep::Forward(event))
    }

    /// Path of `wsse:Security` and the bindings in scope on it.
    pub(crate) fn security(&self) -> Result<(&[QName], &[Namespace]), Error> {
        self.security
            .as_ref()
            .map(|(path, scope)| (path.as_slice(), scope.as_slice()))
            .ok_or_else(|| Error::MissingElement("wsse:Security".into()))
    }

    pub(crate) fn is_holding(&self) -> bool {
        self.held.is_some()
    }
}
