#![forbid(unsafe_code)]

//! XML event layer for the Solna WS-Security library.
//!
//! Messages are processed as a forward-only sequence of [`XmlEvent`]s.  This
//! crate defines the event model, turns text into events (via `roxmltree`),
//! turns events back into text, and provides the two bounded helpers the
//! security processors need: an [`ElementBuffer`] that captures one element's
//! events and an [`XmlTree`] materializer for structured reading of such a
//! capture.

pub mod buffer;
pub mod event;
pub mod reader;
pub mod tree;
pub mod writer;

pub use buffer::ElementBuffer;
pub use event::{path_to_string, Attribute, Namespace, QName, StartElement, XmlEvent};
pub use reader::{read_events, read_fragment};
pub use tree::{XmlElement, XmlNode, XmlTree};
pub use writer::{write_events, XmlWriter};

/// Return roxmltree parsing options used for every parse.
///
/// DTDs are rejected: a security header has no business declaring entities,
/// and entity expansion is a classic denial-of-service vector.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: false,
        ..roxmltree::ParsingOptions::default()
    }
}
