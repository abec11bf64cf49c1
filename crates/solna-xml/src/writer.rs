#![forbid(unsafe_code)]

//! Serialization of [`XmlEvent`]s back to XML text.

use crate::event::{StartElement, XmlEvent};

/// Incremental event serializer.
///
/// Start tags are written with exactly the namespace declarations and
/// attributes carried by the event; no self-closing shorthand is used.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    declaration: bool,
}

impl XmlWriter {
    /// Create a new writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit `<?xml version="1.0" encoding="UTF-8"?>` on `StartDocument`.
    pub fn with_declaration(mut self) -> Self {
        self.declaration = true;
        self
    }

    /// Append one event.
    pub fn write(&mut self, event: &XmlEvent) {
        match event {
            XmlEvent::StartDocument => {
                if self.declaration {
                    self.out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
                }
            }
            XmlEvent::EndDocument => {}
            XmlEvent::StartElement(start) => self.write_start(start),
            XmlEvent::EndElement(name) => {
                self.out.push_str("</");
                self.out.push_str(&name.qualified());
                self.out.push('>');
            }
            XmlEvent::Characters(text) => self.out.push_str(&escape_text(text)),
            XmlEvent::Comment(text) => {
                self.out.push_str("<!--");
                self.out.push_str(text);
                self.out.push_str("-->");
            }
        }
    }

    fn write_start(&mut self, start: &StartElement) {
        self.out.push('<');
        self.out.push_str(&start.name.qualified());
        for binding in &start.namespaces {
            if binding.prefix.is_empty() {
                self.out.push_str(" xmlns=\"");
            } else {
                self.out.push_str(" xmlns:");
                self.out.push_str(&binding.prefix);
                self.out.push_str("=\"");
            }
            self.out.push_str(&escape_attr(&binding.uri));
            self.out.push('"');
        }
        for attr in &start.attributes {
            self.out.push(' ');
            self.out.push_str(&attr.name.qualified());
            self.out.push_str("=\"");
            self.out.push_str(&escape_attr(&attr.value));
            self.out.push('"');
        }
        self.out.push('>');
    }

    /// Finish writing and return the XML text.
    pub fn into_string(self) -> String {
        self.out
    }

    /// Finish writing and return the XML bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out.into_bytes()
    }
}

/// Serialize a complete event sequence.
pub fn write_events<'a, I>(events: I) -> String
where
    I: IntoIterator<Item = &'a XmlEvent>,
{
    let mut writer = XmlWriter::new();
    for event in events {
        writer.write(event);
    }
    writer.into_string()
}

pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_attr(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}
