#![forbid(unsafe_code)]

//! Canonical rendering of namespace declarations, attributes and text.
//!
//! Escaping rules:
//! - text: `&` `<` `>` and `\r`
//! - attribute values: `&` `<` `"` and `\t` `\n` `\r`

use std::cmp::Ordering;
use std::io::{self, Write};

use solna_xml::Attribute;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// "" for the default namespace.
    pub prefix: String,
    pub uri: String,
}

impl NsDecl {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        if self.prefix.is_empty() {
            out.write_all(b" xmlns=\"")?;
        } else {
            write!(out, " xmlns:{}=\"", self.prefix)?;
        }
        write_attr_value(out, &self.uri)?;
        out.write_all(b"\"")
    }
}

impl Ord for NsDecl {
    /// Default namespace first, then by prefix.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute in canonical sort position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr<'a>(pub &'a Attribute);

impl Attr<'_> {
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, " {}=\"", self.0.name.qualified())?;
        write_attr_value(out, &self.0.value)?;
        out.write_all(b"\"")
    }
}

impl Ord for Attr<'_> {
    /// Unqualified attributes first (by local name), then by
    /// `(namespace URI, local name)`.
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (&self.0.name, &other.0.name);
        match (a.ns.is_empty(), b.ns.is_empty()) {
            (true, true) => a.local.cmp(&b.local),
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.ns.cmp(&b.ns).then_with(|| a.local.cmp(&b.local)),
        }
    }
}

impl PartialOrd for Attr<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub fn write_text<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        let escaped: &[u8] = match ch {
            '&' => b"&amp;",
            '<' => b"&lt;",
            '>' => b"&gt;",
            '\r' => b"&#xD;",
            _ => continue,
        };
        out.write_all(&s.as_bytes()[start..i])?;
        out.write_all(escaped)?;
        start = i + 1;
    }
    out.write_all(&s.as_bytes()[start..])
}

pub fn write_attr_value<W: Write>(out: &mut W, s: &str) -> io::Result<()> {
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        let escaped: &[u8] = match ch {
            '&' => b"&amp;",
            '<' => b"&lt;",
            '"' => b"&quot;",
            '\t' => b"&#x9;",
            '\n' => b"&#xA;",
            '\r' => b"&#xD;",
            _ => continue,
        };
        out.write_all(&s.as_bytes()[start..i])?;
        out.write_all(escaped)?;
        start = i + 1;
    }
    out.write_all(&s.as_bytes()[start..])
}
