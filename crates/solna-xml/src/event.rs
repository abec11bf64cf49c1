#![forbid(unsafe_code)]

//! The structural event model.
//!
//! A [`QName`] compares by `(namespace, local name)` only; the prefix is kept
//! for serialization and canonicalization but never participates in identity.

use std::fmt;
use std::hash::{Hash, Hasher};

use solna_core::ns;

/// A namespace-qualified name.
#[derive(Debug, Clone, Default)]
pub struct QName {
    /// Namespace URI ("" for no namespace).
    pub ns: String,
    /// Local part.
    pub local: String,
    /// Prefix as written in the source ("" for default/no namespace).
    pub prefix: String,
}

impl QName {
    /// A name without a prefix.
    pub fn new(ns: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
            prefix: String::new(),
        }
    }

    /// A name with an explicit prefix.
    pub fn prefixed(
        prefix: impl Into<String>,
        ns: impl Into<String>,
        local: impl Into<String>,
    ) -> Self {
        Self {
            ns: ns.into(),
            local: local.into(),
            prefix: prefix.into(),
        }
    }

    /// A name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    /// Does this name have the given namespace and local part?
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.local == local && self.ns == ns
    }

    /// The lexical `prefix:local` form.
    pub fn qualified(&self) -> String {
        if self.prefix.is_empty() {
            self.local.clone()
        } else {
            format!("{}:{}", self.prefix, self.local)
        }
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.local == other.local
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.local.hash(state);
    }
}

impl fmt::Display for QName {
    /// Clark notation: `{ns}local`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ns.is_empty() {
            write!(f, "{}", self.local)
        } else {
            write!(f, "{{{}}}{}", self.ns, self.local)
        }
    }
}

/// Render an element path as `/{ns}a/{ns}b`.
pub fn path_to_string(path: &[QName]) -> String {
    let mut out = String::new();
    for name in path {
        out.push('/');
        out.push_str(&name.to_string());
    }
    out
}

/// An attribute on a start tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// A namespace binding declared on a start tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// "" for the default namespace.
    pub prefix: String,
    pub uri: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// A start tag with its attributes, the namespaces declared on it and its
/// full path from the document element down to (and including) itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<Namespace>,
    pub path: Vec<QName>,
}

impl StartElement {
    /// Create a start tag below `parent_path`.
    pub fn new(name: QName, parent_path: &[QName]) -> Self {
        let mut path = parent_path.to_vec();
        path.push(name.clone());
        Self {
            name,
            attributes: Vec::new(),
            namespaces: Vec::new(),
            path,
        }
    }

    /// Builder: add an attribute.
    pub fn with_attribute(mut self, name: QName, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    /// Builder: declare a namespace.
    pub fn with_namespace(mut self, prefix: &str, uri: &str) -> Self {
        self.namespaces.push(Namespace::new(prefix, uri));
        self
    }

    /// Value of an attribute in no namespace.
    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attribute_ns("", local)
    }

    /// Value of a namespace-qualified attribute.
    pub fn attribute_ns(&self, ns: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(ns, local))
            .map(|a| a.value.as_str())
    }

    /// Replace or add an attribute.
    pub fn set_attribute(&mut self, name: QName, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    /// The element's identifier: `wsu:Id`, then `Id`, `ID`, `AssertionID`,
    /// then any of the `extra` unqualified attribute names.
    pub fn id(&self, extra: &[String]) -> Option<&str> {
        self.attribute_ns(ns::WSU, ns::attr::ID)
            .or_else(|| self.attribute(ns::attr::ID))
            .or_else(|| self.attribute(ns::attr::SAML2_ID))
            .or_else(|| self.attribute(ns::attr::SAML1_ID))
            .or_else(|| extra.iter().find_map(|name| self.attribute(name)))
    }

    /// Nesting depth (1 for the document element).
    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

/// One structural unit of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlEvent {
    StartDocument,
    EndDocument,
    StartElement(StartElement),
    EndElement(QName),
    Characters(String),
    Comment(String),
}

impl XmlEvent {
    pub fn as_start(&self) -> Option<&StartElement> {
        match self {
            XmlEvent::StartElement(start) => Some(start),
            _ => None,
        }
    }

    pub fn as_start_mut(&mut self) -> Option<&mut StartElement> {
        match self {
            XmlEvent::StartElement(start) => Some(start),
            _ => None,
        }
    }

    /// Is this the start tag of `{ns}local`?
    pub fn is_start_of(&self, ns: &str, local: &str) -> bool {
        matches!(self, XmlEvent::StartElement(s) if s.name.is(ns, local))
    }

    /// Is this the end tag of `{ns}local`?
    pub fn is_end_of(&self, ns: &str, local: &str) -> bool {
        matches!(self, XmlEvent::EndElement(n) if n.is(ns, local))
    }

    pub fn is_start(&self) -> bool {
        matches!(self, XmlEvent::StartElement(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(self, XmlEvent::EndElement(_))
    }

    /// Short label used in log output.
    pub fn describe(&self) -> String {
        match self {
            XmlEvent::StartDocument => "start-document".into(),
            XmlEvent::EndDocument => "end-document".into(),
            XmlEvent::StartElement(s) => format!("<{}>", s.name.qualified()),
            XmlEvent::EndElement(n) => format!("</{}>", n.qualified()),
            XmlEvent::Characters(_) => "characters".into(),
            XmlEvent::Comment(_) => "comment".into(),
        }
    }
}
