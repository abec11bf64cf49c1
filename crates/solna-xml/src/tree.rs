#![forbid(unsafe_code)]

//! One-shot event-to-tree materializer.
//!
//! Used on a bounded, already-captured sub-range (a `SignedInfo`, an
//! `EncryptedData`, a SAML `Assertion`) when structured reading is simpler
//! than a state machine.  The whole message is never materialized.

use crate::event::{Attribute, Namespace, QName, XmlEvent};
use solna_core::{ns, Error};

/// A node in a materialized tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
    Comment(String),
}

/// An element with its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlElement {
    pub name: QName,
    pub attributes: Vec<Attribute>,
    pub namespaces: Vec<Namespace>,
    pub path: Vec<QName>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    /// Is this element `{ns}local`?
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.name.is(ns, local)
    }

    pub fn attribute(&self, local: &str) -> Option<&str> {
        self.attribute_ns("", local)
    }

    pub fn attribute_ns(&self, ns: &str, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.is(ns, local))
            .map(|a| a.value.as_str())
    }

    /// Identifier attribute, looked up like [`crate::StartElement::id`].
    pub fn id(&self) -> Option<&str> {
        self.attribute_ns(ns::WSU, ns::attr::ID)
            .or_else(|| self.attribute(ns::attr::ID))
            .or_else(|| self.attribute(ns::attr::SAML2_ID))
            .or_else(|| self.attribute(ns::attr::SAML1_ID))
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|c| match c {
            XmlNode::Element(e) => Some(e),
            _ => None,
        })
    }

    /// First direct child named `{ns}local`.
    pub fn child(&self, ns: &str, local: &str) -> Option<&XmlElement> {
        self.elements().find(|e| e.is(ns, local))
    }

    /// All direct children named `{ns}local`.
    pub fn children_named<'a>(
        &'a self,
        ns: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a XmlElement> + 'a {
        self.elements().filter(move |e| e.is(ns, local))
    }

    /// First direct child named `{ns}local`, or a `MissingElement` error.
    pub fn required_child(&self, ns: &str, local: &str) -> Result<&XmlElement, Error> {
        self.child(ns, local).ok_or_else(|| {
            Error::MissingElement(format!("{local} in {}", self.name.qualified()))
        })
    }

    /// First descendant (depth-first, excluding `self`) named `{ns}local`.
    pub fn find(&self, ns: &str, local: &str) -> Option<&XmlElement> {
        for child in self.elements() {
            if child.is(ns, local) {
                return Some(child);
            }
            if let Some(found) = child.find(ns, local) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated direct text content.
    pub fn text(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            if let XmlNode::Text(t) = child {
                out.push_str(t);
            }
        }
        out
    }

    /// Direct text content with surrounding whitespace removed.
    pub fn trimmed_text(&self) -> String {
        self.text().trim().to_owned()
    }

    /// Re-emit this element as events.
    pub fn to_events(&self) -> Vec<XmlEvent> {
        let mut out = Vec::new();
        self.emit(&mut out);
        out
    }

    fn emit(&self, out: &mut Vec<XmlEvent>) {
        out.push(XmlEvent::StartElement(crate::StartElement {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            namespaces: self.namespaces.clone(),
            path: self.path.clone(),
        }));
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.emit(out),
                XmlNode::Text(t) => out.push(XmlEvent::Characters(t.clone())),
                XmlNode::Comment(c) => out.push(XmlEvent::Comment(c.clone())),
            }
        }
        out.push(XmlEvent::EndElement(self.name.clone()));
    }
}

/// A materialized element together with the events it was built from.
#[derive(Debug, Clone)]
pub struct XmlTree {
    root: XmlElement,
    events: Vec<XmlEvent>,
}

impl XmlTree {
    /// Build a tree from the events of exactly one element.
    pub fn from_events(events: Vec<XmlEvent>) -> Result<Self, Error> {
        let mut stack: Vec<XmlElement> = Vec::new();
        let mut root = None;

        for event in &events {
            match event {
                XmlEvent::StartElement(_) if root.is_some() => {
                    return Err(Error::XmlParse("trailing element after root".into()));
                }
                XmlEvent::StartElement(start) => stack.push(XmlElement {
                    name: start.name.clone(),
                    attributes: start.attributes.clone(),
                    namespaces: start.namespaces.clone(),
                    path: start.path.clone(),
                    children: Vec::new(),
                }),
                XmlEvent::EndElement(name) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| Error::XmlParse(format!("unmatched end tag {name}")))?;
                    if element.name != *name {
                        return Err(Error::XmlParse(format!(
                            "end tag {name} does not match {}",
                            element.name
                        )));
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(XmlNode::Element(element)),
                        None => root = Some(element),
                    }
                }
                XmlEvent::Characters(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Text(text.clone()));
                    } else if !text.trim().is_empty() {
                        return Err(Error::XmlParse("text outside root element".into()));
                    }
                }
                XmlEvent::Comment(text) => {
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(XmlNode::Comment(text.clone()));
                    }
                }
                XmlEvent::StartDocument | XmlEvent::EndDocument => {}
            }
        }

        let root = root.ok_or_else(|| Error::XmlParse("incomplete element".into()))?;
        Ok(Self { root, events })
    }

    pub fn root(&self) -> &XmlElement {
        &self.root
    }

    /// The events the tree was built from, unchanged.
    pub fn events(&self) -> &[XmlEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<XmlEvent> {
        self.events
    }
}
