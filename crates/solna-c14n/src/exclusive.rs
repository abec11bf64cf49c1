#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N) over an event stream.
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! Only "visibly utilized" namespace declarations are output.  A namespace is
//! visibly utilized by an element if:
//! 1. Its prefix is used by the element's tag name, OR
//! 2. Its prefix is used by one of the element's attributes, OR
//! 3. The prefix appears in the InclusiveNamespaces PrefixList.
//!
//! The writer canonicalizes the first element it sees (the apex) and its
//! descendants.  Events before the apex and after its end tag are ignored,
//! so a writer can be attached to a live stream at any start tag.

use std::collections::{BTreeMap, HashSet};
use std::io::Write;

use crate::render::{self, Attr, NsDecl};
use crate::C14nMode;
use solna_core::Error;
use solna_xml::{Namespace, StartElement, XmlEvent};

type Scope = BTreeMap<String, String>;
type SubtreeFilter = Box<dyn Fn(&StartElement) -> bool + Send>;

/// Incremental exclusive canonicalizer writing to `W`.
pub struct ExcC14nWriter<W: Write> {
    sink: W,
    with_comments: bool,
    inclusive_prefixes: HashSet<String>,
    /// In-scope bindings at the apex parent.
    inherited: Scope,
    /// One entry per open element: (in-scope bindings, rendered bindings).
    stack: Vec<(Scope, Scope)>,
    exclude: Option<SubtreeFilter>,
    /// Depth inside an excluded subtree; 0 when not excluding.
    excluded_depth: usize,
    done: bool,
}

impl<W: Write> ExcC14nWriter<W> {
    pub fn new(sink: W, mode: C14nMode, inclusive_prefixes: &[String]) -> Self {
        let inclusive_prefixes = inclusive_prefixes
            .iter()
            .map(|p| {
                if p == "#default" {
                    String::new()
                } else {
                    p.clone()
                }
            })
            .collect();
        Self {
            sink,
            with_comments: mode.with_comments(),
            inclusive_prefixes,
            inherited: Scope::new(),
            stack: Vec::new(),
            exclude: None,
            excluded_depth: 0,
            done: false,
        }
    }

    /// Namespaces in scope at the apex element's parent.
    pub fn with_inherited(mut self, in_scope: &[Namespace]) -> Self {
        for binding in in_scope {
            apply_binding(&mut self.inherited, binding);
        }
        self
    }

    /// Omit every subtree whose root start tag matches `filter`
    /// (the enveloped-signature transform).
    pub fn exclude_subtrees(mut self, filter: impl Fn(&StartElement) -> bool + Send + 'static) -> Self {
        self.exclude = Some(Box::new(filter));
        self
    }

    /// Has the apex element been closed?
    pub fn is_complete(&self) -> bool {
        self.done
    }

    /// Feed one event.
    pub fn write(&mut self, event: &XmlEvent) -> Result<(), Error> {
        if self.done {
            return Ok(());
        }
        if self.excluded_depth > 0 {
            match event {
                XmlEvent::StartElement(_) => self.excluded_depth += 1,
                XmlEvent::EndElement(_) => self.excluded_depth -= 1,
                _ => {}
            }
            return Ok(());
        }
        match event {
            XmlEvent::StartElement(start) => {
                let is_apex = self.stack.is_empty();
                if !is_apex && self.exclude.as_ref().is_some_and(|f| f(start)) {
                    self.excluded_depth = 1;
                    return Ok(());
                }
                self.start_element(start)?;
            }
            XmlEvent::EndElement(name) => {
                if self.stack.pop().is_some() {
                    write!(self.sink, "</{}>", name.qualified())?;
                    if self.stack.is_empty() {
                        self.done = true;
                    }
                }
            }
            XmlEvent::Characters(text) => {
                if !self.stack.is_empty() {
                    render::write_text(&mut self.sink, text)?;
                }
            }
            XmlEvent::Comment(text) => {
                if self.with_comments && !self.stack.is_empty() {
                    write!(self.sink, "<!--{text}-->")?;
                }
            }
            XmlEvent::StartDocument | XmlEvent::EndDocument => {}
        }
        Ok(())
    }

    fn start_element(&mut self, start: &StartElement) -> Result<(), Error> {
        let (parent_scope, parent_rendered) = match self.stack.last() {
            Some((scope, rendered)) => (scope.clone(), rendered.clone()),
            None => (self.inherited.clone(), Scope::new()),
        };
        let mut scope = parent_scope;
        for binding in &start.namespaces {
            apply_binding(&mut scope, binding);
        }

        // prefix -> URI for every visibly utilized prefix; "" URI means
        // the default namespace is not in effect
        let mut utilized: BTreeMap<&str, &str> = BTreeMap::new();
        utilized.insert(start.name.prefix.as_str(), start.name.ns.as_str());
        for attr in &start.attributes {
            if !attr.name.ns.is_empty() {
                utilized.insert(attr.name.prefix.as_str(), attr.name.ns.as_str());
            }
        }
        for prefix in &self.inclusive_prefixes {
            if let Some(uri) = scope.get(prefix) {
                utilized.entry(prefix.as_str()).or_insert(uri.as_str());
            }
        }

        let mut decls = Vec::new();
        for (prefix, uri) in utilized {
            if prefix == "xml" {
                continue;
            }
            let rendered = parent_rendered.get(prefix).map(String::as_str);
            if uri.is_empty() {
                if prefix.is_empty() && rendered.is_some_and(|u| !u.is_empty()) {
                    decls.push(NsDecl {
                        prefix: String::new(),
                        uri: String::new(),
                    });
                }
            } else if rendered != Some(uri) {
                decls.push(NsDecl {
                    prefix: prefix.to_owned(),
                    uri: uri.to_owned(),
                });
            }
        }
        decls.sort();

        let mut attrs: Vec<Attr<'_>> = start.attributes.iter().map(Attr).collect();
        attrs.sort();

        write!(self.sink, "<{}", start.name.qualified())?;
        for decl in &decls {
            decl.write_to(&mut self.sink)?;
        }
        for attr in &attrs {
            attr.write_to(&mut self.sink)?;
        }
        self.sink.write_all(b">")?;

        let mut rendered = parent_rendered;
        for decl in decls {
            rendered.insert(decl.prefix, decl.uri);
        }
        self.stack.push((scope, rendered));
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn sink_mut(&mut self) -> &mut W {
        &mut self.sink
    }
}

fn apply_binding(scope: &mut Scope, binding: &Namespace) {
    if binding.uri.is_empty() {
        scope.remove(&binding.prefix);
    } else {
        scope.insert(binding.prefix.clone(), binding.uri.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonicalize;
    use solna_xml::read_events;

    fn c14n_subtree(xml: &str, local: &str, prefixes: &[String]) -> String {
        let events = read_events(xml).unwrap();
        let start = events
            .iter()
            .position(|e| matches!(e, XmlEvent::StartElement(s) if s.name.local == local))
            .unwrap();
        let out = canonicalize(&events[start..], C14nMode::Exclusive, &[], prefixes).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_only_utilized_namespaces() {
        let xml = r#"<r xmlns:a="urn:a" xmlns:b="urn:b"><a:x b:k="1" z="2"><c/></a:x></r>"#;
        assert_eq!(
            c14n_subtree(xml, "x", &[]),
            r#"<a:x xmlns:a="urn:a" xmlns:b="urn:b" z="2" b:k="1"><c></c></a:x>"#
        );
    }

    #[test]
    fn test_unused_declaration_dropped() {
        let xml = r#"<r><x xmlns:u="urn:unused"><y/></x></r>"#;
        assert_eq!(c14n_subtree(xml, "x", &[]), "<x><y></y></x>");
    }

    #[test]
    fn test_inclusive_prefix_list() {
        let xml = r#"<x xmlns:u="urn:u"><y/></x>"#;
        assert_eq!(
            c14n_subtree(xml, "x", &["u".to_owned()]),
            r#"<x xmlns:u="urn:u"><y></y></x>"#
        );
    }

    #[test]
    fn test_redeclaration_suppressed_for_children() {
        let xml = r#"<p:x xmlns:p="urn:p"><p:y xmlns:p="urn:p">t</p:y></p:x>"#;
        assert_eq!(
            c14n_subtree(xml, "x", &[]),
            r#"<p:x xmlns:p="urn:p"><p:y>t</p:y></p:x>"#
        );
    }

    #[test]
    fn test_default_namespace() {
        let xml = r#"<x xmlns="urn:d"><y xmlns=""/></x>"#;
        assert_eq!(
            c14n_subtree(xml, "x", &[]),
            r#"<x xmlns="urn:d"><y xmlns=""></y></x>"#
        );
    }

    #[test]
    fn test_comments_mode() {
        let events = read_events("<x><!--c-->t</x>").unwrap();
        let without = canonicalize(&events, C14nMode::Exclusive, &[], &[]).unwrap();
        let with = canonicalize(&events, C14nMode::ExclusiveWithComments, &[], &[]).unwrap();
        assert_eq!(without, b"<x>t</x>");
        assert_eq!(with, b"<x><!--c-->t</x>");
    }

    #[test]
    fn test_excluded_subtree() {
        let events = read_events(r#"<x><sig><inner/></sig><k/></x>"#).unwrap();
        let mut writer = ExcC14nWriter::new(Vec::new(), C14nMode::Exclusive, &[])
            .exclude_subtrees(|s| s.name.local == "sig");
        for e in &events {
            writer.write(e).unwrap();
        }
        assert!(writer.is_complete());
        assert_eq!(writer.into_inner(), b"<x><k></k></x>");
    }

    #[test]
    fn test_stops_after_apex() {
        let events = read_events("<r><x>1</x><x>2</x></r>").unwrap();
        let start = events.iter().position(|e| e.is_start_of("", "x")).unwrap();
        let out = canonicalize(&events[start..], C14nMode::Exclusive, &[], &[]).unwrap();
        assert_eq!(out, b"<x>1</x>");
    }

    #[test]
    fn test_inherited_scope_feeds_prefix_list() {
        let events = read_events(r#"<r xmlns:u="urn:u"><x/></r>"#).unwrap();
        let start = events.iter().position(|e| e.is_start_of("", "x")).unwrap();
        let prefixes = vec!["u".to_owned()];

        let bare = canonicalize(&events[start..], C14nMode::Exclusive, &[], &prefixes).unwrap();
        assert_eq!(bare, b"<x></x>");

        let inherited = vec![Namespace::new("u", "urn:u")];
        let out =
            canonicalize(&events[start..], C14nMode::Exclusive, &inherited, &prefixes).unwrap();
        assert_eq!(out, br#"<x xmlns:u="urn:u"></x>"#);
    }
}
