#![forbid(unsafe_code)]

//! Per-message cursor state maintained by the chain driver.
//!
//! The path stack mirrors the open start tags.  Flags are recorded together
//! with the depth they were set at and are cleared when the end tag at that
//! depth has been dispatched, so a flag can never outlive its element.

use std::collections::BTreeMap;

use solna_core::ns;
use solna_xml::{Namespace, QName, StartElement, XmlEvent};

/// Position-scoped facts about the event being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextFlag {
    /// Inside `wsse:Security` (set automatically).
    SecurityHeader,
    /// Inside an element whose digest is being verified.
    SignedContent,
    /// Inside an element that was (or is being) decrypted.
    EncryptedContent,
}

#[derive(Debug, Default)]
pub struct DocumentContext {
    path: Vec<QName>,
    /// Namespaces declared by each open element.
    declared: Vec<Vec<Namespace>>,
    flags: Vec<(ContextFlag, usize)>,
}

impl DocumentContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance over an event before it is dispatched.
    pub(crate) fn enter(&mut self, event: &XmlEvent) {
        if let XmlEvent::StartElement(start) = event {
            self.path.push(start.name.clone());
            self.declared.push(start.namespaces.clone());
            if is_security_header(&self.path) {
                self.set_flag(ContextFlag::SecurityHeader);
            }
        }
    }

    /// Advance over an event after it has been dispatched.
    pub(crate) fn leave(&mut self, event: &XmlEvent) {
        if let XmlEvent::EndElement(_) = event {
            let depth = self.depth();
            self.flags.retain(|&(_, at)| at < depth);
            self.path.pop();
            self.declared.pop();
        }
    }

    /// Names of the open elements, document element first.
    pub fn path(&self) -> &[QName] {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Set `flag` at the current depth; it is cleared with the current element.
    pub fn set_flag(&mut self, flag: ContextFlag) {
        let depth = self.depth();
        if !self.flags.contains(&(flag, depth)) {
            self.flags.push((flag, depth));
        }
    }

    /// Clear `flag` where it was set at the current depth.
    pub fn clear_flag(&mut self, flag: ContextFlag) {
        let depth = self.depth();
        self.flags.retain(|&entry| entry != (flag, depth));
    }

    pub fn is_set(&self, flag: ContextFlag) -> bool {
        self.flags.iter().any(|&(f, _)| f == flag)
    }

    pub fn in_security_header(&self) -> bool {
        self.is_set(ContextFlag::SecurityHeader)
    }

    pub fn in_signed_content(&self) -> bool {
        self.is_set(ContextFlag::SignedContent)
    }

    pub fn in_encrypted_content(&self) -> bool {
        self.is_set(ContextFlag::EncryptedContent)
    }

    /// Bindings in scope at the current element, including its own.
    pub fn in_scope_namespaces(&self) -> Vec<Namespace> {
        scope_of(&self.declared)
    }

    /// Bindings in scope at the current element's parent.
    pub fn inherited_namespaces(&self) -> Vec<Namespace> {
        self.namespaces_at(self.depth().saturating_sub(1))
    }

    /// Bindings in scope at the open element at `depth` (0 for none).
    pub fn namespaces_at(&self, depth: usize) -> Vec<Namespace> {
        scope_of(&self.declared[..depth.min(self.declared.len())])
    }
}

/// Namespace scopes for start tags that the document context has not seen:
/// events replayed from the header buffer and events injected by upstream
/// processors (decrypted content).  Falls back to the document context for
/// levels above what it has tracked itself.
#[derive(Debug, Default)]
pub(crate) struct NamespaceTracker {
    /// (depth, bindings in scope at that element including its own)
    levels: Vec<(usize, Vec<Namespace>)>,
}

impl NamespaceTracker {
    /// Record `start` and return the bindings in scope at its parent.
    pub(crate) fn enter(&mut self, start: &StartElement, document: &DocumentContext) -> Vec<Namespace> {
        let depth = start.depth();
        while self.levels.last().is_some_and(|&(d, _)| d >= depth) {
            self.levels.pop();
        }
        let parent = match self.levels.last() {
            Some((d, scope)) if *d + 1 == depth => scope.clone(),
            _ => document.namespaces_at(depth.saturating_sub(1)),
        };
        let mut own = BTreeMap::new();
        for binding in parent.iter().chain(start.namespaces.iter()) {
            own.insert(binding.prefix.clone(), binding.uri.clone());
        }
        let scope = own
            .into_iter()
            .filter(|(_, uri)| !uri.is_empty())
            .map(|(prefix, uri)| Namespace::new(prefix, uri))
            .collect();
        self.levels.push((depth, scope));
        parent
    }

    /// Bindings in scope at the most recently entered element.
    pub(crate) fn current(&self) -> &[Namespace] {
        self.levels.last().map(|(_, s)| s.as_slice()).unwrap_or(&[])
    }
}

fn scope_of(levels: &[Vec<Namespace>]) -> Vec<Namespace> {
    let mut scope = BTreeMap::new();
    for binding in levels.iter().flatten() {
        scope.insert(binding.prefix.clone(), binding.uri.clone());
    }
    scope
        .into_iter()
        .filter(|(_, uri)| !uri.is_empty())
        .map(|(prefix, uri)| Namespace::new(prefix, uri))
        .collect()
}

/// Is `path` exactly `soap:Envelope/soap:Header/wsse:Security`?
pub fn is_security_header(path: &[QName]) -> bool {
    match path {
        [envelope, header, security] => {
            ns::is_soap(&envelope.ns)
                && envelope.local == ns::node::ENVELOPE
                && header.is(&envelope.ns, ns::node::HEADER)
                && security.is(ns::WSSE, ns::node::SECURITY)
        }
        _ => false,
    }
}

/// Is `path` exactly `soap:Envelope/soap:Body`?
pub fn is_body(path: &[QName]) -> bool {
    match path {
        [envelope, body] => {
            ns::is_soap(&envelope.ns)
                && envelope.local == ns::node::ENVELOPE
                && body.is(&envelope.ns, ns::node::BODY)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_xml::read_events;

    fn walk(ctx: &mut DocumentContext, events: &[XmlEvent], mut at: impl FnMut(&DocumentContext, &XmlEvent)) {
        for event in events {
            ctx.enter(event);
            at(ctx, event);
            ctx.leave(event);
        }
    }

    #[test]
    fn test_path_mirrors_open_tags() {
        let events = read_events("<a><b><c/></b><d/></a>").unwrap();
        let mut ctx = DocumentContext::new();
        let mut max = 0;
        walk(&mut ctx, &events, |ctx, event| {
            if let XmlEvent::StartElement(start) = event {
                assert_eq!(ctx.path(), start.path.as_slice());
            }
            max = max.max(ctx.depth());
        });
        assert_eq!(max, 3);
        assert_eq!(ctx.depth(), 0);
    }

    #[test]
    fn test_security_header_flag() {
        let xml = format!(
            r#"<s:Envelope xmlns:s="{}" xmlns:wsse="{}"><s:Header><wsse:Security><x/></wsse:Security><y/></s:Header><s:Body/></s:Envelope>"#,
            ns::SOAP11,
            ns::WSSE
        );
        let events = read_events(&xml).unwrap();
        let mut ctx = DocumentContext::new();
        let mut seen = Vec::new();
        walk(&mut ctx, &events, |ctx, event| {
            if let XmlEvent::StartElement(s) = event {
                seen.push((s.name.local.clone(), ctx.in_security_header()));
            }
        });
        assert_eq!(
            seen,
            vec![
                ("Envelope".to_string(), false),
                ("Header".to_string(), false),
                ("Security".to_string(), true),
                ("x".to_string(), true),
                ("y".to_string(), false),
                ("Body".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_flags_cleared_at_their_depth() {
        let events = read_events("<a><b><c/></b><d/></a>").unwrap();
        // set on <b>, still visible on <c>, gone by <d>
        let mut ctx = DocumentContext::new();
        let mut observed = Vec::new();
        for event in &events {
            ctx.enter(event);
            if let XmlEvent::StartElement(s) = event {
                if s.name.local == "b" {
                    ctx.set_flag(ContextFlag::SignedContent);
                    ctx.set_flag(ContextFlag::EncryptedContent);
                }
                observed.push((s.name.local.clone(), ctx.in_signed_content()));
            }
            ctx.leave(event);
        }
        assert_eq!(
            observed,
            vec![
                ("a".to_string(), false),
                ("b".to_string(), true),
                ("c".to_string(), true),
                ("d".to_string(), false),
            ]
        );
        assert!(!ctx.in_encrypted_content());
    }

    #[test]
    fn test_namespace_scope() {
        let events = read_events(r#"<a xmlns:p="urn:p"><b xmlns:q="urn:q" xmlns:p="urn:p2"/></a>"#).unwrap();
        let mut ctx = DocumentContext::new();
        ctx.enter(&events[1]);
        ctx.enter(&events[2]);
        let scope = ctx.in_scope_namespaces();
        assert!(scope.contains(&Namespace::new("p", "urn:p2")));
        assert!(scope.contains(&Namespace::new("q", "urn:q")));
        assert_eq!(ctx.inherited_namespaces(), vec![Namespace::new("p", "urn:p")]);
    }

    #[test]
    fn test_tracker_follows_injected_content() {
        let events = read_events(r#"<a xmlns:p="urn:p"><b/></a>"#).unwrap();
        let mut ctx = DocumentContext::new();
        // document context sits on <a>
        ctx.enter(&events[1]);
        let mut tracker = NamespaceTracker::default();

        let parent = [QName::local("a")];
        let injected = StartElement::new(QName::local("x"), &parent).with_namespace("q", "urn:q");
        let scope = tracker.enter(&injected, &ctx);
        assert_eq!(scope, vec![Namespace::new("p", "urn:p")]);

        let nested = StartElement::new(QName::local("y"), &injected.path);
        let scope = tracker.enter(&nested, &ctx);
        assert_eq!(scope, vec![Namespace::new("p", "urn:p"), Namespace::new("q", "urn:q")]);

        // a sibling of <x> no longer sees q
        let sibling = StartElement::new(QName::local("z"), &parent);
        assert_eq!(tracker.enter(&sibling, &ctx), vec![Namespace::new("p", "urn:p")]);
        assert_eq!(tracker.current(), &[Namespace::new("p", "urn:p")]);
    }
}
