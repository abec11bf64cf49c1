#![forbid(unsafe_code)]

//! Tokenizer adapter: XML text to [`XmlEvent`]s.
//!
//! `roxmltree` does the parsing; this module walks the resulting tree once
//! and flattens it into start/characters/comment/end events, resolving each
//! element's prefix and recording the namespaces it declares.

use crate::event::{Attribute, Namespace, QName, StartElement, XmlEvent};
use solna_core::{ns, Error};

const FRAGMENT_NS: &str = "urn:solna:fragment";
const FRAGMENT_PREFIX: &str = "solna-fragment";

/// Tokenize a complete document.
pub fn read_events(text: &str) -> Result<Vec<XmlEvent>, Error> {
    let doc = roxmltree::Document::parse_with_options(text, crate::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;

    let mut events = vec![XmlEvent::StartDocument];
    let mut path = Vec::new();
    for child in doc.root().children() {
        emit_node(child, &mut path, &mut events);
    }
    events.push(XmlEvent::EndDocument);
    Ok(events)
}

/// Tokenize a fragment (an element or mixed content) that will be spliced
/// below `parent_path`, resolving prefixes against `in_scope`.
///
/// Namespaces already in scope at the splice point are not re-declared on
/// the fragment's top-level elements.
pub fn read_fragment(
    text: &str,
    parent_path: &[QName],
    in_scope: &[Namespace],
) -> Result<Vec<XmlEvent>, Error> {
    let mut wrapper = format!("<{FRAGMENT_PREFIX}:w xmlns:{FRAGMENT_PREFIX}=\"{FRAGMENT_NS}\"");
    for binding in in_scope {
        if binding.prefix == "xml" {
            continue;
        }
        let uri = crate::writer::escape_attr(&binding.uri);
        if binding.prefix.is_empty() {
            wrapper.push_str(&format!(" xmlns=\"{uri}\""));
        } else {
            wrapper.push_str(&format!(" xmlns:{}=\"{uri}\"", binding.prefix));
        }
    }
    wrapper.push('>');
    wrapper.push_str(text);
    wrapper.push_str(&format!("</{FRAGMENT_PREFIX}:w>"));

    let doc = roxmltree::Document::parse_with_options(&wrapper, crate::parsing_options())
        .map_err(|e| Error::XmlParse(format!("decrypted fragment: {e}")))?;

    let mut events = Vec::new();
    let mut path = parent_path.to_vec();
    for child in doc.root_element().children() {
        emit_node(child, &mut path, &mut events);
    }
    Ok(events)
}

fn emit_node(node: roxmltree::Node<'_, '_>, path: &mut Vec<QName>, out: &mut Vec<XmlEvent>) {
    if node.is_element() {
        let name = element_name(node);
        path.push(name.clone());
        out.push(XmlEvent::StartElement(StartElement {
            name: name.clone(),
            attributes: attributes(node),
            namespaces: declared_namespaces(node),
            path: path.clone(),
        }));
        for child in node.children() {
            emit_node(child, path, out);
        }
        path.pop();
        out.push(XmlEvent::EndElement(name));
    } else if node.is_text() {
        if let Some(text) = node.text() {
            out.push(XmlEvent::Characters(text.to_owned()));
        }
    } else if node.is_comment() {
        if let Some(text) = node.text() {
            out.push(XmlEvent::Comment(text.to_owned()));
        }
    }
}

fn element_name(node: roxmltree::Node<'_, '_>) -> QName {
    let tag = node.tag_name();
    let uri = tag.namespace().unwrap_or("");
    let prefix = if uri.is_empty() {
        ""
    } else {
        node.lookup_prefix(uri).unwrap_or("")
    };
    QName::prefixed(prefix, uri, tag.name())
}

fn attributes(node: roxmltree::Node<'_, '_>) -> Vec<Attribute> {
    node.attributes()
        .map(|attr| {
            let uri = attr.namespace().unwrap_or("");
            let prefix = if uri.is_empty() {
                ""
            } else if uri == ns::XML {
                "xml"
            } else {
                // attributes never use the default namespace
                node.namespaces()
                    .find(|b| b.uri() == uri && b.name().is_some())
                    .and_then(|b| b.name())
                    .unwrap_or("")
            };
            Attribute::new(QName::prefixed(prefix, uri, attr.name()), attr.value())
        })
        .collect()
}

/// In-scope bindings of `node` that its parent element does not have.
fn declared_namespaces(node: roxmltree::Node<'_, '_>) -> Vec<Namespace> {
    let parent_scope: Vec<(Option<&str>, &str)> = match node.parent_element() {
        Some(parent) => parent.namespaces().map(|b| (b.name(), b.uri())).collect(),
        None => Vec::new(),
    };
    let mut declared: Vec<Namespace> = node
        .namespaces()
        .filter(|b| b.name() != Some("xml"))
        .filter(|b| !parent_scope.contains(&(b.name(), b.uri())))
        .map(|b| Namespace::new(b.name().unwrap_or(""), b.uri()))
        .collect();
    declared.sort_by(|a, b| a.prefix.cmp(&b.prefix));
    declared
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOAP: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Header/><soap:Body xmlns:m="urn:m"><m:op a="1">hi<!--c--></m:op></soap:Body></soap:Envelope>"#;

    #[test]
    fn test_document_events() {
        let events = read_events(SOAP).unwrap();
        assert_eq!(events.first(), Some(&XmlEvent::StartDocument));
        assert_eq!(events.last(), Some(&XmlEvent::EndDocument));

        let starts: Vec<&StartElement> = events.iter().filter_map(|e| e.as_start()).collect();
        assert_eq!(starts.len(), 4);
        assert_eq!(starts[0].name.prefix, "soap");
        assert_eq!(starts[0].namespaces, vec![Namespace::new("soap", ns::SOAP11)]);
        assert!(starts[1].namespaces.is_empty());

        let op = starts[3];
        assert_eq!(op.name, QName::new("urn:m", "op"));
        assert_eq!(op.name.prefix, "m");
        assert_eq!(op.attribute("a"), Some("1"));
        assert_eq!(op.path.len(), 3);
        assert!(op.path[1].is(ns::SOAP11, "Body"));
        assert!(events.contains(&XmlEvent::Characters("hi".into())));
        assert!(events.contains(&XmlEvent::Comment("c".into())));
    }

    #[test]
    fn test_balanced_events() {
        let events = read_events(SOAP).unwrap();
        let starts = events.iter().filter(|e| e.is_start()).count();
        let ends = events.iter().filter(|e| e.is_end()).count();
        assert_eq!(starts, ends);
    }

    #[test]
    fn test_prefixed_attribute() {
        let xml = format!(
            r#"<a xmlns:wsu="{}" wsu:Id="x1" xml:lang="en"/>"#,
            ns::WSU
        );
        let events = read_events(&xml).unwrap();
        let start = events[1].as_start().unwrap();
        assert_eq!(start.attribute_ns(ns::WSU, "Id"), Some("x1"));
        let id = start.attributes.iter().find(|a| a.name.local == "Id").unwrap();
        assert_eq!(id.name.prefix, "wsu");
        let lang = start.attributes.iter().find(|a| a.name.local == "lang").unwrap();
        assert_eq!(lang.name.prefix, "xml");
    }

    #[test]
    fn test_dtd_rejected() {
        let xml = r#"<!DOCTYPE a [<!ENTITY e "x">]><a>&e;</a>"#;
        assert!(matches!(read_events(xml), Err(Error::XmlParse(_))));
    }

    #[test]
    fn test_fragment_in_parent_scope() {
        let parent = vec![
            QName::prefixed("soap", ns::SOAP11, "Envelope"),
            QName::prefixed("soap", ns::SOAP11, "Body"),
        ];
        let scope = vec![Namespace::new("soap", ns::SOAP11), Namespace::new("m", "urn:m")];
        let events = read_fragment("<m:op>1</m:op>text", &parent, &scope).unwrap();
        assert_eq!(events.len(), 4);
        let op = events[0].as_start().unwrap();
        assert_eq!(op.name, QName::new("urn:m", "op"));
        assert!(op.namespaces.is_empty());
        assert_eq!(op.path.len(), 3);
        assert_eq!(events[3], XmlEvent::Characters("text".into()));
    }
}
