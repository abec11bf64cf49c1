#![forbid(unsafe_code)]

//! Building the policy tree from WS-SecurityPolicy XML.
//!
//! A subset of WS-SecurityPolicy 1.2/1.3 is understood: the three bindings
//! with their algorithm suite, layout and timestamp properties, signed and
//! encrypted parts and elements (absolute XPath only), and supporting
//! tokens.  Policies with more than one alternative are rejected, as is any
//! assertion that is neither understood nor marked optional, since it
//! could never be shown to hold.

use std::path::{Path, PathBuf};

use roxmltree::Node;
use solna_core::{ns, Error};
use solna_keys::TokenKind;
use solna_xml::QName;
use tracing::{debug, trace};

use crate::assertion::{AlgorithmSuite, Assertion, Binding, BindingKind, Layout, Policy, SupportingTokens};

/// Supplies the declared policy for a message.
pub trait PolicySource {
    fn policy(&self) -> Result<Policy, Error>;
}

impl PolicySource for Policy {
    fn policy(&self) -> Result<Policy, Error> {
        Ok(self.clone())
    }
}

/// A policy document on disk, parsed on every request.
#[derive(Debug, Clone)]
pub struct PolicyFile {
    path: PathBuf,
    builder: PolicyBuilder,
}

impl PolicyFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            builder: PolicyBuilder::new(),
        }
    }

    pub fn with_builder(mut self, builder: PolicyBuilder) -> Self {
        self.builder = builder;
        self
    }
}

impl PolicySource for PolicyFile {
    fn policy(&self) -> Result<Policy, Error> {
        let text = std::fs::read_to_string(&self.path)?;
        self.builder.build(&text)
    }
}

/// Assertions accepted without being enforced.
const NOT_ENFORCED: &[&str] = &[
    "Wss10",
    "Wss11",
    "Trust10",
    "Trust13",
    "OnlySignEntireHeadersAndBody",
    "ProtectTokens",
];

/// Token assertions.  Inside a binding the binding kind already decides
/// what kind of key must be used; inside supporting tokens they are read
/// separately.
const TOKENS: &[&str] = &[
    "SamlToken",
    "X509Token",
    "HttpsToken",
    "KeyValueToken",
    "TransportToken",
    "ProtectionToken",
    "InitiatorToken",
    "RecipientToken",
    "SignatureToken",
    "EncryptionToken",
];

/// Parses WS-SecurityPolicy documents.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    soap_ns: String,
}

impl Default for PolicyBuilder {
    fn default() -> Self {
        Self {
            soap_ns: ns::SOAP11.to_owned(),
        }
    }
}

impl PolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// SOAP version `sp:Body` and `sp:Header` refer to.
    pub fn with_soap_ns(mut self, soap_ns: &str) -> Self {
        self.soap_ns = soap_ns.to_owned();
        self
    }

    /// Parse a SOAP 1.1 policy document.
    pub fn from_xml(xml: &str) -> Result<Policy, Error> {
        Self::new().build(xml)
    }

    pub fn build(&self, xml: &str) -> Result<Policy, Error> {
        let doc = roxmltree::Document::parse_with_options(xml, solna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        let root = doc.root_element();
        if !is_wsp(root, "Policy") {
            return Err(Error::InvalidPolicy(format!(
                "document element is {}, not wsp:Policy",
                root.tag_name().name()
            )));
        }
        let assertions = self.operators(root)?;
        debug!(assertions = assertions.len(), "policy parsed");
        Ok(Policy::new(Assertion::All(assertions)))
    }

    /// Assertions below a policy operator (`wsp:Policy`, `wsp:All`,
    /// `wsp:ExactlyOne`).
    fn operators(&self, node: Node<'_, '_>) -> Result<Vec<Assertion>, Error> {
        let mut out = Vec::new();
        for child in elements(node) {
            if is_wsp(child, "Policy") || is_wsp(child, "All") {
                out.extend(self.operators(child)?);
            } else if is_wsp(child, "ExactlyOne") {
                let alternatives: Vec<_> = elements(child).collect();
                match alternatives.as_slice() {
                    [] => {}
                    [only] if is_wsp(*only, "All") || is_wsp(*only, "Policy") => out.extend(self.operators(*only)?),
                    [_] => out.extend(self.operators(child)?),
                    _ => {
                        return Err(Error::InvalidPolicy(format!(
                            "{} policy alternatives given, only one is supported",
                            alternatives.len()
                        )))
                    }
                }
            } else if is_sp(child) {
                out.extend(self.assertion(child)?);
            } else if is_optional(child) {
                trace!(element = child.tag_name().name(), "skipping optional assertion");
            } else {
                return Err(unsupported(child));
            }
        }
        Ok(out)
    }

    /// Assertions in the nested `wsp:Policy` of an assertion.
    fn nested(&self, node: Node<'_, '_>) -> Result<Vec<Assertion>, Error> {
        match elements(node).find(|child| is_wsp(*child, "Policy")) {
            Some(policy) => self.operators(policy),
            None => Ok(Vec::new()),
        }
    }

    /// `sp:` elements of the nested policy, for assertions that name
    /// their value by an empty marker element.
    fn nested_names<'a, 'input>(&self, node: Node<'a, 'input>) -> Vec<Node<'a, 'input>> {
        elements(node)
            .filter(|child| is_wsp(*child, "Policy"))
            .flat_map(|policy| elements(policy).filter(|n| is_sp(*n)).collect::<Vec<_>>())
            .collect()
    }

    fn assertion(&self, node: Node<'_, '_>) -> Result<Option<Assertion>, Error> {
        let name = node.tag_name().name();
        let assertion = match name {
            "TransportBinding" => self.binding(node, BindingKind::Transport)?,
            "SymmetricBinding" => self.binding(node, BindingKind::Symmetric)?,
            "AsymmetricBinding" => self.binding(node, BindingKind::Asymmetric)?,
            "AlgorithmSuite" => Assertion::AlgorithmSuite(self.algorithm_suite(node)?),
            "Layout" => Assertion::Layout(self.layout(node)?),
            "IncludeTimestamp" => Assertion::IncludeTimestamp,
            "SignedParts" => Assertion::SignedElements(self.parts(node)?),
            "EncryptedParts" => Assertion::EncryptedElements(self.parts(node)?),
            "SignedElements" => Assertion::SignedElements(xpaths(node)?),
            "EncryptedElements" => Assertion::EncryptedElements(xpaths(node)?),
            "SupportingTokens" => self.supporting_tokens(node, false)?,
            "SignedSupportingTokens" => self.supporting_tokens(node, true)?,
            _ if NOT_ENFORCED.contains(&name) => {
                debug!(assertion = name, "policy assertion accepted but not enforced");
                return Ok(None);
            }
            _ if TOKENS.contains(&name) => return Ok(None),
            _ if is_optional(node) => return Ok(None),
            _ => return Err(unsupported(node)),
        };
        Ok(Some(assertion))
    }

    fn binding(&self, node: Node<'_, '_>, kind: BindingKind) -> Result<Assertion, Error> {
        let mut binding = Binding::new(kind);
        for assertion in self.nested(node)? {
            match assertion {
                Assertion::AlgorithmSuite(suite) => binding.algorithm_suite = Some(suite),
                Assertion::Layout(layout) => binding.layout = Some(layout),
                Assertion::IncludeTimestamp => binding.include_timestamp = true,
                other => binding.children.push(other),
            }
        }
        Ok(Assertion::Binding(binding))
    }

    fn algorithm_suite(&self, node: Node<'_, '_>) -> Result<AlgorithmSuite, Error> {
        let names = self.nested_names(node);
        let [suite] = names.as_slice() else {
            return Err(Error::InvalidPolicy(format!(
                "sp:AlgorithmSuite must name exactly one suite, found {}",
                names.len()
            )));
        };
        let name = suite.tag_name().name();
        AlgorithmSuite::by_name(name)
            .ok_or_else(|| Error::InvalidPolicy(format!("unknown algorithm suite {name}")))
    }

    fn layout(&self, node: Node<'_, '_>) -> Result<Layout, Error> {
        let names = self.nested_names(node);
        match names.first().map(|n| n.tag_name().name()) {
            None | Some("Lax") => Ok(Layout::Lax),
            Some("LaxTsFirst") => Ok(Layout::LaxTsFirst),
            Some("LaxTsLast") => Ok(Layout::LaxTsLast),
            Some("Strict") => Ok(Layout::Strict),
            Some(other) => Err(Error::InvalidPolicy(format!("unknown layout {other}"))),
        }
    }

    /// `sp:Body` and named `sp:Header`s as absolute paths.
    fn parts(&self, node: Node<'_, '_>) -> Result<Vec<Vec<QName>>, Error> {
        let envelope = QName::new(self.soap_ns.as_str(), ns::node::ENVELOPE);
        let mut paths = Vec::new();
        for part in elements(node).filter(|n| is_sp(*n)) {
            match part.tag_name().name() {
                "Body" => paths.push(Assertion::body_path(&self.soap_ns)),
                "Header" => {
                    let name = part.attribute("Name").ok_or_else(|| {
                        Error::InvalidPolicy("sp:Header without Name (whole namespaces are not supported)".into())
                    })?;
                    let namespace = part.attribute("Namespace").unwrap_or("");
                    paths.push(vec![
                        envelope.clone(),
                        QName::new(self.soap_ns.as_str(), ns::node::HEADER),
                        QName::new(namespace, name),
                    ]);
                }
                _ => return Err(unsupported(part)),
            }
        }
        Ok(paths)
    }

    fn supporting_tokens(&self, node: Node<'_, '_>, signed: bool) -> Result<Assertion, Error> {
        let mut kinds = Vec::new();
        for token in self.nested_names(node) {
            let kind = match token.tag_name().name() {
                "SamlToken" => TokenKind::Saml,
                "X509Token" => TokenKind::X509,
                "HttpsToken" => TokenKind::Https,
                "KeyValueToken" => TokenKind::PublicKey,
                _ => continue,
            };
            kinds.push(kind);
        }
        let children = self.nested(node)?;
        let Some((first, rest)) = kinds.split_first() else {
            return Err(Error::InvalidPolicy(format!(
                "{} names no supported token",
                node.tag_name().name()
            )));
        };
        let mut all = vec![Assertion::SupportingTokens(SupportingTokens {
            token: *first,
            signed,
            children,
        })];
        all.extend(rest.iter().map(|kind| {
            Assertion::SupportingTokens(SupportingTokens {
                token: *kind,
                signed,
                children: Vec::new(),
            })
        }));
        Ok(match all.len() {
            1 => all.remove(0),
            _ => Assertion::All(all),
        })
    }
}

fn elements<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|child| child.is_element())
}

fn is_wsp(node: Node<'_, '_>, local: &str) -> bool {
    node.tag_name().name() == local && matches!(node.tag_name().namespace(), Some(ns::WSP) | Some(ns::WSP_2004))
}

fn is_sp(node: Node<'_, '_>) -> bool {
    matches!(node.tag_name().namespace(), Some(ns::SP12) | Some(ns::SP13))
}

fn is_optional(node: Node<'_, '_>) -> bool {
    [ns::WSP, ns::WSP_2004]
        .iter()
        .any(|wsp| node.attribute((*wsp, "Optional")) == Some("true"))
}

fn unsupported(node: Node<'_, '_>) -> Error {
    Error::InvalidPolicy(format!(
        "unsupported policy assertion {{{}}}{}",
        node.tag_name().namespace().unwrap_or(""),
        node.tag_name().name()
    ))
}

/// Absolute paths from the `sp:XPath` children of `node`.
fn xpaths(node: Node<'_, '_>) -> Result<Vec<Vec<QName>>, Error> {
    elements(node)
        .filter(|n| is_sp(*n) && n.tag_name().name() == "XPath")
        .map(|xpath| parse_xpath(xpath, xpath.text().unwrap_or("").trim()))
        .collect()
}

/// `/p:a/p:b` with prefixes resolved where the expression is written.
fn parse_xpath(context: Node<'_, '_>, expression: &str) -> Result<Vec<QName>, Error> {
    let not_plain = || Error::InvalidPolicy(format!("XPath {expression:?} is not a plain absolute path"));
    let rest = expression.strip_prefix('/').ok_or_else(not_plain)?;
    let mut path = Vec::new();
    for step in rest.split('/') {
        if step.is_empty() || step.contains(['[', '*', '(', '@', ' ']) {
            return Err(not_plain());
        }
        let name = match step.split_once(':') {
            Some((prefix, local)) => {
                let uri = context.lookup_namespace_uri(Some(prefix)).ok_or_else(|| {
                    Error::InvalidPolicy(format!("prefix {prefix} in XPath {expression:?} is not declared"))
                })?;
                QName::prefixed(prefix, uri, local)
            }
            None => QName::local(step),
        };
        path.push(name);
    }
    Ok(path)
}
