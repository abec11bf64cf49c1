#![forbid(unsafe_code)]

//! The policy tree.

use std::fmt;

use solna_core::{algorithm, ns};
use solna_keys::TokenKind;
use solna_xml::{path_to_string, QName};

/// Algorithms a message may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmSuite {
    pub name: String,
    pub digest: String,
    pub encryption: String,
    /// Signature method for shared-key signatures.
    pub symmetric_signature: String,
    /// Signature method for public-key signatures.
    pub asymmetric_signature: String,
    pub c14n: String,
}

impl AlgorithmSuite {
    fn named(name: &str, digest: &str, encryption: &str, symmetric: &str, asymmetric: &str) -> Self {
        Self {
            name: name.to_owned(),
            digest: digest.to_owned(),
            encryption: encryption.to_owned(),
            symmetric_signature: symmetric.to_owned(),
            asymmetric_signature: asymmetric.to_owned(),
            c14n: algorithm::EXC_C14N.to_owned(),
        }
    }

    /// Look up a suite by its WS-SecurityPolicy element name.
    pub fn by_name(name: &str) -> Option<Self> {
        use algorithm::*;
        let suite = match name {
            "Basic256" => Self::named(name, SHA1, AES256_CBC, HMAC_SHA1, RSA_SHA1),
            "Basic192" => Self::named(name, SHA1, AES192_CBC, HMAC_SHA1, RSA_SHA1),
            "Basic128" => Self::named(name, SHA1, AES128_CBC, HMAC_SHA1, RSA_SHA1),
            "TripleDes" => Self::named(name, SHA1, TRIPLEDES_CBC, HMAC_SHA1, RSA_SHA1),
            "Basic256Sha256" => Self::named(name, SHA256, AES256_CBC, HMAC_SHA256, RSA_SHA256),
            "Basic192Sha256" => Self::named(name, SHA256, AES192_CBC, HMAC_SHA256, RSA_SHA256),
            "Basic128Sha256" => Self::named(name, SHA256, AES128_CBC, HMAC_SHA256, RSA_SHA256),
            "TripleDesSha256" => Self::named(name, SHA256, TRIPLEDES_CBC, HMAC_SHA256, RSA_SHA256),
            _ => return None,
        };
        Some(suite)
    }
}

/// Order of the security header's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Lax,
    /// The timestamp, if any, comes first.
    LaxTsFirst,
    /// The timestamp, if any, comes last.
    LaxTsLast,
    /// Timestamp first, and every token declared before the signature
    /// that uses it.
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Symmetric,
    Asymmetric,
    Transport,
}

/// A security binding with its nested properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub kind: BindingKind,
    /// Require a timestamp; for message-level bindings, a signed one.
    pub include_timestamp: bool,
    pub algorithm_suite: Option<AlgorithmSuite>,
    pub layout: Option<Layout>,
    pub children: Vec<Assertion>,
}

impl Binding {
    pub fn new(kind: BindingKind) -> Self {
        Self {
            kind,
            include_timestamp: false,
            algorithm_suite: None,
            layout: None,
            children: Vec::new(),
        }
    }

    pub fn with_timestamp(mut self) -> Self {
        self.include_timestamp = true;
        self
    }

    pub fn with_algorithm_suite(mut self, suite: AlgorithmSuite) -> Self {
        self.algorithm_suite = Some(suite);
        self
    }

    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = Some(layout);
        self
    }

    pub fn with_child(mut self, child: Assertion) -> Self {
        self.children.push(child);
        self
    }
}

/// Tokens the message must carry besides the binding's own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportingTokens {
    pub token: TokenKind,
    /// The token's element must be covered by a signature.
    pub signed: bool,
    pub children: Vec<Assertion>,
}

/// A node of the policy tree.  Every node must hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assertion {
    AlgorithmSuite(AlgorithmSuite),
    Layout(Layout),
    Binding(Binding),
    SupportingTokens(SupportingTokens),
    IncludeTimestamp,
    /// Absolute element paths that must be signed.
    SignedElements(Vec<Vec<QName>>),
    /// Absolute element paths that must have been encrypted.
    EncryptedElements(Vec<Vec<QName>>),
    All(Vec<Assertion>),
}

impl Assertion {
    /// The SOAP body path for `soap_ns`.
    pub fn body_path(soap_ns: &str) -> Vec<QName> {
        vec![
            QName::new(soap_ns, ns::node::ENVELOPE),
            QName::new(soap_ns, ns::node::BODY),
        ]
    }

    /// Signed SOAP 1.1 body.
    pub fn signed_body() -> Self {
        Self::SignedElements(vec![Self::body_path(ns::SOAP11)])
    }
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths = |paths: &[Vec<QName>]| {
            paths
                .iter()
                .map(|path| path_to_string(path))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match self {
            Self::AlgorithmSuite(suite) => write!(f, "AlgorithmSuite {}", suite.name),
            Self::Layout(layout) => write!(f, "Layout {layout:?}"),
            Self::Binding(binding) => write!(f, "{:?}Binding", binding.kind),
            Self::SupportingTokens(tokens) => {
                let signed = if tokens.signed { "Signed" } else { "" };
                write!(f, "{signed}SupportingTokens {}", tokens.token)
            }
            Self::IncludeTimestamp => f.write_str("IncludeTimestamp"),
            Self::SignedElements(list) => write!(f, "SignedElements [{}]", paths(list)),
            Self::EncryptedElements(list) => write!(f, "EncryptedElements [{}]", paths(list)),
            Self::All(children) => write!(f, "All ({} assertions)", children.len()),
        }
    }
}

/// A declared policy: the root of the assertion tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub root: Assertion,
}

impl Policy {
    pub fn new(root: Assertion) -> Self {
        Self { root }
    }

    /// A policy with nothing to satisfy.
    pub fn empty() -> Self {
        Self::new(Assertion::All(Vec::new()))
    }
}
