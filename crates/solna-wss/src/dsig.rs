#![forbid(unsafe_code)]

//! XML Signature pieces shared by the inbound processors and the outbound
//! signature writer.
//!
//! Verification order:
//! 1. Read `SignedInfo`: CanonicalizationMethod, SignatureMethod, References
//! 2. Resolve the signing key from `KeyInfo`
//! 3. Canonicalize the buffered `SignedInfo` and verify `SignatureValue`
//! 4. Digest each referenced element as it streams past and compare

use base64::Engine;
use solna_c14n::{C14nMode, ExcC14nWriter};
use solna_core::{algorithm, ns, Error};
use solna_crypto::{digest::DigestWriter, sign, KeyMaterial};
use solna_xml::{path_to_string, Attribute, Namespace, QName, StartElement, XmlElement, XmlEvent};

/// A parsed `ds:SignedInfo`.
#[derive(Debug, Clone)]
pub struct SignedInfo {
    pub c14n: C14nMode,
    pub inclusive_prefixes: Vec<String>,
    pub signature_method: String,
    pub references: Vec<ReferenceSpec>,
}

/// One `ds:Reference`.
#[derive(Debug, Clone)]
pub struct ReferenceSpec {
    pub uri: String,
    /// Canonicalization applied to the target (exclusive C14N by default).
    pub c14n: C14nMode,
    pub inclusive_prefixes: Vec<String>,
    /// The enveloped-signature transform is present.
    pub enveloped: bool,
    pub digest_method: String,
    pub digest_value: Vec<u8>,
}

impl ReferenceSpec {
    /// The element id a same-document reference points at.
    pub fn target_id(&self) -> Result<&str, Error> {
        self.uri
            .strip_prefix('#')
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                Error::UnresolvableReference(format!(
                    "only same-document id references are supported, found \"{}\"",
                    self.uri
                ))
            })
    }
}

/// A `ds:Signature` read from a materialized tree (enveloped signatures).
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub signed_info: SignedInfo,
    pub signed_info_events: Vec<XmlEvent>,
    pub signature_value: Vec<u8>,
    pub key_info: Option<XmlElement>,
}

pub fn parse_signature(signature: &XmlElement) -> Result<ParsedSignature, Error> {
    let signed_info_elem = signature.required_child(ns::DSIG, ns::node::SIGNED_INFO)?;
    let value = signature.required_child(ns::DSIG, ns::node::SIGNATURE_VALUE)?;
    Ok(ParsedSignature {
        signed_info: parse_signed_info(signed_info_elem)?,
        signed_info_events: signed_info_elem.to_events(),
        signature_value: decode(&value.text(), "SignatureValue")?,
        key_info: signature.child(ns::DSIG, ns::node::KEY_INFO).cloned(),
    })
}

pub fn parse_signed_info(signed_info: &XmlElement) -> Result<SignedInfo, Error> {
    let c14n_method = signed_info.required_child(ns::DSIG, ns::node::CANONICALIZATION_METHOD)?;
    let c14n = C14nMode::from_uri(required_algorithm(c14n_method)?)?;
    let signature_method = required_algorithm(
        signed_info.required_child(ns::DSIG, ns::node::SIGNATURE_METHOD)?,
    )?
    .to_owned();

    let references = signed_info
        .children_named(ns::DSIG, ns::node::REFERENCE)
        .map(parse_reference)
        .collect::<Result<Vec<_>, _>>()?;
    if references.is_empty() {
        return Err(Error::MissingElement("SignedInfo has no Reference".into()));
    }

    Ok(SignedInfo {
        c14n,
        inclusive_prefixes: inclusive_prefixes(c14n_method),
        signature_method,
        references,
    })
}

fn parse_reference(reference: &XmlElement) -> Result<ReferenceSpec, Error> {
    let uri = reference.attribute(ns::attr::URI).unwrap_or("").to_owned();
    let mut spec = ReferenceSpec {
        uri,
        c14n: C14nMode::Exclusive,
        inclusive_prefixes: Vec::new(),
        enveloped: false,
        digest_method: required_algorithm(reference.required_child(ns::DSIG, ns::node::DIGEST_METHOD)?)?
            .to_owned(),
        digest_value: decode(
            &reference.required_child(ns::DSIG, ns::node::DIGEST_VALUE)?.text(),
            "DigestValue",
        )?,
    };

    if let Some(transforms) = reference.child(ns::DSIG, ns::node::TRANSFORMS) {
        for transform in transforms.children_named(ns::DSIG, ns::node::TRANSFORM) {
            match required_algorithm(transform)? {
                algorithm::ENVELOPED_SIGNATURE => spec.enveloped = true,
                uri @ (algorithm::EXC_C14N | algorithm::EXC_C14N_WITH_COMMENTS) => {
                    spec.c14n = C14nMode::from_uri(uri)?;
                    spec.inclusive_prefixes = inclusive_prefixes(transform);
                }
                other => {
                    return Err(Error::UnsupportedAlgorithm(format!(
                        "transform {other} on reference {}",
                        spec.uri
                    )))
                }
            }
        }
    }
    Ok(spec)
}

fn required_algorithm(element: &XmlElement) -> Result<&str, Error> {
    element.attribute(ns::attr::ALGORITHM).ok_or_else(|| {
        Error::MissingAttribute(format!("Algorithm on {}", path_to_string(&element.path)))
    })
}

/// `ec:InclusiveNamespaces/@PrefixList` of a method or transform element.
fn inclusive_prefixes(element: &XmlElement) -> Vec<String> {
    element
        .child(ns::EXC_C14N, "InclusiveNamespaces")
        .and_then(|e| e.attribute(ns::attr::PREFIX_LIST))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

pub(crate) fn decode(text: &str, what: &str) -> Result<Vec<u8>, Error> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

pub(crate) fn encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Canonicalize `SignedInfo` and check the signature value against `key`.
///
/// `inherited` holds the bindings in scope at the `SignedInfo` parent.
pub fn verify_signed_info(
    info: &SignedInfo,
    events: &[XmlEvent],
    inherited: &[Namespace],
    key: &KeyMaterial,
    signature_value: &[u8],
) -> Result<(), Error> {
    let canonical = solna_c14n::canonicalize(events, info.c14n, inherited, &info.inclusive_prefixes)?;
    sign::from_uri(&info.signature_method)?.verify(key, &canonical, signature_value)
}

/// A running digest over one referenced element.
pub struct ReferenceDigest {
    writer: ExcC14nWriter<DigestWriter>,
}

impl ReferenceDigest {
    /// Begin digesting at the target's start tag.  `inherited` holds the
    /// bindings in scope at the target's parent.
    pub fn start(
        digest_method: &str,
        c14n: C14nMode,
        inclusive_prefixes: &[String],
        enveloped: bool,
        target: &StartElement,
        inherited: &[Namespace],
    ) -> Result<Self, Error> {
        let mut writer = ExcC14nWriter::new(DigestWriter::new(digest_method)?, c14n, inclusive_prefixes)
            .with_inherited(inherited);
        if enveloped {
            let signature_depth = target.depth() + 1;
            writer = writer.exclude_subtrees(move |start: &StartElement| {
                start.depth() == signature_depth && start.name.is(ns::DSIG, ns::node::SIGNATURE)
            });
        }
        let mut digest = Self { writer };
        digest.write(&XmlEvent::StartElement(target.clone()))?;
        Ok(digest)
    }

    pub fn for_reference(spec: &ReferenceSpec, target: &StartElement, inherited: &[Namespace]) -> Result<Self, Error> {
        Self::start(
            &spec.digest_method,
            spec.c14n,
            &spec.inclusive_prefixes,
            spec.enveloped,
            target,
            inherited,
        )
    }

    /// Feed an event.  Returns `true` once the target element has closed.
    pub fn write(&mut self, event: &XmlEvent) -> Result<bool, Error> {
        self.writer.write(event)?;
        Ok(self.writer.is_complete())
    }

    pub fn finish(self) -> Vec<u8> {
        self.writer.into_inner().finish()
    }
}

/// Compare a computed digest with the declared one.
pub fn check_digest(spec: &ReferenceSpec, computed: &[u8], path: &[QName]) -> Result<(), Error> {
    if solna_crypto::sign::constant_time_eq(&spec.digest_value, computed) {
        Ok(())
    } else {
        Err(Error::DigestMismatch(format!(
            "{} at {} ({})",
            spec.uri,
            path_to_string(path),
            spec.digest_method
        )))
    }
}

// ── Outbound ────────────────────────────────────────────────────────

/// A reference digested on the way out, waiting for its `ds:Reference`.
#[derive(Debug, Clone)]
pub struct DigestedReference {
    pub id: String,
    pub digest_method: String,
    pub digest: Vec<u8>,
}

fn ds(local: &str) -> QName {
    QName::prefixed(ns::prefix::DSIG, ns::DSIG, local)
}

fn algorithm_attr(uri: &str) -> Vec<Attribute> {
    vec![Attribute::new(QName::local(ns::attr::ALGORITHM), uri)]
}

/// Build the events of a `ds:SignedInfo` placed below `parent_path`.
///
/// The `ds` prefix is expected to be declared on the enclosing
/// `ds:Signature`.
pub fn signed_info_events(
    parent_path: &[QName],
    c14n: C14nMode,
    signature_method: &str,
    references: &[DigestedReference],
) -> Vec<XmlEvent> {
    let mut out = Vec::new();
    let mut path = parent_path.to_vec();

    let open = |out: &mut Vec<XmlEvent>, path: &mut Vec<QName>, name: QName, attrs: Vec<Attribute>| {
        let mut start = StartElement::new(name, path);
        start.attributes = attrs;
        path.push(start.name.clone());
        out.push(XmlEvent::StartElement(start));
    };
    let close = |out: &mut Vec<XmlEvent>, path: &mut Vec<QName>| {
        if let Some(name) = path.pop() {
            out.push(XmlEvent::EndElement(name));
        }
    };

    open(&mut out, &mut path, ds(ns::node::SIGNED_INFO), Vec::new());
    open(&mut out, &mut path, ds(ns::node::CANONICALIZATION_METHOD), algorithm_attr(c14n.uri()));
    close(&mut out, &mut path);
    open(&mut out, &mut path, ds(ns::node::SIGNATURE_METHOD), algorithm_attr(signature_method));
    close(&mut out, &mut path);
    for reference in references {
        open(
            &mut out,
            &mut path,
            ds(ns::node::REFERENCE),
            vec![Attribute::new(QName::local(ns::attr::URI), format!("#{}", reference.id))],
        );
        open(&mut out, &mut path, ds(ns::node::TRANSFORMS), Vec::new());
        open(&mut out, &mut path, ds(ns::node::TRANSFORM), algorithm_attr(c14n.uri()));
        close(&mut out, &mut path);
        close(&mut out, &mut path);
        open(&mut out, &mut path, ds(ns::node::DIGEST_METHOD), algorithm_attr(&reference.digest_method));
        close(&mut out, &mut path);
        open(&mut out, &mut path, ds(ns::node::DIGEST_VALUE), Vec::new());
        out.push(XmlEvent::Characters(encode(&reference.digest)));
        close(&mut out, &mut path);
        close(&mut out, &mut path);
    }
    close(&mut out, &mut path);
    out
}

/// Canonicalize freshly built `SignedInfo` events and sign them.
pub fn sign_signed_info(
    events: &[XmlEvent],
    c14n: C14nMode,
    inherited: &[Namespace],
    signature_method: &str,
    key: &KeyMaterial,
) -> Result<Vec<u8>, Error> {
    let canonical = solna_c14n::canonicalize(events, c14n, inherited, &[])?;
    sign::from_uri(signature_method)?.sign(key, &canonical)
}
