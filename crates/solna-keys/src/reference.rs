#![forbid(unsafe_code)]

//! Token references: how a signature or encrypted block names its key.

use std::fmt;

use base64::Engine;
use solna_core::{algorithm, ns, Error};
use solna_xml::XmlElement;

use crate::x509::decode_base64;

/// A pointer to a security token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenReference {
    /// `wsse:Reference URI="..."`.  A `#` fragment points into the message;
    /// anything else names an external token.
    Direct {
        uri: String,
        value_type: Option<String>,
    },
    /// `ds:X509IssuerSerial`.
    IssuerSerial { issuer: String, serial: String },
    /// `wsse:KeyIdentifier` with the X509SubjectKeyIdentifier value type.
    SubjectKeyIdentifier(Vec<u8>),
    /// `wsse:KeyIdentifier` with a SAML assertion-id value type.
    SamlAssertionId(String),
    /// `ds:KeyName`.
    KeyName(String),
}

impl TokenReference {
    /// The in-message token id a direct fragment reference points to.
    pub fn local_id(&self) -> Option<&str> {
        match self {
            Self::Direct { uri, .. } => uri.strip_prefix('#'),
            _ => None,
        }
    }
}

impl fmt::Display for TokenReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct { uri, .. } => write!(f, "reference {uri}"),
            Self::IssuerSerial { issuer, serial } => write!(f, "issuer-serial {issuer} / {serial}"),
            Self::SubjectKeyIdentifier(ski) => write!(
                f,
                "subject-key-identifier {}",
                base64::engine::general_purpose::STANDARD.encode(ski)
            ),
            Self::SamlAssertionId(id) => write!(f, "SAML assertion {id}"),
            Self::KeyName(name) => write!(f, "key name {name}"),
        }
    }
}

/// Parse the single reference inside a `wsse:SecurityTokenReference`.
pub fn parse_security_token_reference(str_elem: &XmlElement) -> Result<TokenReference, Error> {
    let mut found = Vec::new();
    for child in str_elem.elements() {
        if child.is(ns::WSSE, ns::node::REFERENCE) {
            let uri = child
                .attribute(ns::attr::URI)
                .ok_or_else(|| Error::MissingAttribute("URI on wsse:Reference".into()))?;
            found.push(TokenReference::Direct {
                uri: uri.to_owned(),
                value_type: child.attribute(ns::attr::VALUE_TYPE).map(str::to_owned),
            });
        } else if child.is(ns::WSSE, ns::node::KEY_IDENTIFIER) {
            found.push(parse_key_identifier(child)?);
        } else if child.is(ns::DSIG, ns::node::X509_DATA) {
            let issuer_serial = child.required_child(ns::DSIG, ns::node::X509_ISSUER_SERIAL)?;
            found.push(parse_issuer_serial(issuer_serial)?);
        }
    }
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(Error::InvalidSecurity(
            "SecurityTokenReference contains no supported reference".into(),
        )),
        n => Err(Error::InvalidSecurity(format!(
            "SecurityTokenReference contains {n} references, expected one"
        ))),
    }
}

fn parse_key_identifier(elem: &XmlElement) -> Result<TokenReference, Error> {
    let value_type = elem.attribute(ns::attr::VALUE_TYPE).unwrap_or("");
    let text = elem.trimmed_text();
    match value_type {
        algorithm::X509_SKI => Ok(TokenReference::SubjectKeyIdentifier(decode_base64(&text)?)),
        algorithm::SAML_ASSERTION_ID | algorithm::SAML2_ASSERTION_ID => {
            Ok(TokenReference::SamlAssertionId(text))
        }
        other => Err(Error::UnsupportedAlgorithm(format!(
            "KeyIdentifier ValueType: {other}"
        ))),
    }
}

pub(crate) fn parse_issuer_serial(elem: &XmlElement) -> Result<TokenReference, Error> {
    let issuer = elem.required_child(ns::DSIG, ns::node::X509_ISSUER_NAME)?.trimmed_text();
    let serial = elem.required_child(ns::DSIG, ns::node::X509_SERIAL_NUMBER)?.trimmed_text();
    Ok(TokenReference::IssuerSerial { issuer, serial })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_xml::{read_events, XmlTree};

    fn element(xml: &str) -> XmlElement {
        let events = read_events(xml).unwrap();
        let inner = events[1..events.len() - 1].to_vec();
        XmlTree::from_events(inner).unwrap().root().clone()
    }

    fn str_xml(body: &str) -> String {
        format!(
            r#"<wsse:SecurityTokenReference xmlns:wsse="{}" xmlns:ds="{}">{body}</wsse:SecurityTokenReference>"#,
            ns::WSSE,
            ns::DSIG
        )
    }

    #[test]
    fn test_direct_reference() {
        let r = parse_security_token_reference(&element(&str_xml(
            r##"<wsse:Reference URI="#bst-1" ValueType="x"/>"##,
        )))
        .unwrap();
        assert_eq!(r.local_id(), Some("bst-1"));
    }

    #[test]
    fn test_external_reference_has_no_local_id() {
        let r = parse_security_token_reference(&element(&str_xml(
            r#"<wsse:Reference URI="shared-key"/>"#,
        )))
        .unwrap();
        assert_eq!(r.local_id(), None);
    }

    #[test]
    fn test_ski_and_saml_identifiers() {
        let ski = format!(
            r#"<wsse:KeyIdentifier ValueType="{}">AQID</wsse:KeyIdentifier>"#,
            algorithm::X509_SKI
        );
        assert_eq!(
            parse_security_token_reference(&element(&str_xml(&ski))).unwrap(),
            TokenReference::SubjectKeyIdentifier(vec![1, 2, 3])
        );
        let saml = format!(
            r#"<wsse:KeyIdentifier ValueType="{}"> _a1 </wsse:KeyIdentifier>"#,
            algorithm::SAML2_ASSERTION_ID
        );
        assert_eq!(
            parse_security_token_reference(&element(&str_xml(&saml))).unwrap(),
            TokenReference::SamlAssertionId("_a1".into())
        );
    }

    #[test]
    fn test_issuer_serial() {
        let body = "<ds:X509Data><ds:X509IssuerSerial><ds:X509IssuerName>CN=ca</ds:X509IssuerName><ds:X509SerialNumber>42</ds:X509SerialNumber></ds:X509IssuerSerial></ds:X509Data>";
        assert_eq!(
            parse_security_token_reference(&element(&str_xml(body))).unwrap(),
            TokenReference::IssuerSerial {
                issuer: "CN=ca".into(),
                serial: "42".into()
            }
        );
    }

    #[test]
    fn test_empty_and_multiple_rejected() {
        assert!(matches!(
            parse_security_token_reference(&element(&str_xml(""))),
            Err(Error::InvalidSecurity(_))
        ));
        let two = r##"<wsse:Reference URI="#a"/><wsse:Reference URI="#b"/>"##;
        assert!(parse_security_token_reference(&element(&str_xml(two))).is_err());
    }
}
