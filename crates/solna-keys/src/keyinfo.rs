#![forbid(unsafe_code)]

//! `ds:KeyInfo` parsing.
//!
//! KeyInfo children are examined in a fixed order: a
//! `wsse:SecurityTokenReference` wins over an inline `ds:KeyValue`, which wins
//! over an embedded `ds:X509Data`, which wins over a bare `ds:KeyName`.

use solna_core::{ns, Error};
use solna_crypto::KeyMaterial;
use solna_xml::XmlElement;

use crate::reference::{parse_issuer_serial, parse_security_token_reference, TokenReference};
use crate::x509::{decode_base64, X509Certificate};

/// What a KeyInfo says about the key.
#[derive(Debug, Clone)]
pub enum KeyInfoContent {
    /// A token reference to resolve against the message or the resolver.
    Reference(TokenReference),
    /// An inline public key.
    KeyValue(KeyMaterial),
    /// An inline certificate.
    Certificate(X509Certificate),
}

/// Parse a `ds:KeyInfo`.  Returns `None` when no supported child is present.
///
/// More than one `SecurityTokenReference` is an error; callers that tolerate
/// it fall back to a shared key by name.
pub fn parse_key_info(key_info: &XmlElement) -> Result<Option<KeyInfoContent>, Error> {
    let strs: Vec<_> = key_info
        .children_named(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE)
        .collect();
    match strs.len() {
        0 => {}
        1 => {
            return parse_security_token_reference(strs[0]).map(|r| Some(KeyInfoContent::Reference(r)))
        }
        n => {
            return Err(Error::InvalidSecurity(format!(
                "KeyInfo at {} holds {n} SecurityTokenReferences",
                solna_xml::path_to_string(&key_info.path)
            )))
        }
    }

    if let Some(key_value) = key_info.child(ns::DSIG, ns::node::KEY_VALUE) {
        return parse_key_value(key_value).map(|k| Some(KeyInfoContent::KeyValue(k)));
    }

    if let Some(x509_data) = key_info.child(ns::DSIG, ns::node::X509_DATA) {
        if let Some(cert) = x509_data.child(ns::DSIG, ns::node::X509_CERTIFICATE) {
            let cert = X509Certificate::from_base64(&cert.text())?;
            return Ok(Some(KeyInfoContent::Certificate(cert)));
        }
        if let Some(issuer_serial) = x509_data.child(ns::DSIG, ns::node::X509_ISSUER_SERIAL) {
            return parse_issuer_serial(issuer_serial).map(|r| Some(KeyInfoContent::Reference(r)));
        }
    }

    if let Some(name) = key_info.child(ns::DSIG, ns::node::KEY_NAME) {
        let name = name.trimmed_text();
        if !name.is_empty() {
            return Ok(Some(KeyInfoContent::Reference(TokenReference::KeyName(name))));
        }
    }

    Ok(None)
}

/// Basic Security Profile rule for encrypted data: the KeyInfo holds exactly
/// one child element, and it is a `wsse:SecurityTokenReference`.
pub fn check_single_token_reference(key_info: &XmlElement) -> Result<(), Error> {
    let children: Vec<_> = key_info.elements().collect();
    match children.as_slice() {
        [only] if only.is(ns::WSSE, ns::node::SECURITY_TOKEN_REFERENCE) => Ok(()),
        [other] => Err(Error::InvalidSecurity(format!(
            "KeyInfo must contain a SecurityTokenReference, found {}",
            other.name
        ))),
        _ => Err(Error::InvalidSecurity(format!(
            "KeyInfo must contain exactly one SecurityTokenReference, found {} children",
            children.len()
        ))),
    }
}

/// Parse `ds:KeyValue`.  Only `RSAKeyValue` is understood.
pub fn parse_key_value(key_value: &XmlElement) -> Result<KeyMaterial, Error> {
    let rsa = key_value
        .child(ns::DSIG, ns::node::RSA_KEY_VALUE)
        .ok_or_else(|| Error::UnsupportedAlgorithm("KeyValue without RSAKeyValue".into()))?;
    parse_rsa_key_value(rsa)
}

/// Parse `ds:RSAKeyValue` (base64 big-endian modulus and exponent).
pub fn parse_rsa_key_value(rsa_key_value: &XmlElement) -> Result<KeyMaterial, Error> {
    let modulus = decode_base64(&rsa_key_value.required_child(ns::DSIG, ns::node::RSA_MODULUS)?.text())?;
    let exponent = decode_base64(&rsa_key_value.required_child(ns::DSIG, ns::node::RSA_EXPONENT)?.text())?;
    let key = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(&modulus),
        rsa::BigUint::from_bytes_be(&exponent),
    )
    .map_err(|e| Error::Key(format!("invalid RSA key value: {e}")))?;
    Ok(KeyMaterial::RsaPublic(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use rsa::traits::PublicKeyParts;
    use solna_xml::{read_events, XmlTree};

    fn key_info(body: &str) -> XmlElement {
        let xml = format!(
            r#"<ds:KeyInfo xmlns:ds="{}" xmlns:wsse="{}">{body}</ds:KeyInfo>"#,
            ns::DSIG,
            ns::WSSE
        );
        let events = read_events(&xml).unwrap();
        XmlTree::from_events(events[1..events.len() - 1].to_vec())
            .unwrap()
            .root()
            .clone()
    }

    const STR_A: &str = r##"<wsse:SecurityTokenReference><wsse:Reference URI="#a"/></wsse:SecurityTokenReference>"##;

    #[test]
    fn test_str_preferred_over_key_name() {
        let ki = key_info(&format!("<ds:KeyName>k</ds:KeyName>{STR_A}"));
        match parse_key_info(&ki).unwrap() {
            Some(KeyInfoContent::Reference(r)) => assert_eq!(r.local_id(), Some("a")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_key_name() {
        let ki = key_info("<ds:KeyName> shared </ds:KeyName>");
        assert!(matches!(
            parse_key_info(&ki).unwrap(),
            Some(KeyInfoContent::Reference(TokenReference::KeyName(n))) if n == "shared"
        ));
        assert!(parse_key_info(&key_info("")).unwrap().is_none());
    }

    #[test]
    fn test_two_strs_rejected() {
        let ki = key_info(&format!("{STR_A}{STR_A}"));
        assert!(matches!(parse_key_info(&ki), Err(Error::InvalidSecurity(_))));
        assert!(check_single_token_reference(&ki).is_err());
    }

    #[test]
    fn test_single_token_reference_rule() {
        check_single_token_reference(&key_info(STR_A)).unwrap();
        assert!(check_single_token_reference(&key_info("")).is_err());
        assert!(check_single_token_reference(&key_info("<ds:KeyName>k</ds:KeyName>")).is_err());
    }

    #[test]
    fn test_rsa_key_value() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let pk = sk.to_public_key();
        let b64 = base64::engine::general_purpose::STANDARD;
        let ki = key_info(&format!(
            "<ds:KeyValue><ds:RSAKeyValue><ds:Modulus>{}</ds:Modulus><ds:Exponent>{}</ds:Exponent></ds:RSAKeyValue></ds:KeyValue>",
            b64.encode(pk.n().to_bytes_be()),
            b64.encode(pk.e().to_bytes_be())
        ));
        match parse_key_info(&ki).unwrap() {
            Some(KeyInfoContent::KeyValue(k)) => assert!(k.matches(&KeyMaterial::RsaPublic(pk))),
            other => panic!("unexpected {other:?}"),
        }
    }
}
