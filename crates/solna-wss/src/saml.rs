#![forbid(unsafe_code)]

//! SAML 1.1 and 2.0 assertions as security tokens.
//!
//! Only what token processing needs is read: the id, the issuer, the
//! subject confirmation methods, the subject's proof key and the validity
//! window.  Attribute and authentication statements are left to the caller.

use chrono::{DateTime, Utc};
use solna_core::{algorithm, ns, Error};
use solna_crypto::KeyMaterial;
use solna_keys::keyinfo::{parse_key_info, KeyInfoContent};
use solna_keys::X509Certificate;
use solna_xml::XmlElement;

use crate::event::SubjectConfirmation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlVersion {
    V11,
    V20,
}

/// The key the subject must prove possession of.
#[derive(Debug, Clone)]
pub enum SubjectKey {
    Certificate(X509Certificate),
    Key(KeyMaterial),
}

#[derive(Debug, Clone)]
pub struct SamlAssertion {
    pub id: String,
    pub version: SamlVersion,
    pub issuer: String,
    pub confirmations: Vec<SubjectConfirmation>,
    pub subject_key: Option<SubjectKey>,
    pub not_before: Option<DateTime<Utc>>,
    pub not_on_or_after: Option<DateTime<Utc>>,
}

impl SamlAssertion {
    /// Read an `Assertion` element of either version.
    pub fn parse(assertion: &XmlElement) -> Result<Self, Error> {
        if assertion.is(ns::SAML2, ns::node::ASSERTION) {
            parse_v20(assertion)
        } else if assertion.is(ns::SAML1, ns::node::ASSERTION) {
            parse_v11(assertion)
        } else {
            Err(Error::InvalidSecurity(format!(
                "{} is not a SAML assertion",
                assertion.name
            )))
        }
    }

    /// The confirmation method that decides how the assertion is bound to
    /// the message: holder-of-key wins over sender-vouches, which wins over
    /// bearer.
    pub fn confirmation(&self) -> SubjectConfirmation {
        [SubjectConfirmation::HolderOfKey, SubjectConfirmation::SenderVouches]
            .into_iter()
            .find(|method| self.confirmations.contains(method))
            .unwrap_or(SubjectConfirmation::Bearer)
    }

    /// Check `NotBefore`/`NotOnOrAfter` against `now`.
    pub fn check_conditions(&self, now: DateTime<Utc>) -> Result<(), Error> {
        if let Some(not_before) = self.not_before {
            if now < not_before {
                return Err(Error::NotYetValid(format!(
                    "SAML assertion {} is not valid before {not_before}",
                    self.id
                )));
            }
        }
        if let Some(not_on_or_after) = self.not_on_or_after {
            if now >= not_on_or_after {
                return Err(Error::Expired(format!(
                    "SAML assertion {} expired at {not_on_or_after}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn parse_v20(assertion: &XmlElement) -> Result<SamlAssertion, Error> {
    let id = assertion
        .attribute(ns::attr::SAML2_ID)
        .ok_or_else(|| Error::MissingAttribute("ID on saml2:Assertion".into()))?;
    if assertion.attribute(ns::attr::VERSION) != Some("2.0") {
        return Err(Error::InvalidSecurity(format!("SAML assertion {id} is not version 2.0")));
    }
    let issuer = assertion.required_child(ns::SAML2, ns::node::ISSUER)?.trimmed_text();

    let mut confirmations = Vec::new();
    let mut subject_key = None;
    if let Some(subject) = assertion.child(ns::SAML2, ns::node::SUBJECT) {
        for confirmation in subject.children_named(ns::SAML2, ns::node::SUBJECT_CONFIRMATION) {
            let method = confirmation
                .attribute(ns::attr::METHOD)
                .ok_or_else(|| Error::MissingAttribute("Method on SubjectConfirmation".into()))?;
            confirmations.extend(confirmation_method(method));
            if subject_key.is_none() {
                if let Some(key_info) = confirmation
                    .child(ns::SAML2, ns::node::SUBJECT_CONFIRMATION_DATA)
                    .and_then(|data| data.child(ns::DSIG, ns::node::KEY_INFO))
                {
                    subject_key = parse_subject_key(key_info)?;
                }
            }
        }
    }

    let (not_before, not_on_or_after) = conditions(assertion.child(ns::SAML2, ns::node::CONDITIONS))?;
    Ok(SamlAssertion {
        id: id.to_owned(),
        version: SamlVersion::V20,
        issuer,
        confirmations,
        subject_key,
        not_before,
        not_on_or_after,
    })
}

fn parse_v11(assertion: &XmlElement) -> Result<SamlAssertion, Error> {
    let id = assertion
        .attribute(ns::attr::SAML1_ID)
        .ok_or_else(|| Error::MissingAttribute("AssertionID on saml:Assertion".into()))?;
    if assertion.attribute(ns::attr::MAJOR_VERSION) != Some("1") {
        return Err(Error::InvalidSecurity(format!("SAML assertion {id} is not version 1.x")));
    }
    let issuer = assertion
        .attribute(ns::node::ISSUER)
        .ok_or_else(|| Error::MissingAttribute("Issuer on saml:Assertion".into()))?
        .to_owned();

    // every statement carries its own Subject
    let mut confirmations = Vec::new();
    let mut subject_key = None;
    for statement in assertion.elements() {
        let Some(confirmation) = statement
            .child(ns::SAML1, ns::node::SUBJECT)
            .and_then(|subject| subject.child(ns::SAML1, ns::node::SUBJECT_CONFIRMATION))
        else {
            continue;
        };
        for method in confirmation.children_named(ns::SAML1, ns::node::CONFIRMATION_METHOD) {
            for parsed in confirmation_method(&method.trimmed_text()) {
                if !confirmations.contains(&parsed) {
                    confirmations.push(parsed);
                }
            }
        }
        if subject_key.is_none() {
            if let Some(key_info) = confirmation.child(ns::DSIG, ns::node::KEY_INFO) {
                subject_key = parse_subject_key(key_info)?;
            }
        }
    }

    let (not_before, not_on_or_after) = conditions(assertion.child(ns::SAML1, ns::node::CONDITIONS))?;
    Ok(SamlAssertion {
        id: id.to_owned(),
        version: SamlVersion::V11,
        issuer,
        confirmations,
        subject_key,
        not_before,
        not_on_or_after,
    })
}

fn confirmation_method(uri: &str) -> Option<SubjectConfirmation> {
    match uri {
        algorithm::SAML1_HOLDER_OF_KEY | algorithm::SAML2_HOLDER_OF_KEY => Some(SubjectConfirmation::HolderOfKey),
        algorithm::SAML1_SENDER_VOUCHES | algorithm::SAML2_SENDER_VOUCHES => {
            Some(SubjectConfirmation::SenderVouches)
        }
        algorithm::SAML1_BEARER | algorithm::SAML2_BEARER => Some(SubjectConfirmation::Bearer),
        _ => None,
    }
}

/// The subject's proof key: a certificate, a key value or a trust
/// `BinarySecret`.
fn parse_subject_key(key_info: &XmlElement) -> Result<Option<SubjectKey>, Error> {
    for trust in [ns::WST, ns::WST_0502] {
        if let Some(secret) = key_info.child(trust, ns::node::BINARY_SECRET) {
            let bytes = crate::dsig::decode(&secret.text(), "BinarySecret")?;
            return Ok(Some(SubjectKey::Key(KeyMaterial::Secret(bytes))));
        }
    }
    Ok(match parse_key_info(key_info)? {
        Some(KeyInfoContent::Certificate(cert)) => Some(SubjectKey::Certificate(cert)),
        Some(KeyInfoContent::KeyValue(key)) => Some(SubjectKey::Key(key)),
        Some(KeyInfoContent::Reference(_)) | None => None,
    })
}

type Window = (Option<DateTime<Utc>>, Option<DateTime<Utc>>);

fn conditions(conditions: Option<&XmlElement>) -> Result<Window, Error> {
    let Some(conditions) = conditions else {
        return Ok((None, None));
    };
    let instant = |name: &str| -> Result<Option<DateTime<Utc>>, Error> {
        conditions
            .attribute(name)
            .map(|value| parse_instant(value, name))
            .transpose()
    };
    Ok((instant(ns::attr::NOT_BEFORE)?, instant(ns::attr::NOT_ON_OR_AFTER)?))
}

/// Parse an `xsd:dateTime` carrying an explicit zone.
pub(crate) fn parse_instant(value: &str, what: &str) -> Result<DateTime<Utc>, Error> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidSecurity(format!("{what} \"{}\": {e}", value.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solna_xml::{read_events, XmlEvent, XmlTree};

    fn element(xml: &str) -> XmlElement {
        let events: Vec<_> = read_events(xml)
            .unwrap()
            .into_iter()
            .filter(|e| !matches!(e, XmlEvent::StartDocument | XmlEvent::EndDocument))
            .collect();
        XmlTree::from_events(events).unwrap().root().clone()
    }

    fn at(value: &str) -> DateTime<Utc> {
        parse_instant(value, "test").unwrap()
    }

    #[test]
    fn test_saml2_sender_vouches() {
        let xml = format!(
            r#"<saml2:Assertion xmlns:saml2="{}" ID="a-1" Version="2.0" IssueInstant="2024-01-01T00:00:00Z">
                <saml2:Issuer>https://idp.example</saml2:Issuer>
                <saml2:Subject>
                    <saml2:NameID>alice</saml2:NameID>
                    <saml2:SubjectConfirmation Method="{}"/>
                </saml2:Subject>
                <saml2:Conditions NotBefore="2024-01-01T00:00:00Z" NotOnOrAfter="2024-01-01T01:00:00Z"/>
            </saml2:Assertion>"#,
            ns::SAML2,
            algorithm::SAML2_SENDER_VOUCHES
        );
        let assertion = SamlAssertion::parse(&element(&xml)).unwrap();
        assert_eq!(assertion.id, "a-1");
        assert_eq!(assertion.version, SamlVersion::V20);
        assert_eq!(assertion.issuer, "https://idp.example");
        assert_eq!(assertion.confirmation(), SubjectConfirmation::SenderVouches);
        assert!(assertion.subject_key.is_none());

        assertion.check_conditions(at("2024-01-01T00:30:00Z")).unwrap();
        assert!(matches!(
            assertion.check_conditions(at("2024-01-01T01:00:00Z")),
            Err(Error::Expired(_))
        ));
        assert!(matches!(
            assertion.check_conditions(at("2023-12-31T23:59:59Z")),
            Err(Error::NotYetValid(_))
        ));
    }

    #[test]
    fn test_saml1_holder_of_key_secret() {
        let xml = format!(
            r#"<saml:Assertion xmlns:saml="{}" xmlns:ds="{}" xmlns:wst="{}" AssertionID="_b2" MajorVersion="1" MinorVersion="1" Issuer="sts">
                <saml:AuthenticationStatement AuthenticationMethod="urn:ietf:rfc:3075">
                    <saml:Subject>
                        <saml:SubjectConfirmation>
                            <saml:ConfirmationMethod>{}</saml:ConfirmationMethod>
                            <saml:ConfirmationMethod>{}</saml:ConfirmationMethod>
                            <ds:KeyInfo><wst:BinarySecret>AQIDBA==</wst:BinarySecret></ds:KeyInfo>
                        </saml:SubjectConfirmation>
                    </saml:Subject>
                </saml:AuthenticationStatement>
            </saml:Assertion>"#,
            ns::SAML1,
            ns::DSIG,
            ns::WST,
            algorithm::SAML1_BEARER,
            algorithm::SAML1_HOLDER_OF_KEY
        );
        let assertion = SamlAssertion::parse(&element(&xml)).unwrap();
        assert_eq!(assertion.version, SamlVersion::V11);
        assert_eq!(assertion.issuer, "sts");
        assert_eq!(assertion.confirmation(), SubjectConfirmation::HolderOfKey);
        match assertion.subject_key {
            Some(SubjectKey::Key(KeyMaterial::Secret(bytes))) => assert_eq!(bytes, [1, 2, 3, 4]),
            other => panic!("unexpected subject key {other:?}"),
        }
    }

    #[test]
    fn test_wrong_version_rejected() {
        let xml = format!(
            r#"<saml2:Assertion xmlns:saml2="{}" ID="a" Version="1.1"><saml2:Issuer>x</saml2:Issuer></saml2:Assertion>"#,
            ns::SAML2
        );
        assert!(matches!(
            SamlAssertion::parse(&element(&xml)),
            Err(Error::InvalidSecurity(_))
        ));
    }
}
