mod common;

use base64::Engine;
use chrono::{DateTime, Utc};
use solna_c14n::C14nMode;
use solna_core::{algorithm, ns, Error, ErrorKind};
use solna_crypto::KeyMaterial;
use solna_keys::{Key, KeysManager, X509Certificate};
use solna_wss::{
    InboundPipeline, OutboundPipeline, OutboundProperties, SecurityEvent, SecurityProperties, SubjectConfirmation,
};
use solna_xml::{QName, XmlEvent};

use common::*;

fn at(instant: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(instant).unwrap().with_timezone(&Utc)
}

fn saml2(id: &str, method: &str, key_info: &str) -> String {
    format!(
        r#"<saml2:Assertion xmlns:saml2="{saml}" ID="{id}" Version="2.0" IssueInstant="2024-05-01T10:00:00Z"><saml2:Issuer>https://idp.example</saml2:Issuer><saml2:Subject><saml2:NameID>alice</saml2:NameID><saml2:SubjectConfirmation Method="{method}"><saml2:SubjectConfirmationData>{key_info}</saml2:SubjectConfirmationData></saml2:SubjectConfirmation></saml2:Subject><saml2:Conditions NotBefore="2024-05-01T10:00:00Z" NotOnOrAfter="2024-05-01T11:00:00Z"/></saml2:Assertion>"#,
        saml = ns::SAML2
    )
}

fn certificate_key_info(cert: &X509Certificate) -> String {
    format!(
        r#"<ds:KeyInfo xmlns:ds="{}"><ds:X509Data><ds:X509Certificate>{}</ds:X509Certificate></ds:X509Data></ds:KeyInfo>"#,
        ns::DSIG,
        cert.to_base64()
    )
}

fn message(assertion: &str) -> String {
    envelope(&security_header(assertion), PAYLOAD)
}

fn properties(keys: KeysManager) -> SecurityProperties {
    inbound(keys).with_verification_time(at("2024-05-01T10:30:00Z"))
}

fn encode(data: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn canonical(xml: &str) -> Vec<u8> {
    let events: Vec<XmlEvent> = solna_xml::read_events(xml)
        .unwrap()
        .into_iter()
        .filter(|e| !matches!(e, XmlEvent::StartDocument | XmlEvent::EndDocument))
        .collect();
    solna_c14n::canonicalize(&events, C14nMode::Exclusive, &[], &[]).unwrap()
}

/// Add the issuer's enveloped signature after `saml2:Issuer`.
fn sign_assertion(assertion: &str, id: &str, issuer: &(X509Certificate, KeyMaterial)) -> String {
    let digest = solna_crypto::digest::digest(algorithm::SHA256, &canonical(assertion)).unwrap();
    let signed_info = format!(
        r##"<ds:SignedInfo xmlns:ds="{dsig}"><ds:CanonicalizationMethod Algorithm="{c14n}"/><ds:SignatureMethod Algorithm="{method}"/><ds:Reference URI="#{id}"><ds:Transforms><ds:Transform Algorithm="{enveloped}"/><ds:Transform Algorithm="{c14n}"/></ds:Transforms><ds:DigestMethod Algorithm="{sha256}"/><ds:DigestValue>{digest}</ds:DigestValue></ds:Reference></ds:SignedInfo>"##,
        dsig = ns::DSIG,
        c14n = algorithm::EXC_C14N,
        method = algorithm::ECDSA_SHA256,
        enveloped = algorithm::ENVELOPED_SIGNATURE,
        sha256 = algorithm::SHA256,
        digest = encode(&digest),
    );
    let value = solna_crypto::sign::from_uri(algorithm::ECDSA_SHA256)
        .unwrap()
        .sign(&issuer.1, &canonical(&signed_info))
        .unwrap();
    let signature = format!(
        r#"<ds:Signature xmlns:ds="{}">{signed_info}<ds:SignatureValue>{}</ds:SignatureValue>{}</ds:Signature>"#,
        ns::DSIG,
        encode(&value),
        certificate_key_info(&issuer.0)
    );
    assertion.replacen("</saml2:Issuer>", &format!("</saml2:Issuer>{signature}"), 1)
}

/// Insert `child` as the first child of the security header.
fn with_security_child(xml: &str, child: &str) -> String {
    let open = xml.find("<wsse:Security").unwrap();
    let end = open + xml[open..].find('>').unwrap() + 1;
    format!("{}{child}{}", &xml[..end], &xml[end..])
}

/// The body signed with `key`, its certificate sent as a BinarySecurityToken.
fn body_signed_by(key: Key) -> String {
    let outbound = OutboundProperties::new().with_signature(key, algorithm::ECDSA_SHA256);
    OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml()
}

fn signed_hok_message(issuer: &(X509Certificate, KeyMaterial), subject: &Key, signer: Key) -> String {
    let subject_cert = subject.certificate().unwrap();
    let assertion = sign_assertion(
        &saml2("_hok", algorithm::SAML2_HOLDER_OF_KEY, &certificate_key_info(subject_cert)),
        "_hok",
        issuer,
    );
    with_security_child(&body_signed_by(signer), &assertion)
}

#[test]
fn test_bearer_assertion_registers_token() {
    let xml = message(&saml2("_bearer", algorithm::SAML2_BEARER, ""));
    let message = InboundPipeline::new(properties(KeysManager::new()))
        .process_str(&xml)
        .unwrap();
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SamlToken { id, issuer, confirmation: SubjectConfirmation::Bearer }
            if id == "_bearer" && issuer == "https://idp.example"
    )));
    assert!(message.tokens.iter().any(|token| token.id == "_bearer"));
}

#[test]
fn test_conditions_are_enforced() {
    let xml = message(&saml2("_late", algorithm::SAML2_BEARER, ""));
    let late = inbound(KeysManager::new()).with_verification_time(at("2024-05-01T11:00:00Z"));
    let err = InboundPipeline::new(late).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::Expired(_)), "{err}");

    let early = inbound(KeysManager::new()).with_verification_time(at("2024-05-01T09:59:59Z"));
    let err = InboundPipeline::new(early).process_str(&xml).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Temporal);
}

#[test]
fn test_unsigned_holder_of_key_needs_known_secret() {
    let (cert, _) = certificate("subject");
    let xml = message(&saml2("_hok", algorithm::SAML2_HOLDER_OF_KEY, &certificate_key_info(&cert)));
    let props = properties(KeysManager::new()).with_transport_certificate(cert);
    let err = InboundPipeline::new(props).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)), "{err}");
}

#[test]
fn test_holder_of_key_proven_by_transport() {
    let (cert, _) = certificate("subject");
    let xml = message(&saml2("_hok", algorithm::SAML2_HOLDER_OF_KEY, &certificate_key_info(&cert)));
    let keys = KeysManager::new().with_key(Key::secret("_hok", vec![1; 32]));
    let props = properties(keys).with_transport_certificate(cert);
    let message = InboundPipeline::new(props).process_str(&xml).unwrap();
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SamlToken { confirmation: SubjectConfirmation::HolderOfKey, .. }
    )));
}

#[test]
fn test_holder_of_key_other_transport_certificate() {
    let (subject, _) = certificate("subject");
    let (other, _) = certificate("intruder");
    let xml = message(&saml2("_hok", algorithm::SAML2_HOLDER_OF_KEY, &certificate_key_info(&subject)));
    let keys = KeysManager::new().with_key(Key::secret("_hok", vec![1; 32]));
    let props = properties(keys).with_transport_certificate(other);
    let err = InboundPipeline::new(props).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)), "{err}");
}

#[test]
fn test_sender_vouches_needs_proof() {
    let xml = message(&saml2("_sv", algorithm::SAML2_SENDER_VOUCHES, ""));
    let err = InboundPipeline::new(properties(KeysManager::new()))
        .process_str(&xml)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let (cert, _) = certificate("gateway");
    let props = properties(KeysManager::new()).with_transport_certificate(cert);
    assert!(InboundPipeline::new(props).process_str(&xml).is_ok());
}

#[test]
fn test_saml11_assertion() {
    let assertion = format!(
        r#"<saml:Assertion xmlns:saml="{saml}" MajorVersion="1" MinorVersion="1" AssertionID="_v11" Issuer="urn:issuer" IssueInstant="2024-05-01T10:00:00Z"><saml:Conditions NotBefore="2024-05-01T10:00:00Z" NotOnOrAfter="2024-05-01T11:00:00Z"/><saml:AuthenticationStatement AuthenticationMethod="urn:oasis:names:tc:SAML:1.0:am:password" AuthenticationInstant="2024-05-01T10:00:00Z"><saml:Subject><saml:NameIdentifier>alice</saml:NameIdentifier><saml:SubjectConfirmation><saml:ConfirmationMethod>{bearer}</saml:ConfirmationMethod></saml:SubjectConfirmation></saml:Subject></saml:AuthenticationStatement></saml:Assertion>"#,
        saml = ns::SAML1,
        bearer = algorithm::SAML1_BEARER
    );
    let message = InboundPipeline::new(properties(KeysManager::new()))
        .process_str(&message(&assertion))
        .unwrap();
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SamlToken { id, issuer, .. } if id == "_v11" && issuer == "urn:issuer"
    )));
}

#[test]
fn test_replayed_assertion_rejected() {
    use std::sync::Arc;
    use solna_wss::MemoryReplayCache;

    let cache = Arc::new(MemoryReplayCache::new());
    let xml = message(&saml2("_once", algorithm::SAML2_BEARER, ""));
    let pipeline = InboundPipeline::new(properties(KeysManager::new()).with_replay_cache(cache.clone()));
    pipeline.process_str(&xml).unwrap();
    let err = pipeline.process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::Replay(_)), "{err}");
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_signed_holder_of_key_with_subject_signature() {
    let issuer = certificate("idp");
    let subject = certificate_key("subject");
    let xml = signed_hok_message(&issuer, &subject, subject.clone());

    let keys = KeysManager::new().with_trusted_certificate(issuer.0.clone());
    let message = InboundPipeline::new(properties(keys)).process_str(&xml).unwrap();
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SamlToken { id, confirmation: SubjectConfirmation::HolderOfKey, .. } if id == "_hok"
    )));
    assert_eq!(signed_locals(&message), vec!["Body".to_owned()]);
}

#[test]
fn test_signed_holder_of_key_with_other_signing_key() {
    let issuer = certificate("idp");
    let subject = certificate_key("subject");
    let intruder = certificate_key("intruder");
    let intruder_cert = intruder.certificate().unwrap().clone();
    let xml = signed_hok_message(&issuer, &subject, intruder);

    // the intruder's certificate is trusted; it is not the subject's
    let keys = KeysManager::new()
        .with_trusted_certificate(issuer.0.clone())
        .with_trusted_certificate(intruder_cert);
    let err = InboundPipeline::new(properties(keys)).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)), "{err}");
}

#[test]
fn test_assertion_from_untrusted_issuer_rejected() {
    let issuer = certificate("idp");
    let subject = certificate_key("subject");
    let xml = signed_hok_message(&issuer, &subject, subject.clone());

    let err = InboundPipeline::new(properties(KeysManager::new()))
        .process_str(&xml)
        .unwrap_err();
    assert!(matches!(err, Error::Certificate(_)), "{err}");
}

#[test]
fn test_tampered_assertion_signature() {
    let issuer = certificate("idp");
    let subject = certificate_key("subject");
    let xml = signed_hok_message(&issuer, &subject, subject.clone())
        .replace("<saml2:NameID>alice</saml2:NameID>", "<saml2:NameID>mallory</saml2:NameID>");
    assert!(xml.contains("mallory"));

    let keys = KeysManager::new().with_trusted_certificate(issuer.0.clone());
    let err = InboundPipeline::new(properties(keys)).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch(_)), "{err}");
}

/// The gateway signs the unsigned assertion it vouches for together with
/// the body, then the assertion is moved into the security header.
fn sender_vouches_message(gateway: Key, parts: &[QName]) -> String {
    let assertion = saml2("_sv", algorithm::SAML2_SENDER_VOUCHES, "");
    let mut outbound = OutboundProperties::new().with_signature(gateway, algorithm::ECDSA_SHA256);
    for part in parts {
        outbound = outbound.with_signature_part(part.clone());
    }
    let xml = OutboundPipeline::new(outbound)
        .process_str(&envelope(&assertion, PAYLOAD))
        .unwrap()
        .to_xml();
    let start = xml.find("<saml2:Assertion").unwrap();
    let end = xml.find("</saml2:Assertion>").unwrap() + "</saml2:Assertion>".len();
    let moved = &xml[start..end];
    let rest = format!("{}{}", &xml[..start], &xml[end..]);
    with_security_child(&rest, moved)
}

#[test]
fn test_sender_vouches_co_signed_with_body() {
    let gateway = certificate_key("gateway");
    let trusted = gateway.certificate().unwrap().clone();
    let parts = [QName::new(ns::SAML2, ns::node::ASSERTION), QName::new(ns::SOAP11, ns::node::BODY)];
    let xml = sender_vouches_message(gateway, &parts);

    let keys = KeysManager::new().with_trusted_certificate(trusted);
    let message = InboundPipeline::new(properties(keys)).process_str(&xml).unwrap();
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SamlToken { confirmation: SubjectConfirmation::SenderVouches, .. }
    )));
    let mut signed = signed_locals(&message);
    signed.sort();
    assert_eq!(signed, vec!["Assertion".to_owned(), "Body".to_owned()]);
}

#[test]
fn test_sender_vouches_body_only_signature() {
    let gateway = certificate_key("gateway");
    let trusted = gateway.certificate().unwrap().clone();
    let xml = sender_vouches_message(gateway, &[QName::new(ns::SOAP11, ns::node::BODY)]);

    let keys = KeysManager::new().with_trusted_certificate(trusted);
    let err = InboundPipeline::new(properties(keys)).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed(_)), "{err}");
}

#[test]
fn test_unsigned_assertion_does_not_vouch_for_key() {
    let subject = certificate_key("subject");
    let subject_cert = subject.certificate().unwrap().clone();
    let assertion = saml2("_sv", algorithm::SAML2_BEARER, &certificate_key_info(&subject_cert));
    let xml = with_security_child(&body_signed_by(subject), &assertion);

    let err = InboundPipeline::new(properties(KeysManager::new()))
        .process_str(&xml)
        .unwrap_err();
    assert!(matches!(err, Error::Certificate(_)), "{err}");
}
