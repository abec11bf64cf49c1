mod common;

use chrono::{Duration, Utc};
use solna_core::{algorithm, ns, Error, ErrorKind};
use solna_keys::{Key, KeysManager};
use solna_wss::{
    AlgorithmUsage, InboundPipeline, KeyReference, OutboundPipeline, OutboundProperties, SecurityEvent,
};

use common::*;

fn shared() -> Key {
    Key::secret("shared", vec![0x42; 32])
}

fn signed_message() -> String {
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(shared(), algorithm::HMAC_SHA256);
    OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml()
}

fn verify(xml: &str) -> Result<solna_wss::ProcessedMessage, Error> {
    InboundPipeline::new(inbound(KeysManager::new().with_key(shared()))).process_str(xml)
}

#[test]
fn test_hmac_sign_then_verify() {
    let xml = signed_message();
    assert!(xml.contains("<wsse:Security"));
    assert!(xml.contains("<ds:Signature"));

    let message = verify(&xml).unwrap();
    let mut signed = signed_locals(&message);
    signed.sort();
    assert_eq!(signed, vec!["Body".to_owned(), "Timestamp".to_owned()]);
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::SignatureValue { token, algorithm } if token == "shared" && algorithm == algorithm::HMAC_SHA256
    )));
    assert!(message.security_events.iter().any(|event| matches!(
        event,
        SecurityEvent::Algorithm { usage: AlgorithmUsage::Digest, uri } if uri == algorithm::SHA256
    )));
    assert!(message.to_xml().contains("<m:Text>hello</m:Text>"));
}

#[test]
fn test_tampered_body_fails_digest() {
    let xml = signed_message().replace(">hello<", ">hullo<");
    let err = verify(&xml).unwrap_err();
    assert!(matches!(err, Error::DigestMismatch(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Cryptographic);
}

#[test]
fn test_wrong_key_fails_signature() {
    let xml = signed_message();
    let keys = KeysManager::new().with_key(Key::secret("shared", vec![0x17; 32]));
    let err = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cryptographic);
}

#[test]
fn test_moved_id_leaves_reference_unresolved() {
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(shared(), algorithm::HMAC_SHA256);
    let secured = OutboundPipeline::new(outbound).process_str(&plain_envelope()).unwrap();
    let id = body_id(&secured);
    let xml = secured
        .to_xml()
        .replace(&format!(r#"wsu:Id="{id}""#), r#"wsu:Id="elsewhere""#);

    let err = verify(&xml).unwrap_err();
    assert!(matches!(err, Error::UnresolvableReference(_)), "{err}");
}

#[test]
fn test_duplicate_signed_id_rejected() {
    let smuggled = format!(r#"<m:Extra xmlns:m="urn:example:ping" xmlns:wsu="{}" wsu:Id="TS-1"/>"#, ns::WSU);
    let xml = signed_message().replace("</m:Ping>", &format!("{smuggled}</m:Ping>"));
    let err = verify(&xml).unwrap_err();
    assert!(matches!(err, Error::InvalidSecurity(_)), "{err}");
}

#[test]
fn test_certificate_signature_with_binary_security_token() {
    let key = certificate_key("client");
    let cert = key.certificate().unwrap().clone();
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(key, algorithm::ECDSA_SHA256);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    assert!(xml.contains("<wsse:BinarySecurityToken"));

    // the certificate travels in the message; only its trust is configured
    let keys = KeysManager::new().with_trusted_certificate(cert.clone());
    let message = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap();
    assert!(message.tokens.iter().any(|token| token.has_certificate(&cert)));
    assert_eq!(signed_locals(&message).len(), 2);
}

fn signed_with_certificate(key: Key) -> String {
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(key, algorithm::ECDSA_SHA256);
    OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml()
}

#[test]
fn test_untrusted_certificate_rejected() {
    let xml = signed_with_certificate(certificate_key("client"));
    let err = InboundPipeline::new(inbound(KeysManager::new()))
        .process_str(&xml)
        .unwrap_err();
    assert!(matches!(err, Error::Certificate(_)), "{err}");

    // trusting some other certificate does not help
    let (other, _) = certificate("other");
    let keys = KeysManager::new().with_trusted_certificate(other);
    let err = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::Certificate(_)), "{err}");
}

#[test]
fn test_expired_certificate_rejected() {
    let key = expired_certificate_key("client");
    let cert = key.certificate().unwrap().clone();
    let xml = signed_with_certificate(key);
    let keys = KeysManager::new().with_trusted_certificate(cert);
    let err = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::Certificate(_)), "{err}");
    assert!(err.to_string().contains("expired"), "{err}");
}

#[test]
fn test_certificate_issued_by_trusted_authority() {
    let authority = Authority::new("Example CA");
    let xml = signed_with_certificate(authority.issue("client"));

    let keys = KeysManager::new().with_trusted_certificate(authority.cert.clone());
    let message = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap();
    assert_eq!(signed_locals(&message).len(), 2);

    let stranger = Authority::new("Other CA");
    let keys = KeysManager::new().with_trusted_certificate(stranger.cert);
    assert!(InboundPipeline::new(inbound(keys)).process_str(&xml).is_err());
}

#[test]
fn test_issuer_serial_reference_resolved_by_keys() {
    let key = certificate_key("client");
    let cert = key.certificate().unwrap().clone();
    let verifying = Key::new("client", cert.public_key().unwrap()).with_certificate(cert);
    let outbound = OutboundProperties::new()
        .with_signature(key, algorithm::ECDSA_SHA256)
        .with_key_reference(KeyReference::IssuerSerial);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    assert!(xml.contains("X509IssuerSerial"));
    assert!(!xml.contains("BinarySecurityToken"));

    let message = InboundPipeline::new(inbound(KeysManager::new().with_key(verifying)))
        .process_str(&xml)
        .unwrap();
    assert_eq!(signed_locals(&message), vec!["Body".to_owned()]);
}

#[test]
fn test_encrypt_then_decrypt_restores_body() {
    let key = Key::secret("session", vec![7; 32]);
    let outbound = OutboundProperties::new().with_encryption(key.clone(), algorithm::AES256_CBC);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    assert!(xml.contains("xenc:EncryptedData"));
    assert!(xml.contains("xenc:ReferenceList"));
    assert!(!xml.contains("hello"));

    let message = InboundPipeline::new(inbound(KeysManager::new().with_key(key)))
        .process_str(&xml)
        .unwrap();
    let out = message.to_xml();
    assert!(out.contains("<m:Text>hello</m:Text>"), "{out}");
    assert!(!out.contains("EncryptedData>"));
    let part = message
        .security_events
        .iter()
        .find_map(|event| match event {
            SecurityEvent::EncryptedPart { path, content_only, .. } => Some((path.clone(), *content_only)),
            _ => None,
        })
        .unwrap();
    assert_eq!(part.0.last().unwrap().local, ns::node::BODY);
    assert!(part.1);
}

#[test]
fn test_sign_then_encrypt_verifies_plaintext() {
    let mac = shared();
    let enc = Key::secret("session", vec![9; 16]);
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(300))
        .with_signature(mac.clone(), algorithm::HMAC_SHA256)
        .with_encryption(enc.clone(), algorithm::AES128_CBC);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    assert!(!xml.contains("hello"));

    let keys = KeysManager::new().with_key(mac).with_key(enc);
    let message = InboundPipeline::new(inbound(keys)).process_str(&xml).unwrap();
    let mut signed = signed_locals(&message);
    signed.sort();
    assert_eq!(signed, vec!["Body".to_owned(), "Timestamp".to_owned()]);
    assert!(message.to_xml().contains("hello"));
}

fn encrypted_without_key_info(algorithm: &str, key: &Key) -> String {
    let outbound = OutboundProperties::new().with_encryption(key.clone(), algorithm);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    let start = xml.find("<ds:KeyInfo").unwrap();
    let end = xml.find("</ds:KeyInfo>").unwrap() + "</ds:KeyInfo>".len();
    format!("{}{}", &xml[..start], &xml[end..])
}

#[test]
fn test_strict_compliance_requires_key_info() {
    let key = Key::secret("session", vec![3; 32]);
    let xml = encrypted_without_key_info(algorithm::AES256_CBC, &key);
    // the lenient fallback finds the key under the EncryptedData id
    let keys = || KeysManager::new().with_key(Key::secret("ED-1", vec![3; 32]));

    let err = InboundPipeline::new(inbound(keys())).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::MissingElement(_)), "{err}");

    let lenient = inbound(keys()).with_strict_compliance(false);
    let message = InboundPipeline::new(lenient).process_str(&xml).unwrap();
    assert!(message.to_xml().contains("hello"));
}

#[test]
fn test_strict_compliance_rejects_two_token_references() {
    let key = Key::secret("session", vec![4; 32]);
    let outbound = OutboundProperties::new().with_encryption(key.clone(), algorithm::AES256_CBC);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();
    let key_info = xml.find("<ds:KeyInfo").unwrap();
    let first = key_info + xml[key_info..].find("<wsse:SecurityTokenReference").unwrap();
    let unknown = format!(
        r#"<wsse:SecurityTokenReference xmlns:wsse="{}"><wsse:Reference URI="missing-key"/></wsse:SecurityTokenReference>"#,
        ns::WSSE
    );
    let xml = format!("{}{unknown}{}", &xml[..first], &xml[first..]);
    assert_eq!(xml.matches("<wsse:SecurityTokenReference").count(), 2);

    let keys = || KeysManager::new().with_key(key.clone());
    let err = InboundPipeline::new(inbound(keys())).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::InvalidSecurity(_)), "{err}");

    // lenient: the unknown reference fails, the named key is found
    let message = InboundPipeline::new(inbound(keys()).with_strict_compliance(false))
        .process_str(&xml)
        .unwrap();
    assert!(message.to_xml().contains("<m:Text>hello</m:Text>"));
}

#[test]
fn test_strict_compliance_rejects_unlisted_cipher() {
    let key = Key::secret("session", vec![5; 24]);
    let outbound = OutboundProperties::new().with_encryption(key.clone(), algorithm::AES192_CBC);
    let xml = OutboundPipeline::new(outbound)
        .process_str(&plain_envelope())
        .unwrap()
        .to_xml();

    let keys = || KeysManager::new().with_key(key.clone());
    let err = InboundPipeline::new(inbound(keys())).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::UnsupportedAlgorithm(_)), "{err}");

    let message = InboundPipeline::new(inbound(keys()).with_strict_compliance(false))
        .process_str(&xml)
        .unwrap();
    assert!(message.to_xml().contains("hello"));
}

#[test]
fn test_strip_security_header() {
    let xml = signed_message();
    let properties = inbound(KeysManager::new().with_key(shared())).with_strip_security_header(true);
    let message = InboundPipeline::new(properties).process_str(&xml).unwrap();
    let out = message.to_xml();
    assert!(!out.contains("wsse:Security"));
    assert!(out.contains("<soap:Header></soap:Header>") || out.contains("<soap:Header/>"), "{out}");
    assert_eq!(signed_locals(&message).len(), 2);
}

#[test]
fn test_listener_sees_events_in_order() {
    use std::sync::{Arc, Mutex};

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = Box::new(move |event: &SecurityEvent| {
        sink.lock().unwrap().push(event.describe());
    });
    let message = InboundPipeline::new(inbound(KeysManager::new().with_key(shared())))
        .process_with_listener(solna_xml::read_events(&signed_message()).unwrap(), listener)
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), message.security_events.len());
    assert!(seen[0].starts_with("header child"));
}

#[test]
fn test_outbound_requires_body() {
    let xml = format!(r#"<soap:Envelope xmlns:soap="{}"/>"#, ns::SOAP11);
    let outbound = OutboundProperties::new().with_timestamp(Duration::seconds(60));
    assert!(OutboundPipeline::new(outbound).process_str(&xml).is_err());
}

#[test]
fn test_outbound_rejects_existing_security_header() {
    let xml = envelope(&security_header(""), PAYLOAD);
    let outbound = OutboundProperties::new()
        .with_timestamp(Duration::seconds(60))
        .with_timestamp_created(Utc::now());
    let err = OutboundPipeline::new(outbound).process_str(&xml).unwrap_err();
    assert!(matches!(err, Error::InvalidSecurity(_)), "{err}");
}
