#![allow(dead_code)]

use std::sync::Arc;

use solna_core::ns;
use solna_crypto::KeyMaterial;
use solna_keys::loader::load_private_key_pem;
use solna_keys::{Key, KeysManager, X509Certificate};
use solna_wss::{ProcessedMessage, SecurityEvent, SecurityProperties};
use solna_xml::XmlEvent;

pub const PAYLOAD: &str = r#"<m:Ping xmlns:m="urn:example:ping"><m:Text>hello</m:Text></m:Ping>"#;

pub fn envelope(header: &str, body: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="{soap}"><soap:Header>{header}</soap:Header><soap:Body>{body}</soap:Body></soap:Envelope>"#,
        soap = ns::SOAP11
    )
}

pub fn plain_envelope() -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="{}"><soap:Body>{PAYLOAD}</soap:Body></soap:Envelope>"#,
        ns::SOAP11
    )
}

pub fn security_header(children: &str) -> String {
    format!(
        r#"<wsse:Security xmlns:wsse="{}" xmlns:wsu="{}">{children}</wsse:Security>"#,
        ns::WSSE,
        ns::WSU
    )
}

pub fn inbound(keys: KeysManager) -> SecurityProperties {
    SecurityProperties::new(Arc::new(keys))
}

/// A self-signed P-256 certificate with its signing key.
pub fn certificate(name: &str) -> (X509Certificate, KeyMaterial) {
    let params = rcgen::CertificateParams::new(vec![format!("{name}.example")]).unwrap();
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let cert = X509Certificate::from_der(cert.der()).unwrap();
    let private = load_private_key_pem(&key_pair.serialize_pem()).unwrap();
    (cert, private)
}

pub fn certificate_key(name: &str) -> Key {
    let (cert, private) = certificate(name);
    Key::new(name, private).with_certificate(cert)
}

/// A self-signed certificate key valid only during the year 2000.
pub fn expired_certificate_key(name: &str) -> Key {
    let mut params = rcgen::CertificateParams::new(vec![format!("{name}.example")]).unwrap();
    params.not_before = rcgen::date_time_ymd(2000, 1, 1);
    params.not_after = rcgen::date_time_ymd(2001, 1, 1);
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let cert = X509Certificate::from_der(params.self_signed(&key_pair).unwrap().der()).unwrap();
    let private = load_private_key_pem(&key_pair.serialize_pem()).unwrap();
    Key::new(name, private).with_certificate(cert)
}

/// A certificate authority issuing P-256 client certificates.
pub struct Authority {
    pub cert: X509Certificate,
    generated: rcgen::Certificate,
    key_pair: rcgen::KeyPair,
}

impl Authority {
    pub fn new(name: &str) -> Self {
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, name);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let generated = params.self_signed(&key_pair).unwrap();
        Self {
            cert: X509Certificate::from_der(generated.der()).unwrap(),
            generated,
            key_pair,
        }
    }

    pub fn issue(&self, name: &str) -> Key {
        let mut params = rcgen::CertificateParams::new(vec![format!("{name}.example")]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, name);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.signed_by(&key_pair, &self.generated, &self.key_pair).unwrap();
        let cert = X509Certificate::from_der(cert.der()).unwrap();
        let private = load_private_key_pem(&key_pair.serialize_pem()).unwrap();
        Key::new(name, private).with_certificate(cert)
    }
}

/// The `wsu:Id` the outbound signature gave the body.
pub fn body_id(message: &ProcessedMessage) -> String {
    message
        .events
        .iter()
        .filter_map(XmlEvent::as_start)
        .find(|start| start.name.local == ns::node::BODY)
        .and_then(|body| body.attribute_ns(ns::WSU, ns::attr::ID))
        .unwrap()
        .to_owned()
}

pub fn signed_locals(message: &ProcessedMessage) -> Vec<String> {
    message
        .security_events
        .iter()
        .filter_map(|event| match event {
            SecurityEvent::SignedElement { path, .. } => path.last().map(|name| name.local.clone()),
            _ => None,
        })
        .collect()
}
