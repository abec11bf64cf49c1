#![forbid(unsafe_code)]

//! X.509 certificate handling for security tokens.
//!
//! Certificates arrive base64-encoded in `wsse:BinarySecurityToken`,
//! `ds:X509Certificate` and SAML subject confirmations.  Tokens refer to
//! them by issuer + serial number or by subject key identifier, so both are
//! exposed here in the forms WS-Security uses on the wire.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use der::asn1::{ObjectIdentifier, OctetString};
use der::{Decode, Encode};
use solna_core::{algorithm, Error};
use solna_crypto::KeyMaterial;
use x509_cert::Certificate;

const SUBJECT_KEY_IDENTIFIER: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.5.29.14");

// Certificate signature algorithms.
const SHA1_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.5");
const SHA256_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.11");
const SHA384_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.12");
const SHA512_WITH_RSA: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.13");
const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");
const ECDSA_WITH_SHA384: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.3");

/// A parsed certificate together with its DER encoding.
#[derive(Clone)]
pub struct X509Certificate {
    der: Vec<u8>,
    cert: Certificate,
}

impl X509Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let cert = Certificate::from_der(der)
            .map_err(|e| Error::Certificate(format!("failed to parse X.509 certificate: {e}")))?;
        Ok(Self {
            der: der.to_vec(),
            cert,
        })
    }

    /// Decode base64 text (whitespace tolerated) and parse.
    pub fn from_base64(text: &str) -> Result<Self, Error> {
        let der = decode_base64(text)?;
        Self::from_der(&der)
    }

    /// Parse PEM or DER bytes.
    pub fn from_pem_or_der(data: &[u8]) -> Result<Self, Error> {
        if data.starts_with(b"-----BEGIN") {
            use der::DecodePem;
            let cert = Certificate::from_pem(data)
                .map_err(|e| Error::Certificate(format!("failed to parse PEM certificate: {e}")))?;
            let der = cert
                .to_der()
                .map_err(|e| Error::Certificate(format!("failed to encode certificate: {e}")))?;
            return Ok(Self { der, cert });
        }
        Self::from_der(data)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.der)
    }

    /// The subject public key as verification key material.
    pub fn public_key(&self) -> Result<KeyMaterial, Error> {
        use spki::DecodePublicKey;

        let spki_der = self
            .cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(|e| Error::Certificate(format!("failed to encode SPKI: {e}")))?;

        if let Ok(pk) = rsa::RsaPublicKey::from_public_key_der(&spki_der) {
            return Ok(KeyMaterial::RsaPublic(pk));
        }
        if let Ok(vk) = p256::ecdsa::VerifyingKey::from_public_key_der(&spki_der) {
            return Ok(KeyMaterial::EcP256Public(vk));
        }
        if let Ok(vk) = p384::ecdsa::VerifyingKey::from_public_key_der(&spki_der) {
            return Ok(KeyMaterial::EcP384Public(vk));
        }
        Err(Error::Certificate(format!(
            "unsupported public key algorithm {} in certificate {}",
            self.cert.tbs_certificate.subject_public_key_info.algorithm.oid,
            self.subject()
        )))
    }

    /// Subject DN (RFC 4514 form).
    pub fn subject(&self) -> String {
        self.cert.tbs_certificate.subject.to_string()
    }

    /// Issuer DN (RFC 4514 form).
    pub fn issuer(&self) -> String {
        self.cert.tbs_certificate.issuer.to_string()
    }

    /// Serial number as an unsigned decimal string, as used by
    /// `ds:X509SerialNumber`.
    pub fn serial_decimal(&self) -> String {
        format_serial_decimal(self.cert.tbs_certificate.serial_number.as_bytes())
    }

    /// Does this certificate have the given issuer DN and decimal serial?
    pub fn matches_issuer_serial(&self, issuer: &str, serial: &str) -> bool {
        self.serial_decimal() == serial.trim()
            && normalize_dn(&self.issuer()) == normalize_dn(issuer)
    }

    /// The subject key identifier: the certificate extension when present,
    /// otherwise the SHA-1 of the subject public key bits.
    pub fn subject_key_identifier(&self) -> Result<Vec<u8>, Error> {
        let extensions = self.cert.tbs_certificate.extensions.as_deref().unwrap_or(&[]);
        if let Some(ext) = extensions.iter().find(|e| e.extn_id == SUBJECT_KEY_IDENTIFIER) {
            let ski = OctetString::from_der(ext.extn_value.as_bytes())
                .map_err(|e| Error::Certificate(format!("malformed subject key identifier: {e}")))?;
            return Ok(ski.as_bytes().to_vec());
        }
        let bits = self
            .cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        solna_crypto::digest::digest(algorithm::SHA1, bits)
    }

    /// Is the certificate within its validity window at `at`?
    pub fn check_validity(&self, at: SystemTime) -> Result<(), Error> {
        let since_epoch = at
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::Certificate(format!("verification time before epoch: {e}")))?;
        let now = der::DateTime::from_unix_duration(since_epoch)
            .map_err(|e| Error::Certificate(format!("verification time out of range: {e}")))?;
        let validity = &self.cert.tbs_certificate.validity;
        let not_before = validity.not_before.to_date_time();
        let not_after = validity.not_after.to_date_time();

        if now < not_before {
            return Err(Error::Certificate(format!(
                "certificate {} is not yet valid (notBefore: {not_before})",
                self.subject()
            )));
        }
        if now > not_after {
            return Err(Error::Certificate(format!(
                "certificate {} has expired (notAfter: {not_after})",
                self.subject()
            )));
        }
        Ok(())
    }

    /// Is `other` named as issued by this certificate's subject?
    pub fn issued(&self, other: &X509Certificate) -> bool {
        self.cert.tbs_certificate.subject == other.cert.tbs_certificate.issuer
    }

    pub fn is_self_issued(&self) -> bool {
        self.issued(self)
    }

    /// Verify this certificate's signature with the public key of `issuer`.
    pub fn verify_issued_by(&self, issuer: &X509Certificate) -> Result<(), Error> {
        let tbs = self
            .cert
            .tbs_certificate
            .to_der()
            .map_err(|e| Error::Certificate(format!("failed to encode TBS certificate: {e}")))?;
        let signature = self
            .cert
            .signature
            .as_bytes()
            .ok_or_else(|| Error::Certificate("certificate signature has unused bits".into()))?;
        let key = issuer.public_key()?;

        let oid = self.cert.signature_algorithm.oid;
        let (uri, signature) = if oid == SHA1_WITH_RSA {
            (algorithm::RSA_SHA1, signature.to_vec())
        } else if oid == SHA256_WITH_RSA {
            (algorithm::RSA_SHA256, signature.to_vec())
        } else if oid == SHA384_WITH_RSA {
            (algorithm::RSA_SHA384, signature.to_vec())
        } else if oid == SHA512_WITH_RSA {
            (algorithm::RSA_SHA512, signature.to_vec())
        } else if oid == ECDSA_WITH_SHA256 || oid == ECDSA_WITH_SHA384 {
            // X.509 carries ECDSA-Sig-Value in DER; the providers take r||s
            match &key {
                KeyMaterial::EcP256Public(_) | KeyMaterial::EcP256Private(_) => {
                    let sig = p256::ecdsa::Signature::from_der(signature)
                        .map_err(|e| Error::Certificate(format!("malformed ECDSA signature: {e}")))?;
                    (algorithm::ECDSA_SHA256, sig.to_bytes().to_vec())
                }
                KeyMaterial::EcP384Public(_) | KeyMaterial::EcP384Private(_) => {
                    let sig = p384::ecdsa::Signature::from_der(signature)
                        .map_err(|e| Error::Certificate(format!("malformed ECDSA signature: {e}")))?;
                    (algorithm::ECDSA_SHA384, sig.to_bytes().to_vec())
                }
                _ => {
                    return Err(Error::Certificate(format!(
                        "issuer {} has no EC key for an ECDSA signature",
                        issuer.subject()
                    )))
                }
            }
        } else {
            return Err(Error::Certificate(format!(
                "unsupported certificate signature algorithm {oid}"
            )));
        };

        solna_crypto::sign::from_uri(uri)?
            .verify(&key, &tbs, &signature)
            .map_err(|e| {
                Error::Certificate(format!(
                    "signature of {} does not verify with issuer {}: {e}",
                    self.subject(),
                    issuer.subject()
                ))
            })
    }
}

impl PartialEq for X509Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for X509Certificate {}

impl fmt::Debug for X509Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Certificate")
            .field("subject", &self.subject())
            .field("serial", &self.serial_decimal())
            .finish()
    }
}

/// Decode base64 that may contain line breaks.
pub fn decode_base64(text: &str) -> Result<Vec<u8>, Error> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(e.to_string()))
}

/// DNs are compared case-insensitively with whitespace around separators
/// removed.
fn normalize_dn(dn: &str) -> String {
    dn.split(',')
        .map(|rdn| {
            rdn.split('=')
                .map(|part| part.trim().to_ascii_lowercase())
                .collect::<Vec<_>>()
                .join("=")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Convert big-endian bytes of an ASN.1 INTEGER to an unsigned decimal string.
fn format_serial_decimal(bytes: &[u8]) -> String {
    // little-endian decimal digits
    let mut digits = vec![0u8];
    for &byte in bytes {
        let mut carry = byte as u32;
        for digit in digits.iter_mut() {
            let val = (*digit as u32) * 256 + carry;
            *digit = (val % 10) as u8;
            carry = val / 10;
        }
        while carry > 0 {
            digits.push((carry % 10) as u8);
            carry /= 10;
        }
    }
    while digits.len() > 1 && digits.last() == Some(&0) {
        digits.pop();
    }
    digits.iter().rev().map(|d| char::from(b'0' + d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn generated() -> X509Certificate {
        let mut params = rcgen::CertificateParams::new(vec!["client.example".to_owned()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "client.example");
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        X509Certificate::from_der(cert.der()).unwrap()
    }

    #[test]
    fn test_serial_decimal() {
        assert_eq!(format_serial_decimal(&[]), "0");
        assert_eq!(format_serial_decimal(&[0x01, 0x00]), "256");
        assert_eq!(format_serial_decimal(&[0x00, 0xff]), "255");
        assert_eq!(
            format_serial_decimal(&[0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]),
            "18446744073709551616"
        );
    }

    #[test]
    fn test_normalize_dn() {
        assert_eq!(normalize_dn("CN = Alice, O=Org"), normalize_dn("cn=alice,o=org"));
    }

    #[test]
    fn test_generated_certificate() {
        let cert = generated();
        assert!(matches!(cert.public_key().unwrap(), KeyMaterial::EcP256Public(_)));
        assert!(cert.subject().contains("client.example"));
        assert!(cert.matches_issuer_serial(&cert.issuer(), &cert.serial_decimal()));
        assert!(!cert.matches_issuer_serial(&cert.issuer(), "1"));
        assert!(!cert.subject_key_identifier().unwrap().is_empty());

        let again = X509Certificate::from_base64(&cert.to_base64()).unwrap();
        assert_eq!(again, cert);
    }

    #[test]
    fn test_validity_window() {
        let cert = generated();
        cert.check_validity(SystemTime::now()).unwrap();
        let ancient = UNIX_EPOCH + Duration::from_secs(3600);
        assert!(matches!(cert.check_validity(ancient), Err(Error::Certificate(_))));
    }

    #[test]
    fn test_verify_issued_by() {
        let ca_key = rcgen::KeyPair::generate().unwrap();
        let mut ca_params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        ca_params.distinguished_name.push(rcgen::DnType::CommonName, "Test CA");
        ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let ca = ca_params.self_signed(&ca_key).unwrap();

        let leaf_key = rcgen::KeyPair::generate().unwrap();
        let mut leaf_params = rcgen::CertificateParams::new(vec!["leaf.example".to_owned()]).unwrap();
        leaf_params.distinguished_name.push(rcgen::DnType::CommonName, "leaf.example");
        let leaf = leaf_params.signed_by(&leaf_key, &ca, &ca_key).unwrap();

        let ca = X509Certificate::from_der(ca.der()).unwrap();
        let leaf = X509Certificate::from_der(leaf.der()).unwrap();
        assert!(ca.issued(&leaf));
        assert!(ca.is_self_issued());
        assert!(!leaf.is_self_issued());
        leaf.verify_issued_by(&ca).unwrap();
        ca.verify_issued_by(&ca).unwrap();

        let stranger = generated();
        assert!(matches!(leaf.verify_issued_by(&stranger), Err(Error::Certificate(_))));
    }

    #[test]
    fn test_bad_base64() {
        assert!(matches!(X509Certificate::from_base64("@@@"), Err(Error::Base64(_))));
    }
}
