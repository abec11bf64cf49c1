#![forbid(unsafe_code)]

//! Trust anchors and certificate path validation.
//!
//! A certificate presented by a message is accepted only when it chains to
//! a configured trusted certificate and every certificate on the path is
//! within its validity window.

use std::time::SystemTime;

use solna_core::Error;
use solna_crypto::KeyMaterial;
use tracing::debug;

use crate::x509::X509Certificate;

const MAX_DEPTH: usize = 10;

/// Trusted roots plus intermediates available for path building.
#[derive(Debug, Default, Clone)]
pub struct TrustAnchors {
    trusted: Vec<X509Certificate>,
    intermediates: Vec<X509Certificate>,
}

impl TrustAnchors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trusted(&mut self, cert: X509Certificate) {
        self.trusted.push(cert);
    }

    /// Intermediates are never trusted on their own; they only fill gaps
    /// between a leaf and a trusted certificate.
    pub fn add_intermediate(&mut self, cert: X509Certificate) {
        self.intermediates.push(cert);
    }

    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty()
    }

    /// Is `key` the public key of a trusted certificate?
    pub fn trusts_key(&self, key: &KeyMaterial) -> bool {
        self.trusted
            .iter()
            .filter_map(|cert| cert.public_key().ok())
            .any(|public| public.matches(key))
    }

    /// Validate `chain` (leaf first, further certificates as sent) at `at`.
    pub fn validate(&self, chain: &[X509Certificate], at: SystemTime) -> Result<(), Error> {
        let leaf = chain
            .first()
            .ok_or_else(|| Error::Certificate("no certificate to validate".into()))?;
        leaf.check_validity(at)?;

        if self.trusted.contains(leaf) {
            debug!(subject = %leaf.subject(), "certificate is directly trusted");
            return Ok(());
        }
        if leaf.is_self_issued() {
            return Err(Error::Certificate(format!(
                "self-signed certificate {} is not trusted",
                leaf.subject()
            )));
        }

        let mut current = leaf;
        for _ in 0..MAX_DEPTH {
            if let Some(anchor) = self
                .trusted
                .iter()
                .find(|anchor| anchor.issued(current) && current.verify_issued_by(anchor).is_ok())
            {
                anchor.check_validity(at)?;
                debug!(subject = %leaf.subject(), anchor = %anchor.subject(), "certificate chain validated");
                return Ok(());
            }

            let issuer = chain[1..]
                .iter()
                .chain(self.intermediates.iter())
                .find(|candidate| {
                    *candidate != current
                        && candidate.issued(current)
                        && current.verify_issued_by(candidate).is_ok()
                })
                .ok_or_else(|| {
                    Error::Certificate(format!(
                        "no trusted issuer found for certificate {}",
                        current.subject()
                    ))
                })?;
            issuer.check_validity(at)?;
            current = issuer;
        }
        Err(Error::Certificate(format!(
            "certificate chain of {} exceeds maximum depth {MAX_DEPTH}",
            leaf.subject()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    struct Issued {
        cert: X509Certificate,
        generated: rcgen::Certificate,
        key: rcgen::KeyPair,
    }

    fn ca(name: &str) -> Issued {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, name);
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        Issued {
            cert: X509Certificate::from_der(cert.der()).unwrap(),
            generated: cert,
            key,
        }
    }

    fn issue(name: &str, issuer: &Issued, is_ca: bool) -> Issued {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![format!("{name}.example")]).unwrap();
        params.distinguished_name.push(rcgen::DnType::CommonName, name);
        if is_ca {
            params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        }
        let cert = params.signed_by(&key, &issuer.generated, &issuer.key).unwrap();
        Issued {
            cert: X509Certificate::from_der(cert.der()).unwrap(),
            generated: cert,
            key,
        }
    }

    #[test]
    fn test_directly_trusted() {
        let root = ca("Root");
        let mut anchors = TrustAnchors::new();
        assert!(anchors.is_empty());
        anchors.add_trusted(root.cert.clone());
        anchors.validate(&[root.cert.clone()], SystemTime::now()).unwrap();
        assert!(anchors.trusts_key(&root.cert.public_key().unwrap()));
    }

    #[test]
    fn test_untrusted_self_signed_rejected() {
        let mut anchors = TrustAnchors::new();
        anchors.add_trusted(ca("Root").cert);
        let stranger = ca("Stranger");
        let err = anchors.validate(&[stranger.cert], SystemTime::now()).unwrap_err();
        assert!(matches!(err, Error::Certificate(_)), "{err}");
    }

    #[test]
    fn test_leaf_issued_by_trusted_root() {
        let root = ca("Root");
        let leaf = issue("client", &root, false);
        let mut anchors = TrustAnchors::new();
        anchors.add_trusted(root.cert.clone());
        anchors.validate(&[leaf.cert.clone()], SystemTime::now()).unwrap();

        let other = TrustAnchors::new();
        assert!(other.validate(&[leaf.cert], SystemTime::now()).is_err());
    }

    #[test]
    fn test_intermediate_from_message_or_store() {
        let root = ca("Root");
        let intermediate = issue("Intermediate", &root, true);
        let leaf = issue("client", &intermediate, false);

        let mut anchors = TrustAnchors::new();
        anchors.add_trusted(root.cert.clone());
        // the intermediate travels with the leaf
        anchors
            .validate(&[leaf.cert.clone(), intermediate.cert.clone()], SystemTime::now())
            .unwrap();
        // the leaf alone does not reach the root
        assert!(anchors.validate(&[leaf.cert.clone()], SystemTime::now()).is_err());

        anchors.add_intermediate(intermediate.cert.clone());
        anchors.validate(&[leaf.cert], SystemTime::now()).unwrap();
    }

    #[test]
    fn test_leaf_outside_validity_rejected() {
        let root = ca("Root");
        let mut anchors = TrustAnchors::new();
        anchors.add_trusted(root.cert.clone());
        let ancient = UNIX_EPOCH + Duration::from_secs(3600);
        let err = anchors.validate(&[root.cert], ancient).unwrap_err();
        assert!(err.to_string().contains("not yet valid"), "{err}");
    }
}
