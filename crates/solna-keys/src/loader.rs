#![forbid(unsafe_code)]

//! Loading keys and certificates from files.
//!
//! PEM input is tried as PKCS#8 (RSA, P-256, P-384) and then PKCS#1 RSA.
//! Anything that is not PEM is taken as a raw shared secret.

use std::path::Path;

use solna_core::Error;
use solna_crypto::KeyMaterial;

use crate::x509::X509Certificate;

/// Parse a PEM private key.
pub fn load_private_key_pem(pem: &str) -> Result<KeyMaterial, Error> {
    use rsa::pkcs8::DecodePrivateKey;

    if let Ok(key) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(KeyMaterial::RsaPrivate(key));
    }
    if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        return Ok(KeyMaterial::EcP256Private(key));
    }
    if let Ok(key) = p384::ecdsa::SigningKey::from_pkcs8_pem(pem) {
        return Ok(KeyMaterial::EcP384Private(key));
    }

    use rsa::pkcs1::DecodeRsaPrivateKey;
    rsa::RsaPrivateKey::from_pkcs1_pem(pem)
        .map(KeyMaterial::RsaPrivate)
        .map_err(|e| Error::Key(format!("unsupported private key PEM: {e}")))
}

/// Load key material from bytes: PEM private key or raw secret.
pub fn load_key(data: &[u8]) -> Result<KeyMaterial, Error> {
    if data.starts_with(b"-----BEGIN") {
        let pem = std::str::from_utf8(data)
            .map_err(|e| Error::Key(format!("invalid PEM encoding: {e}")))?;
        return load_private_key_pem(pem);
    }
    if data.is_empty() {
        return Err(Error::Key("empty key file".into()));
    }
    Ok(KeyMaterial::Secret(data.to_vec()))
}

pub fn load_key_file(path: &Path) -> Result<KeyMaterial, Error> {
    let data = std::fs::read(path)?;
    load_key(&data)
}

/// Load a PEM or DER certificate.
pub fn load_certificate_file(path: &Path) -> Result<X509Certificate, Error> {
    let data = std::fs::read(path)?;
    X509Certificate::from_pem_or_der(&data)
}
