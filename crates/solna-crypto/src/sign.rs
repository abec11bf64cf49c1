#![forbid(unsafe_code)]

//! Signature algorithm implementations (RSA, RSA-PSS, ECDSA, HMAC).
//!
//! `verify` fails with [`Error::SignatureInvalid`] on a mismatch; a message
//! with a bad signature is never partially trusted, so there is no boolean
//! result to forget to check.

use signature::SignatureEncoding;
use solna_core::{algorithm, Error};

use crate::key::KeyMaterial;

/// Trait for signature algorithms.
pub trait SignatureAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn verify(&self, key: &KeyMaterial, data: &[u8], signature: &[u8]) -> Result<(), Error>;
}

/// Create a signature algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
    use HashType::*;
    match uri {
        algorithm::RSA_SHA1 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA1, hash: Sha1 })),
        algorithm::RSA_SHA224 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA224, hash: Sha224 })),
        algorithm::RSA_SHA256 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA256, hash: Sha256 })),
        algorithm::RSA_SHA384 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA384, hash: Sha384 })),
        algorithm::RSA_SHA512 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA512, hash: Sha512 })),

        algorithm::RSA_PSS_SHA256 => Ok(Box::new(RsaPss { uri: algorithm::RSA_PSS_SHA256, hash: Sha256 })),
        algorithm::RSA_PSS_SHA384 => Ok(Box::new(RsaPss { uri: algorithm::RSA_PSS_SHA384, hash: Sha384 })),
        algorithm::RSA_PSS_SHA512 => Ok(Box::new(RsaPss { uri: algorithm::RSA_PSS_SHA512, hash: Sha512 })),

        algorithm::ECDSA_SHA256 => Ok(Box::new(EcdsaP256)),
        algorithm::ECDSA_SHA384 => Ok(Box::new(EcdsaP384)),

        algorithm::HMAC_SHA1 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA1, hash: Sha1 })),
        algorithm::HMAC_SHA256 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA256, hash: Sha256 })),
        algorithm::HMAC_SHA384 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA384, hash: Sha384 })),
        algorithm::HMAC_SHA512 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA512, hash: Sha512 })),

        _ => Err(Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}"))),
    }
}

/// Is `uri` a MAC (shared-key) algorithm?
pub fn is_hmac(uri: &str) -> bool {
    matches!(
        uri,
        algorithm::HMAC_SHA1 | algorithm::HMAC_SHA256 | algorithm::HMAC_SHA384 | algorithm::HMAC_SHA512
    )
}

#[derive(Debug, Clone, Copy)]
enum HashType { Sha1, Sha224, Sha256, Sha384, Sha512 }

fn mismatch(uri: &str) -> Error {
    Error::SignatureInvalid(format!("signature value does not verify ({uri})"))
}

fn rsa_public(key: &KeyMaterial, uri: &str) -> Result<rsa::RsaPublicKey, Error> {
    match key {
        KeyMaterial::RsaPrivate(pk) => Ok(pk.to_public_key()),
        KeyMaterial::RsaPublic(pk) => Ok(pk.clone()),
        other => Err(Error::Key(format!("{uri} requires an RSA key, found {}", other.family()))),
    }
}

// ── RSA PKCS#1 v1.5 ─────────────────────────────────────────────────

struct RsaPkcs1v15 { uri: &'static str, hash: HashType }

impl SignatureAlgorithm for RsaPkcs1v15 {
    fn uri(&self) -> &'static str { self.uri }

    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::Signer;
        let KeyMaterial::RsaPrivate(private_key) = key else {
            return Err(Error::Key(format!("{} requires an RSA private key", self.uri)));
        };
        macro_rules! do_sign {
            ($hasher:ty) => {{
                let sk = rsa::pkcs1v15::SigningKey::<$hasher>::new(private_key.clone());
                sk.try_sign(data)
                    .map(|sig| sig.to_vec())
                    .map_err(|e| Error::Crypto(format!("RSA sign: {e}")))
            }};
        }
        match self.hash {
            HashType::Sha1 => do_sign!(sha1::Sha1),
            HashType::Sha224 => do_sign!(sha2::Sha224),
            HashType::Sha256 => do_sign!(sha2::Sha256),
            HashType::Sha384 => do_sign!(sha2::Sha384),
            HashType::Sha512 => do_sign!(sha2::Sha512),
        }
    }

    fn verify(&self, key: &KeyMaterial, data: &[u8], sig_bytes: &[u8]) -> Result<(), Error> {
        use signature::Verifier;
        let public_key = rsa_public(key, self.uri)?;
        let sig = rsa::pkcs1v15::Signature::try_from(sig_bytes)
            .map_err(|e| Error::Crypto(format!("invalid RSA signature: {e}")))?;
        macro_rules! do_verify {
            ($hasher:ty) => {{
                rsa::pkcs1v15::VerifyingKey::<$hasher>::new(public_key)
                    .verify(data, &sig)
                    .map_err(|_| mismatch(self.uri))
            }};
        }
        match self.hash {
            HashType::Sha1 => do_verify!(sha1::Sha1),
            HashType::Sha224 => do_verify!(sha2::Sha224),
            HashType::Sha256 => do_verify!(sha2::Sha256),
            HashType::Sha384 => do_verify!(sha2::Sha384),
            HashType::Sha512 => do_verify!(sha2::Sha512),
        }
    }
}

// ── RSA-PSS ──────────────────────────────────────────────────────────

struct RsaPss { uri: &'static str, hash: HashType }

impl SignatureAlgorithm for RsaPss {
    fn uri(&self) -> &'static str { self.uri }

    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::RandomizedSigner;
        let KeyMaterial::RsaPrivate(private_key) = key else {
            return Err(Error::Key(format!("{} requires an RSA private key", self.uri)));
        };
        let mut rng = rand::thread_rng();
        macro_rules! do_sign {
            ($hasher:ty) => {{
                let sk = rsa::pss::SigningKey::<$hasher>::new(private_key.clone());
                sk.try_sign_with_rng(&mut rng, data)
                    .map(|sig| sig.to_vec())
                    .map_err(|e| Error::Crypto(format!("RSA-PSS sign: {e}")))
            }};
        }
        match self.hash {
            HashType::Sha256 => do_sign!(sha2::Sha256),
            HashType::Sha384 => do_sign!(sha2::Sha384),
            HashType::Sha512 => do_sign!(sha2::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!("RSA-PSS with {other:?}"))),
        }
    }

    fn verify(&self, key: &KeyMaterial, data: &[u8], sig_bytes: &[u8]) -> Result<(), Error> {
        use signature::Verifier;
        let public_key = rsa_public(key, self.uri)?;
        let sig = rsa::pss::Signature::try_from(sig_bytes)
            .map_err(|e| Error::Crypto(format!("invalid RSA-PSS signature: {e}")))?;
        macro_rules! do_verify {
            ($hasher:ty) => {{
                rsa::pss::VerifyingKey::<$hasher>::new(public_key)
                    .verify(data, &sig)
                    .map_err(|_| mismatch(self.uri))
            }};
        }
        match self.hash {
            HashType::Sha256 => do_verify!(sha2::Sha256),
            HashType::Sha384 => do_verify!(sha2::Sha384),
            HashType::Sha512 => do_verify!(sha2::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!("RSA-PSS with {other:?}"))),
        }
    }
}

// ── ECDSA ────────────────────────────────────────────────────────────
//
// XML-DSig carries ECDSA signatures as the raw concatenation r||s.

struct EcdsaP256;

impl SignatureAlgorithm for EcdsaP256 {
    fn uri(&self) -> &'static str { algorithm::ECDSA_SHA256 }

    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::Signer;
        let KeyMaterial::EcP256Private(sk) = key else {
            return Err(Error::Key("P-256 signing key required".into()));
        };
        let sig: p256::ecdsa::Signature = sk
            .try_sign(data)
            .map_err(|e| Error::Crypto(format!("ECDSA sign: {e}")))?;
        Ok(sig.to_bytes().to_vec())
    }

    fn verify(&self, key: &KeyMaterial, data: &[u8], sig_bytes: &[u8]) -> Result<(), Error> {
        use signature::Verifier;
        let vk = match key {
            KeyMaterial::EcP256Private(sk) => *sk.verifying_key(),
            KeyMaterial::EcP256Public(vk) => *vk,
            other => return Err(Error::Key(format!("P-256 key required, found {}", other.family()))),
        };
        let sig = p256::ecdsa::Signature::from_slice(sig_bytes)
            .map_err(|e| Error::Crypto(format!("invalid P-256 signature: {e}")))?;
        vk.verify(data, &sig).map_err(|_| mismatch(self.uri()))
    }
}

struct EcdsaP384;

impl SignatureAlgorithm for EcdsaP384 {
    fn uri(&self) -> &'static str { algorithm::ECDSA_SHA384 }

    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::Signer;
        let KeyMaterial::EcP384Private(sk) = key else {
            return Err(Error::Key("P-384 signing key required".into()));
        };
        let sig: p384::ecdsa::Signature = sk
            .try_sign(data)
            .map_err(|e| Error::Crypto(format!("ECDSA sign: {e}")))?;
        Ok(sig.to_bytes().to_vec())
    }

    fn verify(&self, key: &KeyMaterial, data: &[u8], sig_bytes: &[u8]) -> Result<(), Error> {
        use signature::Verifier;
        let vk = match key {
            KeyMaterial::EcP384Private(sk) => *sk.verifying_key(),
            KeyMaterial::EcP384Public(vk) => *vk,
            other => return Err(Error::Key(format!("P-384 key required, found {}", other.family()))),
        };
        let sig = p384::ecdsa::Signature::from_slice(sig_bytes)
            .map_err(|e| Error::Crypto(format!("invalid P-384 signature: {e}")))?;
        vk.verify(data, &sig).map_err(|_| mismatch(self.uri()))
    }
}

// ── HMAC ─────────────────────────────────────────────────────────────

struct HmacSign { uri: &'static str, hash: HashType }

impl SignatureAlgorithm for HmacSign {
    fn uri(&self) -> &'static str { self.uri }

    fn sign(&self, key: &KeyMaterial, data: &[u8]) -> Result<Vec<u8>, Error> {
        compute_hmac(self.hash, key.secret()?, data)
    }

    fn verify(&self, key: &KeyMaterial, data: &[u8], sig_bytes: &[u8]) -> Result<(), Error> {
        let expected = compute_hmac(self.hash, key.secret()?, data)?;
        // truncated MACs are refused outright
        if constant_time_eq(&expected, sig_bytes) {
            Ok(())
        } else {
            Err(mismatch(self.uri))
        }
    }
}

fn compute_hmac(hash: HashType, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    use hmac::{Hmac, Mac};
    macro_rules! hmac_compute {
        ($hasher:ty) => {{
            let mut mac = <Hmac<$hasher>>::new_from_slice(key)
                .map_err(|e| Error::Key(format!("HMAC key: {e}")))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }
    match hash {
        HashType::Sha1 => hmac_compute!(sha1::Sha1),
        HashType::Sha224 => hmac_compute!(sha2::Sha224),
        HashType::Sha256 => hmac_compute!(sha2::Sha256),
        HashType::Sha384 => hmac_compute!(sha2::Sha384),
        HashType::Sha512 => hmac_compute!(sha2::Sha512),
    }
}

/// Length-checked constant-time comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
