#![forbid(unsafe_code)]

//! Block cipher algorithm implementations (AES-CBC, AES-GCM, 3DES-CBC).
//!
//! Ciphertext layout follows XML Encryption: the IV (or GCM nonce) is
//! prepended to the cipher output.

use solna_core::{algorithm, Error};

/// Trait for cipher algorithms.
pub trait CipherAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
    fn key_size(&self) -> usize;
}

/// Create a cipher algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn CipherAlgorithm>, Error> {
    match uri {
        algorithm::AES128_CBC => Ok(Box::new(Cbc { kind: CbcKind::Aes128, uri: algorithm::AES128_CBC })),
        algorithm::AES192_CBC => Ok(Box::new(Cbc { kind: CbcKind::Aes192, uri: algorithm::AES192_CBC })),
        algorithm::AES256_CBC => Ok(Box::new(Cbc { kind: CbcKind::Aes256, uri: algorithm::AES256_CBC })),
        algorithm::TRIPLEDES_CBC => Ok(Box::new(Cbc { kind: CbcKind::TripleDes, uri: algorithm::TRIPLEDES_CBC })),
        algorithm::AES128_GCM => Ok(Box::new(AesGcm { key_size: 16, uri: algorithm::AES128_GCM })),
        algorithm::AES256_GCM => Ok(Box::new(AesGcm { key_size: 32, uri: algorithm::AES256_GCM })),
        _ => Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
    }
}

/// Block encryption algorithms permitted by the Basic Security Profile
/// (plus the AES-GCM successors).
pub fn is_bsp_approved(uri: &str) -> bool {
    matches!(
        uri,
        algorithm::AES128_CBC
            | algorithm::AES256_CBC
            | algorithm::TRIPLEDES_CBC
            | algorithm::AES128_GCM
            | algorithm::AES256_GCM
    )
}

fn check_key(uri: &str, expected: usize, key: &[u8]) -> Result<(), Error> {
    if key.len() != expected {
        return Err(Error::Key(format!(
            "{uri} expects a {expected} byte key, got {}",
            key.len()
        )));
    }
    Ok(())
}

// ── CBC with XML Encryption padding ─────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum CbcKind { Aes128, Aes192, Aes256, TripleDes }

impl CbcKind {
    fn key_size(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 | Self::TripleDes => 24,
            Self::Aes256 => 32,
        }
    }

    fn block_size(self) -> usize {
        match self {
            Self::TripleDes => 8,
            _ => 16,
        }
    }
}

struct Cbc { kind: CbcKind, uri: &'static str }

impl CipherAlgorithm for Cbc {
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        self.kind.key_size()
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        use cbc::cipher::{block_padding::NoPadding, BlockEncryptMut, KeyIvInit};

        check_key(self.uri, self.key_size(), key)?;
        let block = self.kind.block_size();
        let iv = crate::random_bytes(block);
        let mut buf = pad(plaintext, block);
        let len = buf.len();

        macro_rules! do_encrypt {
            ($cipher:ty) => {{
                cbc::Encryptor::<$cipher>::new_from_slices(key, &iv)
                    .map_err(|e| Error::Encryption(format!("{} init: {e}", self.uri)))?
                    .encrypt_padded_mut::<NoPadding>(&mut buf, len)
                    .map_err(|e| Error::Encryption(format!("{}: {e}", self.uri)))?;
            }};
        }
        match self.kind {
            CbcKind::Aes128 => do_encrypt!(aes::Aes128),
            CbcKind::Aes192 => do_encrypt!(aes::Aes192),
            CbcKind::Aes256 => do_encrypt!(aes::Aes256),
            CbcKind::TripleDes => do_encrypt!(des::TdesEde3),
        }

        let mut out = iv;
        out.extend_from_slice(&buf);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, KeyIvInit};

        check_key(self.uri, self.key_size(), key)?;
        let block = self.kind.block_size();
        if data.len() < 2 * block || data.len() % block != 0 {
            return Err(Error::Decryption(format!(
                "{}: ciphertext length {} is not a whole number of blocks",
                self.uri,
                data.len()
            )));
        }
        let (iv, ciphertext) = data.split_at(block);
        let mut buf = ciphertext.to_vec();

        macro_rules! do_decrypt {
            ($cipher:ty) => {{
                cbc::Decryptor::<$cipher>::new_from_slices(key, iv)
                    .map_err(|e| Error::Decryption(format!("{} init: {e}", self.uri)))?
                    .decrypt_padded_mut::<NoPadding>(&mut buf)
                    .map_err(|e| Error::Decryption(format!("{}: {e}", self.uri)))?;
            }};
        }
        match self.kind {
            CbcKind::Aes128 => do_decrypt!(aes::Aes128),
            CbcKind::Aes192 => do_decrypt!(aes::Aes192),
            CbcKind::Aes256 => do_decrypt!(aes::Aes256),
            CbcKind::TripleDes => do_decrypt!(des::TdesEde3),
        }

        unpad(&buf, block)
    }
}

fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let pad_len = block_size - (data.len() % block_size);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    padded
}

/// Remove XML Encryption padding.  Only the last byte (the pad length) is
/// significant, which accepts both PKCS#7 and ISO 10126 filler.
fn unpad(data: &[u8], block_size: usize) -> Result<Vec<u8>, Error> {
    let Some(&last) = data.last() else {
        return Err(Error::Decryption("empty plaintext block".into()));
    };
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
        return Err(Error::Decryption("invalid padding".into()));
    }
    Ok(data[..data.len() - pad_len].to_vec())
}

// ── AES-GCM ──────────────────────────────────────────────────────────

const GCM_NONCE: usize = 12;
const GCM_TAG: usize = 16;

struct AesGcm { key_size: usize, uri: &'static str }

impl CipherAlgorithm for AesGcm {
    fn uri(&self) -> &'static str {
        self.uri
    }

    fn key_size(&self) -> usize {
        self.key_size
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        check_key(self.uri, self.key_size, key)?;
        let nonce_bytes = crate::random_bytes(GCM_NONCE);
        let nonce = Nonce::from_slice(&nonce_bytes);

        macro_rules! do_encrypt {
            ($cipher:ty) => {
                <$cipher>::new_from_slice(key)
                    .map_err(|e| Error::Encryption(format!("{} init: {e}", self.uri)))?
                    .encrypt(nonce, plaintext)
                    .map_err(|e| Error::Encryption(format!("{}: {e}", self.uri)))?
            };
        }
        let ct = match self.key_size {
            16 => do_encrypt!(aes_gcm::Aes128Gcm),
            _ => do_encrypt!(aes_gcm::Aes256Gcm),
        };

        let mut out = nonce_bytes;
        out.extend_from_slice(&ct);
        Ok(out)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        use aes_gcm::{aead::Aead, KeyInit, Nonce};

        check_key(self.uri, self.key_size, key)?;
        if data.len() < GCM_NONCE + GCM_TAG {
            return Err(Error::Decryption(format!("{}: ciphertext too short", self.uri)));
        }
        let (nonce, ct_and_tag) = data.split_at(GCM_NONCE);
        let nonce = Nonce::from_slice(nonce);

        macro_rules! do_decrypt {
            ($cipher:ty) => {
                <$cipher>::new_from_slice(key)
                    .map_err(|e| Error::Decryption(format!("{} init: {e}", self.uri)))?
                    .decrypt(nonce, ct_and_tag)
                    .map_err(|_| Error::Decryption(format!("{}: authentication tag mismatch", self.uri)))
            };
        }
        match self.key_size {
            16 => do_decrypt!(aes_gcm::Aes128Gcm),
            _ => do_decrypt!(aes_gcm::Aes256Gcm),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_unpad() {
        let padded = pad(b"hello", 16);
        assert_eq!(padded.len(), 16);
        assert_eq!(unpad(&padded, 16).unwrap(), b"hello");

        let full = pad(b"0123456789abcdef", 16);
        assert_eq!(full.len(), 32);
    }

    #[test]
    fn test_iso10126_unpad() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[0xAB, 0xCD, 0xEF, 0x04]);
        assert_eq!(unpad(&data, 16).unwrap(), b"hello world!");
        assert!(unpad(&[1, 2, 0x20], 16).is_err());
        assert!(unpad(&[], 16).is_err());
    }

    #[test]
    fn test_round_trip_all_ciphers() {
        let plaintexts: &[&[u8]] = &[b"A", b"Exactly16bytes!!", b"<m:op xmlns:m=\"urn:m\">spans several blocks</m:op>"];
        for uri in [
            algorithm::AES128_CBC,
            algorithm::AES192_CBC,
            algorithm::AES256_CBC,
            algorithm::TRIPLEDES_CBC,
            algorithm::AES128_GCM,
            algorithm::AES256_GCM,
        ] {
            let cipher = from_uri(uri).unwrap();
            let key: Vec<u8> = (0..cipher.key_size()).map(|i| i as u8).collect();
            for &pt in plaintexts {
                let ct = cipher.encrypt(&key, pt).unwrap();
                assert_eq!(cipher.decrypt(&key, &ct).unwrap(), pt, "{uri}");
            }
        }
    }

    #[test]
    fn test_gcm_tamper_detected() {
        let key = [0x42u8; 16];
        let cipher = from_uri(algorithm::AES128_GCM).unwrap();
        let mut ct = cipher.encrypt(&key, b"payload").unwrap();
        let last = ct.len() - 1;
        ct[last] ^= 0xFF;
        assert!(matches!(cipher.decrypt(&key, &ct), Err(Error::Decryption(_))));
    }

    #[test]
    fn test_wrong_key_length() {
        let cipher = from_uri(algorithm::AES256_CBC).unwrap();
        assert!(matches!(cipher.encrypt(&[0; 16], b"x"), Err(Error::Key(_))));
    }

    #[test]
    fn test_bsp_approval() {
        assert!(is_bsp_approved(algorithm::AES128_CBC));
        assert!(is_bsp_approved(algorithm::TRIPLEDES_CBC));
        assert!(!is_bsp_approved(algorithm::AES192_CBC));
        assert!(from_uri("http://example.com/fake-cipher").is_err());
    }
}
