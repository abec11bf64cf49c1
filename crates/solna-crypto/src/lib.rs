#![forbid(unsafe_code)]

//! Cryptographic providers for the Solna WS-Security library.
//!
//! Every algorithm is selected by the URI found in the message
//! (`DigestMethod`, `SignatureMethod`, `EncryptionMethod`), so the security
//! processors never name a concrete primitive.

pub mod cipher;
pub mod digest;
pub mod key;
pub mod sign;

pub use cipher::CipherAlgorithm;
pub use digest::{DigestAlgorithm, DigestWriter};
pub use key::KeyMaterial;
pub use sign::SignatureAlgorithm;

/// Fill a fresh buffer of `len` random bytes (session keys, IVs).
pub fn random_bytes(len: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut out = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut out);
    out
}
