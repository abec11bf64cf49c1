#![forbid(unsafe_code)]

//! Key material carried by security tokens.

use std::fmt;

use solna_core::Error;

/// A key usable for signing, verification or content encryption.
#[derive(Clone)]
pub enum KeyMaterial {
    RsaPrivate(rsa::RsaPrivateKey),
    RsaPublic(rsa::RsaPublicKey),
    EcP256Private(p256::ecdsa::SigningKey),
    EcP256Public(p256::ecdsa::VerifyingKey),
    EcP384Private(p384::ecdsa::SigningKey),
    EcP384Public(p384::ecdsa::VerifyingKey),
    /// Shared secret (HMAC key or symmetric content-encryption key).
    Secret(Vec<u8>),
}

impl KeyMaterial {
    /// Key family name, for diagnostics.
    pub fn family(&self) -> &'static str {
        match self {
            Self::RsaPrivate(_) | Self::RsaPublic(_) => "RSA",
            Self::EcP256Private(_) | Self::EcP256Public(_) => "EC P-256",
            Self::EcP384Private(_) | Self::EcP384Public(_) => "EC P-384",
            Self::Secret(_) => "secret",
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, Self::Secret(_))
    }

    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Self::RsaPrivate(_) | Self::EcP256Private(_) | Self::EcP384Private(_)
        )
    }

    /// The verification half of an asymmetric key; secrets are returned as is.
    pub fn public(&self) -> KeyMaterial {
        match self {
            Self::RsaPrivate(k) => Self::RsaPublic(k.to_public_key()),
            Self::EcP256Private(k) => Self::EcP256Public(*k.verifying_key()),
            Self::EcP384Private(k) => Self::EcP384Public(*k.verifying_key()),
            other => other.clone(),
        }
    }

    /// Raw secret bytes, if this is a shared secret.
    pub fn secret(&self) -> Result<&[u8], Error> {
        match self {
            Self::Secret(bytes) => Ok(bytes),
            other => Err(Error::Key(format!(
                "symmetric key required, found {} key",
                other.family()
            ))),
        }
    }

    /// Do both keys have the same public (or secret) value?
    ///
    /// Used to bind an identity assertion's subject key to the key that
    /// actually signed the message.
    pub fn matches(&self, other: &KeyMaterial) -> bool {
        match (self.public(), other.public()) {
            (Self::RsaPublic(a), Self::RsaPublic(b)) => a == b,
            (Self::EcP256Public(a), Self::EcP256Public(b)) => a == b,
            (Self::EcP384Public(a), Self::EcP384Public(b)) => a == b,
            (Self::Secret(a), Self::Secret(b)) => crate::sign::constant_time_eq(&a, &b),
            _ => false,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(bytes) => write!(f, "Secret({} bytes)", bytes.len()),
            other => write!(
                f,
                "{}({})",
                other.family(),
                if other.is_private() { "private" } else { "public" }
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_debug_redacted() {
        let key = KeyMaterial::Secret(b"top-secret-value".to_vec());
        let shown = format!("{key:?}");
        assert_eq!(shown, "Secret(16 bytes)");
        assert!(!shown.contains("top"));
    }

    #[test]
    fn test_matches_private_against_public() {
        let sk = p256::ecdsa::SigningKey::random(&mut rand::thread_rng());
        let private = KeyMaterial::EcP256Private(sk.clone());
        let public = KeyMaterial::EcP256Public(*sk.verifying_key());
        assert!(private.matches(&public));
        assert!(public.matches(&private));

        let other = KeyMaterial::EcP256Private(p256::ecdsa::SigningKey::random(
            &mut rand::thread_rng(),
        ));
        assert!(!other.matches(&public));
    }

    #[test]
    fn test_secret_matching() {
        let a = KeyMaterial::Secret(vec![1, 2, 3]);
        assert!(a.matches(&KeyMaterial::Secret(vec![1, 2, 3])));
        assert!(!a.matches(&KeyMaterial::Secret(vec![1, 2])));
        assert!(a.secret().is_ok());
        let ec = KeyMaterial::EcP256Public(*p256::ecdsa::SigningKey::random(
            &mut rand::thread_rng(),
        )
        .verifying_key());
        assert!(matches!(ec.secret(), Err(Error::Key(_))));
        assert!(!a.matches(&ec));
    }
}
