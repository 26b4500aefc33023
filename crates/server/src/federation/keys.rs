//! Private key material for identities this service signs on behalf of.

use std::sync::Arc;

use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Deserialize;
use url::Url;

use crate::error::KeyError;
use crate::objects::{Actor, PublicKey as PublicKeyRecord};

/// Modulus size for generated RSA keys.
pub const RSA_KEY_BITS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Rsa,
    Ecdsa,
    Ed25519,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Rsa => "rsa",
            KeyKind::Ecdsa => "ecdsa",
            KeyKind::Ed25519 => "ed25519",
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum PrivateKey {
    Rsa(Box<RsaPrivateKey>),
    Ecdsa(p256::ecdsa::SigningKey),
    Ed25519(ed25519_dalek::SigningKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PrivateKey").field(&self.kind()).finish()
    }
}

impl PrivateKey {
    pub fn generate(kind: KeyKind) -> Result<Self, KeyError> {
        match kind {
            KeyKind::Rsa => Self::generate_rsa(RSA_KEY_BITS),
            KeyKind::Ecdsa => Ok(PrivateKey::Ecdsa(p256::ecdsa::SigningKey::random(
                &mut OsRng,
            ))),
            KeyKind::Ed25519 => Ok(PrivateKey::Ed25519(
                ed25519_dalek::SigningKey::generate(&mut OsRng),
            )),
        }
    }

    pub fn generate_rsa(bits: usize) -> Result<Self, KeyError> {
        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Generation(e.to_string()))?;
        Ok(PrivateKey::Rsa(Box::new(key)))
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            PrivateKey::Rsa(_) => KeyKind::Rsa,
            PrivateKey::Ecdsa(_) => KeyKind::Ecdsa,
            PrivateKey::Ed25519(_) => KeyKind::Ed25519,
        }
    }

    /// Parses a PKCS#8 PEM private key of any supported type. PKCS#1 RSA keys
    /// are accepted as well.
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(PrivateKey::Rsa(Box::new(key)));
        }
        if let Ok(key) = p256::ecdsa::SigningKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Ecdsa(key));
        }
        if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            return Ok(PrivateKey::Ed25519(key));
        }
        Err(KeyError::UnsupportedKey)
    }

    pub fn to_pem(&self) -> Result<String, KeyError> {
        let pem = match self {
            PrivateKey::Rsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::Ecdsa(key) => key.to_pkcs8_pem(LineEnding::LF),
            PrivateKey::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Ok(pem.to_string())
    }

    /// SubjectPublicKeyInfo PEM of the public half.
    pub fn public_key_pem(&self) -> Result<String, KeyError> {
        match self {
            PrivateKey::Rsa(key) => RsaPublicKey::from(key.as_ref()).to_public_key_pem(LineEnding::LF),
            PrivateKey::Ecdsa(key) => key.verifying_key().to_public_key_pem(LineEnding::LF),
            PrivateKey::Ed25519(key) => key.verifying_key().to_public_key_pem(LineEnding::LF),
        }
        .map_err(|e| KeyError::Encoding(e.to_string()))
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Rsa(key) => PublicKey::Rsa(RsaPublicKey::from(key.as_ref())),
            PrivateKey::Ecdsa(key) => PublicKey::Ecdsa(p256::ecdsa::VerifyingKey::from(key)),
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    Ecdsa(p256::ecdsa::VerifyingKey),
    Ed25519(ed25519_dalek::VerifyingKey),
}

impl PublicKey {
    pub fn from_pem(pem: &str) -> Result<Self, KeyError> {
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Rsa(key));
        }
        if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Ecdsa(key));
        }
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
            return Ok(PublicKey::Ed25519(key));
        }
        Err(KeyError::UnsupportedKey)
    }

    pub fn kind(&self) -> KeyKind {
        match self {
            PublicKey::Rsa(_) => KeyKind::Rsa,
            PublicKey::Ecdsa(_) => KeyKind::Ecdsa,
            PublicKey::Ed25519(_) => KeyKind::Ed25519,
        }
    }
}

/// A private key paired with the identifier remote parties use to fetch its
/// public half. Cheap to clone; the key itself is never mutated.
#[derive(Debug, Clone)]
pub struct KeyProvider {
    key: Arc<PrivateKey>,
    key_id: Url,
}

impl KeyProvider {
    pub fn new(key: PrivateKey, key_id: Url) -> Self {
        Self {
            key: Arc::new(key),
            key_id,
        }
    }

    /// Provider for `actor`'s main key.
    pub fn for_actor(key: PrivateKey, actor: &Actor) -> Self {
        Self::new(key, actor.main_key_id())
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    pub fn key_id(&self) -> &Url {
        &self.key_id
    }

    pub fn public_key_record(&self, owner: &Url) -> Result<PublicKeyRecord, KeyError> {
        Ok(PublicKeyRecord {
            id: self.key_id.clone(),
            owner: owner.clone(),
            public_key_pem: self.key.public_key_pem()?,
        })
    }
}
