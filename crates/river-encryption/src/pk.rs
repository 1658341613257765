//! Public-key helpers built next to the ratchets: anonymous encryption to a
//! Curve25519 key, Ed25519 signing and a couple of stateless utilities.

use crate::{utils::kdf, Error, Result};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vodozemac::{Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};
use x25519_dalek::{PublicKey, StaticSecret};

const NONCE_SIZE: usize = 12;

/// Output of [`PkEncryption::encrypt`]. `ciphertext` is `nonce || aes-gcm output`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkMessage {
    pub ephemeral_key: String,
    pub ciphertext: String,
}

fn decode_curve_key(key: &str) -> Result<PublicKey> {
    let bytes = STANDARD_NO_PAD
        .decode(key)
        .map_err(|e| Error::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidKey("curve25519 key must be 32 bytes".to_string()))?;
    Ok(PublicKey::from(bytes))
}

fn message_key(shared_secret: &[u8], ephemeral_key: &[u8]) -> Result<[u8; 32]> {
    kdf(shared_secret, ephemeral_key, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidKey("empty kdf output".to_string()))
}

pub struct PkEncryption {
    recipient: PublicKey,
}

impl PkEncryption {
    pub fn new(recipient_key: &str) -> Result<Self> {
        Ok(Self {
            recipient: decode_curve_key(recipient_key)?,
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<PkMessage> {
        let ephemeral = StaticSecret::from(rand::random::<[u8; 32]>());
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&self.recipient);
        let key = message_key(shared.as_bytes(), ephemeral_public.as_bytes())?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::InvalidKey(format!("encryption failed: {e}")))?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|e| Error::Serialization(format!("encryption failed: {e}")))?;

        let mut data = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        data.extend_from_slice(&nonce_bytes);
        data.extend_from_slice(&ciphertext);

        Ok(PkMessage {
            ephemeral_key: STANDARD_NO_PAD.encode(ephemeral_public.as_bytes()),
            ciphertext: STANDARD_NO_PAD.encode(data),
        })
    }
}

pub struct PkDecryption {
    secret: StaticSecret,
    public: PublicKey,
}

impl PkDecryption {
    pub fn new() -> Self {
        Self::from_private_key(rand::random::<[u8; 32]>())
    }

    pub fn from_private_key(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> String {
        STANDARD_NO_PAD.encode(self.public.as_bytes())
    }

    pub fn private_key(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    pub fn decrypt(&self, message: &PkMessage) -> Result<String> {
        let ephemeral = decode_curve_key(&message.ephemeral_key)?;
        let data = STANDARD_NO_PAD
            .decode(&message.ciphertext)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        if data.len() < NONCE_SIZE {
            return Err(Error::Serialization(
                "ciphertext too short to contain nonce".to_string(),
            ));
        }

        let shared = self.secret.diffie_hellman(&ephemeral);
        let key = message_key(shared.as_bytes(), ephemeral.as_bytes())?;

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::InvalidKey(format!("decryption failed: {e}")))?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Serialization(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext).map_err(|e| Error::Serialization(e.to_string()))
    }
}

impl Default for PkDecryption {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PkSigning {
    key: Ed25519SecretKey,
}

impl PkSigning {
    pub fn new() -> Self {
        Self {
            key: Ed25519SecretKey::new(),
        }
    }

    pub fn public_key(&self) -> String {
        self.key.public_key().to_base64()
    }

    pub fn sign(&self, message: &str) -> String {
        self.key.sign(message.as_bytes()).to_base64()
    }
}

impl Default for PkSigning {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Utility;

impl Utility {
    /// SHA-256 digest, unpadded base64.
    pub fn sha256(&self, input: &[u8]) -> String {
        STANDARD_NO_PAD.encode(Sha256::digest(input))
    }

    pub fn ed25519_verify(&self, key: &str, message: &str, signature: &str) -> Result<()> {
        let key = Ed25519PublicKey::from_base64(key).map_err(|e| Error::InvalidKey(e.to_string()))?;
        let signature =
            Ed25519Signature::from_base64(signature).map_err(|e| Error::InvalidKey(e.to_string()))?;
        key.verify(message.as_bytes(), &signature)
            .map_err(|e| Error::InvalidKey(format!("bad signature: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pk_encrypt_decrypt() {
        let decryption = PkDecryption::new();
        let encryption = PkEncryption::new(&decryption.public_key()).unwrap();

        let message = encryption.encrypt("session key material").unwrap();
        assert_eq!(decryption.decrypt(&message).unwrap(), "session key material");
    }

    #[test]
    fn pk_decrypt_with_wrong_key_fails() {
        let intended = PkDecryption::new();
        let other = PkDecryption::new();
        let message = PkEncryption::new(&intended.public_key())
            .unwrap()
            .encrypt("secret")
            .unwrap();
        assert!(other.decrypt(&message).is_err());
    }

    #[test]
    fn pk_decryption_restores_from_private_key() {
        let original = PkDecryption::new();
        let restored = PkDecryption::from_private_key(original.private_key());
        assert_eq!(original.public_key(), restored.public_key());
    }

    #[test]
    fn pk_encryption_rejects_bad_key() {
        assert!(matches!(PkEncryption::new("not base64!"), Err(Error::InvalidKey(_))));
        assert!(matches!(PkEncryption::new("AAAA"), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn signing_verifies_with_utility() {
        let signing = PkSigning::new();
        let signature = signing.sign("hello");
        let utility = Utility;

        assert!(utility
            .ed25519_verify(&signing.public_key(), "hello", &signature)
            .is_ok());
        assert!(utility
            .ed25519_verify(&signing.public_key(), "hullo", &signature)
            .is_err());
    }

    #[test]
    fn sha256_is_unpadded_base64() {
        let digest = Utility.sha256(b"");
        assert_eq!(digest, "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU");
    }
}
