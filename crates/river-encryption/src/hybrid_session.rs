use crate::{Error, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SESSION_ID_PREFIX: &[u8] = b"RVR_HSK:";
const KEY_SIZE: usize = 32;

/// Symmetric group key anchored to a miniblock of its stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridGroupSessionKey {
    #[serde(with = "hex")]
    pub session_id: Vec<u8>,
    #[serde(with = "hex")]
    pub stream_id: Vec<u8>,
    #[serde(with = "hex")]
    pub key: Vec<u8>,
    pub miniblock_num: u64,
    #[serde(with = "hex")]
    pub miniblock_hash: Vec<u8>,
}

impl HybridGroupSessionKey {
    /// Fresh random key for `stream_id` (hex) at the given miniblock.
    pub fn generate(stream_id: &str, miniblock_num: u64, miniblock_hash: &[u8]) -> Result<Self> {
        let stream_id = hex::decode(stream_id)?;
        let mut key = vec![0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);

        let session_id = compute_session_id(&stream_id, &key, miniblock_num, miniblock_hash);
        Ok(Self {
            session_id,
            stream_id,
            key,
            miniblock_num,
            miniblock_hash: miniblock_hash.to_vec(),
        })
    }

    pub fn session_id_hex(&self) -> String {
        hex::encode(&self.session_id)
    }

    pub fn stream_id_hex(&self) -> String {
        hex::encode(&self.stream_id)
    }

    /// Recompute the session id from the key material and compare.
    pub fn verify(&self) -> Result<()> {
        let expected = compute_session_id(
            &self.stream_id,
            &self.key,
            self.miniblock_num,
            &self.miniblock_hash,
        );
        if expected != self.session_id {
            return Err(Error::SessionIdMismatch {
                expected: hex::encode(expected),
                actual: self.session_id_hex(),
            });
        }
        Ok(())
    }

    /// Wire/storage form: hex of the JSON encoding.
    pub fn to_hex(&self) -> Result<String> {
        Ok(hex::encode(serde_json::to_vec(self)?))
    }

    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// SHA-256 over `"RVR_HSK:" || stream_id || key || miniblock_num (u64 BE) || miniblock_hash`.
pub fn compute_session_id(
    stream_id: &[u8],
    key: &[u8],
    miniblock_num: u64,
    miniblock_hash: &[u8],
) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(SESSION_ID_PREFIX);
    hasher.update(stream_id);
    hasher.update(key);
    hasher.update(miniblock_num.to_be_bytes());
    hasher.update(miniblock_hash);
    hasher.finalize().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "20aabbccdd";

    #[test]
    fn generated_key_verifies() {
        let key = HybridGroupSessionKey::generate(STREAM, 7, &[9u8; 32]).unwrap();
        assert_eq!(key.stream_id_hex(), STREAM);
        assert_eq!(key.session_id.len(), 32);
        key.verify().unwrap();
    }

    #[test]
    fn tampered_miniblock_breaks_session_id() {
        let mut key = HybridGroupSessionKey::generate(STREAM, 7, &[9u8; 32]).unwrap();
        key.miniblock_num = 8;
        assert!(matches!(key.verify(), Err(Error::SessionIdMismatch { .. })));
    }

    #[test]
    fn hex_encoding_roundtrip() {
        let key = HybridGroupSessionKey::generate(STREAM, 1, b"hash").unwrap();
        let decoded = HybridGroupSessionKey::from_hex(&key.to_hex().unwrap()).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn session_id_covers_every_input() {
        let base = compute_session_id(b"s", b"k", 1, b"h");
        assert_ne!(base, compute_session_id(b"t", b"k", 1, b"h"));
        assert_ne!(base, compute_session_id(b"s", b"j", 1, b"h"));
        assert_ne!(base, compute_session_id(b"s", b"k", 2, b"h"));
        assert_ne!(base, compute_session_id(b"s", b"k", 1, b"g"));
    }

    #[test]
    fn non_hex_stream_id_is_rejected() {
        assert!(matches!(
            HybridGroupSessionKey::generate("not-hex", 1, b"h"),
            Err(Error::Hex(_))
        ));
    }
}
