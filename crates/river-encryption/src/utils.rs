use crate::{Error, Result, MAX_PLAINTEXT_LENGTH};
use hkdf::Hkdf;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

const PICKLE_KEY_SALT: &[u8] = b"river-encryption-pickle-key-v1";

pub fn kdf(input1: &[u8], input2: &[u8], num_outputs: usize) -> Result<Vec<[u8; 32]>> {
    let hk = Hkdf::<Sha256>::new(Some(input2), input1);

    let mut outputs = Vec::with_capacity(num_outputs);
    for i in 1..=num_outputs {
        let mut okm = [0u8; 32];
        hk.expand(&[i as u8], &mut okm)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        outputs.push(okm);
    }
    Ok(outputs)
}

/// Stretch the configured pickle secret into the 32-byte key that encrypts
/// every pickled account and session at rest.
pub fn derive_pickle_key(secret: &str) -> Result<[u8; 32]> {
    let outputs = kdf(secret.as_bytes(), PICKLE_KEY_SALT, 1)?;
    outputs
        .into_iter()
        .next()
        .ok_or_else(|| Error::InvalidKey("empty kdf output".to_string()))
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Fail early instead of handing the ratchet a payload the stream will refuse.
pub fn check_payload_length(payload: &str) -> Result<()> {
    if payload.len() > MAX_PLAINTEXT_LENGTH {
        return Err(Error::MessageTooLong {
            length: payload.len(),
            max: MAX_PLAINTEXT_LENGTH,
        });
    }
    Ok(())
}
