use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Algorithm tag carried by every Megolm-encrypted stream payload.
pub const MEGOLM_ALGORITHM: &str = "m.megolm.v1.aes-sha2";
/// Algorithm tag for hybrid (miniblock-anchored AES) group sessions.
pub const HYBRID_GROUP_ALGORITHM: &str = "grpaes";

/// The maximum size of a stream event is 64K and the ciphertext is base64
/// encoded, so this approximates the biggest plaintext we can encrypt.
pub const MAX_PLAINTEXT_LENGTH: usize = 65536 * 3 / 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupEncryptionAlgorithm {
    #[serde(rename = "m.megolm.v1.aes-sha2")]
    Megolm,
    #[serde(rename = "grpaes")]
    HybridGroup,
}

impl GroupEncryptionAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupEncryptionAlgorithm::Megolm => MEGOLM_ALGORITHM,
            GroupEncryptionAlgorithm::HybridGroup => HYBRID_GROUP_ALGORITHM,
        }
    }
}

/// Wire payload of one encrypted stream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedData {
    pub algorithm: String,
    /// Curve25519 identity key of the sending device, unpadded base64.
    pub sender_key: String,
    /// Megolm message, unpadded base64.
    pub ciphertext: String,
    pub session_id: String,
}

/// Session material handed to the transport for device-to-device sharing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEncryptionSession {
    pub stream_id: String,
    pub session_id: String,
    pub session_key: String,
    pub algorithm: GroupEncryptionAlgorithm,
}

/// Key material of the active outbound session of a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSessionKey {
    pub session_id: String,
    pub message_index: u32,
    /// Signed Megolm session key, base64.
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackKey {
    pub key_id: String,
    pub key: String,
}

/// A device as published by its owner: identity key plus fallback key used
/// to open one-to-one channels for key sharing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDevice {
    pub device_key: String,
    pub fallback_key: String,
}

/// Devices of every member of a stream, keyed by user id.
pub type UserDeviceCollection = HashMap<String, Vec<UserDevice>>;

/// A known device row with its cache expiry (unix millis).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub user_id: String,
    pub device_key: String,
    pub fallback_key: String,
    pub expiration_timestamp: u64,
}

impl DeviceRecord {
    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expiration_timestamp <= now_millis
    }

    pub fn to_user_device(&self) -> UserDevice {
        UserDevice {
            device_key: self.device_key.clone(),
            fallback_key: self.fallback_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedGroupMessage {
    pub plaintext: String,
    pub message_index: u32,
    pub keys_claimed: HashMap<String, String>,
}

/// How a consuming layer should render a message after a decrypt attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionOutcome {
    Decrypted(String),
    /// Keys have not arrived yet; show as "encrypted / pending keys".
    PendingKeys,
    /// Terminal failure for this message.
    Failed(String),
}

impl From<crate::Result<String>> for DecryptionOutcome {
    fn from(result: crate::Result<String>) -> Self {
        match result {
            Ok(plaintext) => DecryptionOutcome::Decrypted(plaintext),
            Err(e) if e.is_pending_key() => DecryptionOutcome::PendingKeys,
            Err(e) => DecryptionOutcome::Failed(e.to_string()),
        }
    }
}
