use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Encryption library used before init()")]
    Uninitialized,

    #[error("Encryption library failed its startup probe: {0}")]
    InitFailed(String),

    #[error("No outbound group session for stream {stream_id}")]
    NoSession { stream_id: String },

    #[error("Unknown inbound group session {session_id} for stream {stream_id}")]
    UnknownSession {
        stream_id: String,
        session_id: String,
    },

    #[error(
        "Inbound group session {session_id} for stream {stream_id} starts at index \
         {first_known_index}, message uses index {requested_index}"
    )]
    UnknownMessageIndex {
        stream_id: String,
        session_id: String,
        first_known_index: u32,
        requested_index: u32,
    },

    #[error("Failed to decrypt message in session {session_id} for stream {stream_id}: {reason}")]
    DecryptionFailed {
        stream_id: String,
        session_id: String,
        reason: String,
    },

    #[error("Session key not found for session {session_id}")]
    MissingSession { session_id: String },

    #[error("Session id mismatch: expected {expected}, got {actual}")]
    SessionIdMismatch { expected: String, actual: String },

    #[error("Stream id mismatch: expected {expected}, got {actual}")]
    StreamIdMismatch { expected: String, actual: String },

    #[error("Missing fields in input: {0}")]
    MissingFields(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Message too long ({length} bytes), the maximum for an encrypted message is {max} bytes")]
    MessageTooLong { length: usize, max: usize },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Olm decryption failed: {0}")]
    OlmDecryption(String),

    #[error("Pickle error: {0}")]
    Pickle(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
}

impl Error {
    /// The message may decrypt later, once the session key (or an earlier
    /// export of it) arrives.
    pub fn is_pending_key(&self) -> bool {
        matches!(
            self,
            Error::UnknownSession { .. } | Error::UnknownMessageIndex { .. }
        )
    }

    /// The session exists but the ciphertext did not authenticate. Retrying
    /// the same ciphertext will not help.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Error::DecryptionFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
