pub mod config;
pub mod crypto_store;
pub mod delegate;
pub mod device_list;
pub mod error;
pub mod file_storage;
pub mod hybrid_session;
pub mod megolm_decryption;
pub mod megolm_encryption;
pub mod olm_device;
pub mod pk;
pub mod storage;
pub mod transport;
pub mod types;
pub mod utils;

pub use config::EncryptionConfig;
pub use crypto_store::{
    AccountRecord, CryptoStore, HybridSessionRecord, InboundSessionRecord, OutboundSessionRecord,
    OutboundSessionState,
};
pub use delegate::EncryptionDelegate;
pub use device_list::{DeviceList, StreamMembership};
pub use error::{Error, Result};
pub use file_storage::FileStorageAdapter;
pub use hybrid_session::HybridGroupSessionKey;
pub use megolm_decryption::MegolmDecryption;
pub use megolm_encryption::MegolmEncryption;
pub use olm_device::{
    EncryptedGroupMessage, ExportedDevice, ExportedGroupSession, OlmCiphertext, OlmDevice,
};
pub use pk::{PkDecryption, PkEncryption, PkMessage, PkSigning, Utility};
pub use storage::{InMemoryStorage, StorageAdapter};
pub use transport::{
    open_session_key_envelope, ChannelSessionTransport, DeviceDirectory, EncryptionEvent,
    SessionKeyBundle, SessionKeyEnvelope, SessionTransport,
};
pub use types::*;
