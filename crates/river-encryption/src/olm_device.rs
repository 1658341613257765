use crate::crypto_store::{
    AccountRecord, CryptoStore, HybridSessionRecord, InboundSessionRecord, OutboundSessionRecord,
    OutboundSessionState,
};
use crate::delegate::EncryptionDelegate;
use crate::hybrid_session::HybridGroupSessionKey;
use crate::utils::{check_payload_length, derive_pickle_key, now_millis};
use crate::{
    DecryptedGroupMessage, EncryptedData, EncryptionConfig, Error, FallbackKey,
    GroupEncryptionAlgorithm, GroupEncryptionSession, OutboundSessionKey, Result,
};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};
use vodozemac::megolm::{
    DecryptionError, ExportedSessionKey, GroupSession, GroupSessionPickle, InboundGroupSession,
    InboundGroupSessionPickle, MegolmMessage, SessionKey,
};
use vodozemac::olm::{Account, AccountPickle, OlmMessage, Session};
use vodozemac::Curve25519PublicKey;

/// Ciphertext and the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedGroupMessage {
    pub ciphertext: String,
    pub session_id: String,
}

/// One-to-one Olm message as handed to the key-sharing transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OlmCiphertext {
    pub message_type: usize,
    /// Unpadded base64.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedGroupSession {
    pub stream_id: String,
    pub session_id: String,
    pub session: String,
}

/// Everything needed to recreate a device elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedDevice {
    pub pickle_key: String,
    pub pickled_account: String,
    #[serde(default)]
    pub outbound_sessions: Vec<ExportedGroupSession>,
    #[serde(default)]
    pub inbound_sessions: Vec<ExportedGroupSession>,
    #[serde(default)]
    pub hybrid_sessions: Vec<HybridSessionRecord>,
}

/// The local device: long-term identity plus every group session it knows,
/// persisted through a [`CryptoStore`].
pub struct OlmDevice {
    delegate: Arc<EncryptionDelegate>,
    store: Arc<CryptoStore>,
    user_id: String,
    pickle_secret: String,
    pickle_key: [u8; 32],
    device_curve25519_key: String,
    device_ed25519_key: String,
    account_lock: Mutex<()>,
    group_lock: Mutex<()>,
}

impl OlmDevice {
    /// Load the account of `user_id` from the store, or create and persist a
    /// new one with a fresh fallback key.
    pub fn new(
        delegate: Arc<EncryptionDelegate>,
        store: Arc<CryptoStore>,
        user_id: &str,
        config: &EncryptionConfig,
    ) -> Result<Self> {
        delegate.ensure_initialized()?;
        let pickle_key = derive_pickle_key(&config.pickle_key)?;

        let account = match store.get_account(user_id)? {
            Some(record) => unpickle_account(&record.pickled_account, &pickle_key)?,
            None => {
                let mut account = delegate.create_account()?;
                account.generate_fallback_key();
                store.put_account(
                    user_id,
                    &AccountRecord {
                        user_id: user_id.to_string(),
                        pickled_account: account.pickle().encrypt(&pickle_key),
                    },
                )?;
                info!(user_id = %user_id, "created new device account");
                account
            }
        };

        let device = Self {
            device_curve25519_key: account.curve25519_key().to_base64(),
            device_ed25519_key: account.ed25519_key().to_base64(),
            delegate,
            store,
            user_id: user_id.to_string(),
            pickle_secret: config.pickle_key.clone(),
            pickle_key,
            account_lock: Mutex::new(()),
            group_lock: Mutex::new(()),
        };
        debug!(
            user_id = %device.user_id,
            device_key = %device.device_curve25519_key,
            "device loaded"
        );
        Ok(device)
    }

    /// Recreate a device from [`OlmDevice::export_device`] output on `store`.
    /// The exported pickle key replaces the one in `config`.
    pub fn from_exported_device(
        delegate: Arc<EncryptionDelegate>,
        store: Arc<CryptoStore>,
        user_id: &str,
        exported: &ExportedDevice,
        config: &EncryptionConfig,
    ) -> Result<Self> {
        delegate.ensure_initialized()?;
        let pickle_key = derive_pickle_key(&exported.pickle_key)?;
        // Fail before writing anything if the account does not open.
        unpickle_account(&exported.pickled_account, &pickle_key)?;

        store.put_account(
            user_id,
            &AccountRecord {
                user_id: user_id.to_string(),
                pickled_account: exported.pickled_account.clone(),
            },
        )?;

        let created_at = now_millis();
        for session in &exported.outbound_sessions {
            store.put_outbound_session(
                &session.stream_id,
                &OutboundSessionRecord {
                    stream_id: session.stream_id.clone(),
                    session_id: session.session_id.clone(),
                    pickled_session: session.session.clone(),
                    state: OutboundSessionState::Active,
                    created_at,
                },
            )?;
        }
        for session in &exported.inbound_sessions {
            store.put_inbound_session(
                &session.stream_id,
                &session.session_id,
                &InboundSessionRecord {
                    stream_id: session.stream_id.clone(),
                    session_id: session.session_id.clone(),
                    pickled_session: session.session.clone(),
                    keys_claimed: HashMap::new(),
                },
            )?;
        }
        for session in &exported.hybrid_sessions {
            store.put_hybrid_session(session)?;
        }

        let config = EncryptionConfig {
            pickle_key: exported.pickle_key.clone(),
            ..config.clone()
        };
        Self::new(delegate, store, user_id, &config)
    }

    pub fn export_device(&self) -> Result<ExportedDevice> {
        let account = self
            .store
            .get_account(&self.user_id)?
            .ok_or_else(|| Error::Storage(format!("no account stored for {}", self.user_id)))?;

        let outbound_sessions = self
            .store
            .get_all_outbound_sessions()?
            .into_iter()
            .filter(|r| r.state == OutboundSessionState::Active)
            .map(|r| ExportedGroupSession {
                stream_id: r.stream_id,
                session_id: r.session_id,
                session: r.pickled_session,
            })
            .collect();
        let inbound_sessions = self
            .store
            .get_all_inbound_sessions()?
            .into_iter()
            .map(|r| ExportedGroupSession {
                stream_id: r.stream_id,
                session_id: r.session_id,
                session: r.pickled_session,
            })
            .collect();

        Ok(ExportedDevice {
            pickle_key: self.pickle_secret.clone(),
            pickled_account: account.pickled_account,
            outbound_sessions,
            inbound_sessions,
            hybrid_sessions: self.store.get_all_hybrid_sessions()?,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Curve25519 identity key, unpadded base64. This is the `senderKey` of
    /// everything the device encrypts.
    pub fn device_curve25519_key(&self) -> &str {
        &self.device_curve25519_key
    }

    pub fn device_ed25519_key(&self) -> &str {
        &self.device_ed25519_key
    }

    pub fn delegate(&self) -> &Arc<EncryptionDelegate> {
        &self.delegate
    }

    pub fn store(&self) -> &Arc<CryptoStore> {
        &self.store
    }

    // Account

    fn lock<'a>(&self, lock: &'a Mutex<()>) -> Result<MutexGuard<'a, ()>> {
        lock.lock()
            .map_err(|_| Error::Storage("device lock poisoned".to_string()))
    }

    fn load_account(&self) -> Result<Account> {
        let record = self
            .store
            .get_account(&self.user_id)?
            .ok_or_else(|| Error::Storage(format!("no account stored for {}", self.user_id)))?;
        unpickle_account(&record.pickled_account, &self.pickle_key)
    }

    fn save_account(&self, account: &Account) -> Result<()> {
        self.store.put_account(
            &self.user_id,
            &AccountRecord {
                user_id: self.user_id.clone(),
                pickled_account: account.pickle().encrypt(&self.pickle_key),
            },
        )
    }

    /// Sign `message` with the account's Ed25519 key, unpadded base64.
    pub fn sign(&self, message: &str) -> Result<String> {
        let account = self.load_account()?;
        Ok(account.sign(message.as_bytes()).to_base64())
    }

    /// The current unpublished fallback key.
    pub fn fallback_key(&self) -> Result<FallbackKey> {
        let account = self.load_account()?;
        first_fallback_key(&account)
            .ok_or_else(|| Error::InvalidKey("account has no unpublished fallback key".to_string()))
    }

    pub fn generate_fallback_key_if_needed(&self) -> Result<()> {
        let _guard = self.lock(&self.account_lock)?;
        let mut account = self.load_account()?;
        if first_fallback_key(&account).is_some() {
            return Ok(());
        }
        account.generate_fallback_key();
        self.save_account(&account)?;
        debug!(user_id = %self.user_id, "generated fallback key");
        Ok(())
    }

    pub fn forget_old_fallback_key(&self) -> Result<()> {
        let _guard = self.lock(&self.account_lock)?;
        let mut account = self.load_account()?;
        if account.forget_fallback_key() {
            self.save_account(&account)?;
        }
        Ok(())
    }

    pub fn mark_keys_as_published(&self) -> Result<()> {
        let _guard = self.lock(&self.account_lock)?;
        let mut account = self.load_account()?;
        account.mark_keys_as_published();
        self.save_account(&account)
    }

    // One-to-one channel used to ship session keys.

    pub fn create_olm_session(&self, their_identity_key: &str, their_fallback_key: &str) -> Result<Session> {
        let account = self.load_account()?;
        self.delegate
            .create_session(&account, their_identity_key, their_fallback_key)
    }

    pub fn encrypt_using_fallback_key(
        &self,
        their_identity_key: &str,
        their_fallback_key: &str,
        payload: &str,
    ) -> Result<OlmCiphertext> {
        check_payload_length(payload)?;
        let mut session = self.create_olm_session(their_identity_key, their_fallback_key)?;
        let (message_type, ciphertext) = session.encrypt(payload).to_parts();
        Ok(OlmCiphertext {
            message_type,
            body: STANDARD_NO_PAD.encode(ciphertext),
        })
    }

    /// Decrypt a pre-key message sent to our fallback key.
    pub fn decrypt_message(&self, their_identity_key: &str, message: &OlmCiphertext) -> Result<String> {
        check_payload_length(&message.body)?;
        let identity_key = Curve25519PublicKey::from_base64(their_identity_key)
            .map_err(|e| Error::InvalidKey(e.to_string()))?;
        let body = STANDARD_NO_PAD
            .decode(&message.body)
            .map_err(|e| Error::OlmDecryption(e.to_string()))?;
        let pre_key = match OlmMessage::from_parts(message.message_type, &body) {
            Ok(OlmMessage::PreKey(m)) => m,
            Ok(OlmMessage::Normal(_)) => {
                return Err(Error::OlmDecryption("only pre-key messages are supported".to_string()))
            }
            Err(e) => return Err(Error::OlmDecryption(e.to_string())),
        };

        let _guard = self.lock(&self.account_lock)?;
        let mut account = self.load_account()?;
        let result = account
            .create_inbound_session(identity_key, &pre_key)
            .map_err(|e| Error::OlmDecryption(e.to_string()))?;
        self.save_account(&account)?;
        debug!(session_id = %result.session.session_id(), "opened inbound olm session");

        String::from_utf8(result.plaintext).map_err(|e| Error::OlmDecryption(e.to_string()))
    }

    // Outbound group sessions

    fn load_outbound(&self, stream_id: &str) -> Result<(OutboundSessionRecord, GroupSession)> {
        let record = match self.store.get_outbound_session(stream_id)? {
            Some(r) if r.state == OutboundSessionState::Active => r,
            _ => {
                return Err(Error::NoSession {
                    stream_id: stream_id.to_string(),
                })
            }
        };
        let pickle = GroupSessionPickle::from_encrypted(&record.pickled_session, &self.pickle_key)
            .map_err(|e| Error::Pickle(e.to_string()))?;
        Ok((record, GroupSession::from_pickle(pickle)))
    }

    fn save_outbound(&self, stream_id: &str, session: &GroupSession, created_at: u64) -> Result<()> {
        self.store.put_outbound_session(
            stream_id,
            &OutboundSessionRecord {
                stream_id: stream_id.to_string(),
                session_id: session.session_id(),
                pickled_session: session.pickle().encrypt(&self.pickle_key),
                state: OutboundSessionState::Active,
                created_at,
            },
        )
    }

    /// Key material of the active outbound session, or [`Error::NoSession`].
    pub fn get_outbound_group_session_key(&self, stream_id: &str) -> Result<OutboundSessionKey> {
        let (_, session) = self.load_outbound(stream_id)?;
        Ok(OutboundSessionKey {
            session_id: session.session_id(),
            message_index: session.message_index(),
            key: session.session_key().to_base64(),
        })
    }

    /// Create and persist a new outbound session for `stream_id`, replacing any
    /// previous one. An inbound copy at index 0 is stored alongside so the
    /// session can be exported from its first message.
    pub fn create_outbound_group_session(&self, stream_id: &str) -> Result<String> {
        let session = self.delegate.create_outbound_group_session()?;
        let inbound = self
            .delegate
            .create_inbound_group_session(&session.session_key())?;
        let session_id = session.session_id();

        let _guard = self.lock(&self.group_lock)?;
        self.save_outbound(stream_id, &session, now_millis())?;
        self.store.put_inbound_session(
            stream_id,
            &session_id,
            &InboundSessionRecord {
                stream_id: stream_id.to_string(),
                session_id: session_id.clone(),
                pickled_session: inbound.pickle().encrypt(&self.pickle_key),
                keys_claimed: HashMap::new(),
            },
        )?;

        info!(stream_id = %stream_id, session_id = %session_id, "created outbound group session");
        Ok(session_id)
    }

    /// Mark the stream's outbound session retired. Returns whether an active
    /// session was retired.
    pub fn retire_outbound_group_session(&self, stream_id: &str) -> Result<bool> {
        let _guard = self.lock(&self.group_lock)?;
        let Some(mut record) = self.store.get_outbound_session(stream_id)? else {
            return Ok(false);
        };
        if record.state == OutboundSessionState::Retired {
            return Ok(false);
        }
        record.state = OutboundSessionState::Retired;
        self.store.put_outbound_session(stream_id, &record)?;
        info!(stream_id = %stream_id, session_id = %record.session_id, "retired outbound group session");
        Ok(true)
    }

    /// Encrypt under the active outbound session. The advanced ratchet is
    /// persisted before the ciphertext is returned.
    pub fn encrypt_group_message(&self, payload: &str, stream_id: &str) -> Result<EncryptedGroupMessage> {
        check_payload_length(payload)?;

        let _guard = self.lock(&self.group_lock)?;
        let (record, mut session) = self.load_outbound(stream_id)?;
        let ciphertext = session.encrypt(payload).to_base64();
        self.save_outbound(stream_id, &session, record.created_at)?;

        Ok(EncryptedGroupMessage {
            ciphertext,
            session_id: session.session_id(),
        })
    }

    // Inbound group sessions

    fn unpickle_inbound(&self, record: &InboundSessionRecord) -> Result<InboundGroupSession> {
        let pickle =
            InboundGroupSessionPickle::from_encrypted(&record.pickled_session, &self.pickle_key)
                .map_err(|e| Error::Pickle(e.to_string()))?;
        Ok(InboundGroupSession::from_pickle(pickle))
    }

    fn export_record(&self, record: &InboundSessionRecord) -> Result<Option<GroupEncryptionSession>> {
        let mut session = self.unpickle_inbound(record)?;
        let index = session.first_known_index();
        Ok(session.export_at(index).map(|key| GroupEncryptionSession {
            stream_id: record.stream_id.clone(),
            session_id: record.session_id.clone(),
            session_key: key.to_base64(),
            algorithm: GroupEncryptionAlgorithm::Megolm,
        }))
    }

    /// Export of a known session at its first known index, for sharing.
    pub fn export_inbound_group_session(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<Option<GroupEncryptionSession>> {
        match self.store.get_inbound_session(stream_id, session_id)? {
            Some(record) => self.export_record(&record),
            None => Ok(None),
        }
    }

    pub fn export_inbound_group_sessions(&self) -> Result<Vec<GroupEncryptionSession>> {
        let mut exported = Vec::new();
        for record in self.store.get_all_inbound_sessions()? {
            if let Some(session) = self.export_record(&record)? {
                exported.push(session);
            }
        }
        Ok(exported)
    }

    /// Store a session received from a peer. `session_key` may be an export
    /// or a signed session key. Returns `false` if the session was already
    /// known, in which case the stored copy is kept.
    pub fn add_inbound_group_session(
        &self,
        stream_id: &str,
        session_id: &str,
        session_key: &str,
        keys_claimed: HashMap<String, String>,
    ) -> Result<bool> {
        let session = self.parse_inbound_session_key(session_key)?;
        if session.session_id() != session_id {
            return Err(Error::SessionIdMismatch {
                expected: session_id.to_string(),
                actual: session.session_id(),
            });
        }

        let record = InboundSessionRecord {
            stream_id: stream_id.to_string(),
            session_id: session_id.to_string(),
            pickled_session: session.pickle().encrypt(&self.pickle_key),
            keys_claimed,
        };

        let _guard = self.lock(&self.group_lock)?;
        let stored = self.store.put_inbound_session(stream_id, session_id, &record)?;
        if stored {
            debug!(
                stream_id = %stream_id,
                session_id = %session_id,
                first_known_index = session.first_known_index(),
                "stored inbound group session"
            );
        } else {
            debug!(stream_id = %stream_id, session_id = %session_id, "keeping existing inbound group session");
        }
        Ok(stored)
    }

    fn parse_inbound_session_key(&self, session_key: &str) -> Result<InboundGroupSession> {
        if let Ok(exported) = ExportedSessionKey::from_base64(session_key) {
            return self.delegate.import_inbound_group_session(&exported);
        }
        let key = SessionKey::from_base64(session_key)
            .map_err(|e| Error::InvalidKey(format!("group session key: {e}")))?;
        self.delegate.create_inbound_group_session(&key)
    }

    pub fn has_inbound_session_keys(&self, stream_id: &str, session_id: &str) -> Result<bool> {
        match self.store.get_inbound_session(stream_id, session_id)? {
            Some(record) if record.stream_id == stream_id => Ok(true),
            Some(record) => {
                warn!(
                    session_id = %session_id,
                    expected = %record.stream_id,
                    actual = %stream_id,
                    "inbound session requested with wrong stream id"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub fn inbound_group_session_ids(&self, stream_id: &str) -> Result<Vec<String>> {
        self.store.get_inbound_session_ids(stream_id)
    }

    /// Decrypt a group message with the inbound session `(stream_id,
    /// data.session_id)`. The stored session is not advanced, so older
    /// messages of the same session stay decryptable.
    pub fn decrypt_group_message(
        &self,
        stream_id: &str,
        data: &EncryptedData,
    ) -> Result<DecryptedGroupMessage> {
        let record = self
            .store
            .get_inbound_session(stream_id, &data.session_id)?
            .ok_or_else(|| Error::UnknownSession {
                stream_id: stream_id.to_string(),
                session_id: data.session_id.clone(),
            })?;
        if record.stream_id != stream_id {
            return Err(Error::StreamIdMismatch {
                expected: record.stream_id,
                actual: stream_id.to_string(),
            });
        }

        let failed = |reason: String| Error::DecryptionFailed {
            stream_id: stream_id.to_string(),
            session_id: data.session_id.clone(),
            reason,
        };

        let message = MegolmMessage::from_base64(&data.ciphertext).map_err(|e| failed(e.to_string()))?;
        let mut session = self.unpickle_inbound(&record)?;
        let decrypted = session.decrypt(&message).map_err(|e| match e {
            DecryptionError::UnknownMessageIndex(first_known_index, requested_index) => {
                Error::UnknownMessageIndex {
                    stream_id: stream_id.to_string(),
                    session_id: data.session_id.clone(),
                    first_known_index,
                    requested_index,
                }
            }
            other => failed(other.to_string()),
        })?;

        let plaintext = String::from_utf8(decrypted.plaintext)
            .map_err(|_| failed("plaintext is not valid utf-8".to_string()))?;

        Ok(DecryptedGroupMessage {
            plaintext,
            message_index: decrypted.message_index,
            keys_claimed: record.keys_claimed,
        })
    }

    // Hybrid group sessions

    pub fn create_hybrid_group_session(
        &self,
        stream_id: &str,
        miniblock_num: u64,
        miniblock_hash: &[u8],
    ) -> Result<HybridGroupSessionKey> {
        self.delegate.ensure_initialized()?;
        let key = HybridGroupSessionKey::generate(stream_id, miniblock_num, miniblock_hash)?;
        let record = HybridSessionRecord {
            stream_id: stream_id.to_string(),
            session_id: key.session_id_hex(),
            session_key: key.to_hex()?,
            miniblock_num,
        };

        let _guard = self.lock(&self.group_lock)?;
        self.store.put_hybrid_session(&record)?;
        info!(stream_id = %stream_id, session_id = %record.session_id, "created hybrid group session");
        Ok(key)
    }

    /// Store a hybrid key received from a peer after checking that it is
    /// bound to `stream_id` and hashes to `session_id`.
    pub fn add_hybrid_group_session(&self, stream_id: &str, session_id: &str, session_key: &str) -> Result<()> {
        let key = HybridGroupSessionKey::from_hex(session_key)?;
        if key.stream_id_hex() != stream_id {
            return Err(Error::StreamIdMismatch {
                expected: stream_id.to_string(),
                actual: key.stream_id_hex(),
            });
        }
        if key.session_id_hex() != session_id {
            return Err(Error::SessionIdMismatch {
                expected: session_id.to_string(),
                actual: key.session_id_hex(),
            });
        }
        key.verify()?;

        let _guard = self.lock(&self.group_lock)?;
        self.store.put_hybrid_session(&HybridSessionRecord {
            stream_id: stream_id.to_string(),
            session_id: session_id.to_string(),
            session_key: session_key.to_string(),
            miniblock_num: key.miniblock_num,
        })
    }

    pub fn get_hybrid_group_session_key(&self, stream_id: &str, session_id: &str) -> Result<HybridGroupSessionKey> {
        let record = self
            .store
            .get_hybrid_session(stream_id, session_id)?
            .ok_or_else(|| Error::UnknownSession {
                stream_id: stream_id.to_string(),
                session_id: session_id.to_string(),
            })?;
        HybridGroupSessionKey::from_hex(&record.session_key)
    }

    /// The stream's hybrid key with the highest miniblock number.
    pub fn get_hybrid_group_session_key_for_stream(&self, stream_id: &str) -> Result<HybridGroupSessionKey> {
        let record = self
            .store
            .get_hybrid_sessions_for_stream(stream_id)?
            .into_iter()
            .max_by_key(|r| r.miniblock_num)
            .ok_or_else(|| Error::NoSession {
                stream_id: stream_id.to_string(),
            })?;
        HybridGroupSessionKey::from_hex(&record.session_key)
    }

    pub fn has_hybrid_group_session_key(&self, stream_id: &str, session_id: &str) -> Result<bool> {
        Ok(self.store.get_hybrid_session(stream_id, session_id)?.is_some())
    }

    pub fn hybrid_group_session_ids(&self, stream_id: &str) -> Result<Vec<String>> {
        Ok(self
            .store
            .get_hybrid_sessions_for_stream(stream_id)?
            .into_iter()
            .map(|r| r.session_id)
            .collect())
    }

    pub fn export_hybrid_group_session(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<Option<GroupEncryptionSession>> {
        Ok(self
            .store
            .get_hybrid_session(stream_id, session_id)?
            .map(hybrid_record_to_session))
    }

    pub fn export_hybrid_group_sessions(&self) -> Result<Vec<GroupEncryptionSession>> {
        Ok(self
            .store
            .get_all_hybrid_sessions()?
            .into_iter()
            .map(hybrid_record_to_session)
            .collect())
    }
}

fn unpickle_account(pickled: &str, pickle_key: &[u8; 32]) -> Result<Account> {
    let pickle = AccountPickle::from_encrypted(pickled, pickle_key)
        .map_err(|e| Error::Pickle(format!("account: {e}")))?;
    Ok(Account::from_pickle(pickle))
}

fn first_fallback_key(account: &Account) -> Option<FallbackKey> {
    account
        .fallback_key()
        .into_iter()
        .next()
        .map(|(key_id, key)| FallbackKey {
            key_id: key_id.to_base64(),
            key: key.to_base64(),
        })
}

fn hybrid_record_to_session(record: HybridSessionRecord) -> GroupEncryptionSession {
    GroupEncryptionSession {
        stream_id: record.stream_id,
        session_id: record.session_id,
        session_key: record.session_key,
        algorithm: GroupEncryptionAlgorithm::HybridGroup,
    }
}
