use crate::olm_device::OlmDevice;
use crate::{
    DecryptedGroupMessage, EncryptedData, EncryptionConfig, Error, GroupEncryptionAlgorithm,
    GroupEncryptionSession, Result, MEGOLM_ALGORITHM,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

type PendingKey = (String, String);

/// Messages waiting for their session, keyed by `(stream, session)`.
#[derive(Default)]
struct PendingQueue {
    messages: HashMap<PendingKey, VecDeque<EncryptedData>>,
    /// Keys in the order they were first queued.
    order: VecDeque<PendingKey>,
}

impl PendingQueue {
    fn take(&mut self, key: &PendingKey) -> VecDeque<EncryptedData> {
        self.order.retain(|k| k != key);
        self.messages.remove(key).unwrap_or_default()
    }

    /// Drop `data` from its queue once it has been decrypted.
    fn forget(&mut self, key: &PendingKey, data: &EncryptedData) {
        let now_empty = match self.messages.get_mut(key) {
            Some(queue) => {
                queue.retain(|queued| queued != data);
                queue.is_empty()
            }
            None => return,
        };
        if now_empty {
            self.take(key);
        }
    }
}

/// Receiver side: decrypts stream messages and parks the ones whose keys
/// have not arrived yet until [`MegolmDecryption::import_session_keys`].
pub struct MegolmDecryption {
    device: Arc<OlmDevice>,
    max_pending_per_session: usize,
    max_pending_sessions: usize,
    pending: Mutex<PendingQueue>,
}

impl MegolmDecryption {
    pub fn new(device: Arc<OlmDevice>, config: &EncryptionConfig) -> Self {
        Self {
            device,
            max_pending_per_session: config.max_pending_per_session,
            max_pending_sessions: config.max_pending_sessions,
            pending: Mutex::new(PendingQueue::default()),
        }
    }

    pub fn device(&self) -> &Arc<OlmDevice> {
        &self.device
    }

    fn pending(&self) -> Result<MutexGuard<'_, PendingQueue>> {
        self.pending
            .lock()
            .map_err(|_| Error::Storage("pending queue lock poisoned".to_string()))
    }

    pub fn decrypt(&self, stream_id: &str, data: &EncryptedData) -> Result<String> {
        self.decrypt_message(stream_id, data).map(|m| m.plaintext)
    }

    /// Like [`MegolmDecryption::decrypt`] but keeps the message index and the
    /// keys claimed by the session.
    pub fn decrypt_message(&self, stream_id: &str, data: &EncryptedData) -> Result<DecryptedGroupMessage> {
        validate(data)?;

        match self.device.decrypt_group_message(stream_id, data) {
            Ok(message) => {
                if let Ok(mut pending) = self.pending() {
                    pending.forget(&(stream_id.to_string(), data.session_id.clone()), data);
                }
                Ok(message)
            }
            Err(e) if e.is_pending_key() => {
                debug!(
                    stream_id = %stream_id,
                    session_id = %data.session_id,
                    error = %e,
                    "waiting for session key"
                );
                self.queue_pending(stream_id, data)?;
                Err(e)
            }
            Err(e) => {
                warn!(
                    stream_id = %stream_id,
                    session_id = %data.session_id,
                    error = %e,
                    "failed to decrypt group message"
                );
                Err(e)
            }
        }
    }

    /// Decrypt every message independently; one bad message does not stop
    /// the rest.
    pub fn decrypt_batch(&self, stream_id: &str, messages: &[EncryptedData]) -> Vec<Result<String>> {
        messages
            .iter()
            .map(|data| self.decrypt(stream_id, data))
            .collect()
    }

    fn queue_pending(&self, stream_id: &str, data: &EncryptedData) -> Result<()> {
        let key = (stream_id.to_string(), data.session_id.clone());
        let mut guard = self.pending()?;
        let pending = &mut *guard;

        if !pending.messages.contains_key(&key) {
            while pending.order.len() >= self.max_pending_sessions.max(1) {
                let Some(oldest) = pending.order.pop_front() else {
                    break;
                };
                let dropped = pending.messages.remove(&oldest).map_or(0, |q| q.len());
                warn!(
                    stream_id = %oldest.0,
                    session_id = %oldest.1,
                    dropped,
                    "too many sessions pending, evicting oldest"
                );
            }
            pending.order.push_back(key.clone());
        }

        let queue = pending.messages.entry(key).or_default();
        if queue.contains(data) {
            return Ok(());
        }
        if queue.len() >= self.max_pending_per_session {
            queue.pop_front();
            warn!(
                stream_id = %stream_id,
                session_id = %data.session_id,
                "pending queue full, dropping oldest message"
            );
        }
        queue.push_back(data.clone());
        Ok(())
    }

    pub fn pending_count(&self, stream_id: &str, session_id: &str) -> usize {
        self.pending()
            .map(|p| {
                p.messages
                    .get(&(stream_id.to_string(), session_id.to_string()))
                    .map_or(0, VecDeque::len)
            })
            .unwrap_or(0)
    }

    /// Number of sessions that currently have queued messages.
    pub fn pending_session_count(&self) -> usize {
        self.pending().map(|p| p.messages.len()).unwrap_or(0)
    }

    /// Store received sessions, then retry the messages that were waiting on
    /// them. A session that fails to import is logged and skipped.
    pub fn import_session_keys(
        &self,
        sessions: &[GroupEncryptionSession],
    ) -> Result<Vec<(EncryptedData, Result<String>)>> {
        let mut ready: Vec<PendingKey> = Vec::new();
        let mut seen = HashSet::new();

        for session in sessions {
            let imported = match session.algorithm {
                GroupEncryptionAlgorithm::Megolm => self
                    .device
                    .add_inbound_group_session(
                        &session.stream_id,
                        &session.session_id,
                        &session.session_key,
                        HashMap::new(),
                    )
                    .map(|_| true),
                GroupEncryptionAlgorithm::HybridGroup => self
                    .device
                    .add_hybrid_group_session(
                        &session.stream_id,
                        &session.session_id,
                        &session.session_key,
                    )
                    .map(|_| false),
            };
            match imported {
                Ok(true) => {
                    let key = (session.stream_id.clone(), session.session_id.clone());
                    if seen.insert(key.clone()) {
                        ready.push(key);
                    }
                }
                Ok(false) => {}
                Err(e) => warn!(
                    stream_id = %session.stream_id,
                    session_id = %session.session_id,
                    error = %e,
                    "failed to import session key"
                ),
            }
        }

        let mut retried = Vec::new();
        for key in ready {
            let queued = self.pending()?.take(&key);
            for data in queued {
                let result = self.decrypt(&key.0, &data);
                retried.push((data, result));
            }
        }
        Ok(retried)
    }
}

fn validate(data: &EncryptedData) -> Result<()> {
    let mut missing = Vec::new();
    if data.sender_key.is_empty() {
        missing.push("senderKey");
    }
    if data.session_id.is_empty() {
        missing.push("sessionId");
    }
    if data.ciphertext.is_empty() {
        missing.push("ciphertext");
    }
    if !missing.is_empty() {
        return Err(Error::MissingFields(missing.join(", ")));
    }
    if data.algorithm != MEGOLM_ALGORITHM {
        return Err(Error::UnsupportedAlgorithm(data.algorithm.clone()));
    }
    Ok(())
}
