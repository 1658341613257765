use crate::olm_device::OlmDevice;
use crate::transport::{DeviceDirectory, EncryptionEvent, SessionTransport};
use crate::utils::check_payload_length;
use crate::{EncryptedData, Error, Result, MEGOLM_ALGORITHM};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

/// Everything the detached share task needs, cheap to clone into it.
#[derive(Clone)]
struct SessionSharer {
    device: Arc<OlmDevice>,
    directory: Arc<dyn DeviceDirectory>,
    transport: Arc<dyn SessionTransport>,
    events: Option<crossbeam_channel::Sender<EncryptionEvent>>,
}

impl SessionSharer {
    fn emit(&self, event: EncryptionEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is listening.
            let _ = tx.send(event);
        }
    }

    async fn share(&self, stream_id: &str, session_id: &str) -> Result<usize> {
        let devices = self.directory.get_devices_in_stream(stream_id).await?;
        let session = self
            .device
            .export_inbound_group_session(stream_id, session_id)?
            .ok_or_else(|| Error::MissingSession {
                session_id: session_id.to_string(),
            })?;

        let device_count = devices.values().map(Vec::len).sum();
        self.transport
            .encrypt_and_share_megolm_sessions(stream_id, vec![session], devices)
            .await?;
        Ok(device_count)
    }

    async fn share_and_report(self, stream_id: String, session_id: String) {
        match self.share(&stream_id, &session_id).await {
            Ok(device_count) => {
                info!(
                    stream_id = %stream_id,
                    session_id = %session_id,
                    device_count,
                    "shared group session"
                );
                self.emit(EncryptionEvent::SessionShared {
                    stream_id,
                    session_id,
                    device_count,
                });
            }
            Err(e) => {
                error!(
                    stream_id = %stream_id,
                    session_id = %session_id,
                    error = %e,
                    "failed to share group session"
                );
                self.emit(EncryptionEvent::ShareFailed {
                    stream_id,
                    session_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Per-stream sender side: makes sure a session exists, shares new sessions
/// in the background and encrypts payloads.
pub struct MegolmEncryption {
    sharer: SessionSharer,
    stream_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MegolmEncryption {
    pub fn new(
        device: Arc<OlmDevice>,
        directory: Arc<dyn DeviceDirectory>,
        transport: Arc<dyn SessionTransport>,
    ) -> Self {
        Self {
            sharer: SessionSharer {
                device,
                directory,
                transport,
                events: None,
            },
            stream_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Report session lifecycle and background share results on `events`.
    pub fn with_events(mut self, events: crossbeam_channel::Sender<EncryptionEvent>) -> Self {
        self.sharer.events = Some(events);
        self
    }

    pub fn device(&self) -> &Arc<OlmDevice> {
        &self.sharer.device
    }

    fn stream_lock(&self, stream_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .stream_locks
            .lock()
            .map_err(|_| Error::Storage("stream lock table poisoned".to_string()))?;
        Ok(locks.entry(stream_id.to_string()).or_default().clone())
    }

    /// Drop the table entry once nobody else holds or waits on it.
    fn release_stream_lock(&self, stream_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut locks) = self.stream_locks.lock() {
            let ours = locks
                .get(stream_id)
                .is_some_and(|entry| Arc::ptr_eq(entry, &lock));
            if ours && Arc::strong_count(&lock) == 2 {
                locks.remove(stream_id);
            }
        }
    }

    /// Run `f` while holding the per-stream lock of `stream_id`.
    async fn with_stream_lock<T>(&self, stream_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.stream_lock(stream_id)?;
        let result = {
            let _guard = lock.lock().await;
            f()
        };
        self.release_stream_lock(stream_id, lock);
        result
    }

    /// Caller holds the stream lock.
    fn ensure_session_locked(&self, stream_id: &str) -> Result<String> {
        match self.sharer.device.get_outbound_group_session_key(stream_id) {
            Ok(key) => return Ok(key.session_id),
            Err(Error::NoSession { .. }) => {}
            Err(e) => return Err(e),
        }

        let session_id = self.sharer.device.create_outbound_group_session(stream_id)?;
        self.sharer.emit(EncryptionEvent::SessionCreated {
            stream_id: stream_id.to_string(),
            session_id: session_id.clone(),
        });

        tokio::spawn(
            self.sharer
                .clone()
                .share_and_report(stream_id.to_string(), session_id.clone()),
        );
        Ok(session_id)
    }

    /// Return the active session of `stream_id`, creating one if needed. A new
    /// session is persisted before this returns; sharing it runs detached.
    pub async fn ensure_outbound_session(&self, stream_id: &str) -> Result<String> {
        self.with_stream_lock(stream_id, || self.ensure_session_locked(stream_id))
            .await
    }

    /// Warm up a stream before its first send.
    pub async fn prepare_session(&self, stream_id: &str) -> Result<String> {
        self.ensure_outbound_session(stream_id).await
    }

    pub async fn encrypt(&self, stream_id: &str, payload: &str) -> Result<EncryptedData> {
        check_payload_length(payload)?;
        // One guard covers ensure and encrypt; a discard waits for both.
        let message = self
            .with_stream_lock(stream_id, || {
                self.ensure_session_locked(stream_id)?;
                self.sharer.device.encrypt_group_message(payload, stream_id)
            })
            .await?;
        debug!(stream_id = %stream_id, session_id = %message.session_id, "encrypted group message");

        Ok(EncryptedData {
            algorithm: MEGOLM_ALGORITHM.to_string(),
            sender_key: self.sharer.device.device_curve25519_key().to_string(),
            ciphertext: message.ciphertext,
            session_id: message.session_id,
        })
    }

    /// Share `session_id` with the stream's current devices and wait for the
    /// transport. Returns the number of devices targeted.
    pub async fn share_session(&self, stream_id: &str, session_id: &str) -> Result<usize> {
        self.sharer.share(stream_id, session_id).await
    }

    /// Retire the stream's outbound session; the next send creates a new one.
    pub async fn discard_session(&self, stream_id: &str) -> Result<bool> {
        self.with_stream_lock(stream_id, || {
            self.sharer.device.retire_outbound_group_session(stream_id)
        })
        .await
    }
}
