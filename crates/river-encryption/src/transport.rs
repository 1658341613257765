use crate::olm_device::{OlmCiphertext, OlmDevice};
use crate::{Error, GroupEncryptionSession, Result, UserDeviceCollection};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of the devices a stream's sessions must reach.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Current member devices of `stream_id`, keyed by user id.
    async fn get_devices_in_stream(&self, stream_id: &str) -> Result<UserDeviceCollection>;
}

/// Delivers exported sessions to devices. One call covers the whole device
/// set; per-device failures stay inside the transport.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn encrypt_and_share_megolm_sessions(
        &self,
        stream_id: &str,
        sessions: Vec<GroupEncryptionSession>,
        devices: UserDeviceCollection,
    ) -> Result<()>;
}

/// Emitted by [`crate::MegolmEncryption`] so callers can observe work that
/// happens off the send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionEvent {
    SessionCreated {
        stream_id: String,
        session_id: String,
    },
    SessionShared {
        stream_id: String,
        session_id: String,
        device_count: usize,
    },
    ShareFailed {
        stream_id: String,
        session_id: String,
        error: String,
    },
}

/// Plaintext of a to-device key message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyBundle {
    pub stream_id: String,
    pub sessions: Vec<GroupEncryptionSession>,
}

/// One encrypted key bundle addressed to one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyEnvelope {
    pub user_id: String,
    pub device_key: String,
    pub sender_key: String,
    pub stream_id: String,
    pub ciphertext: OlmCiphertext,
}

/// Transport that encrypts bundles with the local device and hands the
/// envelopes to a channel; the receiver posts them wherever they need to go.
pub struct ChannelSessionTransport {
    device: Arc<OlmDevice>,
    outbox: crossbeam_channel::Sender<SessionKeyEnvelope>,
}

impl ChannelSessionTransport {
    pub fn new(device: Arc<OlmDevice>, outbox: crossbeam_channel::Sender<SessionKeyEnvelope>) -> Self {
        Self { device, outbox }
    }
}

#[async_trait]
impl SessionTransport for ChannelSessionTransport {
    async fn encrypt_and_share_megolm_sessions(
        &self,
        stream_id: &str,
        sessions: Vec<GroupEncryptionSession>,
        devices: UserDeviceCollection,
    ) -> Result<()> {
        let bundle = serde_json::to_string(&SessionKeyBundle {
            stream_id: stream_id.to_string(),
            sessions,
        })?;

        let own_key = self.device.device_curve25519_key();
        for (user_id, user_devices) in devices {
            for device in user_devices {
                if device.device_key == own_key {
                    continue;
                }
                let ciphertext = match self.device.encrypt_using_fallback_key(
                    &device.device_key,
                    &device.fallback_key,
                    &bundle,
                ) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(
                            stream_id = %stream_id,
                            user_id = %user_id,
                            device_key = %device.device_key,
                            error = %e,
                            "skipping device"
                        );
                        continue;
                    }
                };
                self.outbox
                    .send(SessionKeyEnvelope {
                        user_id: user_id.clone(),
                        device_key: device.device_key,
                        sender_key: own_key.to_string(),
                        stream_id: stream_id.to_string(),
                        ciphertext,
                    })
                    .map_err(|_| Error::Transport("session key outbox closed".to_string()))?;
            }
        }
        debug!(stream_id = %stream_id, "queued session key envelopes");
        Ok(())
    }
}

/// Decrypt an envelope addressed to `device` and return the sessions inside.
pub fn open_session_key_envelope(
    device: &OlmDevice,
    envelope: &SessionKeyEnvelope,
) -> Result<Vec<GroupEncryptionSession>> {
    let plaintext = device.decrypt_message(&envelope.sender_key, &envelope.ciphertext)?;
    let bundle: SessionKeyBundle = serde_json::from_str(&plaintext)?;
    if bundle.stream_id != envelope.stream_id {
        return Err(Error::StreamIdMismatch {
            expected: envelope.stream_id.clone(),
            actual: bundle.stream_id,
        });
    }
    Ok(bundle.sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CryptoStore, EncryptionConfig, EncryptionDelegate, UserDevice};
    use std::collections::HashMap;

    fn device(delegate: &Arc<EncryptionDelegate>, user_id: &str) -> Arc<OlmDevice> {
        Arc::new(
            OlmDevice::new(
                delegate.clone(),
                Arc::new(CryptoStore::in_memory()),
                user_id,
                &EncryptionConfig::default(),
            )
            .unwrap(),
        )
    }

    fn user_device(device: &OlmDevice) -> UserDevice {
        UserDevice {
            device_key: device.device_curve25519_key().to_string(),
            fallback_key: device.fallback_key().unwrap().key,
        }
    }

    #[tokio::test]
    async fn envelopes_open_on_the_receiving_device() {
        let delegate = Arc::new(EncryptionDelegate::new());
        delegate.init().unwrap();
        let alice = device(&delegate, "alice");
        let bob = device(&delegate, "bob");

        let session_id = alice.create_outbound_group_session("chan-1").unwrap();
        let exported = alice
            .export_inbound_group_session("chan-1", &session_id)
            .unwrap()
            .unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        let transport = ChannelSessionTransport::new(alice.clone(), tx);

        let mut devices = HashMap::new();
        devices.insert("alice".to_string(), vec![user_device(&alice)]);
        devices.insert(
            "bob".to_string(),
            vec![
                user_device(&bob),
                UserDevice {
                    device_key: "garbage".to_string(),
                    fallback_key: "garbage".to_string(),
                },
            ],
        );

        transport
            .encrypt_and_share_megolm_sessions("chan-1", vec![exported.clone()], devices)
            .await
            .unwrap();

        // Own device and the broken device are skipped.
        let envelopes: Vec<_> = rx.try_iter().collect();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].user_id, "bob");

        let sessions = open_session_key_envelope(&bob, &envelopes[0]).unwrap();
        assert_eq!(sessions, vec![exported]);
    }

    #[tokio::test]
    async fn closed_outbox_is_a_transport_error() {
        let delegate = Arc::new(EncryptionDelegate::new());
        delegate.init().unwrap();
        let alice = device(&delegate, "alice");
        let bob = device(&delegate, "bob");

        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let transport = ChannelSessionTransport::new(alice, tx);

        let mut devices = HashMap::new();
        devices.insert("bob".to_string(), vec![user_device(&bob)]);
        let result = transport
            .encrypt_and_share_megolm_sessions("chan-1", Vec::new(), devices)
            .await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
