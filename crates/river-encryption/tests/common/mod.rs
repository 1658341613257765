#![allow(dead_code)]

use async_trait::async_trait;
use river_encryption::{
    CryptoStore, DeviceDirectory, EncryptedData, EncryptionConfig, EncryptionDelegate,
    EncryptionEvent, Error, GroupEncryptionSession, InMemoryStorage, MegolmDecryption,
    MegolmEncryption, OlmDevice, Result, SessionTransport, StorageAdapter, UserDevice,
    UserDeviceCollection,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn delegate() -> Arc<EncryptionDelegate> {
    let delegate = Arc::new(EncryptionDelegate::new());
    delegate.init().unwrap();
    delegate
}

pub struct TestDevice {
    pub storage: InMemoryStorage,
    pub store: Arc<CryptoStore>,
    pub device: Arc<OlmDevice>,
}

pub fn test_device(delegate: &Arc<EncryptionDelegate>, user_id: &str) -> TestDevice {
    let storage = InMemoryStorage::new();
    let store = Arc::new(CryptoStore::new(Arc::new(storage.clone())));
    let device = Arc::new(
        OlmDevice::new(delegate.clone(), store.clone(), user_id, &EncryptionConfig::default())
            .unwrap(),
    );
    TestDevice {
        storage,
        store,
        device,
    }
}

impl TestDevice {
    pub fn user_device(&self) -> UserDevice {
        UserDevice {
            device_key: self.device.device_curve25519_key().to_string(),
            fallback_key: self.device.fallback_key().unwrap().key,
        }
    }

    pub fn decryption(&self) -> MegolmDecryption {
        MegolmDecryption::new(self.device.clone(), &EncryptionConfig::default())
    }

    pub fn outbound_row_count(&self, stream_id: &str) -> usize {
        self.storage
            .list(&format!("v1/outbound/{}", stream_id))
            .unwrap()
            .into_iter()
            .filter(|k| k == &format!("v1/outbound/{}", stream_id))
            .count()
    }
}

/// Directory returning a fixed device set, or failing on demand.
#[derive(Default)]
pub struct MockDirectory {
    pub devices: Mutex<UserDeviceCollection>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    /// Deletes the stream's inbound rows from this storage before answering.
    pub wipe_inbound: Mutex<Option<InMemoryStorage>>,
}

impl MockDirectory {
    pub fn with_devices(devices: UserDeviceCollection) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Default::default()
        }
    }
}

#[async_trait]
impl DeviceDirectory for MockDirectory {
    async fn get_devices_in_stream(&self, stream_id: &str) -> Result<UserDeviceCollection> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("device directory unavailable".to_string()));
        }
        if let Some(storage) = self.wipe_inbound.lock().unwrap().as_ref() {
            for key in storage.list(&format!("v1/inbound/{}/", stream_id))? {
                storage.del(&key)?;
            }
        }
        Ok(self.devices.lock().unwrap().clone())
    }
}

/// Transport that records every share call.
#[derive(Default)]
pub struct MockTransport {
    pub shared: Mutex<Vec<(String, Vec<GroupEncryptionSession>, UserDeviceCollection)>>,
    pub fail: AtomicBool,
}

impl MockTransport {
    pub fn call_count(&self) -> usize {
        self.shared.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn encrypt_and_share_megolm_sessions(
        &self,
        stream_id: &str,
        sessions: Vec<GroupEncryptionSession>,
        devices: UserDeviceCollection,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("delivery failed".to_string()));
        }
        self.shared
            .lock()
            .unwrap()
            .push((stream_id.to_string(), sessions, devices));
        Ok(())
    }
}

pub struct Sender {
    pub device: TestDevice,
    pub directory: Arc<MockDirectory>,
    pub transport: Arc<MockTransport>,
    pub encryption: Arc<MegolmEncryption>,
    pub events: crossbeam_channel::Receiver<EncryptionEvent>,
}

pub fn sender(delegate: &Arc<EncryptionDelegate>, user_id: &str, devices: UserDeviceCollection) -> Sender {
    let device = test_device(delegate, user_id);
    let directory = Arc::new(MockDirectory::with_devices(devices));
    let transport = Arc::new(MockTransport::default());
    let (tx, rx) = crossbeam_channel::unbounded();
    let encryption = Arc::new(
        MegolmEncryption::new(device.device.clone(), directory.clone(), transport.clone())
            .with_events(tx),
    );
    Sender {
        device,
        directory,
        transport,
        encryption,
        events: rx,
    }
}

/// Every event up to and including the first share outcome.
pub async fn events_until_share(events: &crossbeam_channel::Receiver<EncryptionEvent>) -> Vec<EncryptionEvent> {
    let mut seen = Vec::new();
    for _ in 0..500 {
        while let Ok(event) = events.try_recv() {
            let done = !matches!(event, EncryptionEvent::SessionCreated { .. });
            seen.push(event);
            if done {
                return seen;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no share event received");
}

pub async fn next_share_event(events: &crossbeam_channel::Receiver<EncryptionEvent>) -> EncryptionEvent {
    let mut seen = events_until_share(events).await;
    seen.pop().unwrap()
}

pub fn tamper(data: &EncryptedData, byte: usize) -> EncryptedData {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine;

    let mut bytes = STANDARD_NO_PAD.decode(&data.ciphertext).unwrap();
    bytes[byte] ^= 0x01;
    EncryptedData {
        ciphertext: STANDARD_NO_PAD.encode(bytes),
        ..data.clone()
    }
}
