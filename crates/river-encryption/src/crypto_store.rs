//! Durable rows for accounts, group sessions and devices.
//!
//! Every row is JSON under a versioned key:
//!
//! | row | key |
//! |---|---|
//! | account | `v1/account/{userId}` |
//! | outbound session | `v1/outbound/{streamId}` |
//! | inbound session | `v1/inbound/{streamId}/{sessionId}` |
//! | hybrid session | `v1/hybrid/{streamId}/{sessionId}` |
//! | device | `v1/device/{userId}/{deviceKey}` |

use crate::{
    DeviceRecord, Error, InMemoryStorage, Result, StorageAdapter, UserDevice,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const ACCOUNT_PREFIX: &str = "v1/account/";
const OUTBOUND_PREFIX: &str = "v1/outbound/";
const INBOUND_PREFIX: &str = "v1/inbound/";
const HYBRID_PREFIX: &str = "v1/hybrid/";
const DEVICE_PREFIX: &str = "v1/device/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    pub user_id: String,
    /// Encrypted vodozemac account pickle.
    pub pickled_account: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboundSessionState {
    Active,
    Retired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundSessionRecord {
    pub stream_id: String,
    pub session_id: String,
    /// Encrypted vodozemac group session pickle.
    pub pickled_session: String,
    pub state: OutboundSessionState,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundSessionRecord {
    pub stream_id: String,
    pub session_id: String,
    /// Encrypted vodozemac inbound group session pickle.
    pub pickled_session: String,
    #[serde(default)]
    pub keys_claimed: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridSessionRecord {
    pub stream_id: String,
    pub session_id: String,
    /// Hex encoded `HybridGroupSessionKey`.
    pub session_key: String,
    pub miniblock_num: u64,
}

/// Typed access to crypto rows on top of any [`StorageAdapter`].
///
/// Instances are explicit handles: tests build one per case, production code
/// shares one per user behind an `Arc`.
pub struct CryptoStore {
    storage: Arc<dyn StorageAdapter>,
    write_lock: Mutex<()>,
}

impl CryptoStore {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStorage::new()))
    }

    fn write_guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| Error::Storage("crypto store write lock poisoned".to_string()))
    }

    fn read_row<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.storage.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn write_row<T: Serialize>(&self, key: &str, row: &T) -> Result<()> {
        self.storage.put(key, serde_json::to_string(row)?)
    }

    fn read_rows<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        for key in self.storage.list(prefix)? {
            if let Some(row) = self.read_row(&key)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    // Account

    pub fn get_account(&self, user_id: &str) -> Result<Option<AccountRecord>> {
        self.read_row(&account_key(user_id))
    }

    pub fn put_account(&self, user_id: &str, account: &AccountRecord) -> Result<()> {
        let _guard = self.write_guard()?;
        self.write_row(&account_key(user_id), account)
    }

    // Outbound group sessions: at most one row per stream.

    pub fn get_outbound_session(&self, stream_id: &str) -> Result<Option<OutboundSessionRecord>> {
        self.read_row(&outbound_key(stream_id))
    }

    pub fn put_outbound_session(&self, stream_id: &str, record: &OutboundSessionRecord) -> Result<()> {
        let _guard = self.write_guard()?;
        self.write_row(&outbound_key(stream_id), record)
    }

    pub fn get_all_outbound_sessions(&self) -> Result<Vec<OutboundSessionRecord>> {
        self.read_rows(OUTBOUND_PREFIX)
    }

    // Inbound group sessions: written once per (stream, session).

    pub fn get_inbound_session(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<Option<InboundSessionRecord>> {
        self.read_row(&inbound_key(stream_id, session_id))
    }

    /// Returns `false` and leaves the row untouched when the pair already exists.
    pub fn put_inbound_session(
        &self,
        stream_id: &str,
        session_id: &str,
        record: &InboundSessionRecord,
    ) -> Result<bool> {
        let key = inbound_key(stream_id, session_id);
        let _guard = self.write_guard()?;
        if self.storage.get(&key)?.is_some() {
            return Ok(false);
        }
        self.write_row(&key, record)?;
        Ok(true)
    }

    pub fn get_inbound_session_ids(&self, stream_id: &str) -> Result<Vec<String>> {
        let rows: Vec<InboundSessionRecord> = self.read_rows(&inbound_stream_prefix(stream_id))?;
        Ok(rows.into_iter().map(|r| r.session_id).collect())
    }

    pub fn get_all_inbound_sessions(&self) -> Result<Vec<InboundSessionRecord>> {
        self.read_rows(INBOUND_PREFIX)
    }

    // Hybrid group sessions

    pub fn get_hybrid_session(
        &self,
        stream_id: &str,
        session_id: &str,
    ) -> Result<Option<HybridSessionRecord>> {
        self.read_row(&hybrid_key(stream_id, session_id))
    }

    pub fn put_hybrid_session(&self, record: &HybridSessionRecord) -> Result<()> {
        let _guard = self.write_guard()?;
        self.write_row(&hybrid_key(&record.stream_id, &record.session_id), record)
    }

    pub fn get_hybrid_sessions_for_stream(&self, stream_id: &str) -> Result<Vec<HybridSessionRecord>> {
        self.read_rows(&hybrid_stream_prefix(stream_id))
    }

    pub fn get_all_hybrid_sessions(&self) -> Result<Vec<HybridSessionRecord>> {
        self.read_rows(HYBRID_PREFIX)
    }

    // Devices

    pub fn get_device(&self, user_id: &str, device_key: &str) -> Result<Option<DeviceRecord>> {
        self.read_row(&device_key_path(user_id, device_key))
    }

    pub fn put_device(&self, record: &DeviceRecord) -> Result<()> {
        let _guard = self.write_guard()?;
        self.write_row(&device_key_path(&record.user_id, &record.device_key), record)
    }

    /// Replace the cached device list of `user_id`.
    pub fn save_user_devices(
        &self,
        user_id: &str,
        devices: &[UserDevice],
        expiration_timestamp: u64,
    ) -> Result<()> {
        let _guard = self.write_guard()?;
        for key in self.storage.list(&device_user_prefix(user_id))? {
            self.storage.del(&key)?;
        }
        for device in devices {
            let record = DeviceRecord {
                user_id: user_id.to_string(),
                device_key: device.device_key.clone(),
                fallback_key: device.fallback_key.clone(),
                expiration_timestamp,
            };
            self.write_row(&device_key_path(user_id, &device.device_key), &record)?;
        }
        Ok(())
    }

    /// Devices of `user_id` that have not expired at `now_millis`.
    pub fn get_active_user_devices(&self, user_id: &str, now_millis: u64) -> Result<Vec<DeviceRecord>> {
        let rows: Vec<DeviceRecord> = self.read_rows(&device_user_prefix(user_id))?;
        Ok(rows.into_iter().filter(|d| !d.is_expired(now_millis)).collect())
    }
}

fn account_key(user_id: &str) -> String {
    format!("{}{}", ACCOUNT_PREFIX, user_id)
}

fn outbound_key(stream_id: &str) -> String {
    format!("{}{}", OUTBOUND_PREFIX, stream_id)
}

fn inbound_stream_prefix(stream_id: &str) -> String {
    format!("{}{}/", INBOUND_PREFIX, stream_id)
}

fn inbound_key(stream_id: &str, session_id: &str) -> String {
    format!("{}{}", inbound_stream_prefix(stream_id), session_id)
}

fn hybrid_stream_prefix(stream_id: &str) -> String {
    format!("{}{}/", HYBRID_PREFIX, stream_id)
}

fn hybrid_key(stream_id: &str, session_id: &str) -> String {
    format!("{}{}", hybrid_stream_prefix(stream_id), session_id)
}

fn device_user_prefix(user_id: &str) -> String {
    format!("{}{}/", DEVICE_PREFIX, user_id)
}

fn device_key_path(user_id: &str, device_key: &str) -> String {
    format!("{}{}", device_user_prefix(user_id), device_key)
}
