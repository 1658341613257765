use crate::transport::DeviceDirectory;
use crate::utils::now_millis;
use crate::{CryptoStore, EncryptionConfig, Result, UserDevice, UserDeviceCollection};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// What the surrounding stream layer knows about membership and devices.
#[async_trait]
pub trait StreamMembership: Send + Sync {
    async fn users_entitled_to_key_exchange(&self, stream_id: &str) -> Result<Vec<String>>;

    /// Devices published by `user_id`, oldest first.
    async fn download_user_devices(&self, user_id: &str) -> Result<Vec<UserDevice>>;
}

/// [`DeviceDirectory`] that caches device lists in the [`CryptoStore`].
#[derive(Clone)]
pub struct DeviceList {
    membership: Arc<dyn StreamMembership>,
    store: Arc<CryptoStore>,
    local_user_id: String,
    config: EncryptionConfig,
}

impl DeviceList {
    pub fn new(
        membership: Arc<dyn StreamMembership>,
        store: Arc<CryptoStore>,
        local_user_id: &str,
        config: EncryptionConfig,
    ) -> Self {
        Self {
            membership,
            store,
            local_user_id: local_user_id.to_string(),
            config,
        }
    }

    /// Cached, unexpired devices of `user_id`.
    pub fn known_devices_for_user(&self, user_id: &str) -> Result<Vec<UserDevice>> {
        Ok(self
            .store
            .get_active_user_devices(user_id, now_millis())?
            .iter()
            .map(|d| d.to_user_device())
            .collect())
    }

    async fn devices_for_user(&self, user_id: &str, force_download: bool) -> Result<Vec<UserDevice>> {
        if !force_download && user_id != self.local_user_id {
            let cached = self.known_devices_for_user(user_id)?;
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let mut devices = self.membership.download_user_devices(user_id).await?;
        let skip = devices.len().saturating_sub(self.config.device_lookback);
        devices.drain(..skip);

        let expiration = now_millis().saturating_add(self.config.device_ttl_millis());
        self.store.save_user_devices(user_id, &devices, expiration)?;
        Ok(devices)
    }

    /// Fetch devices for `user_ids` concurrently. Small groups always
    /// re-download; a user whose download fails maps to an empty list.
    pub async fn download_user_device_info(&self, user_ids: &[String]) -> UserDeviceCollection {
        let force_download = user_ids.len() <= self.config.force_download_threshold;
        let mut collection: UserDeviceCollection = user_ids
            .iter()
            .map(|user_id| (user_id.clone(), Vec::new()))
            .collect();

        let mut downloads = JoinSet::new();
        for user_id in user_ids {
            let list = self.clone();
            let user_id = user_id.clone();
            downloads.spawn(async move {
                let result = list.devices_for_user(&user_id, force_download).await;
                (user_id, result)
            });
        }

        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok((user_id, Ok(devices))) => {
                    collection.insert(user_id, devices);
                }
                Ok((user_id, Err(e))) => {
                    warn!(user_id = %user_id, error = %e, "failed to download user devices");
                }
                Err(e) => warn!(error = %e, "device download task failed"),
            }
        }
        collection
    }
}

#[async_trait]
impl DeviceDirectory for DeviceList {
    async fn get_devices_in_stream(&self, stream_id: &str) -> Result<UserDeviceCollection> {
        let members = self.membership.users_entitled_to_key_exchange(stream_id).await?;
        debug!(stream_id = %stream_id, member_count = members.len(), "resolving stream devices");
        Ok(self.download_user_device_info(&members).await)
    }
}
