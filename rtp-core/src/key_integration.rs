//! Integration with rtp-keys for SRTP key management
//!
//! Provides secure key storage and retrieval for SRTP sessions.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::{RtpError, RtpResult};
use crate::srtp_pipeline::{SrtpConfig, SrtpPipeline};
use rtp_keys::{KeyId, KeyStore};
use std::sync::Arc;

/// Opaque SRTP key supply: generates, stores, and retrieves per-SSRC
/// master key/salt pairs through `rtp-keys`' `KeyStore`, so the
/// protocol engine never originates or persists key material itself.
pub struct SrtpKeyManager {
    key_store: Arc<KeyStore>,
}

impl SrtpKeyManager {
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        SrtpKeyManager { key_store }
    }

    /// Generate and store a fresh master key/salt pair for `ssrc`.
    pub async fn create_stream_keys(&self, ssrc: u32) -> RtpResult<(KeyId, KeyId)> {
        use rand::RngCore;

        let mut master_key = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut master_key);

        let mut master_salt = vec![0u8; 14];
        rand::thread_rng().fill_bytes(&mut master_salt);

        let key_id = KeyId::from(format!("srtp:master_key:{:08x}", ssrc));
        let salt_id = KeyId::from(format!("srtp:master_salt:{:08x}", ssrc));

        self.key_store
            .store_encryption_key(&key_id, &master_key)
            .await
            .map_err(|e| RtpError::Generic(e.to_string()))?;

        self.key_store
            .store_encryption_key(&salt_id, &master_salt)
            .await
            .map_err(|e| RtpError::Generic(e.to_string()))?;

        Ok((key_id, salt_id))
    }

    /// Retrieve the stored master key/salt pair for `ssrc`.
    pub async fn get_stream_keys(&self, ssrc: u32) -> RtpResult<(Vec<u8>, Vec<u8>)> {
        let key_id = KeyId::from(format!("srtp:master_key:{:08x}", ssrc));
        let salt_id = KeyId::from(format!("srtp:master_salt:{:08x}", ssrc));

        let master_key = self
            .key_store
            .get_encryption_key(&key_id)
            .await
            .map_err(|e| RtpError::Generic(e.to_string()))?;

        let master_salt = self
            .key_store
            .get_encryption_key(&salt_id)
            .await
            .map_err(|e| RtpError::Generic(e.to_string()))?;

        if master_key.len() != 16 {
            return Err(RtpError::InvalidValue(format!(
                "invalid master key size: {} (expected 16)",
                master_key.len()
            )));
        }
        if master_salt.len() != 14 {
            return Err(RtpError::InvalidValue(format!(
                "invalid master salt size: {} (expected 14)",
                master_salt.len()
            )));
        }

        Ok((master_key, master_salt))
    }

    /// Build an `SrtpPipeline` from the stored keys for `ssrc`.
    pub async fn create_srtp_pipeline(&self, ssrc: u32, roc: u32) -> RtpResult<SrtpPipeline> {
        let (master_key, master_salt) = self.get_stream_keys(ssrc).await?;

        SrtpPipeline::new(SrtpConfig {
            master_key,
            master_salt,
            ssrc,
            roc,
            null_cipher: false,
            authenticate: true,
        })
    }

    /// Remove the stored keys for `ssrc` (stream teardown).
    pub async fn delete_stream_keys(&self, ssrc: u32) -> RtpResult<()> {
        let key_id = KeyId::from(format!("srtp:master_key:{:08x}", ssrc));
        let salt_id = KeyId::from(format!("srtp:master_salt:{:08x}", ssrc));

        let _ = self.key_store.delete_key(&key_id).await;
        let _ = self.key_store.delete_key(&salt_id).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp_keys::local_store::LocalKeyStore;
    use tempfile::TempDir;

    async fn create_test_key_store() -> (Arc<KeyStore>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage_path = temp_dir.path().to_path_buf();

        let local_store = LocalKeyStore::new(&storage_path, None).await.unwrap();
        let key_store = Arc::new(KeyStore::new(Arc::new(local_store)));

        (key_store, temp_dir)
    }

    #[tokio::test]
    async fn create_and_retrieve_stream_keys() {
        let (key_store, _temp_dir) = create_test_key_store().await;
        let manager = SrtpKeyManager::new(key_store);

        let (key_id, salt_id) = manager.create_stream_keys(12345).await.unwrap();
        assert!(!key_id.is_empty());
        assert!(!salt_id.is_empty());

        let (master_key, master_salt) = manager.get_stream_keys(12345).await.unwrap();
        assert_eq!(master_key.len(), 16);
        assert_eq!(master_salt.len(), 14);
    }

    #[tokio::test]
    async fn create_srtp_pipeline_from_stored_keys() {
        let (key_store, _temp_dir) = create_test_key_store().await;
        let manager = SrtpKeyManager::new(key_store);

        manager.create_stream_keys(12345).await.unwrap();

        let pipeline = manager.create_srtp_pipeline(12345, 0).await.unwrap();
        assert_eq!(pipeline.current_roc(), 0);
    }
}

