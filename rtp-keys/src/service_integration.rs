//! Service integration helpers for using key management in services
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


use crate::key_store::KeyStore;
use crate::local_store::LocalKeyStore;
use crate::error::KeyResult;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};

/// Initialize key store for a service
pub async fn init_key_store(storage_path: Option<&str>) -> KeyResult<Arc<KeyStore>> {
    let path = storage_path
        .map(|p| p.to_string())
        .or_else(|| env::var("KEY_STORAGE_PATH").ok())
        .unwrap_or_else(|| "./keys".to_string());

    info!(path = %path, "Initializing key store");

    let local_store = LocalKeyStore::new(&path, None).await?;
    let backend = Arc::new(local_store);
    let key_store = Arc::new(KeyStore::new(backend));

    Ok(key_store)
}

/// Get a key from key store with fallback to environment variable
pub async fn get_key_with_fallback(
    key_store: &KeyStore,
    key_id: &str,
    env_var: &str,
) -> Option<String> {
    // Try key store first
    match key_store.get_api_key(&key_id.to_string()).await {
        Ok(key) => {
            info!(key_id = key_id, "Retrieved key from key store");
            return Some(key);
        }
        Err(e) => {
            warn!(
                key_id = key_id,
                error = %e,
                "Key not found in key store, trying environment variable"
            );
        }
    }

    // Fallback to environment variable
    if let Ok(key) = env::var(env_var) {
        warn!(
            env_var = env_var,
            "Using key from environment variable (consider migrating to key store)"
        );
        return Some(key);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fallback_reads_env_var_when_store_misses() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = init_key_store(Some(temp.path().to_str().unwrap())).await.unwrap();

        std::env::set_var("RTP_KEYS_TEST_FALLBACK", "from-env");
        let value = get_key_with_fallback(&store, "does.not.exist", "RTP_KEYS_TEST_FALLBACK").await;
        assert_eq!(value.as_deref(), Some("from-env"));
        std::env::remove_var("RTP_KEYS_TEST_FALLBACK");
    }
}
