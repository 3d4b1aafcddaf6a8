use crate::api::{CallPolicy, MusicProvider};
use crate::error::{TransferError, TransferResult};
use crate::models::Credential;
use crate::store::Store;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Hands out non-expired credentials, refreshing and persisting them on demand.
///
/// Refreshes for the same user are serialized inside the process. Across
/// processes the stored row is only overwritten if it still holds the refresh
/// token the exchange started from, so a losing refresh never replaces the
/// winner's tokens.
pub struct TokenRefresher {
    store: Store,
    provider: Arc<dyn MusicProvider>,
    policy: CallPolicy,
    user_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TokenRefresher {
    pub fn new(store: Store, provider: Arc<dyn MusicProvider>, policy: CallPolicy) -> Self {
        Self {
            store,
            provider,
            policy,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.user_locks.lock().await;
        locks.entry(user_id.to_string()).or_default().clone()
    }

    async fn load(&self, user_id: &str) -> TransferResult<Credential> {
        self.store
            .load_credential(user_id)
            .await?
            .ok_or(TransferError::NotConnected)
    }

    pub async fn ensure_valid_token(&self, user_id: &str) -> TransferResult<Credential> {
        let cred = self.load(user_id).await?;
        if !cred.is_expired_at(Utc::now().timestamp_millis()) {
            return Ok(cred);
        }

        let lock = self.user_lock(user_id).await;
        let res = {
            let _guard = lock.lock().await;
            self.refresh_locked(user_id).await
        };
        self.forget_idle_lock(user_id, &lock).await;
        res
    }

    async fn refresh_locked(&self, user_id: &str) -> TransferResult<Credential> {
        // Another task may have refreshed while we waited for the lock.
        let cred = self.load(user_id).await?;
        if !cred.is_expired_at(Utc::now().timestamp_millis()) {
            debug!(user = %user_id, "token already refreshed by a concurrent caller");
            return Ok(cred);
        }
        self.refresh(cred).await
    }

    /// Drop the user's lock entry once nobody but the map and `lock` hold it.
    async fn forget_idle_lock(&self, user_id: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.user_locks.lock().await;
        let idle = locks
            .get(user_id)
            .map(|held| Arc::ptr_eq(held, lock) && Arc::strong_count(lock) == 2)
            .unwrap_or(false);
        if idle {
            locks.remove(user_id);
        }
    }

    async fn refresh(&self, cred: Credential) -> TransferResult<Credential> {
        let grant = self
            .policy
            .retry("token refresh", || self.provider.refresh_token(&cred.refresh_token))
            .await
            .map_err(|e| TransferError::RefreshFailed(e.to_string()))?;

        let refresh_token = grant
            .refresh_token
            .unwrap_or_else(|| cred.refresh_token.clone());
        let expires_at = Utc::now().timestamp_millis() + grant.expires_in * 1000;

        let written = self
            .store
            .update_credential_tokens(
                &cred.user_id,
                &cred.refresh_token,
                &grant.access_token,
                &refresh_token,
                expires_at,
            )
            .await?;
        if !written {
            warn!(user = %cred.user_id, "credential changed during refresh; using the stored one");
            return self.load(&cred.user_id).await;
        }

        info!(user = %cred.user_id, "Spotify token refreshed");
        Ok(Credential {
            access_token: grant.access_token,
            refresh_token,
            expires_at,
            ..cred
        })
    }
}
