pub mod spotify;
pub mod mock;
pub mod spotify_auth;

use crate::models::{RemotePlaylist, RemoteProfile, RemoteTrack, TokenGrant};
use anyhow::Result;

/// Provider trait: the operations the token refresher, matcher and
/// reconciler need from the music service.
/// Implementations: spotify::SpotifyProvider and mock::MockProvider.
///
/// Calls are stateless with respect to users: the caller passes the access
/// token of whichever credential it loaded.
#[async_trait::async_trait]
pub trait MusicProvider: Send + Sync {
    /// Exchange an authorization code for a token pair.
    async fn exchange_code(&self, code: &str) -> Result<TokenGrant>;

    /// Exchange a refresh token for a new access token. The grant carries a
    /// refresh token only when the provider rotated it.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant>;

    /// Profile of the user owning `access_token`.
    async fn current_user(&self, access_token: &str) -> Result<RemoteProfile>;

    /// Create a playlist owned by `remote_user_id`.
    async fn create_playlist(
        &self,
        access_token: &str,
        remote_user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<RemotePlaylist>;

    /// Run a catalog track search, best match first.
    async fn search_tracks(&self, access_token: &str, query: &str, limit: u32) -> Result<Vec<RemoteTrack>>;

    /// Add tracks (URIs) to a playlist (batching done by caller)
    async fn add_tracks(&self, access_token: &str, playlist_id: &str, uris: &[String]) -> Result<()>;

    /// URI for a provider track id.
    fn track_uri(&self, track_id: &str) -> String {
        format!("spotify:track:{}", track_id)
    }

    /// Return the provider's name (for logging)
    fn name(&self) -> &str;
}

/// Error raised when the provider answered 429. Carries the Retry-After
/// delay in seconds when one was sent.
#[derive(Debug, thiserror::Error)]
#[error("rate_limited: retry_after={retry_after:?}")]
pub struct RateLimited {
    pub retry_after: Option<u64>,
}

/// Error raised for a non-success HTTP status.
#[derive(Debug, thiserror::Error)]
#[error("{context} failed: {status} => {body}")]
pub struct HttpFailure {
    pub context: &'static str,
    pub status: u16,
    pub body: String,
}

impl HttpFailure {
    /// 5xx answers are worth another attempt, 4xx are not.
    pub fn is_transient(&self) -> bool {
        self.status >= 500
    }
}

/// True if an error from a provider call may succeed when repeated.
pub fn is_transient(err: &anyhow::Error) -> bool {
    if err.downcast_ref::<RateLimited>().is_some() {
        return true;
    }
    if let Some(h) = err.downcast_ref::<HttpFailure>() {
        return h.is_transient();
    }
    if let Some(e) = err.downcast_ref::<reqwest::Error>() {
        return e.is_timeout() || e.is_connect() || e.is_request();
    }
    err.downcast_ref::<tokio::time::error::Elapsed>().is_some()
}

/// Suggested wait before retrying `err`, given the attempt number (1-based).
pub fn backoff_for(err: &anyhow::Error, attempt: u32) -> std::time::Duration {
    if let Some(RateLimited { retry_after: Some(secs) }) = err.downcast_ref::<RateLimited>() {
        return std::time::Duration::from_secs(*secs);
    }
    // exponential backoff cap 60s
    let exp = std::cmp::min(2u64.saturating_pow(std::cmp::min(attempt, 6)), 60);
    std::time::Duration::from_millis(exp * 250)
}

/// Timeout and retry budget applied around a provider call.
#[derive(Debug, Clone, Copy)]
pub struct CallPolicy {
    pub timeout: std::time::Duration,
    /// Extra attempts after the first one, transient failures only.
    pub max_retries: u32,
}

impl CallPolicy {
    pub fn from_config(cfg: &crate::config::Config) -> Self {
        Self {
            timeout: cfg.request_timeout(),
            max_retries: cfg.max_retries_on_error,
        }
    }

    /// Single attempt bounded by the timeout. Used for non-idempotent calls.
    pub async fn once<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(elapsed) => Err(anyhow::Error::new(elapsed)),
        }
    }

    /// Run `op` until it succeeds, fails permanently, or the retry budget is spent.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.once(op()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    if attempt > self.max_retries || !is_transient(&e) {
                        return Err(e);
                    }
                    let wait = backoff_for(&e, attempt);
                    log::warn!("{} failed (attempt {}): {}. Retrying in {:?}...", what, attempt, e, wait);
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}
