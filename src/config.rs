use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    #[serde(default)]
    pub spotify: SpotifyConfig,

    // Transfer behaviour
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of catalog searches allowed in flight during one transfer.
    /// 1 keeps matching strictly sequential.
    #[serde(default = "default_search_concurrency")]
    pub search_concurrency: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries_on_error: u32,
    /// Lease length for a running transfer, in seconds.
    #[serde(default = "default_transfer_lock_ttl")]
    pub transfer_lock_ttl_secs: i64,
    /// Cover used when Spotify returns a playlist without images.
    #[serde(default = "default_playlist_image")]
    pub default_playlist_image: String,

    // OAuth redirect listener
    #[serde(default = "default_callback_addr")]
    pub callback_addr: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    /// Web API base, including the `/v1` path segment.
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            auth_base: default_auth_base(),
            api_base: default_api_base(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("ai-playlist").join("playlists.db"))
        .unwrap_or_else(|| "/var/lib/ai-playlist/playlists.db".into())
}
fn default_log_dir() -> PathBuf { "/var/log/ai-playlist".into() }
fn default_batch_size() -> usize { 100 }
fn default_search_concurrency() -> usize { 1 }
fn default_request_timeout() -> u64 { 15 }
fn default_max_retries() -> u32 { 3 }
fn default_transfer_lock_ttl() -> i64 { 600 }
fn default_playlist_image() -> String {
    "https://cdn-icons-png.flaticon.com/512/2111/2111624.png".into()
}
fn default_callback_addr() -> String { "127.0.0.1:8888".into() }
fn default_redirect_uri() -> String { "http://127.0.0.1:8888/spotify/callback".into() }
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_dir: default_log_dir(),
            spotify: SpotifyConfig::default(),
            batch_size: default_batch_size(),
            search_concurrency: default_search_concurrency(),
            request_timeout_secs: default_request_timeout(),
            max_retries_on_error: default_max_retries(),
            transfer_lock_ttl_secs: default_transfer_lock_ttl(),
            default_playlist_image: default_playlist_image(),
            callback_addr: default_callback_addr(),
        }
    }
}

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        let mut cfg: Config = toml::from_str(&s)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Fill empty client credentials from SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET.
    pub fn apply_env(&mut self) {
        if self.spotify.client_id.is_empty() {
            if let Ok(v) = std::env::var("SPOTIFY_CLIENT_ID") {
                self.spotify.client_id = v;
            }
        }
        if self.spotify.client_secret.is_empty() {
            if let Ok(v) = std::env::var("SPOTIFY_CLIENT_SECRET") {
                self.spotify.client_secret = v;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        // Spotify rejects more than 100 URIs per add request.
        if self.batch_size == 0 || self.batch_size > 100 {
            anyhow::bail!("batch_size must be between 1 and 100, got {}", self.batch_size);
        }
        if self.search_concurrency == 0 {
            anyhow::bail!("search_concurrency must be at least 1");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be at least 1");
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}
