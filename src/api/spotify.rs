use super::{HttpFailure, MusicProvider, RateLimited};
use crate::config::SpotifyConfig;
use crate::models::{RemotePlaylist, RemoteProfile, RemoteTrack, TokenGrant};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use log::debug;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::json;
use std::time::Duration;

/// Spotify provider backed by the Spotify Web API.
/// Endpoints come from `SpotifyConfig` (`auth_base`, `api_base`), so tests can
/// point them at a mock server.
pub struct SpotifyProvider {
    client: Client,
    cfg: SpotifyConfig,
}

impl SpotifyProvider {
    pub fn new(cfg: SpotifyConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, cfg })
    }

    pub fn is_configured(&self) -> bool {
        !self.cfg.client_id.is_empty() && !self.cfg.client_secret.is_empty()
    }

    fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            general_purpose::STANDARD.encode(format!("{}:{}", self.cfg.client_id, self.cfg.client_secret))
        )
    }

    fn bearer(access_token: &str) -> String {
        format!("Bearer {}", access_token)
    }

    /// Turn a non-success response into a typed error.
    async fn check(resp: Response, context: &'static str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            return Err(RateLimited { retry_after }.into());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(HttpFailure { context, status: status.as_u16(), body }.into())
    }

    async fn token_request(&self, params: &[(&str, &str)], context: &'static str) -> Result<TokenGrant> {
        let url = format!("{}/api/token", self.cfg.auth_base);
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, self.basic_auth())
            .form(params)
            .send()
            .await?;
        let resp = Self::check(resp, context).await?;
        let j: serde_json::Value = resp.json().await?;
        let access_token = j["access_token"]
            .as_str()
            .ok_or_else(|| anyhow!("no access_token"))?
            .to_string();
        let expires_in = j["expires_in"].as_i64().unwrap_or(3600);
        let refresh_token = j["refresh_token"].as_str().map(|s| s.to_string());
        Ok(TokenGrant { access_token, expires_in, refresh_token })
    }
}

/// Map one search result item onto a `RemoteTrack`. Items without id or uri
/// are dropped.
fn parse_track(item: &serde_json::Value) -> Option<RemoteTrack> {
    let id = item["id"].as_str()?.to_string();
    let uri = item["uri"].as_str()?.to_string();
    let artists = item["artists"]
        .as_array()
        .map(|a| {
            a.iter()
                .filter_map(|ar| ar["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    Some(RemoteTrack {
        id,
        uri,
        name: item["name"].as_str().unwrap_or("").to_string(),
        artists,
        album: item["album"]["name"].as_str().map(|s| s.to_string()),
        preview_url: item["preview_url"].as_str().map(|s| s.to_string()),
        image_url: item["album"]["images"][0]["url"].as_str().map(|s| s.to_string()),
        duration_ms: item["duration_ms"].as_i64().unwrap_or(0),
    })
}

#[async_trait]
impl MusicProvider for SpotifyProvider {
    fn name(&self) -> &str {
        "spotify"
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.cfg.redirect_uri.as_str()),
        ];
        self.token_request(&params, "token exchange").await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        debug!("Refreshing Spotify access token");
        let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        self.token_request(&params, "token refresh").await
    }

    async fn current_user(&self, access_token: &str) -> Result<RemoteProfile> {
        let url = format!("{}/me", self.cfg.api_base);
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .send()
            .await?;
        let resp = Self::check(resp, "fetch /me").await?;
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id"))?
            .to_string();
        Ok(RemoteProfile {
            id,
            display_name: j["display_name"].as_str().map(|s| s.to_string()),
        })
    }

    async fn create_playlist(
        &self,
        access_token: &str,
        remote_user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<RemotePlaylist> {
        let url = format!(
            "{}/users/{}/playlists",
            self.cfg.api_base,
            url::form_urlencoded::byte_serialize(remote_user_id.as_bytes()).collect::<String>()
        );
        let body = json!({
            "name": name,
            "description": description,
            "public": public
        });
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, "create playlist").await?;
        let j: serde_json::Value = resp.json().await?;
        let id = j["id"]
            .as_str()
            .ok_or_else(|| anyhow!("no id"))?
            .to_string();
        let external_url = j["external_urls"]["spotify"]
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("https://open.spotify.com/playlist/{}", id));
        let images = j["images"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|im| im["url"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(RemotePlaylist { id, external_url, images })
    }

    async fn search_tracks(&self, access_token: &str, query: &str, limit: u32) -> Result<Vec<RemoteTrack>> {
        let url = format!(
            "{}/search?q={}&type=track&limit={}",
            self.cfg.api_base,
            urlencoding::encode(query),
            limit
        );
        let resp = self
            .client
            .get(&url)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let resp = Self::check(resp, "search").await?;
        let j: serde_json::Value = resp.json().await?;
        let tracks = j["tracks"]["items"]
            .as_array()
            .map(|items| items.iter().filter_map(parse_track).collect())
            .unwrap_or_default();
        Ok(tracks)
    }

    async fn add_tracks(&self, access_token: &str, playlist_id: &str, uris: &[String]) -> Result<()> {
        let url = format!("{}/playlists/{}/tracks", self.cfg.api_base, playlist_id);
        let body = json!({ "uris": uris });
        let resp = self
            .client
            .post(&url)
            .header(AUTHORIZATION, Self::bearer(access_token))
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;
        Self::check(resp, "add tracks").await?;
        Ok(())
    }
}
