use super::MusicProvider;
use crate::models::{RemotePlaylist, RemoteProfile, RemoteTrack, TokenGrant};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Default)]
struct MockState {
    catalog: HashMap<(String, String), RemoteTrack>,
    failing_searches: HashSet<(String, String)>,
    search_calls: Vec<(String, String)>,
    created: Vec<(String, String)>,
    add_batches: Vec<Vec<String>>,
    failing_batches: HashSet<usize>,
    refresh_calls: usize,
    fail_create: bool,
    fail_refresh: bool,
    rotate_refresh_token: bool,
}

/// In-memory provider used in tests and dry runs.
/// It records every call and answers from a configurable catalog.
pub struct MockProvider {
    state: Mutex<MockState>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn key(name: &str, artist: &str) -> (String, String) {
    (name.to_lowercase(), artist.to_lowercase())
}

/// Pull `name` and `artist` back out of a `track:"..." artist:"..."` query.
fn parse_query(query: &str) -> Option<(String, String)> {
    let rest = query.strip_prefix("track:\"")?;
    let (name, rest) = rest.split_once("\" artist:\"")?;
    let artist = rest.strip_suffix('"')?;
    Some((name.to_string(), artist.to_string()))
}

impl MockProvider {
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState::default()) }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // a panicking test thread must not hide the recorded calls
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `name`/`artist` resolvable to a track with the given id.
    pub fn with_track(self, name: &str, artist: &str, id: &str) -> Self {
        let track = RemoteTrack {
            id: id.to_string(),
            uri: format!("spotify:track:{}", id),
            name: name.to_string(),
            artists: vec![artist.to_string()],
            album: None,
            preview_url: Some(format!("https://p.scdn.co/mp3-preview/{}", id)),
            image_url: Some(format!("https://i.scdn.co/image/{}", id)),
            duration_ms: 180_000,
        };
        self.state().catalog.insert(key(name, artist), track);
        self
    }

    /// Make the search for `name`/`artist` fail with an error.
    pub fn with_failing_search(self, name: &str, artist: &str) -> Self {
        self.state().failing_searches.insert(key(name, artist));
        self
    }

    /// Make the n-th add batch (0-based) fail.
    pub fn with_failing_batch(self, index: usize) -> Self {
        self.state().failing_batches.insert(index);
        self
    }

    pub fn with_failing_create(self) -> Self {
        self.state().fail_create = true;
        self
    }

    pub fn with_failing_refresh(self) -> Self {
        self.state().fail_refresh = true;
        self
    }

    /// Return a fresh refresh token on every refresh.
    pub fn with_rotating_refresh_token(self) -> Self {
        self.state().rotate_refresh_token = true;
        self
    }

    pub fn search_calls(&self) -> Vec<(String, String)> {
        self.state().search_calls.clone()
    }

    pub fn created_playlists(&self) -> Vec<(String, String)> {
        self.state().created.clone()
    }

    /// Every add_tracks call in order, including rejected ones.
    pub fn add_batches(&self) -> Vec<Vec<String>> {
        self.state().add_batches.clone()
    }

    pub fn refresh_calls(&self) -> usize {
        self.state().refresh_calls
    }
}

#[async_trait]
impl MusicProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenGrant> {
        info!("MockProvider: exchange_code {}", code);
        if code.is_empty() {
            return Err(anyhow!("token exchange failed: 400 => invalid_grant"));
        }
        Ok(TokenGrant {
            access_token: format!("access-{}", code),
            expires_in: 3600,
            refresh_token: Some(format!("refresh-{}", code)),
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant> {
        let mut st = self.state();
        st.refresh_calls += 1;
        info!("MockProvider: refresh_token #{}", st.refresh_calls);
        if st.fail_refresh {
            return Err(anyhow!("token refresh failed: 400 => invalid_grant"));
        }
        let n = st.refresh_calls;
        Ok(TokenGrant {
            access_token: format!("access-{}", n),
            expires_in: 3600,
            refresh_token: st
                .rotate_refresh_token
                .then(|| format!("{}-r{}", refresh_token, n)),
        })
    }

    async fn current_user(&self, _access_token: &str) -> Result<RemoteProfile> {
        Ok(RemoteProfile {
            id: "mock_user".into(),
            display_name: Some("Mock User".into()),
        })
    }

    async fn create_playlist(
        &self,
        _access_token: &str,
        remote_user_id: &str,
        name: &str,
        description: &str,
        _public: bool,
    ) -> Result<RemotePlaylist> {
        let mut st = self.state();
        info!("MockProvider: create_playlist {} for {}", name, remote_user_id);
        if st.fail_create {
            return Err(anyhow!("create playlist failed: 403 => forbidden"));
        }
        st.created.push((name.to_string(), description.to_string()));
        let id = format!("mock-playlist-{}", st.created.len());
        Ok(RemotePlaylist {
            external_url: format!("https://open.spotify.com/playlist/{}", id),
            id,
            images: Vec::new(),
        })
    }

    async fn search_tracks(&self, _access_token: &str, query: &str, limit: u32) -> Result<Vec<RemoteTrack>> {
        let mut st = self.state();
        let (name, artist) = parse_query(query).ok_or_else(|| anyhow!("unexpected query {}", query))?;
        info!("MockProvider: search {} - {}", name, artist);
        st.search_calls.push((name.clone(), artist.clone()));
        let k = key(&name, &artist);
        if st.failing_searches.contains(&k) {
            return Err(anyhow!("search failed: 500 => server"));
        }
        Ok(st
            .catalog
            .get(&k)
            .cloned()
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn add_tracks(&self, _access_token: &str, playlist_id: &str, uris: &[String]) -> Result<()> {
        let mut st = self.state();
        info!("MockProvider: add_tracks {} -> {} tracks", playlist_id, uris.len());
        let index = st.add_batches.len();
        st.add_batches.push(uris.to_vec());
        if st.failing_batches.contains(&index) {
            return Err(anyhow!("add tracks failed: 500 => server"));
        }
        Ok(())
    }
}
