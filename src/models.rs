use serde::{Deserialize, Serialize};

/// Stored OAuth link between a local user and their Spotify account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64, // epoch millis
    pub remote_user_id: String,
    pub remote_display_name: Option<String>,
}

impl Credential {
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPlaylist {
    pub id: i64,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    pub source_query: String,
    pub created_at: i64,
    pub remote_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTrack {
    pub id: i64,
    pub playlist_id: i64,
    pub position: i64,
    pub name: String,
    pub artist: String,
    pub album: Option<String>,
    pub reasoning: Option<String>,
    pub remote_track_id: Option<String>,
    pub preview_url: Option<String>,
    pub image_url: Option<String>,
    pub duration_ms: Option<i64>,
}

/// One song as suggested by the generator, before any catalog matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInput {
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Remote metadata written onto a local track once it is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMatchUpdate {
    pub track_id: i64,
    pub remote_track_id: String,
    pub preview_url: Option<String>,
    pub image_url: Option<String>,
    pub duration_ms: Option<i64>,
}

/// A catalog track returned by search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: String,
    pub uri: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub preview_url: Option<String>,
    pub image_url: Option<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePlaylist {
    pub id: String,
    pub external_url: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProfile {
    pub id: String,
    pub display_name: Option<String>,
}

/// Token endpoint response, for both code exchange and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub expires_in: i64, // seconds
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSummary {
    pub remote_url: String,
    pub image_url: String,
    /// Tracks with a catalog match, reused or newly searched.
    pub tracks_found: usize,
    /// Tracks whose add batch Spotify confirmed.
    pub tracks_added: usize,
    pub total_tracks: usize,
    /// "name - artist" for every track without a match.
    pub not_found: Vec<String>,
}
