use crate::db;
use crate::models::{Credential, LocalPlaylist, LocalTrack, TrackInput, TrackMatchUpdate};
use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

/// Async handle on the SQLite store. Every call opens a fresh connection on
/// the blocking pool, so the handle is cheap to clone and share.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

impl Store {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self { db_path: db_path.into() }
    }

    /// Create the database file if needed and run migrations.
    pub async fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(db_path);
        let path = store.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let path_display = path.display().to_string();
            db::open_or_create(&path)
                .with_context(|| format!("running DB migrations for {}", path_display))?;
            Ok(())
        })
        .await??;
        Ok(store)
    }

    async fn with_conn<T, F>(&self, what: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || -> Result<T> {
            let path_display = db_path.display().to_string();
            let mut conn = Connection::open(&db_path)
                .with_context(|| format!("opening DB for {} at {}", what, path_display))?;
            conn.busy_timeout(Duration::from_secs(5))?;
            f(&mut conn).with_context(|| format!("{} ({})", what, path_display))
        })
        .await?
    }

    pub async fn load_credential(&self, user_id: &str) -> Result<Option<Credential>> {
        let user_id = user_id.to_string();
        self.with_conn("loading credential", move |c| db::load_credential(c, &user_id)).await
    }

    pub async fn save_credential(&self, cred: Credential) -> Result<()> {
        self.with_conn("saving credential", move |c| db::save_credential(c, &cred)).await
    }

    pub async fn update_credential_tokens(
        &self,
        user_id: &str,
        expected_refresh_token: &str,
        access_token: &str,
        refresh_token: &str,
        expires_at: i64,
    ) -> Result<bool> {
        let (user_id, expected, access, refresh) = (
            user_id.to_string(),
            expected_refresh_token.to_string(),
            access_token.to_string(),
            refresh_token.to_string(),
        );
        self.with_conn("updating credential tokens", move |c| {
            db::update_credential_tokens(c, &user_id, &expected, &access, &refresh, expires_at)
        })
        .await
    }

    pub async fn delete_credential(&self, user_id: &str) -> Result<bool> {
        let user_id = user_id.to_string();
        self.with_conn("deleting credential", move |c| db::delete_credential(c, &user_id)).await
    }

    pub async fn insert_playlist(&self, owner_id: &str, name: &str, description: &str, source_query: &str) -> Result<i64> {
        let (owner_id, name, description, source_query) = (
            owner_id.to_string(),
            name.to_string(),
            description.to_string(),
            source_query.to_string(),
        );
        self.with_conn("inserting playlist", move |c| {
            db::insert_playlist(c, &owner_id, &name, &description, &source_query)
        })
        .await
    }

    pub async fn get_playlist(&self, playlist_id: i64) -> Result<Option<LocalPlaylist>> {
        self.with_conn("loading playlist", move |c| db::get_playlist(c, playlist_id)).await
    }

    pub async fn list_playlists(&self, owner_id: &str) -> Result<Vec<LocalPlaylist>> {
        let owner_id = owner_id.to_string();
        self.with_conn("listing playlists", move |c| db::list_playlists_by_owner(c, &owner_id)).await
    }

    pub async fn delete_playlist(&self, playlist_id: i64) -> Result<()> {
        self.with_conn("deleting playlist", move |c| db::delete_playlist(c, playlist_id)).await
    }

    pub async fn insert_track(&self, playlist_id: i64, track: TrackInput) -> Result<i64> {
        self.with_conn("inserting track", move |c| db::insert_track(c, playlist_id, &track)).await
    }

    pub async fn list_tracks(&self, playlist_id: i64) -> Result<Vec<LocalTrack>> {
        self.with_conn("listing tracks", move |c| db::list_tracks(c, playlist_id)).await
    }

    pub async fn record_transfer_result(
        &self,
        playlist_id: i64,
        remote_url: &str,
        image_url: &str,
        updates: Vec<TrackMatchUpdate>,
    ) -> Result<bool> {
        let (remote_url, image_url) = (remote_url.to_string(), image_url.to_string());
        self.with_conn("recording transfer result", move |c| {
            db::record_transfer_result(c, playlist_id, &remote_url, &image_url, &updates)
        })
        .await
    }

    pub async fn try_acquire_transfer_lock(&self, playlist_id: i64, holder_id: &str, ttl_seconds: i64) -> Result<bool> {
        let holder_id = holder_id.to_string();
        self.with_conn("acquiring transfer lock", move |c| {
            db::try_acquire_transfer_lock(c, playlist_id, &holder_id, ttl_seconds)
        })
        .await
    }

    pub async fn release_transfer_lock(&self, playlist_id: i64, holder_id: &str) -> Result<()> {
        let holder_id = holder_id.to_string();
        self.with_conn("releasing transfer lock", move |c| {
            db::release_transfer_lock(c, playlist_id, &holder_id)
        })
        .await
    }
}
