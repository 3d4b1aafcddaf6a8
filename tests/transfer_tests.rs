use ai_playlist_spotify_transfer::api::mock::MockProvider;
use ai_playlist_spotify_transfer::api::MusicProvider;
use ai_playlist_spotify_transfer::config::Config;
use ai_playlist_spotify_transfer::error::TransferError;
use ai_playlist_spotify_transfer::models::{Credential, RemotePlaylist, RemoteProfile, RemoteTrack, TokenGrant, TrackInput};
use ai_playlist_spotify_transfer::reconciler::PlaylistReconciler;
use ai_playlist_spotify_transfer::store::Store;
use async_trait::async_trait;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

const USER: &str = "user-1";

fn credential(expires_in_ms: i64) -> Credential {
    Credential {
        user_id: USER.into(),
        access_token: "valid".into(),
        refresh_token: "refresh".into(),
        expires_at: chrono::Utc::now().timestamp_millis() + expires_in_ms,
        remote_user_id: "mock_user".into(),
        remote_display_name: None,
    }
}

fn test_config(td: &TempDir) -> Config {
    Config {
        db_path: td.path().join("test.db"),
        max_retries_on_error: 0,
        ..Config::default()
    }
}

async fn setup(tracks: &[(&str, &str)]) -> (TempDir, Store, i64) {
    let td = tempdir().unwrap();
    let store = Store::open(td.path().join("test.db")).await.unwrap();
    store.save_credential(credential(3_600_000)).await.unwrap();
    let pid = store
        .insert_playlist(USER, "Rainy Day", "", "rainy day jazz")
        .await
        .unwrap();
    for (name, artist) in tracks {
        store
            .insert_track(
                pid,
                TrackInput {
                    name: name.to_string(),
                    artist: artist.to_string(),
                    album: None,
                    reasoning: Some("fits the mood".into()),
                },
            )
            .await
            .unwrap();
    }
    (td, store, pid)
}

fn reconciler(cfg: &Config, store: &Store, provider: &Arc<MockProvider>) -> PlaylistReconciler {
    PlaylistReconciler::new(cfg, store.clone(), provider.clone())
}

#[tokio::test]
async fn end_to_end_one_found_one_missing() {
    let (td, store, pid) = setup(&[("Song A", "Artist X"), ("Song B", "Artist Y")]).await;
    let provider = Arc::new(MockProvider::new().with_track("Song A", "Artist X", "1"));
    let cfg = test_config(&td);

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(summary.tracks_found, 1);
    assert_eq!(summary.tracks_added, 1);
    assert_eq!(summary.total_tracks, 2);
    assert_eq!(summary.not_found, vec!["Song B - Artist Y".to_string()]);
    assert_eq!(provider.add_batches(), vec![vec!["spotify:track:1".to_string()]]);

    let created = provider.created_playlists();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, "Rainy Day");
    assert_eq!(created[0].1, "Generated from: \"rainy day jazz\"");

    let playlist = store.get_playlist(pid).await.unwrap().unwrap();
    assert_eq!(playlist.remote_url.as_deref(), Some(summary.remote_url.as_str()));
    // mock playlists have no images, so the default cover is used
    assert_eq!(playlist.image_url, Some(cfg.default_playlist_image.clone()));

    let tracks = store.list_tracks(pid).await.unwrap();
    assert_eq!(tracks[0].remote_track_id.as_deref(), Some("1"));
    assert_eq!(tracks[0].duration_ms, Some(180_000));
    assert!(tracks[0].preview_url.is_some());
    assert_eq!(tracks[1].remote_track_id, None);
    assert_eq!(tracks[1].preview_url, None);
    assert_eq!(tracks[1].reasoning.as_deref(), Some("fits the mood"));
}

#[tokio::test]
async fn second_transfer_is_rejected_without_creating_another_playlist() {
    let (td, store, pid) = setup(&[("Song A", "Artist X")]).await;
    let provider = Arc::new(MockProvider::new().with_track("Song A", "Artist X", "1"));
    let cfg = test_config(&td);
    let r = reconciler(&cfg, &store, &provider);

    r.transfer(pid, Some(USER)).await.unwrap();
    let err = r.transfer(pid, Some(USER)).await.unwrap_err();

    assert!(matches!(err, TransferError::AlreadyTransferred), "got {:?}", err);
    assert_eq!(provider.created_playlists().len(), 1);
    assert_eq!(provider.search_calls().len(), 1);
}

#[tokio::test]
async fn previously_matched_tracks_are_not_searched_again() {
    let (td, store, pid) = setup(&[("Song A", "Artist X"), ("Song B", "Artist Y")]).await;
    {
        let conn = rusqlite::Connection::open(td.path().join("test.db")).unwrap();
        conn.execute(
            "UPDATE tracks SET remote_track_id = 'prev' WHERE playlist_id = ?1 AND name = 'Song A'",
            [pid],
        )
        .unwrap();
    }
    let provider = Arc::new(MockProvider::new().with_track("Song B", "Artist Y", "2"));
    let cfg = test_config(&td);

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    let searched = provider.search_calls();
    assert!(searched.iter().all(|(name, _)| name != "Song A"));
    assert_eq!(searched.len(), 1);
    assert_eq!(summary.tracks_found, 2);
    assert_eq!(
        provider.add_batches(),
        vec![vec!["spotify:track:prev".to_string(), "spotify:track:2".to_string()]]
    );
    let tracks = store.list_tracks(pid).await.unwrap();
    assert_eq!(tracks[0].remote_track_id.as_deref(), Some("prev"));
}

#[tokio::test]
async fn add_batch_keeps_playlist_order() {
    let (td, store, pid) = setup(&[("A", "x"), ("B", "y"), ("C", "z")]).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_track("A", "x", "a")
            .with_track("C", "z", "c"),
    );
    let cfg = test_config(&td);

    reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(
        provider.add_batches(),
        vec![vec!["spotify:track:a".to_string(), "spotify:track:c".to_string()]]
    );
}

#[tokio::test]
async fn concurrent_matching_keeps_playlist_order() {
    let names: Vec<(String, String)> = (0..12).map(|i| (format!("Song {}", i), format!("Artist {}", i))).collect();
    let refs: Vec<(&str, &str)> = names.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();
    let (td, store, pid) = setup(&refs).await;
    let mut provider = MockProvider::new();
    for (i, (n, a)) in names.iter().enumerate() {
        if i % 3 != 1 {
            provider = provider.with_track(n, a, &i.to_string());
        }
    }
    let provider = Arc::new(provider);
    let cfg = Config {
        search_concurrency: 4,
        ..test_config(&td)
    };

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    let expected: Vec<String> = (0..12)
        .filter(|i| i % 3 != 1)
        .map(|i| format!("spotify:track:{}", i))
        .collect();
    assert_eq!(provider.add_batches(), vec![expected]);
    assert_eq!(summary.tracks_found, 8);
}

#[tokio::test]
async fn matches_are_submitted_in_batches_of_100() {
    let names: Vec<(String, String)> = (0..250).map(|i| (format!("Song {}", i), "Artist".to_string())).collect();
    let refs: Vec<(&str, &str)> = names.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();
    let (td, store, pid) = setup(&refs).await;
    let mut provider = MockProvider::new();
    for (i, (n, a)) in names.iter().enumerate() {
        provider = provider.with_track(n, a, &i.to_string());
    }
    let provider = Arc::new(provider);
    let cfg = test_config(&td);

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    let sizes: Vec<usize> = provider.add_batches().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![100, 100, 50]);
    assert_eq!(provider.add_batches()[2][49], "spotify:track:249");
    assert_eq!(summary.tracks_added, 250);
}

#[tokio::test]
async fn no_matches_still_creates_empty_playlist() {
    let (td, store, pid) = setup(&[("A", "x"), ("B", "y"), ("C", "z")]).await;
    let provider = Arc::new(MockProvider::new());
    let cfg = test_config(&td);

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(summary.tracks_found, 0);
    assert_eq!(summary.total_tracks, 3);
    assert_eq!(summary.not_found.len(), 3);
    assert_eq!(provider.created_playlists().len(), 1);
    assert!(provider.add_batches().is_empty());
    assert!(store.get_playlist(pid).await.unwrap().unwrap().remote_url.is_some());
}

#[tokio::test]
async fn failing_search_counts_as_miss() {
    let (td, store, pid) = setup(&[("A", "x"), ("B", "y")]).await;
    let provider = Arc::new(
        MockProvider::new()
            .with_failing_search("A", "x")
            .with_track("B", "y", "b"),
    );
    let cfg = test_config(&td);

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(summary.tracks_found, 1);
    assert_eq!(summary.not_found, vec!["A - x".to_string()]);
    assert_eq!(provider.add_batches(), vec![vec!["spotify:track:b".to_string()]]);
}

#[tokio::test]
async fn failed_batch_does_not_stop_later_batches() {
    let names: Vec<(String, String)> = (0..5).map(|i| (format!("Song {}", i), "Artist".to_string())).collect();
    let refs: Vec<(&str, &str)> = names.iter().map(|(n, a)| (n.as_str(), a.as_str())).collect();
    let (td, store, pid) = setup(&refs).await;
    let mut provider = MockProvider::new().with_failing_batch(0);
    for (i, (n, a)) in names.iter().enumerate() {
        provider = provider.with_track(n, a, &i.to_string());
    }
    let provider = Arc::new(provider);
    let cfg = Config {
        batch_size: 2,
        ..test_config(&td)
    };

    let summary = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(provider.add_batches().len(), 3);
    assert_eq!(summary.tracks_found, 5);
    assert_eq!(summary.tracks_added, 3);
    let tracks = store.list_tracks(pid).await.unwrap();
    let linked: Vec<bool> = tracks.iter().map(|t| t.remote_track_id.is_some()).collect();
    assert_eq!(linked, vec![false, false, true, true, true]);
}

#[tokio::test]
async fn caller_must_own_the_playlist() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a"));
    let cfg = test_config(&td);
    let r = reconciler(&cfg, &store, &provider);

    let anonymous = r.transfer(pid, None).await.unwrap_err();
    assert!(matches!(anonymous, TransferError::Unauthorized));
    let stranger = r.transfer(pid, Some("user-2")).await.unwrap_err();
    assert!(matches!(stranger, TransferError::Unauthorized));
    let missing = r.transfer(pid + 100, Some(USER)).await.unwrap_err();
    assert!(matches!(missing, TransferError::PlaylistNotFound));

    assert!(provider.created_playlists().is_empty());
}

#[tokio::test]
async fn missing_credential_is_fatal_before_remote_work() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    store.delete_credential(USER).await.unwrap();
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a"));
    let cfg = test_config(&td);

    let err = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap_err();

    assert!(matches!(err, TransferError::NotConnected));
    assert!(provider.created_playlists().is_empty());
    assert!(store.get_playlist(pid).await.unwrap().unwrap().remote_url.is_none());
}

#[tokio::test]
async fn remote_create_failure_aborts_without_writes() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a").with_failing_create());
    let cfg = test_config(&td);
    let r = reconciler(&cfg, &store, &provider);

    let err = r.transfer(pid, Some(USER)).await.unwrap_err();

    assert!(matches!(err, TransferError::RemoteCreateFailed(_)));
    assert!(provider.search_calls().is_empty());
    assert!(store.get_playlist(pid).await.unwrap().unwrap().remote_url.is_none());
    assert!(store.list_tracks(pid).await.unwrap()[0].remote_track_id.is_none());
    // lease was released, so a later attempt is not blocked
    assert!(store.try_acquire_transfer_lock(pid, "probe", 60).await.unwrap());
}

#[tokio::test]
async fn expired_token_is_refreshed_before_transfer() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    store.save_credential(credential(-1_000)).await.unwrap();
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a"));
    let cfg = test_config(&td);

    reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap();

    assert_eq!(provider.refresh_calls(), 1);
    let cred = store.load_credential(USER).await.unwrap().unwrap();
    assert_eq!(cred.access_token, "access-1");
}

#[tokio::test]
async fn refresh_failure_is_fatal() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    store.save_credential(credential(-1_000)).await.unwrap();
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a").with_failing_refresh());
    let cfg = test_config(&td);

    let err = reconciler(&cfg, &store, &provider).transfer(pid, Some(USER)).await.unwrap_err();

    assert!(matches!(err, TransferError::RefreshFailed(_)));
    assert!(provider.created_playlists().is_empty());
}

#[tokio::test]
async fn running_transfer_blocks_a_second_one() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    let provider = Arc::new(MockProvider::new().with_track("A", "x", "a"));
    let cfg = test_config(&td);
    let r = reconciler(&cfg, &store, &provider);

    assert!(store.try_acquire_transfer_lock(pid, "other-worker", 600).await.unwrap());
    let err = r.transfer(pid, Some(USER)).await.unwrap_err();
    assert!(matches!(err, TransferError::TransferInProgress));
    assert!(provider.created_playlists().is_empty());

    store.release_transfer_lock(pid, "other-worker").await.unwrap();
    r.transfer(pid, Some(USER)).await.unwrap();
    assert_eq!(provider.created_playlists().len(), 1);
}

/// Provider that deletes the local playlist while its remote copy is created.
struct DeletesDuringCreate {
    inner: MockProvider,
    store: Store,
    playlist_id: i64,
}

#[async_trait]
impl MusicProvider for DeletesDuringCreate {
    fn name(&self) -> &str {
        "deletes-during-create"
    }

    async fn exchange_code(&self, code: &str) -> anyhow::Result<TokenGrant> {
        self.inner.exchange_code(code).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> anyhow::Result<TokenGrant> {
        self.inner.refresh_token(refresh_token).await
    }

    async fn current_user(&self, access_token: &str) -> anyhow::Result<RemoteProfile> {
        self.inner.current_user(access_token).await
    }

    async fn create_playlist(
        &self,
        access_token: &str,
        remote_user_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> anyhow::Result<RemotePlaylist> {
        self.store.delete_playlist(self.playlist_id).await?;
        self.inner
            .create_playlist(access_token, remote_user_id, name, description, public)
            .await
    }

    async fn search_tracks(&self, access_token: &str, query: &str, limit: u32) -> anyhow::Result<Vec<RemoteTrack>> {
        self.inner.search_tracks(access_token, query, limit).await
    }

    async fn add_tracks(&self, access_token: &str, playlist_id: &str, uris: &[String]) -> anyhow::Result<()> {
        self.inner.add_tracks(access_token, playlist_id, uris).await
    }
}

#[tokio::test]
async fn playlist_deleted_mid_transfer_is_not_found() {
    let (td, store, pid) = setup(&[("A", "x")]).await;
    let provider = Arc::new(DeletesDuringCreate {
        inner: MockProvider::new().with_track("A", "x", "a"),
        store: store.clone(),
        playlist_id: pid,
    });
    let cfg = test_config(&td);

    let err = PlaylistReconciler::new(&cfg, store.clone(), provider.clone())
        .transfer(pid, Some(USER))
        .await
        .unwrap_err();

    assert!(matches!(err, TransferError::PlaylistNotFound), "got {:?}", err);
    assert_eq!(provider.inner.created_playlists().len(), 1);
    assert!(store.get_playlist(pid).await.unwrap().is_none());
}
