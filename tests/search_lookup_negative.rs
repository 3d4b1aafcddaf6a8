use ai_playlist_spotify_transfer as lib;
use lib::api::spotify::SpotifyProvider;
use lib::api::CallPolicy;
use lib::config::SpotifyConfig;
use lib::matcher::TrackMatcher;
use lib::models::Credential;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn matcher(base: &str, max_retries: u32) -> TrackMatcher {
    let cfg = SpotifyConfig {
        client_id: "cid".into(),
        client_secret: "csecret".into(),
        auth_base: base.to_string(),
        api_base: base.to_string(),
        ..SpotifyConfig::default()
    };
    let provider = SpotifyProvider::new(cfg, Duration::from_secs(5)).unwrap();
    let policy = CallPolicy { timeout: Duration::from_secs(5), max_retries };
    TrackMatcher::new(Arc::new(provider), policy)
}

fn credential() -> Credential {
    Credential {
        user_id: "user-1".into(),
        access_token: "valid".into(),
        refresh_token: "r".into(),
        expires_at: chrono::Utc::now().timestamp_millis() + 3_600_000,
        remote_user_id: "mock_user".into(),
        remote_display_name: None,
    }
}

#[test]
fn spotify_search_returns_none_on_error() {
    let mut server = Server::new();
    let base = server.url();

    let m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(500)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"server"}"#)
        .expect(1)
        .create();

    let matcher = matcher(&base, 0);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let res = rt.block_on(matcher.search("Title", "Artist", &credential()));
    assert!(res.is_none());
    m.assert();
}

#[test]
fn spotify_search_returns_none_on_empty_result() {
    let mut server = Server::new();
    let base = server.url();

    let _m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"tracks": {"items": []}}).to_string())
        .create();

    let matcher = matcher(&base, 0);
    let rt = tokio::runtime::Runtime::new().unwrap();
    assert!(rt.block_on(matcher.search("Nope", "Nobody", &credential())).is_none());
}

#[test]
fn spotify_search_sends_field_scoped_query_and_takes_top_hit() {
    let mut server = Server::new();
    let base = server.url();

    let m = server
        .mock("GET", "/search")
        .match_header("authorization", "Bearer valid")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "track:\"Song A\" artist:\"Artist X\"".into()),
            Matcher::UrlEncoded("type".into(), "track".into()),
            Matcher::UrlEncoded("limit".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({"tracks": {"items": [{
                "id": "1",
                "uri": "spotify:track:1",
                "name": "Song A",
                "artists": [{"name": "Artist X"}],
                "album": {"name": "Album", "images": [{"url": "https://i.scdn.co/image/a"}]},
                "preview_url": "https://p.scdn.co/mp3-preview/a",
                "duration_ms": 200000
            }]}})
            .to_string(),
        )
        .create();

    let matcher = matcher(&base, 0);
    let rt = tokio::runtime::Runtime::new().unwrap();
    let track = rt
        .block_on(matcher.search("Song A", "Artist X", &credential()))
        .expect("match");
    assert_eq!(track.uri, "spotify:track:1");
    assert_eq!(track.image_url.as_deref(), Some("https://i.scdn.co/image/a"));
    assert_eq!(track.duration_ms, 200000);
    m.assert();
}

#[test]
fn spotify_search_retries_server_errors_within_budget() {
    let mut server = Server::new();
    let base = server.url();

    let m = server
        .mock("GET", "/search")
        .match_query(Matcher::Any)
        .with_status(503)
        .expect(2)
        .create();

    let matcher = matcher(&base, 1);
    let rt = tokio::runtime::Runtime::new().unwrap();
    assert!(rt.block_on(matcher.search("Title", "Artist", &credential())).is_none());
    m.assert();
}
