use crate::error::{TransferError, TransferResult};
use crate::models::TrackInput;
use crate::reconciler::PlaylistReconciler;
use crate::store::Store;
use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{info, warn};

static JSON_ARRAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[[\s\S]*\]").expect("valid regex"));

const FALLBACK_NAME: &str = "AI Generated Playlist";

/// Parse the song list out of a model response.
///
/// The response is untrusted text: the first `[` .. last `]` span is taken
/// as a JSON array (so prose or code fences around it are ignored), entries
/// without a non-empty name and artist are dropped, and blank optional
/// fields become `None`. No attempt is made to correct names.
pub fn parse_track_list(content: &str) -> Result<Vec<TrackInput>> {
    let trimmed = content.trim();
    let json = JSON_ARRAY
        .find(trimmed)
        .map(|m| m.as_str())
        .unwrap_or(trimmed);
    let parsed: Value =
        serde_json::from_str(json).map_err(|e| anyhow!("Failed to parse AI response: {}", e))?;
    let items = parsed
        .as_array()
        .ok_or_else(|| anyhow!("Failed to parse AI response: expected a JSON array"))?;

    let text = |v: &Value| {
        v.as_str()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let tracks: Vec<TrackInput> = items
        .iter()
        .filter_map(|item| {
            Some(TrackInput {
                name: text(&item["name"])?,
                artist: text(&item["artist"])?,
                album: text(&item["album"]),
                reasoning: text(&item["reasoning"]),
            })
        })
        .collect();

    if tracks.is_empty() {
        return Err(anyhow!("Failed to parse AI response: no usable tracks"));
    }
    Ok(tracks)
}

/// Request for storing a generated playlist.
#[derive(Debug, Clone)]
pub struct GeneratedPlaylist {
    pub query: String,
    pub name: Option<String>,
    pub tracks: Vec<TrackInput>,
}

/// Store a generated playlist for the caller and return its id.
pub async fn save_generated_playlist(
    store: &Store,
    caller: Option<&str>,
    generated: GeneratedPlaylist,
) -> TransferResult<i64> {
    let owner = caller.ok_or(TransferError::Unauthorized)?;
    let name = generated
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let description = format!("Generated from: \"{}\"", generated.query);

    let playlist_id = store
        .insert_playlist(owner, &name, &description, &generated.query)
        .await?;
    for track in generated.tracks {
        store.insert_track(playlist_id, track).await?;
    }
    info!(playlist_id, owner = %owner, "Stored generated playlist {}", name);
    Ok(playlist_id)
}

/// Store a generated playlist and, when `reconciler` is given, transfer it
/// right away. A failed transfer is logged; the stored playlist is kept and
/// its id returned either way.
pub async fn generate_playlist(
    store: &Store,
    reconciler: Option<&PlaylistReconciler>,
    caller: Option<&str>,
    generated: GeneratedPlaylist,
) -> TransferResult<i64> {
    let playlist_id = save_generated_playlist(store, caller, generated).await?;
    if let Some(reconciler) = reconciler {
        match reconciler.transfer(playlist_id, caller).await {
            Ok(s) => info!(
                playlist_id,
                "Spotify playlist created: {}/{} tracks found",
                s.tracks_found,
                s.total_tracks
            ),
            Err(e) => warn!(playlist_id, "Failed to create Spotify playlist: {}", e),
        }
    }
    Ok(playlist_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_array_from_surrounding_prose() {
        let content = r#"Sure! Here is your playlist:
```json
[
  {"name": "Song A", "artist": "Artist X", "album": "Album", "reasoning": "fits"},
  {"name": "Song B", "artist": "Artist Y"}
]
```
Enjoy."#;
        let tracks = parse_track_list(content).unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].album.as_deref(), Some("Album"));
        assert_eq!(tracks[1].reasoning, None);
    }

    #[test]
    fn drops_entries_without_name_or_artist() {
        let content = r#"[{"name": "Song A", "artist": ""}, {"artist": "X"}, {"name": " Song C ", "artist": "Z", "album": " "}]"#;
        let tracks = parse_track_list(content).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].name, "Song C");
        assert_eq!(tracks[0].album, None);
    }

    #[test]
    fn rejects_unusable_responses() {
        assert!(parse_track_list("I cannot help with that.").is_err());
        assert!(parse_track_list("[]").is_err());
        assert!(parse_track_list(r#"{"name": "a", "artist": "b"}"#).is_err());
    }
}
