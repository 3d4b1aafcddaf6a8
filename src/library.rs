//! Owner-checked playlist operations on top of the store.
//!
//! A playlist that exists but belongs to someone else is reported as not
//! found, so ids of other users' playlists cannot be probed.
use crate::error::{TransferError, TransferResult};
use crate::models::{LocalPlaylist, LocalTrack, TrackInput};
use crate::store::Store;

async fn owned_playlist(store: &Store, caller: Option<&str>, playlist_id: i64) -> TransferResult<LocalPlaylist> {
    let user_id = caller.ok_or(TransferError::Unauthorized)?;
    match store.get_playlist(playlist_id).await? {
        Some(p) if p.owner_id == user_id => Ok(p),
        _ => Err(TransferError::PlaylistNotFound),
    }
}

/// The caller's playlists, newest first. No caller means no playlists.
pub async fn list_user_playlists(store: &Store, caller: Option<&str>) -> TransferResult<Vec<LocalPlaylist>> {
    match caller {
        Some(user_id) => Ok(store.list_playlists(user_id).await?),
        None => Ok(Vec::new()),
    }
}

pub async fn get_playlist_with_tracks(
    store: &Store,
    caller: Option<&str>,
    playlist_id: i64,
) -> TransferResult<(LocalPlaylist, Vec<LocalTrack>)> {
    let playlist = owned_playlist(store, caller, playlist_id).await?;
    let tracks = store.list_tracks(playlist_id).await?;
    Ok((playlist, tracks))
}

pub async fn add_track(store: &Store, caller: Option<&str>, playlist_id: i64, track: TrackInput) -> TransferResult<i64> {
    owned_playlist(store, caller, playlist_id).await?;
    Ok(store.insert_track(playlist_id, track).await?)
}

/// Delete a playlist and all its tracks. The Spotify copy, if any, is left alone.
pub async fn delete_playlist(store: &Store, caller: Option<&str>, playlist_id: i64) -> TransferResult<()> {
    owned_playlist(store, caller, playlist_id).await?;
    store.delete_playlist(playlist_id).await?;
    Ok(())
}
