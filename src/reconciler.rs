use crate::api::{backoff_for, CallPolicy, MusicProvider, RateLimited};
use crate::config::Config;
use crate::error::{TransferError, TransferResult};
use crate::matcher::TrackMatcher;
use crate::models::{Credential, LocalPlaylist, LocalTrack, RemoteTrack, TrackMatchUpdate, TransferSummary};
use crate::store::Store;
use crate::tokens::TokenRefresher;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How one local track ended up after the match loop.
#[derive(Debug, Clone)]
enum Resolution {
    /// Matched by an earlier transfer attempt; carries the URI.
    Reused(String),
    /// Matched by this run.
    Matched(RemoteTrack),
    Missing,
}

impl Resolution {
    fn uri(&self) -> Option<&str> {
        match self {
            Resolution::Reused(uri) => Some(uri.as_str()),
            Resolution::Matched(t) => Some(t.uri.as_str()),
            Resolution::Missing => None,
        }
    }
}

/// Turns a stored playlist into a real Spotify playlist.
///
/// A transfer runs, in order: owner check, already-transferred check and
/// lease, token refresh, remote create, match loop, batched adds, and one
/// persistence transaction. Only the steps up to and including remote create
/// (plus the final write) can fail the transfer; search misses and rejected
/// add batches are logged and reported in the summary.
pub struct PlaylistReconciler {
    store: Store,
    provider: Arc<dyn MusicProvider>,
    tokens: Arc<TokenRefresher>,
    matcher: TrackMatcher,
    policy: CallPolicy,
    batch_size: usize,
    search_concurrency: usize,
    lock_ttl_secs: i64,
    default_image: String,
}

impl PlaylistReconciler {
    pub fn new(cfg: &Config, store: Store, provider: Arc<dyn MusicProvider>) -> Self {
        let policy = CallPolicy::from_config(cfg);
        let tokens = Arc::new(TokenRefresher::new(store.clone(), provider.clone(), policy));
        Self {
            matcher: TrackMatcher::new(provider.clone(), policy),
            store,
            provider,
            tokens,
            policy,
            batch_size: cfg.batch_size.clamp(1, 100),
            search_concurrency: cfg.search_concurrency.max(1),
            lock_ttl_secs: cfg.transfer_lock_ttl_secs,
            default_image: cfg.default_playlist_image.clone(),
        }
    }

    pub async fn transfer(&self, playlist_id: i64, caller: Option<&str>) -> TransferResult<TransferSummary> {
        let user_id = caller.ok_or(TransferError::Unauthorized)?;
        let playlist = self
            .store
            .get_playlist(playlist_id)
            .await?
            .ok_or(TransferError::PlaylistNotFound)?;
        if playlist.owner_id != user_id {
            return Err(TransferError::Unauthorized);
        }
        if playlist.remote_url.is_some() {
            return Err(TransferError::AlreadyTransferred);
        }

        let holder_id = Uuid::new_v4().to_string();
        if !self
            .store
            .try_acquire_transfer_lock(playlist_id, &holder_id, self.lock_ttl_secs)
            .await?
        {
            info!(playlist_id, "Skipped transfer because lock could not be acquired");
            return Err(TransferError::TransferInProgress);
        }

        let res = self.transfer_locked(playlist_id, user_id).await;

        if let Err(e) = self.store.release_transfer_lock(playlist_id, &holder_id).await {
            warn!(playlist_id, "Failed to release transfer lock: {}", e);
        }
        match &res {
            Ok(s) => info!(
                playlist_id,
                "Spotify playlist created: {}/{} tracks found, {} added",
                s.tracks_found,
                s.total_tracks,
                s.tracks_added
            ),
            Err(e) => warn!(playlist_id, "Transfer failed: {}", e),
        }
        res
    }

    async fn transfer_locked(&self, playlist_id: i64, user_id: &str) -> TransferResult<TransferSummary> {
        // Re-read under the lease: a transfer may have finished since the first check.
        let playlist = self
            .store
            .get_playlist(playlist_id)
            .await?
            .ok_or(TransferError::PlaylistNotFound)?;
        if playlist.remote_url.is_some() {
            return Err(TransferError::AlreadyTransferred);
        }

        let cred = self.tokens.ensure_valid_token(user_id).await?;
        let tracks = self.store.list_tracks(playlist_id).await?;

        let description = remote_description(&playlist);
        let remote = self
            .policy
            .once(self.provider.create_playlist(
                &cred.access_token,
                &cred.remote_user_id,
                &playlist.name,
                &description,
                false,
            ))
            .await
            .map_err(|e| TransferError::RemoteCreateFailed(e.to_string()))?;
        let image_url = remote
            .images
            .first()
            .cloned()
            .unwrap_or_else(|| self.default_image.clone());
        info!(playlist_id, remote_id = %remote.id, "Created remote playlist {}", playlist.name);

        let resolutions = self.match_tracks(&tracks, &cred).await;
        let uris: Vec<String> = resolutions
            .iter()
            .filter_map(|r| r.uri().map(|u| u.to_string()))
            .collect();

        let batch_ok = self.add_in_batches(&cred, &remote.id, &uris).await;

        // Walk tracks and URIs together; the i-th URI sits in batch i / batch_size.
        let mut updates = Vec::new();
        let mut not_found = Vec::new();
        let mut uri_index = 0usize;
        let mut tracks_added = 0usize;
        for (track, resolution) in tracks.iter().zip(&resolutions) {
            if resolution.uri().is_none() {
                not_found.push(format!("{} - {}", track.name, track.artist));
                continue;
            }
            let confirmed = batch_ok[uri_index / self.batch_size];
            uri_index += 1;
            if !confirmed {
                continue;
            }
            tracks_added += 1;
            if let Resolution::Matched(t) = resolution {
                updates.push(TrackMatchUpdate {
                    track_id: track.id,
                    remote_track_id: t.id.clone(),
                    preview_url: t.preview_url.clone(),
                    image_url: t.image_url.clone(),
                    duration_ms: Some(t.duration_ms),
                });
            }
        }

        let linked = self
            .store
            .record_transfer_result(playlist_id, &remote.external_url, &image_url, updates)
            .await?;
        if !linked {
            if self.store.get_playlist(playlist_id).await?.is_none() {
                error!(
                    playlist_id,
                    remote_id = %remote.id,
                    "Playlist was deleted while the transfer ran; remote playlist left orphaned"
                );
                return Err(TransferError::PlaylistNotFound);
            }
            error!(
                playlist_id,
                remote_id = %remote.id,
                "Playlist was linked by another transfer while this one ran; remote playlist left orphaned"
            );
            return Err(TransferError::AlreadyTransferred);
        }

        Ok(TransferSummary {
            remote_url: remote.external_url,
            image_url,
            tracks_found: uris.len(),
            tracks_added,
            total_tracks: tracks.len(),
            not_found,
        })
    }

    /// Resolve every track in playlist order. With `search_concurrency > 1`
    /// searches overlap, but results still come back in input order.
    async fn match_tracks(&self, tracks: &[LocalTrack], cred: &Credential) -> Vec<Resolution> {
        stream::iter(tracks)
            .map(|track| self.resolve(track, cred))
            .buffered(self.search_concurrency)
            .collect()
            .await
    }

    async fn resolve(&self, track: &LocalTrack, cred: &Credential) -> Resolution {
        if let Some(id) = &track.remote_track_id {
            return Resolution::Reused(self.provider.track_uri(id));
        }
        match self.matcher.search(&track.name, &track.artist, cred).await {
            Some(t) => Resolution::Matched(t),
            None => {
                info!("Track not found on Spotify: {} by {}", track.name, track.artist);
                Resolution::Missing
            }
        }
    }

    /// Submit URIs in order, `batch_size` at a time. Returns one flag per
    /// batch telling whether Spotify accepted it. A rejected batch does not
    /// stop the following ones. Only 429 answers are retried: anything else
    /// may have been partially applied.
    async fn add_in_batches(&self, cred: &Credential, playlist_id: &str, uris: &[String]) -> Vec<bool> {
        let mut results = Vec::new();
        for (index, chunk) in uris.chunks(self.batch_size).enumerate() {
            let mut attempt = 0u32;
            let ok = loop {
                attempt += 1;
                let res = self
                    .policy
                    .once(self.provider.add_tracks(&cred.access_token, playlist_id, chunk))
                    .await;
                match res {
                    Ok(()) => {
                        info!("Added batch {} ({} tracks) to {}", index, chunk.len(), playlist_id);
                        break true;
                    }
                    Err(e) if e.downcast_ref::<RateLimited>().is_some() && attempt <= self.policy.max_retries => {
                        let wait = backoff_for(&e, attempt);
                        warn!("Rate limited adding batch {}: {}. Sleeping {:?} before retry.", index, e, wait);
                        tokio::time::sleep(wait).await;
                    }
                    Err(e) => {
                        error!("Failed to add batch {} ({} tracks) to {}: {}", index, chunk.len(), playlist_id, e);
                        break false;
                    }
                }
            };
            results.push(ok);
        }
        results
    }
}

/// Description sent to Spotify: the stored one, or the originating request.
fn remote_description(playlist: &LocalPlaylist) -> String {
    if playlist.description.trim().is_empty() {
        format!("Generated from: \"{}\"", playlist.source_query)
    } else {
        playlist.description.clone()
    }
}
