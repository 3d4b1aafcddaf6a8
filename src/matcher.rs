use crate::api::{CallPolicy, MusicProvider};
use crate::models::{Credential, RemoteTrack};
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolves one (name, artist) pair to the provider's top-ranked track.
///
/// Generated track lists routinely name songs that are not in the catalog,
/// so a miss is a normal outcome: every failure, including HTTP errors and
/// timeouts, comes back as `None`.
#[derive(Clone)]
pub struct TrackMatcher {
    provider: Arc<dyn MusicProvider>,
    policy: CallPolicy,
}

/// Field-scoped search query. Quotes inside the values are dropped so they
/// cannot close the quoted field early.
pub fn build_query(track_name: &str, artist_name: &str) -> String {
    let clean = |s: &str| s.replace('"', "").trim().to_string();
    format!("track:\"{}\" artist:\"{}\"", clean(track_name), clean(artist_name))
}

impl TrackMatcher {
    pub fn new(provider: Arc<dyn MusicProvider>, policy: CallPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn search(&self, track_name: &str, artist_name: &str, credential: &Credential) -> Option<RemoteTrack> {
        let query = build_query(track_name, artist_name);
        let res = self
            .policy
            .retry("search", || self.provider.search_tracks(&credential.access_token, &query, 1))
            .await;
        match res {
            Ok(tracks) => {
                let first = tracks.into_iter().next();
                if first.is_none() {
                    debug!("No match for \"{}\" by \"{}\"", track_name, artist_name);
                }
                first
            }
            Err(e) => {
                warn!("Spotify search failed for \"{}\" by \"{}\": {}", track_name, artist_name, e);
                None
            }
        }
    }
}
