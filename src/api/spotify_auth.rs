use super::MusicProvider;
use crate::config::SpotifyConfig;
use crate::error::{TransferError, TransferResult};
use crate::models::Credential;
use crate::store::Store;
use anyhow::{anyhow, Result};
use chrono::Utc;
use tracing::info;
use url::Url;

/// Account linking follows the authorization-code flow:
/// 1. `authorize_url` builds the Spotify consent URL, with the local user id as `state`.
/// 2. Spotify redirects the browser to the callback route with `code` and `state`.
/// 3. `connect` checks `state`, exchanges the code, reads `/me` and stores the credential.
const SCOPES: [&str; 4] = [
    "playlist-modify-public",
    "playlist-modify-private",
    "user-read-private",
    "user-read-email",
];

pub fn authorize_url(cfg: &SpotifyConfig, user_id: &str) -> Result<String> {
    let mut url = Url::parse(&format!("{}/authorize", cfg.auth_base))?;
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("client_id", &cfg.client_id)
        .append_pair("scope", &SCOPES.join(" "))
        .append_pair("redirect_uri", &cfg.redirect_uri)
        .append_pair("state", user_id)
        .append_pair("show_dialog", "true");
    Ok(url.to_string())
}

/// Extract `code` and `state` from a pasted redirect URL.
pub fn code_and_state_from_redirect(redirect: &str) -> Result<(String, String)> {
    let parsed = Url::parse(redirect.trim()).map_err(|e| anyhow!("invalid url pasted: {}", e))?;
    let param = |name: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    };
    if let Some(err) = param("error") {
        return Err(anyhow!("authorization denied: {}", err));
    }
    let code = param("code").ok_or_else(|| anyhow!("no code in redirect URL"))?;
    let state = param("state").ok_or_else(|| anyhow!("no state in redirect URL"))?;
    Ok((code, state))
}

/// Finish linking: exchange `code` and store the resulting credential for the caller.
/// Re-connecting replaces the existing credential.
pub async fn connect(
    store: &Store,
    provider: &dyn MusicProvider,
    caller: Option<&str>,
    code: &str,
    state: &str,
) -> TransferResult<Credential> {
    let user_id = caller.ok_or(TransferError::Unauthorized)?;
    if user_id != state {
        return Err(TransferError::InvalidState);
    }

    let grant = provider
        .exchange_code(code)
        .await
        .map_err(|e| TransferError::ExchangeFailed(e.to_string()))?;
    let refresh_token = grant
        .refresh_token
        .ok_or_else(|| TransferError::ExchangeFailed("no refresh_token in response".into()))?;
    let profile = provider
        .current_user(&grant.access_token)
        .await
        .map_err(|e| TransferError::ExchangeFailed(format!("failed to get user profile: {}", e)))?;

    let cred = Credential {
        user_id: user_id.to_string(),
        access_token: grant.access_token,
        refresh_token,
        expires_at: Utc::now().timestamp_millis() + grant.expires_in * 1000,
        remote_user_id: profile.id,
        remote_display_name: profile.display_name,
    };
    store.save_credential(cred.clone()).await?;
    info!(user = %user_id, remote_user = %cred.remote_user_id, "Spotify account connected");
    Ok(cred)
}

/// Remove the caller's credential. Returns whether one existed.
pub async fn disconnect(store: &Store, caller: Option<&str>) -> TransferResult<bool> {
    let user_id = caller.ok_or(TransferError::Unauthorized)?;
    let removed = store.delete_credential(user_id).await?;
    if removed {
        info!(user = %user_id, "Spotify account disconnected");
    }
    Ok(removed)
}
