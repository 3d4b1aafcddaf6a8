use thiserror::Error;

/// Failures surfaced to the caller of a connect or transfer operation.
///
/// Per-track search misses and rejected add batches never show up here; they
/// are logged and folded into the transfer summary instead.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Not authenticated or not the owner of this playlist")]
    Unauthorized,
    #[error("Playlist not found")]
    PlaylistNotFound,
    #[error("Spotify not connected. Please connect your Spotify account first.")]
    NotConnected,
    #[error("Failed to refresh Spotify token: {0}")]
    RefreshFailed(String),
    #[error("Playlist has already been transferred to Spotify")]
    AlreadyTransferred,
    #[error("A transfer for this playlist is already running")]
    TransferInProgress,
    #[error("Failed to create Spotify playlist: {0}")]
    RemoteCreateFailed(String),
    #[error("Invalid state parameter")]
    InvalidState,
    #[error("Failed to connect Spotify account: {0}")]
    ExchangeFailed(String),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type TransferResult<T> = std::result::Result<T, TransferError>;
