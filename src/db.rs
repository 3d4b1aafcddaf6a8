use crate::models::{Credential, LocalPlaylist, LocalTrack, TrackInput, TrackMatchUpdate};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;

const SCHEMA: &str = include_str!("../db/schema.sql");

pub fn open_or_create(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    run_migrations(&conn)?;
    Ok(conn)
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn credential_from_row(r: &Row<'_>) -> rusqlite::Result<Credential> {
    Ok(Credential {
        user_id: r.get(0)?,
        access_token: r.get(1)?,
        refresh_token: r.get(2)?,
        expires_at: r.get(3)?,
        remote_user_id: r.get(4)?,
        remote_display_name: r.get(5)?,
    })
}

/// Insert or replace the credential for `cred.user_id`. One row per user.
pub fn save_credential(conn: &Connection, cred: &Credential) -> Result<()> {
    conn.execute(
        "INSERT INTO credentials (user_id, access_token, refresh_token, expires_at, remote_user_id, remote_display_name, last_refreshed) VALUES (?1, ?2, ?3, ?4, ?5, ?6, strftime('%s','now')) ON CONFLICT(user_id) DO UPDATE SET access_token = excluded.access_token, refresh_token = excluded.refresh_token, expires_at = excluded.expires_at, remote_user_id = excluded.remote_user_id, remote_display_name = excluded.remote_display_name, last_refreshed = strftime('%s','now')",
        params![
            cred.user_id,
            cred.access_token,
            cred.refresh_token,
            cred.expires_at,
            cred.remote_user_id,
            cred.remote_display_name
        ],
    )?;
    Ok(())
}

pub fn load_credential(conn: &Connection, user_id: &str) -> Result<Option<Credential>> {
    let mut stmt = conn.prepare("SELECT user_id, access_token, refresh_token, expires_at, remote_user_id, remote_display_name FROM credentials WHERE user_id = ?1 LIMIT 1")?;
    let row = stmt.query_row(params![user_id], credential_from_row).optional()?;
    Ok(row)
}

/// Replace the token triple, but only if the stored refresh token is still
/// `expected_refresh_token`. Returns false when another refresh got there first.
pub fn update_credential_tokens(
    conn: &Connection,
    user_id: &str,
    expected_refresh_token: &str,
    access_token: &str,
    refresh_token: &str,
    expires_at: i64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE credentials SET access_token = ?1, refresh_token = ?2, expires_at = ?3, last_refreshed = strftime('%s','now') WHERE user_id = ?4 AND refresh_token = ?5",
        params![access_token, refresh_token, expires_at, user_id, expected_refresh_token],
    )?;
    Ok(changed == 1)
}

pub fn delete_credential(conn: &Connection, user_id: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM credentials WHERE user_id = ?1", params![user_id])?;
    Ok(removed > 0)
}

fn playlist_from_row(r: &Row<'_>) -> rusqlite::Result<LocalPlaylist> {
    Ok(LocalPlaylist {
        id: r.get(0)?,
        owner_id: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        source_query: r.get(4)?,
        created_at: r.get(5)?,
        remote_url: r.get(6)?,
        image_url: r.get(7)?,
    })
}

const PLAYLIST_COLUMNS: &str =
    "id, owner_id, name, description, source_query, created_at, remote_url, image_url";

pub fn insert_playlist(
    conn: &Connection,
    owner_id: &str,
    name: &str,
    description: &str,
    source_query: &str,
) -> Result<i64> {
    let now = Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO playlists (owner_id, name, description, source_query, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![owner_id, name, description, source_query, now],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_playlist(conn: &Connection, playlist_id: i64) -> Result<Option<LocalPlaylist>> {
    let sql = format!("SELECT {} FROM playlists WHERE id = ?1 LIMIT 1", PLAYLIST_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let row = stmt.query_row(params![playlist_id], playlist_from_row).optional()?;
    Ok(row)
}

/// All playlists of one owner, newest first.
pub fn list_playlists_by_owner(conn: &Connection, owner_id: &str) -> Result<Vec<LocalPlaylist>> {
    let sql = format!(
        "SELECT {} FROM playlists WHERE owner_id = ?1 ORDER BY created_at DESC, id DESC",
        PLAYLIST_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner_id], playlist_from_row)?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Delete a playlist together with its tracks and any stale transfer lease.
pub fn delete_playlist(conn: &mut Connection, playlist_id: i64) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM tracks WHERE playlist_id = ?1", params![playlist_id])?;
    tx.execute("DELETE FROM transfer_locks WHERE playlist_id = ?1", params![playlist_id])?;
    tx.execute("DELETE FROM playlists WHERE id = ?1", params![playlist_id])?;
    tx.commit()?;
    Ok(())
}

/// Append a track at the end of the playlist.
pub fn insert_track(conn: &Connection, playlist_id: i64, track: &TrackInput) -> Result<i64> {
    conn.execute(
        "INSERT INTO tracks (playlist_id, position, name, artist, album, reasoning) VALUES (?1, (SELECT COALESCE(MAX(position), -1) + 1 FROM tracks WHERE playlist_id = ?1), ?2, ?3, ?4, ?5)",
        params![playlist_id, track.name, track.artist, track.album, track.reasoning],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn list_tracks(conn: &Connection, playlist_id: i64) -> Result<Vec<LocalTrack>> {
    let mut stmt = conn.prepare("SELECT id, playlist_id, position, name, artist, album, reasoning, remote_track_id, preview_url, image_url, duration_ms FROM tracks WHERE playlist_id = ?1 ORDER BY position ASC, id ASC")?;
    let rows = stmt.query_map(params![playlist_id], |r| {
        Ok(LocalTrack {
            id: r.get(0)?,
            playlist_id: r.get(1)?,
            position: r.get(2)?,
            name: r.get(3)?,
            artist: r.get(4)?,
            album: r.get(5)?,
            reasoning: r.get(6)?,
            remote_track_id: r.get(7)?,
            preview_url: r.get(8)?,
            image_url: r.get(9)?,
            duration_ms: r.get(10)?,
        })
    })?;
    let mut v = Vec::new();
    for r in rows {
        v.push(r?);
    }
    Ok(v)
}

/// Link a playlist to its Spotify copy and store matched track metadata in one
/// transaction. The playlist write only applies while `remote_url` is unset;
/// returns false (and writes nothing) if it was already set.
pub fn record_transfer_result(
    conn: &mut Connection,
    playlist_id: i64,
    remote_url: &str,
    image_url: &str,
    updates: &[TrackMatchUpdate],
) -> Result<bool> {
    let tx = conn.transaction()?;
    let linked = tx.execute(
        "UPDATE playlists SET remote_url = ?1, image_url = ?2 WHERE id = ?3 AND remote_url IS NULL",
        params![remote_url, image_url, playlist_id],
    )?;
    if linked != 1 {
        tx.rollback()?;
        return Ok(false);
    }
    for u in updates {
        // Only fill what Spotify returned; keep existing values otherwise.
        tx.execute(
            "UPDATE tracks SET remote_track_id = ?1, preview_url = COALESCE(?2, preview_url), image_url = COALESCE(?3, image_url), duration_ms = COALESCE(?4, duration_ms) WHERE id = ?5 AND playlist_id = ?6",
            params![u.remote_track_id, u.preview_url, u.image_url, u.duration_ms, u.track_id, playlist_id],
        )?;
    }
    tx.commit()?;
    Ok(true)
}

/// Try to take the transfer lease for a playlist. Returns true if acquired.
/// An expired lease is taken over.
///
/// The write lock is taken before the read, so concurrent callers queue on
/// `busy_timeout` instead of failing the shared-to-write upgrade.
pub fn try_acquire_transfer_lock(conn: &mut Connection, playlist_id: i64, holder_id: &str, ttl_seconds: i64) -> Result<bool> {
    let now = Utc::now().timestamp();
    let expires_at = now + ttl_seconds;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let active = {
        let mut stmt = tx.prepare("SELECT expires_at FROM transfer_locks WHERE playlist_id = ?1 LIMIT 1")?;
        stmt.query_row(params![playlist_id], |r| r.get::<_, i64>(0))
            .optional()?
            .map(|e| e > now)
            .unwrap_or(false)
    };
    if active {
        tx.commit()?;
        return Ok(false);
    }
    tx.execute(
        "INSERT INTO transfer_locks (playlist_id, holder_id, locked_at, expires_at) VALUES (?1, ?2, ?3, ?4) ON CONFLICT(playlist_id) DO UPDATE SET holder_id = excluded.holder_id, locked_at = excluded.locked_at, expires_at = excluded.expires_at",
        params![playlist_id, holder_id, now, expires_at],
    )?;
    tx.commit()?;
    Ok(true)
}

/// Release a transfer lease (only if owned by `holder_id`)
pub fn release_transfer_lock(conn: &mut Connection, playlist_id: i64, holder_id: &str) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM transfer_locks WHERE playlist_id = ?1 AND holder_id = ?2", params![playlist_id, holder_id])?;
    tx.commit()?;
    Ok(())
}
