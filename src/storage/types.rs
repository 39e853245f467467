use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process has the database locked
    #[error("The feed database is locked by another process. Please close it and try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    /// (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A subscribed feed with its full fetch state.
///
/// The fetch cycle mutates the state fields in memory and persists them in
/// one shot via `Database::save_feed_state`, so a cycle touches each feed
/// row exactly once.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    /// Canonical (normalized) fetch URL.
    pub self_link: String,
    /// Hex digest of `self_link`, the feed's duplicate-detection key.
    pub self_link_hash: String,
    pub title: String,
    /// The feed's website, if it declares one.
    pub alternate_link: Option<String>,
    /// Validator from the last 200 response, echoed as `If-None-Match`.
    pub etag: Option<String>,
    /// Validator from the last 200 response, echoed as `If-Modified-Since`.
    pub last_modified: Option<String>,
    pub enabled: bool,
    /// Failed cycles accumulated since the feed was last enabled; only an
    /// explicit re-enable resets it.
    pub error_count: i64,
    /// HTTP status (or synthetic status) recorded by the last cycle.
    pub last_status: Option<i64>,
    /// Unix time of the last cycle that looked at this feed.
    pub last_checked_on: Option<i64>,
    /// Unix time of the last cycle that stored new or updated entries.
    pub last_updated_on: Option<i64>,
    /// Unix time the favicon was last refreshed.
    pub icon_updated_on: Option<i64>,
}

/// An entry as produced by translation, ready to be stored.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub guid: String,
    /// Hex digest of `guid`, the entry's deduplication key.
    pub guid_hash: String,
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub content_type: String,
    pub link: Option<String>,
    /// Unix time the entry claims it was published (already clamped).
    pub published_on: i64,
}

/// A stored entry.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub guid_hash: String,
    pub title: String,
    pub author: Option<String>,
    pub content: String,
    pub content_type: String,
    pub link: Option<String>,
    pub published_on: i64,
    /// Unix time this row was first stored; never updated afterwards.
    pub fetched_on: i64,
}

// ============================================================================
// Hashing
// ============================================================================

/// Hex SHA-256 of a string, used for feed and entry identity keys.
///
/// GUIDs and URLs have no length bound, so the digest keeps the unique
/// columns small and index-friendly.
pub fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}
