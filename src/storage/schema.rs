use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection pool and run migrations.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if another process has the database
    /// locked (SQLITE_BUSY, SQLITE_LOCKED, SQLITE_CANTOPEN).
    /// Returns `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let url = format!("sqlite:{path}?mode=rwc");

        // busy_timeout=5000: SQLite waits up to 5 seconds for locks to
        // release before returning SQLITE_BUSY, which absorbs transient
        // contention between concurrent fetch workers.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .pragma("foreign_keys", "ON");

        // A :memory: database exists per connection, so the pool must not
        // grow past one there. On disk, SQLite is single-writer; 5
        // connections covers the fetch workers' concurrent reads.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run idempotent migrations: every statement is CREATE IF NOT EXISTS,
    /// so re-opening an existing database is a no-op.
    async fn migrate(&self) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                self_link TEXT NOT NULL,
                self_link_hash TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL DEFAULT '',
                alternate_link TEXT,
                etag TEXT,
                last_modified TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                error_count INTEGER NOT NULL DEFAULT 0,
                last_status INTEGER,
                last_checked_on INTEGER,
                last_updated_on INTEGER,
                icon BLOB,
                icon_type TEXT,
                icon_updated_on INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                guid_hash TEXT UNIQUE NOT NULL,
                title TEXT NOT NULL,
                author TEXT,
                content TEXT NOT NULL DEFAULT '',
                content_type TEXT NOT NULL DEFAULT 'text/html',
                link TEXT,
                published_on INTEGER NOT NULL,
                fetched_on INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                user_name TEXT NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                created_on INTEGER NOT NULL,
                UNIQUE(user_name, feed_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS read_marks (
                id INTEGER PRIMARY KEY,
                user_name TEXT NOT NULL,
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                marked_on INTEGER NOT NULL,
                UNIQUE(user_name, entry_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS saved_marks (
                id INTEGER PRIMARY KEY,
                user_name TEXT NOT NULL,
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                marked_on INTEGER NOT NULL,
                UNIQUE(user_name, entry_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_entries_feed ON entries(feed_id)",
            "CREATE INDEX IF NOT EXISTS idx_entries_published ON entries(published_on DESC)",
            "CREATE INDEX IF NOT EXISTS idx_feeds_enabled ON feeds(enabled)",
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_feed ON subscriptions(feed_id)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| DatabaseError::Migration(e.to_string()))?;
        }

        Ok(())
    }
}
