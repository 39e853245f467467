use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{DatabaseError, Entry, NewEntry};

/// Entries are written in chunks of this size, keeping each statement's
/// bind count (10 columns per row) well under SQLite's variable limit.
const BATCH_SIZE: usize = 100;

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Upsert entries for a feed, returning the number of new entries.
    ///
    /// Uses a two-phase write inside one transaction. Phase 1 inserts only
    /// previously unseen entries (INSERT OR IGNORE on `guid_hash`) and
    /// counts them via `changes()`. Phase 2 refreshes the mutable fields
    /// (title, author, content, content_type) of every entry in the batch.
    /// Identity fields, `published_on`, and `fetched_on` are never touched
    /// after the first insert, so an entry keeps its place in history no
    /// matter how often its feed republishes it.
    pub async fn upsert_entries(
        &self,
        feed_id: i64,
        entries: &[NewEntry],
    ) -> Result<usize, DatabaseError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        let mut total_inserted: usize = 0;

        for chunk in entries.chunks(BATCH_SIZE) {
            // Phase 1: insert new entries only
            let mut insert_builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO entries \
                 (feed_id, guid, guid_hash, title, author, content, content_type, link, \
                  published_on, fetched_on) ",
            );

            insert_builder.push_values(chunk, |mut b, entry| {
                b.push_bind(feed_id)
                    .push_bind(&entry.guid)
                    .push_bind(&entry.guid_hash)
                    .push_bind(&entry.title)
                    .push_bind(&entry.author)
                    .push_bind(&entry.content)
                    .push_bind(&entry.content_type)
                    .push_bind(&entry.link)
                    .push_bind(entry.published_on)
                    .push_bind(now);
            });

            insert_builder.build().execute(&mut *tx).await?;

            let changes: (i64,) = sqlx::query_as("SELECT changes()")
                .fetch_one(&mut *tx)
                .await?;
            total_inserted += changes.0 as usize;

            // Phase 2: refresh mutable fields for the whole batch
            let mut update_builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE entries SET title = CASE guid_hash ");

            for entry in chunk {
                update_builder.push("WHEN ");
                update_builder.push_bind(&entry.guid_hash);
                update_builder.push(" THEN ");
                update_builder.push_bind(&entry.title);
                update_builder.push(" ");
            }
            update_builder.push("ELSE title END, author = CASE guid_hash ");
            for entry in chunk {
                update_builder.push("WHEN ");
                update_builder.push_bind(&entry.guid_hash);
                update_builder.push(" THEN ");
                update_builder.push_bind(&entry.author);
                update_builder.push(" ");
            }
            update_builder.push("ELSE author END, content = CASE guid_hash ");
            for entry in chunk {
                update_builder.push("WHEN ");
                update_builder.push_bind(&entry.guid_hash);
                update_builder.push(" THEN ");
                update_builder.push_bind(&entry.content);
                update_builder.push(" ");
            }
            update_builder.push("ELSE content END, content_type = CASE guid_hash ");
            for entry in chunk {
                update_builder.push("WHEN ");
                update_builder.push_bind(&entry.guid_hash);
                update_builder.push(" THEN ");
                update_builder.push_bind(&entry.content_type);
                update_builder.push(" ");
            }
            update_builder.push("ELSE content_type END WHERE feed_id = ");
            update_builder.push_bind(feed_id);
            update_builder.push(" AND guid_hash IN (");

            let mut separated = update_builder.separated(", ");
            for entry in chunk {
                separated.push_bind(&entry.guid_hash);
            }
            separated.push_unseparated(")");

            update_builder.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    // ========================================================================
    // Entry Queries
    // ========================================================================

    /// Get all entries for a feed, newest first.
    pub async fn get_entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, DatabaseError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT id, feed_id, guid, guid_hash, title, author, content,
                   content_type, link, published_on, fetched_on
            FROM entries
            WHERE feed_id = ?
            ORDER BY published_on DESC, fetched_on DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    /// Mark an entry read for a user. Marking twice is a no-op.
    pub async fn mark_read(&self, user_name: &str, entry_id: i64) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO read_marks (user_name, entry_id, marked_on)
            VALUES (?, ?, ?)
            ON CONFLICT(user_name, entry_id) DO NOTHING
        "#,
        )
        .bind(user_name)
        .bind(entry_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark an entry saved for a user. Marking twice is a no-op.
    pub async fn mark_saved(&self, user_name: &str, entry_id: i64) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO saved_marks (user_name, entry_id, marked_on)
            VALUES (?, ?, ?)
            ON CONFLICT(user_name, entry_id) DO NOTHING
        "#,
        )
        .bind(user_name)
        .bind(entry_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Remove a user's read mark from an entry, if present.
    pub async fn unmark_read(&self, user_name: &str, entry_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM read_marks WHERE user_name = ? AND entry_id = ?")
            .bind(user_name)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove a user's saved mark from an entry, if present.
    pub async fn unmark_saved(&self, user_name: &str, entry_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM saved_marks WHERE user_name = ? AND entry_id = ?")
            .bind(user_name)
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of unread entries for a user across all subscribed feeds.
    pub async fn unread_count(&self, user_name: &str) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM entries e
            JOIN subscriptions s ON s.feed_id = e.feed_id AND s.user_name = ?
            LEFT JOIN read_marks r ON r.entry_id = e.id AND r.user_name = ?
            WHERE r.id IS NULL
        "#,
        )
        .bind(user_name)
        .bind(user_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
