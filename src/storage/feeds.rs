use super::schema::Database;
use super::types::{sha256_hex, DatabaseError, Feed};
use crate::url;

/// Column list for feed queries; the icon blob is deliberately excluded so
/// list queries stay cheap.
const FEED_COLUMNS: &str = "id, self_link, self_link_hash, title, alternate_link, etag, \
     last_modified, enabled, error_count, last_status, last_checked_on, \
     last_updated_on, icon_updated_on";

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Add a feed by URL, normalizing it first. Adding a URL that
    /// normalizes to an existing feed returns the existing row unchanged.
    pub async fn add_feed(&self, feed_url: &str) -> Result<Feed, DatabaseError> {
        let self_link = url::normalize(feed_url);
        let self_link_hash = sha256_hex(&self_link);

        sqlx::query(
            r#"
            INSERT INTO feeds (self_link, self_link_hash)
            VALUES (?, ?)
            ON CONFLICT(self_link_hash) DO NOTHING
        "#,
        )
        .bind(&self_link)
        .bind(&self_link_hash)
        .execute(&self.pool)
        .await?;

        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE self_link_hash = ?"
        ))
        .bind(&self_link_hash)
        .fetch_one(&self.pool)
        .await?;

        Ok(feed)
    }

    /// Get a feed by id.
    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE id = ?"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feed)
    }

    /// Whether a feed with this self link (normalized) already exists.
    pub async fn feed_exists(&self, self_link: &str) -> Result<bool, DatabaseError> {
        let hash = sha256_hex(&url::normalize(self_link));
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM feeds WHERE self_link_hash = ?")
                .bind(&hash)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// All enabled feeds, least recently checked first so a cycle that is
    /// cut short still visits the stalest feeds.
    pub async fn enabled_feeds(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds WHERE enabled = 1 \
             ORDER BY last_checked_on IS NOT NULL, last_checked_on"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Enabled feeds that at least one user subscribes to. Feeds nobody
    /// reads are not worth fetching.
    pub async fn enabled_feeds_with_subscribers(&self) -> Result<Vec<Feed>, DatabaseError> {
        let feeds = sqlx::query_as::<_, Feed>(&format!(
            "SELECT DISTINCT f.{} FROM feeds f \
             JOIN subscriptions s ON s.feed_id = f.id \
             WHERE f.enabled = 1 \
             ORDER BY f.last_checked_on IS NOT NULL, f.last_checked_on",
            FEED_COLUMNS.replace(", ", ", f.")
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Subscribe a user to a feed. Subscribing twice is a no-op.
    pub async fn add_subscription(
        &self,
        user_name: &str,
        feed_id: i64,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_name, feed_id, created_on)
            VALUES (?, ?, ?)
            ON CONFLICT(user_name, feed_id) DO NOTHING
        "#,
        )
        .bind(user_name)
        .bind(feed_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist the mutable fetch state of a feed in a single UPDATE.
    ///
    /// This is the only write a fetch cycle makes to the feed row, so each
    /// cycle's state change lands atomically.
    pub async fn save_feed_state(&self, feed: &Feed) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                self_link = ?,
                self_link_hash = ?,
                title = ?,
                alternate_link = ?,
                etag = ?,
                last_modified = ?,
                enabled = ?,
                error_count = ?,
                last_status = ?,
                last_checked_on = ?,
                last_updated_on = ?
            WHERE id = ?
        "#,
        )
        .bind(&feed.self_link)
        .bind(&feed.self_link_hash)
        .bind(&feed.title)
        .bind(&feed.alternate_link)
        .bind(&feed.etag)
        .bind(&feed.last_modified)
        .bind(feed.enabled)
        .bind(feed.error_count)
        .bind(feed.last_status)
        .bind(feed.last_checked_on)
        .bind(feed.last_updated_on)
        .bind(feed.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Re-enable a feed, forgiving its accumulated errors.
    pub async fn enable_feed(&self, feed_id: i64) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE feeds SET enabled = 1, error_count = 0 WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Store a feed's favicon and stamp the refresh time.
    pub async fn set_icon(
        &self,
        feed_id: i64,
        icon: &[u8],
        icon_type: &str,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "UPDATE feeds SET icon = ?, icon_type = ?, icon_updated_on = ? WHERE id = ?",
        )
        .bind(icon)
        .bind(icon_type)
        .bind(now)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a feed's favicon bytes and media type, if one is stored.
    pub async fn get_icon(
        &self,
        feed_id: i64,
    ) -> Result<Option<(Vec<u8>, String)>, DatabaseError> {
        let row: Option<(Option<Vec<u8>>, Option<String>)> =
            sqlx::query_as("SELECT icon, icon_type FROM feeds WHERE id = ?")
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(icon, icon_type)| Some((icon?, icon_type?))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_add_feed_normalizes_and_dedupes() {
        let db = db().await;
        let a = db
            .add_feed("https://example.com/feed.xml?utm_source=x")
            .await
            .unwrap();
        let b = db.add_feed("https://example.com/feed.xml").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.self_link, "https://example.com/feed.xml");
        assert!(a.enabled);
        assert_eq!(a.error_count, 0);
        assert_eq!(a.title, "");
    }

    #[tokio::test]
    async fn test_feed_exists_normalizes() {
        let db = db().await;
        db.add_feed("https://example.com/feed.xml").await.unwrap();
        assert!(db
            .feed_exists("https://example.com/feed.xml?utm_medium=y")
            .await
            .unwrap());
        assert!(!db.feed_exists("https://example.com/other.xml").await.unwrap());
    }

    #[tokio::test]
    async fn test_save_feed_state_round_trip() {
        let db = db().await;
        let mut feed = db.add_feed("https://example.com/feed.xml").await.unwrap();

        feed.title = "Example".to_owned();
        feed.etag = Some("\"abc\"".to_owned());
        feed.last_modified = Some("Mon, 01 Jan 2024 00:00:00 GMT".to_owned());
        feed.enabled = false;
        feed.error_count = 7;
        feed.last_status = Some(410);
        feed.last_checked_on = Some(1_700_000_000);

        db.save_feed_state(&feed).await.unwrap();
        let reloaded = db.get_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "Example");
        assert_eq!(reloaded.etag.as_deref(), Some("\"abc\""));
        assert!(!reloaded.enabled);
        assert_eq!(reloaded.error_count, 7);
        assert_eq!(reloaded.last_status, Some(410));
    }

    #[tokio::test]
    async fn test_enable_feed_resets_errors() {
        let db = db().await;
        let mut feed = db.add_feed("https://example.com/feed.xml").await.unwrap();
        feed.enabled = false;
        feed.error_count = 60;
        db.save_feed_state(&feed).await.unwrap();

        db.enable_feed(feed.id).await.unwrap();
        let reloaded = db.get_feed(feed.id).await.unwrap().unwrap();
        assert!(reloaded.enabled);
        assert_eq!(reloaded.error_count, 0);
    }

    #[tokio::test]
    async fn test_enabled_feeds_with_subscribers() {
        let db = db().await;
        let subscribed = db.add_feed("https://a.example.com/feed").await.unwrap();
        let _orphan = db.add_feed("https://b.example.com/feed").await.unwrap();
        db.add_subscription("alice", subscribed.id).await.unwrap();
        db.add_subscription("alice", subscribed.id).await.unwrap(); // idempotent

        let feeds = db.enabled_feeds_with_subscribers().await.unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].id, subscribed.id);

        assert_eq!(db.enabled_feeds().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_icon_round_trip() {
        let db = db().await;
        let feed = db.add_feed("https://example.com/feed").await.unwrap();
        assert_eq!(db.get_icon(feed.id).await.unwrap(), None);

        db.set_icon(feed.id, b"GIF89a", "image/gif").await.unwrap();
        let (bytes, icon_type) = db.get_icon(feed.id).await.unwrap().unwrap();
        assert_eq!(bytes, b"GIF89a");
        assert_eq!(icon_type, "image/gif");

        let reloaded = db.get_feed(feed.id).await.unwrap().unwrap();
        assert!(reloaded.icon_updated_on.is_some());
    }
}
