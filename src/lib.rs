//! steep — a feed synchronization engine.
//!
//! Fetches Atom/RSS feeds with conditional HTTP requests, sanitizes their
//! content, and merges entries into a SQLite store while preserving entry
//! identity and reader state. The pieces compose around [`fetch::Fetcher`]:
//!
//! - [`url`] — canonicalization and validation of feed URLs
//! - [`markup`] — HTML stripping, safe reconstruction, scrubbing, discovery
//! - [`translate`] — field fallback chains over parsed feed documents
//! - [`fetch`] — conditional HTTP, the per-feed cycle, batch entry points
//! - [`storage`] — feeds, entries, and the merge rules, on sqlx/SQLite
//! - [`hooks`] — observation points for embedders
//! - [`favicon`] — best-effort icon retrieval
//! - [`config`] — the [`config::FetchConfig`] tunables
//!
//! ```no_run
//! use steep::config::FetchConfig;
//! use steep::fetch::Fetcher;
//! use steep::storage::Database;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::open("feeds.db").await?;
//! let feed = db.add_feed("https://example.com/feed.xml").await?;
//! db.add_subscription("alice", feed.id).await?;
//!
//! let fetcher = Fetcher::new(FetchConfig::default(), db)?;
//! let summary = fetcher.fetch_all_enabled_feeds().await?;
//! println!("{} new entries", summary.entries_added);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod favicon;
pub mod fetch;
pub mod hooks;
pub mod markup;
pub mod storage;
pub mod translate;
pub mod url;
