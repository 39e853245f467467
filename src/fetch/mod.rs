//! Feed fetching: the conditional HTTP layer, the per-feed cycle, and the
//! concurrent batch entry points.

mod cycle;
mod http;

pub use cycle::{CycleOutcome, Fetcher, NOTICE_TITLE};
pub use http::{
    build_client, classify, conditional_get, HttpResponse, NetworkError, StatusOutcome,
    STATUS_DUPLICATED_FEED, STATUS_NETWORK_ERROR,
};

use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};

use crate::storage::{DatabaseError, Feed};

/// What a whole fetch run did.
#[derive(Debug, Clone, Copy)]
pub struct FetchSummary {
    /// Feeds handed to the run (including skipped ones).
    pub checked: usize,
    /// New entries stored across all feeds.
    pub entries_added: usize,
    /// Cycles that failed with a database error.
    pub failures: usize,
    pub elapsed: Duration,
}

impl Fetcher {
    /// Fetch every enabled feed that has at least one subscriber.
    ///
    /// # Errors
    ///
    /// Returns a database error only if the feed list itself cannot be
    /// loaded; per-feed failures are contained in the summary.
    pub async fn fetch_all_enabled_feeds(&self) -> Result<FetchSummary, DatabaseError> {
        let feeds = self.db.enabled_feeds_with_subscribers().await?;
        Ok(self.fetch_feeds(feeds).await)
    }

    /// Fetch a batch of feeds concurrently.
    ///
    /// Feeds run through a bounded worker pool (`config.workers`); a feed
    /// whose cycle fails is logged and counted but never aborts the batch.
    /// Results complete in arbitrary order.
    pub async fn fetch_feeds(&self, feeds: Vec<Feed>) -> FetchSummary {
        let started = Instant::now();
        let total = feeds.len();

        for hook in &self.hooks {
            hook.on_fetch_started(&feeds);
        }

        let results: Vec<(Feed, Result<CycleOutcome, DatabaseError>)> =
            stream::iter(feeds.into_iter())
                .map(|mut feed| async move {
                    let outcome = self.fetch_feed(&mut feed).await;
                    (feed, outcome)
                })
                .buffer_unordered(self.config.workers.max(1))
                .collect()
                .await;

        let mut entries_added = 0;
        let mut failures = 0;
        for (feed, result) in &results {
            match result {
                Ok(CycleOutcome::Updated { entries }) => entries_added += entries,
                Ok(_) => {}
                Err(error) => {
                    failures += 1;
                    tracing::error!(feed = %feed.self_link, error = %error, "Fetch cycle failed");
                }
            }
        }

        let feeds: Vec<Feed> = results.into_iter().map(|(feed, _)| feed).collect();
        for hook in &self.hooks {
            hook.on_fetch_done(&feeds);
        }

        let summary = FetchSummary {
            checked: total,
            entries_added,
            failures,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            feeds = summary.checked,
            new_entries = summary.entries_added,
            failures = summary.failures,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Fetch run complete"
        );
        summary
    }
}
