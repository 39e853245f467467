//! The per-feed fetch cycle: one conditional request, one decision on its
//! outcome, one persisted feed row.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::FetchConfig;
use crate::favicon;
use crate::fetch::http::{
    self, HttpResponse, StatusOutcome, STATUS_DUPLICATED_FEED, STATUS_NETWORK_ERROR,
};
use crate::hooks::FetchHook;
use crate::markup;
use crate::storage::{sha256_hex, Database, DatabaseError, Feed, NewEntry};
use crate::translate::{scan_entries, EntryTranslator, FeedTranslator};
use crate::url;

/// Title shared by all synthesized notice entries.
pub const NOTICE_TITLE: &str = "This feed has been disabled";

/// Author recorded on synthesized notice entries.
const NOTICE_AUTHOR: &str = "steep";

/// Icons older than this many days are refreshed on a Fresh cycle.
const ICON_REFRESH_DAYS: i64 = 30;

/// Per-process counter folded into notice GUIDs so two notices synthesized
/// within the same nanosecond still differ.
static NONCE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// What a single fetch cycle did with a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The feed is disabled; nothing was fetched.
    SkippedDisabled,
    /// The feed was checked too recently; nothing was fetched.
    SkippedFresh,
    /// A fresh body was parsed and merged; `entries` counts new rows.
    Updated { entries: usize },
    /// 304: the stored validators still hold.
    NotModified,
    /// 301 adopted: the feed now lives at a new URL.
    Moved,
    /// 301 into an already-subscribed feed: disabled as a duplicate.
    DuplicateDisabled,
    /// 410: the feed is gone and was disabled.
    Gone,
    /// The cycle failed and the error count grew.
    Errored { status: i64 },
    /// An unclassified status was recorded and otherwise ignored.
    Unclassified { status: u16 },
}

/// Drives fetch cycles for feeds: owns the configuration, the shared HTTP
/// client, the database handle, and the hook registry.
pub struct Fetcher {
    pub(crate) config: FetchConfig,
    pub(crate) db: Database,
    pub(crate) client: reqwest::Client,
    pub(crate) hooks: Vec<Arc<dyn FetchHook>>,
}

impl Fetcher {
    /// Build a fetcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns the underlying `reqwest` error if the client cannot be
    /// constructed.
    pub fn new(config: FetchConfig, db: Database) -> Result<Self, reqwest::Error> {
        let client = http::build_client(&config)?;
        Ok(Self {
            config,
            db,
            client,
            hooks: Vec::new(),
        })
    }

    /// Register a hook. Hooks fire in registration order.
    pub fn add_hook(&mut self, hook: Arc<dyn FetchHook>) {
        self.hooks.push(hook);
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Run one fetch cycle for a feed.
    ///
    /// The feed is mutated in memory as the cycle decides what happened and
    /// persisted exactly once at the end; skip outcomes touch nothing.
    ///
    /// # Errors
    ///
    /// Only database failures propagate. Network trouble, HTTP error
    /// statuses, and unparsable documents are all recorded on the feed as
    /// cycle outcomes instead.
    pub async fn fetch_feed(&self, feed: &mut Feed) -> Result<CycleOutcome, DatabaseError> {
        let now = Utc::now();

        if !feed.enabled {
            tracing::debug!(feed = %feed.self_link, "Feed disabled, skipping");
            return Ok(CycleOutcome::SkippedDisabled);
        }
        if self.checked_recently(feed, now) {
            tracing::debug!(feed = %feed.self_link, "Feed checked recently, skipping");
            return Ok(CycleOutcome::SkippedFresh);
        }

        feed.last_checked_on = Some(now.timestamp());

        let response = http::conditional_get(
            &self.client,
            &feed.self_link,
            feed.etag.as_deref(),
            feed.last_modified.as_deref(),
            &self.config,
        )
        .await;

        let outcome = match response {
            Err(error) => {
                tracing::warn!(feed = %feed.self_link, error = %error, "Network error");
                feed.error_count += 1;
                feed.last_status = Some(STATUS_NETWORK_ERROR);
                CycleOutcome::Errored {
                    status: STATUS_NETWORK_ERROR,
                }
            }
            Ok(response) => match http::classify(response.status) {
                StatusOutcome::Fresh => self.handle_fresh(feed, &response, now).await?,
                StatusOutcome::NotModified => {
                    feed.last_status = Some(304);
                    CycleOutcome::NotModified
                }
                StatusOutcome::Moved => {
                    self.handle_moved(feed, response.location.as_deref(), now)
                        .await?
                }
                StatusOutcome::Forbidden | StatusOutcome::NotFound => {
                    let status = i64::from(response.status);
                    tracing::warn!(feed = %feed.self_link, status, "Feed fetch refused");
                    feed.error_count += 1;
                    feed.last_status = Some(status);
                    CycleOutcome::Errored { status }
                }
                StatusOutcome::Gone => {
                    tracing::warn!(feed = %feed.self_link, "Feed gone, disabling");
                    feed.enabled = false;
                    feed.error_count += 1;
                    feed.last_status = Some(410);
                    self.synthesize_notice(
                        feed,
                        now,
                        "The feed's server reports it permanently removed, so it \
                         will no longer be checked.",
                    )
                    .await?;
                    CycleOutcome::Gone
                }
                StatusOutcome::Other(status) => {
                    tracing::warn!(feed = %feed.self_link, status, "Unhandled HTTP status");
                    feed.last_status = Some(i64::from(status));
                    CycleOutcome::Unclassified { status }
                }
            },
        };

        if matches!(outcome, CycleOutcome::Errored { .. }) {
            self.check_health(feed, now).await?;
        }

        self.db.save_feed_state(feed).await?;
        Ok(outcome)
    }

    /// Whether the feed was looked at (or produced entries) inside the
    /// minimum fetch interval.
    fn checked_recently(&self, feed: &Feed, now: DateTime<Utc>) -> bool {
        let last = feed.last_checked_on.max(feed.last_updated_on);
        match last {
            Some(last) => now.timestamp() - last < self.config.min_interval_secs,
            None => false,
        }
    }

    /// A 200 with a body: parse, translate, sanitize, merge.
    async fn handle_fresh(
        &self,
        feed: &mut Feed,
        response: &HttpResponse,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, DatabaseError> {
        let parsed = match feed_rs::parser::parse(&response.body[..]) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::warn!(feed = %feed.self_link, error = %error, "Feed body unparsable");
                feed.error_count += 1;
                feed.last_status = Some(i64::from(response.status));
                return Ok(CycleOutcome::Errored {
                    status: i64::from(response.status),
                });
            }
        };

        feed.last_status = Some(i64::from(response.status));
        feed.etag = response.etag.clone();
        feed.last_modified = response.last_modified.clone();

        let translator = FeedTranslator::new(&parsed);
        // Sticky title: the first title ever seen wins, so user-facing
        // names do not churn when publishers rebrand
        if feed.title.is_empty() {
            if let Some(title) = translator.title() {
                feed.title = title;
            }
        }
        if let Some(link) = translator.alternate_link() {
            feed.alternate_link = Some(link);
        }

        let raw_entries = scan_entries(&response.body);
        let mut entries: Vec<NewEntry> = Vec::with_capacity(parsed.entries.len());

        for (index, parsed_entry) in parsed.entries.iter().enumerate() {
            let raw = raw_entries.get(index);
            let origin = raw.and_then(|r| r.origin_link.as_deref());
            let entry_translator = EntryTranslator::new(parsed_entry, origin);

            // The parser invents ids for entries that declared none, so
            // identity is judged against the raw document: a declared id
            // wins, a permalink substitutes, and an entry with neither is
            // unidentifiable.
            let guid = match raw {
                Some(raw) if !raw.has_id && !raw.has_link => None,
                Some(raw) if !raw.has_id => entry_translator.link(),
                _ => entry_translator.guid(),
            };
            let Some(guid) = guid else {
                tracing::debug!(feed = %feed.self_link, "Entry without GUID or link dropped");
                continue;
            };
            let published = entry_translator.timestamp(now);
            if self.config.max_history_days > 0
                && now - published > Duration::days(self.config.max_history_days)
            {
                tracing::debug!(feed = %feed.self_link, guid = %guid, "Ancient entry skipped");
                continue;
            }

            let (raw_content, content_type) = entry_translator.content();
            let content = if content_type.contains("html") {
                markup::scrub_html(&raw_content, &self.config.scrub_blacklist)
            } else {
                raw_content
            };

            let entry = NewEntry {
                guid_hash: sha256_hex(&guid),
                guid,
                title: entry_translator.title(),
                author: entry_translator.author(&parsed),
                content,
                content_type,
                link: entry_translator.link(),
                published_on: published.timestamp(),
            };

            for hook in &self.hooks {
                hook.on_entry_parsed(feed, &entry);
            }
            entries.push(entry);
        }

        let dropped = parsed.entries.len() - entries.len();
        let inserted = self.db.upsert_entries(feed.id, &entries).await?;
        if inserted > 0 {
            let feed_stamp = translator.timestamp(now).unwrap_or(now);
            feed.last_updated_on = Some(feed_stamp.timestamp());
        }

        tracing::info!(
            feed = %feed.self_link,
            new = inserted,
            seen = parsed.entries.len(),
            dropped = dropped,
            "Feed updated"
        );

        if self.config.fetch_icons {
            self.refresh_icon(feed, now).await?;
        }

        Ok(CycleOutcome::Updated { entries: inserted })
    }

    /// A permanent redirect: adopt the new URL, unless another feed
    /// already lives there.
    async fn handle_moved(
        &self,
        feed: &mut Feed,
        location: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CycleOutcome, DatabaseError> {
        let Some(location) = location else {
            tracing::warn!(feed = %feed.self_link, "301 without a Location header");
            feed.error_count += 1;
            feed.last_status = Some(301);
            return Ok(CycleOutcome::Errored { status: 301 });
        };

        let target = url::normalize(location);
        let target_hash = sha256_hex(&target);

        if target_hash != feed.self_link_hash && self.db.feed_exists(&target).await? {
            tracing::warn!(
                feed = %feed.self_link,
                target = %target,
                "Feed moved onto an existing feed, disabling as duplicate"
            );
            feed.enabled = false;
            feed.error_count += 1;
            feed.last_status = Some(STATUS_DUPLICATED_FEED);
            self.synthesize_notice(
                feed,
                now,
                "The feed moved to a URL that is already subscribed, so this \
                 duplicate will no longer be checked.",
            )
            .await?;
            return Ok(CycleOutcome::DuplicateDisabled);
        }

        tracing::info!(feed = %feed.self_link, target = %target, "Feed moved, adopting new URL");
        feed.self_link = target;
        feed.self_link_hash = target_hash;
        feed.last_status = Some(301);
        Ok(CycleOutcome::Moved)
    }

    /// Disable feeds whose error count has gone over the ceiling, leaving
    /// a notice entry so subscribers learn why the feed went quiet.
    ///
    /// One notice per disable event; with `renotify_on_repeat_failures`
    /// set, an already-disabled feed that keeps failing gets a fresh
    /// notice each errored cycle instead.
    async fn check_health(
        &self,
        feed: &mut Feed,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        if feed.error_count <= i64::from(self.config.max_errors) {
            return Ok(());
        }

        if feed.enabled {
            tracing::warn!(
                feed = %feed.self_link,
                errors = feed.error_count,
                max = self.config.max_errors,
                "Feed accumulated too many errors, disabling"
            );
            feed.enabled = false;
            self.synthesize_notice(
                feed,
                now,
                "The feed accumulated too many errors, so it will no longer \
                 be checked.",
            )
            .await?;
        } else if self.config.renotify_on_repeat_failures {
            self.synthesize_notice(
                feed,
                now,
                "The feed is still failing and remains disabled.",
            )
            .await?;
        }
        Ok(())
    }

    /// Store an engine-authored notice entry on a feed.
    ///
    /// The GUID embeds a fresh nonce so repeated notices for the same feed
    /// never deduplicate away.
    async fn synthesize_notice(
        &self,
        feed: &Feed,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), DatabaseError> {
        let nonce = fresh_nonce();
        let guid = format!(
            "tag:steep,{}:{}",
            now.format("%Y-%m-%d"),
            sha256_hex(&format!("{}{nonce}", feed.self_link))
        );

        let entry = NewEntry {
            guid_hash: sha256_hex(&guid),
            guid,
            title: NOTICE_TITLE.to_owned(),
            author: Some(NOTICE_AUTHOR.to_owned()),
            content: format!("<p>{}</p>", markup::escape_html(reason)),
            content_type: "text/html".to_owned(),
            link: None,
            published_on: now.timestamp(),
        };

        self.db.upsert_entries(feed.id, &[entry]).await?;
        Ok(())
    }

    /// Refresh the feed's favicon when it is missing or stale.
    async fn refresh_icon(&self, feed: &mut Feed, now: DateTime<Utc>) -> Result<(), DatabaseError> {
        let stale = match feed.icon_updated_on {
            Some(updated) => now.timestamp() - updated > ICON_REFRESH_DAYS * 24 * 3600,
            None => true,
        };
        if !stale {
            return Ok(());
        }

        let page = feed
            .alternate_link
            .as_deref()
            .unwrap_or(feed.self_link.as_str());
        let icon = favicon::fetch_icon(&self.client, page, self.config.timeout_secs).await;
        self.db
            .set_icon(feed.id, &icon.bytes, &icon.content_type)
            .await?;
        feed.icon_updated_on = Some(now.timestamp());
        Ok(())
    }
}

/// A process-unique nonce: wall-clock nanoseconds plus a counter.
fn fresh_nonce() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    nanos
        .wrapping_mul(1_000_000)
        .wrapping_add(NONCE_COUNTER.fetch_add(1, Ordering::Relaxed))
}
