//! Translation of parsed feed documents into storage-ready values.
//!
//! Feed formats disagree on where titles, dates, and links live, and real
//! feeds omit half of them. The translators centralize the fallback chains
//! so the fetch cycle never touches a raw [`feed_rs::model`] field directly.

use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, Link, Person, Text};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::markup::strip_html;
use crate::url;

/// Titles longer than this are truncated after stripping markup.
pub const MAX_TITLE_LEN: usize = 255;

/// Fallback title for entries that carry none.
pub const UNTITLED: &str = "Untitled";

fn clean_title(text: &Text) -> Option<String> {
    let stripped = strip_html(&text.content);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(MAX_TITLE_LEN).collect())
}

/// The essence of a media type: lowercased, parameters dropped.
fn essence(content_type: &impl std::fmt::Display) -> String {
    let full = content_type.to_string();
    full.split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

fn is_html(media_type: &str) -> bool {
    media_type == "text/html" || media_type == "application/xhtml+xml"
}

/// Picks the alternate link from a link list: prefer an explicit
/// `rel=alternate`, then a link with no rel at all, then the first link.
fn alternate_href(links: &[Link]) -> Option<&str> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some("alternate"))
        .or_else(|| links.iter().find(|l| l.rel.is_none()))
        .or_else(|| links.first())
        .map(|l| l.href.as_str())
}

fn first_author(authors: &[Person]) -> Option<String> {
    authors
        .iter()
        .map(|p| p.name.trim())
        .find(|name| !name.is_empty())
        .map(str::to_owned)
}

/// Feed-level field extraction.
pub struct FeedTranslator<'a> {
    feed: &'a Feed,
}

impl<'a> FeedTranslator<'a> {
    pub fn new(feed: &'a Feed) -> Self {
        Self { feed }
    }

    /// Feed timestamp: `published`, falling back to `updated`, clamped to
    /// `now` so a feed with a clock set in the future cannot pin itself to
    /// the top of every sort.
    pub fn timestamp(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.feed
            .published
            .or(self.feed.updated)
            .map(|value| value.min(now))
    }

    /// Feed title, markup stripped and truncated. `None` when absent or
    /// empty, so callers can keep an existing title instead.
    pub fn title(&self) -> Option<String> {
        self.feed.title.as_ref().and_then(clean_title)
    }

    /// The feed's website link, normalized.
    pub fn alternate_link(&self) -> Option<String> {
        alternate_href(&self.feed.links).map(url::normalize)
    }

    pub fn author(&self) -> Option<String> {
        first_author(&self.feed.authors)
    }
}

/// Entry-level field extraction.
///
/// `origin_link`, when present, is the publisher's canonical URL recovered
/// from the raw document (e.g. FeedBurner's `origLink`) and takes priority
/// over the entry's own links.
pub struct EntryTranslator<'a> {
    entry: &'a Entry,
    origin_link: Option<&'a str>,
}

impl<'a> EntryTranslator<'a> {
    pub fn new(entry: &'a Entry, origin_link: Option<&'a str>) -> Self {
        Self { entry, origin_link }
    }

    /// Stable identity for deduplication: the entry's declared id, falling
    /// back to its link. `None` means the entry has no usable identity and
    /// must be skipped.
    pub fn guid(&self) -> Option<String> {
        let id = self.entry.id.trim();
        if !id.is_empty() {
            return Some(id.to_owned());
        }
        self.link()
    }

    /// Entry timestamp: `published`, falling back to `updated`, falling back
    /// to `now`. Future dates are clamped to `now`.
    pub fn timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.entry
            .published
            .or(self.entry.updated)
            .map(|value| value.min(now))
            .unwrap_or(now)
    }

    /// Entry body and its media type, preferring full content over the
    /// summary, and HTML over anything else. Entries with no body at all
    /// yield an empty HTML body.
    pub fn content(&self) -> (String, String) {
        let mut candidates: Vec<(String, String)> = Vec::with_capacity(2);
        if let Some(content) = &self.entry.content {
            if let Some(body) = &content.body {
                candidates.push((body.clone(), essence(&content.content_type)));
            }
        }
        if let Some(summary) = &self.entry.summary {
            candidates.push((summary.content.clone(), essence(&summary.content_type)));
        }

        if let Some(found) = candidates.iter().find(|(_, ct)| is_html(ct)) {
            return found.clone();
        }
        candidates
            .into_iter()
            .next()
            .unwrap_or_else(|| (String::new(), "text/html".to_owned()))
    }

    /// The entry's permalink, normalized. The recovered origin link wins
    /// over the entry's own alternate link.
    pub fn link(&self) -> Option<String> {
        if let Some(origin) = self.origin_link {
            if !origin.is_empty() {
                return Some(url::normalize(origin));
            }
        }
        alternate_href(&self.entry.links).map(url::normalize)
    }

    /// Entry title, markup stripped and truncated; [`UNTITLED`] when absent.
    pub fn title(&self) -> String {
        self.entry
            .title
            .as_ref()
            .and_then(clean_title)
            .unwrap_or_else(|| UNTITLED.to_owned())
    }

    /// Entry author, falling back to the feed's author.
    pub fn author(&self, feed: &Feed) -> Option<String> {
        first_author(&self.entry.authors).or_else(|| first_author(&feed.authors))
    }
}

/// Facts about an entry only the raw document can provide.
///
/// The feed parser normalizes too eagerly for two of our rules: it drops
/// foreign markup such as FeedBurner's `origLink`, and it invents an id
/// for entries that never declared one, hiding which entries are truly
/// unidentifiable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntryInfo {
    /// Publisher's canonical URL from `feedburner:origLink`, if present.
    pub origin_link: Option<String>,
    /// Whether the entry declared its own id (`guid`, `id`, or `rdf:about`).
    pub has_id: bool,
    /// Whether the entry carried any link element.
    pub has_link: bool,
}

/// Scans the raw document once, returning one record per entry in document
/// order, aligned with the parsed entry list. Parse trouble yields an
/// empty vector, never an error.
pub fn scan_entries(xml: &[u8]) -> Vec<RawEntryInfo> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut infos: Vec<RawEntryInfo> = Vec::new();
    // Some(info) while inside an <item>/<entry>
    let mut current: Option<RawEntryInfo> = None;
    let mut in_orig_link = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(start)) => {
                let local = start.local_name();
                match local.as_ref() {
                    b"item" | b"entry" => {
                        let mut info = RawEntryInfo::default();
                        // RSS 1.0 items identify themselves via rdf:about
                        info.has_id = start
                            .attributes()
                            .flatten()
                            .any(|a| a.key.local_name().as_ref() == b"about");
                        current = Some(info);
                    }
                    b"guid" | b"id" => {
                        if let Some(info) = current.as_mut() {
                            info.has_id = true;
                        }
                    }
                    b"link" => {
                        if let Some(info) = current.as_mut() {
                            info.has_link = true;
                        }
                    }
                    b"origLink" if current.is_some() => in_orig_link = true,
                    _ => {}
                }
            }
            Ok(Event::Empty(start)) => {
                // Atom links are usually empty elements
                if start.local_name().as_ref() == b"link" {
                    if let Some(info) = current.as_mut() {
                        info.has_link = true;
                    }
                }
            }
            Ok(Event::Text(text)) if in_orig_link => {
                if let Ok(value) = text.unescape() {
                    let value = value.trim();
                    if !value.is_empty() {
                        if let Some(info) = current.as_mut() {
                            info.origin_link = Some(value.to_owned());
                        }
                    }
                }
            }
            Ok(Event::End(end)) => {
                let local = end.local_name();
                match local.as_ref() {
                    b"origLink" => in_orig_link = false,
                    b"item" | b"entry" => {
                        if let Some(info) = current.take() {
                            infos.push(info);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    infos
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:feedburner="http://rssnamespace.org/feedburner/ext/1.0">
  <channel>
    <title>Example &amp; Sons</title>
    <link>https://example.com/?utm_source=feed</link>
    <item>
      <guid>tag:example.com,2024:1</guid>
      <title>&lt;b&gt;Bold&lt;/b&gt; move</title>
      <link>https://feedproxy.example.net/r/1</link>
      <feedburner:origLink>https://example.com/posts/1?utm_medium=rss</feedburner:origLink>
      <description>Summary one</description>
      <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/posts/2</link>
      <description>Summary two</description>
    </item>
  </channel>
</rss>"#;

    fn parse(xml: &str) -> feed_rs::model::Feed {
        feed_rs::parser::parse(xml.as_bytes()).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_feed_title_decoded() {
        let feed = parse(RSS);
        assert_eq!(
            FeedTranslator::new(&feed).title(),
            Some("Example & Sons".to_owned())
        );
    }

    #[test]
    fn test_feed_alternate_link_normalized() {
        let feed = parse(RSS);
        assert_eq!(
            FeedTranslator::new(&feed).alternate_link(),
            Some("https://example.com/".to_owned())
        );
    }

    #[test]
    fn test_feed_timestamp_prefers_published_over_updated() {
        let feed = parse(
            r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>T</title>
  <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
  <lastBuildDate>Fri, 01 Mar 2024 10:00:00 GMT</lastBuildDate>
</channel></rss>"#,
        );
        assert_eq!(
            FeedTranslator::new(&feed).timestamp(now()),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_entry_title_stripped_and_defaulted() {
        let feed = parse(RSS);
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(t.title(), "Bold move");

        let untitled = parse(
            r#"<rss version="2.0"><channel><title>x</title>
               <item><link>https://example.com/a</link></item>
               </channel></rss>"#,
        );
        let t = EntryTranslator::new(&untitled.entries[0], None);
        assert_eq!(t.title(), UNTITLED);
    }

    #[test]
    fn test_entry_title_truncated() {
        let long = "x".repeat(400);
        let feed = parse(&format!(
            r#"<rss version="2.0"><channel><title>x</title>
               <item><title>{long}</title><link>https://example.com/a</link></item>
               </channel></rss>"#
        ));
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(t.title().chars().count(), MAX_TITLE_LEN);
    }

    #[test]
    fn test_entry_guid_prefers_declared_id() {
        let feed = parse(RSS);
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(t.guid(), Some("tag:example.com,2024:1".to_owned()));
    }

    #[test]
    fn test_entry_link_origin_override_and_normalization() {
        let feed = parse(RSS);
        let raw = scan_entries(RSS.as_bytes());
        assert_eq!(raw.len(), 2);
        assert_eq!(
            raw[0].origin_link.as_deref(),
            Some("https://example.com/posts/1?utm_medium=rss")
        );
        assert_eq!(raw[1].origin_link, None);

        let t = EntryTranslator::new(&feed.entries[0], raw[0].origin_link.as_deref());
        // Origin link wins over the proxy link, and is normalized
        assert_eq!(t.link(), Some("https://example.com/posts/1".to_owned()));

        let t = EntryTranslator::new(&feed.entries[1], raw[1].origin_link.as_deref());
        assert_eq!(t.link(), Some("https://example.com/posts/2".to_owned()));
    }

    #[test]
    fn test_scan_entries_identity_flags() {
        let raw = scan_entries(RSS.as_bytes());
        // First item declares a guid, second only a link
        assert!(raw[0].has_id);
        assert!(raw[0].has_link);
        assert!(!raw[1].has_id);
        assert!(raw[1].has_link);

        let bare = scan_entries(
            br#"<rss version="2.0"><channel><title>x</title>
                <item><title>no identity at all</title></item>
                </channel></rss>"#,
        );
        assert_eq!(bare.len(), 1);
        assert!(!bare[0].has_id);
        assert!(!bare[0].has_link);
    }

    #[test]
    fn test_scan_entries_atom_empty_links() {
        let raw = scan_entries(
            br#"<feed xmlns="http://www.w3.org/2005/Atom">
                 <title>x</title><id>f</id>
                 <entry><id>e1</id><title>t</title>
                 <link rel="alternate" href="https://example.com/1"/></entry>
               </feed>"#,
        );
        assert_eq!(raw.len(), 1);
        assert!(raw[0].has_id);
        assert!(raw[0].has_link);
    }

    #[test]
    fn test_entry_timestamp_clamped_to_now() {
        let feed = parse(
            r#"<rss version="2.0"><channel><title>x</title>
               <item><title>future</title>
               <pubDate>Sat, 01 Jan 2095 00:00:00 GMT</pubDate></item>
               </channel></rss>"#,
        );
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(t.timestamp(now()), now());
    }

    #[test]
    fn test_entry_timestamp_defaults_to_now() {
        let feed = parse(RSS);
        let t = EntryTranslator::new(&feed.entries[1], None);
        assert_eq!(t.timestamp(now()), now());
    }

    #[test]
    fn test_entry_timestamp_past_preserved() {
        let feed = parse(RSS);
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(
            t.timestamp(now()),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_entry_content_prefers_html_content() {
        let atom = parse(
            r#"<feed xmlns="http://www.w3.org/2005/Atom">
                 <title>x</title><id>f</id>
                 <entry>
                   <id>e1</id><title>t</title>
                   <summary type="text">plain summary</summary>
                   <content type="html">&lt;p&gt;rich&lt;/p&gt;</content>
                 </entry>
               </feed>"#,
        );
        let t = EntryTranslator::new(&atom.entries[0], None);
        let (body, content_type) = t.content();
        assert_eq!(body, "<p>rich</p>");
        assert_eq!(content_type, "text/html");
    }

    #[test]
    fn test_entry_content_falls_back_to_summary() {
        let feed = parse(RSS);
        let t = EntryTranslator::new(&feed.entries[1], None);
        let (body, _) = t.content();
        assert_eq!(body, "Summary two");
    }

    #[test]
    fn test_entry_content_empty_default() {
        let feed = parse(
            r#"<rss version="2.0"><channel><title>x</title>
               <item><title>bare</title><link>https://example.com/a</link></item>
               </channel></rss>"#,
        );
        let t = EntryTranslator::new(&feed.entries[0], None);
        assert_eq!(t.content(), (String::new(), "text/html".to_owned()));
    }

    #[test]
    fn test_scan_entries_on_garbage() {
        assert!(scan_entries(b"not xml at all").is_empty());
    }
}
