//! HTML sanitization and feed discovery.
//!
//! Entry content from arbitrary feeds is untrusted markup. Everything here
//! runs off one streaming tokenizer with no DOM: [`strip_html`] for plain
//! text, [`reconstruct_html`] for a safe re-serialization, [`scrub_html`]
//! for blacklist-driven ad removal, and [`find_feed_links`] for discovering
//! feeds inside an HTML page. All passes are total functions; malformed
//! input degrades to best-effort output, never an error.

mod entities;
mod html;
mod tokenizer;

pub use entities::escape_html;
pub use html::{
    find_feed_links, find_icon_link, find_title, reconstruct_html, scrub_html, sniff_feed,
    strip_html, FeedLink,
};
