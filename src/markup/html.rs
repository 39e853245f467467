//! Sanitizer passes built on the streaming tokenizer: plain-text stripping,
//! safe reconstruction, blacklist scrubbing, and feed-link discovery.

use super::entities::{self, escape_html, RESERVED_CHARREFS, RESERVED_ENTITIES};
use super::tokenizer::{Attr, Token, Tokenizer};
use crate::url;

/// MIME types a `<link rel=alternate>` may carry to count as a feed link.
const FEED_TYPES: [&str; 5] = [
    "application/rss+xml",
    "text/xml",
    "application/atom+xml",
    "application/x.atom+xml",
    "application/x-atom+xml",
];

/// HTML5 void elements: emitted self-closing, never given an end tag.
const VOID_ELEMENTS: [&str; 16] = [
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input", "keygen", "link",
    "meta", "param", "source", "track", "wbr",
];

/// Embed providers whose `<iframe>`s are allowed to survive reconstruction.
const IFRAME_WHITELIST: [&str; 5] = [
    "youtube.com",
    "youtube-nocookie.com",
    "player.vimeo.com",
    "www.youtube.com",
    "www.vimeo.com",
];

/// A feed link discovered in an HTML page.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedLink {
    /// Absolute URL of the feed.
    pub href: String,
    /// The link's `title` attribute, empty if absent.
    pub title: String,
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn attr<'a>(attrs: &'a [Attr], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|a| a.name == name)
        .map(|a| a.value.as_str())
}

/// Substring-of-host matching, as the scrub blacklist has always worked:
/// `"ads.example.com"` is matched by the entry `"example.com"`.
fn host_matches(value: &str, patterns: &[String]) -> bool {
    let host = url::friendly_host(value);
    if host.is_empty() {
        return false;
    }
    patterns.iter().any(|p| !p.is_empty() && host.contains(p.as_str()))
}

fn iframe_allowed(attrs: &[Attr]) -> bool {
    let Some(src) = attr(attrs, "src") else {
        return false;
    };
    let host = url::friendly_host(src);
    if host.is_empty() {
        return false;
    }
    IFRAME_WHITELIST
        .iter()
        .any(|allowed| host == *allowed || host.ends_with(&format!(".{allowed}")))
}

fn push_start_tag(out: &mut String, name: &str, attrs: &[Attr]) {
    out.push('<');
    out.push_str(name);
    for a in attrs {
        out.push(' ');
        out.push_str(&a.name);
        out.push_str("=\"");
        out.push_str(&escape_html(&a.value));
        out.push('"');
    }
    if is_void(name) {
        out.push_str(" />");
    } else {
        out.push('>');
    }
}

/// Strips all markup, producing a plain-text rendition of the input.
///
/// Character and entity references are decoded, except the reserved set
/// (`&amp; &lt; &gt; &quot;` and their numeric forms) which stay escaped so
/// the output can never re-introduce markup. Comments, declarations, and
/// processing instructions vanish. Never fails: unknown constructs degrade
/// to best-effort text.
pub fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for token in Tokenizer::new(input) {
        match token {
            Token::Text(text) => out.push_str(text),
            Token::CharRef(value) => {
                if RESERVED_CHARREFS.contains(&value) {
                    out.push_str(&format!("&#{value};"));
                } else if let Some(c) = entities::decode_charref(value) {
                    out.push(c);
                }
            }
            Token::EntityRef(name) => {
                if RESERVED_ENTITIES.contains(&name) {
                    out.push_str(&format!("&{name};"));
                } else if let Some(c) = entities::lookup(name) {
                    out.push(c);
                } else {
                    // Unknown entity: keep verbatim rather than guess
                    out.push_str(&format!("&{name};"));
                }
            }
            Token::StartTag { .. }
            | Token::EndTag { .. }
            | Token::Comment(_)
            | Token::Doctype(_)
            | Token::Pi(_) => {}
        }
    }
    out
}

/// Re-emits a safe serialization of the input markup.
///
/// Attribute values are re-escaped, void elements normalized to
/// self-closing form, and comments/doctypes/processing instructions removed
/// unconditionally. `<iframe>` survives only when its `src` host is on the
/// embed whitelist; a disallowed iframe is dropped in its entirety,
/// descendant content included.
pub fn reconstruct_html(input: &str) -> String {
    process(input, &[])
}

/// Like [`reconstruct_html`], but additionally drops `<a>` anchors and
/// `<img>` elements whose `href`/`src` host matches the blacklist. Content
/// nested inside a dropped anchor is suppressed until the matching end tag;
/// a dropped image leaves its `alt` text behind as a plain-text fallback.
pub fn scrub_html(input: &str, blacklist: &[String]) -> String {
    process(input, blacklist)
}

fn process(input: &str, blacklist: &[String]) -> String {
    let mut out = String::with_capacity(input.len());
    // Nesting depths inside a suppressed region; zero means emitting
    let mut iframe_depth: usize = 0;
    let mut anchor_depth: usize = 0;

    for token in Tokenizer::new(input) {
        if iframe_depth > 0 {
            match &token {
                Token::StartTag {
                    name, self_closing, ..
                } if name == "iframe" && !self_closing => iframe_depth += 1,
                Token::EndTag { name } if name == "iframe" => iframe_depth -= 1,
                _ => {}
            }
            continue;
        }
        if anchor_depth > 0 {
            match &token {
                Token::StartTag {
                    name, self_closing, ..
                } if name == "a" && !self_closing => anchor_depth += 1,
                Token::EndTag { name } if name == "a" => anchor_depth -= 1,
                _ => {}
            }
            continue;
        }

        match token {
            Token::StartTag {
                name,
                attrs,
                self_closing,
            } => match name.as_str() {
                "iframe" => {
                    if iframe_allowed(&attrs) {
                        push_start_tag(&mut out, &name, &attrs);
                    } else if !self_closing {
                        iframe_depth = 1;
                    }
                }
                "a" => {
                    let blacklisted = attr(&attrs, "href")
                        .map(|href| host_matches(href, blacklist))
                        .unwrap_or(false);
                    if blacklisted {
                        if !self_closing {
                            anchor_depth = 1;
                        }
                    } else {
                        push_start_tag(&mut out, &name, &attrs);
                    }
                }
                "img" => {
                    let blacklisted = attr(&attrs, "src")
                        .map(|src| host_matches(src, blacklist))
                        .unwrap_or(false);
                    if blacklisted {
                        if let Some(alt) = attr(&attrs, "alt") {
                            out.push_str(&escape_html(alt));
                        }
                    } else {
                        push_start_tag(&mut out, &name, &attrs);
                    }
                }
                _ => push_start_tag(&mut out, &name, &attrs),
            },
            Token::EndTag { name } => {
                if !is_void(&name) {
                    out.push_str(&format!("</{name}>"));
                }
            }
            Token::Text(text) => out.push_str(text),
            Token::CharRef(value) => {
                if RESERVED_CHARREFS.contains(&value) {
                    out.push_str(&format!("&#{value};"));
                } else if let Some(c) = entities::decode_charref(value) {
                    out.push(c);
                }
            }
            Token::EntityRef(name) => {
                if RESERVED_ENTITIES.contains(&name) {
                    out.push_str(&format!("&{name};"));
                } else if let Some(c) = entities::lookup(name) {
                    out.push(c);
                } else {
                    out.push_str(&format!("&{name};"));
                }
            }
            Token::Comment(_) | Token::Doctype(_) | Token::Pi(_) => {}
        }
    }
    out
}

/// Scans an HTML page for `<link rel=alternate>` feed references.
///
/// `rel` and `type` are compared case-insensitively; `rel` may carry
/// multiple whitespace-separated values. Relative `href`s resolve against
/// the document's `<base href>` when present, else against `base_url`.
pub fn find_feed_links(input: &str, base_url: &str) -> Vec<FeedLink> {
    let mut links = Vec::new();
    let mut base = base_url.to_owned();

    for token in Tokenizer::new(input) {
        let Token::StartTag { name, attrs, .. } = token else {
            continue;
        };
        match name.as_str() {
            "base" => {
                if let Some(href) = attr(&attrs, "href") {
                    base = href.to_owned();
                }
            }
            "link" => {
                let Some(rel) = attr(&attrs, "rel") else {
                    continue;
                };
                if !rel
                    .split_ascii_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("alternate"))
                {
                    continue;
                }
                let Some(link_type) = attr(&attrs, "type") else {
                    continue;
                };
                let link_type = link_type.trim().to_ascii_lowercase();
                if !FEED_TYPES.contains(&link_type.as_str()) {
                    continue;
                }
                let Some(href) = attr(&attrs, "href") else {
                    continue;
                };
                links.push(FeedLink {
                    href: url::resolve(href, &base).into_owned(),
                    title: attr(&attrs, "title").unwrap_or_default().to_owned(),
                });
            }
            _ => {}
        }
    }
    links
}

/// Finds the page's declared icon: the first `<link>` whose `rel` values
/// include `icon` (covers `shortcut icon` and `apple-touch-icon` too),
/// resolved against `base_url`.
pub fn find_icon_link(input: &str, base_url: &str) -> Option<String> {
    for token in Tokenizer::new(input) {
        let Token::StartTag { name, attrs, .. } = token else {
            continue;
        };
        if name != "link" {
            continue;
        }
        let Some(rel) = attr(&attrs, "rel") else {
            continue;
        };
        let is_icon = rel
            .split_ascii_whitespace()
            .any(|r| r.eq_ignore_ascii_case("icon") || r.eq_ignore_ascii_case("apple-touch-icon"));
        if !is_icon {
            continue;
        }
        if let Some(href) = attr(&attrs, "href") {
            if !href.is_empty() {
                return Some(url::resolve(href, base_url).into_owned());
            }
        }
    }
    None
}

/// Returns the page `<title>` text, whitespace-trimmed, empty if absent.
pub fn find_title(input: &str) -> String {
    let mut title = String::new();
    let mut in_title: usize = 0;

    for token in Tokenizer::new(input) {
        match token {
            Token::StartTag {
                name, self_closing, ..
            } if name == "title" && !self_closing => in_title += 1,
            Token::EndTag { name } if name == "title" => in_title = in_title.saturating_sub(1),
            Token::Text(text) if in_title > 0 => title.push_str(text),
            Token::CharRef(value) if in_title > 0 => {
                if let Some(c) = entities::decode_charref(value) {
                    title.push(c);
                }
            }
            Token::EntityRef(name) if in_title > 0 => {
                if let Some(c) = entities::lookup(name) {
                    title.push(c);
                }
            }
            _ => {}
        }
    }
    title.trim().to_owned()
}

/// Cheap heuristic: does this text look like a feed document?
///
/// True when the raw text contains one of `<rss`, `<rdf`, `<feed` and does
/// not look like a full HTML page. Short-circuits expensive parsing for the
/// common case of subscribing to a site's home page by mistake.
pub fn sniff_feed(input: &str) -> bool {
    let lower = input.to_ascii_lowercase();
    if lower.contains("<html") {
        return false;
    }
    lower.contains("<rss") || lower.contains("<rdf") || lower.contains("<feed")
}
