//! Character and entity reference handling shared by the sanitizer passes.
//!
//! A deliberately small table: feeds in the wild overwhelmingly use numeric
//! references or the handful of named entities below. Unknown names are
//! passed through verbatim rather than rejected.

/// Numeric references that re-introduce markup if decoded: `& < > "`.
pub const RESERVED_CHARREFS: [u32; 4] = [38, 60, 62, 34];

/// Named references that re-introduce markup if decoded.
pub const RESERVED_ENTITIES: [&str; 4] = ["amp", "lt", "gt", "quot"];

/// Looks up a named entity reference, returning its decoded character.
pub fn lookup(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "hellip" => '\u{2026}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "bull" => '\u{2022}',
        "middot" => '\u{b7}',
        "sect" => '\u{a7}',
        "para" => '\u{b6}',
        "deg" => '\u{b0}',
        "plusmn" => '\u{b1}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "frac12" => '\u{bd}',
        "frac14" => '\u{bc}',
        "pound" => '\u{a3}',
        "euro" => '\u{20ac}',
        "yen" => '\u{a5}',
        "cent" => '\u{a2}',
        "dagger" => '\u{2020}',
        "agrave" => '\u{e0}',
        "eacute" => '\u{e9}',
        "egrave" => '\u{e8}',
        "ccedil" => '\u{e7}',
        "auml" => '\u{e4}',
        "ouml" => '\u{f6}',
        "uuml" => '\u{fc}',
        "szlig" => '\u{df}',
        _ => return None,
    };
    Some(c)
}

/// Decodes a numeric character reference; `None` for values outside Unicode
/// or in the C0/C1 control ranges (other than whitespace).
pub fn decode_charref(value: u32) -> Option<char> {
    let c = char::from_u32(value)?;
    if c.is_control() && c != '\t' && c != '\n' && c != '\r' {
        return None;
    }
    Some(c)
}

/// Decodes all character and entity references in a string.
///
/// Used for attribute values, where references are always decoded and the
/// serializer re-escapes on output. Unknown references are kept verbatim.
pub fn decode_text(input: &str) -> String {
    if !input.contains('&') {
        return input.to_owned();
    }

    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        match parse_reference(rest) {
            Some((decoded, consumed)) => {
                out.push(decoded);
                rest = &rest[consumed..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parses a reference at the start of `input` (which begins with `&`).
///
/// Returns the decoded character and the number of bytes consumed, or `None`
/// if no well-formed, decodable reference starts here.
pub fn parse_reference(input: &str) -> Option<(char, usize)> {
    let body = input.strip_prefix('&')?;
    let end = body.find(';')?;
    // Cap the scan so a stray ampersand in running text never swallows
    // half the document looking for a semicolon
    if end == 0 || end > 32 {
        return None;
    }
    let name = &body[..end];
    let consumed = end + 2; // '&' + name + ';'

    if let Some(digits) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        let value = u32::from_str_radix(digits, 16).ok()?;
        return decode_charref(value).map(|c| (c, consumed));
    }
    if let Some(digits) = name.strip_prefix('#') {
        let value: u32 = digits.parse().ok()?;
        return decode_charref(value).map(|c| (c, consumed));
    }

    lookup(name).map(|c| (c, consumed))
}

/// Escapes `& < > "` for safe emission inside markup and attribute values.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_common_entities() {
        assert_eq!(lookup("amp"), Some('&'));
        assert_eq!(lookup("copy"), Some('\u{a9}'));
        assert_eq!(lookup("bogus"), None);
    }

    #[test]
    fn test_decode_text_mixed() {
        assert_eq!(decode_text("fish &amp; chips"), "fish & chips");
        assert_eq!(decode_text("&#169; 2024"), "\u{a9} 2024");
        assert_eq!(decode_text("&#xA9; 2024"), "\u{a9} 2024");
    }

    #[test]
    fn test_decode_text_unknown_kept_verbatim() {
        assert_eq!(decode_text("a &bogus; b"), "a &bogus; b");
        assert_eq!(decode_text("AT&T"), "AT&T");
    }

    #[test]
    fn test_decode_text_no_ampersand_fast_path() {
        assert_eq!(decode_text("plain text"), "plain text");
    }

    #[test]
    fn test_parse_reference_rejects_overlong() {
        let long = format!("&{};", "a".repeat(40));
        assert_eq!(parse_reference(&long), None);
    }

    #[test]
    fn test_decode_charref_rejects_controls() {
        assert_eq!(decode_charref(0x07), None);
        assert_eq!(decode_charref(0x0a), Some('\n'));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;"
        );
    }
}
