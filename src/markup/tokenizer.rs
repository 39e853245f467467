//! Streaming HTML/XML tokenizer underlying all sanitizer passes.
//!
//! Operates directly on the input `&str` with no DOM materialization, so
//! arbitrarily large documents cost one linear pass. There is no notion of
//! an invalid document: anything that does not parse as a tag, reference,
//! comment, doctype, or processing instruction is emitted as text.

use super::entities;

/// A single parsed attribute. Names are lowercased; values have their
/// character/entity references decoded (serializers re-escape on output).
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    pub name: String,
    pub value: String,
}

/// One lexical token of the input stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// `<name attr="value">`; `self_closing` reflects a trailing `/`.
    StartTag {
        name: String,
        attrs: Vec<Attr>,
        self_closing: bool,
    },
    /// `</name>`
    EndTag { name: String },
    /// A run of plain text containing no `<` or `&`.
    Text(&'a str),
    /// `&#160;` or `&#xA0;` — the numeric value, undecoded.
    CharRef(u32),
    /// `&copy;` — the reference name, undecoded.
    EntityRef(&'a str),
    /// `<!-- ... -->`, content between the delimiters.
    Comment(&'a str),
    /// `<!DOCTYPE ...>` and other declarations.
    Doctype(&'a str),
    /// `<? ... ?>` processing instructions.
    Pi(&'a str),
}

pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    /// Lexes a start or end tag beginning at `pos` (which points at `<`).
    /// Returns `None` when what follows `<` is not a tag, in which case the
    /// `<` is treated as text by the caller.
    fn lex_tag(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let bytes = rest.as_bytes();

        if bytes.len() < 2 {
            return None;
        }

        // </name>
        if bytes[1] == b'/' {
            let name_start = 2;
            let mut i = name_start;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
                i += 1;
            }
            if i == name_start {
                return None;
            }
            let name = rest[name_start..i].to_ascii_lowercase();
            // Skip anything up to the closing '>', best effort
            let close = rest[i..].find('>').map(|p| i + p + 1).unwrap_or(rest.len());
            self.pos += close;
            return Some(Token::EndTag { name });
        }

        if !bytes[1].is_ascii_alphabetic() {
            return None;
        }

        // <name ...>
        let mut i = 1;
        while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
            i += 1;
        }
        let name = rest[1..i].to_ascii_lowercase();

        let mut attrs = Vec::new();
        let mut self_closing = false;

        loop {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i >= bytes.len() {
                break; // unterminated tag: consume to end of input
            }
            match bytes[i] {
                b'>' => {
                    i += 1;
                    break;
                }
                b'/' => {
                    self_closing = true;
                    i += 1;
                }
                _ => {
                    let (attr, next) = lex_attr(rest, i);
                    if next == i {
                        // No progress possible on this byte, skip it
                        i += 1;
                    } else {
                        i = next;
                        if let Some(attr) = attr {
                            attrs.push(attr);
                        }
                    }
                }
            }
        }

        self.pos += i;
        Some(Token::StartTag {
            name,
            attrs,
            self_closing,
        })
    }

    /// Lexes a `&...;` reference at `pos`. `None` means the `&` is text.
    fn lex_reference(&mut self) -> Option<Token<'a>> {
        let rest = self.rest();
        let body = rest.strip_prefix('&')?;
        let end = body.find(';')?;
        if end == 0 || end > 32 {
            return None;
        }
        let name = &body[..end];
        let consumed = end + 2;

        if let Some(digits) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
            let value = u32::from_str_radix(digits, 16).ok()?;
            self.pos += consumed;
            return Some(Token::CharRef(value));
        }
        if let Some(digits) = name.strip_prefix('#') {
            let value: u32 = digits.parse().ok()?;
            self.pos += consumed;
            return Some(Token::CharRef(value));
        }
        if name.bytes().all(|b| b.is_ascii_alphanumeric()) {
            self.pos += consumed;
            return Some(Token::EntityRef(name));
        }
        None
    }

    /// Lexes comments, doctype declarations, and processing instructions.
    fn lex_markup_decl(&mut self) -> Token<'a> {
        let rest = self.rest();

        if let Some(body) = rest.strip_prefix("<!--") {
            let (content, consumed) = match body.find("-->") {
                Some(end) => (&body[..end], 4 + end + 3),
                None => (body, rest.len()),
            };
            self.pos += consumed;
            return Token::Comment(content);
        }

        if rest.starts_with("<?") {
            let (content, consumed) = match rest.find('>') {
                Some(end) => (&rest[2..end], end + 1),
                None => (&rest[2..], rest.len()),
            };
            self.pos += consumed;
            return Token::Pi(content.trim_end_matches('?'));
        }

        // <!DOCTYPE ...> and any other <! declaration
        let (content, consumed) = match rest.find('>') {
            Some(end) => (&rest[2..end], end + 1),
            None => (&rest[2..], rest.len()),
        };
        self.pos += consumed;
        Token::Doctype(content)
    }
}

/// Lexes one attribute starting at byte offset `start` of `tag`.
///
/// Handles `name="value"`, `name='value'`, `name=bare`, and bare boolean
/// attributes. Returns the attribute (if any) and the offset to resume at.
fn lex_attr(tag: &str, start: usize) -> (Option<Attr>, usize) {
    let bytes = tag.as_bytes();
    let mut i = start;

    let name_start = i;
    while i < bytes.len()
        && !bytes[i].is_ascii_whitespace()
        && bytes[i] != b'='
        && bytes[i] != b'>'
        && bytes[i] != b'/'
    {
        i += 1;
    }
    if i == name_start {
        return (None, i);
    }
    let name = tag[name_start..i].to_ascii_lowercase();

    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }

    if i >= bytes.len() || bytes[i] != b'=' {
        // Boolean attribute
        return (Some(Attr {
            name,
            value: String::new(),
        }), i);
    }
    i += 1; // consume '='
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if i >= bytes.len() {
        return (Some(Attr {
            name,
            value: String::new(),
        }), i);
    }

    let value = if bytes[i] == b'"' || bytes[i] == b'\'' {
        let quote = bytes[i];
        i += 1;
        let value_start = i;
        while i < bytes.len() && bytes[i] != quote {
            i += 1;
        }
        let raw = &tag[value_start..i];
        if i < bytes.len() {
            i += 1; // consume closing quote
        }
        raw
    } else {
        let value_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
            i += 1;
        }
        &tag[value_start..i]
    };

    (Some(Attr {
        name,
        value: entities::decode_text(value),
    }), i)
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        if self.pos >= self.input.len() {
            return None;
        }
        let rest = self.rest();

        if rest.starts_with('<') {
            if rest.starts_with("<!") || rest.starts_with("<?") {
                return Some(self.lex_markup_decl());
            }
            if let Some(token) = self.lex_tag() {
                return Some(token);
            }
            // Stray '<': emit as a one-character text run
            self.pos += 1;
            return Some(Token::Text(&rest[..1]));
        }

        if rest.starts_with('&') {
            if let Some(token) = self.lex_reference() {
                return Some(token);
            }
            self.pos += 1;
            return Some(Token::Text(&rest[..1]));
        }

        // Text run up to the next markup or reference character
        let end = rest
            .find(|c| c == '<' || c == '&')
            .unwrap_or(rest.len());
        self.pos += end;
        Some(Token::Text(&rest[..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(input: &str) -> Vec<Token<'_>> {
        Tokenizer::new(input).collect()
    }

    #[test]
    fn test_simple_elements() {
        let toks = tokens("<p>hi</p>");
        assert_eq!(toks.len(), 3);
        assert!(matches!(&toks[0], Token::StartTag { name, .. } if name == "p"));
        assert_eq!(toks[1], Token::Text("hi"));
        assert!(matches!(&toks[2], Token::EndTag { name } if name == "p"));
    }

    #[test]
    fn test_attributes_quoted_and_bare() {
        let toks = tokens(r#"<a href="/x" TARGET='_blank' async data-n=3>"#);
        let Token::StartTag { name, attrs, .. } = &toks[0] else {
            panic!("expected start tag");
        };
        assert_eq!(name, "a");
        assert_eq!(attrs[0], Attr { name: "href".into(), value: "/x".into() });
        assert_eq!(attrs[1], Attr { name: "target".into(), value: "_blank".into() });
        assert_eq!(attrs[2], Attr { name: "async".into(), value: "".into() });
        assert_eq!(attrs[3], Attr { name: "data-n".into(), value: "3".into() });
    }

    #[test]
    fn test_attribute_values_are_decoded() {
        let toks = tokens(r#"<a title="fish &amp; chips">"#);
        let Token::StartTag { attrs, .. } = &toks[0] else {
            panic!("expected start tag");
        };
        assert_eq!(attrs[0].value, "fish & chips");
    }

    #[test]
    fn test_self_closing() {
        let toks = tokens("<br/><img src='x' />");
        assert!(matches!(
            &toks[0],
            Token::StartTag { name, self_closing: true, .. } if name == "br"
        ));
        assert!(matches!(
            &toks[1],
            Token::StartTag { name, self_closing: true, .. } if name == "img"
        ));
    }

    #[test]
    fn test_references() {
        let toks = tokens("a &amp; b &#169; &#xA9; c");
        assert!(toks.contains(&Token::EntityRef("amp")));
        assert_eq!(toks.iter().filter(|t| **t == Token::CharRef(169)).count(), 2);
    }

    #[test]
    fn test_stray_angle_and_ampersand_are_text() {
        let toks = tokens("1 < 2 & 3");
        let text: String = toks
            .iter()
            .map(|t| match t {
                Token::Text(s) => *s,
                _ => "",
            })
            .collect();
        assert_eq!(text, "1 < 2 & 3");
    }

    #[test]
    fn test_comment_doctype_pi() {
        let toks = tokens("<!DOCTYPE html><!-- hidden --><?xml version=\"1.0\"?>x");
        assert!(matches!(&toks[0], Token::Doctype(d) if d.contains("DOCTYPE")));
        assert_eq!(toks[1], Token::Comment(" hidden "));
        assert!(matches!(&toks[2], Token::Pi(_)));
        assert_eq!(toks[3], Token::Text("x"));
    }

    #[test]
    fn test_unterminated_tag_consumes_rest() {
        let toks = tokens("before<a href=\"x");
        assert_eq!(toks[0], Token::Text("before"));
        assert!(matches!(&toks[1], Token::StartTag { name, .. } if name == "a"));
        assert_eq!(toks.len(), 2);
    }

    #[test]
    fn test_unterminated_comment_consumes_rest() {
        let toks = tokens("<!-- never closed");
        assert_eq!(toks.len(), 1);
        assert!(matches!(&toks[0], Token::Comment(_)));
    }

    #[test]
    fn test_end_tag_with_junk() {
        let toks = tokens("</p   junk>after");
        assert!(matches!(&toks[0], Token::EndTag { name } if name == "p"));
        assert_eq!(toks[1], Token::Text("after"));
    }

    #[test]
    fn test_mixed_case_names_lowered() {
        let toks = tokens("<DIV Class=x></DIV>");
        assert!(matches!(&toks[0], Token::StartTag { name, .. } if name == "div"));
        assert!(matches!(&toks[1], Token::EndTag { name } if name == "div"));
    }
}
