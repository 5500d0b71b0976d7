//! Directive scanner.
//!
//! Finds `<% … %>` spans in a page buffer and prepares their content for
//! execution.  All positions are byte offsets into the caller's buffer; the
//! only mutation is [`normalize_continuations`], which rewrites in place
//! without changing the buffer length, so previously computed offsets stay
//! valid.
//!
//! Matching is purely textual.  The scanner knows nothing about quoting in
//! the script language, so a `%>` inside a string literal ends the span
//! early.

use std::ops::Range;

use aho_corasick::AhoCorasick;

pub const OPEN_MARKER: &[u8] = b"<%";
pub const CLOSE_MARKER: &[u8] = b"%>";

const LANGUAGE_KEYWORD: &[u8] = b"language";
const LANGUAGE_VALUE: &[u8] = b"=javascript";

// ── Types ─────────────────────────────────────────────────────────────────────

/// A directive located in the buffer: `[start, end)` covers both markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectiveSpan {
    pub start: usize,
    pub end: usize,
}

impl DirectiveSpan {
    /// Byte range between the markers.
    pub fn content(&self) -> Range<usize> {
        self.start + OPEN_MARKER.len()..self.end - CLOSE_MARKER.len()
    }
}

/// An open marker with no close marker before end of document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unterminated {
    /// Offset of the dangling open marker.
    pub offset: usize,
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Marker search automatons, built once per service and shared by renders.
#[derive(Debug, Clone)]
pub struct Scanner {
    open: AhoCorasick,
    close: AhoCorasick,
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

impl Scanner {
    pub fn new() -> Self {
        Scanner {
            open: AhoCorasick::new([OPEN_MARKER]),
            close: AhoCorasick::new([CLOSE_MARKER]),
        }
    }

    /// Locate the next directive at or after `cursor`.
    ///
    /// Returns `Ok(None)` when no open marker remains.
    pub fn find_next_directive(
        &self,
        buf: &[u8],
        cursor: usize,
    ) -> Result<Option<DirectiveSpan>, Unterminated> {
        let Some(rest) = buf.get(cursor..) else {
            return Ok(None);
        };
        let Some(open) = self.open.find(rest) else {
            return Ok(None);
        };
        let start = cursor + open.start();
        let content_start = start + OPEN_MARKER.len();
        match self.close.find(&buf[content_start..]) {
            Some(close) => Ok(Some(DirectiveSpan {
                start,
                end: content_start + close.end(),
            })),
            None => Err(Unterminated { offset: start }),
        }
    }

    /// Turn a span's content into the executable fragment, in place.
    ///
    /// Skips the language attribute, folds continuations and trims
    /// whitespace.  Returns the absolute range of the fragment, which is
    /// empty when there is nothing to execute.
    pub fn prepare_fragment(&self, buf: &mut [u8], span: DirectiveSpan) -> Range<usize> {
        let content = span.content();
        let body_start = content.start + strip_language_tag(&buf[content.clone()]);
        let body = &mut buf[body_start..content.end];
        normalize_continuations(body);
        let trimmed = trim_range(body);
        body_start + trimmed.start..body_start + trimmed.end
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Literal bytes between the cursor and the next directive.
pub fn extract_literal(cursor: usize, span: DirectiveSpan) -> Range<usize> {
    cursor..span.start.max(cursor)
}

/// Length of an optional leading `language=javascript` attribute.
///
/// Whitespace may precede the keyword and the `=`.  Comparison is ASCII
/// case-insensitive.  A bare `language` without the value is left alone and
/// 0 is returned.
pub fn strip_language_tag(content: &[u8]) -> usize {
    match_token(content, 0, LANGUAGE_KEYWORD)
        .and_then(|after_keyword| match_token(content, after_keyword, LANGUAGE_VALUE))
        .unwrap_or(0)
}

/// Rewrite every `\` followed by CR/LF bytes into spaces, in place.
pub fn normalize_continuations(content: &mut [u8]) {
    let mut i = 0;
    while i < content.len() {
        if content[i] == b'\\' && matches!(content.get(i + 1), Some(b'\r' | b'\n')) {
            content[i] = b' ';
            i += 1;
            while matches!(content.get(i), Some(b'\r' | b'\n')) {
                content[i] = b' ';
                i += 1;
            }
        } else {
            i += 1;
        }
    }
}

/// Range of `bytes` with leading and trailing ASCII whitespace removed.
pub fn trim_range(bytes: &[u8]) -> Range<usize> {
    let start = skip_white(bytes, 0);
    let end = bytes[start..]
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| start + i + 1);
    start..end
}

fn skip_white(buf: &[u8], mut at: usize) -> usize {
    while at < buf.len() && buf[at].is_ascii_whitespace() {
        at += 1;
    }
    at
}

/// Match `token` after optional whitespace; returns the offset past it.
fn match_token(buf: &[u8], at: usize, token: &[u8]) -> Option<usize> {
    let at = skip_white(buf, at);
    let candidate = buf.get(at..at + token.len())?;
    candidate.eq_ignore_ascii_case(token).then_some(at + token.len())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn spans(doc: &str) -> Vec<(usize, usize)> {
        let scanner = Scanner::new();
        let mut cursor = 0;
        let mut out = Vec::new();
        while let Some(span) = scanner.find_next_directive(doc.as_bytes(), cursor).unwrap() {
            out.push((span.start, span.end));
            cursor = span.end;
        }
        out
    }

    fn fragment(doc: &str) -> String {
        let scanner = Scanner::new();
        let mut buf = doc.as_bytes().to_vec();
        let span = scanner.find_next_directive(&buf, 0).unwrap().unwrap();
        let range = scanner.prepare_fragment(&mut buf, span);
        String::from_utf8(buf[range].to_vec()).unwrap()
    }

    #[test]
    fn finds_spans_in_order() {
        assert_eq!(spans("a<% x %>b<%y%>c"), vec![(1, 8), (9, 14)]);
    }

    #[test]
    fn no_marker_is_none() {
        let scanner = Scanner::new();
        assert_eq!(scanner.find_next_directive(b"<html>50% off</html>", 0), Ok(None));
        assert_eq!(scanner.find_next_directive(b"abc", 10), Ok(None));
    }

    #[test]
    fn empty_span() {
        assert_eq!(spans("<%%>"), vec![(0, 4)]);
        assert_eq!(fragment("<%%>"), "");
        assert_eq!(fragment("<%  \n\t %>"), "");
    }

    #[test]
    fn unterminated_reports_open_offset() {
        let scanner = Scanner::new();
        assert_eq!(
            scanner.find_next_directive(b"ok <% write(1) %> then <% oops", 0),
            Ok(Some(DirectiveSpan { start: 3, end: 17 }))
        );
        assert_eq!(
            scanner.find_next_directive(b"ok <% write(1) %> then <% oops", 17),
            Err(Unterminated { offset: 23 })
        );
        // The close marker must start after the open marker.
        assert_eq!(scanner.find_next_directive(b"<%>", 0), Err(Unterminated { offset: 0 }));
    }

    #[test]
    fn close_marker_inside_string_ends_span() {
        assert_eq!(fragment(r#"<% write("50%>") %>"#), r#"write("50"#);
    }

    #[test]
    fn literal_precedes_span() {
        let span = DirectiveSpan { start: 6, end: 12 };
        assert_eq!(extract_literal(2, span), 2..6);
        assert_eq!(extract_literal(6, span), 6..6);
    }

    #[test]
    fn language_tag_is_skipped() {
        assert_eq!(fragment(r#"<% language=javascript write("hi") %>"#), r#"write("hi")"#);
        assert_eq!(fragment(r#"<%LANGUAGE=JavaScript write("hi")%>"#), r#"write("hi")"#);
        assert_eq!(fragment(r#"<% language =javascript write("hi")%>"#), r#"write("hi")"#);
    }

    #[test]
    fn bare_language_is_kept() {
        assert_eq!(strip_language_tag(b" language = 1"), 0);
        assert_eq!(strip_language_tag(b"language=vbscript x"), 0);
        assert_eq!(fragment("<% language = 1 %>"), "language = 1");
    }

    #[test]
    fn continuations_become_spaces() {
        let mut buf = b"a = 1;\\\r\nwrite(a);".to_vec();
        normalize_continuations(&mut buf);
        assert_eq!(buf, b"a = 1;   write(a);");
    }

    #[test]
    fn lone_backslash_is_untouched() {
        let mut buf = br#"write("a\tb") \"#.to_vec();
        let before = buf.clone();
        normalize_continuations(&mut buf);
        assert_eq!(buf, before);
    }

    #[test]
    fn trim() {
        assert_eq!(trim_range(b"  ab c \n"), 2..6);
        assert_eq!(trim_range(b"   "), 3..3);
        assert_eq!(trim_range(b""), 0..0);
    }
}
