//! Canonical markup sanitization and plain-text projection.
//!
//! Every consumer of book content goes through the single [`MarkupSanitizer`]
//! implementation. The plain-text projection it produces is the addressing
//! domain for highlights, notes, and bookmarks, so the sanitizer and the
//! offset-mapping logic in [`MarkupSanitizer::wrap_range`] share one text
//! walker. Divergent extraction paths would disagree on offsets and break
//! highlight anchoring.

use crate::error::{Error, Result};

/// Tags whose content survives sanitization.
const TAG_ALLOW: &[&str] = &[
    "p", "br", "div", "span", "a", "img", "em", "strong", "i", "b", "u", "s",
    "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li", "blockquote", "pre",
    "code", "hr", "table", "thead", "tbody", "tr", "td", "th", "figure",
    "figcaption", "section", "article", "sup", "sub",
];

/// Attributes kept on allow-listed tags.
const ATTR_ALLOW: &[&str] = &["id", "href", "src", "alt", "title"];

/// Tags that act as word separators in the plain-text projection.
const BLOCK_TAGS: &[&str] = &[
    "p", "br", "div", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "li",
    "blockquote", "pre", "hr", "table", "thead", "tbody", "tr", "td", "th",
    "figure", "figcaption", "section", "article", "dl", "dt", "dd",
];

/// Converts raw markup into sanitized markup and a plain-text projection.
///
/// Implementations must be deterministic and must never reorder sibling
/// content; the plain-text output of `plain_text` must agree offset-for-offset
/// with the mapping used by `wrap_range`.
pub trait Sanitizer {
    /// Remove script/style blocks and non-allow-listed tags/attributes.
    fn sanitize(&self, markup: &str) -> String;

    /// Strip all markup, resolve entities, collapse whitespace, trim.
    fn plain_text(&self, markup: &str) -> String;

    /// Wrap the rendered text corresponding to plain-text range
    /// `start..end` in `open`/`close` markers, splitting at tag boundaries.
    fn wrap_range(
        &self,
        markup: &str,
        start: usize,
        end: usize,
        open: &str,
        close: &str,
    ) -> Result<String>;
}

/// The canonical sanitizer implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkupSanitizer;

impl Sanitizer for MarkupSanitizer {
    fn sanitize(&self, markup: &str) -> String {
        let mut out = String::with_capacity(markup.len());
        for chunk in chunks(markup) {
            match chunk {
                Chunk::Text(text) => out.push_str(text),
                Chunk::Skip(_) => {}
                Chunk::Tag(tag) => {
                    if TAG_ALLOW.contains(&tag.name.as_str()) {
                        emit_clean_tag(&mut out, &tag);
                    }
                }
            }
        }
        out
    }

    fn plain_text(&self, markup: &str) -> String {
        let mut out = String::with_capacity(markup.len());
        let mut needs_space = false;
        for chunk in chunks(markup) {
            match chunk {
                Chunk::Skip(_) => {}
                Chunk::Tag(tag) => {
                    if BLOCK_TAGS.contains(&tag.name.as_str()) {
                        needs_space = true;
                    }
                }
                Chunk::Text(text) => {
                    for (c, _, _) in EntityChars::new(text) {
                        if c.is_whitespace() {
                            needs_space = true;
                        } else {
                            if needs_space && !out.is_empty() {
                                out.push(' ');
                            }
                            needs_space = false;
                            out.push(c);
                        }
                    }
                }
            }
        }
        out
    }

    fn wrap_range(
        &self,
        markup: &str,
        start: usize,
        end: usize,
        open: &str,
        close: &str,
    ) -> Result<String> {
        let plain_len = self.plain_text(markup).chars().count();
        if start >= end || end > plain_len {
            return Err(Error::InvalidRange {
                start,
                end,
                len: plain_len,
            });
        }

        let mut out = String::with_capacity(markup.len() + open.len() + close.len());
        let mut st = WrapState {
            pos: 0,
            active: false,
            done: false,
        };
        let mut needs_space = false;
        let mut emitted_any = false;

        for chunk in chunks(markup) {
            match chunk {
                Chunk::Skip(_) => {}
                Chunk::Tag(tag) => {
                    if st.active {
                        // Never let the marker span a tag boundary.
                        out.push_str(close);
                        out.push_str(tag.raw);
                        out.push_str(open);
                    } else {
                        out.push_str(tag.raw);
                    }
                    if BLOCK_TAGS.contains(&tag.name.as_str()) {
                        needs_space = true;
                    }
                }
                Chunk::Text(text) => {
                    for (c, lo, hi) in EntityChars::new(text) {
                        if c.is_whitespace() {
                            needs_space = true;
                            out.push_str(&text[lo..hi]);
                        } else {
                            if needs_space && emitted_any {
                                // The collapsed space occupies one offset.
                                st.open_if(&mut out, start, open);
                                st.pos += 1;
                                st.close_if(&mut out, end, close);
                            }
                            needs_space = false;
                            st.open_if(&mut out, start, open);
                            st.pos += 1;
                            out.push_str(&text[lo..hi]);
                            st.close_if(&mut out, end, close);
                            emitted_any = true;
                        }
                    }
                }
            }
        }

        if st.active {
            out.push_str(close);
        }
        Ok(out)
    }
}

/// Cursor state for [`MarkupSanitizer::wrap_range`].
struct WrapState {
    /// Plain-text offset about to be emitted.
    pos: usize,
    active: bool,
    done: bool,
}

impl WrapState {
    fn open_if(&mut self, out: &mut String, start: usize, open: &str) {
        if self.pos == start && !self.active && !self.done {
            out.push_str(open);
            self.active = true;
        }
    }

    fn close_if(&mut self, out: &mut String, end: usize, close: &str) {
        if self.pos == end && self.active {
            out.push_str(close);
            self.active = false;
            self.done = true;
        }
    }
}

/// Strip tags and resolve entities without collapsing whitespace.
///
/// Used for markdown content, whose plain-text projection preserves line
/// structure.
pub fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    for chunk in chunks(markup) {
        if let Chunk::Text(text) = chunk {
            for (c, _, _) in EntityChars::new(text) {
                out.push(c);
            }
        }
    }
    out
}

// ----------------------------------------------------------------------------
// Markup walker
// ----------------------------------------------------------------------------

pub(crate) struct TagChunk<'a> {
    pub raw: &'a str,
    pub name: String,
    pub closing: bool,
    pub self_closing: bool,
}

pub(crate) enum Chunk<'a> {
    Text(&'a str),
    Tag(TagChunk<'a>),
    /// Comments and script/style blocks, dropped from every projection.
    Skip(&'a str),
}

/// Split markup into text runs, tags, and skipped blocks.
///
/// Script and style elements are consumed whole, including their content.
/// A `<` with no closing `>` is treated as literal text.
pub(crate) fn chunks(markup: &str) -> Vec<Chunk<'_>> {
    let mut result = Vec::new();
    let bytes = markup.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let Some(lt) = markup[i..].find('<').map(|p| p + i) else {
            result.push(Chunk::Text(&markup[i..]));
            break;
        };
        if lt > i {
            result.push(Chunk::Text(&markup[i..lt]));
        }

        if markup[lt..].starts_with("<!--") {
            let close = markup[lt..].find("-->").map(|p| lt + p + 3);
            let hi = close.unwrap_or(markup.len());
            result.push(Chunk::Skip(&markup[lt..hi]));
            i = hi;
            continue;
        }

        let Some(gt) = markup[lt..].find('>').map(|p| p + lt) else {
            result.push(Chunk::Text(&markup[lt..]));
            break;
        };
        let raw = &markup[lt..=gt];
        let inner = &raw[1..raw.len() - 1];
        let closing = inner.starts_with('/');
        let name: String = inner
            .trim_start_matches('/')
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        let self_closing = inner.trim_end().ends_with('/');

        if !closing && (name == "script" || name == "style") && !self_closing {
            // Swallow through the matching end tag.
            let end_pat = format!("</{name}");
            let rest = &markup[gt + 1..];
            let hi = match find_ignore_case(rest, &end_pat) {
                Some(p) => {
                    let after = gt + 1 + p;
                    markup[after..]
                        .find('>')
                        .map(|q| after + q + 1)
                        .unwrap_or(markup.len())
                }
                None => markup.len(),
            };
            result.push(Chunk::Skip(&markup[lt..hi]));
            i = hi;
            continue;
        }

        result.push(Chunk::Tag(TagChunk {
            raw,
            name,
            closing,
            self_closing,
        }));
        i = gt + 1;
    }

    result
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.to_ascii_lowercase();
    haystack
        .to_ascii_lowercase()
        .find(&needle)
        .filter(|&p| haystack.is_char_boundary(p))
}

/// Re-emit a tag keeping only allow-listed attributes.
fn emit_clean_tag(out: &mut String, tag: &TagChunk<'_>) {
    if tag.closing {
        out.push_str("</");
        out.push_str(&tag.name);
        out.push('>');
        return;
    }

    out.push('<');
    out.push_str(&tag.name);
    let inner = &tag.raw[1..tag.raw.len() - 1];
    let attrs = inner
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim_end_matches('/');
    for (name, value) in parse_attrs(attrs) {
        let name = name.to_ascii_lowercase();
        if !ATTR_ALLOW.contains(&name.as_str()) {
            continue;
        }
        if matches!(name.as_str(), "href" | "src") && !safe_url(&value) {
            continue;
        }
        out.push(' ');
        out.push_str(&name);
        out.push_str("=\"");
        out.push_str(&value);
        out.push('"');
    }
    if tag.self_closing {
        out.push_str(" /");
    }
    out.push('>');
}

/// Accept http/https/mailto URLs and scheme-less ones (relative paths,
/// fragments). Everything else (`javascript:`, `data:`, ...) is dropped.
fn safe_url(value: &str) -> bool {
    let v = value.trim();
    match v.find(|c| matches!(c, ':' | '/' | '?' | '#')) {
        Some(i) if v.as_bytes()[i] == b':' => {
            let scheme = v[..i].to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
        _ => true,
    }
}

/// Best-effort attribute parsing: `name="value"`, `name='value'`, bare names.
fn parse_attrs(s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let name_len = rest
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(rest.len());
        let name = &rest[..name_len];
        rest = rest[name_len..].trim_start();
        if name.is_empty() {
            break;
        }

        let value = if let Some(stripped) = rest.strip_prefix('=') {
            let stripped = stripped.trim_start();
            if let Some(q) = stripped.strip_prefix('"') {
                let end = q.find('"').unwrap_or(q.len());
                rest = &q[(end + 1).min(q.len())..];
                q[..end].to_string()
            } else if let Some(q) = stripped.strip_prefix('\'') {
                let end = q.find('\'').unwrap_or(q.len());
                rest = &q[(end + 1).min(q.len())..];
                q[..end].to_string()
            } else {
                let end = stripped
                    .find(char::is_whitespace)
                    .unwrap_or(stripped.len());
                rest = &stripped[end..];
                stripped[..end].to_string()
            }
        } else {
            String::new()
        };
        attrs.push((name.to_string(), value));
        rest = rest.trim_start();
    }
    attrs
}

// ----------------------------------------------------------------------------
// Entity-aware character iterator
// ----------------------------------------------------------------------------

/// Yields decoded characters along with the byte range they occupy in the
/// source text. Unresolvable entities are passed through literally.
struct EntityChars<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> EntityChars<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }
}

impl Iterator for EntityChars<'_> {
    type Item = (char, usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.text[self.pos..];
        let c = rest.chars().next()?;
        let start = self.pos;

        if c == '&'
            && let Some(semi) = rest[1..].find(';').filter(|&p| p <= 32)
            && let Some(decoded) = resolve_entity(&rest[1..1 + semi])
        {
            self.pos += semi + 2;
            return Some((decoded, start, self.pos));
        }

        self.pos += c.len_utf8();
        Some((c, start, self.pos))
    }
}

/// Resolve XML/HTML entity references.
fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" | "#39" => return Some('\''),
        "quot" => return Some('"'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "amp" => return Some('&'),
        "nbsp" => return Some(' '),
        _ => {}
    }

    if let Some(hex) = entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X")) {
        u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok().and_then(char::from_u32)
    } else {
        None
    }
}
