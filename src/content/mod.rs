//! Content normalization: sanitized markup, plain-text projection, TOC, and
//! reading statistics.
//!
//! Markdown and HTML inputs converge on the same [`ProcessedContent`]
//! contract: whatever the source format, the plain-text projection is the
//! single addressing domain for offset-based annotations.

pub mod outline;
pub mod sanitize;
pub mod toc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use outline::{
    DEFAULT_WORDS_PER_MINUTE, HeadingDetector, KeywordDetector, StructureDetector, reading_time,
    text_to_markdown, word_count,
};
pub use sanitize::{MarkupSanitizer, Sanitizer, strip_tags};
pub use toc::{TocItem, slugify, toc_from_markdown, toc_from_markup};

use crate::book::{ContentType, content_version};
use crate::content::sanitize::{Chunk, chunks};

/// The processed bundle persisted per book version.
///
/// Regenerated wholesale on re-ingestion; `plain_text` length is the
/// addressing domain for highlights, notes, and bookmarks. If re-processing
/// changes the plain text, `version` changes with it and stored offsets
/// become subject to review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedContent {
    /// Sanitized markup (HTML books) or markdown (extracted archives).
    pub content: String,
    pub plain_text: String,
    pub word_count: usize,
    /// Whole minutes.
    pub estimated_reading_time: u32,
    pub table_of_contents: Vec<TocItem>,
    pub processed_at: DateTime<Utc>,
    pub content_type: ContentType,
    /// Hash of `plain_text`; stable across re-runs of identical input.
    pub version: String,
}

impl ProcessedContent {
    /// Length of the offset-addressing domain, in characters.
    pub fn plain_len(&self) -> usize {
        self.plain_text.chars().count()
    }
}

/// Tunables for content processing.
#[derive(Debug, Clone, Copy)]
pub struct ContentOptions {
    pub words_per_minute: u32,
}

impl Default for ContentOptions {
    fn default() -> Self {
        Self {
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
        }
    }
}

/// Process an HTML fragment or document into a renderable bundle.
pub fn process_html(html: &str, opts: &ContentOptions) -> ProcessedContent {
    let sanitizer = MarkupSanitizer;
    let sanitized = sanitizer.sanitize(html);
    let table_of_contents = toc_from_markup(&sanitized);
    let content = anchor_headings(&sanitized, &table_of_contents);
    let plain_text = sanitizer.plain_text(&sanitized);
    let words = word_count(&plain_text);

    ProcessedContent {
        content,
        word_count: words,
        estimated_reading_time: reading_time(words, opts.words_per_minute),
        table_of_contents,
        processed_at: Utc::now(),
        content_type: ContentType::Html,
        version: content_version(&plain_text),
        plain_text,
    }
}

/// Process markdown content.
///
/// Markdown is treated as already clean: its plain-text projection is the
/// markdown itself after entity and stray-tag stripping, with line structure
/// preserved.
pub fn process_markdown(markdown: &str, opts: &ContentOptions) -> ProcessedContent {
    let clean = normalize_text(&strip_tags(markdown));
    let table_of_contents = toc_from_markdown(&clean);
    let words = word_count(&clean);

    ProcessedContent {
        content: clean.clone(),
        word_count: words,
        estimated_reading_time: reading_time(words, opts.words_per_minute),
        table_of_contents,
        processed_at: Utc::now(),
        content_type: ContentType::Markdown,
        version: content_version(&clean),
        plain_text: clean,
    }
}

/// Normalize line endings and collapse runs of blank lines.
pub fn normalize_text(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0;
    for line in unified.split('\n') {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run <= 1 {
                out.push('\n');
            }
        } else {
            blank_run = 0;
            out.push_str(line);
            out.push('\n');
        }
    }
    out.trim().to_string()
}

/// Set each heading's `id` attribute to its TOC slug.
fn anchor_headings(markup: &str, toc: &[TocItem]) -> String {
    let mut ids: std::collections::HashMap<usize, &str> = std::collections::HashMap::new();
    collect_positions(toc, &mut ids);

    let mut out = String::with_capacity(markup.len());
    let mut offset = 0usize;
    for chunk in chunks(markup) {
        match &chunk {
            Chunk::Tag(tag) if !tag.closing && is_heading(&tag.name) => {
                if let Some(id) = ids.get(&offset) {
                    out.push('<');
                    out.push_str(&tag.name);
                    out.push_str(" id=\"");
                    out.push_str(id);
                    out.push_str("\">");
                } else {
                    out.push_str(tag.raw);
                }
            }
            Chunk::Tag(tag) => out.push_str(tag.raw),
            Chunk::Text(text) => out.push_str(text),
            Chunk::Skip(_) => {}
        }
        offset += match &chunk {
            Chunk::Text(s) | Chunk::Skip(s) => s.chars().count(),
            Chunk::Tag(tag) => tag.raw.chars().count(),
        };
    }
    out
}

fn collect_positions<'a>(
    toc: &'a [TocItem],
    ids: &mut std::collections::HashMap<usize, &'a str>,
) {
    for item in toc {
        ids.insert(item.position, item.id.as_str());
        collect_positions(&item.children, ids);
    }
}

fn is_heading(name: &str) -> bool {
    matches!(name, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}
