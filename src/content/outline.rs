//! Reading statistics and structural outline detection.

use log::debug;

use crate::content::toc::{Heading, TocItem, build_forest, toc_from_markup};

/// Default reading speed used for time estimates.
pub const DEFAULT_WORDS_PER_MINUTE: u32 = 200;

/// Synthetic spacing between outline entries detected by line scanning.
const LINE_POSITION_SPACING: usize = 100;

/// Count whitespace-delimited words, treating punctuation other than
/// underscores as separators.
pub fn word_count(text: &str) -> usize {
    text.chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .count()
}

/// Estimated reading time in whole minutes at `words_per_minute`.
///
/// Zero words estimate to zero minutes.
pub fn reading_time(words: usize, words_per_minute: u32) -> u32 {
    let wpm = words_per_minute.max(1) as usize;
    words.div_ceil(wpm) as u32
}

/// Strategy for deriving a structural outline from content.
///
/// The default [`KeywordDetector`] is a best-effort heuristic; callers with
/// richer structure (heading elements, navigation documents) can supply a
/// stricter implementation without changing the pipeline.
pub trait StructureDetector {
    fn detect(&self, content: &str) -> Vec<TocItem>;
}

/// Line-scanning heuristic: any line mentioning "chapter", "part", or
/// "section" (case-insensitive) becomes a level-1 outline entry with a
/// synthetic position of line index x 100.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordDetector;

impl StructureDetector for KeywordDetector {
    fn detect(&self, content: &str) -> Vec<TocItem> {
        let mut headings = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let line = line.trim();
            let lower = line.to_lowercase();
            if lower.contains("chapter") || lower.contains("part") || lower.contains("section") {
                headings.push(Heading {
                    title: line.to_string(),
                    level: 1,
                    position: i * LINE_POSITION_SPACING,
                });
            }
        }
        debug!("keyword outline: {} entries", headings.len());
        build_forest(headings)
    }
}

/// Outline from heading elements in sanitized markup.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadingDetector;

impl StructureDetector for HeadingDetector {
    fn detect(&self, content: &str) -> Vec<TocItem> {
        toc_from_markup(content)
    }
}

/// Promote chapter/part/section lines in extracted text to markdown headings
/// and normalize paragraph breaks.
pub fn text_to_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.lines() {
        let trimmed = line.trim();
        let lower = trimmed.to_lowercase();
        let prefix = if starts_with_keyword_number(&lower, "chapter") {
            "# "
        } else if starts_with_keyword_number(&lower, "part") {
            "## "
        } else if starts_with_keyword_number(&lower, "section") {
            "### "
        } else {
            ""
        };
        out.push_str(prefix);
        out.push_str(trimmed);
        out.push('\n');
    }

    // Collapse runs of blank lines into a single paragraph break.
    let mut normalized = String::with_capacity(out.len());
    let mut blank_run = 0;
    for line in out.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run == 1 {
                normalized.push('\n');
            }
        } else {
            blank_run = 0;
            normalized.push_str(line);
            normalized.push('\n');
        }
    }
    normalized.trim().to_string()
}

fn starts_with_keyword_number(line: &str, keyword: &str) -> bool {
    line.strip_prefix(keyword)
        .and_then(|rest| rest.strip_prefix(' '))
        .is_some_and(|rest| rest.chars().next().is_some_and(|c| c.is_ascii_digit()))
}
