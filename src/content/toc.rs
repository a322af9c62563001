//! Table-of-contents construction from heading elements.
//!
//! Headings are collected in document order, given collision-tolerant slug
//! ids, and nested with a stack: a heading closes every open heading of
//! lower-or-equal depth. The result is a valid forest even for irregular
//! sequences (an `<h3>` before any `<h1>` becomes a root).

use serde::{Deserialize, Serialize};

use crate::content::sanitize::{Chunk, MarkupSanitizer, Sanitizer, chunks};

/// A node in the table-of-contents forest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocItem {
    /// Slug derived from the heading text, disambiguated on collision.
    pub id: String,
    pub title: String,
    /// Heading level, 1-6.
    pub level: u8,
    /// Character offset of the heading within the sanitized markup.
    pub position: usize,
    #[serde(default)]
    pub children: Vec<TocItem>,
}

pub(crate) struct Heading {
    pub title: String,
    pub level: u8,
    pub position: usize,
}

/// Scan sanitized markup for `<h1>`-`<h6>` elements and build the TOC forest.
pub fn toc_from_markup(markup: &str) -> Vec<TocItem> {
    let sanitizer = MarkupSanitizer;
    let mut headings = Vec::new();
    let mut offset = 0usize;

    let mut open: Option<(u8, usize, String)> = None;
    for chunk in chunks(markup) {
        match &chunk {
            Chunk::Tag(tag) => {
                if let Some(level) = heading_level(&tag.name) {
                    if tag.closing {
                        if let Some((open_level, position, inner)) = open.take() {
                            if open_level == level {
                                headings.push(Heading {
                                    title: sanitizer.plain_text(&inner),
                                    level,
                                    position,
                                });
                            }
                        }
                    } else if !tag.self_closing {
                        open = Some((level, offset, String::new()));
                    }
                } else if let Some((_, _, inner)) = open.as_mut() {
                    inner.push_str(tag.raw);
                }
            }
            Chunk::Text(text) => {
                if let Some((_, _, inner)) = open.as_mut() {
                    inner.push_str(text);
                }
            }
            Chunk::Skip(_) => {}
        }
        offset += chunk_len(&chunk);
    }

    build_forest(headings)
}

/// Build the TOC forest from markdown ATX headings (`# Title` .. `###### Title`).
///
/// Markdown is its own plain-text projection, so positions are character
/// offsets of each heading line within the source.
pub fn toc_from_markdown(markdown: &str) -> Vec<TocItem> {
    let mut headings = Vec::new();
    let mut offset = 0usize;
    for line in markdown.split('\n') {
        let trimmed = line.trim_start();
        let hashes = trimmed.chars().take_while(|&c| c == '#').count();
        if (1..=6).contains(&hashes) {
            let rest = &trimmed[hashes..];
            if rest.starts_with(' ') || rest.starts_with('\t') {
                let title = rest.trim().trim_end_matches('#').trim_end();
                if !title.is_empty() {
                    headings.push(Heading {
                        title: title.to_string(),
                        level: hashes as u8,
                        position: offset,
                    });
                }
            }
        }
        offset += line.chars().count() + 1;
    }
    build_forest(headings)
}

/// Assign slug ids and nest headings into a forest with stack discipline.
pub(crate) fn build_forest(headings: Vec<Heading>) -> Vec<TocItem> {
    let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    let mut roots: Vec<TocItem> = Vec::new();
    // Index path from roots to the currently open item at each depth.
    let mut stack: Vec<(u8, Vec<usize>)> = Vec::new();

    for heading in headings {
        let base = {
            let slug = slugify(&heading.title);
            if slug.is_empty() { "section".to_string() } else { slug }
        };
        let n = seen.entry(base.clone()).or_insert(0);
        *n += 1;
        let id = if *n == 1 {
            base
        } else {
            format!("{}-{}", base, n)
        };

        let item = TocItem {
            id,
            title: heading.title,
            level: heading.level,
            position: heading.position,
            children: Vec::new(),
        };

        while stack
            .last()
            .is_some_and(|(level, _)| *level >= heading.level)
        {
            stack.pop();
        }

        let path = match stack.last() {
            None => {
                roots.push(item);
                vec![roots.len() - 1]
            }
            Some((_, parent_path)) => {
                let parent = resolve_mut(&mut roots, parent_path);
                parent.children.push(item);
                let mut path = parent_path.clone();
                path.push(parent.children.len() - 1);
                path
            }
        };
        stack.push((heading.level, path));
    }

    roots
}

fn resolve_mut<'a>(roots: &'a mut [TocItem], path: &[usize]) -> &'a mut TocItem {
    let mut item = &mut roots[path[0]];
    for &i in &path[1..] {
        item = &mut item.children[i];
    }
    item
}

fn heading_level(name: &str) -> Option<u8> {
    match name {
        "h1" => Some(1),
        "h2" => Some(2),
        "h3" => Some(3),
        "h4" => Some(4),
        "h5" => Some(5),
        "h6" => Some(6),
        _ => None,
    }
}

fn chunk_len(chunk: &Chunk<'_>) -> usize {
    match chunk {
        Chunk::Text(s) | Chunk::Skip(s) => s.chars().count(),
        Chunk::Tag(tag) => tag.raw.chars().count(),
    }
}

/// Generate a slug from heading text.
///
/// Lowercases, replaces whitespace and separators with hyphens, drops other
/// punctuation, and collapses consecutive hyphens.
///
/// # Examples
///
/// ```
/// use lectern::content::slugify;
///
/// assert_eq!(slugify("Chapter One"), "chapter-one");
/// assert_eq!(slugify("Hello, World!"), "hello-world");
/// assert_eq!(slugify("  Multiple   Spaces  "), "multiple-spaces");
/// ```
pub fn slugify(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c.is_whitespace() || c == '-' || c == '_' {
                '-'
            } else {
                // Skip other characters
                '\0'
            }
        })
        .filter(|&c| c != '\0')
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
