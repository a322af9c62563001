use serde::{Deserialize, Serialize};

/// Source format of a book's content.
///
/// Markdown content is treated as already-clean text; HTML content goes
/// through full sanitization and tag stripping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Markdown,
    #[default]
    Html,
}

/// A book known to the ingestion pipeline.
///
/// The `version` field holds a hash of the last successful extraction's plain
/// text. It changes only when re-ingestion produces different content, which
/// is the signal that stored annotation offsets need review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    pub id: String,
    pub title: String,
    pub author: String,
    pub content_type: ContentType,
    pub version: Option<String>,
}

impl Book {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_content_type(mut self, content_type: ContentType) -> Self {
        self.content_type = content_type;
        self
    }
}

/// Hash a plain-text projection into a stable content version tag.
pub fn content_version(plain_text: &str) -> String {
    let mut sha = sha1_smol::Sha1::new();
    sha.update(plain_text.as_bytes());
    sha.digest().to_string()
}
