//! Reading-state data model: highlights, notes, bookmarks, progress, and
//! sessions.
//!
//! All offsets address the book's plain-text projection. Records carry their
//! own timestamps so the sync layer can order mutations without extra
//! bookkeeping.

pub mod session;

pub use session::{HighlightDraft, NoteDraft, ProgressUpdate, ReaderSession, SessionState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Highlight palette.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    #[default]
    Yellow,
    Green,
    Blue,
    Pink,
    Purple,
    Orange,
}

/// A highlighted range of the plain text.
///
/// Overlapping highlights are allowed; when rendering, later creations layer
/// over earlier ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    /// Inclusive start offset, in characters of the plain text.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
    pub color: HighlightColor,
    /// The highlighted text at creation time.
    pub text: String,
    pub note: Option<String>,
    pub chapter_index: Option<usize>,
    /// Set when the stored offsets no longer fit the current content version.
    #[serde(default)]
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteCategory {
    #[default]
    General,
    Important,
    Question,
    Idea,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    pub category: NoteCategory,
    /// Deduplicated case-insensitively; the first spelling wins.
    pub tags: Vec<String>,
    /// Anchor offset into the plain text.
    pub anchor: usize,
    pub chapter_index: Option<usize>,
    #[serde(default)]
    pub needs_review: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub position: usize,
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Per-book cumulative reading progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingProgress {
    pub book_id: String,
    pub user_id: String,
    pub position: usize,
    /// Clamped to [0, 100].
    pub percentage: f32,
    /// Cumulative seconds across all sessions.
    pub time_spent: u64,
    pub words_read: u64,
    pub chapters_completed: u32,
    pub last_read_at: DateTime<Utc>,
}

impl ReadingProgress {
    pub fn new(book_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            user_id: user_id.into(),
            position: 0,
            percentage: 0.0,
            time_spent: 0,
            words_read: 0,
            chapters_completed: 0,
            last_read_at: Utc::now(),
        }
    }
}

/// One sitting with a book. Immutable once `ended_at` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSession {
    pub id: String,
    pub book_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Wall-clock seconds, set at finalization.
    pub duration_seconds: u64,
    pub words_read: u64,
    pub progress_percentage: f32,
}

impl ReadingSession {
    pub(crate) fn open(
        book_id: impl Into<String>,
        user_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            book_id: book_id.into(),
            user_id: user_id.into(),
            started_at,
            ended_at: None,
            duration_seconds: 0,
            words_read: 0,
            progress_percentage: 0.0,
        }
    }
}

pub(crate) fn new_record_id() -> String {
    Uuid::new_v4().to_string()
}

pub(crate) fn clamp_percentage(p: f32) -> f32 {
    // NaN and infinities would otherwise leak through `clamp`.
    if !p.is_finite() {
        return 0.0;
    }
    p.clamp(0.0, 100.0)
}

/// Deduplicate tags case-insensitively, keeping the first spelling.
pub(crate) fn dedup_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    tags.into_iter()
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .collect()
}
