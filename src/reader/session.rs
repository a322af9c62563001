//! Reader session lifecycle and annotation operations.
//!
//! A [`ReaderSession`] serves one user and at most one open book at a time,
//! moving through Idle -> Loading -> Active -> Finalizing -> Idle. Every
//! annotation operation requires an active book and validates its offsets
//! against the book's plain-text length before anything is stored.

use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;

use crate::book::ContentType;
use crate::content::{MarkupSanitizer, ProcessedContent, Sanitizer};
use crate::error::{Error, Result};
use crate::reader::{
    Bookmark, Highlight, HighlightColor, Note, NoteCategory, ReadingProgress, ReadingSession,
    clamp_percentage, dedup_tags, new_record_id,
};
use crate::store::ContentStore;
use crate::sync::{Debouncer, Mutation, ReadingState, StateStore, SyncReconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Active,
    Finalizing,
}

/// Partial progress update.
///
/// `time_spent` is a delta in seconds and accumulates into the stored total;
/// every other field replaces the stored value when present.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressUpdate {
    pub position: Option<usize>,
    pub percentage: Option<f32>,
    pub time_spent: Option<u64>,
    pub words_read: Option<u64>,
    pub chapters_completed: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct HighlightDraft {
    pub start: usize,
    pub end: usize,
    pub color: HighlightColor,
    pub note: Option<String>,
    pub chapter_index: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct NoteDraft {
    pub title: String,
    pub body: String,
    pub category: NoteCategory,
    pub tags: Vec<String>,
    pub anchor: usize,
    pub chapter_index: Option<usize>,
}

struct OpenBook {
    book_id: String,
    bundle: ProcessedContent,
    plain_len: usize,
    reading: ReadingState,
    session: ReadingSession,
}

/// Reading service for one user.
pub struct ReaderSession<C: ContentStore, L: StateStore, R: StateStore> {
    content: C,
    sync: SyncReconciler<L, R>,
    user_id: String,
    state: SessionState,
    open: Option<OpenBook>,
    progress_debounce: Debouncer,
}

impl<C: ContentStore, L: StateStore, R: StateStore> ReaderSession<C, L, R> {
    pub fn new(content: C, sync: SyncReconciler<L, R>, user_id: impl Into<String>) -> Self {
        Self {
            content,
            sync,
            user_id: user_id.into(),
            state: SessionState::Idle,
            open: None,
            progress_debounce: Debouncer::default(),
        }
    }

    /// Override the coalescing window for progress dispatch. A zero window
    /// dispatches every save.
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.progress_debounce = Debouncer::new(window);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn open_book_id(&self) -> Option<&str> {
        self.open.as_ref().map(|b| b.book_id.as_str())
    }

    pub fn sync(&self) -> &SyncReconciler<L, R> {
        &self.sync
    }

    /// Open a book: fetch its bundle and prior reading state, flag stale
    /// annotation offsets, and start a fresh session.
    pub fn load_book(&mut self, book_id: &str) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "cannot load a book while {:?}",
                self.state
            )));
        }
        self.state = SessionState::Loading;

        match self.load_book_inner(book_id) {
            Ok(open) => {
                debug!("book {} active, {} chars", book_id, open.plain_len);
                self.open = Some(open);
                self.state = SessionState::Active;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// The open book's processed bundle, when one is active.
    pub fn bundle(&self) -> Option<&ProcessedContent> {
        self.open.as_ref().map(|b| &b.bundle)
    }

    fn load_book_inner(&self, book_id: &str) -> Result<OpenBook> {
        let bundle = self
            .content
            .get(book_id)?
            .ok_or_else(|| Error::BookNotFound(book_id.to_string()))?;
        let plain_len = bundle.plain_len();

        let mut reading = self.sync.load(book_id, &self.user_id)?;
        // Annotations whose offsets no longer fit are kept but flagged.
        for highlight in &mut reading.highlights {
            if highlight.end > plain_len || highlight.start >= highlight.end {
                highlight.needs_review = true;
            }
        }
        for note in &mut reading.notes {
            if note.anchor > plain_len {
                note.needs_review = true;
            }
        }

        Ok(OpenBook {
            book_id: book_id.to_string(),
            session: ReadingSession::open(book_id, &self.user_id, Utc::now()),
            plain_len,
            bundle,
            reading,
        })
    }

    /// Merge a partial update into the book's progress and record it.
    ///
    /// The in-memory progress reflects every call, but dispatch to the
    /// reconciler is coalesced: inside the debounce window only the first
    /// save is recorded, and [`close_book`](Self::close_book) records the
    /// final state unconditionally.
    pub fn save_progress(&mut self, update: ProgressUpdate) -> Result<()> {
        self.save_progress_at(update, Utc::now())
    }

    pub fn save_progress_at(&mut self, update: ProgressUpdate, now: DateTime<Utc>) -> Result<()> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        let mut progress = open
            .reading
            .progress
            .clone()
            .unwrap_or_else(|| ReadingProgress::new(open.book_id.clone(), user_id.clone()));

        if let Some(delta) = update.time_spent {
            progress.time_spent += delta;
        }
        if let Some(position) = update.position {
            progress.position = position;
        }
        if let Some(percentage) = update.percentage {
            progress.percentage = clamp_percentage(percentage);
        }
        if let Some(words) = update.words_read {
            if words > progress.words_read {
                open.session.words_read += words - progress.words_read;
            }
            progress.words_read = words;
        }
        if let Some(chapters) = update.chapters_completed {
            progress.chapters_completed = chapters;
        }
        progress.last_read_at = now;
        open.session.progress_percentage = progress.percentage;

        open.reading.progress = Some(progress.clone());
        let book_id = open.book_id.clone();
        if !self.progress_debounce.offer() {
            return Ok(());
        }
        self.sync
            .record(&book_id, &user_id, Mutation::Progress { at: now, progress })
    }

    /// Finalize the open book: freeze the session, persist final progress,
    /// flush pending sync work, and return to Idle.
    pub fn close_book(&mut self) -> Result<ReadingSession> {
        self.close_book_at(Utc::now())
    }

    pub fn close_book_at(&mut self, now: DateTime<Utc>) -> Result<ReadingSession> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState(format!(
                "cannot close a book while {:?}",
                self.state
            )));
        }
        self.state = SessionState::Finalizing;

        // The open book is always present in Active state.
        let mut open = match self.open.take() {
            Some(open) => open,
            None => {
                self.state = SessionState::Idle;
                return Err(Error::InvalidState("no open book".into()));
            }
        };

        open.session.ended_at = Some(now);
        open.session.duration_seconds =
            (now - open.session.started_at).num_seconds().max(0) as u64;

        if let Some(mut progress) = open.reading.progress.clone() {
            progress.last_read_at = now;
            self.sync.record(
                &open.book_id,
                &self.user_id,
                Mutation::Progress { at: now, progress },
            )?;
        }
        self.sync.flush();

        self.state = SessionState::Idle;
        Ok(open.session)
    }

    /// Create a highlight over [start, end) of the plain text.
    pub fn add_highlight(&mut self, draft: HighlightDraft) -> Result<Highlight> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        if draft.start >= draft.end || draft.end > open.plain_len {
            return Err(Error::InvalidRange {
                start: draft.start,
                end: draft.end,
                len: open.plain_len,
            });
        }

        let now = Utc::now();
        let text: String = open
            .bundle
            .plain_text
            .chars()
            .skip(draft.start)
            .take(draft.end - draft.start)
            .collect();
        let highlight = Highlight {
            id: new_record_id(),
            book_id: open.book_id.clone(),
            user_id: user_id.clone(),
            start: draft.start,
            end: draft.end,
            color: draft.color,
            text,
            note: draft.note,
            chapter_index: draft.chapter_index,
            needs_review: false,
            created_at: now,
            updated_at: now,
        };

        open.reading.highlights.push(highlight.clone());
        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::AddHighlight {
                at: now,
                highlight: highlight.clone(),
            },
        )?;
        Ok(highlight)
    }

    /// Change a highlight's color and/or note. Returns the updated record,
    /// or `None` when the id is unknown.
    pub fn update_highlight(
        &mut self,
        id: &str,
        color: Option<HighlightColor>,
        note: Option<String>,
    ) -> Result<Option<Highlight>> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;
        let now = Utc::now();

        let Some(highlight) = open.reading.highlights.iter_mut().find(|h| h.id == id) else {
            return Ok(None);
        };
        if let Some(color) = color {
            highlight.color = color;
        }
        if let Some(note) = note {
            highlight.note = Some(note);
        }
        highlight.updated_at = now;
        let updated = highlight.clone();

        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::UpdateHighlight {
                at: now,
                highlight: updated.clone(),
            },
        )?;
        Ok(Some(updated))
    }

    /// Remove a highlight. Returns whether a record was removed.
    pub fn remove_highlight(&mut self, id: &str) -> Result<bool> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        let before = open.reading.highlights.len();
        open.reading.highlights.retain(|h| h.id != id);
        if open.reading.highlights.len() == before {
            return Ok(false);
        }

        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::RemoveHighlight {
                at: Utc::now(),
                id: id.to_string(),
            },
        )?;
        Ok(true)
    }

    /// Create a note anchored at an offset of the plain text.
    pub fn add_note(&mut self, draft: NoteDraft) -> Result<Note> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        if draft.anchor > open.plain_len {
            return Err(Error::InvalidRange {
                start: draft.anchor,
                end: draft.anchor,
                len: open.plain_len,
            });
        }

        let now = Utc::now();
        let note = Note {
            id: new_record_id(),
            book_id: open.book_id.clone(),
            user_id: user_id.clone(),
            title: draft.title,
            body: draft.body,
            category: draft.category,
            tags: dedup_tags(draft.tags),
            anchor: draft.anchor,
            chapter_index: draft.chapter_index,
            needs_review: false,
            created_at: now,
            updated_at: now,
        };

        open.reading.notes.push(note.clone());
        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::AddNote {
                at: now,
                note: note.clone(),
            },
        )?;
        Ok(note)
    }

    /// Replace a note's title and body. Returns the updated record, or
    /// `None` when the id is unknown.
    pub fn update_note(
        &mut self,
        id: &str,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Option<Note>> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;
        let now = Utc::now();

        let Some(note) = open.reading.notes.iter_mut().find(|n| n.id == id) else {
            return Ok(None);
        };
        note.title = title.into();
        note.body = body.into();
        note.updated_at = now;
        let updated = note.clone();

        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::UpdateNote {
                at: now,
                note: updated.clone(),
            },
        )?;
        Ok(Some(updated))
    }

    pub fn remove_note(&mut self, id: &str) -> Result<bool> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        let before = open.reading.notes.len();
        open.reading.notes.retain(|n| n.id != id);
        if open.reading.notes.len() == before {
            return Ok(false);
        }

        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::RemoveNote {
                at: Utc::now(),
                id: id.to_string(),
            },
        )?;
        Ok(true)
    }

    pub fn add_bookmark(&mut self, position: usize, label: Option<String>) -> Result<Bookmark> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        if position > open.plain_len {
            return Err(Error::InvalidRange {
                start: position,
                end: position,
                len: open.plain_len,
            });
        }

        let now = Utc::now();
        let bookmark = Bookmark {
            id: new_record_id(),
            book_id: open.book_id.clone(),
            user_id: user_id.clone(),
            position,
            label,
            created_at: now,
        };

        open.reading.bookmarks.push(bookmark.clone());
        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::AddBookmark {
                at: now,
                bookmark: bookmark.clone(),
            },
        )?;
        Ok(bookmark)
    }

    pub fn remove_bookmark(&mut self, id: &str) -> Result<bool> {
        let user_id = self.user_id.clone();
        let open = self.active_book()?;

        let before = open.reading.bookmarks.len();
        open.reading.bookmarks.retain(|b| b.id != id);
        if open.reading.bookmarks.len() == before {
            return Ok(false);
        }

        let book_id = open.book_id.clone();
        self.sync.record(
            &book_id,
            &user_id,
            Mutation::RemoveBookmark {
                at: Utc::now(),
                id: id.to_string(),
            },
        )?;
        Ok(true)
    }

    /// Highlights of the open book, start-offset ascending. Creation order is
    /// preserved among equal starts, so later highlights layer over earlier
    /// ones when rendered.
    pub fn highlights_for_book(&self) -> Result<Vec<Highlight>> {
        let open = self.active_book_ref()?;
        let mut highlights = open.reading.highlights.clone();
        highlights.sort_by_key(|h| h.start);
        Ok(highlights)
    }

    pub fn notes_for_book(&self) -> Result<Vec<Note>> {
        Ok(self.active_book_ref()?.reading.notes.clone())
    }

    pub fn bookmarks_for_book(&self) -> Result<Vec<Bookmark>> {
        Ok(self.active_book_ref()?.reading.bookmarks.clone())
    }

    pub fn progress_for_book(&self) -> Result<Option<ReadingProgress>> {
        Ok(self.active_book_ref()?.reading.progress.clone())
    }

    pub fn current_session(&self) -> Option<&ReadingSession> {
        self.open.as_ref().map(|b| &b.session)
    }

    /// Render one highlight into the book's content by wrapping its range
    /// with the given markers.
    pub fn render_highlight(&self, id: &str, open_marker: &str, close_marker: &str) -> Result<String> {
        let open = self.active_book_ref()?;
        let highlight = open
            .reading
            .highlights
            .iter()
            .find(|h| h.id == id)
            .ok_or_else(|| Error::InvalidState(format!("unknown highlight {}", id)))?;

        match open.bundle.content_type {
            ContentType::Html => MarkupSanitizer.wrap_range(
                &open.bundle.content,
                highlight.start,
                highlight.end,
                open_marker,
                close_marker,
            ),
            // Markdown is its own plain-text projection, so the markers can
            // be spliced at the char offsets directly.
            ContentType::Markdown => {
                let chars: Vec<char> = open.bundle.content.chars().collect();
                if highlight.end > chars.len() {
                    return Err(Error::InvalidRange {
                        start: highlight.start,
                        end: highlight.end,
                        len: chars.len(),
                    });
                }
                let mut out = String::new();
                out.extend(&chars[..highlight.start]);
                out.push_str(open_marker);
                out.extend(&chars[highlight.start..highlight.end]);
                out.push_str(close_marker);
                out.extend(&chars[highlight.end..]);
                Ok(out)
            }
        }
    }

    fn active_book(&mut self) -> Result<&mut OpenBook> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState(format!(
                "no active book ({:?})",
                self.state
            )));
        }
        self.open
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no open book".into()))
    }

    fn active_book_ref(&self) -> Result<&OpenBook> {
        if self.state != SessionState::Active {
            return Err(Error::InvalidState(format!(
                "no active book ({:?})",
                self.state
            )));
        }
        self.open
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no open book".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::content::{ContentOptions, process_html};
    use crate::store::MemoryStore;
    use crate::sync::MemoryStateStore;

    type TestSession = ReaderSession<MemoryStore, MemoryStateStore, MemoryStateStore>;

    /// State store that counts its writes.
    struct CountingStore {
        inner: MemoryStateStore,
        saves: AtomicU32,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStateStore::new(),
                saves: AtomicU32::new(0),
            }
        }
    }

    impl StateStore for CountingStore {
        fn load(&self, book_id: &str, user_id: &str) -> Result<Option<ReadingState>> {
            self.inner.load(book_id, user_id)
        }

        fn save(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(book_id, user_id, state)
        }
    }

    fn session_with(book_id: &str, html: &str) -> TestSession {
        let store = MemoryStore::new();
        let bundle = process_html(html, &ContentOptions::default());
        store.put(book_id, &bundle).unwrap();
        ReaderSession::new(
            store,
            SyncReconciler::new(MemoryStateStore::new(), MemoryStateStore::new()),
            "u1",
        )
    }

    #[test]
    fn test_load_unknown_book_returns_to_idle() {
        let mut session = session_with("b1", "<p>text</p>");
        let err = session.load_book("missing").unwrap_err();
        assert!(matches!(err, Error::BookNotFound(_)));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_load_twice_is_invalid() {
        let mut session = session_with("b1", "<p>text</p>");
        session.load_book("b1").unwrap();
        assert!(matches!(
            session.load_book("b1"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_operations_require_active_book() {
        let mut session = session_with("b1", "<p>text</p>");
        assert!(matches!(
            session.save_progress(ProgressUpdate::default()),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(session.close_book(), Err(Error::InvalidState(_))));
        assert!(matches!(
            session.highlights_for_book(),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_highlight_range_matrix() {
        // 1000 chars of plain text.
        let body: String = "a".repeat(1000);
        let mut session = session_with("b1", &format!("<p>{}</p>", body));
        session.load_book("b1").unwrap();

        let range = |start, end| HighlightDraft {
            start,
            end,
            ..Default::default()
        };

        assert!(session.add_highlight(range(0, 1000)).is_ok());
        assert!(session.add_highlight(range(0, 1)).is_ok());
        // Empty, inverted, and out-of-bounds ranges are rejected.
        assert!(matches!(
            session.add_highlight(range(5, 5)),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            session.add_highlight(range(10, 3)),
            Err(Error::InvalidRange { .. })
        ));
        assert!(matches!(
            session.add_highlight(range(0, 1001)),
            Err(Error::InvalidRange {
                end: 1001,
                len: 1000,
                ..
            })
        ));
        // Rejected records are not stored.
        assert_eq!(session.highlights_for_book().unwrap().len(), 2);
    }

    #[test]
    fn test_highlight_snippet_and_order() {
        let mut session = session_with("b1", "<p>The quick brown fox</p>");
        session.load_book("b1").unwrap();

        let later = session
            .add_highlight(HighlightDraft {
                start: 10,
                end: 15,
                ..Default::default()
            })
            .unwrap();
        let earlier = session
            .add_highlight(HighlightDraft {
                start: 4,
                end: 9,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(later.text, "brown");
        assert_eq!(earlier.text, "quick");

        let ordered = session.highlights_for_book().unwrap();
        assert_eq!(ordered[0].id, earlier.id);
        assert_eq!(ordered[1].id, later.id);
    }

    #[test]
    fn test_highlight_update_and_remove() {
        let mut session = session_with("b1", "<p>hello world</p>");
        session.load_book("b1").unwrap();
        let h = session
            .add_highlight(HighlightDraft {
                start: 0,
                end: 5,
                ..Default::default()
            })
            .unwrap();

        let updated = session
            .update_highlight(&h.id, Some(HighlightColor::Green), Some("nice".into()))
            .unwrap()
            .unwrap();
        assert_eq!(updated.color, HighlightColor::Green);
        assert_eq!(updated.note.as_deref(), Some("nice"));

        assert!(session.remove_highlight(&h.id).unwrap());
        assert!(!session.remove_highlight(&h.id).unwrap());
        assert!(session.highlights_for_book().unwrap().is_empty());
    }

    #[test]
    fn test_note_tags_deduplicated() {
        let mut session = session_with("b1", "<p>hello world</p>");
        session.load_book("b1").unwrap();

        let note = session
            .add_note(NoteDraft {
                title: "t".into(),
                body: "b".into(),
                tags: vec!["Alpha".into(), "alpha".into(), "beta".into()],
                anchor: 3,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(note.tags, vec!["Alpha", "beta"]);
    }

    #[test]
    fn test_note_anchor_bounds() {
        let mut session = session_with("b1", "<p>hello</p>");
        session.load_book("b1").unwrap();

        // Anchor may sit at the very end of the text.
        assert!(session
            .add_note(NoteDraft {
                anchor: 5,
                ..Default::default()
            })
            .is_ok());
        assert!(matches!(
            session.add_note(NoteDraft {
                anchor: 6,
                ..Default::default()
            }),
            Err(Error::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_time_spent_accumulates_others_replace() {
        let mut session = session_with("b1", "<p>hello world</p>");
        session.load_book("b1").unwrap();

        session
            .save_progress(ProgressUpdate {
                time_spent: Some(120),
                percentage: Some(40.0),
                position: Some(100),
                ..Default::default()
            })
            .unwrap();
        session
            .save_progress(ProgressUpdate {
                time_spent: Some(90),
                percentage: Some(55.0),
                ..Default::default()
            })
            .unwrap();

        let progress = session.progress_for_book().unwrap().unwrap();
        assert_eq!(progress.time_spent, 210);
        assert_eq!(progress.percentage, 55.0);
        assert_eq!(progress.position, 100);
    }

    #[test]
    fn test_percentage_clamped() {
        let mut session = session_with("b1", "<p>hello</p>");
        session.load_book("b1").unwrap();

        session
            .save_progress(ProgressUpdate {
                percentage: Some(150.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            session.progress_for_book().unwrap().unwrap().percentage,
            100.0
        );

        session
            .save_progress(ProgressUpdate {
                percentage: Some(-3.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            session.progress_for_book().unwrap().unwrap().percentage,
            0.0
        );

        session
            .save_progress(ProgressUpdate {
                percentage: Some(f32::NAN),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            session.progress_for_book().unwrap().unwrap().percentage,
            0.0
        );
    }

    #[test]
    fn test_rapid_saves_coalesce_remote_dispatch() {
        let store = MemoryStore::new();
        store
            .put("b1", &process_html("<p>hello world</p>", &ContentOptions::default()))
            .unwrap();
        let remote = Arc::new(CountingStore::new());
        let mut session = ReaderSession::new(
            store,
            SyncReconciler::new(MemoryStateStore::new(), remote.clone()),
            "u1",
        );
        session.load_book("b1").unwrap();

        // A burst of saves well inside the 100ms window.
        for i in 0..50u64 {
            session
                .save_progress(ProgressUpdate {
                    time_spent: Some(1),
                    percentage: Some(i as f32),
                    ..Default::default()
                })
                .unwrap();
        }
        assert_eq!(remote.saves.load(Ordering::SeqCst), 1);

        // Coalesced updates are not lost: the in-memory progress saw all 50.
        let progress = session.progress_for_book().unwrap().unwrap();
        assert_eq!(progress.time_spent, 50);
        assert_eq!(progress.percentage, 49.0);

        // Closing dispatches the final state.
        session.close_book().unwrap();
        let synced = remote.inner.load("b1", "u1").unwrap().unwrap();
        assert_eq!(synced.progress.unwrap().time_spent, 50);
    }

    #[test]
    fn test_zero_window_dispatches_every_save() {
        let store = MemoryStore::new();
        store
            .put("b1", &process_html("<p>hello world</p>", &ContentOptions::default()))
            .unwrap();
        let remote = Arc::new(CountingStore::new());
        let mut session = ReaderSession::new(
            store,
            SyncReconciler::new(MemoryStateStore::new(), remote.clone()),
            "u1",
        )
        .with_debounce_window(Duration::ZERO);
        session.load_book("b1").unwrap();

        for _ in 0..5 {
            session
                .save_progress(ProgressUpdate {
                    time_spent: Some(1),
                    ..Default::default()
                })
                .unwrap();
        }
        assert_eq!(remote.saves.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_close_finalizes_session() {
        let mut session = session_with("b1", "<p>hello</p>");
        session.load_book("b1").unwrap();
        session
            .save_progress(ProgressUpdate {
                percentage: Some(30.0),
                ..Default::default()
            })
            .unwrap();

        let started = session.current_session().unwrap().started_at;
        let closed = session
            .close_book_at(started + chrono::Duration::seconds(75))
            .unwrap();

        assert_eq!(closed.duration_seconds, 75);
        assert_eq!(closed.progress_percentage, 30.0);
        assert!(closed.ended_at.is_some());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.open_book_id().is_none());
    }

    #[test]
    fn test_progress_survives_reload() {
        let mut session = session_with("b1", "<p>hello world</p>");
        session.load_book("b1").unwrap();
        session
            .save_progress(ProgressUpdate {
                time_spent: Some(60),
                percentage: Some(10.0),
                ..Default::default()
            })
            .unwrap();
        session.close_book().unwrap();

        session.load_book("b1").unwrap();
        let progress = session.progress_for_book().unwrap().unwrap();
        assert_eq!(progress.time_spent, 60);
        assert_eq!(progress.percentage, 10.0);
    }

    #[test]
    fn test_stale_offsets_flagged_on_reload() {
        let store = MemoryStore::new();
        let long = process_html("<p>a long stretch of text</p>", &ContentOptions::default());
        store.put("b1", &long).unwrap();
        let mut session: TestSession = ReaderSession::new(
            store,
            SyncReconciler::new(MemoryStateStore::new(), MemoryStateStore::new()),
            "u1",
        );

        session.load_book("b1").unwrap();
        let h = session
            .add_highlight(HighlightDraft {
                start: 10,
                end: 20,
                ..Default::default()
            })
            .unwrap();
        session.close_book().unwrap();

        // Re-ingestion shrank the book.
        let short = process_html("<p>short</p>", &ContentOptions::default());
        session.content.put("b1", &short).unwrap();

        session.load_book("b1").unwrap();
        let highlights = session.highlights_for_book().unwrap();
        assert_eq!(highlights.len(), 1);
        assert_eq!(highlights[0].id, h.id);
        assert!(highlights[0].needs_review);
    }

    #[test]
    fn test_render_highlight() {
        let mut session = session_with("b1", "<p>hello world</p>");
        session.load_book("b1").unwrap();
        let h = session
            .add_highlight(HighlightDraft {
                start: 6,
                end: 11,
                ..Default::default()
            })
            .unwrap();

        let rendered = session.render_highlight(&h.id, "<mark>", "</mark>").unwrap();
        assert!(rendered.contains("<mark>world</mark>"));
    }
}
