//! Local-first reconciliation between a local and a remote state store.
//!
//! Mutations land in the local store immediately. Remote writes are attempted
//! with bounded retry; a failure is logged and queued, never surfaced to the
//! reader. On load the remote copy is authoritative and any queued local
//! mutations are replayed on top in timestamp order.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reader::{Bookmark, Highlight, Note, ReadingProgress};

pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Aggregate reading state for one (book, user) pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingState {
    pub progress: Option<ReadingProgress>,
    pub highlights: Vec<Highlight>,
    pub notes: Vec<Note>,
    pub bookmarks: Vec<Bookmark>,
}

impl ReadingState {
    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::Progress { progress, .. } => {
                let newer = self
                    .progress
                    .as_ref()
                    .is_none_or(|existing| progress.last_read_at >= existing.last_read_at);
                if newer {
                    self.progress = Some(progress.clone());
                }
            }
            Mutation::AddHighlight { highlight, .. } => {
                if !self.highlights.iter().any(|h| h.id == highlight.id) {
                    self.highlights.push(highlight.clone());
                }
            }
            Mutation::UpdateHighlight { highlight, .. } => {
                if let Some(existing) = self.highlights.iter_mut().find(|h| h.id == highlight.id)
                    && highlight.updated_at >= existing.updated_at
                {
                    *existing = highlight.clone();
                }
            }
            Mutation::RemoveHighlight { id, .. } => {
                self.highlights.retain(|h| h.id != *id);
            }
            Mutation::AddNote { note, .. } => {
                if !self.notes.iter().any(|n| n.id == note.id) {
                    self.notes.push(note.clone());
                }
            }
            Mutation::UpdateNote { note, .. } => {
                if let Some(existing) = self.notes.iter_mut().find(|n| n.id == note.id)
                    && note.updated_at >= existing.updated_at
                {
                    *existing = note.clone();
                }
            }
            Mutation::RemoveNote { id, .. } => {
                self.notes.retain(|n| n.id != *id);
            }
            Mutation::AddBookmark { bookmark, .. } => {
                if !self.bookmarks.iter().any(|b| b.id == bookmark.id) {
                    self.bookmarks.push(bookmark.clone());
                }
            }
            Mutation::RemoveBookmark { id, .. } => {
                self.bookmarks.retain(|b| b.id != *id);
            }
        }
    }
}

/// A single timestamped state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Progress {
        at: DateTime<Utc>,
        progress: ReadingProgress,
    },
    AddHighlight {
        at: DateTime<Utc>,
        highlight: Highlight,
    },
    UpdateHighlight {
        at: DateTime<Utc>,
        highlight: Highlight,
    },
    RemoveHighlight {
        at: DateTime<Utc>,
        id: String,
    },
    AddNote {
        at: DateTime<Utc>,
        note: Note,
    },
    UpdateNote {
        at: DateTime<Utc>,
        note: Note,
    },
    RemoveNote {
        at: DateTime<Utc>,
        id: String,
    },
    AddBookmark {
        at: DateTime<Utc>,
        bookmark: Bookmark,
    },
    RemoveBookmark {
        at: DateTime<Utc>,
        id: String,
    },
}

impl Mutation {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Mutation::Progress { at, .. }
            | Mutation::AddHighlight { at, .. }
            | Mutation::UpdateHighlight { at, .. }
            | Mutation::RemoveHighlight { at, .. }
            | Mutation::AddNote { at, .. }
            | Mutation::UpdateNote { at, .. }
            | Mutation::RemoveNote { at, .. }
            | Mutation::AddBookmark { at, .. }
            | Mutation::RemoveBookmark { at, .. } => *at,
        }
    }
}

/// Persistence for reading state, keyed by (book, user).
pub trait StateStore: Send + Sync {
    fn load(&self, book_id: &str, user_id: &str) -> Result<Option<ReadingState>>;
    fn save(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for std::sync::Arc<S> {
    fn load(&self, book_id: &str, user_id: &str) -> Result<Option<ReadingState>> {
        (**self).load(book_id, user_id)
    }

    fn save(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()> {
        (**self).save(book_id, user_id, state)
    }
}

/// In-memory state store.
#[derive(Default)]
pub struct MemoryStateStore {
    states: Mutex<HashMap<(String, String), ReadingState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, book_id: &str, user_id: &str) -> Result<Option<ReadingState>> {
        let states = self
            .states
            .lock()
            .map_err(|_| Error::PersistenceFailure("state lock poisoned".into()))?;
        Ok(states.get(&(book_id.to_string(), user_id.to_string())).cloned())
    }

    fn save(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()> {
        let mut states = self
            .states
            .lock()
            .map_err(|_| Error::PersistenceFailure("state lock poisoned".into()))?;
        states.insert((book_id.to_string(), user_id.to_string()), state.clone());
        Ok(())
    }
}

struct Pending {
    book_id: String,
    user_id: String,
    mutation: Mutation,
}

/// Reconciles a local store with a remote one.
pub struct SyncReconciler<L: StateStore, R: StateStore> {
    local: L,
    remote: R,
    retry_limit: u32,
    pending: Mutex<Vec<Pending>>,
    failures: AtomicU64,
}

impl<L: StateStore, R: StateStore> SyncReconciler<L, R> {
    pub fn new(local: L, remote: R) -> Self {
        Self::with_retry_limit(local, remote, DEFAULT_RETRY_LIMIT)
    }

    pub fn with_retry_limit(local: L, remote: R, retry_limit: u32) -> Self {
        Self {
            local,
            remote,
            retry_limit: retry_limit.max(1),
            pending: Mutex::new(Vec::new()),
            failures: AtomicU64::new(0),
        }
    }

    /// Remote write attempts that exhausted their retries.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Record a mutation: local write first, then a best-effort remote write.
    ///
    /// A local failure is an error. A remote failure is logged, counted, and
    /// the mutation queued for [`flush`](Self::flush).
    pub fn record(&self, book_id: &str, user_id: &str, mutation: Mutation) -> Result<()> {
        let mut state = self.local.load(book_id, user_id)?.unwrap_or_default();
        state.apply(&mutation);
        self.local.save(book_id, user_id, &state)?;

        if let Err(e) = self.push_remote(book_id, user_id, &state) {
            warn!("remote sync failed for book {}: {}", book_id, e);
            self.failures.fetch_add(1, Ordering::Relaxed);
            self.enqueue(Pending {
                book_id: book_id.to_string(),
                user_id: user_id.to_string(),
                mutation,
            });
        }
        Ok(())
    }

    /// Load reading state. Remote is authoritative; queued local mutations
    /// are replayed on top in timestamp order, then the merged state is
    /// written back locally.
    pub fn load(&self, book_id: &str, user_id: &str) -> Result<ReadingState> {
        let mut state = match self.remote.load(book_id, user_id) {
            Ok(Some(remote)) => remote,
            Ok(None) => self.local.load(book_id, user_id)?.unwrap_or_default(),
            Err(e) => {
                warn!(
                    "remote load failed for book {}, using local state: {}",
                    book_id, e
                );
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.local.load(book_id, user_id)?.unwrap_or_default()
            }
        };

        let mut replay: Vec<Mutation> = {
            let pending = match self.pending.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending
                .iter()
                .filter(|p| p.book_id == book_id && p.user_id == user_id)
                .map(|p| p.mutation.clone())
                .collect()
        };
        replay.sort_by_key(|m| m.timestamp());
        for mutation in &replay {
            state.apply(mutation);
        }

        self.local.save(book_id, user_id, &state)?;
        Ok(state)
    }

    /// Retry every queued mutation against the remote store.
    pub fn flush(&self) {
        let drained: Vec<Pending> = {
            let mut pending = match self.pending.lock() {
                Ok(pending) => pending,
                Err(poisoned) => poisoned.into_inner(),
            };
            std::mem::take(&mut *pending)
        };
        if drained.is_empty() {
            return;
        }
        debug!("flushing {} pending mutations", drained.len());

        for entry in drained {
            let synced = self
                .local
                .load(&entry.book_id, &entry.user_id)
                .ok()
                .flatten()
                .map(|state| self.push_remote(&entry.book_id, &entry.user_id, &state).is_ok())
                .unwrap_or(false);
            if !synced {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.enqueue(entry);
            }
        }
    }

    fn push_remote(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()> {
        let mut last = Error::SyncFailure("remote write not attempted".into());
        for attempt in 1..=self.retry_limit {
            match self.remote.save(book_id, user_id, state) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!("remote write attempt {} failed: {}", attempt, e);
                    last = e;
                }
            }
        }
        Err(Error::SyncFailure(last.to_string()))
    }

    fn enqueue(&self, entry: Pending) {
        let mut pending = match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.push(entry);
    }
}

/// Coalesces rapid writes: `offer` answers whether a write should proceed
/// now, or be skipped because one went through inside the window.
pub struct Debouncer {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_WINDOW)
    }
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn offer(&self) -> bool {
        self.offer_at(Instant::now())
    }

    pub fn offer_at(&self, now: Instant) -> bool {
        let mut last = match self.last.lock() {
            Ok(last) => last,
            Err(poisoned) => poisoned.into_inner(),
        };
        match *last {
            Some(prev) if now.duration_since(prev) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn progress_at(seconds: i64) -> ReadingProgress {
        let mut p = ReadingProgress::new("b1", "u1");
        p.last_read_at = DateTime::from_timestamp(seconds, 0).unwrap();
        p.time_spent = seconds as u64;
        p
    }

    /// Remote store that fails its first `fail_n` save calls.
    struct FlakyStore {
        inner: MemoryStateStore,
        remaining_failures: AtomicU32,
    }

    impl FlakyStore {
        fn failing(n: u32) -> Self {
            Self {
                inner: MemoryStateStore::new(),
                remaining_failures: AtomicU32::new(n),
            }
        }
    }

    impl StateStore for FlakyStore {
        fn load(&self, book_id: &str, user_id: &str) -> Result<Option<ReadingState>> {
            self.inner.load(book_id, user_id)
        }

        fn save(&self, book_id: &str, user_id: &str, state: &ReadingState) -> Result<()> {
            let remaining = self.remaining_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::SyncFailure("simulated outage".into()));
            }
            self.inner.save(book_id, user_id, state)
        }
    }

    #[test]
    fn test_record_reaches_both_stores() {
        let sync = SyncReconciler::new(MemoryStateStore::new(), MemoryStateStore::new());
        let mutation = Mutation::Progress {
            at: Utc::now(),
            progress: progress_at(10),
        };
        sync.record("b1", "u1", mutation).unwrap();

        assert!(sync.local.load("b1", "u1").unwrap().is_some());
        assert!(sync.remote.load("b1", "u1").unwrap().is_some());
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn test_remote_failure_is_not_an_error() {
        // More consecutive failures than the retry limit.
        let sync = SyncReconciler::new(MemoryStateStore::new(), FlakyStore::failing(10));
        let mutation = Mutation::Progress {
            at: Utc::now(),
            progress: progress_at(10),
        };
        sync.record("b1", "u1", mutation).unwrap();

        assert!(sync.local.load("b1", "u1").unwrap().is_some());
        assert_eq!(sync.pending_count(), 1);
        assert_eq!(sync.failure_count(), 1);
    }

    #[test]
    fn test_retry_recovers_within_limit() {
        // Two failures, three attempts allowed.
        let sync = SyncReconciler::new(MemoryStateStore::new(), FlakyStore::failing(2));
        let mutation = Mutation::Progress {
            at: Utc::now(),
            progress: progress_at(10),
        };
        sync.record("b1", "u1", mutation).unwrap();

        assert!(sync.remote.load("b1", "u1").unwrap().is_some());
        assert_eq!(sync.pending_count(), 0);
    }

    #[test]
    fn test_flush_drains_pending() {
        let sync = SyncReconciler::new(MemoryStateStore::new(), FlakyStore::failing(3));
        let mutation = Mutation::Progress {
            at: Utc::now(),
            progress: progress_at(10),
        };
        sync.record("b1", "u1", mutation).unwrap();
        assert_eq!(sync.pending_count(), 1);

        sync.flush();
        assert_eq!(sync.pending_count(), 0);
        assert!(sync.remote.load("b1", "u1").unwrap().is_some());
    }

    #[test]
    fn test_load_remote_authoritative_with_replay() {
        let remote = MemoryStateStore::new();
        let mut remote_state = ReadingState::default();
        remote_state.progress = Some(progress_at(100));
        remote.save("b1", "u1", &remote_state).unwrap();

        let sync = SyncReconciler::new(MemoryStateStore::new(), remote);
        // Queue a newer local mutation by simulating an outage.
        sync.enqueue(Pending {
            book_id: "b1".to_string(),
            user_id: "u1".to_string(),
            mutation: Mutation::Progress {
                at: DateTime::from_timestamp(200, 0).unwrap(),
                progress: progress_at(200),
            },
        });

        let state = sync.load("b1", "u1").unwrap();
        assert_eq!(state.progress.unwrap().time_spent, 200);
    }

    #[test]
    fn test_load_older_pending_loses() {
        let remote = MemoryStateStore::new();
        let mut remote_state = ReadingState::default();
        remote_state.progress = Some(progress_at(300));
        remote.save("b1", "u1", &remote_state).unwrap();

        let sync = SyncReconciler::new(MemoryStateStore::new(), remote);
        sync.enqueue(Pending {
            book_id: "b1".to_string(),
            user_id: "u1".to_string(),
            mutation: Mutation::Progress {
                at: DateTime::from_timestamp(100, 0).unwrap(),
                progress: progress_at(100),
            },
        });

        let state = sync.load("b1", "u1").unwrap();
        assert_eq!(state.progress.unwrap().time_spent, 300);
    }

    #[test]
    fn test_state_apply_highlight_lifecycle() {
        let mut state = ReadingState::default();
        let now = Utc::now();
        let mut highlight = Highlight {
            id: "h1".to_string(),
            book_id: "b1".to_string(),
            user_id: "u1".to_string(),
            start: 0,
            end: 5,
            color: crate::reader::HighlightColor::Yellow,
            text: "hello".to_string(),
            note: None,
            chapter_index: None,
            needs_review: false,
            created_at: now,
            updated_at: now,
        };

        state.apply(&Mutation::AddHighlight {
            at: now,
            highlight: highlight.clone(),
        });
        assert_eq!(state.highlights.len(), 1);

        // Duplicate add is ignored.
        state.apply(&Mutation::AddHighlight {
            at: now,
            highlight: highlight.clone(),
        });
        assert_eq!(state.highlights.len(), 1);

        highlight.color = crate::reader::HighlightColor::Blue;
        highlight.updated_at = now + chrono::Duration::seconds(1);
        state.apply(&Mutation::UpdateHighlight {
            at: highlight.updated_at,
            highlight: highlight.clone(),
        });
        assert_eq!(state.highlights[0].color, crate::reader::HighlightColor::Blue);

        state.apply(&Mutation::RemoveHighlight {
            at: Utc::now(),
            id: "h1".to_string(),
        });
        assert!(state.highlights.is_empty());
    }

    #[test]
    fn test_debouncer_window() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        assert!(debouncer.offer_at(start));
        assert!(!debouncer.offer_at(start + Duration::from_millis(50)));
        assert!(debouncer.offer_at(start + Duration::from_millis(150)));
    }
}
