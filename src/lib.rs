//! # lectern
//!
//! A library for ingesting packaged e-books and tracking reading state.
//!
//! ## Features
//!
//! - Extract text from zip-packaged archives (container.xml, package
//!   manifest, spine reading order)
//! - Sanitize HTML, project it to plain text, and derive a table of
//!   contents, word counts, and reading-time estimates
//! - Offset-addressed highlights, notes, and bookmarks with validation
//! - Reading sessions and cumulative progress per (book, user)
//! - Local-first sync with a remote store: bounded retries, pending
//!   queue, last-write-wins replay
//!
//! ## Quick Start
//!
//! ```no_run
//! use lectern::{Book, Ingestor, MemoryStore};
//!
//! let ingestor = Ingestor::new(MemoryStore::new());
//! let mut book = Book::new("book-1", "My Book");
//!
//! let bytes = std::fs::read("input.epub")?;
//! let outcome = ingestor.ingest_archive(&mut book, &bytes)?;
//! println!("{} words", outcome.bundle.word_count);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Reading state
//!
//! [`ReaderSession`] is the entry point for annotations and progress:
//!
//! ```no_run
//! use lectern::reader::{HighlightDraft, ProgressUpdate, ReaderSession};
//! use lectern::sync::{MemoryStateStore, SyncReconciler};
//! use lectern::MemoryStore;
//!
//! let sync = SyncReconciler::new(MemoryStateStore::new(), MemoryStateStore::new());
//! let mut session = ReaderSession::new(MemoryStore::new(), sync, "user-1");
//!
//! session.load_book("book-1")?;
//! session.add_highlight(HighlightDraft { start: 0, end: 12, ..Default::default() })?;
//! session.save_progress(ProgressUpdate { time_spent: Some(120), ..Default::default() })?;
//! let finished = session.close_book()?;
//! println!("read for {}s", finished.duration_seconds);
//! # Ok::<(), lectern::Error>(())
//! ```

pub mod book;
pub mod content;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod reader;
pub mod store;
pub mod sync;

pub use book::{Book, ContentType};
pub use content::{ProcessedContent, TocItem};
pub use error::{Error, Result};
pub use extract::{Extraction, extract_text};
pub use ingest::{IngestOutcome, Ingestor};
pub use reader::{Highlight, Note, ReaderSession, ReadingProgress, ReadingSession};
pub use store::{ContentStore, MemoryStore};
pub use sync::{StateStore, SyncReconciler};
