//! Ingestion pipeline.
//!
//! Runs extraction and normalization for a book and writes the resulting
//! bundle to the content store. Runs for the same book id are serialized
//! through a per-book lock; distinct ids share no mutable state and proceed
//! in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::book::Book;
use crate::content::{ContentOptions, ProcessedContent, process_html, process_markdown, text_to_markdown};
use crate::error::{Error, Result};
use crate::extract::extract_text;
use crate::store::ContentStore;

/// Result of an ingestion run.
///
/// The bundle is returned even when the store write failed, so a caller can
/// retry persistence without re-parsing the archive.
#[derive(Debug)]
pub struct IngestOutcome {
    pub bundle: ProcessedContent,
    pub store_error: Option<Error>,
}

pub struct Ingestor<S: ContentStore> {
    store: S,
    options: ContentOptions,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: ContentStore> Ingestor<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, ContentOptions::default())
    }

    pub fn with_options(store: S, options: ContentOptions) -> Self {
        Self {
            store,
            options,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Ingest a packaged archive: extract text, promote structural lines to
    /// markdown headings, process, persist.
    ///
    /// Fatal parse errors persist nothing. On success the book's content
    /// version is updated to the new bundle's version.
    pub fn ingest_archive(&self, book: &mut Book, bytes: &[u8]) -> Result<IngestOutcome> {
        let lock = self.lock_for(&book.id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::InvalidState("ingestion lock poisoned".into()))?;

        let extraction = extract_text(bytes)?;
        debug!(
            "extracted {} documents for book {}",
            extraction.document_count, book.id
        );
        if book.author.is_empty()
            && let Some(author) = extraction.author
        {
            book.author = author;
        }

        let markdown = text_to_markdown(&extraction.text);
        let bundle = process_markdown(&markdown, &self.options);
        Ok(self.finish(book, bundle))
    }

    /// Ingest already-unpacked HTML content.
    pub fn ingest_markup(&self, book: &mut Book, markup: &str) -> Result<IngestOutcome> {
        let lock = self.lock_for(&book.id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::InvalidState("ingestion lock poisoned".into()))?;

        let bundle = process_html(markup, &self.options);
        Ok(self.finish(book, bundle))
    }

    fn finish(&self, book: &mut Book, bundle: ProcessedContent) -> IngestOutcome {
        book.version = Some(bundle.version.clone());

        let store_error = match self.store.put(&book.id, &bundle) {
            Ok(()) => None,
            Err(e) => {
                warn!("store write failed for book {}: {}", book.id, e);
                Some(e)
            }
        };

        IngestOutcome {
            bundle,
            store_error,
        }
    }

    fn lock_for(&self, book_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| Error::InvalidState("ingestion lock table poisoned".into()))?;
        Ok(locks
            .entry(book_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}
