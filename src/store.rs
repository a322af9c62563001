//! Processed-content persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::content::ProcessedContent;
use crate::error::{Error, Result};

/// Storage for processed content bundles, keyed by book id.
///
/// Writes replace the whole bundle. Implementations map their own failures to
/// [`Error::PersistenceFailure`] so callers can distinguish a storage problem
/// from a parse problem.
pub trait ContentStore: Send + Sync {
    fn put(&self, book_id: &str, bundle: &ProcessedContent) -> Result<()>;
    fn get(&self, book_id: &str) -> Result<Option<ProcessedContent>>;
}

impl<S: ContentStore + ?Sized> ContentStore for std::sync::Arc<S> {
    fn put(&self, book_id: &str, bundle: &ProcessedContent) -> Result<()> {
        (**self).put(book_id, bundle)
    }

    fn get(&self, book_id: &str) -> Result<Option<ProcessedContent>> {
        (**self).get(book_id)
    }
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryStore {
    bundles: Mutex<HashMap<String, ProcessedContent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContentStore for MemoryStore {
    fn put(&self, book_id: &str, bundle: &ProcessedContent) -> Result<()> {
        let mut bundles = self
            .bundles
            .lock()
            .map_err(|_| Error::PersistenceFailure("store lock poisoned".into()))?;
        bundles.insert(book_id.to_string(), bundle.clone());
        Ok(())
    }

    fn get(&self, book_id: &str) -> Result<Option<ProcessedContent>> {
        let bundles = self
            .bundles
            .lock()
            .map_err(|_| Error::PersistenceFailure("store lock poisoned".into()))?;
        Ok(bundles.get(book_id).cloned())
    }
}
