//! Error types for lectern operations.

use thiserror::Error;

/// Errors that can occur during ingestion or reading-state operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Malformed container: {0}")]
    ContainerMalformed(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Document unreadable: {0}")]
    DocumentUnreadable(String),

    #[error("No content extracted from archive")]
    NoContentExtracted,

    #[error("Invalid range {start}..{end} for content of length {len}")]
    InvalidRange {
        start: usize,
        end: usize,
        len: usize,
    },

    #[error("Sync failure: {0}")]
    SyncFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;
