//! Error types for Keystone.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using KeystoneError.
pub type Result<T> = std::result::Result<T, KeystoneError>;

/// Errors that can occur in Keystone operations.
#[derive(Debug, Error)]
pub enum KeystoneError {
    #[error("buffer pool exhausted, unable to supply a page")]
    BufferPoolExhausted,

    #[error("page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    #[error("duplicate key")]
    DuplicateKey,

    #[error("index iterator out of range")]
    IteratorOutOfRange,

    #[error("corrupt node: {0}")]
    CorruptNode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}
