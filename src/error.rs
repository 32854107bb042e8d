//! Custom error types and result handling for chapterhouse operations.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `std::result::Result<T, Error>`. Failures that belong to a single book are
//! captured on its [`BookTask`](crate::task::BookTask) as a message; only
//! configuration and discovery errors reach the caller of a batch.
//!
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{DetectionMethod, ProcessingStatus};

/// Type alias for Results with chapterhouse errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all chapterhouse operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// EPUB archive errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Report (de)serialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    ConfigBuilder(#[from] crate::batch::BatchConfigBuilderError),
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Path contains bytes that are not valid UTF-8
    #[error("Path is not valid UTF-8: {0:?}")]
    PathUtf8Error(PathBuf),
    /// Malformed or unusable document markup
    #[error("Malformed markup: {0}")]
    Markup(String),
    /// No chapter structure could be recovered from a book
    #[error("No chapters detected using the '{method}' method; {suggestion}")]
    ChapterDetection {
        method: DetectionMethod,
        suggestion: String,
    },
    /// A task was asked to move through an illegal status transition
    #[error("Invalid task transition from {from} to {to}")]
    InvalidTransition {
        from: ProcessingStatus,
        to: ProcessingStatus,
    },
    /// A book pipeline exceeded its time budget
    #[error("Task timed out after {0:?}")]
    Timeout(Duration),
    /// The synthesis collaborator rejected a unit of text
    #[error("Synthesis failed: {0}")]
    Synthesis(String),
    /// Error for unsupported operations or formats (e.g., unknown document extension)
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Error for resources that couldn't be found (e.g., input path, TOC target)
    #[error("Not found: {0}")]
    NotFound(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Builds the structure-detection failure for `method`, suggesting the
    /// strategies worth trying next.
    pub fn chapter_detection(method: DetectionMethod) -> Self {
        let suggestion = match method {
            DetectionMethod::TocOnly => "try the 'headings' or 'auto' method",
            DetectionMethod::HeadingsOnly => "try the 'toc' or 'auto' method",
            DetectionMethod::Combined => "try the 'headings' or 'auto' method",
            DetectionMethod::Auto => "the book has neither a usable table of contents nor headings",
        };
        Error::ChapterDetection {
            method,
            suggestion: suggestion.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
