//! Error types for the ragchat application layer.

use ragchat_search::SearchError;

/// Top-level error type for the application.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Document corpus could not be loaded.
    #[error("corpus error: {0}")]
    Corpus(String),

    /// Error from the search layer.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AppError>;
