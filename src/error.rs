//! Error types for skillsift

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SiftError>;

#[derive(Debug, Error)]
pub enum SiftError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("missing config: {0}")]
    MissingConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector store error: {0}")]
    VectorStore(String),

    #[error("vector store is closed")]
    StoreClosed,

    #[error("background task error: {0}")]
    Thread(String),
}

impl SiftError {
    /// Stable machine-readable code for robot output.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::MissingConfig(_) => "missing_config",
            Self::NotFound(_) => "not_found",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Embedding(_) => "embedding",
            Self::VectorStore(_) => "vector_store",
            Self::StoreClosed => "store_closed",
            Self::Thread(_) => "thread",
        }
    }
}

impl From<serde_json::Error> for SiftError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
