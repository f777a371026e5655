//! Error types for the memory subsystem.

use thiserror::Error;

/// Memory subsystem error types.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("memory entry not found: {0}")]
    NotFound(String),

    #[error("pin limit exceeded: at most {max} entries may be pinned")]
    PinLimitExceeded { max: usize },

    #[error("summarization failed: {0}")]
    SummarizationFailed(String),

    #[error("stored messages could not be decoded: {0}")]
    DeserializationFailed(String),

    #[error("memory store corrupted: {0}")]
    StoreCorrupted(String),

    #[error("invalid memory configuration: {0}")]
    ConfigInvalid(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// Short machine-readable code, used in tool responses.
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::NotFound(_) => "not_found",
            MemoryError::PinLimitExceeded { .. } => "pin_limit_exceeded",
            MemoryError::SummarizationFailed(_) => "summarization_failed",
            MemoryError::DeserializationFailed(_) => "deserialization_failed",
            MemoryError::StoreCorrupted(_) => "store_corrupted",
            MemoryError::ConfigInvalid(_) => "config_invalid",
            MemoryError::Storage(_) => "storage",
            MemoryError::Serialization(_) => "serialization",
            MemoryError::Io(_) => "io",
        }
    }
}

macro_rules! storage_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MemoryError {
                fn from(e: $ty) -> Self {
                    MemoryError::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
