use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by snapshot stores regardless of the backing medium.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The medium could not be read or written.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A snapshot exists but cannot be parsed.
    #[error("corrupt snapshot at {location}")]
    Corrupt {
        /// File or slot holding the snapshot.
        location: String,
        /// Parse failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A snapshot could not be serialised.
    #[error("failed to encode snapshot")]
    Encode(#[source] Box<dyn Error + Send + Sync>),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a corrupt-snapshot error for `location`.
    pub fn corrupt(location: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Corrupt {
            location: location.into(),
            source: Box::new(source),
        }
    }

    /// Whether the failure concerns the content rather than the medium.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, StorageError::Corrupt { .. })
    }
}
