//! Error types for quarry-storage
//!
//! Storage failures are split into transient errors (network, 5xx, throttling),
//! which the [`RetryPolicy`](crate::retry::RetryPolicy) retries, and everything
//! else, which is surfaced to the caller immediately.

use thiserror::Error;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Object or file does not exist
    NotFound,
    /// Object already exists where it must not
    Conflict,
    /// Network, throttling or server-side failure (retriable)
    Transient,
    /// Permanent backend failure
    Permanent,
    /// Invalid location or credentials configuration
    Configuration,
    /// Local I/O failure
    Io,
    /// Codec failure
    Compression,
    /// Operation cancelled by the caller
    Cancelled,
}

impl ErrorCategory {
    /// Whether errors in this category are retried
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Transient)
    }
}

/// Storage error
#[derive(Error, Debug)]
pub enum Error {
    /// Object not found
    #[error("object not found: {name}")]
    NotFound { name: String },

    /// Object already exists
    #[error("object already exists: {name}")]
    AlreadyExists { name: String },

    /// Retriable backend failure
    #[error("transient storage error on {name}: {message}")]
    Transient { name: String, message: String },

    /// Non-retriable backend failure
    #[error("storage error on {name}: {message}")]
    Permanent { name: String, message: String },

    /// Invalid configuration
    #[error("storage configuration error: {0}")]
    Config(String),

    /// Local I/O error
    #[error("I/O error on {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Compression or decompression failed
    #[error("compression error: {0}")]
    Compression(String),

    /// Operation was cancelled
    #[error("storage operation cancelled")]
    Cancelled,
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::AlreadyExists { .. } => ErrorCategory::Conflict,
            Self::Transient { .. } => ErrorCategory::Transient,
            Self::Permanent { .. } => ErrorCategory::Permanent,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Io { .. } => ErrorCategory::Io,
            Self::Compression(_) => ErrorCategory::Compression,
            Self::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this error should be retried
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether the object was missing
    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an I/O error bound to a file name
    pub fn io(name: impl Into<String>, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { name: name.into() };
        }
        Self::Io {
            name: name.into(),
            source,
        }
    }

    /// Create a compression error
    pub fn compression(message: impl Into<String>) -> Self {
        Self::Compression(message.into())
    }

    /// Translate an `object_store` error, keeping the object name for context
    pub fn from_object_store(name: &str, err: object_store::Error) -> Self {
        use object_store::Error as OsError;
        match err {
            OsError::NotFound { .. } => Self::NotFound { name: name.into() },
            OsError::AlreadyExists { .. } => Self::AlreadyExists { name: name.into() },
            OsError::Precondition { .. }
            | OsError::NotModified { .. }
            | OsError::NotSupported { .. }
            | OsError::NotImplemented
            | OsError::InvalidPath { .. }
            | OsError::UnknownConfigurationKey { .. } => Self::Permanent {
                name: name.into(),
                message: err.to_string(),
            },
            other => Self::Transient {
                name: name.into(),
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retriable() {
        assert!(ErrorCategory::Transient.is_retriable());
        assert!(!ErrorCategory::NotFound.is_retriable());
        assert!(!ErrorCategory::Permanent.is_retriable());
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = Error::io(
            "@.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "object not found: @.json");
    }

    #[test]
    fn test_object_store_classification() {
        let err = Error::from_object_store(
            "a.tsv",
            object_store::Error::NotFound {
                path: "a.tsv".into(),
                source: "missing".into(),
            },
        );
        assert!(err.is_not_found());

        let err = Error::from_object_store(
            "a.tsv",
            object_store::Error::Generic {
                store: "S3",
                source: "connection reset".into(),
            },
        );
        assert!(err.is_retriable());
    }
}
