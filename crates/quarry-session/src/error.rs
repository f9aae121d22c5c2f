//! Error types for quarry-session
//!
//! Server errors are classified by their error number so callers can react to
//! privilege shortfalls (fallback paths) and lock conflicts without matching on
//! message text.

use std::fmt;
use thiserror::Error;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error numbers that mean "missing privilege"
pub const PRIVILEGE_ERROR_CODES: &[u16] = &[1044, 1045, 1142, 1143, 1227, 1370, 3530];

/// `ER_LOCK_DEADLOCK`
pub const DEADLOCK_ERROR_CODE: u16 = 1213;

/// `ER_LOCK_WAIT_TIMEOUT`
pub const LOCK_WAIT_ERROR_CODE: u16 = 1205;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network or handshake failure
    Connection,
    /// Statement rejected by the server
    Server,
    /// Missing privilege
    Privilege,
    /// Deadlock detected by the server
    Deadlock,
    /// Lock wait timeout
    LockWait,
    /// Consumer went away or the operation was cancelled
    Cancelled,
    /// Unexpected protocol or result shape
    Protocol,
    /// Invalid connection options
    Configuration,
}

impl ErrorCategory {
    /// Whether a statement failing with this category may succeed when retried
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Deadlock | Self::LockWait)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Server => write!(f, "server"),
            Self::Privilege => write!(f, "privilege"),
            Self::Deadlock => write!(f, "deadlock"),
            Self::LockWait => write!(f, "lock_wait"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Protocol => write!(f, "protocol"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Session error
#[derive(Error, Debug)]
pub enum Error {
    /// Connection failed or was lost
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Server rejected a statement
    #[error("MySQL Error {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
        sql: Option<String>,
    },

    /// Server rejected a statement for lack of privileges
    #[error("MySQL Error {code} ({state}): {message}")]
    Privilege {
        code: u16,
        state: String,
        message: String,
        sql: Option<String>,
    },

    /// Deadlock found when trying to get lock
    #[error("MySQL Error 1213 ({state}): {message}")]
    Deadlock {
        state: String,
        message: String,
        sql: Option<String>,
    },

    /// Lock wait timeout exceeded
    #[error("MySQL Error 1205 ({state}): {message}")]
    LockWait {
        state: String,
        message: String,
        sql: Option<String>,
    },

    /// Operation cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Unexpected result
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid options
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Classify a server error by its error number
    pub fn server(code: u16, state: impl Into<String>, message: impl Into<String>) -> Self {
        let state = state.into();
        let message = message.into();
        match code {
            DEADLOCK_ERROR_CODE => Self::Deadlock {
                state,
                message,
                sql: None,
            },
            LOCK_WAIT_ERROR_CODE => Self::LockWait {
                state,
                message,
                sql: None,
            },
            c if PRIVILEGE_ERROR_CODES.contains(&c) => Self::Privilege {
                code,
                state,
                message,
                sql: None,
            },
            _ => Self::Server {
                code,
                state,
                message,
                sql: None,
            },
        }
    }

    /// Attach the statement that failed
    pub fn with_sql(mut self, statement: impl Into<String>) -> Self {
        match &mut self {
            Self::Server { sql, .. }
            | Self::Privilege { sql, .. }
            | Self::Deadlock { sql, .. }
            | Self::LockWait { sql, .. } => *sql = Some(statement.into()),
            _ => {}
        }
        self
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Server { .. } => ErrorCategory::Server,
            Self::Privilege { .. } => ErrorCategory::Privilege,
            Self::Deadlock { .. } => ErrorCategory::Deadlock,
            Self::LockWait { .. } => ErrorCategory::LockWait,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether the server refused for lack of privileges
    #[inline]
    pub fn is_privilege(&self) -> bool {
        matches!(self, Self::Privilege { .. })
    }

    /// Server error number, if the server produced this error
    pub fn code(&self) -> Option<u16> {
        match self {
            Self::Server { code, .. } | Self::Privilege { code, .. } => Some(*code),
            Self::Deadlock { .. } => Some(DEADLOCK_ERROR_CODE),
            Self::LockWait { .. } => Some(LOCK_WAIT_ERROR_CODE),
            _ => None,
        }
    }

    /// Server message, if the server produced this error
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Server { message, .. }
            | Self::Privilege { message, .. }
            | Self::Deadlock { message, .. }
            | Self::LockWait { message, .. } => Some(message),
            _ => None,
        }
    }

    /// The statement that failed, when known
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Server { sql, .. }
            | Self::Privilege { sql, .. }
            | Self::Deadlock { sql, .. }
            | Self::LockWait { sql, .. } => sql.as_deref(),
            _ => None,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_classification() {
        assert!(Error::server(1227, "42000", "Access denied").is_privilege());
        assert!(Error::server(1044, "42000", "Access denied").is_privilege());
        assert_eq!(
            Error::server(1213, "40001", "Deadlock").category(),
            ErrorCategory::Deadlock
        );
        assert_eq!(
            Error::server(1205, "HY000", "Lock wait").category(),
            ErrorCategory::LockWait
        );
        assert_eq!(
            Error::server(1146, "42S02", "Table doesn't exist").category(),
            ErrorCategory::Server
        );
    }

    #[test]
    fn test_retriable() {
        assert!(Error::connection("reset").is_retriable());
        assert!(Error::server(1213, "40001", "Deadlock").is_retriable());
        assert!(!Error::server(1064, "42000", "syntax").is_retriable());
        assert!(!Error::Cancelled.is_retriable());
    }

    #[test]
    fn test_display_and_sql() {
        let err = Error::server(1146, "42S02", "Table 'a.t' doesn't exist").with_sql("SELECT 1");
        assert_eq!(
            err.to_string(),
            "MySQL Error 1146 (42S02): Table 'a.t' doesn't exist"
        );
        assert_eq!(err.sql(), Some("SELECT 1"));
        assert_eq!(err.code(), Some(1146));
    }
}
