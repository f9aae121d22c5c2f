//! Error types for dump, load and copy operations
//!
//! Two kinds of failure flow through the engine:
//!
//! - **Validation** and **compatibility** problems are collected in one pass and
//!   reported together, before anything is written.
//! - **Operational** failures are fail-fast. The first one is kept in a
//!   [`FirstError`] slot, the run's cancellation token is cancelled and the
//!   driver returns that error once every worker has stopped.

use parking_lot::Mutex;
use quarry_session::{Error as SessionError, ErrorCategory as SessionErrorCategory};
use quarry_storage::Error as StorageError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Result type for quarry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Severity of a compatibility issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Notice => write!(f, "NOTE"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// A compatibility finding about one object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub severity: Severity,
    /// Qualified object name, or an account for grant issues
    pub object: String,
    pub message: String,
}

impl Issue {
    pub fn error(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn warning(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn notice(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Notice,
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} {}", self.severity, self.object, self.message)
    }
}

fn join_lines(items: &[String]) -> String {
    items.join("\n")
}

fn count_errors(issues: &[Issue]) -> usize {
    issues.iter().filter(|i| i.is_error()).count()
}

fn chunk_suffix(chunk: &Option<String>) -> String {
    chunk
        .as_ref()
        .map(|c| format!(" chunk {}", c))
        .unwrap_or_default()
}

/// Errors from dump, load and copy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Option and filter problems, all of them
    #[error("{}", join_lines(.0))]
    Validation(Vec<String>),

    /// Compatibility issues found by the full catalog scan
    #[error("Compatibility issues were found ({} errors)", count_errors(.0))]
    Compatibility(Vec<Issue>),

    /// Missing privilege with no fallback
    #[error("LOCK: {object}: {message}")]
    Privilege {
        object: String,
        message: String,
        #[source]
        source: Option<SessionError>,
    },

    /// DDL changed while the dump ran without a lock
    #[error("CONSISTENCY: {0}")]
    Consistency(String),

    /// Executing or reading DDL for an object failed
    #[error("DDL: {object}: {source}")]
    Ddl {
        object: String,
        #[source]
        source: SessionError,
    },

    /// Dumping or loading table data failed
    #[error("DATA: {object}{}: {source}", chunk_suffix(.chunk))]
    Data {
        object: String,
        chunk: Option<String>,
        #[source]
        source: SessionError,
    },

    /// Creating an account or applying a grant failed
    #[error("GRANT: {account}: {source}")]
    Grant {
        account: String,
        #[source]
        source: SessionError,
    },

    /// Checksum verification failed
    #[error("CHECKSUM: {object}: {message}")]
    Checksum { object: String, message: String },

    /// Objects already present in the destination
    #[error("Duplicate objects found in destination database:\n{}", join_lines(.0))]
    ExistingObjects(Vec<String>),

    /// The dump cannot be used with this target
    #[error("{0}")]
    Incompatible(String),

    /// The dump layout is missing or malformed
    #[error("DUMP: {0}")]
    Dump(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Session(#[from] SessionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Options file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation was cancelled")]
    Cancelled,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn ddl(object: impl Into<String>, source: SessionError) -> Self {
        Self::Ddl {
            object: object.into(),
            source,
        }
    }

    pub fn data(object: impl Into<String>, chunk: Option<String>, source: SessionError) -> Self {
        Self::Data {
            object: object.into(),
            chunk,
            source,
        }
    }

    pub fn grant(account: impl Into<String>, source: SessionError) -> Self {
        Self::Grant {
            account: account.into(),
            source,
        }
    }

    pub fn privilege(
        object: impl Into<String>,
        message: impl Into<String>,
        source: Option<SessionError>,
    ) -> Self {
        Self::Privilege {
            object: object.into(),
            message: message.into(),
            source,
        }
    }

    pub fn checksum(object: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Checksum {
            object: object.into(),
            message: message.into(),
        }
    }

    pub fn dump(message: impl Into<String>) -> Self {
        Self::Dump(message.into())
    }

    /// Component tag shown to the user
    pub fn component(&self) -> &'static str {
        match self {
            Self::Validation(_) => "OPTIONS",
            Self::Compatibility(_) => "COMPATIBILITY",
            Self::Privilege { .. } => "LOCK",
            Self::Consistency(_) => "CONSISTENCY",
            Self::Ddl { .. } | Self::ExistingObjects(_) => "DDL",
            Self::Data { .. } => "DATA",
            Self::Grant { .. } => "GRANT",
            Self::Checksum { .. } => "CHECKSUM",
            Self::Incompatible(_) => "VERSION",
            Self::Dump(_) | Self::Json(_) => "DUMP",
            Self::Storage(_) | Self::Io(_) => "STORAGE",
            Self::Session(_) => "SESSION",
            Self::Yaml(_) => "OPTIONS",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// The server error behind this error, if any
    pub fn session_error(&self) -> Option<&SessionError> {
        match self {
            Self::Ddl { source, .. } | Self::Data { source, .. } | Self::Grant { source, .. } => {
                Some(source)
            }
            Self::Privilege { source, .. } => source.as_ref(),
            Self::Session(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
            || matches!(self, Self::Storage(StorageError::Cancelled))
            || self
                .session_error()
                .is_some_and(|e| e.category() == SessionErrorCategory::Cancelled)
    }

    /// Remediation hint for the user
    pub fn hint(&self) -> Option<String> {
        if let Some(e) = self.session_error() {
            match e.category() {
                SessionErrorCategory::Privilege => {
                    return Some(format!(
                        "The account lacks a privilege required for {}. Grant it or exclude the affected object.",
                        self.component()
                    ))
                }
                SessionErrorCategory::Deadlock | SessionErrorCategory::LockWait => {
                    return Some(
                        "Retry the operation; chunks are not retried automatically to keep the snapshot consistent."
                            .to_string(),
                    )
                }
                SessionErrorCategory::Connection => {
                    return Some("Check that the server is reachable and retry.".to_string())
                }
                _ => {}
            }
        }
        match self {
            Self::Validation(_) | Self::Yaml(_) => {
                Some("Fix the options listed above and run the command again.".to_string())
            }
            Self::Compatibility(_) => Some(
                "Use the 'compatibility' option to apply the fixes automatically, or fix the objects on the source server."
                    .to_string(),
            ),
            Self::Privilege { .. } => Some(
                "Grant RELOAD (for FLUSH TABLES WITH READ LOCK) or LOCK TABLES and SELECT on the dumped tables, or use consistent: false."
                    .to_string(),
            ),
            Self::Consistency(_) => Some(
                "Run the dump again with a lock, or while no DDL is executed on the server.".to_string(),
            ),
            Self::ExistingObjects(_) => Some(
                "Use dropExistingObjects or ignoreExistingObjects, or exclude the objects with filters."
                    .to_string(),
            ),
            Self::Checksum { .. } => {
                Some("The loaded data differs from the dump. Reload the affected table.".to_string())
            }
            Self::Incompatible(_) => {
                Some("Use ignoreVersion: true to load the dump anyway.".to_string())
            }
            Self::Storage(e) if e.is_retriable() => {
                Some("The storage service reported a transient failure. Retry the operation.".to_string())
            }
            Self::Dump(_) => Some(
                "Make sure the location points at a complete dump, or use waitDumpTimeout while it is written."
                    .to_string(),
            ),
            _ => None,
        }
    }
}

/// First-error slot shared by a driver and its workers
///
/// Recording an error cancels the token; later errors are dropped, so the
/// driver reports the failure that caused the others.
#[derive(Clone, Default)]
pub struct FirstError {
    slot: Arc<Mutex<Option<Error>>>,
    token: CancellationToken,
}

impl FirstError {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            token,
        }
    }

    /// Record `error` unless one is already recorded, then cancel
    pub fn record(&self, error: Error) {
        {
            let mut slot = self.slot.lock();
            if slot.is_none() && !(error.is_cancelled() && self.token.is_cancelled()) {
                *slot = Some(error);
            }
        }
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once the run is cancelled
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn has_error(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// The recorded error, or `Cancelled` if the token was cancelled externally
    pub fn into_result(self) -> Result<()> {
        match self.slot.lock().take() {
            Some(e) => Err(e),
            None if self.token.is_cancelled() => Err(Error::Cancelled),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_component_and_object() {
        let err = Error::data(
            "`world`.`city`",
            Some("3".to_string()),
            SessionError::server(1213, "40001", "Deadlock found when trying to get lock"),
        );
        let text = err.to_string();
        assert!(text.starts_with("DATA: `world`.`city` chunk 3:"));
        assert!(text.contains("MySQL Error 1213"));
        assert!(err.hint().unwrap().contains("Retry"));
    }

    #[test]
    fn test_privilege_hint() {
        let err = Error::ddl(
            "`s`.`t`",
            SessionError::server(1142, "42000", "SHOW command denied to user"),
        );
        assert_eq!(err.component(), "DDL");
        assert!(err.hint().unwrap().contains("privilege"));
    }

    #[test]
    fn test_validation_lists_every_problem() {
        let err = Error::Validation(vec!["first".into(), "second".into()]);
        assert_eq!(err.to_string(), "first\nsecond");
    }

    #[test]
    fn test_first_error_wins() {
        let first = FirstError::new(CancellationToken::new());
        first.record(Error::dump("one"));
        first.record(Error::dump("two"));
        assert!(first.is_cancelled());
        match first.into_result() {
            Err(Error::Dump(m)) => assert_eq!(m, "one"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cancel_without_error() {
        let token = CancellationToken::new();
        let first = FirstError::new(token.clone());
        token.cancel();
        assert!(matches!(first.check(), Err(Error::Cancelled)));
        assert!(matches!(first.into_result(), Err(Error::Cancelled)));
    }
}
