//! # quarry-session
//!
//! Server sessions for quarry.
//!
//! ## Features
//!
//! - **Session trait**: statements, queries, row streaming into bounded channels
//!   and `LOAD DATA LOCAL INFILE` from memory
//! - **MySQL backend**: `mysql_async` over the text protocol (`mysql` feature)
//! - **Session pool**: fixed-size pool with session variables that are restored
//!   when the pool closes
//! - **Error classification**: privilege, deadlock and lock-wait errors are
//!   recognized by server error number
//! - **Scripted sessions**: regex-driven in-process sessions for tests

pub mod config;
pub mod error;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod pool;
pub mod session;
pub mod testing;
pub mod value;

pub use config::ConnectionOptions;
pub use error::{Error, ErrorCategory, Result};
#[cfg(feature = "mysql")]
pub use mysql::{MySqlSession, MySqlSessionFactory};
pub use pool::{PoolConfig, PoolStats, ScopedSession, SessionPool};
pub use session::{InfileStream, LoadResult, RowBatch, ServerWarning, Session, SessionFactory};
pub use value::{Row, Value};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error as SessionError, Result as SessionResult};
    pub use crate::pool::{PoolConfig, ScopedSession, SessionPool};
    pub use crate::session::{InfileStream, LoadResult, RowBatch, Session, SessionFactory};
    pub use crate::value::{Row, Value};
}
