//! Fixed-size session pool
//!
//! A pool opens all of its sessions up front, runs the session-init SQL on
//! each and hands them out one per worker. Session variables changed through
//! [`PoolConfig::with_variable`] are read before they are changed and put back
//! when the pool is closed, so a pool never leaves side effects on sessions
//! that outlive it.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = SessionPool::open(
//!     factory,
//!     PoolConfig::new(4)
//!         .with_variable("foreign_key_checks", "0")
//!         .with_init_sql("SET SESSION TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"),
//! ).await?;
//!
//! let mut session = pool.acquire().await?;
//! session.execute("SELECT 1").await?;
//! pool.release(session);
//! ```

use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::session::{Session, SessionFactory};

/// Pool configuration
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Number of sessions
    pub size: usize,
    /// Session variables set on open and restored on close
    pub variables: Vec<(String, String)>,
    /// Statements executed on every session after the variables are set
    pub init_sql: Vec<String>,
}

impl PoolConfig {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ..Default::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push((name.into(), value.into()));
        self
    }

    pub fn with_init_sql(mut self, sql: impl Into<String>) -> Self {
        self.init_sql.push(sql.into());
        self
    }

    pub fn with_init_sql_all<I, S>(mut self, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.init_sql.extend(statements.into_iter().map(Into::into));
        self
    }
}

/// A pooled session with its saved variables
pub struct ScopedSession {
    session: Box<dyn Session>,
    saved: Vec<(String, Option<String>)>,
}

impl ScopedSession {
    /// Open a session, saving and setting `variables`, then run `init_sql`
    pub async fn open(
        factory: &dyn SessionFactory,
        variables: &[(String, String)],
        init_sql: &[String],
    ) -> Result<Self> {
        let mut session = factory.connect().await?;
        let mut saved = Vec::with_capacity(variables.len());
        for (name, value) in variables {
            let previous = session.variable(&format!("SESSION.{}", name)).await?;
            session
                .execute(&format!("SET SESSION {} = {}", name, value))
                .await?;
            saved.push((name.clone(), previous));
        }
        for sql in init_sql {
            session.execute(sql).await?;
        }
        Ok(Self { session, saved })
    }

    /// Restore the saved variables and close the connection
    pub async fn close(self) -> Result<()> {
        let Self {
            mut session,
            saved,
        } = self;
        for (name, previous) in saved.iter().rev() {
            let value = match previous {
                Some(v) if v.parse::<f64>().is_ok() => v.clone(),
                Some(v) => format!("'{}'", v.replace('\\', "\\\\").replace('\'', "''")),
                None => continue,
            };
            if let Err(e) = session
                .execute(&format!("SET SESSION {} = {}", name, value))
                .await
            {
                warn!("Failed to restore session variable {}: {}", name, e);
            }
        }
        session.close().await
    }
}

impl Deref for ScopedSession {
    type Target = dyn Session;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for ScopedSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub size: usize,
    pub idle: usize,
    pub acquired: u64,
}

/// Fixed set of sessions vended one per worker
pub struct SessionPool {
    idle: Mutex<Vec<ScopedSession>>,
    available: Semaphore,
    size: usize,
    acquired: AtomicU64,
}

impl SessionPool {
    /// Open `config.size` sessions
    pub async fn open(factory: Arc<dyn SessionFactory>, config: PoolConfig) -> Result<Self> {
        if config.size == 0 {
            return Err(Error::config("Session pool size must be at least 1"));
        }
        let mut sessions = Vec::with_capacity(config.size);
        for _ in 0..config.size {
            match ScopedSession::open(factory.as_ref(), &config.variables, &config.init_sql).await
            {
                Ok(session) => sessions.push(session),
                Err(e) => {
                    for session in sessions {
                        let _ = session.close().await;
                    }
                    return Err(e);
                }
            }
        }
        debug!(
            "Opened {} sessions to {}",
            config.size,
            factory.describe()
        );
        Ok(Self::from_sessions(sessions))
    }

    /// Build a pool from already opened sessions
    pub fn from_sessions(sessions: Vec<ScopedSession>) -> Self {
        let size = sessions.len();
        Self {
            idle: Mutex::new(sessions),
            available: Semaphore::new(size),
            size,
            acquired: AtomicU64::new(0),
        }
    }

    /// Take a session, waiting until one is idle
    pub async fn acquire(&self) -> Result<ScopedSession> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| Error::Cancelled)?;
        permit.forget();
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.idle
            .lock()
            .pop()
            .ok_or_else(|| Error::protocol("session pool is empty"))
    }

    /// Return a session
    pub fn release(&self, session: ScopedSession) {
        self.idle.lock().push(session);
        self.available.add_permits(1);
    }

    /// Take every idle session out of the pool
    pub fn drain(&self) -> Vec<ScopedSession> {
        let sessions: Vec<_> = std::mem::take(&mut *self.idle.lock());
        self.available.close();
        sessions
    }

    /// Restore and close every idle session
    pub async fn close(&self) -> Result<()> {
        let mut first_error = None;
        for session in self.drain() {
            if let Err(e) = session.close().await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            idle: self.idle.lock().len(),
            acquired: self.acquired.load(Ordering::Relaxed),
        }
    }
}
