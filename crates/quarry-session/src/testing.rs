//! In-process scripted sessions for tests
//!
//! A [`Script`] is an ordered list of rules. Each statement a session receives
//! is matched against the rules in order and the first match produces the
//! reply. Statements without a matching rule succeed with no rows. Every
//! statement and every `LOAD DATA LOCAL INFILE` payload is recorded.
//!
//! ```rust,ignore
//! let script = Script::new()
//!     .rows(r"^SELECT @@version$", &["@@version"], vec![vec!["8.0.36".into()]])
//!     .fail(r"^FLUSH TABLES WITH READ LOCK", 1227, "Access denied");
//! let factory = ScriptedFactory::new(script);
//! ```

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use parking_lot::Mutex;
use regex::{Captures, Regex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::session::{InfileStream, LoadResult, RowBatch, Session, SessionFactory};
use crate::value::{Row, Value};

/// Reply to a statement
#[derive(Debug, Clone)]
pub enum Reply {
    /// Result set
    Rows {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Statement without result set
    Affected(u64),
    /// Server error
    Error {
        code: u16,
        message: String,
    },
}

impl Reply {
    pub fn rows(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        Self::Rows {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    /// Single-row single-column result
    pub fn value(column: &str, value: impl Into<Value>) -> Self {
        Self::rows(&[column], vec![vec![value.into()]])
    }

    pub fn empty() -> Self {
        Self::Rows {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

type Responder = Arc<dyn Fn(&Captures<'_>, u64) -> Reply + Send + Sync>;

struct Rule {
    pattern: Regex,
    respond: Responder,
    remaining: Option<usize>,
}

/// Ordered statement rules
#[derive(Default)]
pub struct Script {
    rules: Vec<Rule>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, pattern: &str, respond: Responder, remaining: Option<usize>) -> Self {
        let pattern = Regex::new(&format!("(?is){}", pattern))
            .unwrap_or_else(|e| panic!("invalid script pattern {:?}: {}", pattern, e));
        self.rules.push(Rule {
            pattern,
            respond,
            remaining,
        });
        self
    }

    /// Answer matching statements with `reply`
    pub fn on(self, pattern: &str, reply: Reply) -> Self {
        self.push(pattern, Arc::new(move |_: &Captures<'_>, _: u64| reply.clone()), None)
    }

    /// Answer only the next `times` matching statements with `reply`
    pub fn on_times(self, pattern: &str, times: usize, reply: Reply) -> Self {
        self.push(pattern, Arc::new(move |_: &Captures<'_>, _: u64| reply.clone()), Some(times))
    }

    /// Compute the reply from the regex captures and the connection id
    pub fn on_fn<F>(self, pattern: &str, f: F) -> Self
    where
        F: Fn(&Captures<'_>, u64) -> Reply + Send + Sync + 'static,
    {
        self.push(pattern, Arc::new(f), None)
    }

    /// Answer matching statements with a result set
    pub fn rows(self, pattern: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        self.on(pattern, Reply::rows(columns, rows))
    }

    /// Fail matching statements with a server error
    pub fn fail(self, pattern: &str, code: u16, message: &str) -> Self {
        self.on(pattern, Reply::error(code, message))
    }
}

/// A statement received by a scripted session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub connection_id: u64,
    pub sql: String,
}

/// A `LOAD DATA LOCAL INFILE` payload received by a scripted session
#[derive(Debug, Clone)]
pub struct InfilePayload {
    pub connection_id: u64,
    pub sql: String,
    pub data: Bytes,
}

#[derive(Default)]
struct Journal {
    statements: Vec<Statement>,
    payloads: Vec<InfilePayload>,
    closed: Vec<u64>,
}

struct Shared {
    rules: Mutex<Vec<Rule>>,
    journal: Mutex<Journal>,
    next_id: AtomicU64,
    fail_connect_after: Option<u64>,
}

impl Shared {
    fn reply(&self, connection_id: u64, sql: &str) -> Reply {
        self.journal.lock().statements.push(Statement {
            connection_id,
            sql: sql.to_string(),
        });
        let mut rules = self.rules.lock();
        for rule in rules.iter_mut() {
            if rule.remaining == Some(0) {
                continue;
            }
            if let Some(caps) = rule.pattern.captures(sql) {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                return (rule.respond)(&caps, connection_id);
            }
        }
        Reply::Affected(0)
    }
}

/// Factory of scripted sessions sharing one script and journal
#[derive(Clone)]
pub struct ScriptedFactory {
    shared: Arc<Shared>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self::build(script, None)
    }

    /// Factory whose connection attempts fail after `n` sessions were opened
    pub fn failing_after(script: Script, n: u64) -> Self {
        Self::build(script, Some(n))
    }

    fn build(script: Script, fail_connect_after: Option<u64>) -> Self {
        Self {
            shared: Arc::new(Shared {
                rules: Mutex::new(script.rules),
                journal: Mutex::new(Journal::default()),
                next_id: AtomicU64::new(1),
                fail_connect_after,
            }),
        }
    }

    /// Add rules in front of the existing ones
    pub fn prepend(&self, script: Script) {
        let mut rules = self.shared.rules.lock();
        let existing = std::mem::take(&mut *rules);
        *rules = script.rules;
        rules.extend(existing);
    }

    /// Every statement received so far, in order
    pub fn statements(&self) -> Vec<Statement> {
        self.shared.journal.lock().statements.clone()
    }

    /// SQL text of every statement received so far
    pub fn sql_log(&self) -> Vec<String> {
        self.statements().into_iter().map(|s| s.sql).collect()
    }

    /// Statements matching `pattern`
    pub fn matching(&self, pattern: &str) -> Vec<String> {
        let re = Regex::new(&format!("(?is){}", pattern))
            .unwrap_or_else(|e| panic!("invalid pattern {:?}: {}", pattern, e));
        self.sql_log().into_iter().filter(|s| re.is_match(s)).collect()
    }

    /// Every `LOAD DATA LOCAL INFILE` payload received so far
    pub fn payloads(&self) -> Vec<InfilePayload> {
        self.shared.journal.lock().payloads.clone()
    }

    /// Ids of sessions that were closed
    pub fn closed(&self) -> Vec<u64> {
        self.shared.journal.lock().closed.clone()
    }

    /// Number of sessions opened
    pub fn opened(&self) -> u64 {
        self.shared.next_id.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl SessionFactory for ScriptedFactory {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        if let Some(limit) = self.shared.fail_connect_after {
            if self.opened() >= limit {
                return Err(Error::connection("Too many connections"));
            }
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            shared: Arc::clone(&self.shared),
            id,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Session answering from a [`Script`]
pub struct ScriptedSession {
    shared: Arc<Shared>,
    id: u64,
}

impl ScriptedSession {
    fn result(&self, sql: &str) -> Result<(Arc<[String]>, Vec<Vec<Value>>, u64)> {
        match self.shared.reply(self.id, sql) {
            Reply::Rows { columns, rows } => Ok((columns.into(), rows, 0)),
            Reply::Affected(n) => Ok((Vec::new().into(), Vec::new(), n)),
            Reply::Error { code, message } => {
                Err(Error::server(code, "HY000", message).with_sql(sql))
            }
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn connection_id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let (_, rows, affected) = self.result(sql)?;
        Ok(affected.max(rows.len() as u64))
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let (columns, rows, _) = self.result(sql)?;
        Ok(rows
            .into_iter()
            .map(|values| Row::new(Arc::clone(&columns), values))
            .collect())
    }

    async fn stream_rows(
        &mut self,
        sql: &str,
        tx: mpsc::Sender<RowBatch>,
        batch_size: usize,
    ) -> Result<u64> {
        let rows = self.query(sql).await?;
        let total = rows.len() as u64;
        let mut iter = rows.into_iter().peekable();
        while iter.peek().is_some() {
            let batch: Vec<Row> = iter.by_ref().take(batch_size.max(1)).collect();
            tx.send(batch).await.map_err(|_| Error::Cancelled)?;
        }
        Ok(total)
    }

    async fn load_data_stream(&mut self, sql: &str, mut data: InfileStream) -> Result<LoadResult> {
        let (_, _, affected) = self.result(sql)?;
        let mut content = BytesMut::new();
        while let Some(piece) = data.next().await {
            let piece = piece.map_err(|e| Error::protocol(format!("Infile data failed: {}", e)))?;
            content.extend_from_slice(&piece);
        }
        let data = content.freeze();
        let rows = if affected > 0 {
            affected
        } else {
            data.iter().filter(|b| **b == b'\n').count() as u64
        };
        self.shared.journal.lock().payloads.push(InfilePayload {
            connection_id: self.id,
            sql: sql.to_string(),
            data,
        });
        Ok(LoadResult {
            rows,
            warnings: 0,
            info: format!("Records: {}  Deleted: 0  Skipped: 0  Warnings: 0", rows),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.shared.journal.lock().closed.push(self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_in_order() {
        let factory = ScriptedFactory::new(
            Script::new()
                .on_times(r"^SELECT 1$", 1, Reply::value("1", 1i64))
                .on(r"^SELECT 1$", Reply::value("1", 2i64))
                .fail(r"^FLUSH", 1227, "Access denied; you need the RELOAD privilege"),
        );
        let mut session = factory.connect().await.unwrap();
        assert_eq!(session.query_value("SELECT 1").await.unwrap(), Some(Value::Int(1)));
        assert_eq!(session.query_value("SELECT 1").await.unwrap(), Some(Value::Int(2)));
        assert!(session
            .execute("FLUSH TABLES WITH READ LOCK")
            .await
            .unwrap_err()
            .is_privilege());
        assert_eq!(session.execute("SET NAMES utf8mb4").await.unwrap(), 0);
        assert_eq!(factory.sql_log().len(), 4);
    }

    #[tokio::test]
    async fn test_stream_rows_batches() {
        let rows: Vec<Vec<Value>> = (0..5).map(|i| vec![Value::from(i as i64)]).collect();
        let factory = ScriptedFactory::new(Script::new().rows(r"^SELECT", &["a"], rows));
        let mut session = factory.connect().await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        let sent = session.stream_rows("SELECT a FROM t", tx, 2).await.unwrap();
        assert_eq!(sent, 5);
        let mut sizes = Vec::new();
        while let Some(batch) = rx.recv().await {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_load_data_recorded() {
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let result = session
            .load_data_local("LOAD DATA LOCAL INFILE 'x' INTO TABLE t", Bytes::from("1\n2\n"))
            .await
            .unwrap();
        assert_eq!(result.rows, 2);
        assert_eq!(factory.payloads()[0].data, Bytes::from("1\n2\n"));
    }

    #[tokio::test]
    async fn test_failed_infile_stream_records_nothing() {
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let data = futures::stream::iter(vec![
            Ok(Bytes::from("1\n")),
            Err(std::io::Error::other("truncated")),
        ])
        .boxed();
        let err = session
            .load_data_stream("LOAD DATA LOCAL INFILE 'x' INTO TABLE t", data)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("truncated"));
        assert!(factory.payloads().is_empty());
    }
}
