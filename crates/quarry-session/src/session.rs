//! Session traits
//!
//! A [`Session`] is one server connection owned by one worker. Rows are
//! streamed into a bounded channel so the reader and the formatter run
//! concurrently with back-pressure.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::value::{Row, Value};

/// Batch of rows sent through a row channel
pub type RowBatch = Vec<Row>;

/// Data fed to a `LOAD DATA LOCAL INFILE` statement as it becomes available
pub type InfileStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Outcome of a `LOAD DATA LOCAL INFILE` statement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadResult {
    /// Rows affected
    pub rows: u64,
    /// Warnings raised by the statement
    pub warnings: u64,
    /// Server info string, e.g. `Records: 3  Deleted: 0  Skipped: 0  Warnings: 0`
    pub info: String,
}

/// A warning from `SHOW WARNINGS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerWarning {
    pub level: String,
    pub code: u16,
    pub message: String,
}

/// One server connection
#[async_trait]
pub trait Session: Send {
    /// Server-side connection id
    fn connection_id(&self) -> u64;

    /// Execute a statement, returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a statement and collect its rows
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Execute a statement and stream its rows in batches of `batch_size`
    ///
    /// Returns the number of rows sent. Fails with [`Error::Cancelled`] when
    /// the receiver is dropped before the result is exhausted.
    async fn stream_rows(
        &mut self,
        sql: &str,
        tx: mpsc::Sender<RowBatch>,
        batch_size: usize,
    ) -> Result<u64>;

    /// Execute a `LOAD DATA LOCAL INFILE` statement feeding it `data`
    ///
    /// The statement fails without committing anything when `data` yields an
    /// error.
    async fn load_data_stream(&mut self, sql: &str, data: InfileStream) -> Result<LoadResult>;

    /// Close the connection
    async fn close(self: Box<Self>) -> Result<()>;

    /// Execute a `LOAD DATA LOCAL INFILE` statement feeding it one buffer
    async fn load_data_local(&mut self, sql: &str, data: Bytes) -> Result<LoadResult> {
        let data = futures::stream::once(async move { Ok(data) }).boxed();
        self.load_data_stream(sql, data).await
    }

    /// First row of a query
    async fn query_one(&mut self, sql: &str) -> Result<Option<Row>> {
        Ok(self.query(sql).await?.into_iter().next())
    }

    /// First column of the first row
    async fn query_value(&mut self, sql: &str) -> Result<Option<Value>> {
        Ok(self
            .query_one(sql)
            .await?
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// First column of the first row as text
    async fn query_text(&mut self, sql: &str) -> Result<Option<String>> {
        Ok(self.query_value(sql).await?.and_then(|v| v.to_text()))
    }

    /// Warnings of the last statement
    async fn warnings(&mut self) -> Result<Vec<ServerWarning>> {
        let rows = self.query("SHOW WARNINGS").await?;
        Ok(rows
            .iter()
            .map(|row| ServerWarning {
                level: row.text_or_empty(0),
                code: row.u64(1).unwrap_or_default() as u16,
                message: row.text_or_empty(2),
            })
            .collect())
    }

    /// Read a session or global variable, `None` if the server does not know it
    async fn variable(&mut self, name: &str) -> Result<Option<String>> {
        match self.query_text(&format!("SELECT @@{}", name)).await {
            Ok(value) => Ok(value),
            Err(Error::Server { code: 1193, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Opens sessions against one server
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Open a new session
    async fn connect(&self) -> Result<Box<dyn Session>>;

    /// Endpoint description without credentials
    fn describe(&self) -> String;
}
