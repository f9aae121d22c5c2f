//! MySQL session implementation on `mysql_async`
//!
//! Statements run over the text protocol. Result rows are read one at a time
//! from the server and forwarded in batches, so a large table is never held in
//! memory. `LOAD DATA LOCAL INFILE` payloads are served from a stream
//! installed as the connection's infile handler just before the statement
//! runs.

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::session::{InfileStream, LoadResult, RowBatch, Session, SessionFactory};
use crate::value::{Row, Value};

fn convert_value(value: mysql_async::Value) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => Value::Bytes(b),
        mysql_async::Value::Int(n) => Value::Int(n),
        mysql_async::Value::UInt(n) => Value::UInt(n),
        mysql_async::Value::Float(f) => Value::Float(f),
        mysql_async::Value::Double(d) => Value::Double(d),
        other => Value::Bytes(other.as_sql(true).trim_matches('\'').as_bytes().to_vec()),
    }
}

fn convert_error(err: mysql_async::Error, sql: &str) -> Error {
    match err {
        mysql_async::Error::Server(e) => Error::server(e.code, e.state, e.message).with_sql(sql),
        mysql_async::Error::Io(e) => Error::connection_with_source("I/O error", e),
        mysql_async::Error::Driver(e) => Error::connection_with_source("driver error", e),
        mysql_async::Error::Url(e) => Error::config(e.to_string()),
        other => Error::protocol(other.to_string()),
    }
}

fn convert_row(row: mysql_async::Row, columns: &Arc<[String]>) -> Row {
    let values = row
        .unwrap_raw()
        .into_iter()
        .map(|v| v.map_or(Value::Null, convert_value))
        .collect();
    Row::new(Arc::clone(columns), values)
}

fn column_names(columns: &[mysql_async::Column]) -> Arc<[String]> {
    columns
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect::<Vec<_>>()
        .into()
}

/// Session on a `mysql_async` connection
pub struct MySqlSession {
    conn: Conn,
    id: u64,
}

impl MySqlSession {
    /// Connect with the given options
    pub async fn connect(options: &ConnectionOptions) -> Result<Self> {
        let mut builder = OptsBuilder::default()
            .user(Some(options.user.clone()))
            .pass(options.password.clone())
            .db_name(options.database.clone())
            .prefer_socket(false);
        builder = match &options.socket {
            Some(socket) => builder.socket(Some(socket.clone())),
            None => builder
                .ip_or_hostname(options.host.clone())
                .tcp_port(options.port),
        };

        let conn = Conn::new(Opts::from(builder))
            .await
            .map_err(|e| match e {
                mysql_async::Error::Server(s) => Error::server(s.code, s.state, s.message),
                other => Error::connection_with_source(
                    format!("Failed to connect to MySQL at {}", options),
                    other,
                ),
            })?;
        let id = conn.id() as u64;
        debug!("Connected to {} (connection id {})", options, id);
        Ok(Self { conn, id })
    }
}

#[async_trait]
impl Session for MySqlSession {
    fn connection_id(&self) -> u64 {
        self.id
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.conn
            .query_drop(sql)
            .await
            .map_err(|e| convert_error(e, sql))?;
        Ok(self.conn.affected_rows())
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| convert_error(e, sql))?;
        let columns = column_names(&result.columns_ref());
        let mut rows = Vec::new();
        while let Some(row) = result.next().await.map_err(|e| convert_error(e, sql))? {
            rows.push(convert_row(row, &columns));
        }
        result
            .drop_result()
            .await
            .map_err(|e| convert_error(e, sql))?;
        Ok(rows)
    }

    async fn stream_rows(
        &mut self,
        sql: &str,
        tx: mpsc::Sender<RowBatch>,
        batch_size: usize,
    ) -> Result<u64> {
        let batch_size = batch_size.max(1);
        let mut result = self
            .conn
            .query_iter(sql)
            .await
            .map_err(|e| convert_error(e, sql))?;
        let columns = column_names(&result.columns_ref());

        let mut sent = 0u64;
        let mut batch = Vec::with_capacity(batch_size);
        let mut cancelled = false;
        while let Some(row) = result.next().await.map_err(|e| convert_error(e, sql))? {
            batch.push(convert_row(row, &columns));
            if batch.len() >= batch_size {
                sent += batch.len() as u64;
                let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                if tx.send(full).await.is_err() {
                    cancelled = true;
                    break;
                }
            }
        }
        // the connection is unusable until the result set is consumed
        result
            .drop_result()
            .await
            .map_err(|e| convert_error(e, sql))?;
        if cancelled {
            return Err(Error::Cancelled);
        }
        if !batch.is_empty() {
            sent += batch.len() as u64;
            tx.send(batch).await.map_err(|_| Error::Cancelled)?;
        }
        Ok(sent)
    }

    async fn load_data_stream(&mut self, sql: &str, data: InfileStream) -> Result<LoadResult> {
        // The handler outlives the statement when the server never asks for the file
        let slot = Arc::new(Mutex::new(Some(data)));
        let handler = Arc::clone(&slot);
        self.conn.set_infile_handler(async move {
            handler.lock().take().ok_or_else(|| {
                mysql_async::Error::from(std::io::Error::other("infile data was already sent"))
            })
        });
        let result = self.conn.query_drop(sql).await;
        drop(slot.lock().take());
        result.map_err(|e| convert_error(e, sql))?;
        Ok(LoadResult {
            rows: self.conn.affected_rows(),
            warnings: self.conn.get_warnings() as u64,
            info: self.conn.info().into_owned(),
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .map_err(|e| Error::connection_with_source("Failed to close connection", e))
    }
}

/// Factory for [`MySqlSession`]
#[derive(Debug, Clone)]
pub struct MySqlSessionFactory {
    options: ConnectionOptions,
}

impl MySqlSessionFactory {
    pub fn new(options: ConnectionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
}

#[async_trait]
impl SessionFactory for MySqlSessionFactory {
    async fn connect(&self) -> Result<Box<dyn Session>> {
        Ok(Box::new(MySqlSession::connect(&self.options).await?))
    }

    fn describe(&self) -> String {
        self.options.to_string()
    }
}
