//! The storage capability set shared by every backend
//!
//! A dump is a flat namespace of objects under one root (a directory, a
//! bucket prefix or an in-memory map). Writes are atomic: a writer streams to a
//! temporary name carrying the [`DUMPING_SUFFIX`] and the object only becomes
//! visible under its final name when [`WriteStream::finish`] succeeds.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Suffix of objects that are still being written
pub const DUMPING_SUFFIX: &str = ".dumping";

/// Name and size of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object name relative to the storage root
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

impl ObjectInfo {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Sequential reader over one object
#[async_trait]
pub trait ReadStream: Send {
    /// Next block of bytes, `None` at end of object
    async fn read_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Drain the remaining bytes
    async fn read_to_end(&mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.read_chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }
}

/// Sequential writer for one object
#[async_trait]
pub trait WriteStream: Send {
    /// Append bytes
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Publish the object under its final name, returning the stored size
    async fn finish(self: Box<Self>) -> Result<u64>;

    /// Discard everything written so far
    async fn abort(self: Box<Self>) -> Result<()>;

    /// Bytes accepted so far
    fn bytes_written(&self) -> u64;
}

/// Uniform object access over local files, object stores and memory
#[async_trait]
pub trait Storage: Send + Sync + fmt::Debug {
    /// Human-readable location used in messages
    fn describe(&self) -> String;

    /// Open an object for reading
    async fn open_read(&self, name: &str) -> Result<Box<dyn ReadStream>>;

    /// Open an object for writing
    async fn open_write(&self, name: &str) -> Result<Box<dyn WriteStream>>;

    /// List finished objects whose names start with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Remove an object, missing objects are not an error
    async fn remove(&self, name: &str) -> Result<()>;

    /// Rename an object
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Whether a finished object exists
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Whether this is the local filesystem
    fn is_local(&self) -> bool {
        false
    }

    /// Local directory of the root, for local storage only
    fn local_root(&self) -> Option<std::path::PathBuf> {
        None
    }

    /// Server-reachable URL of an object, when the backend has one
    fn object_url(&self, _name: &str) -> Option<String> {
        None
    }

    /// Wait until the set of objects may have changed, or `timeout` elapses
    async fn wait_for_change(&self, timeout: Duration) {
        tokio::time::sleep(timeout.min(Duration::from_secs(1))).await;
    }

    /// Read a whole object
    async fn read_all(&self, name: &str) -> Result<Bytes> {
        let mut reader = self.open_read(name).await?;
        reader.read_to_end().await
    }

    /// Read a whole object as UTF-8 text
    async fn read_string(&self, name: &str) -> Result<String> {
        let bytes = self.read_all(name).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| Error::compression(format!("{} is not valid UTF-8: {}", name, e)))
    }

    /// Write a whole object atomically
    async fn write_all(&self, name: &str, data: &[u8]) -> Result<u64> {
        let mut writer = self.open_write(name).await?;
        writer.write(data).await?;
        writer.finish().await
    }
}

/// Reader over an in-memory buffer
pub struct BytesReader {
    data: Option<Bytes>,
}

impl BytesReader {
    pub fn new(data: Bytes) -> Self {
        Self { data: Some(data) }
    }
}

#[async_trait]
impl ReadStream for BytesReader {
    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        Ok(self.data.take().filter(|d| !d.is_empty()))
    }
}

/// Name of the in-progress object for `name`
pub fn dumping_name(name: &str) -> String {
    format!("{}{}", name, DUMPING_SUFFIX)
}
