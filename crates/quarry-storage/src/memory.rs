//! In-process storage
//!
//! Used as the hand-off buffer between the dump writer and the loader when
//! copying between servers, and as the store in tests.
//!
//! A bounded store charges every byte written to an object accepted by the
//! `transient` predicate against `capacity`. Writers stall while the budget
//! is exhausted and resume when a consumer removes a finished object. A writer
//! never stalls while no finished transient object exists, since nothing could
//! free the budget.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::storage::{BytesReader, ObjectInfo, ReadStream, Storage, WriteStream};

type TransientFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    /// Bytes of finished transient objects
    stored: u64,
    /// Bytes of unfinished transient writes
    pending: u64,
}

struct Shared {
    name: String,
    state: Mutex<State>,
    changed: Notify,
    capacity: Option<u64>,
    transient: TransientFn,
}

impl Shared {
    fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// Storage backed by a map in memory
#[derive(Clone)]
pub struct MemoryStorage {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("name", &self.shared.name)
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl MemoryStorage {
    /// Unbounded store
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None, Arc::new(|_: &str| false))
    }

    /// Store that bounds the bytes held by objects matching `transient`
    pub fn bounded<F>(name: impl Into<String>, capacity: u64, transient: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::build(name.into(), Some(capacity), Arc::new(transient))
    }

    fn build(name: String, capacity: Option<u64>, transient: TransientFn) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(State::default()),
                changed: Notify::new(),
                capacity,
                transient,
            }),
        }
    }

    /// Bytes currently charged against the budget
    pub fn used(&self) -> u64 {
        let state = self.shared.state.lock();
        state.stored + state.pending
    }

    /// Names of all finished objects
    pub fn names(&self) -> Vec<String> {
        self.shared.state.lock().objects.keys().cloned().collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn describe(&self) -> String {
        format!("memory://{}", self.shared.name)
    }

    async fn open_read(&self, name: &str) -> Result<Box<dyn ReadStream>> {
        let data = self
            .shared
            .state
            .lock()
            .objects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound { name: name.into() })?;
        Ok(Box::new(BytesReader::new(data)))
    }

    async fn open_write(&self, name: &str) -> Result<Box<dyn WriteStream>> {
        let charged = self.shared.capacity.is_some() && (self.shared.transient)(name);
        Ok(Box::new(MemoryWriter {
            shared: Arc::clone(&self.shared),
            name: name.to_string(),
            buffer: Vec::new(),
            charged,
            reserved: 0,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        Ok(self
            .shared
            .state
            .lock()
            .objects
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, data)| ObjectInfo::new(name.clone(), data.len() as u64))
            .collect())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let removed = {
            let mut state = self.shared.state.lock();
            let removed = state.objects.remove(name);
            if let Some(data) = &removed {
                if self.shared.capacity.is_some() && (self.shared.transient)(name) {
                    state.stored = state.stored.saturating_sub(data.len() as u64);
                }
            }
            removed
        };
        if removed.is_some() {
            self.shared.notify();
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            let data = state
                .objects
                .remove(from)
                .ok_or_else(|| Error::NotFound { name: from.into() })?;
            state.objects.insert(to.to_string(), data);
        }
        self.shared.notify();
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.shared.state.lock().objects.contains_key(name))
    }

    async fn wait_for_change(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.shared.changed.notified()).await;
    }
}

struct MemoryWriter {
    shared: Arc<Shared>,
    name: String,
    buffer: Vec<u8>,
    charged: bool,
    reserved: u64,
}

impl MemoryWriter {
    async fn reserve(&mut self, len: u64) {
        let Some(capacity) = self.shared.capacity else {
            return;
        };
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                let used = state.stored + state.pending;
                if used + len <= capacity || state.stored == 0 {
                    state.pending += len;
                    self.reserved += len;
                    return;
                }
            }
            notified.await;
        }
    }

    fn release(&mut self) {
        if self.reserved > 0 {
            let mut state = self.shared.state.lock();
            state.pending = state.pending.saturating_sub(self.reserved);
            self.reserved = 0;
        }
    }
}

#[async_trait]
impl WriteStream for MemoryWriter {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.charged {
            self.reserve(data.len() as u64).await;
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64> {
        let mut this = *self;
        let data = Bytes::from(std::mem::take(&mut this.buffer));
        let size = data.len() as u64;
        {
            let mut state = this.shared.state.lock();
            if this.charged {
                state.pending = state.pending.saturating_sub(this.reserved);
                state.stored += this.reserved;
            }
            if let Some(previous) = state.objects.insert(this.name.clone(), data) {
                if this.charged {
                    state.stored = state.stored.saturating_sub(previous.len() as u64);
                }
            }
        }
        this.reserved = 0;
        this.shared.notify();
        Ok(size)
    }

    async fn abort(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.release();
        this.shared.notify();
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.buffer.len() as u64
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_visible_after_finish() {
        let storage = MemoryStorage::new("t");
        let mut writer = storage.open_write("a@0.tsv").await.unwrap();
        writer.write(b"x").await.unwrap();
        assert!(!storage.exists("a@0.tsv").await.unwrap());
        writer.finish().await.unwrap();
        assert_eq!(storage.list("a").await.unwrap(), vec![ObjectInfo::new("a@0.tsv", 1)]);
        assert!(storage.list("b").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_writer_stalls_until_removal() {
        let storage = MemoryStorage::bounded("copy", 10, |name| name.contains('@'));
        storage.write_all("s.t@0.tsv", b"12345678").await.unwrap();
        assert_eq!(storage.used(), 8);

        // non-transient objects are not charged
        storage.write_all("s.t.sql", b"CREATE TABLE").await.unwrap();
        assert_eq!(storage.used(), 8);

        let writer_store = storage.clone();
        let handle = tokio::spawn(async move {
            writer_store.write_all("s.t@@1.tsv", b"abcdef").await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        assert!(!storage.exists("s.t@@1.tsv").await.unwrap());

        storage.remove("s.t@0.tsv").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(storage.exists("s.t@@1.tsv").await.unwrap());
        assert_eq!(storage.used(), 6);
    }

    #[tokio::test]
    async fn test_oversized_write_proceeds_when_nothing_can_be_freed() {
        let storage = MemoryStorage::bounded("copy", 4, |_| true);
        storage.write_all("big@", b"0123456789").await.unwrap();
        assert_eq!(storage.used(), 10);
    }

    #[tokio::test]
    async fn test_wait_for_change_wakes_on_finish() {
        let storage = MemoryStorage::new("t");
        let waiter = storage.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_change(Duration::from_secs(30)).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        storage.write_all("@.done.json", b"{}").await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
