//! Order in which data files are loaded
//!
//! Tables with the fewest files in flight go first so that workers spread
//! over tables; among those the table with the most bytes left wins.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::layout::{ChunkRecord, DataFile, TableDescriptor};

/// One data file to load
#[derive(Debug, Clone)]
pub(crate) struct DataJob {
    /// Qualified table name
    pub target: String,
    pub table: Arc<TableDescriptor>,
    pub file: DataFile,
    /// Stored size, `0` when not known yet
    pub size: u64,
    /// Record from `@.done.json`, once the dump has finished
    pub record: Option<ChunkRecord>,
}

impl DataJob {
    pub fn label(&self) -> String {
        self.file.label()
    }
}

#[derive(Default)]
struct TableQueue {
    pending: VecDeque<DataJob>,
    active: usize,
    bytes_left: u64,
}

#[derive(Default)]
struct State {
    tables: BTreeMap<String, TableQueue>,
    seen: HashSet<String>,
    complete: bool,
}

/// Work queue of the data phase
#[derive(Default)]
pub(crate) struct Scheduler {
    state: Mutex<State>,
    notify: Notify,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a file; `false` if it was queued before
    pub fn add(&self, job: DataJob) -> bool {
        let mut state = self.state.lock();
        if !state.seen.insert(job.file.name.clone()) {
            return false;
        }
        let queue = state.tables.entry(job.target.clone()).or_default();
        queue.bytes_left += job.size;
        queue.pending.push_back(job);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    pub fn is_known(&self, file: &str) -> bool {
        self.state.lock().seen.contains(file)
    }

    /// No more files will be added
    pub fn complete(&self) {
        self.state.lock().complete = true;
        self.notify.notify_waiters();
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    /// Wake waiting workers so they notice cancellation
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    fn take(&self) -> Option<DataJob> {
        let mut state = self.state.lock();
        let (_, queue) = state
            .tables
            .iter_mut()
            .filter(|(_, q)| !q.pending.is_empty())
            .min_by(|(_, a), (_, b)| {
                a.active
                    .cmp(&b.active)
                    .then_with(|| b.bytes_left.cmp(&a.bytes_left))
            })?;
        let job = queue.pending.pop_front()?;
        queue.active += 1;
        queue.bytes_left = queue.bytes_left.saturating_sub(job.size);
        Some(job)
    }

    /// Next file to load; `None` once the queue is complete and drained
    pub async fn next(&self) -> Option<DataJob> {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.take() {
                return Some(job);
            }
            if self.is_complete() {
                return None;
            }
            // also re-checks periodically in case a wakeup raced the lock
            let _ = tokio::time::timeout(Duration::from_millis(500), notified).await;
        }
    }

    /// A file taken with [`next`](Self::next) was handled
    pub fn finish(&self, job: &DataJob) {
        if let Some(queue) = self.state.lock().tables.get_mut(&job.target) {
            queue.active = queue.active.saturating_sub(1);
        }
    }

    /// Files queued but not handed out
    pub fn pending(&self) -> usize {
        self.state.lock().tables.values().map(|q| q.pending.len()).sum()
    }
}
