//! Load progress ledger
//!
//! Every unit of load work appends a `start` event before it runs and a
//! `done` (or `error`) event after, one JSON object per line. A resumed load
//! replays the file: units with a `done` event are skipped, units with only a
//! `start` were interrupted and are redone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Default file name of the ledger kept for a target server
pub fn default_file_name(server_uuid: &str) -> String {
    format!("load-progress.{}.json", server_uuid)
}

/// Work unit kinds
pub mod event {
    pub const PRE_SQL: &str = "pre-sql";
    pub const POST_SQL: &str = "post-sql";
    pub const SCHEMA_DDL: &str = "schema-ddl";
    pub const TABLE_DDL: &str = "table-ddl";
    pub const VIEW_DDL: &str = "view-ddl";
    pub const OBJECT_DDL: &str = "object-ddl";
    pub const DATA_CHUNK: &str = "data-chunk";
    pub const INDEX_REBUILD: &str = "index-rebuild";
    pub const ANALYZE: &str = "analyze";
    pub const USER: &str = "user";
    pub const GRANTS: &str = "grants";
    pub const GTID_UPDATE: &str = "gtid-update";
    pub const LOAD_COMPLETE: &str = "load-complete";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Start,
    Done,
    Error,
}

/// One line of the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub ts: DateTime<Utc>,
    pub event: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

type Key = (String, String, Option<String>);

fn key(event: &str, target: &str, chunk: Option<&str>) -> Key {
    (event.to_string(), target.to_string(), chunk.map(str::to_string))
}

#[derive(Default)]
struct State {
    done: HashSet<Key>,
    started: HashSet<Key>,
    complete: bool,
    replayed: usize,
}

/// Append-only record of finished load work
pub struct ProgressLedger {
    path: Option<PathBuf>,
    file: tokio::sync::Mutex<Option<File>>,
    state: Mutex<State>,
}

impl std::fmt::Debug for ProgressLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressLedger")
            .field("path", &self.path)
            .finish()
    }
}

impl ProgressLedger {
    /// Ledger that keeps progress in memory only
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: tokio::sync::Mutex::new(None),
            state: Mutex::new(State::default()),
        }
    }

    /// Open the ledger at `path`, replaying what an earlier load recorded
    ///
    /// With `reset` the earlier progress is discarded.
    pub async fn open(path: impl AsRef<Path>, reset: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut state = State::default();
        let mut torn = false;

        if reset {
            if fs::try_exists(&path).await? {
                info!("Discarding load progress in {}", path.display());
                fs::remove_file(&path).await?;
            }
        } else if fs::try_exists(&path).await? {
            let contents = fs::read_to_string(&path).await?;
            torn = !contents.is_empty() && !contents.ends_with('\n');
            for (n, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Entry>(line) {
                    Ok(entry) => state.replay(entry),
                    // a crash may leave a torn last line
                    Err(e) => warn!("Ignoring line {} of {}: {}", n + 1, path.display(), e),
                }
            }
            debug!(
                "Replayed {} ledger entries from {}",
                state.replayed,
                path.display()
            );
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        if torn {
            file.write_all(b"\n").await?;
        }
        Ok(Self {
            path: Some(path),
            file: tokio::sync::Mutex::new(Some(file)),
            state: Mutex::new(state),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Entries read when the ledger was opened
    pub fn replayed(&self) -> usize {
        self.state.lock().replayed
    }

    /// Whether an earlier load ran to completion
    pub fn is_complete(&self) -> bool {
        self.state.lock().complete
    }

    pub fn is_done(&self, event: &str, target: &str, chunk: Option<&str>) -> bool {
        self.state.lock().done.contains(&key(event, target, chunk))
    }

    /// Whether the unit was started but never finished
    pub fn was_interrupted(&self, event: &str, target: &str, chunk: Option<&str>) -> bool {
        let k = key(event, target, chunk);
        let state = self.state.lock();
        state.started.contains(&k) && !state.done.contains(&k)
    }

    /// Targets of interrupted units of `event`
    pub fn interrupted(&self, event: &str) -> Vec<(String, Option<String>)> {
        let state = self.state.lock();
        let mut units: Vec<_> = state
            .started
            .iter()
            .filter(|k| k.0 == event && !state.done.contains(*k))
            .map(|k| (k.1.clone(), k.2.clone()))
            .collect();
        units.sort();
        units
    }

    pub async fn start(&self, event: &str, target: &str, chunk: Option<&str>) -> Result<()> {
        self.append(event, target, chunk, Status::Start, None).await
    }

    pub async fn done(&self, event: &str, target: &str, chunk: Option<&str>) -> Result<()> {
        self.append(event, target, chunk, Status::Done, None).await
    }

    pub async fn error(
        &self,
        event: &str,
        target: &str,
        chunk: Option<&str>,
        message: &str,
    ) -> Result<()> {
        self.append(event, target, chunk, Status::Error, Some(message.to_string()))
            .await
    }

    /// Record that the whole load finished
    pub async fn complete(&self) -> Result<()> {
        self.append(event::LOAD_COMPLETE, "", None, Status::Done, None)
            .await
    }

    async fn append(
        &self,
        event: &str,
        target: &str,
        chunk: Option<&str>,
        status: Status,
        message: Option<String>,
    ) -> Result<()> {
        let entry = Entry {
            ts: Utc::now(),
            event: event.to_string(),
            target: target.to_string(),
            chunk: chunk.map(str::to_string),
            status,
            message,
        };
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            file.write_all(line.as_bytes()).await?;
            file.sync_data().await?;
        }
        drop(guard);
        self.state.lock().record(&entry);
        Ok(())
    }
}

impl State {
    fn record(&mut self, entry: &Entry) {
        let k = key(&entry.event, &entry.target, entry.chunk.as_deref());
        if entry.event == event::LOAD_COMPLETE {
            self.complete = entry.status == Status::Done;
            return;
        }
        match entry.status {
            Status::Start => {
                self.started.insert(k);
            }
            Status::Done => {
                self.done.insert(k);
            }
            Status::Error => {}
        }
    }

    fn replay(&mut self, entry: Entry) {
        self.replayed += 1;
        self.record(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replay_finds_done_and_interrupted_units() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(default_file_name("uuid-1"));

        let ledger = ProgressLedger::open(&path, false).await.unwrap();
        ledger.start(event::TABLE_DDL, "`s`.`t`", None).await.unwrap();
        ledger.done(event::TABLE_DDL, "`s`.`t`", None).await.unwrap();
        ledger.start(event::DATA_CHUNK, "`s`.`t`", Some("0")).await.unwrap();
        ledger.done(event::DATA_CHUNK, "`s`.`t`", Some("0")).await.unwrap();
        ledger.start(event::DATA_CHUNK, "`s`.`t`", Some("1")).await.unwrap();
        drop(ledger);

        let ledger = ProgressLedger::open(&path, false).await.unwrap();
        assert_eq!(ledger.replayed(), 5);
        assert!(ledger.is_done(event::TABLE_DDL, "`s`.`t`", None));
        assert!(ledger.is_done(event::DATA_CHUNK, "`s`.`t`", Some("0")));
        assert!(!ledger.is_done(event::DATA_CHUNK, "`s`.`t`", Some("1")));
        assert!(ledger.was_interrupted(event::DATA_CHUNK, "`s`.`t`", Some("1")));
        assert_eq!(
            ledger.interrupted(event::DATA_CHUNK),
            vec![("`s`.`t`".to_string(), Some("1".to_string()))]
        );
        assert!(!ledger.is_complete());
    }

    #[tokio::test]
    async fn test_lines_are_json_objects() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let ledger = ProgressLedger::open(&path, false).await.unwrap();
        ledger
            .error(event::SCHEMA_DDL, "`s`", None, "Duplicate database")
            .await
            .unwrap();
        ledger.complete().await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "schema-ddl");
        assert_eq!(lines[0]["status"], "error");
        assert_eq!(lines[0]["message"], "Duplicate database");
        assert!(lines[0].get("chunk").is_none());
        assert_eq!(lines[1]["event"], "load-complete");
    }

    #[tokio::test]
    async fn test_reset_and_torn_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        let ledger = ProgressLedger::open(&path, false).await.unwrap();
        ledger.done(event::SCHEMA_DDL, "`s`", None).await.unwrap();
        ledger.complete().await.unwrap();
        drop(ledger);
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"{\"ts\":"))
            .unwrap();

        let ledger = ProgressLedger::open(&path, false).await.unwrap();
        assert!(ledger.is_complete());
        assert!(ledger.is_done(event::SCHEMA_DDL, "`s`", None));
        drop(ledger);

        let ledger = ProgressLedger::open(&path, true).await.unwrap();
        assert_eq!(ledger.replayed(), 0);
        assert!(!ledger.is_done(event::SCHEMA_DDL, "`s`", None));
    }

    #[tokio::test]
    async fn test_disabled_ledger_records_in_memory_only() {
        let ledger = ProgressLedger::disabled();
        assert!(!ledger.is_enabled());
        ledger.done(event::SCHEMA_DDL, "`s`", None).await.unwrap();
        assert!(ledger.is_done(event::SCHEMA_DDL, "`s`", None));
    }
}
