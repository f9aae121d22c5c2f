//! Snapshot coordination for consistent dumps
//!
//! A consistent dump briefly holds a read lock on the main session while every
//! worker starts a `WITH CONSISTENT SNAPSHOT` transaction, so all workers see
//! the same point in time. The sequence is:
//!
//! 1. `FLUSH TABLES WITH READ LOCK`, falling back to `LOCK TABLES ... READ`
//!    on every dumped table when the account lacks `RELOAD`
//! 2. open the worker sessions and start their snapshot transactions
//! 3. `LOCK INSTANCE FOR BACKUP`, which keeps DDL out until the dump ends
//! 4. read `gtid_executed` and the binary log position
//! 5. `UNLOCK TABLES`
//!
//! Without the backup lock DDL may run while the dump reads object
//! definitions. [`Coordinator::check_drift`] looks at the binary log written
//! since the snapshot for schema changes.

use quarry_session::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use crate::console::Console;
use crate::error::{Error, Result};
use crate::ident::{fold_case, quote_identifier, quote_string};
use crate::options::DumpOptions;
use crate::version::Version;

/// `mysql` tables holding accounts and grants, locked when users are dumped
pub const MYSQL_GRANT_TABLES: &[&str] = &[
    "columns_priv",
    "db",
    "default_roles",
    "global_grants",
    "password_history",
    "procs_priv",
    "proxies_priv",
    "role_edges",
    "tables_priv",
    "user",
];

static DDL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*(?:use\s+`(?:[^`]|``)*`\s*;\s*)?(?:/\*.*?\*/\s*)*(CREATE|ALTER|DROP|RENAME|TRUNCATE)\b")
        .expect("DDL regex is invalid")
});

static USE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*use\s+`((?:[^`]|``)*)`").expect("use regex is invalid"));

/// `` `s`.`` or `s.` in front of an object name
static QUALIFIED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:`((?:[^`]|``)+)`|\b([A-Za-z0-9_$]+))\s*\.\s*(?:`|[A-Za-z_$])")
        .expect("qualified name regex is invalid")
});

static SCHEMA_DDL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:CREATE|DROP|ALTER)\s+(?:DATABASE|SCHEMA)\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(?:`((?:[^`]|``)+)`|([A-Za-z0-9_$]+))",
    )
    .expect("schema DDL regex is invalid")
});

/// Read lock held while the worker snapshots were started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadLock {
    None,
    /// `FLUSH TABLES WITH READ LOCK`
    Global,
    /// `LOCK TABLES ... READ` on the dumped tables
    Tables,
}

/// Binary log coordinates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u64,
}

/// Replication position of the snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub gtid_enabled: bool,
    pub gtid_executed: String,
    pub binlog: Option<BinlogPosition>,
}

/// What the coordinator obtained
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub read_lock: ReadLock,
    pub backup_lock: bool,
    pub position: Position,
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub threads: usize,
    pub consistent: bool,
    pub tz_utc: bool,
    pub skip_consistency_checks: bool,
    pub session_init_sql: Vec<String>,
}

impl From<&DumpOptions> for CoordinatorConfig {
    fn from(options: &DumpOptions) -> Self {
        Self {
            threads: options.threads,
            consistent: options.consistent,
            tz_utc: options.tz_utc,
            skip_consistency_checks: options.skip_consistency_checks,
            session_init_sql: options.session_init_sql.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct BinlogEvent {
    event_type: String,
    info: String,
}

/// Locks, snapshots and replication position of one dump
pub struct Coordinator {
    config: CoordinatorConfig,
    console: Console,
    server_version: Option<Version>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, console: Console, server_version: Option<Version>) -> Self {
        Self {
            config,
            console,
            server_version,
        }
    }

    /// Session setup of the worker sessions
    pub fn pool_config(&self) -> PoolConfig {
        let mut pool = PoolConfig::new(self.config.threads.max(1));
        if self.config.tz_utc {
            pool = pool.with_variable("time_zone", "'+00:00'");
        }
        if self.config.consistent {
            pool = pool
                .with_init_sql("SET SESSION TRANSACTION ISOLATION LEVEL REPEATABLE READ")
                .with_init_sql("START TRANSACTION WITH CONSISTENT SNAPSHOT");
        }
        pool.with_init_sql_all(self.config.session_init_sql.iter().cloned())
    }

    /// Lock, open the worker pool inside a common snapshot and unlock
    ///
    /// `tables` are the qualified names locked when the global read lock is
    /// refused.
    pub async fn start(
        &self,
        main: &mut dyn Session,
        factory: Arc<dyn SessionFactory>,
        tables: &[String],
        lock_grant_tables: bool,
    ) -> Result<(SessionPool, Snapshot)> {
        if !self.config.consistent {
            let pool = SessionPool::open(factory, self.pool_config()).await?;
            let position = self.read_position(main).await?;
            info!("Opened {} worker sessions without a snapshot", pool.size());
            return Ok((
                pool,
                Snapshot {
                    read_lock: ReadLock::None,
                    backup_lock: false,
                    position,
                },
            ));
        }

        self.console.info("Acquiring global read lock");
        let read_lock = self.read_lock(main, tables, lock_grant_tables).await?;
        let locked = async {
            let pool = SessionPool::open(factory, self.pool_config()).await?;
            let backup_lock = self.backup_lock(main).await;
            let position = match self.read_position(main).await {
                Ok(p) => p,
                Err(e) => {
                    let _ = pool.close().await;
                    return Err(e);
                }
            };
            Ok::<_, Error>((pool, backup_lock, position))
        }
        .await;
        let unlocked = main.execute("UNLOCK TABLES").await;
        let (pool, backup_lock, position) = locked?;
        if let Err(e) = unlocked {
            let _ = pool.close().await;
            return Err(e.into());
        }
        self.console.info("Global read lock has been released");
        info!(
            "Snapshot started on {} sessions (read lock: {:?}, backup lock: {}, gtid_executed: '{}')",
            pool.size(),
            read_lock,
            backup_lock,
            position.gtid_executed
        );
        Ok((
            pool,
            Snapshot {
                read_lock,
                backup_lock,
                position,
            },
        ))
    }

    async fn read_lock(
        &self,
        main: &mut dyn Session,
        tables: &[String],
        lock_grant_tables: bool,
    ) -> Result<ReadLock> {
        match main.execute("FLUSH TABLES WITH READ LOCK").await {
            Ok(_) => {
                self.console.info("Global read lock acquired");
                return Ok(ReadLock::Global);
            }
            Err(e) if e.is_privilege() => {
                debug!("FLUSH TABLES WITH READ LOCK refused: {}", e);
                self.console.warning(
                    "The current user lacks privileges to acquire a global read lock using 'FLUSH TABLES WITH READ LOCK'. Falling back to LOCK TABLES...",
                );
            }
            Err(e) => return Err(e.into()),
        }

        let mut locked: Vec<String> = tables.to_vec();
        if lock_grant_tables {
            locked.extend(
                MYSQL_GRANT_TABLES
                    .iter()
                    .map(|t| format!("`mysql`.{}", quote_identifier(t))),
            );
        }
        let mut result = Self::lock_tables(main, &locked).await;
        if lock_grant_tables {
            if let Err(e) = &result {
                if e.is_privilege() {
                    self.console.warning(format!(
                        "Could not lock the mysql grant tables: {}. Accounts created or changed while the dump runs may not be dumped consistently.",
                        e
                    ));
                    result = Self::lock_tables(main, tables).await;
                }
            }
        }
        match result {
            Ok(()) => {
                self.console.info("Table locks acquired");
                Ok(ReadLock::Tables)
            }
            Err(e) if e.is_privilege() => Err(Error::privilege(
                "LOCK TABLES",
                "Unable to acquire global read lock neither table read locks",
                Some(e),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn lock_tables(main: &mut dyn Session, tables: &[String]) -> SessionResult<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let list: Vec<String> = tables.iter().map(|t| format!("{} READ", t)).collect();
        main.execute(&format!("LOCK TABLES {}", list.join(", ")))
            .await
            .map(|_| ())
    }

    async fn backup_lock(&self, main: &mut dyn Session) -> bool {
        match main.execute("LOCK INSTANCE FOR BACKUP").await {
            Ok(_) => {
                debug!("Backup lock acquired");
                true
            }
            Err(e) => {
                debug!("LOCK INSTANCE FOR BACKUP failed: {}", e);
                if !self.config.skip_consistency_checks {
                    self.console.warning(
                        "Backup lock is not available to the account, DDL changes will not be blocked. The dump may fail with an error if schema changes are made while dumping.",
                    );
                }
                false
            }
        }
    }

    /// Read `gtid_executed` and the current binary log coordinates
    pub async fn read_position(&self, main: &mut dyn Session) -> Result<Position> {
        let gtid_enabled = main
            .variable("GLOBAL.gtid_mode")
            .await?
            .is_some_and(|m| m.to_ascii_uppercase().starts_with("ON"));
        let gtid_executed = main
            .variable("GLOBAL.gtid_executed")
            .await?
            .map(|g| g.replace('\n', ""))
            .unwrap_or_default();

        let status = if self
            .server_version
            .is_some_and(|v| v >= Version::new(8, 2, 0))
        {
            "SHOW BINARY LOG STATUS"
        } else {
            "SHOW MASTER STATUS"
        };
        let binlog = match main.query(status).await {
            Ok(rows) => rows.first().and_then(|row| {
                let file = row.text_or_empty(0);
                (!file.is_empty()).then(|| BinlogPosition {
                    file,
                    position: row.u64(1).unwrap_or_default(),
                })
            }),
            Err(e) if e.is_privilege() => {
                self.console.warning(format!(
                    "Could not fetch the binary log information: {}",
                    e
                ));
                None
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Position {
            gtid_enabled,
            gtid_executed,
            binlog,
        })
    }

    /// Look for schema changes made since the snapshot
    ///
    /// Only runs for consistent dumps that could not take the backup lock.
    /// Schema changes are an error when GTIDs are disabled, since the dump
    /// then has no way to tell which state it captured.
    pub async fn check_drift(
        &self,
        main: &mut dyn Session,
        snapshot: &Snapshot,
        schemas: &[String],
        case_insensitive: bool,
    ) -> Result<()> {
        if !self.config.consistent || snapshot.backup_lock || self.config.skip_consistency_checks {
            return Ok(());
        }
        let now = self.read_position(main).await?;
        let start = &snapshot.position;
        let advanced = if start.gtid_enabled {
            now.gtid_executed != start.gtid_executed
        } else {
            now.binlog != start.binlog
        };
        if !advanced {
            debug!("No transactions were committed while the DDL was dumped");
            return Ok(());
        }
        let Some(from) = start.binlog.as_ref() else {
            self.console.warning(
                "Transactions were committed while the DDL was dumped, but the binary log position is unknown and schema changes cannot be checked.",
            );
            return Ok(());
        };

        let events = match self.binlog_events(main, from, now.binlog.as_ref()).await {
            Ok(events) => events,
            Err(e) if e.is_privilege() => {
                self.console.warning(format!(
                    "Could not read the binary log to check for schema changes: {}",
                    e
                ));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let transactions = events
            .iter()
            .filter(|e| e.event_type.ends_with("Gtid"))
            .count()
            .max(1);
        self.console.note(format!(
            "Checking {} recent transactions for schema changes, use \"skipConsistencyChecks\" to skip this check.",
            transactions
        ));

        let changes: Vec<&str> = events
            .iter()
            .filter(|e| e.event_type == "Query" && DDL_RE.is_match(&e.info))
            .filter(|e| touches_schemas(&e.info, schemas, case_insensitive))
            .map(|e| e.info.as_str())
            .collect();
        if changes.is_empty() {
            self.console.warning(format!(
                "{} transactions were committed while the DDL was dumped, no schema changes were found.",
                transactions
            ));
            return Ok(());
        }

        self.console
            .warning("DDL changes detected during DDL dump without a lock.");
        for statement in &changes {
            self.console.note(format!("  {}", statement));
        }
        if !start.gtid_enabled {
            return Err(Error::Consistency(format!(
                "{} schema changes were made while dumping without a backup lock and GTIDs are disabled; the dump is not consistent",
                changes.len()
            )));
        }
        Ok(())
    }

    async fn binlog_events(
        &self,
        main: &mut dyn Session,
        from: &BinlogPosition,
        to: Option<&BinlogPosition>,
    ) -> SessionResult<Vec<BinlogEvent>> {
        let mut files: Vec<String> = match main.query("SHOW BINARY LOGS").await {
            Ok(rows) => rows.iter().map(|r| r.text_or_empty(0)).collect(),
            Err(e) if e.is_privilege() => return Err(e),
            Err(e) => {
                debug!("SHOW BINARY LOGS failed: {}", e);
                Vec::new()
            }
        };
        files.retain(|f| *f >= from.file && to.map_or(true, |t| *f <= t.file));
        if files.is_empty() {
            files.push(from.file.clone());
        }
        files.sort();

        let mut events = Vec::new();
        for file in files {
            let sql = if file == from.file {
                format!("SHOW BINLOG EVENTS IN {} FROM {}", quote_string(&file), from.position)
            } else {
                format!("SHOW BINLOG EVENTS IN {}", quote_string(&file))
            };
            for row in main.query(&sql).await? {
                events.push(BinlogEvent {
                    event_type: row.text_or_empty(2),
                    info: row.text_or_empty(5),
                });
            }
        }
        debug!("Read {} binary log events since {}:{}", events.len(), from.file, from.position);
        Ok(events)
    }

    /// Release the backup lock
    pub async fn finish(&self, main: &mut dyn Session, snapshot: &Snapshot) {
        if snapshot.backup_lock {
            if let Err(e) = main.execute("UNLOCK INSTANCE").await {
                warn!("Failed to release the backup lock: {}", e);
            }
        }
    }
}

/// Whether a DDL statement from the binary log refers to one of `schemas`
fn touches_schemas(statement: &str, schemas: &[String], case_insensitive: bool) -> bool {
    if schemas.is_empty() {
        return true;
    }
    let wanted: Vec<String> = schemas.iter().map(|s| fold_case(s, case_insensitive)).collect();
    let matches = |caps: &regex::Captures<'_>| {
        let name = match (caps.get(1), caps.get(2)) {
            (Some(quoted), _) => quoted.as_str().replace("``", "`"),
            (None, Some(bare)) => bare.as_str().to_string(),
            (None, None) => return false,
        };
        wanted.contains(&fold_case(&name, case_insensitive))
    };
    if let Some(caps) = USE_RE.captures(statement) {
        let current = fold_case(&caps[1].replace("``", "`"), case_insensitive);
        if wanted.contains(&current) {
            return true;
        }
    }
    SCHEMA_DDL_RE.captures_iter(statement).any(|c| matches(&c))
        || QUALIFIED_RE.captures_iter(statement).any(|c| matches(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_session::testing::{Reply, Script, ScriptedFactory};

    fn config(consistent: bool) -> CoordinatorConfig {
        CoordinatorConfig {
            threads: 2,
            consistent,
            tz_utc: true,
            skip_consistency_checks: false,
            session_init_sql: vec!["SET @x = 1".into()],
        }
    }

    fn position_script(script: Script) -> Script {
        script
            .on("@@GLOBAL.gtid_mode", Reply::value("@@GLOBAL.gtid_mode", "ON"))
            .on(
                "@@GLOBAL.gtid_executed",
                Reply::value("@@GLOBAL.gtid_executed", "3e11fa47:1-10"),
            )
            .rows(
                "SHOW MASTER STATUS",
                &["File", "Position"],
                vec![vec!["binlog.000003".into(), 157u64.into()]],
            )
    }

    #[tokio::test]
    async fn test_global_lock_sequence() {
        let factory = ScriptedFactory::new(position_script(Script::new()));
        let console = Console::capture();
        let coordinator = Coordinator::new(config(true), console.clone(), None);
        let mut main = factory.connect().await.unwrap();

        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &[], false)
            .await
            .unwrap();
        assert_eq!(pool.size(), 2);
        assert_eq!(snapshot.read_lock, ReadLock::Global);
        assert!(snapshot.backup_lock);
        assert_eq!(snapshot.position.gtid_executed, "3e11fa47:1-10");
        assert_eq!(
            snapshot.position.binlog,
            Some(BinlogPosition {
                file: "binlog.000003".into(),
                position: 157
            })
        );

        let log = factory.sql_log();
        let at = |sql: &str| log.iter().position(|s| s == sql).unwrap();
        assert!(at("FLUSH TABLES WITH READ LOCK") < at("START TRANSACTION WITH CONSISTENT SNAPSHOT"));
        assert!(at("LOCK INSTANCE FOR BACKUP") < at("UNLOCK TABLES"));
        assert_eq!(factory.matching("START TRANSACTION WITH CONSISTENT SNAPSHOT").len(), 2);
        assert_eq!(factory.matching("SET SESSION time_zone = '\\+00:00'").len(), 2);
        // init SQL follows the snapshot start on each session
        assert!(at("START TRANSACTION WITH CONSISTENT SNAPSHOT") < at("SET @x = 1"));
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_falls_back_to_table_locks() {
        let script = position_script(Script::new())
            .fail("FLUSH TABLES", 1227, "Access denied; you need the RELOAD privilege")
            .fail("LOCK TABLES .*`mysql`", 1142, "SELECT command denied to user");
        let factory = ScriptedFactory::new(script);
        let console = Console::capture();
        let coordinator = Coordinator::new(config(true), console.clone(), None);
        let mut main = factory.connect().await.unwrap();

        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &["`s`.`t`".to_string()], true)
            .await
            .unwrap();
        assert_eq!(snapshot.read_lock, ReadLock::Tables);
        assert!(console.contains("Falling back to LOCK TABLES"));
        assert!(console.contains("Could not lock the mysql grant tables"));
        assert_eq!(factory.matching("^LOCK TABLES `s`.`t` READ$").len(), 1);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_lock_available() {
        let script = Script::new()
            .fail("FLUSH TABLES", 1227, "Access denied")
            .fail("LOCK TABLES", 1044, "Access denied");
        let factory = ScriptedFactory::new(script);
        let coordinator = Coordinator::new(config(true), Console::capture(), None);
        let mut main = factory.connect().await.unwrap();

        let Err(err) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &["`s`.`t`".to_string()], false)
            .await
        else {
            panic!("the dump started without any lock");
        };
        assert!(matches!(err, Error::Privilege { .. }));
        assert!(err.to_string().contains("neither table read locks"));
        // no worker was opened
        assert!(factory.matching("START TRANSACTION").is_empty());
    }

    #[tokio::test]
    async fn test_inconsistent_dump_takes_no_lock() {
        let factory = ScriptedFactory::new(position_script(Script::new()));
        let coordinator = Coordinator::new(config(false), Console::capture(), None);
        let mut main = factory.connect().await.unwrap();
        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &[], false)
            .await
            .unwrap();
        assert_eq!(snapshot.read_lock, ReadLock::None);
        assert!(factory.matching("FLUSH TABLES|LOCK|START TRANSACTION").is_empty());
        pool.close().await.unwrap();
    }

    fn drift_script(gtid_mode: &str) -> Script {
        Script::new()
            .on("@@GLOBAL.gtid_mode", Reply::value("@@GLOBAL.gtid_mode", gtid_mode))
            .on_times(
                "@@GLOBAL.gtid_executed",
                1,
                Reply::value("@@GLOBAL.gtid_executed", "3e11fa47:1-10"),
            )
            .on(
                "@@GLOBAL.gtid_executed",
                Reply::value("@@GLOBAL.gtid_executed", "3e11fa47:1-12"),
            )
            .on_times(
                "SHOW MASTER STATUS",
                1,
                Reply::rows(
                    &["File", "Position"],
                    vec![vec!["binlog.000003".into(), 157u64.into()]],
                ),
            )
            .rows(
                "SHOW MASTER STATUS",
                &["File", "Position"],
                vec![vec!["binlog.000003".into(), 900u64.into()]],
            )
            .rows(
                "SHOW BINARY LOGS",
                &["Log_name", "File_size"],
                vec![
                    vec!["binlog.000002".into(), 100u64.into()],
                    vec!["binlog.000003".into(), 900u64.into()],
                ],
            )
            .rows(
                "SHOW BINLOG EVENTS IN 'binlog.000003' FROM 157",
                &["Log_name", "Pos", "Event_type", "Server_id", "End_log_pos", "Info"],
                vec![
                    vec![
                        "binlog.000003".into(),
                        157u64.into(),
                        "Gtid".into(),
                        1u64.into(),
                        236u64.into(),
                        "SET @@SESSION.GTID_NEXT= '3e11fa47:11'".into(),
                    ],
                    vec![
                        "binlog.000003".into(),
                        236u64.into(),
                        "Query".into(),
                        1u64.into(),
                        400u64.into(),
                        "use `world`; CREATE TABLE `t2` (a int) /* xid=5 */".into(),
                    ],
                    vec![
                        "binlog.000003".into(),
                        400u64.into(),
                        "Gtid".into(),
                        1u64.into(),
                        480u64.into(),
                        "SET @@SESSION.GTID_NEXT= '3e11fa47:12'".into(),
                    ],
                    vec![
                        "binlog.000003".into(),
                        480u64.into(),
                        "Query".into(),
                        1u64.into(),
                        900u64.into(),
                        "use `other`; DROP TABLE `x` /* generated by server */".into(),
                    ],
                ],
            )
            .fail("LOCK INSTANCE FOR BACKUP", 1227, "Access denied; you need the BACKUP_ADMIN privilege")
    }

    #[tokio::test]
    async fn test_drift_without_backup_lock() {
        let factory = ScriptedFactory::new(drift_script("ON"));
        let console = Console::capture();
        let coordinator = Coordinator::new(config(true), console.clone(), None);
        let mut main = factory.connect().await.unwrap();
        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &[], false)
            .await
            .unwrap();
        assert!(!snapshot.backup_lock);

        coordinator
            .check_drift(main.as_mut(), &snapshot, &["world".to_string()], false)
            .await
            .unwrap();
        assert!(console.contains("NOTE: Checking 2 recent transactions for schema changes"));
        assert!(console.contains("WARNING: DDL changes detected during DDL dump without a lock."));
        assert!(console.contains("CREATE TABLE `t2`"));
        // statements on schemas that are not dumped are not reported
        assert!(!console.contains("DROP TABLE `x`"));
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_drift_without_gtid_is_fatal() {
        let factory = ScriptedFactory::new(drift_script("OFF"));
        let coordinator = Coordinator::new(config(true), Console::capture(), None);
        let mut main = factory.connect().await.unwrap();
        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &[], false)
            .await
            .unwrap();
        let err = coordinator
            .check_drift(main.as_mut(), &snapshot, &["world".to_string()], false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Consistency(_)));
        pool.close().await.unwrap();
    }

    #[test]
    fn test_touches_schemas() {
        let schemas = vec!["world".to_string()];
        assert!(touches_schemas("use `world`; ALTER TABLE t ADD c int", &schemas, false));
        assert!(touches_schemas("use `x`; ALTER TABLE `world`.t ADD c int", &schemas, false));
        assert!(!touches_schemas("use `x`; ALTER TABLE t ADD c int", &schemas, false));
        assert!(touches_schemas("use `x`; ALTER TABLE t ADD c int", &[], false));

        assert!(touches_schemas("CREATE TABLE world.new_t (a int)", &schemas, false));
        assert!(touches_schemas("RENAME TABLE t1 TO world . t2", &schemas, false));
        assert!(touches_schemas("ALTER TABLE world.`t` ADD c int", &schemas, false));
        assert!(!touches_schemas("CREATE TABLE world2.t (a int)", &schemas, false));
        assert!(!touches_schemas("CREATE TABLE t (a decimal(5,2) DEFAULT 1.5)", &schemas, false));

        assert!(touches_schemas("DROP DATABASE world", &schemas, false));
        assert!(touches_schemas("DROP SCHEMA IF EXISTS `world`", &schemas, false));
        assert!(touches_schemas("ALTER DATABASE world CHARACTER SET utf8mb4", &schemas, false));
        assert!(!touches_schemas("CREATE DATABASE worlds", &schemas, false));

        assert!(!touches_schemas("CREATE TABLE WORLD.t (a int)", &schemas, false));
        assert!(touches_schemas("CREATE TABLE WORLD.t (a int)", &schemas, true));
        assert!(touches_schemas("DROP DATABASE `World`", &schemas, true));
    }

    #[tokio::test]
    async fn test_drift_with_unqualified_session() {
        let factory = ScriptedFactory::new(drift_script("ON"));
        factory.prepend(Script::new().rows(
            "SHOW BINLOG EVENTS IN 'binlog.000003' FROM 157",
            &["Log_name", "Pos", "Event_type", "Server_id", "End_log_pos", "Info"],
            vec![
                vec![
                    "binlog.000003".into(),
                    157u64.into(),
                    "Gtid".into(),
                    1u64.into(),
                    236u64.into(),
                    "SET @@SESSION.GTID_NEXT= '3e11fa47:11'".into(),
                ],
                vec![
                    "binlog.000003".into(),
                    236u64.into(),
                    "Query".into(),
                    1u64.into(),
                    400u64.into(),
                    "CREATE TABLE s.new_t (a int)".into(),
                ],
            ],
        ));
        let console = Console::capture();
        let coordinator = Coordinator::new(config(true), console.clone(), None);
        let mut main = factory.connect().await.unwrap();
        let (pool, snapshot) = coordinator
            .start(main.as_mut(), Arc::new(factory.clone()), &[], false)
            .await
            .unwrap();
        coordinator
            .check_drift(main.as_mut(), &snapshot, &["s".to_string()], false)
            .await
            .unwrap();
        assert!(console.contains("NOTE: Checking 1 recent transactions for schema changes"));
        assert!(console.contains("WARNING: DDL changes detected during DDL dump without a lock."));
        assert!(console.contains("CREATE TABLE s.new_t"));
        pool.close().await.unwrap();
    }
}
