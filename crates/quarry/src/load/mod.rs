//! Load driver
//!
//! Phases run in this order, each one finished before the next starts:
//!
//! 1. `@.sql` and user accounts
//! 2. schema DDL
//! 3. table DDL and view placeholder tables
//! 4. data chunks, as they appear when the dump is still being written
//! 5. deferred secondary indexes
//! 6. libraries, routines, views, triggers, events and `@.post.sql`
//! 7. grants
//! 8. `ANALYZE TABLE`
//! 9. checksum verification
//! 10. `gtid_purged`
//!
//! Every unit of work is recorded in the progress ledger, so a load that is
//! run again skips what an earlier run finished.

mod ddl;
mod scheduler;
mod source;
mod worker;

use futures::future::join_all;
use parking_lot::Mutex;
use quarry_session::prelude::*;
use quarry_storage::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{read_server_info, RoutineKind, ServerInfo};
use crate::checksum::{self, ChecksumFile, ChecksumRecord, CHECKSUMS_FILE};
use crate::console::{format_bytes, format_duration, format_throughput, Console, Progress};
use crate::error::{Error, FirstError, Result};
use crate::filter::FilterSet;
use crate::ident::{
    fold_case, format_account, parse_account, quote_identifier, quote_qualified, quote_string,
};
use crate::layout::{self, DataFile, DoneMarker, Manifest, TableDescriptor, UserBlock};
use crate::ledger::{self, event, ProgressLedger};
use crate::options::{AnalyzeTables, HandleGrantErrors, LoadOptions, UpdateGtidSet};
use crate::script::split_statements;

use ddl::{
    find_existing, run_ddl_worker, run_statements, DdlContext, DdlKind, DdlTask,
    DeferredIndexes, ExistingObject, ObjectKind, TaskAction,
};
use scheduler::{DataJob, Scheduler};
use source::{DumpContents, DumpSource};
use worker::{run_loader, ChunkLoaded, LoadContext};

/// Totals of a finished load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub schemas: u64,
    pub tables: u64,
    pub chunks: u64,
    pub rows: u64,
    /// Bytes read from the dump
    pub bytes: u64,
    /// Bytes of rows sent to the server
    pub data_bytes: u64,
    pub ddl_files: u64,
    pub indexes: u64,
    pub users: u64,
    /// Warnings the server reported for `LOAD DATA`
    pub warnings: u64,
    /// Chunks an earlier run loaded
    pub skipped_chunks: u64,
    pub elapsed: Duration,
    pub data_elapsed: Duration,
    pub ddl_elapsed: Duration,
    pub dry_run: bool,
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("Loader task failed: {}", e)))
}

/// Ledger target of a routine, event, library or triggers file
fn object_target(keyword: &str, schema: &str, name: &str) -> String {
    format!("{} {}", keyword, quote_qualified(schema, name))
}

/// Objects of the dump that exist in the target and are left alone
#[derive(Debug, Default)]
struct Ignored {
    case_insensitive: bool,
    objects: BTreeSet<(String, ObjectKind, String)>,
}

impl Ignored {
    fn key(&self, schema: &str, kind: ObjectKind, name: &str) -> (String, ObjectKind, String) {
        (
            fold_case(schema, self.case_insensitive),
            kind,
            fold_case(name, self.case_insensitive),
        )
    }

    fn insert(&mut self, object: &ExistingObject) {
        let key = self.key(&object.schema, object.kind, &object.name);
        self.objects.insert(key);
    }

    fn contains(&self, schema: &str, kind: ObjectKind, name: &str) -> bool {
        self.objects.contains(&self.key(schema, kind, name))
    }

    /// Tables and views share a namespace
    fn contains_relation(&self, schema: &str, name: &str) -> bool {
        self.contains(schema, ObjectKind::Table, name) || self.contains(schema, ObjectKind::View, name)
    }
}

/// What one run loads, worked out before any change is made
struct LoadPlan {
    source: DumpSource,
    manifest: Manifest,
    contents: DumpContents,
    users: Vec<UserBlock>,
    ledger: Arc<ProgressLedger>,
    ignored: Ignored,
    /// Folded names of schemas the target already has
    existing_schemas: BTreeSet<String>,
    charset: String,
    case_insensitive: bool,
    bulk_load: bool,
}

impl LoadPlan {
    fn schema_exists(&self, schema: &str) -> bool {
        self.existing_schemas
            .contains(&fold_case(schema, self.case_insensitive))
    }
}

/// A table whose data is loaded
struct DataTable {
    target: String,
    table: Arc<TableDescriptor>,
}

#[derive(Serialize)]
struct DumpMetadata<'a> {
    #[serde(rename = "Binlog_file", skip_serializing_if = "Option::is_none")]
    binlog_file: Option<&'a str>,
    #[serde(rename = "Binlog_position", skip_serializing_if = "Option::is_none")]
    binlog_position: Option<u64>,
    #[serde(rename = "Executed_GTID_set")]
    gtid_executed: &'a str,
}

#[derive(Serialize)]
struct Metadata<'a> {
    #[serde(rename = "Dump_metadata")]
    dump_metadata: DumpMetadata<'a>,
}

/// Set the session state every load session runs with
async fn configure(session: &mut dyn Session, config: &PoolConfig) -> Result<()> {
    for (name, value) in &config.variables {
        session
            .execute(&format!("SET SESSION {} = {}", name, value))
            .await?;
    }
    for sql in &config.init_sql {
        session.execute(sql).await?;
    }
    Ok(())
}

async fn check_local_infile(session: &mut dyn Session) -> Result<()> {
    let value = session.variable("GLOBAL.local_infile").await?;
    if value.is_some_and(|v| v == "0" || v.eq_ignore_ascii_case("OFF")) {
        return Err(Error::Incompatible(
            "The 'local_infile' global system variable must be set to ON in the target server, after the server is verified to be trusted."
                .to_string(),
        ));
    }
    Ok(())
}

async fn existing_schemas(
    session: &mut dyn Session,
    contents: &DumpContents,
    case_insensitive: bool,
) -> Result<BTreeSet<String>> {
    if contents.schemas.is_empty() {
        return Ok(BTreeSet::new());
    }
    let list = contents
        .schemas
        .iter()
        .map(|s| quote_string(s.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let rows = session
        .query(&format!(
            "SELECT SCHEMA_NAME FROM information_schema.schemata WHERE SCHEMA_NAME IN ({})",
            list
        ))
        .await?;
    Ok(rows
        .iter()
        .map(|r| fold_case(&r.text_or_empty(0), case_insensitive))
        .collect())
}

/// Verify checksum records from `queue` until it is empty or the load failed
async fn run_checksum_worker(
    pool: Arc<SessionPool>,
    queue: Arc<Mutex<VecDeque<ChecksumRecord>>>,
    first_error: FirstError,
) {
    let mut session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            first_error.record(e.into());
            return;
        }
    };
    while !first_error.is_cancelled() {
        let Some(record) = queue.lock().pop_front() else {
            break;
        };
        if let Err(e) = checksum::verify(&mut *session, &record).await {
            first_error.record(e);
            break;
        }
    }
    pool.release(session);
}

/// Runs one load
pub struct Loader {
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    options: LoadOptions,
    console: Console,
    token: CancellationToken,
    /// How long to wait for files of an unfinished dump, `None` waits forever
    wait: Option<Duration>,
    remove_loaded: bool,
}

impl Loader {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        storage: Arc<dyn Storage>,
        options: LoadOptions,
        console: Console,
    ) -> Self {
        let wait = Some(options.wait_timeout());
        Self {
            factory,
            storage,
            options,
            console,
            token: CancellationToken::new(),
            wait,
            remove_loaded: false,
        }
    }

    /// Cancel the load through `token`; a failing load cancels it too
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub(crate) fn with_wait(mut self, wait: Option<Duration>) -> Self {
        self.wait = wait;
        self
    }

    /// Remove data files once they are loaded
    pub(crate) fn consume_files(mut self) -> Self {
        self.remove_loaded = true;
        self
    }

    pub async fn run(self) -> Result<LoadSummary> {
        let started = Instant::now();
        self.options.validate_all()?;
        let filters = FilterSet::compile(&self.options.filters)?;
        let source = DumpSource::new(self.storage.clone(), self.wait);
        info!(
            "Loading {} into {}",
            self.storage.describe(),
            self.factory.describe()
        );
        self.console
            .info(format!("Opening dump in {}", self.storage.describe()));
        let manifest = source.manifest().await?;
        if self.options.show_metadata {
            self.show_metadata(&manifest)?;
        }

        let mut main = self.factory.connect().await?;
        let result = self
            .load(main.as_mut(), source, manifest, &filters, started)
            .await;
        if let Err(e) = main.close().await {
            debug!("Closing the main session failed: {}", e);
        }
        if result.is_err() {
            self.token.cancel();
        }
        result
    }

    fn show_metadata(&self, manifest: &Manifest) -> Result<()> {
        let metadata = Metadata {
            dump_metadata: DumpMetadata {
                binlog_file: manifest.binlog_file.as_deref(),
                binlog_position: manifest.binlog_position,
                gtid_executed: &manifest.gtid_executed,
            },
        };
        let yaml = serde_yaml::to_string(&metadata)?;
        for line in yaml.lines() {
            self.console.print(line);
        }
        Ok(())
    }

    fn check_version(&self, manifest: &Manifest, server: &ServerInfo) -> Result<()> {
        self.console.info(format!(
            "Target is MySQL {}. Dump was produced from MySQL {}",
            server.version_string, manifest.server_version
        ));
        let (Some(dumped), Some(target)) = (manifest.server_version(), server.version) else {
            return Ok(());
        };
        if dumped.major == target.major {
            return Ok(());
        }
        let message = format!(
            "Destination MySQL version {} is a different major version than the one where the dump was created ({}).",
            target, dumped
        );
        if self.options.ignore_version {
            self.console.warning(format!(
                "{} Loading dumps between major versions is not fully supported; the 'ignoreVersion' option is enabled, so the load continues.",
                message
            ));
            Ok(())
        } else {
            self.console.error(&message);
            Err(Error::Incompatible(format!(
                "{} Enable the 'ignoreVersion' option to load anyway.",
                message
            )))
        }
    }

    async fn open_ledger(&self, server: &ServerInfo) -> Result<ProgressLedger> {
        let reset = self.options.reset_progress;
        let ledger = match self.options.progress_file.as_deref() {
            Some("") => ProgressLedger::disabled(),
            Some(path) => ProgressLedger::open(path, reset).await?,
            None => match self.storage.local_root() {
                Some(root) => {
                    ProgressLedger::open(root.join(ledger::default_file_name(&server.server_uuid)), reset)
                        .await?
                }
                None => {
                    self.console.note(
                        "Load progress is not recorded for a remote dump unless the 'progressFile' option is set.",
                    );
                    ProgressLedger::disabled()
                }
            },
        };
        if ledger.replayed() > 0 {
            self.console.note(
                "Load progress file detected. Load will be resumed from where it was left, assuming no external updates were made. Enable the 'resetProgress' option to discard the progress and load everything again.",
            );
        }
        Ok(ledger)
    }

    async fn read_users(
        &self,
        main: &mut dyn Session,
        source: &DumpSource,
        manifest: &Manifest,
        filters: &FilterSet,
    ) -> Result<Vec<UserBlock>> {
        if !self.options.load_users {
            return Ok(Vec::new());
        }
        if manifest.users.is_empty() || manifest.data_only {
            self.console
                .note("The dump does not contain user accounts, the 'loadUsers' option has no effect.");
            return Ok(Vec::new());
        }
        let text = source.require_text(layout::USERS_FILE).await?;
        let current = main
            .query_text("SELECT CURRENT_USER()")
            .await?
            .and_then(|c| parse_account(&c).ok())
            .map(|(u, h)| format_account(&u, h.as_deref().unwrap_or("%")));

        let mut users = Vec::new();
        for block in layout::parse_users_script(&text)? {
            let (user, host) = parse_account(&block.account)
                .map_err(|e| Error::dump(format!("{}: {}", layout::USERS_FILE, e)))?;
            let host = host.unwrap_or_else(|| "%".to_string());
            if !filters.user_included(&user, &host) {
                continue;
            }
            if current.as_deref() == Some(format_account(&user, &host).as_str()) {
                self.console.note(format!(
                    "Skipping account {}, it is the account running the load",
                    block.account
                ));
                continue;
            }
            users.push(block);
        }
        Ok(users)
    }

    async fn load(
        &self,
        main: &mut dyn Session,
        source: DumpSource,
        manifest: Manifest,
        filters: &FilterSet,
        started: Instant,
    ) -> Result<LoadSummary> {
        let options = &self.options;
        let server = read_server_info(main).await?;
        self.check_version(&manifest, &server)?;
        if options.load_data && !options.dry_run {
            check_local_infile(main).await?;
        }
        let ledger = Arc::new(self.open_ledger(&server).await?);
        if ledger.is_complete() {
            self.console
                .info("There was no remaining data left to be loaded.");
            return Ok(LoadSummary {
                elapsed: started.elapsed(),
                ..Default::default()
            });
        }

        let done = source.done_marker().await?;
        if done.is_none() {
            if !source.waits() {
                return Err(Error::dump(format!(
                    "The dump in {} is incomplete: {} is missing. Set the 'waitDumpTimeout' option to load a dump that is still being written.",
                    self.storage.describe(),
                    layout::DONE_FILE
                )));
            }
            self.console
                .note("Dump is still ongoing, data will be loaded as it becomes available.");
        }

        let case_insensitive = server.lower_case_table_names != 0;
        let mut contents = source.contents(&manifest).await?;
        contents.apply_filters(filters, server.lower_case_table_names)?;
        let users = self.read_users(main, &source, &manifest, filters).await?;
        let charset = options
            .character_set
            .clone()
            .unwrap_or_else(|| manifest.default_character_set.clone());
        let bulk_load = !options.disable_bulk_load
            && !self.storage.is_local()
            && main
                .variable("GLOBAL.bulk_loader.concurrency")
                .await?
                .is_some();
        debug!("Bulk load {}", if bulk_load { "enabled" } else { "disabled" });

        let mut plan = LoadPlan {
            source,
            manifest,
            contents,
            users,
            ledger,
            ignored: Ignored {
                case_insensitive,
                ..Default::default()
            },
            existing_schemas: BTreeSet::new(),
            charset,
            case_insensitive,
            bulk_load,
        };
        if options.load_ddl {
            self.check_existing(main, &mut plan).await?;
        }
        if options.dry_run {
            return Ok(self.dry_run(&plan, done.as_ref(), started));
        }

        self.console.info(format!(
            "Loading {} from {} using {} threads.",
            match (options.load_ddl, options.load_data) {
                (true, true) => "DDL and Data",
                (true, false) => "DDL",
                (false, true) => "Data",
                (false, false) => "nothing",
            },
            self.storage.describe(),
            options.threads
        ));
        let config = self.pool_config(&plan);
        configure(main, &config).await?;
        let pool = Arc::new(SessionPool::open(self.factory.clone(), config).await?);
        let result = self.run_phases(main, &pool, &plan, started).await;
        if let Err(e) = pool.close().await {
            debug!("Closing the worker sessions failed: {}", e);
        }
        result
    }

    fn pool_config(&self, plan: &LoadPlan) -> PoolConfig {
        let mut config = PoolConfig::new(self.options.threads.max(1))
            .with_variable("sql_mode", "''")
            .with_variable("foreign_key_checks", "0")
            .with_variable("unique_checks", "0");
        if self.options.skip_binlog {
            config = config.with_variable("sql_log_bin", "0");
        }
        if plan.manifest.tz_utc {
            config = config.with_variable("time_zone", "'+00:00'");
        }
        config
            .with_init_sql("SET SESSION TRANSACTION ISOLATION LEVEL READ UNCOMMITTED")
            .with_init_sql(format!("SET NAMES {}", quote_string(&plan.charset)))
            .with_init_sql_all(self.options.session_init_sql.iter().cloned())
    }

    /// Ledger event and target that create `object`
    fn ledger_key(plan: &LoadPlan, object: &ExistingObject) -> Option<(&'static str, String)> {
        let qualified = quote_qualified(&object.schema, &object.name);
        Some(match object.kind {
            ObjectKind::Table => (event::TABLE_DDL, qualified),
            ObjectKind::View => (event::VIEW_DDL, qualified),
            ObjectKind::Function => (
                event::OBJECT_DDL,
                object_target("FUNCTION", &object.schema, &object.name),
            ),
            ObjectKind::Procedure => (
                event::OBJECT_DDL,
                object_target("PROCEDURE", &object.schema, &object.name),
            ),
            ObjectKind::Event => (
                event::OBJECT_DDL,
                object_target("EVENT", &object.schema, &object.name),
            ),
            ObjectKind::Library => (
                event::OBJECT_DDL,
                object_target("LIBRARY", &object.schema, &object.name),
            ),
            ObjectKind::Trigger => {
                let fold = |s: &str| fold_case(s, plan.case_insensitive);
                let table = plan.contents.tables().find(|t| {
                    fold(&t.schema) == fold(&object.schema)
                        && t.triggers.iter().any(|n| fold(n) == fold(&object.name))
                })?;
                (
                    event::OBJECT_DDL,
                    object_target("TRIGGERS", &table.schema, &table.table),
                )
            }
        })
    }

    /// Look for objects of the dump in the target
    async fn check_existing(&self, main: &mut dyn Session, plan: &mut LoadPlan) -> Result<()> {
        self.console.info("Checking for pre-existing objects...");
        plan.existing_schemas = existing_schemas(main, &plan.contents, plan.case_insensitive).await?;
        let found: Vec<ExistingObject> = find_existing(main, &plan.contents, plan.case_insensitive)
            .await?
            .into_iter()
            .filter(|o| {
                // created by an earlier run of this load
                !Self::ledger_key(plan, o)
                    .is_some_and(|(e, target)| plan.ledger.is_done(e, &target, None))
            })
            .collect();
        if found.is_empty() {
            return Ok(());
        }

        let options = &self.options;
        if options.drop_existing_objects {
            for object in &found {
                if options.dry_run {
                    self.console
                        .note(format!("{}, it would be dropped", object.describe()));
                    continue;
                }
                self.console
                    .note(format!("{}, dropping it", object.describe()));
                main.execute(&object.drop_sql())
                    .await
                    .map_err(|e| Error::ddl(quote_qualified(&object.schema, &object.name), e))?;
            }
            Ok(())
        } else if options.ignore_existing_objects {
            for object in &found {
                self.console.warning(object.describe());
                plan.ignored.insert(object);
            }
            self.console.note(
                "One or more objects in the dump already exist in the destination database but will be ignored because the 'ignoreExistingObjects' option was enabled.",
            );
            Ok(())
        } else {
            for object in &found {
                self.console.error(object.describe());
            }
            self.console.error(
                "One or more objects in the dump already exist in the destination database. You must either DROP these objects or exclude them from the load.",
            );
            Err(Error::ExistingObjects(
                found.iter().map(|o| o.describe()).collect(),
            ))
        }
    }

    fn dry_run(&self, plan: &LoadPlan, done: Option<&DoneMarker>, started: Instant) -> LoadSummary {
        self.console
            .info("dryRun enabled, no changes will be made.");
        let mut summary = LoadSummary {
            schemas: plan.contents.schemas.len() as u64,
            tables: plan.contents.table_count() as u64,
            users: plan.users.len() as u64,
            dry_run: true,
            ..Default::default()
        };
        for entry in &plan.contents.schemas {
            self.console.info(format!(
                "Schema {} would be loaded with {} tables",
                quote_identifier(entry.name()),
                entry.tables.len()
            ));
        }
        if let Some(done) = done {
            for table in plan.contents.tables() {
                if let Some(chunks) = done.table(&table.schema, &table.table) {
                    summary.chunks += chunks.chunks.len() as u64;
                    summary.rows += chunks.rows();
                    summary.data_bytes += chunks.data_bytes();
                }
            }
        }
        summary.elapsed = started.elapsed();
        self.print_summary(&summary);
        summary
    }

    async fn run_phases(
        &self,
        main: &mut dyn Session,
        pool: &Arc<SessionPool>,
        plan: &LoadPlan,
        started: Instant,
    ) -> Result<LoadSummary> {
        let options = &self.options;
        let first_error = FirstError::new(self.token.clone());
        let ctx = Arc::new(DdlContext::new(
            plan.source.clone(),
            plan.ledger.clone(),
            options.defer_table_indexes,
            first_error.clone(),
        ));
        let threads = options.threads.max(1);
        let mut summary = LoadSummary {
            schemas: plan.contents.schemas.len() as u64,
            tables: plan.contents.table_count() as u64,
            users: plan.users.len() as u64,
            ..Default::default()
        };
        let mut scripts = 0;

        let ddl_started = Instant::now();
        if options.load_ddl
            && self
                .run_script(main, plan, layout::PRE_SQL_FILE, event::PRE_SQL)
                .await?
        {
            scripts += 1;
        }
        let dropped = if options.load_users {
            self.create_users(main, plan).await?
        } else {
            BTreeSet::new()
        };
        if options.load_ddl {
            self.run_ddl(pool, self.schema_tasks(plan), threads, &ctx)
                .await?;
        }
        let deferred = self
            .run_ddl(pool, self.table_tasks(plan), threads, &ctx)
            .await?;
        let mut ddl_elapsed = ddl_started.elapsed();

        let data_started = Instant::now();
        if options.load_data {
            let (loaded, skipped, warnings) =
                self.load_data(main, pool, plan, &first_error).await?;
            for chunk in &loaded {
                summary.chunks += 1;
                summary.rows += chunk.rows;
                summary.bytes += chunk.bytes;
                summary.data_bytes += chunk.data_bytes;
            }
            summary.skipped_chunks = skipped;
            summary.warnings = warnings;
        }
        summary.data_elapsed = data_started.elapsed();

        if options.load_indexes && !deferred.is_empty() {
            summary.indexes = deferred.iter().map(|d| d.statements.len() as u64).sum();
            self.console.info(format!(
                "Building indexes of {} tables",
                deferred.len()
            ));
            let tasks = deferred
                .into_iter()
                .map(|d| DdlTask::statements(event::INDEX_REBUILD, d.target, None, d.statements))
                .collect();
            self.run_ddl(pool, tasks, threads, &ctx).await?;
        }

        if options.load_ddl {
            let objects_started = Instant::now();
            for kind in [
                ObjectKind::Library,
                ObjectKind::Function,
                ObjectKind::Procedure,
                ObjectKind::View,
                ObjectKind::Trigger,
                ObjectKind::Event,
            ] {
                // a view may read another view, they are created one at a time
                let workers = if kind == ObjectKind::View { 1 } else { threads };
                self.run_ddl(pool, self.object_tasks(plan, kind), workers, &ctx)
                    .await?;
            }
            if self
                .run_script(main, plan, layout::POST_SQL_FILE, event::POST_SQL)
                .await?
            {
                scripts += 1;
            }
            ddl_elapsed += objects_started.elapsed();
        }
        summary.ddl_files = ctx.executed() + scripts;
        summary.ddl_elapsed = ddl_elapsed;

        if options.load_users {
            self.apply_grants(main, plan, &dropped).await?;
        }

        let analyze = self.analyze_tasks(plan);
        if !analyze.is_empty() {
            self.console
                .info(format!("Analyzing {} tables", analyze.len()));
            self.run_ddl(pool, analyze, threads, &ctx).await?;
        }

        if options.checksum {
            self.verify_checksums(pool, plan, &first_error).await?;
        }

        if options.update_gtid_set != UpdateGtidSet::Off {
            self.update_gtid_set(main, plan).await?;
        }

        plan.ledger.complete().await?;
        summary.elapsed = started.elapsed();
        self.print_summary(&summary);
        Ok(summary)
    }

    /// Run a global script; `false` if the dump has none
    async fn run_script(
        &self,
        main: &mut dyn Session,
        plan: &LoadPlan,
        file: &str,
        event: &'static str,
    ) -> Result<bool> {
        if plan.manifest.data_only || plan.ledger.is_done(event, file, None) {
            return Ok(false);
        }
        let text = plan.source.require_text(file).await?;
        let statements = split_statements(&text);
        plan.ledger.start(event, file, None).await?;
        if let Err(e) = run_statements(main, None, &statements, file).await {
            plan.ledger.error(event, file, None, &e.to_string()).await?;
            return Err(e);
        }
        plan.ledger.done(event, file, None).await?;
        Ok(true)
    }

    /// Run account statements, handling failures as `handleGrantErrors` says
    ///
    /// Returns `false` once the account was dropped.
    async fn run_account(
        &self,
        main: &mut dyn Session,
        account: &str,
        statements: &[String],
    ) -> Result<bool> {
        for statement in statements {
            let Err(e) = main.execute(statement).await else {
                continue;
            };
            let error = Error::grant(account, e);
            match self.options.handle_grant_errors {
                HandleGrantErrors::Abort => return Err(error),
                HandleGrantErrors::DropAccount => {
                    self.console
                        .warning(format!("{}, the account will be dropped", error));
                    main.execute(&format!("DROP USER IF EXISTS {}", account))
                        .await
                        .map_err(|e| Error::grant(account, e))?;
                    return Ok(false);
                }
                HandleGrantErrors::Ignore => {
                    self.console
                        .warning(format!("{}, the statement was ignored", error));
                }
            }
        }
        Ok(true)
    }

    /// Create the accounts, returning those dropped after an error
    async fn create_users(&self, main: &mut dyn Session, plan: &LoadPlan) -> Result<BTreeSet<String>> {
        let mut dropped = BTreeSet::new();
        if plan.users.is_empty() {
            return Ok(dropped);
        }
        self.console
            .info(format!("Creating {} user accounts", plan.users.len()));
        for user in &plan.users {
            let account = &user.account;
            if plan.ledger.is_done(event::USER, account, None) {
                continue;
            }
            plan.ledger.start(event::USER, account, None).await?;
            match self.run_account(main, account, &user.create).await {
                Ok(kept) => {
                    plan.ledger.done(event::USER, account, None).await?;
                    if !kept {
                        dropped.insert(account.clone());
                    }
                }
                Err(e) => {
                    plan.ledger
                        .error(event::USER, account, None, &e.to_string())
                        .await?;
                    return Err(e);
                }
            }
        }
        Ok(dropped)
    }

    async fn apply_grants(
        &self,
        main: &mut dyn Session,
        plan: &LoadPlan,
        dropped: &BTreeSet<String>,
    ) -> Result<()> {
        for user in &plan.users {
            let account = &user.account;
            if user.grants.is_empty()
                || dropped.contains(account)
                || plan.ledger.is_done(event::GRANTS, account, None)
            {
                continue;
            }
            plan.ledger.start(event::GRANTS, account, None).await?;
            if let Err(e) = self.run_account(main, account, &user.grants).await {
                plan.ledger
                    .error(event::GRANTS, account, None, &e.to_string())
                    .await?;
                return Err(e);
            }
            plan.ledger.done(event::GRANTS, account, None).await?;
        }
        Ok(())
    }

    /// Run `tasks` on up to `workers` pooled sessions
    async fn run_ddl(
        &self,
        pool: &Arc<SessionPool>,
        tasks: Vec<DdlTask>,
        workers: usize,
        ctx: &Arc<DdlContext>,
    ) -> Result<Vec<DeferredIndexes>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }
        let workers = workers.min(tasks.len()).max(1);
        let queue = Arc::new(Mutex::new(VecDeque::from(tasks)));
        let handles: Vec<_> = (0..workers)
            .map(|_| tokio::spawn(run_ddl_worker(pool.clone(), queue.clone(), ctx.clone())))
            .collect();
        let mut deferred = Vec::new();
        for handle in join_all(handles).await {
            deferred.extend(handle.map_err(join_error)?);
        }
        ctx.first_error.clone().into_result()?;
        Ok(deferred)
    }

    fn schema_tasks(&self, plan: &LoadPlan) -> Vec<DdlTask> {
        plan.contents
            .schemas
            .iter()
            .filter(|s| s.descriptor.include_ddl)
            .filter(|s| {
                let exists = plan.schema_exists(s.name());
                if exists {
                    debug!("Schema {} already exists", s.name());
                }
                !exists
            })
            .map(|s| {
                DdlTask::new(
                    event::SCHEMA_DDL,
                    quote_identifier(s.name()),
                    None,
                    layout::schema_sql(s.name()),
                )
            })
            .collect()
    }

    /// Tables and view placeholders
    ///
    /// Without `loadDdl` the table files are only read to learn which indexes
    /// `loadIndexes` has to build.
    fn table_tasks(&self, plan: &LoadPlan) -> Vec<DdlTask> {
        let options = &self.options;
        let indexes_only = !options.load_ddl && options.load_indexes;
        if !options.load_ddl && !indexes_only {
            return Vec::new();
        }
        let mut tasks = Vec::new();
        for entry in plan.contents.schemas.iter().filter(|s| s.descriptor.include_ddl) {
            let schema = entry.name();
            for table in &entry.tables {
                let post_ddl = if options.create_invisible_pks == Some(false) {
                    Vec::new()
                } else {
                    table.post_ddl.clone()
                };
                let action = if plan.ignored.contains_relation(schema, &table.table) {
                    TaskAction::Skip
                } else if indexes_only {
                    TaskAction::IndexesOnly
                } else {
                    TaskAction::Run
                };
                tasks.push(
                    DdlTask::new(
                        event::TABLE_DDL,
                        quote_qualified(schema, &table.table),
                        Some(schema),
                        layout::object_sql(schema, &table.table),
                    )
                    .with_kind(DdlKind::Table { post_ddl })
                    .with_action(action),
                );
            }
            if indexes_only {
                continue;
            }
            for view in &entry.descriptor.views {
                if plan.ignored.contains_relation(schema, view) {
                    continue;
                }
                tasks.push(DdlTask::new(
                    event::TABLE_DDL,
                    quote_qualified(schema, view),
                    Some(schema),
                    layout::view_pre_sql(schema, view),
                ));
            }
        }
        tasks
    }

    fn object_tasks(&self, plan: &LoadPlan, kind: ObjectKind) -> Vec<DdlTask> {
        let mut tasks = Vec::new();
        for entry in plan.contents.schemas.iter().filter(|s| s.descriptor.include_ddl) {
            let schema = entry.name();
            let d = &entry.descriptor;
            let ignored = |name: &str| plan.ignored.contains(schema, kind, name);
            match kind {
                ObjectKind::Library => {
                    for name in d.libraries.iter().filter(|n| !ignored(n)) {
                        tasks.push(DdlTask::new(
                            event::OBJECT_DDL,
                            object_target("LIBRARY", schema, name),
                            Some(schema),
                            layout::library_sql(schema, name),
                        ));
                    }
                }
                ObjectKind::Function | ObjectKind::Procedure => {
                    let (names, keyword, routine) = if kind == ObjectKind::Function {
                        (&d.functions, "FUNCTION", RoutineKind::Function)
                    } else {
                        (&d.procedures, "PROCEDURE", RoutineKind::Procedure)
                    };
                    for name in names.iter().filter(|n| !ignored(n)) {
                        tasks.push(DdlTask::new(
                            event::OBJECT_DDL,
                            object_target(keyword, schema, name),
                            Some(schema),
                            layout::routine_sql(schema, name, routine),
                        ));
                    }
                }
                ObjectKind::View | ObjectKind::Table => {
                    for name in d
                        .views
                        .iter()
                        .filter(|n| !plan.ignored.contains_relation(schema, n))
                    {
                        tasks.push(DdlTask::new(
                            event::VIEW_DDL,
                            quote_qualified(schema, name),
                            Some(schema),
                            layout::object_sql(schema, name),
                        ));
                    }
                }
                ObjectKind::Trigger => {
                    for table in entry.tables.iter().filter(|t| !t.triggers.is_empty()) {
                        let names: Vec<String> = table
                            .triggers
                            .iter()
                            .filter(|n| !ignored(n))
                            .cloned()
                            .collect();
                        if names.is_empty() {
                            continue;
                        }
                        tasks.push(
                            DdlTask::new(
                                event::OBJECT_DDL,
                                object_target("TRIGGERS", schema, &table.table),
                                Some(schema),
                                layout::triggers_sql(schema, &table.table),
                            )
                            .with_kind(DdlKind::Triggers { names }),
                        );
                    }
                }
                ObjectKind::Event => {
                    for name in d.events.iter().filter(|n| !ignored(n)) {
                        tasks.push(DdlTask::new(
                            event::OBJECT_DDL,
                            object_target("EVENT", schema, name),
                            Some(schema),
                            layout::event_sql(schema, name),
                        ));
                    }
                }
            }
        }
        tasks
    }

    fn analyze_tasks(&self, plan: &LoadPlan) -> Vec<DdlTask> {
        let mode = self.options.analyze_tables;
        if mode == AnalyzeTables::Off {
            return Vec::new();
        }
        plan.contents
            .tables()
            .filter_map(|t| {
                let target = quote_qualified(&t.schema, &t.table);
                let sql = match mode {
                    AnalyzeTables::Histogram if t.histograms.is_empty() => return None,
                    AnalyzeTables::Histogram => format!(
                        "ANALYZE TABLE {} UPDATE HISTOGRAM ON {}",
                        target,
                        t.histograms
                            .iter()
                            .map(|c| quote_identifier(c))
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                    _ => format!("ANALYZE TABLE {}", target),
                };
                Some(DdlTask::statements(event::ANALYZE, target, None, vec![sql]))
            })
            .collect()
    }

    /// Truncate tables without a unique key whose load was interrupted
    ///
    /// Returns the tables and partitions whose every chunk is loaded again.
    async fn truncate_interrupted(
        &self,
        main: &mut dyn Session,
        plan: &LoadPlan,
        tables: &[DataTable],
    ) -> Result<BTreeSet<(String, Option<String>)>> {
        let mut reload = BTreeSet::new();
        for (target, chunk) in plan.ledger.interrupted(event::DATA_CHUNK) {
            let Some(entry) = tables.iter().find(|t| t.target == target) else {
                continue;
            };
            if entry.table.has_unique_key {
                continue;
            }
            let partition = if entry.table.is_partitioned() {
                chunk
                    .as_deref()
                    .and_then(|c| c.rsplit_once('/'))
                    .map(|(p, _)| p.to_string())
            } else {
                None
            };
            if reload.contains(&(target.clone(), None))
                || !reload.insert((target.clone(), partition.clone()))
            {
                continue;
            }
            let sql = match &partition {
                Some(p) => format!(
                    "ALTER TABLE {} TRUNCATE PARTITION {}",
                    target,
                    quote_identifier(p)
                ),
                None => format!("TRUNCATE TABLE {}", target),
            };
            self.console.note(format!(
                "Table {}{} has no unique key and its load was interrupted, it is truncated and loaded again",
                target,
                partition
                    .as_deref()
                    .map(|p| format!(" partition {}", quote_identifier(p)))
                    .unwrap_or_default()
            ));
            main.execute(&sql)
                .await
                .map_err(|e| Error::data(target.clone(), chunk.clone(), e))?;
        }
        Ok(reload)
    }

    /// Load every data file, returning the loaded chunks, the chunks an
    /// earlier run loaded and the server warnings
    async fn load_data(
        &self,
        main: &mut dyn Session,
        pool: &Arc<SessionPool>,
        plan: &LoadPlan,
        first_error: &FirstError,
    ) -> Result<(Vec<ChunkLoaded>, u64, u64)> {
        let tables: Vec<DataTable> = plan
            .contents
            .schemas
            .iter()
            .filter(|s| s.descriptor.include_data)
            .flat_map(|s| s.tables.iter())
            .filter(|t| t.include_data)
            .map(|t| DataTable {
                target: quote_qualified(&t.schema, &t.table),
                table: Arc::new(t.clone()),
            })
            .collect();
        if tables.is_empty() {
            return Ok((Vec::new(), 0, 0));
        }
        let reload = self.truncate_interrupted(main, plan, &tables).await?;

        let scheduler = Arc::new(Scheduler::new());
        let ctx = Arc::new(LoadContext {
            source: plan.source.clone(),
            ledger: plan.ledger.clone(),
            charset: plan.charset.clone(),
            max_bytes_per_transaction: self.options.max_bytes_per_transaction,
            bulk_load: plan.bulk_load,
            remove_loaded: self.remove_loaded,
            progress: Arc::new(Progress::new("Load", self.options.show_progress)),
            first_error: first_error.clone(),
            console: self.console.clone(),
            warnings: AtomicU64::new(0),
        });
        let handles: Vec<_> = (0..self.options.threads.max(1))
            .map(|worker| {
                tokio::spawn(run_loader(
                    worker,
                    pool.clone(),
                    scheduler.clone(),
                    ctx.clone(),
                ))
            })
            .collect();

        let discovered = self
            .discover(plan, &tables, &reload, &scheduler, first_error)
            .await;
        scheduler.complete();
        let skipped = match discovered {
            Ok(skipped) => skipped,
            Err(e) => {
                first_error.record(e);
                0
            }
        };
        let mut loaded = Vec::new();
        for handle in join_all(handles).await {
            loaded.extend(handle.map_err(join_error)?);
        }
        first_error.clone().into_result()?;
        debug!(
            "Loaded {} chunks with {} statements",
            loaded.len(),
            loaded.iter().map(|c| c.statements).sum::<u64>()
        );
        Ok((loaded, skipped, ctx.warnings()))
    }

    /// Queue data files until the dump is finished
    ///
    /// Files come from `@.done.json` once it exists, from listing the
    /// storage before that. Returns the number of files an earlier run loaded.
    async fn discover(
        &self,
        plan: &LoadPlan,
        tables: &[DataTable],
        reload: &BTreeSet<(String, Option<String>)>,
        scheduler: &Scheduler,
        first_error: &FirstError,
    ) -> Result<u64> {
        let source = &plan.source;
        let storage = source.storage();
        let mut visited: HashSet<String> = HashSet::new();
        let mut skipped = 0;
        let mut idle_since = tokio::time::Instant::now();
        loop {
            first_error.check()?;
            let done = source.done_marker().await?;
            let mut found = 0;
            for entry in tables {
                let table = &entry.table;
                let candidates: Vec<(String, u64, Option<layout::ChunkRecord>)> = match &done {
                    Some(done) => done
                        .table(&table.schema, &table.table)
                        .map(|t| {
                            t.chunks
                                .iter()
                                .map(|c| (c.file.clone(), c.bytes, Some(c.clone())))
                                .collect()
                        })
                        .unwrap_or_default(),
                    None => storage
                        .list(&layout::data_file_prefix(&table.schema, &table.table))
                        .await?
                        .into_iter()
                        .map(|o| (o.name, o.size, None))
                        .collect(),
                };
                for (name, size, record) in candidates {
                    if visited.contains(&name) {
                        continue;
                    }
                    let Some(file) = DataFile::parse(&name, table.is_partitioned()) else {
                        continue;
                    };
                    if file.base != table.basename {
                        continue;
                    }
                    visited.insert(name);
                    found += 1;
                    let again = reload.contains(&(entry.target.clone(), None))
                        || reload.contains(&(entry.target.clone(), file.partition.clone()));
                    if !again
                        && plan
                            .ledger
                            .is_done(event::DATA_CHUNK, &entry.target, Some(&file.label()))
                    {
                        skipped += 1;
                        continue;
                    }
                    scheduler.add(DataJob {
                        target: entry.target.clone(),
                        table: table.clone(),
                        file,
                        size,
                        record,
                    });
                }
            }
            if done.is_some() {
                return Ok(skipped);
            }

            if found > 0 || scheduler.pending() > 0 {
                idle_since = tokio::time::Instant::now();
            }
            if let Some(wait) = source.wait_timeout() {
                if idle_since.elapsed() >= wait {
                    return Err(Error::dump(format!(
                        "Timeout while waiting for the dump in {} to finish, no new data appeared in {}",
                        storage.describe(),
                        format_duration(wait)
                    )));
                }
            }
            tokio::select! {
                _ = storage.wait_for_change(Duration::from_secs(1)) => {}
                _ = first_error.token().cancelled() => {}
            }
        }
    }

    async fn verify_checksums(
        &self,
        pool: &Arc<SessionPool>,
        plan: &LoadPlan,
        first_error: &FirstError,
    ) -> Result<()> {
        if !plan.manifest.checksum {
            self.console.warning(
                "The 'checksum' option is enabled but the dump was created without checksums, nothing to verify.",
            );
            return Ok(());
        }
        let file: ChecksumFile = plan.source.require_json(CHECKSUMS_FILE).await?;
        let wanted: BTreeSet<(&str, &str)> = plan
            .contents
            .tables()
            .map(|t| (t.schema.as_str(), t.table.as_str()))
            .collect();
        let records: VecDeque<ChecksumRecord> = file
            .chunks
            .into_iter()
            .filter(|r| wanted.contains(&(r.schema.as_str(), r.table.as_str())))
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        self.console
            .info(format!("Verifying checksums of {} chunks", records.len()));
        let workers = self.options.threads.min(records.len()).max(1);
        let queue = Arc::new(Mutex::new(records));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                tokio::spawn(run_checksum_worker(
                    pool.clone(),
                    queue.clone(),
                    first_error.clone(),
                ))
            })
            .collect();
        for handle in join_all(handles).await {
            handle.map_err(join_error)?;
        }
        first_error.clone().into_result()?;
        self.console.info("Checksum verification passed.");
        Ok(())
    }

    async fn update_gtid_set(&self, main: &mut dyn Session, plan: &LoadPlan) -> Result<()> {
        const TARGET: &str = "gtid_purged";
        let set = plan.manifest.gtid_executed.trim();
        if set.is_empty() {
            self.console.warning(
                "The dump does not contain a GTID set, 'updateGtidSet' has no effect.",
            );
            return Ok(());
        }
        if plan.manifest.gtid_executed_inconsistent {
            self.console.warning(
                "The GTID set of the dump may be inconsistent with its data, the dump was created without a consistent snapshot.",
            );
        }
        if plan.ledger.is_done(event::GTID_UPDATE, TARGET, None) {
            return Ok(());
        }
        let value = match self.options.update_gtid_set {
            UpdateGtidSet::Append => {
                self.console
                    .info("Appending the dumped GTID set to GTID_PURGED");
                format!("+{}", set)
            }
            _ => {
                self.console
                    .info("Resetting GTID_PURGED to the dumped GTID set");
                set.to_string()
            }
        };
        plan.ledger.start(event::GTID_UPDATE, TARGET, None).await?;
        if let Err(e) = main
            .execute(&format!("SET GLOBAL gtid_purged = {}", quote_string(&value)))
            .await
        {
            let e = Error::ddl(TARGET, e);
            plan.ledger
                .error(event::GTID_UPDATE, TARGET, None, &e.to_string())
                .await?;
            return Err(e);
        }
        plan.ledger.done(event::GTID_UPDATE, TARGET, None).await?;
        Ok(())
    }

    fn print_summary(&self, s: &LoadSummary) {
        let console = &self.console;
        if s.dry_run {
            console.print(format!(
                "{} chunks ({} rows, {}) for {} tables in {} schemas would be loaded",
                s.chunks,
                s.rows,
                format_bytes(s.data_bytes),
                s.tables,
                s.schemas
            ));
            return;
        }
        console.print(format!(
            "{} chunks ({} rows, {}) for {} tables in {} schemas were loaded in {} (avg throughput {})",
            s.chunks,
            s.rows,
            format_bytes(s.data_bytes),
            s.tables,
            s.schemas,
            format_duration(s.data_elapsed),
            format_throughput(s.data_bytes, s.data_elapsed)
        ));
        if s.skipped_chunks > 0 {
            console.print(format!(
                "{} chunks were already loaded by an earlier run",
                s.skipped_chunks
            ));
        }
        console.print(format!(
            "{} DDL files were executed in {}.",
            s.ddl_files,
            format_duration(s.ddl_elapsed)
        ));
        if s.indexes > 0 {
            console.print(format!("{} indexes were built.", s.indexes));
        }
        if s.users > 0 {
            console.print(format!("{} accounts were loaded", s.users));
        }
        console.print(format!("Data load duration: {}", format_duration(s.data_elapsed)));
        console.print(format!("Total duration: {}", format_duration(s.elapsed)));
        console.print(format!(
            "{} warnings were reported during the load.",
            s.warnings
        ));
    }
}

/// Load a dump into the target server
pub async fn load_dump(
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    options: LoadOptions,
    console: Console,
) -> Result<LoadSummary> {
    Loader::new(factory, storage, options, console).run().await
}
