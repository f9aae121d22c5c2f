//! Dump driver
//!
//! A dump runs in this order:
//!
//! 1. validate options and filters, refuse a non-empty target
//! 2. read the catalog on the main session, apply scope and filters
//! 3. lock, open the worker pool inside one snapshot, unlock
//! 4. read DDL, run compatibility checks and rewrites
//! 5. plan chunks on the workers
//! 6. write `@.json`, DDL files and descriptors, check for schema drift
//! 7. write data chunks on the workers
//! 8. write `@.checksums.json` and finally `@.done.json`
//!
//! A dump without `@.done.json` is incomplete.

mod ddl;
mod writer;

use chrono::Utc;
use futures::future::join_all;
use quarry_session::prelude::*;
use quarry_storage::prelude::*;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::catalog::{
    fetch_ddl, fetch_user_ddl, read_catalog, read_users, Catalog, DdlSelection, TableId,
};
use crate::checksum::{ChecksumFile, CHECKSUMS_FILE};
use crate::chunker::{PlanOptions, TablePlan};
use crate::compat::Compatibility;
use crate::console::{format_bytes, format_duration, format_throughput, Console, Progress};
use crate::coordinator::{Coordinator, CoordinatorConfig, Snapshot};
use crate::dialect::Dialect;
use crate::error::{Error, FirstError, Issue, Result, Severity};
use crate::filter::{dependency_issues, FilterSet};
use crate::ident::quote_identifier;
use crate::layout::{self, DoneMarker, TableChunks};
use crate::options::{DumpOptions, DumpScope};

use ddl::DdlWriter;
use writer::{run_planner, run_writer, ChunkJob, ChunkOutcome, TableFormat, WriterContext};

/// Totals of a finished dump
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DumpSummary {
    pub schemas: u64,
    pub tables: u64,
    pub views: u64,
    pub routines: u64,
    pub events: u64,
    pub users: u64,
    pub chunks: u64,
    pub rows: u64,
    /// Bytes stored, after compression
    pub bytes: u64,
    /// Bytes of formatted rows, before compression
    pub data_bytes: u64,
    pub ddl_files: u64,
    pub elapsed: Duration,
    pub dry_run: bool,
}

/// Whether `name` can be written in the dump character set
fn representable(name: &str, charset: &str) -> bool {
    match charset.to_ascii_lowercase().as_str() {
        "ascii" => name.is_ascii(),
        "latin1" => name.chars().all(|c| (c as u32) <= 0xff),
        "utf8" | "utf8mb3" => name.chars().all(|c| (c as u32) <= 0xffff),
        _ => true,
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::dump(format!("Worker task failed: {}", e))
}

/// Runs one dump
pub struct Dumper {
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    options: DumpOptions,
    console: Console,
    token: CancellationToken,
}

impl Dumper {
    pub fn new(
        factory: Arc<dyn SessionFactory>,
        storage: Arc<dyn Storage>,
        options: DumpOptions,
        console: Console,
    ) -> Self {
        Self {
            factory,
            storage,
            options,
            console,
            token: CancellationToken::new(),
        }
    }

    /// Cancel the dump through `token`; a failing dump cancels it too
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub async fn run(self) -> Result<DumpSummary> {
        let started = Instant::now();
        self.options.validate_all()?;
        let filters = FilterSet::compile(&self.options.filters)?;
        if self.options.dry_run {
            self.console
                .info("dryRun enabled, no locks will be acquired and no files will be created.");
        } else {
            self.check_target().await?;
        }
        info!(
            "Dumping {} to {}",
            self.factory.describe(),
            self.storage.describe()
        );

        let mut main = self.factory.connect().await?;
        let result = self.dump(main.as_mut(), &filters, started).await;
        if let Err(e) = main.close().await {
            debug!("Closing the main session failed: {}", e);
        }
        if result.is_err() {
            self.token.cancel();
        }
        result
    }

    async fn check_target(&self) -> Result<()> {
        if !self.storage.list("").await?.is_empty() {
            return Err(Error::validation(format!(
                "Cannot proceed with the dump, the specified directory '{}' already exists at the target location and is not empty.",
                self.storage.describe()
            )));
        }
        Ok(())
    }

    fn in_scope(&self, schema: &str) -> bool {
        match &self.options.scope {
            DumpScope::Instance => {
                !schema.eq_ignore_ascii_case("mysql")
                    || self
                        .options
                        .filters
                        .include_schemas
                        .iter()
                        .any(|s| s.trim_matches('`').eq_ignore_ascii_case("mysql"))
            }
            DumpScope::Schemas(schemas) => schemas.iter().any(|s| s == schema),
            DumpScope::Tables { schema: s, .. } => s == schema,
        }
    }

    /// Fail when a schema or table named by the scope does not exist
    fn check_scope(&self, catalog: &Catalog) -> Result<()> {
        match &self.options.scope {
            DumpScope::Instance => Ok(()),
            DumpScope::Schemas(schemas) => {
                let missing: Vec<String> = schemas
                    .iter()
                    .filter(|s| catalog.find_schema(s).is_none())
                    .map(|s| quote_identifier(s))
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(Error::validation(format!(
                        "Following schemas were not found in the database: {}",
                        missing.join(", ")
                    )))
                }
            }
            DumpScope::Tables { schema, tables, .. } => {
                let Some(sid) = catalog.find_schema(schema) else {
                    return Err(Error::validation(format!(
                        "The requested schema {} was not found in the database.",
                        quote_identifier(schema)
                    )));
                };
                let s = catalog.schema(sid);
                let missing: Vec<String> = tables
                    .iter()
                    .filter(|t| {
                        catalog.find_table(schema, t).is_none()
                            && !s.views.iter().any(|v| &catalog.view(*v).name == *t)
                    })
                    .map(|t| quote_identifier(t))
                    .collect();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(Error::validation(format!(
                        "Following tables were not found in the schema {}: {}",
                        quote_identifier(schema),
                        missing.join(", ")
                    )))
                }
            }
        }
    }

    /// Drop objects outside a `dump_tables` scope and disabled object kinds
    fn restrict_scope(&self, catalog: &mut Catalog) {
        let options = &self.options;
        for sid in catalog.schema_order.clone() {
            let schema_name = catalog.schemas[sid.0].name.clone();
            if let DumpScope::Tables { tables, all, .. } = &options.scope {
                if !*all {
                    let kept: Vec<TableId> = catalog.schemas[sid.0]
                        .tables
                        .iter()
                        .copied()
                        .filter(|t| tables.contains(&catalog.tables[t.0].name))
                        .collect();
                    for tid in &catalog.schemas[sid.0].tables {
                        if !kept.contains(tid) {
                            catalog
                                .excluded_tables
                                .insert((schema_name.clone(), catalog.tables[tid.0].name.clone()));
                        }
                    }
                    catalog.schemas[sid.0].tables = kept;
                    let views = std::mem::take(&mut catalog.schemas[sid.0].views);
                    catalog.schemas[sid.0].views = views
                        .into_iter()
                        .filter(|v| tables.contains(&catalog.views[v.0].name))
                        .collect();
                }
                catalog.schemas[sid.0].routines.clear();
                catalog.schemas[sid.0].events.clear();
                catalog.schemas[sid.0].libraries.clear();
            }
            let schema = &mut catalog.schemas[sid.0];
            if !options.routines {
                schema.routines.clear();
            }
            if !options.events {
                schema.events.clear();
            }
            if !options.libraries {
                schema.libraries.clear();
            }
            if !options.triggers {
                for tid in catalog.schemas[sid.0].tables.clone() {
                    catalog.tables[tid.0].triggers.clear();
                }
            }
        }
    }

    fn check_names(&self, catalog: &Catalog) -> Result<()> {
        let charset = &self.options.default_character_set;
        let mut problems = Vec::new();
        let mut check = |name: String| {
            if !representable(&name, charset) {
                problems.push(format!(
                    "The name {} cannot be represented in the '{}' character set.",
                    name, charset
                ));
            }
        };
        for sid in &catalog.schema_order {
            check(quote_identifier(&catalog.schema(*sid).name));
        }
        for tid in catalog.all_tables() {
            check(catalog.table_name(tid));
        }
        for vid in catalog.all_views() {
            check(catalog.view_name(vid));
        }
        for rid in catalog.all_routines() {
            check(catalog.routine_name(rid));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }

    /// Print every issue, failing if any of them is an error
    fn report_issues(&self, issues: &[Issue]) -> Result<()> {
        if self.options.ocimds {
            let target = Compatibility::from_options(&self.options).target_version();
            self.console.info(format!(
                "Checking for compatibility with MySQL HeatWave Service {}",
                target
            ));
        }
        for issue in issues {
            let line = format!("{} {}", issue.object, issue.message);
            match issue.severity {
                Severity::Notice => self.console.note(line),
                Severity::Warning => self.console.warning(line),
                Severity::Error => self.console.error(line),
            }
        }
        let errors: Vec<Issue> = issues.iter().filter(|i| i.is_error()).cloned().collect();
        if !errors.is_empty() {
            self.console.error(
                "Compatibility issues were found. Please use the 'compatibility' option to apply compatibility adaptations to the dumped DDL.",
            );
            return Err(Error::Compatibility(errors));
        }
        if self.options.ocimds {
            self.console
                .info("Compatibility checks finished, no errors were found.");
        }
        Ok(())
    }

    async fn dump(
        &self,
        main: &mut dyn Session,
        filters: &FilterSet,
        started: Instant,
    ) -> Result<DumpSummary> {
        let options = &self.options;
        if options.tz_utc {
            main.execute("SET SESSION time_zone = '+00:00'").await?;
        }
        for sql in &options.session_init_sql {
            main.execute(sql).await?;
        }

        let mut catalog = read_catalog(main, |name| self.in_scope(name)).await?;
        self.check_scope(&catalog)?;
        if options.dumps_users() {
            read_users(main, &mut catalog).await?;
        }
        filters.apply(&mut catalog)?;
        self.restrict_scope(&mut catalog);
        self.check_names(&catalog)?;
        let issues = dependency_issues(&catalog, options.ocimds);

        let config = CoordinatorConfig {
            consistent: options.consistent && !options.dry_run,
            ..CoordinatorConfig::from(options)
        };
        let coordinator = Coordinator::new(config, self.console.clone(), catalog.server.version);
        let tables: Vec<String> = catalog.all_tables().map(|t| catalog.table_name(t)).collect();
        let (pool, snapshot) = coordinator
            .start(main, self.factory.clone(), &tables, options.dumps_users())
            .await?;
        let pool = Arc::new(pool);

        let result = self
            .dump_locked(main, &coordinator, &pool, &snapshot, catalog, issues, started)
            .await;
        if let Err(e) = pool.close().await {
            debug!("Closing the worker sessions failed: {}", e);
        }
        coordinator.finish(main, &snapshot).await;
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn dump_locked(
        &self,
        main: &mut dyn Session,
        coordinator: &Coordinator,
        pool: &Arc<SessionPool>,
        snapshot: &Snapshot,
        mut catalog: Catalog,
        mut issues: Vec<Issue>,
        started: Instant,
    ) -> Result<DumpSummary> {
        let options = &self.options;
        let selection = DdlSelection {
            triggers: options.triggers,
            routines: options.routines,
            events: options.events,
            libraries: options.libraries,
        };
        fetch_ddl(main, &mut catalog, selection).await?;
        if !catalog.users.is_empty() {
            fetch_user_ddl(main, &mut catalog).await?;
        }
        issues.extend(Compatibility::from_options(options).apply(&mut catalog));
        self.report_issues(&issues)?;

        let catalog = Arc::new(catalog);
        let first_error = FirstError::new(self.token.clone());
        let plans = if options.ddl_only {
            BTreeMap::new()
        } else {
            self.plan_tables(pool, &catalog, &first_error).await?
        };

        let mut summary = DumpSummary {
            schemas: catalog.schema_order.len() as u64,
            tables: catalog.table_count() as u64,
            views: catalog.all_views().count() as u64,
            routines: catalog.all_routines().count() as u64,
            events: catalog
                .schema_order
                .iter()
                .map(|s| catalog.schema(*s).events.len() as u64)
                .sum(),
            users: catalog.users.len() as u64,
            dry_run: options.dry_run,
            ..Default::default()
        };

        if options.dry_run {
            for plan in plans.values() {
                self.console.info(format!(
                    "Table {} would be dumped in {} chunks",
                    plan.qualified,
                    plan.chunks.len()
                ));
            }
            summary.chunks = plans.values().map(|p| p.chunks.len() as u64).sum();
            summary.elapsed = started.elapsed();
            self.print_summary(&summary);
            return Ok(summary);
        }

        let dialect = Dialect::resolve(options.dialect, &options.dialect_overrides);
        let extension = options.dialect.extension(options.dialect_customized());
        let mut ddl = DdlWriter {
            storage: self.storage.as_ref(),
            catalog: &catalog,
            options,
            dialect: &dialect,
            extension,
            plans: &plans,
            files: 0,
        };
        ddl.write_manifest(snapshot, self.factory.describe()).await?;
        ddl.write_all().await?;
        summary.ddl_files = ddl.files;

        let schemas: Vec<String> = catalog
            .schema_order
            .iter()
            .map(|s| catalog.schema(*s).name.clone())
            .collect();
        coordinator
            .check_drift(main, snapshot, &schemas, catalog.case_insensitive())
            .await?;

        let data_started = Instant::now();
        let progress = Arc::new(Progress::new("Dump", options.show_progress));
        let outcomes = if options.ddl_only {
            Vec::new()
        } else {
            self.write_data(pool, &catalog, plans, dialect, extension, progress, &first_error)
                .await?
        };
        let data_elapsed = data_started.elapsed();

        if options.checksum {
            let records = outcomes.iter().filter_map(|o| o.checksum.clone()).collect();
            let file = ChecksumFile::new(records);
            self.storage
                .write_all(CHECKSUMS_FILE, &serde_json::to_vec_pretty(&file)?)
                .await?;
        }

        let mut by_table: BTreeMap<(String, String), TableChunks> = BTreeMap::new();
        for outcome in outcomes {
            summary.chunks += 1;
            summary.rows += outcome.record.rows;
            summary.bytes += outcome.record.bytes;
            summary.data_bytes += outcome.record.data_bytes;
            by_table
                .entry((outcome.schema.clone(), outcome.table.clone()))
                .or_insert_with(|| TableChunks {
                    schema: outcome.schema.clone(),
                    table: outcome.table.clone(),
                    chunks: Vec::new(),
                })
                .chunks
                .push(outcome.record);
        }
        let mut tables: Vec<TableChunks> = by_table.into_values().collect();
        for table in &mut tables {
            table
                .chunks
                .sort_by(|a, b| (&a.partition, a.chunk).cmp(&(&b.partition, b.chunk)));
        }

        summary.elapsed = started.elapsed();
        let done = DoneMarker {
            end: Utc::now(),
            rows: summary.rows,
            bytes: summary.bytes,
            data_bytes: summary.data_bytes,
            schemas: summary.schemas,
            tables,
            warnings: self.console.warning_count(),
        };
        self.storage
            .write_all(layout::DONE_FILE, &serde_json::to_vec_pretty(&done)?)
            .await?;

        self.console
            .info(format!("Dump duration: {}", format_duration(data_elapsed)));
        self.print_summary(&summary);
        Ok(summary)
    }

    async fn plan_tables(
        &self,
        pool: &Arc<SessionPool>,
        catalog: &Arc<Catalog>,
        first_error: &FirstError,
    ) -> Result<BTreeMap<TableId, TablePlan>> {
        let tables: VecDeque<TableId> = catalog
            .all_tables()
            .filter(|t| !catalog.table(*t).ddl_only)
            .collect();
        if tables.is_empty() {
            return Ok(BTreeMap::new());
        }
        let workers = self.options.threads.min(tables.len()).max(1);
        let queue = Arc::new(Mutex::new(tables));
        let plan_options = Arc::new(PlanOptions::from_dump(&self.options));
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                tokio::spawn(run_planner(
                    pool.clone(),
                    queue.clone(),
                    catalog.clone(),
                    plan_options.clone(),
                    self.console.clone(),
                    first_error.clone(),
                ))
            })
            .collect();
        let mut plans = BTreeMap::new();
        for handle in join_all(handles).await {
            for plan in handle.map_err(join_error)? {
                plans.insert(plan.table, plan);
            }
        }
        first_error.clone().into_result()?;
        Ok(plans)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_data(
        &self,
        pool: &Arc<SessionPool>,
        catalog: &Catalog,
        plans: BTreeMap<TableId, TablePlan>,
        dialect: Dialect,
        extension: &str,
        progress: Arc<Progress>,
        first_error: &FirstError,
    ) -> Result<Vec<ChunkOutcome>> {
        let mut plans: Vec<TablePlan> = plans.into_values().collect();
        plans.sort_by_key(|p| std::cmp::Reverse(catalog.table(p.table).estimated_bytes()));

        let mut jobs = VecDeque::new();
        for plan in plans {
            let table = catalog.table(plan.table);
            let schema = catalog.schema(table.schema).name.clone();
            let format = Arc::new(TableFormat::new(table, &dialect));
            let plan = Arc::new(plan);
            for chunk in &plan.chunks {
                jobs.push_back(ChunkJob {
                    schema: schema.clone(),
                    table: table.name.clone(),
                    plan: plan.clone(),
                    format: format.clone(),
                    chunk: chunk.clone(),
                    file: layout::data_file(
                        &schema,
                        &table.name,
                        chunk,
                        extension,
                        self.options.compression,
                    ),
                });
            }
        }
        if jobs.is_empty() {
            return Ok(Vec::new());
        }
        info!("Writing {} data chunks", jobs.len());

        let workers = self.options.threads.min(jobs.len()).max(1);
        let queue = Arc::new(Mutex::new(jobs));
        let ctx = Arc::new(WriterContext {
            storage: self.storage.clone(),
            dialect,
            compression: self.options.compression,
            checksum: self.options.checksum,
            max_rate: self.options.max_rate,
            progress,
            first_error: first_error.clone(),
        });
        let handles: Vec<_> = (0..workers)
            .map(|worker| tokio::spawn(run_writer(worker, pool.clone(), queue.clone(), ctx.clone())))
            .collect();
        let mut outcomes = Vec::new();
        for handle in join_all(handles).await {
            outcomes.extend(handle.map_err(join_error)?);
        }
        first_error.clone().into_result()?;
        Ok(outcomes)
    }

    fn print_summary(&self, summary: &DumpSummary) {
        let console = &self.console;
        console.print(format!("Total duration: {}", format_duration(summary.elapsed)));
        console.print(format!("Schemas dumped: {}", summary.schemas));
        console.print(format!("Tables dumped: {}", summary.tables));
        if summary.dry_run {
            return;
        }
        console.print(format!("Data size: {}", format_bytes(summary.data_bytes)));
        console.print(format!("Rows written: {}", summary.rows));
        console.print(format!("Bytes written: {}", format_bytes(summary.bytes)));
        console.print(format!(
            "Average throughput: {}",
            format_throughput(summary.data_bytes, summary.elapsed)
        ));
    }
}

/// Dump every schema of the instance, plus user accounts
pub async fn dump_instance(
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    options: DumpOptions,
    console: Console,
) -> Result<DumpSummary> {
    Dumper::new(factory, storage, options.with_scope(DumpScope::Instance), console)
        .run()
        .await
}

/// Dump the listed schemas
pub async fn dump_schemas(
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    schemas: Vec<String>,
    options: DumpOptions,
    console: Console,
) -> Result<DumpSummary> {
    Dumper::new(factory, storage, options.with_scope(DumpScope::Schemas(schemas)), console)
        .run()
        .await
}

/// Dump tables and views of one schema; `all` takes every one of them
pub async fn dump_tables(
    factory: Arc<dyn SessionFactory>,
    storage: Arc<dyn Storage>,
    schema: String,
    tables: Vec<String>,
    all: bool,
    options: DumpOptions,
    console: Console,
) -> Result<DumpSummary> {
    let scope = DumpScope::Tables {
        schema,
        tables,
        all,
    };
    Dumper::new(factory, storage, options.with_scope(scope), console)
        .run()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_representable() {
        assert!(representable("café", "utf8mb4"));
        assert!(representable("café", "latin1"));
        assert!(!representable("café", "ascii"));
        assert!(!representable("日本", "latin1"));
        assert!(representable("日本", "utf8mb3"));
        assert!(!representable("🐬", "utf8mb3"));
    }
}
