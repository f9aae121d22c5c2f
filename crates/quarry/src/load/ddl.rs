//! DDL during a load: running DDL files, deferring secondary indexes and
//! finding objects that already exist in the target

use quarry_session::prelude::*;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, FirstError, Result};
use crate::ident::{fold_case, quote_identifier, quote_qualified, quote_string};
use crate::ledger::ProgressLedger;
use crate::load::source::{DumpContents, DumpSource};
use crate::options::DeferIndexes;
use crate::script::split_statements;

static INDEX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(UNIQUE |FULLTEXT |SPATIAL )?KEY `((?:[^`]|``)+)` \(`((?:[^`]|``)+)`")
        .expect("static regex")
});

static AUTO_INCREMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^`((?:[^`]|``)+)` .*\bAUTO_INCREMENT\b").expect("static regex")
});

static FOREIGN_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^CONSTRAINT `(?:[^`]|``)+` FOREIGN KEY \(`((?:[^`]|``)+)`").expect("static regex")
});

static TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^CREATE\b.*?\bTRIGGER\s+(?:`((?:[^`]|``)+)`|(\w+))(?:\s*\.\s*(?:`((?:[^`]|``)+)`|(\w+)))?",
    )
    .expect("static regex")
});

fn unquote(name: &str) -> String {
    name.replace("``", "`")
}

/// A `CREATE TABLE` with its deferred secondary indexes taken out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SplitTable {
    pub create: String,
    /// `ALTER TABLE ... ADD ...` statements restoring the indexes
    pub indexes: Vec<String>,
}

impl SplitTable {
    fn unchanged(create: &str) -> Self {
        Self {
            create: create.to_string(),
            indexes: Vec::new(),
        }
    }
}

/// Take the indexes `mode` defers out of a `SHOW CREATE TABLE` statement
///
/// Indexes on the `AUTO_INCREMENT` column and indexes that back a foreign
/// key stay, the server refuses the table without them. A `UNIQUE` key is
/// only deferred when the table has a primary key, so a table always keeps a
/// key the loader can use to skip duplicate rows. Each `FULLTEXT` index gets
/// its own `ALTER TABLE`, the rest are added by one statement.
pub(crate) fn defer_indexes(create: &str, qualified: &str, mode: DeferIndexes) -> SplitTable {
    if mode == DeferIndexes::Off {
        return SplitTable::unchanged(create);
    }
    let lines: Vec<&str> = create.lines().collect();
    let Some(open) = lines.iter().position(|l| {
        l.trim_end().ends_with('(')
            && l.trim_start()
                .get(..12)
                .is_some_and(|p| p.eq_ignore_ascii_case("CREATE TABLE"))
    }) else {
        return SplitTable::unchanged(create);
    };
    let Some(close) = lines.iter().rposition(|l| l.starts_with(')')) else {
        return SplitTable::unchanged(create);
    };
    if close <= open {
        return SplitTable::unchanged(create);
    }

    let items: Vec<&str> = lines[open + 1..close]
        .iter()
        .map(|l| l.trim().trim_end_matches(','))
        .collect();
    let has_primary = items.iter().any(|i| i.starts_with("PRIMARY KEY"));
    let auto_increment = items
        .iter()
        .find_map(|i| AUTO_INCREMENT_RE.captures(i))
        .map(|c| unquote(&c[1]));
    let foreign_keys: HashSet<String> = items
        .iter()
        .filter_map(|i| FOREIGN_KEY_RE.captures(i))
        .map(|c| unquote(&c[1]))
        .collect();

    let mut kept = Vec::new();
    let mut plain = Vec::new();
    let mut fulltext = Vec::new();
    for item in items {
        let Some(caps) = INDEX_RE.captures(item) else {
            kept.push(item);
            continue;
        };
        let kind = caps.get(1).map(|m| m.as_str().trim());
        let first_column = unquote(&caps[3]);
        let deferrable = match (mode, kind) {
            (_, Some("FULLTEXT")) => true,
            (DeferIndexes::All, Some("UNIQUE")) => has_primary,
            (DeferIndexes::All, _) => true,
            _ => false,
        };
        let required = auto_increment.as_deref() == Some(first_column.as_str())
            || foreign_keys.contains(&first_column);
        if !deferrable || required {
            kept.push(item);
        } else if kind == Some("FULLTEXT") {
            fulltext.push(item);
        } else {
            plain.push(item);
        }
    }
    if plain.is_empty() && fulltext.is_empty() {
        return SplitTable::unchanged(create);
    }

    let mut out = lines[..=open].join("\n");
    out.push('\n');
    let body: Vec<String> = kept.iter().map(|i| format!("  {}", i)).collect();
    out.push_str(&body.join(",\n"));
    out.push('\n');
    out.push_str(&lines[close..].join("\n"));

    let mut indexes = Vec::new();
    if !plain.is_empty() {
        let adds: Vec<String> = plain.iter().map(|i| format!("ADD {}", i)).collect();
        indexes.push(format!("ALTER TABLE {} {}", qualified, adds.join(", ")));
    }
    for index in fulltext {
        indexes.push(format!("ALTER TABLE {} ADD {}", qualified, index));
    }
    SplitTable {
        create: out,
        indexes,
    }
}

/// Name of the trigger a `CREATE TRIGGER` statement creates
pub(crate) fn trigger_name(statement: &str) -> Option<String> {
    let caps = TRIGGER_RE.captures(statement)?;
    let last = caps
        .get(3)
        .or_else(|| caps.get(4))
        .or_else(|| caps.get(1))
        .or_else(|| caps.get(2))?;
    Some(unquote(last.as_str()))
}

fn is_create_table(statement: &str) -> bool {
    statement
        .get(..12)
        .is_some_and(|p| p.eq_ignore_ascii_case("CREATE TABLE"))
}

/// What a DDL file holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DdlKind {
    Script,
    /// Table DDL; `post_ddl` runs after the `CREATE TABLE`
    Table { post_ddl: Vec<String> },
    /// Triggers file; only the named triggers are created
    Triggers { names: Vec<String> },
    /// Statements given inline, no file is read
    Statements(Vec<String>),
}

/// What happens to a task's object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskAction {
    Run,
    /// The object exists and is left alone
    Skip,
    /// Only work out which indexes the table defers
    IndexesOnly,
}

/// One DDL file to run
#[derive(Debug, Clone)]
pub(crate) struct DdlTask {
    pub event: &'static str,
    /// Qualified name of the object
    pub target: String,
    /// Schema made default before the file runs
    pub schema: Option<String>,
    pub file: String,
    pub kind: DdlKind,
    pub action: TaskAction,
}

impl DdlTask {
    pub fn new(event: &'static str, target: String, schema: Option<&str>, file: String) -> Self {
        Self {
            event,
            target,
            schema: schema.map(str::to_string),
            file,
            kind: DdlKind::Script,
            action: TaskAction::Run,
        }
    }

    /// Task running `statements` instead of a file
    pub fn statements(
        event: &'static str,
        target: String,
        schema: Option<&str>,
        statements: Vec<String>,
    ) -> Self {
        Self::new(event, target, schema, String::new()).with_kind(DdlKind::Statements(statements))
    }

    pub fn with_kind(mut self, kind: DdlKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_action(mut self, action: TaskAction) -> Self {
        self.action = action;
        self
    }
}

/// Indexes of a table left to create after its data
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeferredIndexes {
    pub target: String,
    pub statements: Vec<String>,
}

/// State shared by DDL workers
pub(crate) struct DdlContext {
    pub source: DumpSource,
    pub ledger: Arc<ProgressLedger>,
    pub defer: DeferIndexes,
    pub first_error: FirstError,
    pub executed: AtomicU64,
}

impl DdlContext {
    pub fn new(
        source: DumpSource,
        ledger: Arc<ProgressLedger>,
        defer: DeferIndexes,
        first_error: FirstError,
    ) -> Self {
        Self {
            source,
            ledger,
            defer,
            first_error,
            executed: AtomicU64::new(0),
        }
    }

    /// DDL files run so far
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

/// Statements of a DDL file, as they will run
async fn prepare(task: &DdlTask, ctx: &DdlContext) -> Result<(Vec<String>, Vec<String>)> {
    if let DdlKind::Statements(statements) = &task.kind {
        return Ok((statements.clone(), Vec::new()));
    }
    let script = ctx.source.require_text(&task.file).await?;
    let mut statements = split_statements(&script);
    let mut deferred = Vec::new();
    match &task.kind {
        DdlKind::Script | DdlKind::Statements(_) => {}
        DdlKind::Table { post_ddl } => {
            for statement in statements.iter_mut() {
                if is_create_table(statement) {
                    let split = defer_indexes(statement, &task.target, ctx.defer);
                    *statement = split.create;
                    deferred = split.indexes;
                }
            }
            statements.extend(post_ddl.iter().cloned());
        }
        DdlKind::Triggers { names } => {
            statements.retain(|s| trigger_name(s).map_or(true, |n| names.contains(&n)));
        }
    }
    Ok((statements, deferred))
}

/// Run `statements` on `session`, making `schema` the default first
pub(crate) async fn run_statements(
    session: &mut dyn Session,
    schema: Option<&str>,
    statements: &[String],
    object: &str,
) -> Result<()> {
    if let Some(schema) = schema {
        session
            .execute(&format!("USE {}", quote_identifier(schema)))
            .await
            .map_err(|e| Error::ddl(object, e))?;
    }
    for statement in statements {
        session
            .execute(statement)
            .await
            .map_err(|e| Error::ddl(object, e))?;
    }
    Ok(())
}

/// Run one DDL file, returning the indexes its table deferred
pub(crate) async fn execute_task(
    session: &mut dyn Session,
    task: &DdlTask,
    ctx: &DdlContext,
) -> Result<Option<DeferredIndexes>> {
    let (statements, deferred) = prepare(task, ctx).await?;
    let deferred = (!deferred.is_empty() && task.action != TaskAction::Skip).then(|| {
        DeferredIndexes {
            target: task.target.clone(),
            statements: deferred,
        }
    });
    if task.action != TaskAction::Run || ctx.ledger.is_done(task.event, &task.target, None) {
        debug!("Skipping {} of {}", task.event, task.target);
        return Ok(deferred);
    }

    ctx.ledger.start(task.event, &task.target, None).await?;
    if let Err(e) = run_statements(session, task.schema.as_deref(), &statements, &task.target).await
    {
        ctx.ledger
            .error(task.event, &task.target, None, &e.to_string())
            .await?;
        return Err(e);
    }
    ctx.ledger.done(task.event, &task.target, None).await?;
    if !matches!(task.kind, DdlKind::Statements(_)) {
        ctx.executed.fetch_add(1, Ordering::Relaxed);
    }
    Ok(deferred)
}

/// Run DDL tasks from `queue` until it is empty or the load failed
pub(crate) async fn run_ddl_worker(
    pool: Arc<SessionPool>,
    queue: Arc<Mutex<VecDeque<DdlTask>>>,
    ctx: Arc<DdlContext>,
) -> Vec<DeferredIndexes> {
    let mut deferred = Vec::new();
    let mut session = match pool.acquire().await {
        Ok(session) => session,
        Err(e) => {
            ctx.first_error.record(e.into());
            return deferred;
        }
    };
    loop {
        if ctx.first_error.is_cancelled() {
            break;
        }
        let Some(task) = queue.lock().pop_front() else {
            break;
        };
        match execute_task(&mut *session, &task, &ctx).await {
            Ok(Some(indexes)) => deferred.push(indexes),
            Ok(None) => {}
            Err(e) => {
                ctx.first_error.record(e);
                break;
            }
        }
    }
    pool.release(session);
    deferred
}

/// Kinds of objects the existing-object scan looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum ObjectKind {
    Table,
    View,
    Function,
    Procedure,
    Event,
    Trigger,
    Library,
}

impl ObjectKind {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Table => "TABLE",
            Self::View => "VIEW",
            Self::Function => "FUNCTION",
            Self::Procedure => "PROCEDURE",
            Self::Event => "EVENT",
            Self::Trigger => "TRIGGER",
            Self::Library => "LIBRARY",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
            Self::Function => "function",
            Self::Procedure => "procedure",
            Self::Event => "event",
            Self::Trigger => "trigger",
            Self::Library => "library",
        }
    }
}

/// An object of the dump that is already in the target
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct ExistingObject {
    pub schema: String,
    pub kind: ObjectKind,
    pub name: String,
}

impl ExistingObject {
    pub fn describe(&self) -> String {
        format!(
            "Schema {} already contains a {} named {}",
            quote_identifier(&self.schema),
            self.kind.noun(),
            quote_identifier(&self.name)
        )
    }

    pub fn drop_sql(&self) -> String {
        format!(
            "DROP {} IF EXISTS {}",
            self.kind.keyword(),
            quote_qualified(&self.schema, &self.name)
        )
    }
}

type Key = (String, ObjectKind, String);

/// Find the objects of `contents` that already exist in the target
///
/// Tables and views share a namespace, so a dumped table clashes with a view
/// of the same name and the other way around.
pub(crate) async fn find_existing(
    session: &mut dyn Session,
    contents: &DumpContents,
    case_insensitive: bool,
) -> Result<Vec<ExistingObject>> {
    if contents.schemas.is_empty() {
        return Ok(Vec::new());
    }
    let list = contents
        .schemas
        .iter()
        .map(|s| quote_string(s.name()))
        .collect::<Vec<_>>()
        .join(", ");
    let fold = |s: &str| fold_case(s, case_insensitive);

    let mut present: Vec<(Key, ExistingObject)> = Vec::new();
    let mut add = |schema: String, kind: ObjectKind, name: String| {
        present.push((
            (fold(&schema), kind, fold(&name)),
            ExistingObject { schema, kind, name },
        ));
    };

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE FROM information_schema.tables WHERE TABLE_SCHEMA IN ({})",
            list
        ))
        .await?;
    for row in rows {
        let kind = if row.text_or_empty(2) == "VIEW" {
            ObjectKind::View
        } else {
            ObjectKind::Table
        };
        add(row.text_or_empty(0), kind, row.text_or_empty(1));
    }
    let rows = session
        .query(&format!(
            "SELECT ROUTINE_SCHEMA, ROUTINE_NAME, ROUTINE_TYPE FROM information_schema.routines WHERE ROUTINE_SCHEMA IN ({})",
            list
        ))
        .await?;
    for row in rows {
        let kind = if row.text_or_empty(2) == "FUNCTION" {
            ObjectKind::Function
        } else {
            ObjectKind::Procedure
        };
        add(row.text_or_empty(0), kind, row.text_or_empty(1));
    }
    let rows = session
        .query(&format!(
            "SELECT EVENT_SCHEMA, EVENT_NAME FROM information_schema.events WHERE EVENT_SCHEMA IN ({})",
            list
        ))
        .await?;
    for row in rows {
        add(row.text_or_empty(0), ObjectKind::Event, row.text_or_empty(1));
    }
    let rows = session
        .query(&format!(
            "SELECT TRIGGER_SCHEMA, TRIGGER_NAME FROM information_schema.triggers WHERE TRIGGER_SCHEMA IN ({})",
            list
        ))
        .await?;
    for row in rows {
        add(row.text_or_empty(0), ObjectKind::Trigger, row.text_or_empty(1));
    }
    match session
        .query(&format!(
            "SELECT LIBRARY_SCHEMA, LIBRARY_NAME FROM information_schema.libraries WHERE LIBRARY_SCHEMA IN ({})",
            list
        ))
        .await
    {
        Ok(rows) => {
            for row in rows {
                add(row.text_or_empty(0), ObjectKind::Library, row.text_or_empty(1));
            }
        }
        // servers before 9.2 have no libraries
        Err(e) if matches!(e.code(), Some(1109) | Some(1146)) => {}
        Err(e) => return Err(e.into()),
    }

    let mut wanted: BTreeSet<Key> = BTreeSet::new();
    for entry in &contents.schemas {
        let schema = fold(entry.name());
        let d = &entry.descriptor;
        for name in d.tables.iter().chain(d.views.iter()) {
            wanted.insert((schema.clone(), ObjectKind::Table, fold(name)));
            wanted.insert((schema.clone(), ObjectKind::View, fold(name)));
        }
        for name in &d.functions {
            wanted.insert((schema.clone(), ObjectKind::Function, fold(name)));
        }
        for name in &d.procedures {
            wanted.insert((schema.clone(), ObjectKind::Procedure, fold(name)));
        }
        for name in &d.events {
            wanted.insert((schema.clone(), ObjectKind::Event, fold(name)));
        }
        for name in &d.libraries {
            wanted.insert((schema.clone(), ObjectKind::Library, fold(name)));
        }
        for table in &entry.tables {
            for name in &table.triggers {
                wanted.insert((schema.clone(), ObjectKind::Trigger, fold(name)));
            }
        }
    }

    let mut found: Vec<ExistingObject> = present
        .into_iter()
        .filter(|(key, _)| wanted.contains(key))
        .map(|(_, object)| object)
        .collect();
    found.sort();
    found.dedup();
    if !found.is_empty() {
        warn!("{} objects of the dump already exist in the target", found.len());
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::SchemaDescriptor;
    use crate::load::source::SchemaEntry;
    use quarry_session::testing::{Script, ScriptedFactory};
    use quarry_storage::{MemoryStorage, Storage};

    const CREATE: &str = "CREATE TABLE `t` (\n  `id` int NOT NULL AUTO_INCREMENT,\n  `parent` int DEFAULT NULL,\n  `name` varchar(20) DEFAULT NULL,\n  `body` text,\n  PRIMARY KEY (`id`),\n  UNIQUE KEY `name_uk` (`name`),\n  KEY `id_name` (`id`,`name`),\n  KEY `parent_ix` (`parent`),\n  KEY `name_ix` (`name`(10)),\n  FULLTEXT KEY `body_ft` (`body`),\n  CONSTRAINT `fk_parent` FOREIGN KEY (`parent`) REFERENCES `p` (`id`)\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4";

    #[test]
    fn test_defer_fulltext_only() {
        let split = defer_indexes(CREATE, "`s`.`t`", DeferIndexes::Fulltext);
        assert!(!split.create.contains("FULLTEXT"));
        assert!(split.create.contains("KEY `name_ix` (`name`(10)),\n  CONSTRAINT"));
        assert_eq!(
            split.indexes,
            vec!["ALTER TABLE `s`.`t` ADD FULLTEXT KEY `body_ft` (`body`)"]
        );
    }

    #[test]
    fn test_defer_all_keeps_required_indexes() {
        let split = defer_indexes(CREATE, "`s`.`t`", DeferIndexes::All);
        assert!(split.create.contains("PRIMARY KEY (`id`),"));
        assert!(split.create.contains("KEY `id_name` (`id`,`name`)"));
        assert!(split.create.contains("KEY `parent_ix` (`parent`)"));
        assert!(!split.create.contains("name_uk"));
        assert!(!split.create.contains("name_ix"));
        assert!(split
            .create
            .contains("REFERENCES `p` (`id`)\n) ENGINE=InnoDB"));
        assert_eq!(
            split.indexes,
            vec![
                "ALTER TABLE `s`.`t` ADD UNIQUE KEY `name_uk` (`name`), ADD KEY `name_ix` (`name`(10))",
                "ALTER TABLE `s`.`t` ADD FULLTEXT KEY `body_ft` (`body`)",
            ]
        );
    }

    #[test]
    fn test_unique_key_stays_without_primary_key() {
        let create = "CREATE TABLE `t` (\n  `a` int,\n  UNIQUE KEY `a_uk` (`a`),\n  KEY `a_ix` (`a`)\n) ENGINE=InnoDB";
        let split = defer_indexes(create, "`s`.`t`", DeferIndexes::All);
        assert_eq!(
            split.create,
            "CREATE TABLE `t` (\n  `a` int,\n  UNIQUE KEY `a_uk` (`a`)\n) ENGINE=InnoDB"
        );
        assert_eq!(split.indexes, vec!["ALTER TABLE `s`.`t` ADD KEY `a_ix` (`a`)"]);
        assert_eq!(
            defer_indexes(create, "`s`.`t`", DeferIndexes::Off),
            SplitTable::unchanged(create)
        );
    }

    #[test]
    fn test_trigger_name() {
        assert_eq!(
            trigger_name("CREATE DEFINER=`root`@`%` TRIGGER `s`.`t_bi` BEFORE INSERT ON `t` FOR EACH ROW SET NEW.a = 1").as_deref(),
            Some("t_bi")
        );
        assert_eq!(
            trigger_name("create trigger upd_check before update on t for each row begin end").as_deref(),
            Some("upd_check")
        );
        assert_eq!(trigger_name("SET NAMES utf8mb4"), None);
    }

    #[tokio::test]
    async fn test_table_task_defers_and_records_progress() {
        let storage = Arc::new(MemoryStorage::new("dump"));
        storage
            .write_all("s.t.sql", format!("-- header\n\n{};\n", CREATE).as_bytes())
            .await
            .unwrap();
        let source = DumpSource::new(storage, Some(std::time::Duration::ZERO));
        let ctx = DdlContext::new(
            source,
            Arc::new(ProgressLedger::disabled()),
            DeferIndexes::Fulltext,
            FirstError::new(Default::default()),
        );
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let task = DdlTask::new("table-ddl", "`s`.`t`".to_string(), Some("s"), "s.t.sql".to_string())
            .with_kind(DdlKind::Table {
                post_ddl: vec!["ALTER TABLE `s`.`t` ADD COLUMN x int".to_string()],
            });

        let deferred = execute_task(&mut *session, &task, &ctx).await.unwrap().unwrap();
        assert_eq!(deferred.statements.len(), 1);
        let log = factory.sql_log();
        assert_eq!(log[0], "USE `s`");
        assert!(log[1].starts_with("CREATE TABLE `t`"));
        assert!(!log[1].contains("FULLTEXT"));
        assert_eq!(log[2], "ALTER TABLE `s`.`t` ADD COLUMN x int");
        assert_eq!(ctx.executed(), 1);

        // done units are not run again
        execute_task(&mut *session, &task, &ctx).await.unwrap();
        assert_eq!(factory.sql_log().len(), 3);
    }

    #[tokio::test]
    async fn test_find_existing_lists_every_clash() {
        let factory = ScriptedFactory::new(
            Script::new()
                .rows(
                    r"FROM information_schema\.tables",
                    &["TABLE_SCHEMA", "TABLE_NAME", "TABLE_TYPE"],
                    vec![
                        vec!["s".into(), "t".into(), "BASE TABLE".into()],
                        vec!["s".into(), "other".into(), "BASE TABLE".into()],
                        vec!["s".into(), "v".into(), "VIEW".into()],
                    ],
                )
                .rows(
                    r"FROM information_schema\.routines",
                    &["ROUTINE_SCHEMA", "ROUTINE_NAME", "ROUTINE_TYPE"],
                    vec![vec!["s".into(), "f".into(), "FUNCTION".into()]],
                )
                .fail(r"FROM information_schema\.libraries", 1109, "Unknown table 'LIBRARIES'"),
        );
        let mut session = factory.connect().await.unwrap();
        let contents = DumpContents {
            schemas: vec![SchemaEntry {
                descriptor: SchemaDescriptor {
                    schema: "s".to_string(),
                    tables: vec!["t".to_string()],
                    views: vec!["v".to_string()],
                    functions: vec!["f".to_string()],
                    procedures: vec!["f".to_string()],
                    ..Default::default()
                },
                tables: Vec::new(),
            }],
        };
        let found = find_existing(&mut *session, &contents, false).await.unwrap();
        let described: Vec<String> = found.iter().map(|o| o.describe()).collect();
        assert_eq!(
            described,
            vec![
                "Schema `s` already contains a table named `t`",
                "Schema `s` already contains a view named `v`",
                "Schema `s` already contains a function named `f`",
            ]
        );
        assert_eq!(found[1].drop_sql(), "DROP VIEW IF EXISTS `s`.`v`");
    }
}
