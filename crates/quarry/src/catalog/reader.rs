//! Populates a [`Catalog`] from `information_schema`
//!
//! Reading happens in two passes. [`read_catalog`] collects metadata for the
//! schemas a predicate admits, the caller prunes the result with its filters,
//! and [`fetch_ddl`] then runs the `SHOW CREATE` statements only for what is
//! left.

use quarry_session::{Row, Session};
use std::collections::HashMap;
use tracing::{debug, info};

use super::model::*;
use crate::error::{Error, Result};
use crate::ident::{format_account, quote_identifier, quote_qualified, quote_string};
use crate::version::Version;

/// First version with `information_schema.LIBRARIES`
const LIBRARIES_VERSION: Version = Version::new(9, 2, 0);

/// Accounts created by the server itself
const SYSTEM_ACCOUNTS: [&str; 3] = ["mysql.sys", "mysql.session", "mysql.infoschema"];

fn in_list(names: &[String]) -> String {
    names
        .iter()
        .map(|n| quote_string(n))
        .collect::<Vec<_>>()
        .join(",")
}

fn text(row: &Row, idx: usize) -> String {
    row.text_or_empty(idx)
}

fn flag(row: &Row, idx: usize) -> bool {
    match row.text(idx) {
        Some(v) => matches!(v.to_ascii_uppercase().as_str(), "1" | "YES" | "Y" | "TRUE"),
        None => false,
    }
}

/// Read the facts about the server a dump or load runs against
pub async fn read_server_info(session: &mut dyn Session) -> Result<ServerInfo> {
    let row = session
        .query_one(
            "SELECT @@version, @@server_uuid, @@hostname, @@lower_case_table_names, @@max_allowed_packet",
        )
        .await?
        .ok_or_else(|| Error::dump("The server did not report its version"))?;
    let version_string = text(&row, 0);
    let partial_revokes = session
        .variable("partial_revokes")
        .await?
        .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("ON"));
    Ok(ServerInfo {
        version: Version::parse(&version_string),
        version_string,
        server_uuid: text(&row, 1),
        hostname: text(&row, 2),
        lower_case_table_names: row.u64(3).unwrap_or_default() as u8,
        max_allowed_packet: row.u64(4).unwrap_or(64 * 1024 * 1024),
        partial_revokes,
    })
}

struct Lookup {
    case_insensitive: bool,
    schemas: HashMap<String, SchemaId>,
    tables: HashMap<(String, String), TableId>,
    views: HashMap<(String, String), ViewId>,
    routines: HashMap<(String, String, String), RoutineId>,
}

impl Lookup {
    fn key(&self, name: &str) -> String {
        if self.case_insensitive {
            name.to_lowercase()
        } else {
            name.to_string()
        }
    }

    fn schema(&self, name: &str) -> Option<SchemaId> {
        self.schemas.get(&self.key(name)).copied()
    }

    fn table(&self, schema: &str, table: &str) -> Option<TableId> {
        self.tables
            .get(&(self.key(schema), self.key(table)))
            .copied()
    }

    fn view(&self, schema: &str, view: &str) -> Option<ViewId> {
        self.views.get(&(self.key(schema), self.key(view))).copied()
    }
}

/// Read metadata of every schema `include_schema` admits
pub async fn read_catalog<F>(session: &mut dyn Session, include_schema: F) -> Result<Catalog>
where
    F: Fn(&str) -> bool,
{
    let server = read_server_info(session).await?;
    let mut catalog = Catalog::new(server);
    let mut lookup = Lookup {
        case_insensitive: catalog.case_insensitive(),
        schemas: HashMap::new(),
        tables: HashMap::new(),
        views: HashMap::new(),
        routines: HashMap::new(),
    };

    let rows = session
        .query(
            "SELECT SCHEMA_NAME, DEFAULT_CHARACTER_SET_NAME, DEFAULT_COLLATION_NAME \
             FROM information_schema.SCHEMATA ORDER BY SCHEMA_NAME",
        )
        .await?;
    let mut names = Vec::new();
    for row in rows {
        let name = text(&row, 0);
        if is_system_schema(&name) || !include_schema(&name) {
            continue;
        }
        let mut schema = Schema::new(name.clone());
        schema.charset = text(&row, 1);
        schema.collation = text(&row, 2);
        let id = catalog.add_schema(schema);
        let key = lookup.key(&name);
        lookup.schemas.insert(key, id);
        names.push(name);
    }
    if names.is_empty() {
        return Ok(catalog);
    }
    let list = in_list(&names);

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, TABLE_TYPE, ENGINE, TABLE_COLLATION, CREATE_OPTIONS, \
             TABLE_ROWS, AVG_ROW_LENGTH, DATA_LENGTH FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA IN ({}) ORDER BY TABLE_SCHEMA, TABLE_NAME",
            list
        ))
        .await?;
    for row in rows {
        let (schema_name, name) = (text(&row, 0), text(&row, 1));
        let Some(sid) = lookup.schema(&schema_name) else {
            continue;
        };
        match text(&row, 2).as_str() {
            "VIEW" => {
                let id = catalog.add_view(View {
                    schema: sid,
                    name: name.clone(),
                    definer: String::new(),
                    security: SqlSecurity::Definer,
                    references: Vec::new(),
                    columns: Vec::new(),
                    ddl: String::new(),
                });
                let key = (lookup.key(&schema_name), lookup.key(&name));
                lookup.views.insert(key, id);
            }
            "BASE TABLE" => {
                let mut table = Table::new(sid, name.clone());
                table.engine = text(&row, 3);
                table.collation = row.text(4);
                table.create_options = text(&row, 5);
                table.row_count = row.u64(6).unwrap_or_default();
                table.avg_row_length = row.u64(7).unwrap_or_default();
                table.data_length = row.u64(8).unwrap_or_default();
                table.ddl_only = schema_name == "mysql";
                let id = catalog.add_table(table);
                let key = (lookup.key(&schema_name), lookup.key(&name));
                lookup.tables.insert(key, id);
            }
            other => debug!(schema = %schema_name, table = %name, kind = other, "Skipping object"),
        }
    }

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, IS_NULLABLE, EXTRA \
             FROM information_schema.COLUMNS WHERE TABLE_SCHEMA IN ({}) \
             ORDER BY TABLE_SCHEMA, TABLE_NAME, ORDINAL_POSITION",
            list
        ))
        .await?;
    for row in rows {
        let (schema_name, table_name, column) = (text(&row, 0), text(&row, 1), text(&row, 2));
        if let Some(tid) = lookup.table(&schema_name, &table_name) {
            let extra = text(&row, 6).to_ascii_lowercase();
            catalog.table_mut(tid).columns.push(Column {
                name: column,
                data_type: text(&row, 3),
                column_type: text(&row, 4),
                nullable: flag(&row, 5),
                auto_increment: extra.contains("auto_increment"),
                generated: extra.contains("generated"),
            });
        } else if let Some(vid) = lookup.view(&schema_name, &table_name) {
            catalog.views[vid.0].columns.push(column);
        }
    }

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, NON_UNIQUE, INDEX_TYPE, COLUMN_NAME, COLLATION, NULLABLE \
             FROM information_schema.STATISTICS WHERE TABLE_SCHEMA IN ({}) \
             ORDER BY TABLE_SCHEMA, TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX",
            list
        ))
        .await?;
    for row in rows {
        let Some(tid) = lookup.table(&text(&row, 0), &text(&row, 1)) else {
            continue;
        };
        let index_name = text(&row, 2);
        let kind = match text(&row, 4).to_ascii_uppercase().as_str() {
            "FULLTEXT" => IndexKind::Fulltext,
            "SPATIAL" => IndexKind::Spatial,
            _ => IndexKind::Btree,
        };
        let column = IndexColumn {
            name: row.text(5),
            descending: text(&row, 6) == "D",
            nullable: flag(&row, 7),
        };
        let table = catalog.table_mut(tid);
        match table.indexes.iter_mut().find(|i| i.name == index_name) {
            Some(index) => index.columns.push(column),
            None => table.indexes.push(Index {
                name: index_name,
                unique: row.u64(3) == Some(0),
                kind,
                columns: vec![column],
            }),
        }
    }
    for table in &mut catalog.tables {
        table.indexes.sort_by_key(|i| !i.is_primary());
    }

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, PARTITION_NAME, SUBPARTITION_NAME \
             FROM information_schema.PARTITIONS WHERE TABLE_SCHEMA IN ({}) AND PARTITION_NAME IS NOT NULL \
             ORDER BY TABLE_SCHEMA, TABLE_NAME, PARTITION_ORDINAL_POSITION, SUBPARTITION_ORDINAL_POSITION",
            list
        ))
        .await?;
    for row in rows {
        let Some(tid) = lookup.table(&text(&row, 0), &text(&row, 1)) else {
            continue;
        };
        let partition = text(&row, 2);
        let sub = row.text(3);
        let table = catalog.table_mut(tid);
        if table.partitions.last().map(|p| &p.name) != Some(&partition) {
            table.partitions.push(Partition {
                name: partition,
                subpartitions: Vec::new(),
            });
        }
        if let (Some(sub), Some(last)) = (sub, table.partitions.last_mut()) {
            last.subpartitions.push(sub);
        }
    }

    let rows = session
        .query(&format!(
            "SELECT TRIGGER_SCHEMA, TRIGGER_NAME, EVENT_OBJECT_TABLE, EVENT_MANIPULATION, ACTION_TIMING, DEFINER \
             FROM information_schema.TRIGGERS WHERE TRIGGER_SCHEMA IN ({}) \
             ORDER BY TRIGGER_SCHEMA, EVENT_OBJECT_TABLE, ACTION_ORDER",
            list
        ))
        .await?;
    for row in rows {
        if let Some(tid) = lookup.table(&text(&row, 0), &text(&row, 2)) {
            catalog.add_trigger(Trigger {
                table: tid,
                name: text(&row, 1),
                event: text(&row, 3),
                timing: text(&row, 4),
                definer: text(&row, 5),
                ddl: String::new(),
            });
        }
    }

    let rows = session
        .query(&format!(
            "SELECT TABLE_SCHEMA, TABLE_NAME, DEFINER, SECURITY_TYPE FROM information_schema.VIEWS \
             WHERE TABLE_SCHEMA IN ({})",
            list
        ))
        .await?;
    for row in rows {
        if let Some(vid) = lookup.view(&text(&row, 0), &text(&row, 1)) {
            let view = &mut catalog.views[vid.0];
            view.definer = text(&row, 2);
            view.security = if text(&row, 3).eq_ignore_ascii_case("INVOKER") {
                SqlSecurity::Invoker
            } else {
                SqlSecurity::Definer
            };
        }
    }

    match session
        .query(&format!(
            "SELECT VIEW_SCHEMA, VIEW_NAME, TABLE_SCHEMA, TABLE_NAME FROM information_schema.VIEW_TABLE_USAGE \
             WHERE VIEW_SCHEMA IN ({})",
            list
        ))
        .await
    {
        Ok(rows) => {
            for row in rows {
                if let Some(vid) = lookup.view(&text(&row, 0), &text(&row, 1)) {
                    catalog.views[vid.0]
                        .references
                        .push((text(&row, 2), text(&row, 3)));
                }
            }
        }
        Err(e) => debug!(error = %e, "View dependencies are not available"),
    }

    let rows = session
        .query(&format!(
            "SELECT ROUTINE_SCHEMA, ROUTINE_NAME, ROUTINE_TYPE, DEFINER, SECURITY_TYPE, \
             IF(ROUTINE_BODY = 'EXTERNAL', 'JAVASCRIPT', 'SQL') FROM information_schema.ROUTINES \
             WHERE ROUTINE_SCHEMA IN ({}) ORDER BY ROUTINE_SCHEMA, ROUTINE_TYPE, ROUTINE_NAME",
            list
        ))
        .await?;
    for row in rows {
        let schema_name = text(&row, 0);
        let Some(sid) = lookup.schema(&schema_name) else {
            continue;
        };
        let kind = if text(&row, 2).eq_ignore_ascii_case("FUNCTION") {
            RoutineKind::Function
        } else {
            RoutineKind::Procedure
        };
        let name = text(&row, 1);
        let id = catalog.add_routine(Routine {
            schema: sid,
            name: name.clone(),
            kind,
            definer: text(&row, 3),
            security: if text(&row, 4).eq_ignore_ascii_case("INVOKER") {
                SqlSecurity::Invoker
            } else {
                SqlSecurity::Definer
            },
            language: text(&row, 5),
            libraries: Vec::new(),
            ddl: String::new(),
        });
        let key = (lookup.key(&schema_name), lookup.key(&name), kind.keyword().to_string());
        lookup.routines.insert(key, id);
    }

    let libraries_supported = catalog
        .server
        .version
        .is_some_and(|v| v >= LIBRARIES_VERSION);
    if libraries_supported {
        let rows = session
            .query(&format!(
                "SELECT LIBRARY_SCHEMA, LIBRARY_NAME, LANGUAGE FROM information_schema.LIBRARIES \
                 WHERE LIBRARY_SCHEMA IN ({}) ORDER BY LIBRARY_SCHEMA, LIBRARY_NAME",
                list
            ))
            .await?;
        for row in rows {
            if let Some(sid) = lookup.schema(&text(&row, 0)) {
                catalog.add_library(Library {
                    schema: sid,
                    name: text(&row, 1),
                    language: text(&row, 2),
                    ddl: String::new(),
                });
            }
        }
        let rows = session
            .query(&format!(
                "SELECT ROUTINE_SCHEMA, ROUTINE_NAME, ROUTINE_TYPE, LIBRARY_SCHEMA, LIBRARY_NAME \
                 FROM information_schema.ROUTINE_LIBRARIES WHERE ROUTINE_SCHEMA IN ({})",
                list
            ))
            .await?;
        for row in rows {
            let key = (
                lookup.key(&text(&row, 0)),
                lookup.key(&text(&row, 1)),
                text(&row, 2).to_ascii_uppercase(),
            );
            if let Some(rid) = lookup.routines.get(&key) {
                catalog.routines[rid.0]
                    .libraries
                    .push((text(&row, 3), text(&row, 4)));
            }
        }
    }

    let rows = session
        .query(&format!(
            "SELECT EVENT_SCHEMA, EVENT_NAME, DEFINER FROM information_schema.EVENTS \
             WHERE EVENT_SCHEMA IN ({}) ORDER BY EVENT_SCHEMA, EVENT_NAME",
            list
        ))
        .await?;
    for row in rows {
        if let Some(sid) = lookup.schema(&text(&row, 0)) {
            catalog.add_event(Event {
                schema: sid,
                name: text(&row, 1),
                definer: text(&row, 2),
                ddl: String::new(),
            });
        }
    }

    match session
        .query(&format!(
            "SELECT SCHEMA_NAME, TABLE_NAME, COLUMN_NAME FROM information_schema.COLUMN_STATISTICS \
             WHERE SCHEMA_NAME IN ({})",
            list
        ))
        .await
    {
        Ok(rows) => {
            for row in rows {
                if let Some(tid) = lookup.table(&text(&row, 0), &text(&row, 1)) {
                    catalog.table_mut(tid).histograms.push(text(&row, 2));
                }
            }
        }
        Err(e) => debug!(error = %e, "Histogram statistics are not available"),
    }

    info!(
        schemas = catalog.schema_order.len(),
        tables = catalog.tables.len(),
        views = catalog.views.len(),
        "Read catalog"
    );
    Ok(catalog)
}

/// Read every account but the ones the server creates for itself
pub async fn read_users(session: &mut dyn Session, catalog: &mut Catalog) -> Result<()> {
    let rows = session
        .query(
            "SELECT User, Host, plugin, authentication_string <> '' AS has_password, \
             account_locked = 'Y' AND password_expired = 'Y' AND authentication_string = '' AS is_role \
             FROM mysql.user ORDER BY User, Host",
        )
        .await
        .map_err(|e| match e {
            e if e.is_privilege() => Error::privilege(
                "mysql.user",
                "Reading user accounts requires the SELECT privilege on the mysql.user table",
                Some(e),
            ),
            e => e.into(),
        })?;
    for row in rows {
        let (user, host) = (text(&row, 0), text(&row, 1));
        if SYSTEM_ACCOUNTS.contains(&user.as_str()) && host == "localhost" {
            continue;
        }
        catalog.users.push(User {
            user,
            host,
            plugin: text(&row, 2),
            has_password: flag(&row, 3),
            is_role: flag(&row, 4),
            create: String::new(),
            grants: Vec::new(),
        });
    }
    Ok(())
}

/// Read `CREATE USER` and `GRANT` statements of the accounts left after filtering
pub async fn fetch_user_ddl(session: &mut dyn Session, catalog: &mut Catalog) -> Result<()> {
    for user in &mut catalog.users {
        let account = format_account(&user.user, &user.host);
        let create = session
            .query_one(&format!("SHOW CREATE USER {}", account))
            .await
            .map_err(|e| Error::grant(account.clone(), e))?;
        user.create = create.map(|r| text(&r, 0)).unwrap_or_default();
        user.grants = session
            .query(&format!("SHOW GRANTS FOR {}", account))
            .await
            .map_err(|e| Error::grant(account.clone(), e))?
            .iter()
            .map(|r| text(r, 0))
            .collect();
    }
    Ok(())
}

/// Column of a `SHOW CREATE` result, by name with a positional fallback
fn create_column(row: &Row, name: &str, idx: usize) -> Option<String> {
    row.get_by_name(name)
        .and_then(|v| v.to_text())
        .or_else(|| row.text(idx))
}

async fn show_create(
    session: &mut dyn Session,
    object: &str,
    sql: String,
    column: &str,
    idx: usize,
) -> Result<String> {
    let row = session
        .query_one(&sql)
        .await
        .map_err(|e| Error::ddl(object, e))?;
    row.and_then(|r| create_column(&r, column, idx))
        .filter(|ddl| !ddl.is_empty())
        .ok_or_else(|| Error::privilege(
            object,
            format!("The definition of {} is not visible to the current account", object),
            None,
        ))
}

/// What [`fetch_ddl`] reads
#[derive(Debug, Clone, Copy)]
pub struct DdlSelection {
    pub triggers: bool,
    pub routines: bool,
    pub events: bool,
    pub libraries: bool,
}

impl Default for DdlSelection {
    fn default() -> Self {
        Self {
            triggers: true,
            routines: true,
            events: true,
            libraries: true,
        }
    }
}

/// Run `SHOW CREATE` for every object left in the catalog
pub async fn fetch_ddl(
    session: &mut dyn Session,
    catalog: &mut Catalog,
    selection: DdlSelection,
) -> Result<()> {
    for sid in catalog.schema_order.clone() {
        let name = catalog.schema(sid).name.clone();
        let q = quote_identifier(&name);
        catalog.schemas[sid.0].ddl = show_create(
            session,
            &q,
            format!("SHOW CREATE DATABASE IF NOT EXISTS {}", q),
            "Create Database",
            1,
        )
        .await?;

        for tid in catalog.schema(sid).tables.clone() {
            let object = catalog.table_name(tid);
            catalog.tables[tid.0].ddl = show_create(
                session,
                &object,
                format!("SHOW CREATE TABLE {}", object),
                "Create Table",
                1,
            )
            .await?;
            if selection.triggers {
                for trg in catalog.table(tid).triggers.clone() {
                    let object = quote_qualified(&name, &catalog.trigger(trg).name);
                    catalog.triggers[trg.0].ddl = show_create(
                        session,
                        &object,
                        format!("SHOW CREATE TRIGGER {}", object),
                        "SQL Original Statement",
                        2,
                    )
                    .await?;
                }
            }
        }

        for vid in catalog.schema(sid).views.clone() {
            let object = catalog.view_name(vid);
            catalog.views[vid.0].ddl = show_create(
                session,
                &object,
                format!("SHOW CREATE VIEW {}", object),
                "Create View",
                1,
            )
            .await?;
        }

        if selection.routines {
            for rid in catalog.schema(sid).routines.clone() {
                let object = catalog.routine_name(rid);
                let kind = catalog.routine(rid).kind;
                let column = match kind {
                    RoutineKind::Procedure => "Create Procedure",
                    RoutineKind::Function => "Create Function",
                };
                catalog.routines[rid.0].ddl = show_create(
                    session,
                    &object,
                    format!("SHOW CREATE {} {}", kind.keyword(), object),
                    column,
                    2,
                )
                .await?;
            }
        }

        if selection.events {
            for eid in catalog.schema(sid).events.clone() {
                let object = catalog.event_name(eid);
                catalog.events[eid.0].ddl = show_create(
                    session,
                    &object,
                    format!("SHOW CREATE EVENT {}", object),
                    "Create Event",
                    3,
                )
                .await?;
            }
        }

        if selection.libraries {
            for lid in catalog.schema(sid).libraries.clone() {
                let object = catalog.library_name(lid);
                catalog.libraries[lid.0].ddl = show_create(
                    session,
                    &object,
                    format!("SHOW CREATE LIBRARY {}", object),
                    "Create Library",
                    1,
                )
                .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_session::testing::{Script, ScriptedFactory};
    use quarry_session::{SessionFactory, Value};

    fn script() -> Script {
        Script::new()
            .rows(
                r"^SELECT @@version,",
                &["v", "uuid", "host", "lctn", "map"],
                vec![vec![
                    "8.0.36".into(),
                    "uuid-1".into(),
                    "db1".into(),
                    Value::UInt(0),
                    Value::UInt(67108864),
                ]],
            )
            .rows(
                r"FROM information_schema\.SCHEMATA",
                &["n", "c", "o"],
                vec![
                    vec!["mysql".into(), "utf8mb4".into(), "utf8mb4_0900_ai_ci".into()],
                    vec!["sys".into(), "utf8mb4".into(), "utf8mb4_0900_ai_ci".into()],
                    vec!["world".into(), "utf8mb4".into(), "utf8mb4_0900_ai_ci".into()],
                ],
            )
            .rows(
                r"FROM information_schema\.TABLES",
                &["s", "n", "t", "e", "c", "o", "r", "a", "d"],
                vec![
                    vec![
                        "world".into(),
                        "city".into(),
                        "BASE TABLE".into(),
                        "InnoDB".into(),
                        "utf8mb4_0900_ai_ci".into(),
                        "".into(),
                        Value::UInt(4000),
                        Value::UInt(100),
                        Value::UInt(400000),
                    ],
                    vec![
                        "world".into(),
                        "v_city".into(),
                        "VIEW".into(),
                        Value::Null,
                        Value::Null,
                        Value::Null,
                        Value::Null,
                        Value::Null,
                        Value::Null,
                    ],
                ],
            )
            .rows(
                r"FROM information_schema\.COLUMNS",
                &["s", "t", "c", "d", "ct", "n", "e"],
                vec![
                    vec![
                        "world".into(),
                        "city".into(),
                        "id".into(),
                        "int".into(),
                        "int".into(),
                        "NO".into(),
                        "auto_increment".into(),
                    ],
                    vec![
                        "world".into(),
                        "city".into(),
                        "name".into(),
                        "varchar".into(),
                        "varchar(35)".into(),
                        "YES".into(),
                        "".into(),
                    ],
                    vec![
                        "world".into(),
                        "v_city".into(),
                        "name".into(),
                        "varchar".into(),
                        "varchar(35)".into(),
                        "YES".into(),
                        "".into(),
                    ],
                ],
            )
            .rows(
                r"FROM information_schema\.STATISTICS",
                &["s", "t", "i", "nu", "it", "c", "co", "n"],
                vec![
                    vec![
                        "world".into(),
                        "city".into(),
                        "name_idx".into(),
                        Value::UInt(1),
                        "BTREE".into(),
                        "name".into(),
                        "A".into(),
                        "YES".into(),
                    ],
                    vec![
                        "world".into(),
                        "city".into(),
                        "PRIMARY".into(),
                        Value::UInt(0),
                        "BTREE".into(),
                        "id".into(),
                        "A".into(),
                        "".into(),
                    ],
                ],
            )
            .rows(
                r"FROM information_schema\.VIEW_TABLE_USAGE",
                &["vs", "vn", "s", "t"],
                vec![vec!["world".into(), "v_city".into(), "world".into(), "city".into()]],
            )
            .rows(
                r"SHOW CREATE DATABASE",
                &["Database", "Create Database"],
                vec![vec!["world".into(), "CREATE DATABASE `world`".into()]],
            )
            .on_fn(r"^SHOW CREATE TABLE `world`\.`(\w+)`", |caps, _| {
                quarry_session::testing::Reply::rows(
                    &["Table", "Create Table"],
                    vec![vec![
                        caps[1].to_string().into(),
                        format!("CREATE TABLE `{}` (`id` int)", &caps[1]).into(),
                    ]],
                )
            })
            .rows(
                r"SHOW CREATE VIEW",
                &["View", "Create View"],
                vec![vec!["v_city".into(), "CREATE VIEW `v_city` AS select 1".into()]],
            )
    }

    #[tokio::test]
    async fn test_read_and_fetch() {
        let factory = ScriptedFactory::new(script());
        let mut session = factory.connect().await.unwrap();
        let mut catalog = read_catalog(session.as_mut(), |_| true).await.unwrap();

        assert_eq!(catalog.server.version, Some(Version::new(8, 0, 36)));
        assert!(catalog.find_schema("sys").is_none());
        let city = catalog.find_table("world", "city").unwrap();
        let table = catalog.table(city);
        assert_eq!(table.columns.len(), 2);
        assert!(table.columns[0].auto_increment);
        assert_eq!(table.indexes[0].name, "PRIMARY");
        assert!(table.indexes[0].unique);
        assert!(table.indexes[1].has_nullable_column());
        let view = catalog.view(catalog.all_views().next().unwrap());
        assert_eq!(view.columns, vec!["name"]);
        assert_eq!(view.references, vec![("world".to_string(), "city".to_string())]);

        fetch_ddl(session.as_mut(), &mut catalog, DdlSelection::default())
            .await
            .unwrap();
        assert_eq!(catalog.table(city).ddl, "CREATE TABLE `city` (`id` int)");
        let mysql = catalog.find_schema("mysql").unwrap();
        assert_eq!(catalog.schema(mysql).ddl, "CREATE DATABASE `world`");
        assert!(factory.matching("LIBRARIES").is_empty());
    }

    #[tokio::test]
    async fn test_missing_definition_is_privilege_error() {
        let factory = ScriptedFactory::new(script());
        factory.prepend(Script::new().rows(
            r"^SHOW CREATE DATABASE",
            &["Database", "Create Database"],
            vec![],
        ));
        let mut session = factory.connect().await.unwrap();
        let mut catalog = read_catalog(session.as_mut(), |s| s == "world").await.unwrap();
        let err = fetch_ddl(session.as_mut(), &mut catalog, DdlSelection::default())
            .await
            .unwrap_err();
        assert_eq!(err.component(), "LOCK");
    }
}
