//! In-memory catalog of an instance
//!
//! Entities live in arenas owned by [`Catalog`] and refer to each other by id:
//! a schema lists the ids of its tables and views, a table lists the ids of
//! its triggers and a trigger points back at its table. Filtering removes ids
//! from those lists; the arenas themselves never shrink, so ids stay valid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ident::{format_account, quote_identifier, quote_qualified};
use crate::version::Version;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub usize);
    };
}

id_type!(SchemaId);
id_type!(TableId);
id_type!(ViewId);
id_type!(RoutineId);
id_type!(EventId);
id_type!(TriggerId);
id_type!(LibraryId);

/// Schemas never dumped
pub const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "performance_schema", "sys", "ndbinfo"];

pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS.iter().any(|s| s.eq_ignore_ascii_case(name))
}

/// A column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// `DATA_TYPE`, such as `varchar`
    pub data_type: String,
    /// `COLUMN_TYPE`, such as `varchar(20)`
    pub column_type: String,
    pub nullable: bool,
    pub auto_increment: bool,
    /// Generated columns are not dumped and not loaded
    pub generated: bool,
}

impl Column {
    /// Values are transferred encoded and decoded on load
    pub fn is_binary(&self) -> bool {
        matches!(
            self.data_type.to_ascii_lowercase().as_str(),
            "binary"
                | "varbinary"
                | "tinyblob"
                | "blob"
                | "mediumblob"
                | "longblob"
                | "bit"
                | "geometry"
                | "point"
                | "linestring"
                | "polygon"
                | "multipoint"
                | "multilinestring"
                | "multipolygon"
                | "geometrycollection"
                | "geomcollection"
        )
    }

    /// Values that can be written as bare SQL literals
    pub fn is_numeric(&self) -> bool {
        matches!(
            self.data_type.to_ascii_lowercase().as_str(),
            "tinyint"
                | "smallint"
                | "mediumint"
                | "int"
                | "integer"
                | "bigint"
                | "decimal"
                | "numeric"
                | "float"
                | "double"
                | "real"
        )
    }

    /// Enclosed when fields are optionally enclosed
    pub fn is_string(&self) -> bool {
        self.is_binary()
            || matches!(
                self.data_type.to_ascii_lowercase().as_str(),
                "char"
                    | "varchar"
                    | "tinytext"
                    | "text"
                    | "mediumtext"
                    | "longtext"
                    | "enum"
                    | "set"
                    | "json"
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Btree,
    Fulltext,
    Spatial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexColumn {
    /// `None` for a functional key part
    pub name: Option<String>,
    pub descending: bool,
    pub nullable: bool,
}

/// An index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub name: String,
    pub unique: bool,
    pub kind: IndexKind,
    pub columns: Vec<IndexColumn>,
}

impl Index {
    pub fn is_primary(&self) -> bool {
        self.name == "PRIMARY"
    }

    /// Every key part is a plain column
    pub fn is_plain(&self) -> bool {
        self.columns.iter().all(|c| c.name.is_some())
    }

    pub fn has_nullable_column(&self) -> bool {
        self.columns.iter().any(|c| c.nullable)
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().filter_map(|c| c.name.clone()).collect()
    }
}

/// A partition and its subpartitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub subpartitions: Vec<String>,
}

/// A base table
#[derive(Debug, Clone)]
pub struct Table {
    pub schema: SchemaId,
    pub name: String,
    pub engine: String,
    pub collation: Option<String>,
    pub create_options: String,
    pub row_count: u64,
    pub avg_row_length: u64,
    pub data_length: u64,
    pub columns: Vec<Column>,
    pub indexes: Vec<Index>,
    pub partitions: Vec<Partition>,
    pub triggers: Vec<TriggerId>,
    /// Columns with histogram statistics
    pub histograms: Vec<String>,
    pub tablespace: Option<String>,
    /// `SHOW CREATE TABLE`, after compatibility rewrites
    pub ddl: String,
    /// Statements run right after the `CREATE TABLE`
    pub post_ddl: Vec<String>,
    /// Data is not dumped, only DDL
    pub ddl_only: bool,
}

impl Table {
    pub fn new(schema: SchemaId, name: impl Into<String>) -> Self {
        Self {
            schema,
            name: name.into(),
            engine: "InnoDB".to_string(),
            collation: None,
            create_options: String::new(),
            row_count: 0,
            avg_row_length: 0,
            data_length: 0,
            columns: Vec::new(),
            indexes: Vec::new(),
            partitions: Vec::new(),
            triggers: Vec::new(),
            histograms: Vec::new(),
            tablespace: None,
            ddl: String::new(),
            post_ddl: Vec::new(),
            ddl_only: false,
        }
    }

    pub fn primary_key(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.is_primary())
    }

    pub fn has_unique_key(&self) -> bool {
        self.indexes.iter().any(|i| i.unique)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Names of the partitions holding rows: subpartitions when present
    pub fn leaf_partitions(&self) -> Vec<String> {
        self.partitions
            .iter()
            .flat_map(|p| {
                if p.subpartitions.is_empty() {
                    vec![p.name.clone()]
                } else {
                    p.subpartitions.clone()
                }
            })
            .collect()
    }

    /// Columns that are dumped and loaded
    pub fn data_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| !c.generated)
    }

    /// Estimated size of the table data
    pub fn estimated_bytes(&self) -> u64 {
        if self.data_length > 0 {
            self.data_length
        } else {
            self.row_count.saturating_mul(self.avg_row_length)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SqlSecurity {
    Definer,
    Invoker,
}

/// A view
#[derive(Debug, Clone)]
pub struct View {
    pub schema: SchemaId,
    pub name: String,
    pub definer: String,
    pub security: SqlSecurity,
    /// Tables and views the view selects from
    pub references: Vec<(String, String)>,
    pub columns: Vec<String>,
    pub ddl: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoutineKind {
    Procedure,
    Function,
}

impl RoutineKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Procedure => "PROCEDURE",
            Self::Function => "FUNCTION",
        }
    }
}

/// A stored procedure or function
#[derive(Debug, Clone)]
pub struct Routine {
    pub schema: SchemaId,
    pub name: String,
    pub kind: RoutineKind,
    pub definer: String,
    pub security: SqlSecurity,
    /// `SQL` or `JAVASCRIPT`
    pub language: String,
    /// Libraries the routine uses
    pub libraries: Vec<(String, String)>,
    pub ddl: String,
}

/// A library
#[derive(Debug, Clone)]
pub struct Library {
    pub schema: SchemaId,
    pub name: String,
    pub language: String,
    pub ddl: String,
}

/// A scheduled event
#[derive(Debug, Clone)]
pub struct Event {
    pub schema: SchemaId,
    pub name: String,
    pub definer: String,
    pub ddl: String,
}

/// A trigger
#[derive(Debug, Clone)]
pub struct Trigger {
    pub table: TableId,
    pub name: String,
    /// `INSERT`, `UPDATE` or `DELETE`
    pub event: String,
    /// `BEFORE` or `AFTER`
    pub timing: String,
    pub definer: String,
    pub ddl: String,
}

/// A user account
#[derive(Debug, Clone)]
pub struct User {
    pub user: String,
    pub host: String,
    pub plugin: String,
    pub has_password: bool,
    /// Account is a role: locked, without password
    pub is_role: bool,
    /// `CREATE USER` statement
    pub create: String,
    /// `GRANT` statements
    pub grants: Vec<String>,
}

impl User {
    pub fn account(&self) -> String {
        format_account(&self.user, &self.host)
    }
}

/// A schema
#[derive(Debug, Clone)]
pub struct Schema {
    pub name: String,
    pub charset: String,
    pub collation: String,
    pub ddl: String,
    pub tables: Vec<TableId>,
    pub views: Vec<ViewId>,
    pub routines: Vec<RoutineId>,
    pub events: Vec<EventId>,
    pub libraries: Vec<LibraryId>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            charset: "utf8mb4".to_string(),
            collation: "utf8mb4_0900_ai_ci".to_string(),
            ddl: String::new(),
            tables: Vec::new(),
            views: Vec::new(),
            routines: Vec::new(),
            events: Vec::new(),
            libraries: Vec::new(),
        }
    }
}

/// Facts about the server the catalog was read from
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub version: Option<Version>,
    pub version_string: String,
    pub server_uuid: String,
    pub hostname: String,
    pub lower_case_table_names: u8,
    pub max_allowed_packet: u64,
    pub partial_revokes: bool,
}

/// Catalog of schemas and accounts
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub server: ServerInfo,
    /// Schemas in dump order
    pub schema_order: Vec<SchemaId>,
    pub schemas: Vec<Schema>,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub routines: Vec<Routine>,
    pub events: Vec<Event>,
    pub triggers: Vec<Trigger>,
    pub libraries: Vec<Library>,
    pub users: Vec<User>,
    /// Tables that existed but were filtered out, as `(schema, table)`
    pub excluded_tables: BTreeSet<(String, String)>,
}

impl Catalog {
    pub fn new(server: ServerInfo) -> Self {
        Self {
            server,
            ..Default::default()
        }
    }

    /// Names are compared without case
    pub fn case_insensitive(&self) -> bool {
        self.server.lower_case_table_names != 0
    }

    pub fn add_schema(&mut self, schema: Schema) -> SchemaId {
        let id = SchemaId(self.schemas.len());
        self.schemas.push(schema);
        self.schema_order.push(id);
        id
    }

    pub fn add_table(&mut self, table: Table) -> TableId {
        let id = TableId(self.tables.len());
        self.schemas[table.schema.0].tables.push(id);
        self.tables.push(table);
        id
    }

    pub fn add_view(&mut self, view: View) -> ViewId {
        let id = ViewId(self.views.len());
        self.schemas[view.schema.0].views.push(id);
        self.views.push(view);
        id
    }

    pub fn add_routine(&mut self, routine: Routine) -> RoutineId {
        let id = RoutineId(self.routines.len());
        self.schemas[routine.schema.0].routines.push(id);
        self.routines.push(routine);
        id
    }

    pub fn add_event(&mut self, event: Event) -> EventId {
        let id = EventId(self.events.len());
        self.schemas[event.schema.0].events.push(id);
        self.events.push(event);
        id
    }

    pub fn add_library(&mut self, library: Library) -> LibraryId {
        let id = LibraryId(self.libraries.len());
        self.schemas[library.schema.0].libraries.push(id);
        self.libraries.push(library);
        id
    }

    pub fn add_trigger(&mut self, trigger: Trigger) -> TriggerId {
        let id = TriggerId(self.triggers.len());
        self.tables[trigger.table.0].triggers.push(id);
        self.triggers.push(trigger);
        id
    }

    pub fn schema(&self, id: SchemaId) -> &Schema {
        &self.schemas[id.0]
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id.0]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id.0]
    }

    pub fn view(&self, id: ViewId) -> &View {
        &self.views[id.0]
    }

    pub fn routine(&self, id: RoutineId) -> &Routine {
        &self.routines[id.0]
    }

    pub fn event(&self, id: EventId) -> &Event {
        &self.events[id.0]
    }

    pub fn trigger(&self, id: TriggerId) -> &Trigger {
        &self.triggers[id.0]
    }

    pub fn library(&self, id: LibraryId) -> &Library {
        &self.libraries[id.0]
    }

    pub fn find_schema(&self, name: &str) -> Option<SchemaId> {
        let ci = self.case_insensitive();
        self.schema_order.iter().copied().find(|id| {
            let n = &self.schemas[id.0].name;
            if ci {
                n.eq_ignore_ascii_case(name)
            } else {
                n == name
            }
        })
    }

    pub fn find_table(&self, schema: &str, table: &str) -> Option<TableId> {
        let ci = self.case_insensitive();
        let sid = self.find_schema(schema)?;
        self.schemas[sid.0].tables.iter().copied().find(|id| {
            let n = &self.tables[id.0].name;
            if ci {
                n.eq_ignore_ascii_case(table)
            } else {
                n == table
            }
        })
    }

    /// Included tables in dump order
    pub fn all_tables(&self) -> impl Iterator<Item = TableId> + '_ {
        self.schema_order
            .iter()
            .flat_map(move |sid| self.schemas[sid.0].tables.iter().copied())
    }

    pub fn all_views(&self) -> impl Iterator<Item = ViewId> + '_ {
        self.schema_order
            .iter()
            .flat_map(move |sid| self.schemas[sid.0].views.iter().copied())
    }

    pub fn all_routines(&self) -> impl Iterator<Item = RoutineId> + '_ {
        self.schema_order
            .iter()
            .flat_map(move |sid| self.schemas[sid.0].routines.iter().copied())
    }

    /// `` `schema`.`table` ``
    pub fn table_name(&self, id: TableId) -> String {
        let t = self.table(id);
        quote_qualified(&self.schema(t.schema).name, &t.name)
    }

    pub fn view_name(&self, id: ViewId) -> String {
        let v = self.view(id);
        quote_qualified(&self.schema(v.schema).name, &v.name)
    }

    pub fn routine_name(&self, id: RoutineId) -> String {
        let r = self.routine(id);
        quote_qualified(&self.schema(r.schema).name, &r.name)
    }

    pub fn event_name(&self, id: EventId) -> String {
        let e = self.event(id);
        quote_qualified(&self.schema(e.schema).name, &e.name)
    }

    pub fn library_name(&self, id: LibraryId) -> String {
        let l = self.library(id);
        quote_qualified(&self.schema(l.schema).name, &l.name)
    }

    /// `` `schema`.`table`.`trigger` ``
    pub fn trigger_name(&self, id: TriggerId) -> String {
        let trg = self.trigger(id);
        format!("{}.{}", self.table_name(trg.table), quote_identifier(&trg.name))
    }

    /// Number of included tables
    pub fn table_count(&self) -> usize {
        self.all_tables().count()
    }
}
