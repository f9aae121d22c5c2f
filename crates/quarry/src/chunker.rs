//! Chunk planner
//!
//! A table is split into row ranges of roughly `bytesPerChunk` bytes along a
//! primary or unique key. Boundaries are found with a keyset walk: starting
//! after the previous boundary, the key of the row `rows_per_chunk` further in
//! index order becomes the next boundary.
//!
//! ```text
//! SELECT `id` FROM `s`.`t` WHERE (`id`) > (1000) ORDER BY `id` LIMIT 1 OFFSET 999
//! ```
//!
//! Chunk predicates compare the key tuple against consecutive boundaries, so
//! chunks concatenated in id order hold the rows in index order.

use quarry_session::prelude::*;
use std::collections::BTreeMap;
use tracing::debug;

use crate::catalog::{Catalog, Column, Index, IndexKind, Table, TableId};
use crate::console::Console;
use crate::error::{Error, Result};
use crate::ident::{quote_identifier, split_qualified};
use crate::options::DumpOptions;

/// Times a plan is redone with doubled chunk size before it is accepted
const MAX_REPLANS: usize = 3;

/// Check a user row condition before it is sent to the server
///
/// Parentheses must balance, quotes must close, and the condition may not end
/// the statement or open a comment.
pub fn check_condition(condition: &str) -> std::result::Result<(), String> {
    if condition.trim().is_empty() {
        return Err("condition is empty".to_string());
    }
    let bytes = condition.as_bytes();
    let mut depth = 0i64;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' | b'`' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            b';' => return Err("statement separator is not allowed".to_string()),
            b'#' => return Err("comments are not allowed".to_string()),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                return Err("comments are not allowed".to_string())
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                return Err("comments are not allowed".to_string())
            }
            _ => {}
        }
        i += 1;
    }
    if quote.is_some() {
        return Err("unterminated quoted string".to_string());
    }
    if depth != 0 {
        return Err("unbalanced parentheses".to_string());
    }
    Ok(())
}

/// Index used to order and split a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkIndex {
    pub name: String,
    pub columns: Vec<String>,
    pub descending: Vec<bool>,
    /// Some key part accepts NULL
    pub nullable: bool,
}

impl ChunkIndex {
    fn from_index(index: &Index) -> Self {
        Self {
            name: index.name.clone(),
            columns: index.column_names(),
            descending: index.columns.iter().map(|c| c.descending).collect(),
            nullable: index.has_nullable_column(),
        }
    }

    /// `` `a`, `b` ``
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `ORDER BY` list respecting the index directions
    pub fn order_by(&self) -> String {
        self.columns
            .iter()
            .zip(&self.descending)
            .map(|(c, desc)| {
                if *desc {
                    format!("{} DESC", quote_identifier(c))
                } else {
                    quote_identifier(c)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn uniform_direction(&self) -> Option<bool> {
        let first = *self.descending.first()?;
        self.descending.iter().all(|d| *d == first).then_some(first)
    }

    /// Rows up to and including `bound` in index order
    fn up_to(&self, bound: &[String]) -> String {
        match self.uniform_direction() {
            Some(desc) => format!(
                "({}) {} ({})",
                self.column_list(),
                if desc { ">=" } else { "<=" },
                bound.join(", ")
            ),
            None => format!("NOT ({})", self.after(bound)),
        }
    }

    /// Rows after `bound` in index order
    fn after(&self, bound: &[String]) -> String {
        if let Some(desc) = self.uniform_direction() {
            return format!(
                "({}) {} ({})",
                self.column_list(),
                if desc { "<" } else { ">" },
                bound.join(", ")
            );
        }
        // mixed directions: expand the lexicographic comparison
        let mut terms = Vec::with_capacity(self.columns.len());
        for i in 0..self.columns.len() {
            let mut parts: Vec<String> = (0..i)
                .map(|j| format!("{} = {}", quote_identifier(&self.columns[j]), bound[j]))
                .collect();
            parts.push(format!(
                "{} {} {}",
                quote_identifier(&self.columns[i]),
                if self.descending[i] { "<" } else { ">" },
                bound[i]
            ));
            terms.push(format!("({})", parts.join(" AND ")));
        }
        format!("({})", terms.join(" OR "))
    }

    fn null_rows(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("{} IS NULL", quote_identifier(c)))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// Pick the index a table is chunked along
///
/// Primary key first, then a unique key on NOT NULL columns, then a unique
/// key accepting NULL. Only plain B-tree keys qualify.
pub fn choose_index(table: &Table) -> Option<ChunkIndex> {
    let usable = |i: &&Index| i.kind == IndexKind::Btree && i.is_plain() && !i.columns.is_empty();
    if let Some(pk) = table.primary_key().filter(usable) {
        return Some(ChunkIndex::from_index(pk));
    }
    let unique = table.indexes.iter().filter(|i| i.unique).filter(usable);
    let not_null = unique.clone().find(|i| !i.has_nullable_column());
    not_null
        .or_else(|| unique.clone().next())
        .map(ChunkIndex::from_index)
}

/// One row range of one table or partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in scan order; `None` when the table is not chunked
    pub id: Option<u64>,
    /// Last chunk of its table or partition
    pub last: bool,
    pub partition: Option<String>,
    /// Key range predicate
    pub range: Option<String>,
}

impl Chunk {
    /// Chunk number recorded in the dump, `-1` when not chunked
    pub fn chunk_id(&self) -> i64 {
        self.id.map_or(-1, |id| id as i64)
    }

    /// Short label used in messages and the progress ledger
    pub fn label(&self) -> String {
        let id = self
            .id
            .map_or_else(|| "@".to_string(), |id| id.to_string());
        match &self.partition {
            Some(p) => format!("{}/{}", p, id),
            None => id,
        }
    }
}

/// How a table is dumped
#[derive(Debug, Clone)]
pub struct TablePlan {
    pub table: TableId,
    /// `` `schema`.`table` ``
    pub qualified: String,
    pub index: Option<ChunkIndex>,
    /// User row condition from the `where` option
    pub condition: Option<String>,
    pub chunks: Vec<Chunk>,
}

impl TablePlan {
    pub fn is_chunked(&self) -> bool {
        self.chunks.iter().any(|c| c.id.is_some())
    }

    /// Combined `WHERE` clause of a chunk, empty when unrestricted
    pub fn where_clause(&self, chunk: &Chunk) -> String {
        let mut parts = Vec::new();
        if let Some(range) = &chunk.range {
            parts.push(format!("({})", range));
        }
        if let Some(condition) = &self.condition {
            parts.push(format!("({})", condition));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }

    /// `FROM` clause of a chunk with its partition selection
    pub fn from_clause(&self, chunk: &Chunk) -> String {
        match &chunk.partition {
            Some(p) => format!("{} PARTITION ({})", self.qualified, quote_identifier(p)),
            None => self.qualified.clone(),
        }
    }

    /// Statement reading the rows of a chunk in index order
    pub fn select_sql(&self, chunk: &Chunk, select_list: &str) -> String {
        let order = self
            .index
            .as_ref()
            .map(|i| format!(" ORDER BY {}", i.order_by()))
            .unwrap_or_default();
        format!(
            "SELECT SQL_NO_CACHE {} FROM {}{}{}",
            select_list,
            self.from_clause(chunk),
            self.where_clause(chunk),
            order
        )
    }
}

/// Planner settings taken from the dump options
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub bytes_per_chunk: u64,
    pub chunking: bool,
    pub where_conditions: BTreeMap<(String, String), String>,
    pub partitions: BTreeMap<(String, String), Vec<String>>,
}

fn table_key(key: &str) -> Option<(String, String)> {
    let mut parts = split_qualified(key).ok()?.into_iter();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(schema), Some(table), None) => Some((schema, table)),
        _ => None,
    }
}

impl PlanOptions {
    pub fn from_dump(options: &DumpOptions) -> Self {
        Self {
            bytes_per_chunk: options.bytes_per_chunk,
            chunking: options.chunking,
            where_conditions: options
                .where_conditions
                .iter()
                .filter_map(|(k, v)| table_key(k).map(|key| (key, v.clone())))
                .collect(),
            partitions: options
                .partitions
                .iter()
                .filter_map(|(k, v)| table_key(k).map(|key| (key, v.clone())))
                .collect(),
        }
    }
}

/// Render a key value as an SQL literal
///
/// Only numeric columns take bare literals, temporal and string keys are
/// quoted.
fn sql_literal(value: &Value, column: Option<&Column>) -> String {
    let Some(text) = value.to_text() else {
        return "NULL".to_string();
    };
    match (value, column) {
        (Value::Bytes(bytes), Some(c)) if c.is_binary() => {
            if bytes.is_empty() {
                "''".to_string()
            } else {
                format!("0x{}", hex::encode(bytes))
            }
        }
        (_, Some(c)) if c.is_numeric() => text,
        (Value::Bytes(_), _) | (_, Some(_)) => crate::ident::quote_string(&text),
        (_, None) => text,
    }
}

/// Plans chunks for the tables of one dump
pub struct ChunkPlanner<'a> {
    catalog: &'a Catalog,
    options: &'a PlanOptions,
    console: &'a Console,
}

impl<'a> ChunkPlanner<'a> {
    pub fn new(catalog: &'a Catalog, options: &'a PlanOptions, console: &'a Console) -> Self {
        Self {
            catalog,
            options,
            console,
        }
    }

    /// Partitions to dump, `[None]` for a table without partitions
    fn partitions(&self, table: &Table, object: &str) -> Result<Vec<Option<String>>> {
        let key = (self.catalog.schema(table.schema).name.clone(), table.name.clone());
        let leaves = table.leaf_partitions();
        if let Some(requested) = self.options.partitions.get(&key) {
            let known: Vec<String> = table
                .partitions
                .iter()
                .flat_map(|p| std::iter::once(p.name.clone()).chain(p.subpartitions.iter().cloned()))
                .collect();
            let missing: Vec<String> = requested
                .iter()
                .filter(|p| !known.iter().any(|k| k.eq_ignore_ascii_case(p)))
                .map(|p| quote_identifier(p))
                .collect();
            if !missing.is_empty() {
                return Err(Error::validation(format!(
                    "Following partitions were not found in table {}: {}",
                    object,
                    missing.join(", ")
                )));
            }
            // a partition with subpartitions stands for all of them
            let mut selected = Vec::new();
            for name in requested {
                match table.partitions.iter().find(|p| p.name.eq_ignore_ascii_case(name)) {
                    Some(p) if !p.subpartitions.is_empty() => {
                        selected.extend(p.subpartitions.iter().cloned().map(Some))
                    }
                    Some(p) => selected.push(Some(p.name.clone())),
                    None => selected.push(Some(name.clone())),
                }
            }
            return Ok(selected);
        }
        if leaves.is_empty() {
            Ok(vec![None])
        } else {
            Ok(leaves.into_iter().map(Some).collect())
        }
    }

    /// Validate the user condition of a table with `EXPLAIN`
    async fn check_where(&self, session: &mut dyn Session, object: &str, condition: &str) -> Result<()> {
        check_condition(condition).map_err(|e| {
            Error::validation(format!("Malformed condition used for table {}: {}", object, e))
        })?;
        session
            .execute(&format!("EXPLAIN SELECT 1 FROM {} WHERE ({})", object, condition))
            .await
            .map_err(|e| {
                Error::validation(format!(
                    "Malformed condition used for table {}: {}",
                    object,
                    e.server_message().unwrap_or_default()
                ))
            })?;
        Ok(())
    }

    /// Plan one table
    pub async fn plan(&self, session: &mut dyn Session, tid: TableId) -> Result<TablePlan> {
        let table = self.catalog.table(tid);
        let schema = &self.catalog.schema(table.schema).name;
        let object = self.catalog.table_name(tid);
        let condition = self
            .options
            .where_conditions
            .get(&(schema.clone(), table.name.clone()))
            .cloned();
        if let Some(condition) = &condition {
            self.check_where(session, &object, condition).await?;
        }
        let partitions = self.partitions(table, &object)?;
        let index = choose_index(table);

        let mut plan = TablePlan {
            table: tid,
            qualified: object.clone(),
            index: index.clone(),
            condition,
            chunks: Vec::new(),
        };

        let whole = |partitions: &[Option<String>]| -> Vec<Chunk> {
            partitions
                .iter()
                .map(|p| Chunk {
                    id: None,
                    last: true,
                    partition: p.clone(),
                    range: None,
                })
                .collect()
        };

        if !self.options.chunking {
            plan.chunks = whole(&partitions);
            return Ok(plan);
        }
        let Some(index) = index else {
            self.console.note(format!(
                "Table {} does not have a primary or unique non null key, it will be dumped using a single thread",
                object
            ));
            plan.chunks = whole(&partitions);
            return Ok(plan);
        };
        if index.nullable {
            self.console.warning(format!(
                "Table {} is chunked using the unique index {} which accepts NULL values; rows with NULL keys are dumped in the first chunk",
                object,
                quote_identifier(&index.name)
            ));
        }
        if table.avg_row_length == 0 {
            self.console.note(format!(
                "Table statistics not available for {}, chunking operation may be not optimal. Please consider running 'ANALYZE TABLE {};' first.",
                object, object
            ));
        }

        let per_partition_bytes = table.estimated_bytes() / partitions.len().max(1) as u64;
        let per_partition_rows = table.row_count / partitions.len().max(1) as u64;
        for partition in &partitions {
            let mut rows_per_chunk = match table.avg_row_length {
                0 => u64::MAX,
                avg => (self.options.bytes_per_chunk / avg).max(1),
            };
            let mut attempt = 0;
            loop {
                let chunks = if rows_per_chunk >= per_partition_rows.max(1) && per_partition_rows > 0
                    || rows_per_chunk == u64::MAX
                {
                    vec![Chunk {
                        id: Some(0),
                        last: true,
                        partition: partition.clone(),
                        range: None,
                    }]
                } else {
                    self.walk(session, &plan, &index, partition.as_deref(), rows_per_chunk, tid)
                        .await?
                };
                let planned = (chunks.len() as u64)
                    .saturating_mul(rows_per_chunk)
                    .saturating_mul(table.avg_row_length);
                let sane = chunks.len() <= 1
                    || per_partition_bytes == 0
                    || (planned <= per_partition_bytes.saturating_mul(4)
                        && planned.saturating_mul(4) >= per_partition_bytes);
                if sane || attempt >= MAX_REPLANS {
                    debug!(
                        table = %object,
                        partition = partition.as_deref().unwrap_or(""),
                        chunks = chunks.len(),
                        rows_per_chunk,
                        "Chunking plan ready"
                    );
                    plan.chunks.extend(chunks);
                    break;
                }
                debug!(
                    table = %object,
                    planned,
                    estimated = per_partition_bytes,
                    "Chunking plan out of range, planning again with larger chunks"
                );
                rows_per_chunk = rows_per_chunk.saturating_mul(2);
                attempt += 1;
            }
        }
        Ok(plan)
    }

    /// Find chunk boundaries with a keyset walk
    async fn walk(
        &self,
        session: &mut dyn Session,
        plan: &TablePlan,
        index: &ChunkIndex,
        partition: Option<&str>,
        rows_per_chunk: u64,
        tid: TableId,
    ) -> Result<Vec<Chunk>> {
        let table = self.catalog.table(tid);
        let columns: Vec<Option<&Column>> = index.columns.iter().map(|c| table.column(c)).collect();
        let from = match partition {
            Some(p) => format!("{} PARTITION ({})", plan.qualified, quote_identifier(p)),
            None => plan.qualified.clone(),
        };
        let mut boundaries: Vec<Vec<String>> = Vec::new();
        loop {
            let mut filters = Vec::new();
            if index.nullable {
                // NULL keys sort first and stay in the first chunk
                filters.push(format!("NOT ({})", index.null_rows()));
            }
            if let Some(previous) = boundaries.last() {
                filters.push(index.after(previous));
            }
            if let Some(condition) = &plan.condition {
                filters.push(format!("({})", condition));
            }
            let where_clause = if filters.is_empty() {
                String::new()
            } else {
                format!(" WHERE {}", filters.join(" AND "))
            };
            let sql = format!(
                "SELECT {} FROM {}{} ORDER BY {} LIMIT 1 OFFSET {}",
                index.column_list(),
                from,
                where_clause,
                index.order_by(),
                rows_per_chunk - 1
            );
            let row = session
                .query_one(&sql)
                .await
                .map_err(|e| Error::data(plan.qualified.clone(), None, e))?;
            let Some(row) = row else { break };
            let bound: Vec<String> = row
                .values()
                .iter()
                .zip(&columns)
                .map(|(v, c)| sql_literal(v, *c))
                .collect();
            boundaries.push(bound);
        }

        // a row comparison with a NULL member can still be true, rows with
        // NULL keys belong to the first chunk only
        let not_null = |range: String| {
            if index.nullable {
                format!("{} AND NOT ({})", range, index.null_rows())
            } else {
                range
            }
        };
        let mut chunks = Vec::with_capacity(boundaries.len() + 1);
        let mut previous: Option<&Vec<String>> = None;
        for bound in &boundaries {
            let range = match previous {
                Some(p) => not_null(format!("{} AND {}", index.after(p), index.up_to(bound))),
                None if index.nullable => format!("({}) OR {}", index.up_to(bound), index.null_rows()),
                None => index.up_to(bound),
            };
            chunks.push(Chunk {
                id: Some(chunks.len() as u64),
                last: false,
                partition: partition.map(str::to_string),
                range: Some(range),
            });
            previous = Some(bound);
        }
        let last_range = previous.map(|p| not_null(index.after(p)));
        chunks.push(Chunk {
            id: Some(chunks.len() as u64),
            last: true,
            partition: partition.map(str::to_string),
            range: last_range,
        });
        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexColumn, Partition, Schema};
    use quarry_session::testing::{Script, ScriptedFactory};

    fn key(name: &str, desc: bool, nullable: bool) -> IndexColumn {
        IndexColumn {
            name: Some(name.into()),
            descending: desc,
            nullable,
        }
    }

    fn column(name: &str) -> Column {
        Column {
            name: name.into(),
            data_type: "bigint".into(),
            column_type: "bigint".into(),
            nullable: false,
            auto_increment: false,
            generated: false,
        }
    }

    fn typed(name: &str, data_type: &str) -> Column {
        Column {
            data_type: data_type.into(),
            column_type: data_type.into(),
            ..column(name)
        }
    }

    fn catalog(rows: u64, avg: u64) -> (Catalog, TableId) {
        let mut c = Catalog::default();
        let s = c.add_schema(Schema::new("s"));
        let mut t = Table::new(s, "t");
        t.columns = vec![column("a"), column("b")];
        t.indexes.push(Index {
            name: "PRIMARY".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![key("a", false, false)],
        });
        t.row_count = rows;
        t.avg_row_length = avg;
        t.data_length = rows * avg;
        let tid = c.add_table(t);
        (c, tid)
    }

    fn options(bytes_per_chunk: u64) -> PlanOptions {
        PlanOptions {
            bytes_per_chunk,
            chunking: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_check_condition() {
        assert!(check_condition("a > 1 AND (b = 'x)')").is_ok());
        assert!(check_condition("a > 1) OR (1").is_err());
        assert!(check_condition("(a > 1").is_err());
        assert!(check_condition("a > 1 -- x").is_err());
        assert!(check_condition("a > 1; DROP TABLE t").is_err());
        assert!(check_condition("a = 'unterminated").is_err());
        assert!(check_condition("  ").is_err());
    }

    #[test]
    fn test_index_choice() {
        let mut table = Table::new(crate::catalog::SchemaId(0), "t");
        assert!(choose_index(&table).is_none());
        table.indexes.push(Index {
            name: "u_null".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![key("x", false, true)],
        });
        assert_eq!(choose_index(&table).unwrap().name, "u_null");
        table.indexes.push(Index {
            name: "u".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![key("y", false, false), key("z", true, false)],
        });
        let chosen = choose_index(&table).unwrap();
        assert_eq!(chosen.name, "u");
        assert_eq!(chosen.order_by(), "`y`, `z` DESC");
        table.indexes.push(Index {
            name: "PRIMARY".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![key("id", false, false)],
        });
        assert_eq!(choose_index(&table).unwrap().name, "PRIMARY");
    }

    #[test]
    fn test_mixed_direction_predicates() {
        let index = ChunkIndex {
            name: "u".into(),
            columns: vec!["a".into(), "b".into()],
            descending: vec![false, true],
            nullable: false,
        };
        let bound = vec!["1".to_string(), "2".to_string()];
        assert_eq!(index.after(&bound), "((`a` > 1) OR (`a` = 1 AND `b` < 2))");
        assert_eq!(index.up_to(&bound), "NOT (((`a` > 1) OR (`a` = 1 AND `b` < 2)))");
    }

    #[tokio::test]
    async fn test_boundary_walk() {
        let (catalog, tid) = catalog(9, 32 * 1024);
        let factory = ScriptedFactory::new(
            Script::new()
                .rows(r"^SELECT `a` FROM `s`.`t` WHERE \(`a`\) > \(7\)", &["a"], vec![])
                .rows(r"^SELECT `a` FROM `s`.`t` WHERE \(`a`\) > \(3\)", &["a"], vec![vec!["7".into()]])
                .rows(r"^SELECT `a` FROM `s`.`t` ORDER BY", &["a"], vec![vec!["3".into()]]),
        );
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        let ranges: Vec<Option<String>> = plan.chunks.iter().map(|c| c.range.clone()).collect();
        assert_eq!(
            ranges,
            vec![
                Some("(`a`) <= (3)".to_string()),
                Some("(`a`) > (3) AND (`a`) <= (7)".to_string()),
                Some("(`a`) > (7)".to_string()),
            ]
        );
        assert!(plan.chunks[2].last && !plan.chunks[1].last);
        assert_eq!(plan.chunks[1].chunk_id(), 1);
        assert_eq!(factory.matching(r"LIMIT 1 OFFSET 3$").len(), 3);
        assert_eq!(
            plan.select_sql(&plan.chunks[1], "`a`, `b`"),
            "SELECT SQL_NO_CACHE `a`, `b` FROM `s`.`t` WHERE ((`a`) > (3) AND (`a`) <= (7)) ORDER BY `a`"
        );
    }

    #[tokio::test]
    async fn test_small_table_single_chunk() {
        let (catalog, tid) = catalog(1, 100);
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].id, Some(0));
        assert!(plan.chunks[0].last);
        assert!(factory.sql_log().is_empty());
    }

    #[tokio::test]
    async fn test_missing_statistics_and_key() {
        let (mut catalog, tid) = catalog(0, 0);
        let console = Console::capture();
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        assert_eq!(plan.chunks.len(), 1);
        assert!(console.contains("consider running 'ANALYZE TABLE `s`.`t`;'"));

        catalog.table_mut(tid).indexes.clear();
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        assert!(!plan.is_chunked());
        assert_eq!(plan.chunks[0].chunk_id(), -1);
        assert!(console.contains("dumped using a single thread"));
    }

    #[tokio::test]
    async fn test_partitions_and_where() {
        let (mut catalog, tid) = catalog(1, 100);
        catalog.table_mut(tid).partitions = vec![
            Partition {
                name: "p0".into(),
                subpartitions: vec![],
            },
            Partition {
                name: "p1".into(),
                subpartitions: vec![],
            },
        ];
        let mut options = options(128 * 1024);
        options
            .where_conditions
            .insert(("s".into(), "t".into()), "b > 0".into());
        options
            .partitions
            .insert(("s".into(), "t".into()), vec!["p1".into()]);
        let factory = ScriptedFactory::new(Script::new());
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        assert_eq!(plan.chunks.len(), 1);
        assert_eq!(plan.chunks[0].partition.as_deref(), Some("p1"));
        assert_eq!(
            plan.select_sql(&plan.chunks[0], "*"),
            "SELECT SQL_NO_CACHE * FROM `s`.`t` PARTITION (`p1`) WHERE (b > 0) ORDER BY `a`"
        );
        assert_eq!(factory.matching(r"^EXPLAIN SELECT 1 FROM `s`.`t` WHERE \(b > 0\)").len(), 1);

        options
            .partitions
            .insert(("s".into(), "t".into()), vec!["p9".into()]);
        let err = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Following partitions were not found in table `s`.`t`: `p9`"));
    }
    #[test]
    fn test_literals_follow_column_type() {
        let date = typed("d", "date");
        let datetime = typed("dt", "datetime");
        let code = typed("c", "char");
        let amount = typed("m", "decimal");
        let raw = typed("r", "varbinary");
        let id = column("id");

        assert_eq!(sql_literal(&"2020-01-05".into(), Some(&date)), "'2020-01-05'");
        assert_eq!(
            sql_literal(&"2020-01-05 10:00:00".into(), Some(&datetime)),
            "'2020-01-05 10:00:00'"
        );
        assert_eq!(sql_literal(&"123".into(), Some(&code)), "'123'");
        assert_eq!(sql_literal(&"o'k".into(), Some(&code)), "'o\\'k'");
        assert_eq!(sql_literal(&"-1.50".into(), Some(&amount)), "-1.50");
        assert_eq!(sql_literal(&Value::Int(i64::MIN), Some(&id)), "-9223372036854775808");
        assert_eq!(sql_literal(&"9223372036854775807".into(), Some(&id)), "9223372036854775807");
        assert_eq!(sql_literal(&Value::Bytes(vec![0, 255]), Some(&raw)), "0x00ff");
        assert_eq!(sql_literal(&Value::Null, Some(&date)), "NULL");
    }

    #[tokio::test]
    async fn test_date_key_boundaries_are_quoted() {
        let (mut catalog, tid) = catalog(9, 32 * 1024);
        catalog.table_mut(tid).columns = vec![typed("a", "date"), column("b")];
        let factory = ScriptedFactory::new(
            Script::new()
                .rows(r"^SELECT `a` FROM `s`.`t` WHERE \(`a`\) > \('2020-01-05'\)", &["a"], vec![])
                .rows(r"^SELECT `a` FROM `s`.`t` ORDER BY", &["a"], vec![vec!["2020-01-05".into()]]),
        );
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        let ranges: Vec<Option<String>> = plan.chunks.iter().map(|c| c.range.clone()).collect();
        assert_eq!(
            ranges,
            vec![
                Some("(`a`) <= ('2020-01-05')".to_string()),
                Some("(`a`) > ('2020-01-05')".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_nullable_key_rows_stay_in_first_chunk() {
        let mut catalog = Catalog::default();
        let s = catalog.add_schema(Schema::new("s"));
        let mut t = Table::new(s, "t");
        t.columns = vec![
            Column { nullable: true, ..column("a") },
            Column { nullable: true, ..column("b") },
        ];
        t.indexes.push(Index {
            name: "u".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![key("a", false, true), key("b", false, true)],
        });
        t.row_count = 9;
        t.avg_row_length = 32 * 1024;
        t.data_length = 9 * 32 * 1024;
        let tid = catalog.add_table(t);

        let factory = ScriptedFactory::new(
            Script::new()
                .rows(r"AND \(`a`, `b`\) > \(7, 8\)", &["a", "b"], vec![])
                .rows(
                    r"AND \(`a`, `b`\) > \(3, 4\)",
                    &["a", "b"],
                    vec![vec![Value::Int(7), Value::Int(8)]],
                )
                .rows(
                    r"^SELECT `a`, `b` FROM `s`.`t` WHERE NOT \(`a` IS NULL OR `b` IS NULL\) ORDER BY",
                    &["a", "b"],
                    vec![vec![Value::Int(3), Value::Int(4)]],
                ),
        );
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        let ranges: Vec<Option<String>> = plan.chunks.iter().map(|c| c.range.clone()).collect();
        assert_eq!(
            ranges,
            vec![
                Some("((`a`, `b`) <= (3, 4)) OR `a` IS NULL OR `b` IS NULL".to_string()),
                Some(
                    "(`a`, `b`) > (3, 4) AND (`a`, `b`) <= (7, 8) AND NOT (`a` IS NULL OR `b` IS NULL)"
                        .to_string()
                ),
                Some("(`a`, `b`) > (7, 8) AND NOT (`a` IS NULL OR `b` IS NULL)".to_string()),
            ]
        );
        assert!(console.contains("which accepts NULL values"));
    }

    #[tokio::test]
    async fn test_full_bigint_range_boundaries() {
        // keys spread evenly from i64::MIN to i64::MAX
        let (catalog, tid) = catalog(9, 32 * 1024);
        let factory = ScriptedFactory::new(
            Script::new()
                .rows(r"WHERE \(`a`\) > \(6917529027641081856\)", &["a"], vec![])
                .rows(
                    r"WHERE \(`a`\) > \(-2305843009213693952\)",
                    &["a"],
                    vec![vec![Value::Int(6917529027641081856)]],
                )
                .rows(
                    r"^SELECT `a` FROM `s`.`t` ORDER BY",
                    &["a"],
                    vec![vec![Value::Int(-2305843009213693952)]],
                ),
        );
        let mut session = factory.connect().await.unwrap();
        let console = Console::capture();
        let options = options(128 * 1024);
        let plan = ChunkPlanner::new(&catalog, &options, &console)
            .plan(session.as_mut(), tid)
            .await
            .unwrap();
        let ranges: Vec<Option<String>> = plan.chunks.iter().map(|c| c.range.clone()).collect();
        assert_eq!(
            ranges,
            vec![
                Some("(`a`) <= (-2305843009213693952)".to_string()),
                Some("(`a`) > (-2305843009213693952) AND (`a`) <= (6917529027641081856)".to_string()),
                Some("(`a`) > (6917529027641081856)".to_string()),
            ]
        );
        let labels: Vec<String> = plan.chunks.iter().map(|c| c.label()).collect();
        assert_eq!(labels, vec!["0", "1", "2"]);
        assert!(plan.chunks[2].last);
    }
}
