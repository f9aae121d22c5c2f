//! Metadata and DDL files of a dump

use chrono::Utc;
use quarry_storage::prelude::*;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::catalog::{Catalog, RoutineKind, SchemaId, TableId};
use crate::chunker::TablePlan;
use crate::coordinator::Snapshot;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::ident::{encode_name, quote_identifier};
use crate::layout::{self, Manifest, SchemaDescriptor, TableDescriptor, UserBlock};
use crate::options::DumpOptions;
use crate::script::{write_compound_statements, write_statements};

static CREATE_USER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*CREATE\s+USER\s+(IF\s+NOT\s+EXISTS\s+)?").expect("create user regex is invalid")
});

/// `CREATE USER` that succeeds when the account exists
fn create_user_if_not_exists(statement: &str) -> String {
    CREATE_USER_RE
        .replace(statement, "CREATE USER IF NOT EXISTS ")
        .into_owned()
}

/// Table standing in for a view until every view is created
fn placeholder_table(name: &str, columns: &[String]) -> String {
    let columns: Vec<String> = if columns.is_empty() {
        vec!["  `__placeholder` tinyint NOT NULL".to_string()]
    } else {
        columns
            .iter()
            .map(|c| format!("  {} tinyint NOT NULL", quote_identifier(c)))
            .collect()
    };
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n{}\n)",
        quote_identifier(name),
        columns.join(",\n")
    )
}

/// Writes everything of a dump but the data
pub(crate) struct DdlWriter<'a> {
    pub storage: &'a dyn Storage,
    pub catalog: &'a Catalog,
    pub options: &'a DumpOptions,
    pub dialect: &'a Dialect,
    pub extension: &'a str,
    /// Plans of the tables whose data is dumped
    pub plans: &'a BTreeMap<TableId, TablePlan>,
    pub files: u64,
}

impl<'a> DdlWriter<'a> {
    fn header(&self, object: &str) -> String {
        layout::file_header(&self.catalog.server.version_string, object)
    }

    fn write_sql(&self) -> bool {
        !self.options.data_only
    }

    async fn put(&mut self, name: &str, contents: &str) -> Result<()> {
        self.storage.write_all(name, contents.as_bytes()).await?;
        self.files += 1;
        debug!("Wrote {} ({} bytes)", name, contents.len());
        Ok(())
    }

    async fn put_json<T: serde::Serialize>(&mut self, name: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        self.put(name, &json).await
    }

    /// Write `@.json`
    pub async fn write_manifest(&mut self, snapshot: &Snapshot, server: String) -> Result<()> {
        let catalog = self.catalog;
        let schemas: Vec<String> = catalog
            .schema_order
            .iter()
            .map(|s| catalog.schema(*s).name.clone())
            .collect();
        let manifest = Manifest {
            version: layout::FORMAT_VERSION.to_string(),
            dumper: format!("quarry {}", env!("CARGO_PKG_VERSION")),
            origin: self.options.scope.origin().to_string(),
            basenames: schemas.iter().map(|s| (s.clone(), encode_name(s))).collect(),
            schemas,
            users: catalog.users.iter().map(|u| u.account()).collect(),
            default_character_set: self.options.default_character_set.clone(),
            tz_utc: self.options.tz_utc,
            bytes_per_chunk: self.options.bytes_per_chunk,
            hostname: catalog.server.hostname.clone(),
            server,
            server_version: catalog.server.version_string.clone(),
            server_uuid: catalog.server.server_uuid.clone(),
            gtid_executed: snapshot.position.gtid_executed.clone(),
            gtid_executed_inconsistent: !self.options.consistent,
            binlog_file: snapshot.position.binlog.as_ref().map(|b| b.file.clone()),
            binlog_position: snapshot.position.binlog.as_ref().map(|b| b.position),
            consistent: self.options.consistent,
            compression: self.options.compression,
            dialect: self.options.dialect,
            mds_compatibility: self.options.ocimds,
            compatibility_options: self.options.compatibility.clone(),
            capabilities: layout::CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            checksum: self.options.checksum,
            ddl_only: self.options.ddl_only,
            data_only: self.options.data_only,
            partial_revokes: catalog.server.partial_revokes,
            begin: Utc::now(),
        };
        self.put_json(layout::MANIFEST_FILE, &manifest).await
    }

    /// Write every DDL file and descriptor
    pub async fn write_all(&mut self) -> Result<()> {
        if self.write_sql() {
            let mut pre = self.header("global");
            let mut statements = vec![format!(
                "/*!40101 SET NAMES {} */",
                self.options.default_character_set
            )];
            if self.options.tz_utc {
                statements.push("/*!40103 SET TIME_ZONE='+00:00' */".to_string());
            }
            write_statements(&mut pre, &statements);
            self.put(layout::PRE_SQL_FILE, &pre).await?;
            let post = self.header("global");
            self.put(layout::POST_SQL_FILE, &post).await?;
            if !self.catalog.users.is_empty() {
                self.write_users().await?;
            }
        }
        for sid in self.catalog.schema_order.clone() {
            self.write_schema(sid).await?;
        }
        Ok(())
    }

    async fn write_users(&mut self) -> Result<()> {
        let blocks: Vec<UserBlock> = self
            .catalog
            .users
            .iter()
            .map(|u| UserBlock {
                account: u.account(),
                create: vec![create_user_if_not_exists(&u.create)],
                grants: u.grants.clone(),
            })
            .collect();
        let text = layout::users_script(&self.header("users"), &blocks);
        self.put(layout::USERS_FILE, &text).await
    }

    async fn write_schema(&mut self, sid: SchemaId) -> Result<()> {
        let catalog = self.catalog;
        let schema = catalog.schema(sid);
        let name = &schema.name;

        let mut descriptor = SchemaDescriptor {
            schema: name.clone(),
            include_ddl: !self.options.data_only,
            include_data: !self.options.ddl_only,
            ..Default::default()
        };
        for tid in &schema.tables {
            let table = catalog.table(*tid);
            descriptor.tables.push(table.name.clone());
            descriptor
                .basenames
                .insert(table.name.clone(), layout::object_base(name, &table.name));
        }
        for vid in &schema.views {
            let view = catalog.view(*vid);
            descriptor.views.push(view.name.clone());
            descriptor
                .basenames
                .insert(view.name.clone(), layout::object_base(name, &view.name));
        }
        for rid in &schema.routines {
            let routine = catalog.routine(*rid);
            match routine.kind {
                RoutineKind::Function => descriptor.functions.push(routine.name.clone()),
                RoutineKind::Procedure => descriptor.procedures.push(routine.name.clone()),
            }
        }
        descriptor.events = schema.events.iter().map(|e| catalog.event(*e).name.clone()).collect();
        descriptor.libraries = schema
            .libraries
            .iter()
            .map(|l| catalog.library(*l).name.clone())
            .collect();
        self.put_json(&layout::schema_json(name), &descriptor).await?;

        if self.write_sql() {
            let mut text = self.header(&quote_identifier(name));
            write_statements(&mut text, &[schema.ddl.clone()]);
            self.put(&layout::schema_sql(name), &text).await?;
        }

        for tid in schema.tables.clone() {
            self.write_table(name, tid).await?;
        }
        if self.write_sql() {
            for vid in schema.views.clone() {
                let view = catalog.view(vid);
                let object = catalog.view_name(vid);
                let mut pre = self.header(&object);
                write_statements(&mut pre, &[placeholder_table(&view.name, &view.columns)]);
                self.put(&layout::view_pre_sql(name, &view.name), &pre).await?;

                let mut text = self.header(&object);
                write_statements(
                    &mut text,
                    &[
                        format!("DROP TABLE IF EXISTS {}", quote_identifier(&view.name)),
                        format!("DROP VIEW IF EXISTS {}", quote_identifier(&view.name)),
                        view.ddl.clone(),
                    ],
                );
                self.put(&layout::object_sql(name, &view.name), &text).await?;
            }
            for rid in schema.routines.clone() {
                let routine = catalog.routine(rid);
                let mut text = self.header(&catalog.routine_name(rid));
                write_compound_statements(&mut text, &[routine.ddl.clone()]);
                self.put(&layout::routine_sql(name, &routine.name, routine.kind), &text)
                    .await?;
            }
            for eid in schema.events.clone() {
                let event = catalog.event(eid);
                let mut text = self.header(&catalog.event_name(eid));
                write_compound_statements(&mut text, &[event.ddl.clone()]);
                self.put(&layout::event_sql(name, &event.name), &text).await?;
            }
            for lid in schema.libraries.clone() {
                let library = catalog.library(lid);
                let mut text = self.header(&catalog.library_name(lid));
                write_compound_statements(&mut text, &[library.ddl.clone()]);
                self.put(&layout::library_sql(name, &library.name), &text).await?;
            }
        }
        Ok(())
    }

    async fn write_table(&mut self, schema: &str, tid: TableId) -> Result<()> {
        let catalog = self.catalog;
        let table = catalog.table(tid);
        let object = catalog.table_name(tid);
        let plan = self.plans.get(&tid);

        let mut partitions: Vec<String> = Vec::new();
        if let Some(plan) = plan {
            for chunk in &plan.chunks {
                if let Some(p) = &chunk.partition {
                    if !partitions.contains(p) {
                        partitions.push(p.clone());
                    }
                }
            }
        }
        let data_columns: Vec<_> = table.data_columns().collect();
        let descriptor = TableDescriptor {
            schema: schema.to_string(),
            table: table.name.clone(),
            basename: layout::object_base(schema, &table.name),
            columns: data_columns.iter().map(|c| c.name.clone()).collect(),
            decode_columns: data_columns
                .iter()
                .filter(|c| c.is_binary())
                .map(|c| {
                    (
                        c.name.clone(),
                        self.dialect.binary_encoding.decode_function().to_string(),
                    )
                })
                .collect(),
            primary_index: table.primary_key().map(|pk| pk.column_names()),
            has_unique_key: table.has_unique_key(),
            partitions,
            chunking: plan.is_some_and(|p| p.is_chunked()),
            include_data: plan.is_some(),
            extension: self.extension.to_string(),
            compression: self.options.compression,
            dialect: self.dialect.clone(),
            triggers: table
                .triggers
                .iter()
                .map(|t| catalog.trigger(*t).name.clone())
                .collect(),
            histograms: table.histograms.clone(),
            post_ddl: table.post_ddl.clone(),
            row_count_estimate: table.row_count,
            data_bytes_estimate: table.estimated_bytes(),
        };
        self.put_json(&layout::table_json(schema, &table.name), &descriptor)
            .await?;

        if self.write_sql() {
            let mut text = self.header(&object);
            write_statements(&mut text, &[table.ddl.clone()]);
            self.put(&layout::object_sql(schema, &table.name), &text).await?;

            if !table.triggers.is_empty() {
                let ddl: Vec<String> = table
                    .triggers
                    .iter()
                    .map(|t| catalog.trigger(*t).ddl.clone())
                    .collect();
                let mut text = self.header(&object);
                write_compound_statements(&mut text, &ddl);
                self.put(&layout::triggers_sql(schema, &table.name), &text)
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_user_if_not_exists() {
        assert_eq!(
            create_user_if_not_exists("CREATE USER `app`@`%` IDENTIFIED WITH 'mysql_native_password'"),
            "CREATE USER IF NOT EXISTS `app`@`%` IDENTIFIED WITH 'mysql_native_password'"
        );
        assert_eq!(
            create_user_if_not_exists("CREATE USER IF NOT EXISTS `app`@`%`"),
            "CREATE USER IF NOT EXISTS `app`@`%`"
        );
    }

    #[test]
    fn test_placeholder_table() {
        assert_eq!(
            placeholder_table("v", &["a".into(), "b".into()]),
            "CREATE TABLE IF NOT EXISTS `v` (\n  `a` tinyint NOT NULL,\n  `b` tinyint NOT NULL\n)"
        );
        assert!(placeholder_table("v", &[]).contains("`__placeholder`"));
    }
}
