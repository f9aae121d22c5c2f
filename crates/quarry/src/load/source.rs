//! Reading a dump that may still be written

use serde::de::DeserializeOwned;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use quarry_storage::Storage;

use crate::catalog::{
    Catalog, Event, Library, Routine, RoutineKind, Schema, SqlSecurity, Table, Trigger, View,
};
use crate::error::{Error, Result};
use crate::filter::FilterSet;
use crate::layout::{self, DoneMarker, Manifest, SchemaDescriptor, TableDescriptor};

/// Dump files, read through a storage that another process may still fill
#[derive(Clone)]
pub(crate) struct DumpSource {
    storage: Arc<dyn Storage>,
    /// `None` waits forever
    wait: Option<Duration>,
}

impl DumpSource {
    pub fn new(storage: Arc<dyn Storage>, wait: Option<Duration>) -> Self {
        Self { storage, wait }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Whether the source waits for files that are not there yet
    pub fn waits(&self) -> bool {
        self.wait.map_or(true, |w| !w.is_zero())
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait
    }

    /// Wait until `name` exists; `false` when the wait timed out
    pub async fn wait_for(&self, name: &str) -> Result<bool> {
        let deadline = self.wait.map(|w| Instant::now() + w);
        loop {
            if self.storage.exists(name).await? {
                return Ok(true);
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Ok(false);
                    }
                    d - now
                }
                None => Duration::from_secs(1),
            };
            debug!("Waiting for {} in {}", name, self.storage.describe());
            self.storage.wait_for_change(remaining).await;
        }
    }

    pub async fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let data = self.storage.read_all(name).await?;
        serde_json::from_slice(&data).map_err(|e| Error::dump(format!("{}: {}", name, e)))
    }

    /// Read a file that must be in the dump, waiting for it if needed
    pub async fn require_json<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        if !self.wait_for(name).await? {
            return Err(Error::dump(format!(
                "Timeout while waiting for {} in {}",
                name,
                self.storage.describe()
            )));
        }
        self.read_json(name).await
    }

    pub async fn require_text(&self, name: &str) -> Result<String> {
        if !self.wait_for(name).await? {
            return Err(Error::dump(format!(
                "Timeout while waiting for {} in {}",
                name,
                self.storage.describe()
            )));
        }
        Ok(self.storage.read_string(name).await?)
    }

    pub async fn manifest(&self) -> Result<Manifest> {
        if !self.wait_for(layout::MANIFEST_FILE).await? {
            return Err(Error::dump(format!(
                "Cannot find a dump in {}: {} is missing",
                self.storage.describe(),
                layout::MANIFEST_FILE
            )));
        }
        let manifest: Manifest = self.read_json(layout::MANIFEST_FILE).await?;
        for capability in &manifest.capabilities {
            if !layout::CAPABILITIES.contains(&capability.as_str()) {
                return Err(Error::Incompatible(format!(
                    "Dump requires the '{}' capability which is not supported by this version of quarry.",
                    capability
                )));
            }
        }
        Ok(manifest)
    }

    /// `@.done.json` if the dump has finished
    pub async fn done_marker(&self) -> Result<Option<DoneMarker>> {
        if self.storage.exists(layout::DONE_FILE).await? {
            Ok(Some(self.read_json(layout::DONE_FILE).await?))
        } else {
            Ok(None)
        }
    }

    /// Descriptors of every schema and table in the manifest
    pub async fn contents(&self, manifest: &Manifest) -> Result<DumpContents> {
        let mut schemas = Vec::with_capacity(manifest.schemas.len());
        for name in &manifest.schemas {
            let descriptor: SchemaDescriptor =
                self.require_json(&layout::schema_json(name)).await?;
            let mut tables = Vec::with_capacity(descriptor.tables.len());
            for table in &descriptor.tables {
                let t: TableDescriptor = self
                    .require_json(&layout::table_json(name, table))
                    .await?;
                tables.push(t);
            }
            schemas.push(SchemaEntry { descriptor, tables });
        }
        Ok(DumpContents { schemas })
    }
}

/// A schema of the dump with its table descriptors
#[derive(Debug, Clone)]
pub(crate) struct SchemaEntry {
    pub descriptor: SchemaDescriptor,
    pub tables: Vec<TableDescriptor>,
}

impl SchemaEntry {
    pub fn name(&self) -> &str {
        &self.descriptor.schema
    }
}

/// Objects of the dump that are to be loaded
#[derive(Debug, Clone, Default)]
pub(crate) struct DumpContents {
    pub schemas: Vec<SchemaEntry>,
}

impl DumpContents {
    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.schemas.iter().flat_map(|s| s.tables.iter())
    }

    /// Drop what the filters exclude
    ///
    /// The filters run over a catalog built from the descriptors, so they
    /// behave exactly as they do when dumping.
    pub fn apply_filters(&mut self, filters: &FilterSet, lower_case_table_names: u8) -> Result<()> {
        let mut catalog = Catalog::default();
        catalog.server.lower_case_table_names = lower_case_table_names;
        for entry in &self.schemas {
            let d = &entry.descriptor;
            let sid = catalog.add_schema(Schema::new(d.schema.clone()));
            for t in &entry.tables {
                let tid = catalog.add_table(Table::new(sid, t.table.clone()));
                for trigger in &t.triggers {
                    catalog.add_trigger(Trigger {
                        table: tid,
                        name: trigger.clone(),
                        event: String::new(),
                        timing: String::new(),
                        definer: String::new(),
                        ddl: String::new(),
                    });
                }
            }
            for view in &d.views {
                catalog.add_view(View {
                    schema: sid,
                    name: view.clone(),
                    definer: String::new(),
                    security: SqlSecurity::Definer,
                    references: Vec::new(),
                    columns: Vec::new(),
                    ddl: String::new(),
                });
            }
            let routines = d
                .functions
                .iter()
                .map(|n| (n, RoutineKind::Function))
                .chain(d.procedures.iter().map(|n| (n, RoutineKind::Procedure)));
            for (name, kind) in routines {
                catalog.add_routine(Routine {
                    schema: sid,
                    name: name.clone(),
                    kind,
                    definer: String::new(),
                    security: SqlSecurity::Definer,
                    language: "SQL".to_string(),
                    libraries: Vec::new(),
                    ddl: String::new(),
                });
            }
            for event in &d.events {
                catalog.add_event(Event {
                    schema: sid,
                    name: event.clone(),
                    definer: String::new(),
                    ddl: String::new(),
                });
            }
            for library in &d.libraries {
                catalog.add_library(Library {
                    schema: sid,
                    name: library.clone(),
                    language: String::new(),
                    ddl: String::new(),
                });
            }
        }

        filters.apply(&mut catalog)?;

        let kept: BTreeSet<usize> = catalog.schema_order.iter().map(|id| id.0).collect();
        let schemas = std::mem::take(&mut self.schemas);
        for (index, mut entry) in schemas.into_iter().enumerate() {
            if !kept.contains(&index) {
                continue;
            }
            let schema = &catalog.schemas[index];
            let tables: BTreeSet<&str> = schema
                .tables
                .iter()
                .map(|id| catalog.tables[id.0].name.as_str())
                .collect();
            let views: BTreeSet<&str> = schema
                .views
                .iter()
                .map(|id| catalog.views[id.0].name.as_str())
                .collect();
            let routines: BTreeSet<(&str, RoutineKind)> = schema
                .routines
                .iter()
                .map(|id| (catalog.routines[id.0].name.as_str(), catalog.routines[id.0].kind))
                .collect();
            let events: BTreeSet<&str> = schema
                .events
                .iter()
                .map(|id| catalog.events[id.0].name.as_str())
                .collect();
            let libraries: BTreeSet<&str> = schema
                .libraries
                .iter()
                .map(|id| catalog.libraries[id.0].name.as_str())
                .collect();

            let d = &mut entry.descriptor;
            d.tables.retain(|t| tables.contains(t.as_str()));
            d.views.retain(|v| views.contains(v.as_str()));
            d.functions
                .retain(|f| routines.contains(&(f.as_str(), RoutineKind::Function)));
            d.procedures
                .retain(|p| routines.contains(&(p.as_str(), RoutineKind::Procedure)));
            d.events.retain(|e| events.contains(e.as_str()));
            d.libraries.retain(|l| libraries.contains(l.as_str()));

            entry.tables.retain(|t| tables.contains(t.table.as_str()));
            for table in &mut entry.tables {
                let Some(id) = schema
                    .tables
                    .iter()
                    .find(|id| catalog.tables[id.0].name == table.table)
                else {
                    continue;
                };
                let triggers: BTreeSet<&str> = catalog.tables[id.0]
                    .triggers
                    .iter()
                    .map(|t| catalog.triggers[t.0].name.as_str())
                    .collect();
                table.triggers.retain(|t| triggers.contains(t.as_str()));
            }
            self.schemas.push(entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::filter::FilterOptions;
    use quarry_storage::{Compression, MemoryStorage};

    fn table(schema: &str, name: &str) -> TableDescriptor {
        TableDescriptor {
            schema: schema.to_string(),
            table: name.to_string(),
            basename: layout::object_base(schema, name),
            columns: vec!["id".to_string()],
            decode_columns: Default::default(),
            primary_index: Some(vec!["id".to_string()]),
            has_unique_key: true,
            partitions: Vec::new(),
            chunking: true,
            include_data: true,
            extension: "tsv".to_string(),
            compression: Compression::None,
            dialect: Dialect::default(),
            triggers: Vec::new(),
            histograms: Vec::new(),
            post_ddl: Vec::new(),
            row_count_estimate: 0,
            data_bytes_estimate: 0,
        }
    }

    fn contents() -> DumpContents {
        let mut t1 = table("shop", "orders");
        t1.triggers = vec!["orders_bi".to_string(), "orders_au".to_string()];
        DumpContents {
            schemas: vec![
                SchemaEntry {
                    descriptor: SchemaDescriptor {
                        schema: "shop".to_string(),
                        include_ddl: true,
                        include_data: true,
                        tables: vec!["orders".to_string(), "audit".to_string()],
                        views: vec!["recent".to_string()],
                        functions: vec!["total".to_string()],
                        procedures: vec!["purge".to_string()],
                        ..Default::default()
                    },
                    tables: vec![t1, table("shop", "audit")],
                },
                SchemaEntry {
                    descriptor: SchemaDescriptor {
                        schema: "hr".to_string(),
                        include_ddl: true,
                        include_data: true,
                        tables: vec!["staff".to_string()],
                        ..Default::default()
                    },
                    tables: vec![table("hr", "staff")],
                },
            ],
        }
    }

    #[test]
    fn test_filters_apply_to_descriptors() {
        let filters = FilterSet::compile(&FilterOptions {
            exclude_schemas: vec!["hr".to_string()],
            exclude_tables: vec!["shop.audit".to_string()],
            exclude_routines: vec!["shop.purge".to_string()],
            exclude_triggers: vec!["shop.orders.orders_au".to_string()],
            ..Default::default()
        })
        .unwrap();
        let mut contents = contents();
        contents.apply_filters(&filters, 0).unwrap();

        assert_eq!(contents.schemas.len(), 1);
        let shop = &contents.schemas[0];
        assert_eq!(shop.descriptor.tables, vec!["orders"]);
        assert_eq!(shop.descriptor.views, vec!["recent"]);
        assert_eq!(shop.descriptor.functions, vec!["total"]);
        assert!(shop.descriptor.procedures.is_empty());
        assert_eq!(shop.tables.len(), 1);
        assert_eq!(shop.tables[0].triggers, vec!["orders_bi"]);
        assert_eq!(contents.table_count(), 1);
    }

    #[test]
    fn test_filter_on_schema_outside_dump_is_rejected() {
        let filters = FilterSet::compile(&FilterOptions {
            include_tables: vec!["sales.orders".to_string()],
            ..Default::default()
        })
        .unwrap();
        let err = contents().apply_filters(&filters, 0).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_manifest_without_wait() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new("dump"));
        let source = DumpSource::new(storage, Some(Duration::ZERO));
        assert!(!source.waits());
        let err = source.manifest().await.unwrap_err();
        assert!(err.to_string().contains("@.json is missing"));
        assert!(source.done_marker().await.unwrap().is_none());
    }
}
