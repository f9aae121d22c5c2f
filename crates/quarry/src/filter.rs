//! Include/exclude filters over catalog objects
//!
//! Filters name objects exactly: a schema, `schema.object`, or
//! `schema.table.trigger`, with optional backtick quoting. Users are given as
//! `'user'@'host'`; a bare user name matches every host.
//!
//! Option-level problems (parse errors, an object that is both included and
//! excluded, an include that points into an excluded schema) are found by
//! [`FilterOptions::problems`] before any server is contacted. Filters that
//! name a schema missing from the dump are reported by [`FilterSet::apply`].
//!
//! # Example
//!
//! ```rust,ignore
//! let options = FilterOptions {
//!     include_schemas: vec!["world".into()],
//!     exclude_tables: vec!["world.audit_log".into()],
//!     ..Default::default()
//! };
//! let filters = FilterSet::compile(&options)?;
//! filters.apply(&mut catalog)?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::catalog::{is_system_schema, Catalog};
use crate::error::{Error, Issue, Result};
use crate::ident::{parse_account, quote_identifier, quote_qualified, quote_string, split_qualified};

/// Filter options shared by dump and load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterOptions {
    pub include_schemas: Vec<String>,
    pub exclude_schemas: Vec<String>,
    pub include_tables: Vec<String>,
    pub exclude_tables: Vec<String>,
    pub include_routines: Vec<String>,
    pub exclude_routines: Vec<String>,
    pub include_events: Vec<String>,
    pub exclude_events: Vec<String>,
    pub include_libraries: Vec<String>,
    pub exclude_libraries: Vec<String>,
    pub include_triggers: Vec<String>,
    pub exclude_triggers: Vec<String>,
    pub include_users: Vec<String>,
    pub exclude_users: Vec<String>,
}

impl FilterOptions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Every option-level problem
    pub fn problems(&self) -> Vec<String> {
        match FilterSet::compile(self) {
            Ok(_) => Vec::new(),
            Err(Error::Validation(p)) => p,
            Err(e) => vec![e.to_string()],
        }
    }
}

/// Object kinds addressed by `schema.object` filters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Table,
    Routine,
    Event,
    Library,
}

impl ObjectKind {
    fn option(&self) -> &'static str {
        match self {
            Self::Table => "Tables",
            Self::Routine => "Routines",
            Self::Event => "Events",
            Self::Library => "Libraries",
        }
    }

    fn article(&self) -> &'static str {
        match self {
            Self::Table => "a table",
            Self::Routine => "a routine",
            Self::Event => "an event",
            Self::Library => "a library",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Routine => "routine",
            Self::Event => "event",
            Self::Library => "library",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TriggerFilter {
    schema: String,
    table: String,
    trigger: Option<String>,
}

impl TriggerFilter {
    fn display(&self) -> String {
        match &self.trigger {
            Some(t) => format!("{}.{}", quote_qualified(&self.schema, &self.table), quote_identifier(t)),
            None => quote_qualified(&self.schema, &self.table),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct UserFilter {
    user: String,
    host: Option<String>,
}

impl UserFilter {
    fn display(&self) -> String {
        match &self.host {
            Some(h) => format!("{}@{}", quote_string(&self.user), quote_string(h)),
            None => quote_string(&self.user),
        }
    }

    fn matches(&self, user: &str, host: &str) -> bool {
        self.user == user && self.host.as_deref().map_or(true, |h| h == host)
    }
}

#[derive(Debug, Clone, Default)]
struct ObjectFilters {
    include: Vec<(String, String)>,
    exclude: Vec<(String, String)>,
}

/// Compiled filters
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    include_schemas: Vec<String>,
    exclude_schemas: Vec<String>,
    tables: ObjectFilters,
    routines: ObjectFilters,
    events: ObjectFilters,
    libraries: ObjectFilters,
    include_triggers: Vec<TriggerFilter>,
    exclude_triggers: Vec<TriggerFilter>,
    include_users: Vec<UserFilter>,
    exclude_users: Vec<UserFilter>,
    case_insensitive: bool,
}

fn parse_schema(option: &str, raw: &str, problems: &mut Vec<String>) -> Option<String> {
    match split_qualified(raw) {
        Ok(mut parts) if parts.len() == 1 => parts.pop(),
        Ok(_) => {
            problems.push(format!(
                "The {} option contains an invalid schema name '{}', a schema name must not be qualified.",
                option, raw
            ));
            None
        }
        Err(e) => {
            problems.push(format!("Failed to parse the value '{}' of the {} option: {}", raw, option, e));
            None
        }
    }
}

fn parse_object(option: &str, noun: &str, raw: &str, problems: &mut Vec<String>) -> Option<(String, String)> {
    match split_qualified(raw) {
        Ok(parts) if parts.len() == 2 => {
            let mut it = parts.into_iter();
            Some((it.next()?, it.next()?))
        }
        Ok(_) => {
            problems.push(format!(
                "The {} to be filtered by the {} option must be in the following form: schema.{}, with optional backtick quotes, wrong value: '{}'.",
                noun, option, noun, raw
            ));
            None
        }
        Err(e) => {
            problems.push(format!("Failed to parse the value '{}' of the {} option: {}", raw, option, e));
            None
        }
    }
}

fn parse_trigger(option: &str, raw: &str, problems: &mut Vec<String>) -> Option<TriggerFilter> {
    match split_qualified(raw) {
        Ok(parts) if parts.len() == 2 || parts.len() == 3 => {
            let mut it = parts.into_iter();
            Some(TriggerFilter {
                schema: it.next()?,
                table: it.next()?,
                trigger: it.next(),
            })
        }
        Ok(_) => {
            problems.push(format!(
                "The trigger to be filtered by the {} option must be in the following form: schema.table or schema.table.trigger, with optional backtick quotes, wrong value: '{}'.",
                option, raw
            ));
            None
        }
        Err(e) => {
            problems.push(format!("Failed to parse the value '{}' of the {} option: {}", raw, option, e));
            None
        }
    }
}

fn parse_user(option: &str, raw: &str, problems: &mut Vec<String>) -> Option<UserFilter> {
    match parse_account(raw) {
        Ok((user, host)) => Some(UserFilter { user, host }),
        Err(e) => {
            problems.push(format!("Failed to parse the value '{}' of the {} option: {}", raw, option, e));
            None
        }
    }
}

impl FilterSet {
    /// Parse and cross-check the filter options
    pub fn compile(options: &FilterOptions) -> Result<Self> {
        let mut problems = Vec::new();
        let mut set = Self::default();

        for raw in &options.include_schemas {
            set.include_schemas.extend(parse_schema("includeSchemas", raw, &mut problems));
        }
        for raw in &options.exclude_schemas {
            set.exclude_schemas.extend(parse_schema("excludeSchemas", raw, &mut problems));
        }
        for schema in &set.include_schemas {
            if set.exclude_schemas.contains(schema) {
                problems.push(format!(
                    "Both includeSchemas and excludeSchemas options contain a schema {}.",
                    quote_identifier(schema)
                ));
            }
        }

        for (kind, include, exclude) in [
            (ObjectKind::Table, &options.include_tables, &options.exclude_tables),
            (ObjectKind::Routine, &options.include_routines, &options.exclude_routines),
            (ObjectKind::Event, &options.include_events, &options.exclude_events),
            (ObjectKind::Library, &options.include_libraries, &options.exclude_libraries),
        ] {
            let include_option = format!("include{}", kind.option());
            let exclude_option = format!("exclude{}", kind.option());
            let mut filters = ObjectFilters::default();
            for raw in include {
                filters
                    .include
                    .extend(parse_object(&include_option, kind.noun(), raw, &mut problems));
            }
            for raw in exclude {
                filters
                    .exclude
                    .extend(parse_object(&exclude_option, kind.noun(), raw, &mut problems));
            }
            for (schema, object) in &filters.include {
                let name = quote_qualified(schema, object);
                if filters.exclude.contains(&(schema.clone(), object.clone())) {
                    problems.push(format!(
                        "Both {} and {} options contain {} {}.",
                        include_option,
                        exclude_option,
                        kind.article(),
                        name
                    ));
                }
                set.check_include_schema(&include_option, kind.article(), &name, schema, &mut problems);
            }
            match kind {
                ObjectKind::Table => set.tables = filters,
                ObjectKind::Routine => set.routines = filters,
                ObjectKind::Event => set.events = filters,
                ObjectKind::Library => set.libraries = filters,
            }
        }

        for raw in &options.include_triggers {
            set.include_triggers.extend(parse_trigger("includeTriggers", raw, &mut problems));
        }
        for raw in &options.exclude_triggers {
            set.exclude_triggers.extend(parse_trigger("excludeTriggers", raw, &mut problems));
        }
        for include in &set.include_triggers {
            for exclude in &set.exclude_triggers {
                if include == exclude {
                    problems.push(format!(
                        "Both includeTriggers and excludeTriggers options contain a filter {}.",
                        include.display()
                    ));
                } else if include.trigger.is_some()
                    && exclude.trigger.is_none()
                    && include.schema == exclude.schema
                    && include.table == exclude.table
                {
                    problems.push(format!(
                        "The includeTriggers option contains a filter {} which is excluded by the value of the excludeTriggers option: {}.",
                        include.display(),
                        exclude.display()
                    ));
                }
            }
            set.check_include_schema(
                "includeTriggers",
                "a filter",
                &include.display(),
                &include.schema,
                &mut problems,
            );
        }

        for raw in &options.include_users {
            set.include_users.extend(parse_user("includeUsers", raw, &mut problems));
        }
        for raw in &options.exclude_users {
            set.exclude_users.extend(parse_user("excludeUsers", raw, &mut problems));
        }
        for include in &set.include_users {
            for exclude in &set.exclude_users {
                if include == exclude {
                    problems.push(format!(
                        "Both includeUsers and excludeUsers options contain a user {}.",
                        include.display()
                    ));
                } else if exclude.host.is_none() && include.user == exclude.user {
                    problems.push(format!(
                        "The includeUsers option contains a user {} which is excluded by the value of the excludeUsers option: {}.",
                        include.display(),
                        exclude.display()
                    ));
                }
            }
        }

        if problems.is_empty() {
            Ok(set)
        } else {
            Err(Error::Validation(problems))
        }
    }

    fn check_include_schema(
        &self,
        option: &str,
        article: &str,
        name: &str,
        schema: &str,
        problems: &mut Vec<String>,
    ) {
        if self.exclude_schemas.iter().any(|s| s == schema) {
            problems.push(format!(
                "The {} option contains {} {} which refers to an excluded schema.",
                option, article, name
            ));
        } else if !self.include_schemas.is_empty() && !self.include_schemas.iter().any(|s| s == schema) {
            problems.push(format!(
                "The {} option contains {} {} which refers to a schema which was not included in the dump.",
                option, article, name
            ));
        }
    }

    /// Compare names without case, for servers with `lower_case_table_names` set
    pub fn with_case_insensitive(mut self, case_insensitive: bool) -> Self {
        self.case_insensitive = case_insensitive;
        self
    }

    fn eq(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    fn object_matches(&self, list: &[(String, String)], schema: &str, object: &str) -> bool {
        list.iter()
            .any(|(s, o)| self.eq(s, schema) && self.eq(o, object))
    }

    fn object_included(&self, filters: &ObjectFilters, schema: &str, object: &str) -> bool {
        (filters.include.is_empty() || self.object_matches(&filters.include, schema, object))
            && !self.object_matches(&filters.exclude, schema, object)
    }

    pub fn schema_included(&self, name: &str) -> bool {
        if is_system_schema(name) {
            return false;
        }
        (self.include_schemas.is_empty() || self.include_schemas.iter().any(|s| self.eq(s, name)))
            && !self.exclude_schemas.iter().any(|s| self.eq(s, name))
    }

    pub fn table_included(&self, schema: &str, table: &str) -> bool {
        self.object_included(&self.tables, schema, table)
    }

    pub fn routine_included(&self, schema: &str, routine: &str) -> bool {
        self.object_included(&self.routines, schema, routine)
    }

    pub fn event_included(&self, schema: &str, event: &str) -> bool {
        self.object_included(&self.events, schema, event)
    }

    pub fn library_included(&self, schema: &str, library: &str) -> bool {
        self.object_included(&self.libraries, schema, library)
    }

    fn trigger_matches(&self, filter: &TriggerFilter, schema: &str, table: &str, trigger: &str) -> bool {
        self.eq(&filter.schema, schema)
            && self.eq(&filter.table, table)
            && filter.trigger.as_deref().map_or(true, |t| self.eq(t, trigger))
    }

    pub fn trigger_included(&self, schema: &str, table: &str, trigger: &str) -> bool {
        (self.include_triggers.is_empty()
            || self
                .include_triggers
                .iter()
                .any(|f| self.trigger_matches(f, schema, table, trigger)))
            && !self
                .exclude_triggers
                .iter()
                .any(|f| self.trigger_matches(f, schema, table, trigger))
    }

    pub fn user_included(&self, user: &str, host: &str) -> bool {
        (self.include_users.is_empty() || self.include_users.iter().any(|f| f.matches(user, host)))
            && !self.exclude_users.iter().any(|f| f.matches(user, host))
    }

    /// Schemas named by object filters
    fn filter_schemas(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (option, filters) in [
            ("Tables", &self.tables),
            ("Routines", &self.routines),
            ("Events", &self.events),
            ("Libraries", &self.libraries),
        ] {
            for (s, _) in &filters.include {
                out.push((format!("include{}", option), s.clone()));
            }
            for (s, _) in &filters.exclude {
                out.push((format!("exclude{}", option), s.clone()));
            }
        }
        for f in &self.include_triggers {
            out.push(("includeTriggers".to_string(), f.schema.clone()));
        }
        for f in &self.exclude_triggers {
            out.push(("excludeTriggers".to_string(), f.schema.clone()));
        }
        out
    }

    /// Remove everything the filters exclude from `catalog`
    ///
    /// Applying the same filters twice leaves the catalog unchanged.
    pub fn apply(&self, catalog: &mut Catalog) -> Result<()> {
        let filters = self.clone().with_case_insensitive(catalog.case_insensitive());
        filters.apply_inner(catalog)
    }

    fn apply_inner(&self, catalog: &mut Catalog) -> Result<()> {
        let schemas = &catalog.schemas;
        catalog
            .schema_order
            .retain(|id| self.schema_included(&schemas[id.0].name));

        let mut problems = Vec::new();
        let mut seen = BTreeSet::new();
        for (option, schema) in self.filter_schemas() {
            if catalog.find_schema(&schema).is_none() && seen.insert((option.clone(), schema.clone())) {
                problems.push(format!(
                    "The {} option contains a filter which refers to a schema {} which is not included in the dump.",
                    option,
                    quote_identifier(&schema)
                ));
            }
        }
        if !problems.is_empty() {
            return Err(Error::Validation(problems));
        }

        for sid in catalog.schema_order.clone() {
            let schema_name = catalog.schemas[sid.0].name.clone();

            let tables = std::mem::take(&mut catalog.schemas[sid.0].tables);
            let mut kept = Vec::with_capacity(tables.len());
            for tid in tables {
                let name = catalog.tables[tid.0].name.clone();
                if self.table_included(&schema_name, &name) {
                    kept.push(tid);
                } else {
                    catalog.excluded_tables.insert((schema_name.clone(), name));
                }
            }
            catalog.schemas[sid.0].tables = kept;

            let views = std::mem::take(&mut catalog.schemas[sid.0].views);
            catalog.schemas[sid.0].views = views
                .into_iter()
                .filter(|id| self.table_included(&schema_name, &catalog.views[id.0].name))
                .collect();

            let routines = std::mem::take(&mut catalog.schemas[sid.0].routines);
            catalog.schemas[sid.0].routines = routines
                .into_iter()
                .filter(|id| self.routine_included(&schema_name, &catalog.routines[id.0].name))
                .collect();

            let events = std::mem::take(&mut catalog.schemas[sid.0].events);
            catalog.schemas[sid.0].events = events
                .into_iter()
                .filter(|id| self.event_included(&schema_name, &catalog.events[id.0].name))
                .collect();

            let libraries = std::mem::take(&mut catalog.schemas[sid.0].libraries);
            catalog.schemas[sid.0].libraries = libraries
                .into_iter()
                .filter(|id| self.library_included(&schema_name, &catalog.libraries[id.0].name))
                .collect();

            for tid in catalog.schemas[sid.0].tables.clone() {
                let table_name = catalog.tables[tid.0].name.clone();
                let triggers = std::mem::take(&mut catalog.tables[tid.0].triggers);
                catalog.tables[tid.0].triggers = triggers
                    .into_iter()
                    .filter(|id| {
                        self.trigger_included(&schema_name, &table_name, &catalog.triggers[id.0].name)
                    })
                    .collect();
            }
        }

        catalog
            .users
            .retain(|u| self.user_included(&u.user, &u.host));
        Ok(())
    }
}

/// Notes about dependencies broken by filtering
///
/// A view that selects from a table outside the dump is a warning. When the
/// target is MySQL HeatWave Service and names are case-sensitive there, a
/// reference that only matches with a different letter case is an error.
pub fn dependency_issues(catalog: &Catalog, ocimds: bool) -> Vec<Issue> {
    let mut issues = Vec::new();
    for vid in catalog.all_views() {
        let view = catalog.view(vid);
        for (schema, table) in &view.references {
            let exact = catalog
                .schema_order
                .iter()
                .map(|sid| catalog.schema(*sid))
                .find(|s| &s.name == schema)
                .is_some_and(|s| {
                    s.tables.iter().any(|t| &catalog.table(*t).name == table)
                        || s.views.iter().any(|v| &catalog.view(*v).name == table)
                });
            if exact {
                continue;
            }
            let folded = catalog.schema_order.iter().find_map(|sid| {
                let s = catalog.schema(*sid);
                if !s.name.eq_ignore_ascii_case(schema) {
                    return None;
                }
                s.tables
                    .iter()
                    .map(|t| catalog.table(*t).name.clone())
                    .chain(s.views.iter().map(|v| catalog.view(*v).name.clone()))
                    .find(|n| n.eq_ignore_ascii_case(table))
                    .map(|n| quote_qualified(&s.name, &n))
            });
            let view_name = catalog.view_name(vid);
            match folded {
                Some(actual) if ocimds => issues.push(Issue::error(
                    view_name,
                    format!(
                        "references table {} which is named {} in the dump; the names differ in case and will not match on a target with lower_case_table_names=0",
                        quote_qualified(schema, table),
                        actual
                    ),
                )),
                Some(_) => {}
                None => issues.push(Issue::warning(
                    view_name,
                    format!(
                        "references table {} which is not included in the dump",
                        quote_qualified(schema, table)
                    ),
                )),
            }
        }
    }
    for rid in catalog.all_routines() {
        let routine = catalog.routine(rid);
        for (schema, library) in &routine.libraries {
            let present = catalog.find_schema(schema).is_some_and(|sid| {
                catalog
                    .schema(sid)
                    .libraries
                    .iter()
                    .any(|l| &catalog.library(*l).name == library)
            });
            if !present {
                issues.push(Issue::warning(
                    catalog.routine_name(rid),
                    format!(
                        "Routine references excluded/missing library {}",
                        quote_qualified(schema, library)
                    ),
                ));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Routine, RoutineKind, Schema, SqlSecurity, Table, Trigger, User, View};

    fn problems(options: FilterOptions) -> Vec<String> {
        options.problems()
    }

    fn catalog() -> Catalog {
        let mut c = Catalog::default();
        let a = c.add_schema(Schema::new("a"));
        let b = c.add_schema(Schema::new("b"));
        c.add_schema(Schema::new("sys"));
        let t = c.add_table(Table::new(a, "t"));
        c.add_table(Table::new(a, "u"));
        c.add_table(Table::new(b, "t"));
        for name in ["trg1", "trg2"] {
            c.add_trigger(Trigger {
                table: t,
                name: name.into(),
                event: "INSERT".into(),
                timing: "AFTER".into(),
                definer: "`root`@`%`".into(),
                ddl: String::new(),
            });
        }
        c.add_view(View {
            schema: a,
            name: "v".into(),
            definer: "`root`@`%`".into(),
            security: SqlSecurity::Definer,
            references: vec![("a".into(), "u".into())],
            columns: vec!["x".into()],
            ddl: String::new(),
        });
        c.add_routine(Routine {
            schema: b,
            name: "r".into(),
            kind: RoutineKind::Function,
            definer: "`root`@`%`".into(),
            security: SqlSecurity::Definer,
            language: "JAVASCRIPT".into(),
            libraries: vec![("b".into(), "lib".into())],
            ddl: String::new(),
        });
        for (user, host) in [("app", "%"), ("app", "localhost"), ("root", "localhost")] {
            c.users.push(User {
                user: user.into(),
                host: host.into(),
                plugin: "caching_sha2_password".into(),
                has_password: true,
                is_role: false,
                create: String::new(),
                grants: vec![],
            });
        }
        c
    }

    #[test]
    fn test_table_conflict_message() {
        let p = problems(FilterOptions {
            include_tables: vec!["a.t".into()],
            exclude_tables: vec!["a.t".into()],
            ..Default::default()
        });
        assert_eq!(
            p,
            vec!["Both includeTables and excludeTables options contain a table `a`.`t`."]
        );
    }

    #[test]
    fn test_every_conflict_listed() {
        let p = problems(FilterOptions {
            include_schemas: vec!["a".into()],
            exclude_schemas: vec!["a".into()],
            include_routines: vec!["b.r".into()],
            exclude_routines: vec!["b.r".into()],
            include_triggers: vec!["a.t.trg1".into()],
            exclude_triggers: vec!["a.t".into()],
            include_users: vec!["'app'@'%'".into()],
            exclude_users: vec!["app".into()],
            ..Default::default()
        });
        assert!(p.contains(&"Both includeSchemas and excludeSchemas options contain a schema `a`.".to_string()));
        assert!(p.contains(&"Both includeRoutines and excludeRoutines options contain a routine `b`.`r`.".to_string()));
        assert!(p.contains(&"The includeTriggers option contains a filter `a`.`t`.`trg1` which is excluded by the value of the excludeTriggers option: `a`.`t`.".to_string()));
        assert!(p.contains(&"The includeUsers option contains a user 'app'@'%' which is excluded by the value of the excludeUsers option: 'app'.".to_string()));
        assert!(p.iter().any(|m| m.contains("includeRoutines option contains a routine `b`.`r` which refers to a schema which was not included")));
    }

    #[test]
    fn test_invalid_names() {
        let p = problems(FilterOptions {
            include_tables: vec!["nodot".into(), "123.t".into()],
            ..Default::default()
        });
        assert_eq!(p.len(), 2);
        assert!(p[0].contains("schema.table"));
    }

    #[test]
    fn test_apply_prunes() {
        let mut c = catalog();
        let filters = FilterSet::compile(&FilterOptions {
            exclude_tables: vec!["a.u".into()],
            exclude_triggers: vec!["a.t.trg2".into()],
            include_users: vec!["app".into()],
            ..Default::default()
        })
        .unwrap();
        filters.apply(&mut c).unwrap();
        let names: Vec<String> = c.all_tables().map(|t| c.table_name(t)).collect();
        assert_eq!(names, vec!["`a`.`t`", "`b`.`t`"]);
        assert!(c.find_schema("sys").is_none());
        let t = c.find_table("a", "t").unwrap();
        assert_eq!(c.table(t).triggers.len(), 1);
        assert_eq!(c.users.len(), 2);
        assert!(c.excluded_tables.contains(&("a".to_string(), "u".to_string())));

        let issues = dependency_issues(&c, false);
        assert!(issues.iter().any(|i| i.object == "`a`.`v`" && i.message.contains("`a`.`u`")));
        assert!(issues
            .iter()
            .any(|i| i.message == "Routine references excluded/missing library `b`.`lib`"));

        let before: Vec<String> = c.all_tables().map(|t| c.table_name(t)).collect();
        filters.apply(&mut c).unwrap();
        let after: Vec<String> = c.all_tables().map(|t| c.table_name(t)).collect();
        assert_eq!(before, after);
        assert_eq!(c.users.len(), 2);
    }

    #[test]
    fn test_filter_on_missing_schema_is_error() {
        let mut c = catalog();
        let filters = FilterSet::compile(&FilterOptions {
            include_tables: vec!["nope.t".into()],
            ..Default::default()
        })
        .unwrap();
        let err = filters.apply(&mut c).unwrap_err();
        assert!(err.to_string().contains("`nope` which is not included in the dump"));

        let mut c = catalog();
        let filters = FilterSet::compile(&FilterOptions {
            include_tables: vec!["a.missing".into()],
            ..Default::default()
        })
        .unwrap();
        filters.apply(&mut c).unwrap();
        assert_eq!(c.table_count(), 0);
    }

    #[test]
    fn test_case_mismatch_with_ocimds() {
        let mut c = catalog();
        c.views[0].references = vec![("a".into(), "T".into())];
        let issues = dependency_issues(&c, true);
        assert!(issues.iter().any(|i| i.is_error() && i.object == "`a`.`v`"));
        assert!(dependency_issues(&c, false)
            .iter()
            .all(|i| i.object != "`a`.`v`"));
    }
}
