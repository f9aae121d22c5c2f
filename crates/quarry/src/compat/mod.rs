//! Compatibility checks and DDL rewrites for MySQL HeatWave Service
//!
//! With `ocimds` the catalog is scanned and every finding becomes an
//! [`Issue`]. DDL is only rewritten for the fixes named in `compatibility`;
//! the one exception is `DATA DIRECTORY`, `INDEX DIRECTORY` and `ENCRYPTION`
//! table options, which are commented out whenever `ocimds` is set.
//!
//! All rewrites work on the in-memory catalog before anything is written.

pub mod grants;
pub mod upgrade;

use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::catalog::{Catalog, RoutineKind, SqlSecurity, TableId};
use crate::error::Issue;
use crate::ident::{quote_identifier, quote_qualified};
use crate::options::DumpOptions;
use crate::version::Version;

/// Name of the column added by `create_invisible_pks`
pub const INVISIBLE_PK_COLUMN: &str = "my_row_id";

/// Compatibility fix requested through the `compatibility` option
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CompatToken {
    ForceInnodb,
    StripDefiners,
    StripTablespaces,
    StripRestrictedGrants,
    StripInvalidGrants,
    SkipInvalidAccounts,
    IgnoreWildcardGrants,
    UnescapeWildcardGrants,
    CreateInvisiblePks,
    IgnoreMissingPks,
    ForceNonStandardFks,
}

impl CompatToken {
    pub const ALL: [CompatToken; 11] = [
        Self::ForceInnodb,
        Self::StripDefiners,
        Self::StripTablespaces,
        Self::StripRestrictedGrants,
        Self::StripInvalidGrants,
        Self::SkipInvalidAccounts,
        Self::IgnoreWildcardGrants,
        Self::UnescapeWildcardGrants,
        Self::CreateInvisiblePks,
        Self::IgnoreMissingPks,
        Self::ForceNonStandardFks,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForceInnodb => "force_innodb",
            Self::StripDefiners => "strip_definers",
            Self::StripTablespaces => "strip_tablespaces",
            Self::StripRestrictedGrants => "strip_restricted_grants",
            Self::StripInvalidGrants => "strip_invalid_grants",
            Self::SkipInvalidAccounts => "skip_invalid_accounts",
            Self::IgnoreWildcardGrants => "ignore_wildcard_grants",
            Self::UnescapeWildcardGrants => "unescape_wildcard_grants",
            Self::CreateInvisiblePks => "create_invisible_pks",
            Self::IgnoreMissingPks => "ignore_missing_pks",
            Self::ForceNonStandardFks => "force_non_standard_fks",
        }
    }
}

impl fmt::Display for CompatToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatToken {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown compatibility option: {}", s))
    }
}

static ENGINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bENGINE\s*=\s*(\w+)").expect("engine regex is invalid"));

static ROW_FORMAT_FIXED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*\bROW_FORMAT\s*=\s*FIXED\b").expect("row format regex is invalid")
});

static DEFINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*\bDEFINER\s*=\s*(?:`(?:[^`]|``)*`|'(?:[^'\\]|\\.|'')*'|[^\s@]+)@(?:`(?:[^`]|``)*`|'(?:[^'\\]|\\.|'')*'|[^\s]+)",
    )
    .expect("definer regex is invalid")
});

static SQL_SECURITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bSQL\s+SECURITY\s+(DEFINER|INVOKER)\b").expect("sql security regex is invalid")
});

static VIEW_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bVIEW\b").expect("view regex is invalid"));

static TABLESPACE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\s*(?:/\*!50100\s+TABLESPACE\s+(`(?:[^`]|``)*`)(?:\s+STORAGE\s+\w+)?\s*\*/|\bTABLESPACE(?:\s*=\s*|\s+)(`(?:[^`]|``)*`|\w+)(?:\s+STORAGE\s+\w+)?)",
    )
    .expect("tablespace regex is invalid")
});

static DIRECTORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b((?:DATA|INDEX)\s+DIRECTORY\s*=\s*'(?:[^'\\]|\\.|'')*')")
        .expect("directory regex is invalid")
});

static ENCRYPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(ENCRYPTION\s*=\s*'[YN]')").expect("encryption regex is invalid")
});

/// Storage engines MySQL HeatWave Service accepts
const SUPPORTED_ENGINES: [&str; 2] = ["innodb", "memory"];

/// Tablespaces that need no `strip_tablespaces`
const DEFAULT_TABLESPACES: [&str; 2] = ["innodb_system", "innodb_file_per_table"];

/// `(ddl without DEFINER, whether one was removed)`
pub fn strip_definer(ddl: &str) -> (String, bool) {
    match DEFINER_RE.find(ddl) {
        Some(m) => {
            let mut out = String::with_capacity(ddl.len());
            out.push_str(&ddl[..m.start()]);
            out.push_str(&ddl[m.end()..]);
            (out, true)
        }
        None => (ddl.to_string(), false),
    }
}

/// Replace `ENGINE=X` with `ENGINE=InnoDB`, returning the old engine
pub fn force_innodb(ddl: &str) -> (String, Option<String>) {
    let Some(caps) = ENGINE_RE.captures(ddl) else {
        return (ddl.to_string(), None);
    };
    let engine = caps[1].to_string();
    if engine.eq_ignore_ascii_case("InnoDB") {
        return (ddl.to_string(), None);
    }
    (
        ENGINE_RE.replacen(ddl, 1, "ENGINE=InnoDB").into_owned(),
        Some(engine),
    )
}

/// Remove `ROW_FORMAT=FIXED`
pub fn strip_row_format_fixed(ddl: &str) -> (String, bool) {
    if ROW_FORMAT_FIXED_RE.is_match(ddl) {
        (ROW_FORMAT_FIXED_RE.replace_all(ddl, "").into_owned(), true)
    } else {
        (ddl.to_string(), false)
    }
}

/// Tablespace named in a table DDL
pub fn tablespace_of(ddl: &str) -> Option<String> {
    TABLESPACE_RE.captures(ddl).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim_matches('`').replace("``", "`"))
    })
}

/// Remove every `TABLESPACE` clause
pub fn strip_tablespace(ddl: &str) -> String {
    TABLESPACE_RE.replace_all(ddl, "").into_owned()
}

/// Comment out `DATA DIRECTORY`, `INDEX DIRECTORY` and `ENCRYPTION` options
pub fn comment_out_table_options(ddl: &str) -> (String, Vec<String>) {
    let mut found = Vec::new();
    for re in [&*DIRECTORY_RE, &*ENCRYPTION_RE] {
        for caps in re.captures_iter(ddl) {
            found.push(caps[1].to_string());
        }
    }
    if found.is_empty() {
        return (ddl.to_string(), found);
    }
    let ddl = DIRECTORY_RE.replace_all(ddl, "/* $1 */");
    let ddl = ENCRYPTION_RE.replace_all(&ddl, "/* $1 */").into_owned();
    (ddl, found)
}

/// Switch `SQL SECURITY DEFINER` to `INVOKER` in a view, adding the clause if missing
pub fn view_security_invoker(ddl: &str) -> String {
    if SQL_SECURITY_RE.is_match(ddl) {
        SQL_SECURITY_RE
            .replacen(ddl, 1, "SQL SECURITY INVOKER")
            .into_owned()
    } else {
        VIEW_KEYWORD_RE
            .replacen(ddl, 1, "SQL SECURITY INVOKER VIEW")
            .into_owned()
    }
}

/// Byte offset just past the parenthesis closing the first `(`
fn closing_paren(ddl: &str) -> Option<usize> {
    let start = ddl.find('(')?;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let bytes = ddl.as_bytes();
    let mut i = start;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) if b == b'\\' => i += 1,
            Some(_) => {}
            None => match b {
                b'\'' | b'"' | b'`' => quote = Some(b),
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Switch a routine to `SQL SECURITY INVOKER`, adding the characteristic if missing
pub fn routine_security_invoker(ddl: &str, kind: RoutineKind) -> String {
    if SQL_SECURITY_RE.is_match(ddl) {
        return SQL_SECURITY_RE
            .replacen(ddl, 1, "SQL SECURITY INVOKER")
            .into_owned();
    }
    let Some(mut at) = closing_paren(ddl) else {
        return ddl.to_string();
    };
    if kind == RoutineKind::Function {
        let upper = ddl[at..].to_ascii_uppercase();
        if let Some(pos) = upper.find("RETURNS") {
            let from = at + pos;
            at = ddl[from..].find('\n').map_or(ddl.len(), |n| from + n);
        }
    }
    format!("{}\n    SQL SECURITY INVOKER{}", &ddl[..at], &ddl[at..])
}

/// Compatibility settings of one dump
#[derive(Debug, Clone, Default)]
pub struct Compatibility {
    pub tokens: BTreeSet<CompatToken>,
    pub ocimds: bool,
    pub target: Option<Version>,
    pub skip_upgrade_checks: bool,
}

impl Compatibility {
    pub fn from_options(options: &DumpOptions) -> Self {
        Self {
            tokens: options.compat_tokens(),
            ocimds: options.ocimds,
            target: options.target_version(),
            skip_upgrade_checks: options.skip_upgrade_checks,
        }
    }

    pub fn has(&self, token: CompatToken) -> bool {
        self.tokens.contains(&token)
    }

    /// Version the checks are made for
    pub fn target_version(&self) -> Version {
        self.target.unwrap_or(upgrade::DEFAULT_TARGET_VERSION)
    }

    /// Whether anything has to be looked at
    pub fn is_active(&self) -> bool {
        self.ocimds || !self.tokens.is_empty()
    }

    /// Check and rewrite every object in `catalog`, returning all findings
    pub fn apply(&self, catalog: &mut Catalog) -> Vec<Issue> {
        let mut issues = Vec::new();
        if !self.is_active() {
            return issues;
        }
        for tid in catalog.all_tables().collect::<Vec<_>>() {
            self.table(catalog, tid, &mut issues);
        }
        for vid in catalog.all_views().collect::<Vec<_>>() {
            let object = catalog.view_name(vid);
            let view = &mut catalog.views[vid.0];
            let ddl = self.definer(&object, &view.ddl, &mut issues);
            view.ddl = if self.has(CompatToken::StripDefiners) {
                if view.security == SqlSecurity::Definer {
                    issues.push(Issue::notice(&object, "SQL SECURITY characteristic set to INVOKER"));
                }
                view.security = SqlSecurity::Invoker;
                view_security_invoker(&ddl)
            } else {
                ddl
            };
        }
        for rid in catalog.all_routines().collect::<Vec<_>>() {
            let object = catalog.routine_name(rid);
            let routine = &mut catalog.routines[rid.0];
            let ddl = self.definer(&object, &routine.ddl, &mut issues);
            routine.ddl = if self.has(CompatToken::StripDefiners) {
                if routine.security == SqlSecurity::Definer {
                    issues.push(Issue::notice(&object, "SQL SECURITY characteristic set to INVOKER"));
                }
                routine.security = SqlSecurity::Invoker;
                routine_security_invoker(&ddl, routine.kind)
            } else {
                ddl
            };
        }
        for sid in catalog.schema_order.clone() {
            for eid in catalog.schema(sid).events.clone() {
                let object = catalog.event_name(eid);
                let ddl = self.definer(&object, &catalog.events[eid.0].ddl, &mut issues);
                catalog.events[eid.0].ddl = ddl;
            }
        }
        for tid in catalog.all_tables().collect::<Vec<_>>() {
            for trg in catalog.table(tid).triggers.clone() {
                let object = catalog.trigger_name(trg);
                let ddl = self.definer(&object, &catalog.triggers[trg.0].ddl, &mut issues);
                catalog.triggers[trg.0].ddl = ddl;
            }
        }
        if self.has(CompatToken::ForceNonStandardFks) {
            issues.push(Issue::notice(
                "Dump",
                "Foreign keys on non-unique or partial keys are allowed on load (restrict_fk_on_non_standard_key=OFF)",
            ));
        }
        grants::apply(self, catalog, &mut issues);
        if self.ocimds && !self.skip_upgrade_checks {
            issues.extend(upgrade::check(catalog, self.target_version()));
        }
        issues
    }

    fn definer(&self, object: &str, ddl: &str, issues: &mut Vec<Issue>) -> String {
        if self.has(CompatToken::StripDefiners) {
            let (out, removed) = strip_definer(ddl);
            if removed {
                issues.push(Issue::notice(object, "definition had DEFINER clause removed"));
            }
            out
        } else {
            if self.ocimds && DEFINER_RE.is_match(ddl) {
                issues.push(Issue::error(
                    object,
                    "definition uses DEFINER clause which can only be executed by an account with the SET_ANY_DEFINER privilege (fix this with 'strip_definers' compatibility option)",
                ));
            }
            ddl.to_string()
        }
    }

    fn table(&self, catalog: &mut Catalog, tid: TableId, issues: &mut Vec<Issue>) {
        let object = catalog.table_name(tid);
        let mut ddl = catalog.table(tid).ddl.clone();

        if let Some(engine) = ENGINE_RE.captures(&ddl).map(|c| c[1].to_string()) {
            let supported = SUPPORTED_ENGINES
                .iter()
                .any(|e| e.eq_ignore_ascii_case(&engine));
            if self.has(CompatToken::ForceInnodb) {
                let (out, old) = force_innodb(&ddl);
                if let Some(old) = old {
                    issues.push(Issue::notice(
                        &object,
                        format!("had unsupported engine {} changed to InnoDB", old),
                    ));
                    catalog.table_mut(tid).engine = "InnoDB".to_string();
                }
                let (out, removed) = strip_row_format_fixed(&out);
                if removed {
                    issues.push(Issue::notice(&object, "had ROW_FORMAT=FIXED option removed"));
                }
                ddl = out;
            } else if self.ocimds && !supported {
                issues.push(Issue::error(
                    &object,
                    format!(
                        "uses unsupported storage engine {} (fix this with 'force_innodb' compatibility option)",
                        engine
                    ),
                ));
            }
        }

        let tablespace = tablespace_of(&ddl);
        if let Some(ts) = &tablespace {
            if self.has(CompatToken::StripTablespaces) {
                ddl = strip_tablespace(&ddl);
                issues.push(Issue::notice(&object, "had unsupported tablespace option removed"));
            } else if self.ocimds && !DEFAULT_TABLESPACES.iter().any(|d| d.eq_ignore_ascii_case(ts)) {
                issues.push(Issue::error(
                    &object,
                    format!(
                        "uses unsupported tablespace option {} (fix this with 'strip_tablespaces' compatibility option)",
                        quote_identifier(ts)
                    ),
                ));
            }
        }

        if self.ocimds {
            let (out, clauses) = comment_out_table_options(&ddl);
            for clause in clauses {
                issues.push(Issue::notice(&object, format!("had {} option commented out", clause)));
            }
            ddl = out;
        }

        let has_pk = catalog.table(tid).primary_key().is_some();
        if !has_pk {
            if self.has(CompatToken::CreateInvisiblePks) {
                self.invisible_pk(catalog, tid, &object, issues);
            } else if self.has(CompatToken::IgnoreMissingPks) {
                issues.push(Issue::warning(
                    &object,
                    "does not have a Primary Key, this will prevent enabling High Availability in MySQL HeatWave Service instance",
                ));
            } else if self.ocimds {
                issues.push(Issue::error(
                    &object,
                    "does not have a Primary Key, which is required for High Availability in MySQL HeatWave Service (fix this with 'create_invisible_pks' or 'ignore_missing_pks' compatibility options)",
                ));
            }
        }

        let table = catalog.table_mut(tid);
        table.tablespace = tablespace;
        table.ddl = ddl;
    }

    fn invisible_pk(&self, catalog: &mut Catalog, tid: TableId, object: &str, issues: &mut Vec<Issue>) {
        let table = catalog.table(tid);
        let prefix = "does not have a Primary Key, this cannot be fixed automatically because";
        if table.column(INVISIBLE_PK_COLUMN).is_some() {
            issues.push(Issue::error(
                object,
                format!(
                    "{} the table has a column named {}",
                    prefix,
                    quote_identifier(INVISIBLE_PK_COLUMN)
                ),
            ));
        } else if let Some(column) = table.columns.iter().find(|c| c.auto_increment) {
            issues.push(Issue::error(
                object,
                format!(
                    "{} the table has a column {} with AUTO_INCREMENT attribute",
                    prefix,
                    quote_identifier(&column.name)
                ),
            ));
        } else if table.is_partitioned() {
            issues.push(Issue::error(object, format!("{} the table is partitioned", prefix)));
        } else {
            let statement = format!(
                "ALTER TABLE {} ADD COLUMN {} BIGINT UNSIGNED NOT NULL AUTO_INCREMENT INVISIBLE PRIMARY KEY FIRST",
                quote_qualified(&catalog.schema(table.schema).name, &table.name),
                quote_identifier(INVISIBLE_PK_COLUMN)
            );
            catalog.table_mut(tid).post_ddl.push(statement);
            issues.push(Issue::notice(
                object,
                "does not have a Primary Key, this will be fixed when the dump is loaded",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, Index, IndexColumn, IndexKind, Routine, Schema, Table, View};
    use crate::error::Severity;

    fn column(name: &str, auto_increment: bool) -> Column {
        Column {
            name: name.into(),
            data_type: "int".into(),
            column_type: "int".into(),
            nullable: false,
            auto_increment,
            generated: false,
        }
    }

    fn catalog() -> (Catalog, TableId) {
        let mut c = Catalog::default();
        let s = c.add_schema(Schema::new("s"));
        let mut t = Table::new(s, "t");
        t.columns = vec![column("a", false), column("b", false)];
        t.ddl = "CREATE TABLE `t` (\n  `a` int,\n  `b` int\n) ENGINE=MyISAM DEFAULT CHARSET=utf8mb4 ROW_FORMAT=FIXED DATA DIRECTORY='/data/x'".into();
        let tid = c.add_table(t);
        c.add_view(View {
            schema: s,
            name: "v".into(),
            definer: "`root`@`localhost`".into(),
            security: SqlSecurity::Definer,
            references: vec![],
            columns: vec![],
            ddl: "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`localhost` SQL SECURITY DEFINER VIEW `v` AS select 1 AS `1`".into(),
        });
        c.add_routine(Routine {
            schema: s,
            name: "f".into(),
            kind: RoutineKind::Function,
            definer: "`root`@`localhost`".into(),
            security: SqlSecurity::Definer,
            language: "SQL".into(),
            libraries: vec![],
            ddl: "CREATE DEFINER=`root`@`localhost` FUNCTION `f`(x int) RETURNS int\n    DETERMINISTIC\nRETURN x + 1".into(),
        });
        (c, tid)
    }

    fn compat(ocimds: bool, tokens: &[CompatToken]) -> Compatibility {
        Compatibility {
            tokens: tokens.iter().copied().collect(),
            ocimds,
            target: None,
            skip_upgrade_checks: false,
        }
    }

    #[test]
    fn test_token_parse() {
        assert_eq!("force_innodb".parse::<CompatToken>(), Ok(CompatToken::ForceInnodb));
        assert!("make_it_work".parse::<CompatToken>().is_err());
    }

    #[test]
    fn test_ocimds_reports_without_rewriting() {
        let (mut c, tid) = catalog();
        let before = c.table(tid).ddl.clone();
        let issues = compat(true, &[]).apply(&mut c);
        let errors: Vec<&Issue> = issues.iter().filter(|i| i.is_error()).collect();
        assert!(errors.iter().any(|i| i.message.contains("force_innodb")));
        assert!(errors.iter().any(|i| i.message.contains("create_invisible_pks")));
        assert!(errors.iter().any(|i| i.object == "`s`.`v`" && i.message.contains("strip_definers")));
        assert!(c.table(tid).ddl.contains("ENGINE=MyISAM"));
        assert!(c.table(tid).ddl.contains("/* DATA DIRECTORY='/data/x' */"));
        assert_ne!(c.table(tid).ddl, before);
        assert!(c.table(tid).post_ddl.is_empty());
    }

    #[test]
    fn test_rewrites() {
        let (mut c, tid) = catalog();
        let issues = compat(
            true,
            &[
                CompatToken::ForceInnodb,
                CompatToken::StripDefiners,
                CompatToken::CreateInvisiblePks,
            ],
        )
        .apply(&mut c);
        let table = c.table(tid);
        assert!(table.ddl.contains("ENGINE=InnoDB"));
        assert!(!table.ddl.contains("ROW_FORMAT"));
        assert_eq!(
            table.post_ddl,
            vec!["ALTER TABLE `s`.`t` ADD COLUMN `my_row_id` BIGINT UNSIGNED NOT NULL AUTO_INCREMENT INVISIBLE PRIMARY KEY FIRST"]
        );
        assert_eq!(
            c.views[0].ddl,
            "CREATE ALGORITHM=UNDEFINED SQL SECURITY INVOKER VIEW `v` AS select 1 AS `1`"
        );
        assert_eq!(
            c.routines[0].ddl,
            "CREATE FUNCTION `f`(x int) RETURNS int\n    SQL SECURITY INVOKER\n    DETERMINISTIC\nRETURN x + 1"
        );
        assert!(issues.iter().all(|i| i.severity != Severity::Error));
    }

    #[test]
    fn test_invisible_pk_collisions() {
        let (mut c, tid) = catalog();
        c.table_mut(tid).columns.push(column("my_row_id", false));
        let issues = compat(false, &[CompatToken::CreateInvisiblePks]).apply(&mut c);
        assert!(issues.iter().any(|i| i.is_error()
            && i.message.ends_with("because the table has a column named `my_row_id`")));

        let (mut c, tid) = catalog();
        c.table_mut(tid).columns[1].auto_increment = true;
        let issues = compat(false, &[CompatToken::CreateInvisiblePks]).apply(&mut c);
        assert!(issues.iter().any(|i| i.is_error()
            && i.message.ends_with("because the table has a column `b` with AUTO_INCREMENT attribute")));
    }

    #[test]
    fn test_table_with_pk_needs_nothing() {
        let (mut c, tid) = catalog();
        let table = c.table_mut(tid);
        table.ddl = "CREATE TABLE `t` (`a` int NOT NULL, PRIMARY KEY (`a`)) ENGINE=InnoDB /*!50100 TABLESPACE `innodb_system` */".into();
        table.indexes.push(Index {
            name: "PRIMARY".into(),
            unique: true,
            kind: IndexKind::Btree,
            columns: vec![IndexColumn {
                name: Some("a".into()),
                descending: false,
                nullable: false,
            }],
        });
        let issues = compat(true, &[CompatToken::StripDefiners]).apply(&mut c);
        assert!(!issues.iter().any(|i| i.object == "`s`.`t`"));
        assert_eq!(c.table(tid).tablespace.as_deref(), Some("innodb_system"));
    }

    #[test]
    fn test_strip_tablespace() {
        let ddl = "CREATE TABLE `t` (`a` int) /*!50100 TABLESPACE `ts1` */ ENGINE=InnoDB";
        assert_eq!(tablespace_of(ddl).as_deref(), Some("ts1"));
        assert_eq!(strip_tablespace(ddl), "CREATE TABLE `t` (`a` int) ENGINE=InnoDB");
    }

    #[test]
    fn test_procedure_security_added_after_parameters() {
        let ddl = "CREATE PROCEDURE `p`(IN a int)\nBEGIN\n  SELECT a;\nEND";
        assert_eq!(
            routine_security_invoker(ddl, RoutineKind::Procedure),
            "CREATE PROCEDURE `p`(IN a int)\n    SQL SECURITY INVOKER\nBEGIN\n  SELECT a;\nEND"
        );
    }
}
