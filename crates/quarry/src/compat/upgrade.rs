//! Upgrade checks run for MySQL HeatWave Service targets
//!
//! Error-level findings abort the dump unless `skipUpgradeChecks` is set.

use std::sync::LazyLock;

use regex::Regex;

use crate::catalog::Catalog;
use crate::error::Issue;
use crate::ident::quote_identifier;
use crate::version::Version;

/// Version checked against when `targetVersion` is not given
pub const DEFAULT_TARGET_VERSION: Version = Version::new(8, 4, 0);

/// Keywords that became reserved in a release
const RESERVED_KEYWORDS: &[(Version, &[&str])] = &[
    (
        Version::new(8, 0, 0),
        &[
            "CUME_DIST",
            "DENSE_RANK",
            "EMPTY",
            "EXCEPT",
            "FIRST_VALUE",
            "FUNCTION",
            "GROUPING",
            "GROUPS",
            "JSON_TABLE",
            "LAG",
            "LAST_VALUE",
            "LATERAL",
            "LEAD",
            "NTH_VALUE",
            "NTILE",
            "OF",
            "OVER",
            "PERCENT_RANK",
            "RANK",
            "RECURSIVE",
            "ROW_NUMBER",
            "SYSTEM",
            "WINDOW",
        ],
    ),
    (Version::new(8, 0, 17), &["ARRAY", "MEMBER"]),
    (Version::new(8, 0, 31), &["INTERSECT"]),
    (Version::new(8, 4, 0), &["MANUAL", "PARALLEL", "QUALIFY", "TABLESAMPLE"]),
];

/// Engines with native partitioning
const NATIVE_PARTITIONING: [&str; 2] = ["innodb", "ndbcluster"];

static DISPLAY_WIDTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(tinyint|smallint|mediumint|int|integer|bigint)\((\d+)\)")
        .expect("display width regex is invalid")
});

static UTF8MB3_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:CHARACTER SET|CHARSET)[\s=]+(utf8mb3|utf8)\b").expect("charset regex is invalid")
});

fn is_utf8mb3(charset_or_collation: &str) -> bool {
    let lower = charset_or_collation.to_ascii_lowercase();
    lower == "utf8"
        || lower == "utf8mb3"
        || lower.starts_with("utf8_")
        || lower.starts_with("utf8mb3_")
}

/// Keyword reserved by `target` but not by `source`
fn newly_reserved(name: &str, source: Option<Version>, target: Version) -> Option<Version> {
    RESERVED_KEYWORDS.iter().find_map(|(since, words)| {
        let applies = *since <= target && source.map_or(true, |s| s < *since);
        (applies && words.iter().any(|w| w.eq_ignore_ascii_case(name))).then_some(*since)
    })
}

/// Run every check for `target`
pub fn check(catalog: &Catalog, target: Version) -> Vec<Issue> {
    let source = catalog.server.version;
    let mut issues = Vec::new();
    let mut reserved = |object: String, kind: &str, name: &str| {
        if let Some(since) = newly_reserved(name, source, target) {
            issues.push(Issue::warning(
                object,
                format!(
                    "{} name {} is a reserved keyword since MySQL {}",
                    kind,
                    quote_identifier(name),
                    since
                ),
            ));
        }
    };

    for sid in &catalog.schema_order {
        let schema = catalog.schema(*sid);
        reserved(quote_identifier(&schema.name), "Schema", &schema.name);
        for tid in &schema.tables {
            let table = catalog.table(*tid);
            let object = catalog.table_name(*tid);
            reserved(object.clone(), "Table", &table.name);
            for column in &table.columns {
                reserved(object.clone(), "Column", &column.name);
            }
            for trg in &table.triggers {
                let trigger = catalog.trigger(*trg);
                reserved(catalog.trigger_name(*trg), "Trigger", &trigger.name);
            }
        }
        for vid in &schema.views {
            reserved(catalog.view_name(*vid), "View", &catalog.view(*vid).name);
        }
        for rid in &schema.routines {
            reserved(catalog.routine_name(*rid), "Routine", &catalog.routine(*rid).name);
        }
        for eid in &schema.events {
            reserved(catalog.event_name(*eid), "Event", &catalog.event(*eid).name);
        }
    }

    for sid in &catalog.schema_order {
        let schema = catalog.schema(*sid);
        if is_utf8mb3(&schema.charset) {
            issues.push(Issue::warning(
                quote_identifier(&schema.name),
                "Schema uses the utf8mb3 character set, which is deprecated; consider converting to utf8mb4",
            ));
        }
        for tid in &schema.tables {
            let table = catalog.table(*tid);
            let object = catalog.table_name(*tid);
            if table.collation.as_deref().is_some_and(is_utf8mb3) || UTF8MB3_RE.is_match(&table.ddl) {
                issues.push(Issue::warning(
                    &object,
                    "uses the utf8mb3 character set, which is deprecated; consider converting to utf8mb4",
                ));
            }
            if table.is_partitioned()
                && !NATIVE_PARTITIONING
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(&table.engine))
            {
                issues.push(Issue::error(
                    &object,
                    format!(
                        "uses partitioning with the {} storage engine, which has no native partitioning support",
                        table.engine
                    ),
                ));
            }
            let deprecated: Vec<String> = table
                .columns
                .iter()
                .filter(|c| {
                    let column_type = c.column_type.to_ascii_lowercase();
                    column_type.contains("zerofill")
                        || DISPLAY_WIDTH_RE
                            .captures(&column_type)
                            .is_some_and(|caps| !(&caps[1] == "tinyint" && &caps[2] == "1"))
                })
                .map(|c| quote_identifier(&c.name))
                .collect();
            if !deprecated.is_empty() {
                issues.push(Issue::notice(
                    &object,
                    format!(
                        "uses ZEROFILL or a display width on integer columns {}, which is deprecated and ignored",
                        deprecated.join(", ")
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
    use crate::catalog::{Column, Partition, Schema, Table};

    fn column(name: &str, column_type: &str) -> Column {
        Column {
            name: name.into(),
            data_type: "int".into(),
            column_type: column_type.into(),
            nullable: true,
            auto_increment: false,
            generated: false,
        }
    }

    #[test]
    fn test_checks() {
        let mut c = Catalog::default();
        c.server.version = Some(Version::new(5, 7, 44));
        let mut schema = Schema::new("app");
        schema.charset = "utf8".into();
        let s = c.add_schema(schema);
        let mut t = Table::new(s, "rank");
        t.engine = "MyISAM".into();
        t.partitions = vec![Partition {
            name: "p0".into(),
            subpartitions: vec![],
        }];
        t.columns = vec![
            column("id", "int(11) unsigned zerofill"),
            column("flag", "tinyint(1)"),
            column("window", "int"),
        ];
        c.add_table(t);

        let issues = check(&c, DEFAULT_TARGET_VERSION);
        let find = |text: &str| issues.iter().find(|i| i.message.contains(text)).cloned();
        assert!(find("Table name `rank` is a reserved keyword since MySQL 8.0.0").is_some());
        assert!(find("Column name `window`").is_some());
        assert!(find("Schema uses the utf8mb3").is_some());
        assert!(find("partitioning with the MyISAM").unwrap().is_error());
        let notice = find("ZEROFILL").unwrap();
        assert!(notice.message.contains("`id`"));
        assert!(!notice.message.contains("`flag`"));
    }

    #[test]
    fn test_keywords_reserved_by_source_are_ignored() {
        let mut c = Catalog::default();
        c.server.version = Some(Version::new(8, 0, 36));
        let s = c.add_schema(Schema::new("app"));
        c.add_table(Table::new(s, "rank"));
        c.add_table(Table::new(s, "qualify"));
        let issues = check(&c, Version::new(8, 4, 0));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("`qualify`"));
    }
}
