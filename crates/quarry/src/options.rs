//! Options for dump, load and copy operations
//!
//! Every entry point takes one explicit options struct. The structs use the
//! camelCase option names on the wire, so they can be read from a YAML or
//! JSON options file and then adjusted from command-line flags:
//!
//! ```yaml
//! threads: 8
//! bytesPerChunk: 128M
//! compression: zstd;level=3
//! includeSchemas: [world]
//! where:
//!   world.city: "CountryCode = '${COUNTRY:-NLD}'"
//! ```
//!
//! [`DumpOptions::validate_all`] and [`LoadOptions::validate_all`] check everything in
//! one pass and return every problem in a single [`Error::Validation`].

use quarry_storage::{Compression, StorageOptions};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;
use validator::{Validate, ValidationErrors};

use crate::chunker::check_condition;
use crate::compat::CompatToken;
use crate::dialect::{DialectName, DialectOverrides};
use crate::error::{Error, Result};
use crate::filter::FilterOptions;
use crate::ident::split_qualified;
use crate::version::Version;

/// Smallest accepted `bytesPerChunk`
pub const MIN_BYTES_PER_CHUNK: u64 = 128 * 1024;
/// Default `bytesPerChunk`
pub const DEFAULT_BYTES_PER_CHUNK: u64 = 64 * 1024 * 1024;
/// Smallest accepted `maxBytesPerTransaction`
pub const MIN_BYTES_PER_TRANSACTION: u64 = 4096;

/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid")
});

/// Parse a size with an optional `k`, `M`, `G` or `T` suffix (powers of 1024)
pub fn parse_size(raw: &str) -> std::result::Result<u64, String> {
    let trimmed = raw.trim();
    let without_b = trimmed
        .strip_suffix(['B', 'b'])
        .filter(|s| s.ends_with(|c: char| c.is_ascii_alphabetic()))
        .unwrap_or(trimmed);
    let (digits, multiplier) = match without_b.chars().last() {
        Some('k' | 'K') => (&without_b[..without_b.len() - 1], 1u64 << 10),
        Some('m' | 'M') => (&without_b[..without_b.len() - 1], 1u64 << 20),
        Some('g' | 'G') => (&without_b[..without_b.len() - 1], 1u64 << 30),
        Some('t' | 'T') => (&without_b[..without_b.len() - 1], 1u64 << 40),
        _ => (without_b, 1),
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("Invalid size value '{}'", raw))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("Size value '{}' is too large", raw))
}

/// Render a size the way it is accepted by [`parse_size`]
pub fn format_size(bytes: u64) -> String {
    for (suffix, shift) in [("G", 30), ("M", 20), ("k", 10)] {
        if bytes >= 1 << shift && bytes % (1 << shift) == 0 {
            return format!("{}{}", bytes >> shift, suffix);
        }
    }
    bytes.to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Number(u64),
    Text(String),
}

fn size_from(value: SizeValue) -> std::result::Result<u64, String> {
    match value {
        SizeValue::Number(n) => Ok(n),
        SizeValue::Text(s) => parse_size(&s),
    }
}

fn de_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    size_from(SizeValue::deserialize(d)?).map_err(de::Error::custom)
}

fn de_opt_size<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<u64>, D::Error> {
    Option::<SizeValue>::deserialize(d)?
        .map(size_from)
        .transpose()
        .map_err(de::Error::custom)
}

/// Expand `${VAR}` and `${VAR:-default}` using `env`
pub fn expand_env_vars<F>(content: &str, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let default = caps.get(2).map(|m| m.as_str());
            env(&caps[1]).unwrap_or_else(|| default.unwrap_or("").to_string())
        })
        .to_string()
}

/// Parse options from YAML or JSON text after environment expansion
pub fn parse_options<T, F>(content: &str, json: bool, env: F) -> Result<T>
where
    T: serde::de::DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let expanded = expand_env_vars(content, env);
    if json {
        Ok(serde_json::from_str(&expanded)?)
    } else {
        Ok(serde_yaml::from_str(&expanded)?)
    }
}

/// Read options from a `.json`, `.yaml` or `.yml` file
pub fn read_options_file<T>(path: &Path) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let content = std::fs::read_to_string(path)?;
    let json = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    parse_options(&content, json, |name| std::env::var(name).ok())
}

fn validator_messages(errors: &ValidationErrors) -> Vec<String> {
    let mut messages = Vec::new();
    for (field, errs) in errors.field_errors() {
        for e in errs {
            let range = match (e.params.get("min"), e.params.get("max")) {
                (Some(min), Some(max)) => format!(" (between {} and {})", min, max),
                (Some(min), None) => format!(" (at least {})", min),
                _ => String::new(),
            };
            messages.push(format!(
                "The value of the '{}' option is out of range{}",
                camel_case(field.as_ref()),
                range
            ));
        }
    }
    messages.sort();
    messages
}

fn camel_case(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn unknown_option_messages(unknown: &BTreeMap<String, serde_json::Value>) -> Vec<String> {
    unknown
        .keys()
        .map(|k| format!("Invalid option: {}", k))
        .collect()
}

/// Check a `schema.table` option key
fn check_table_key(option: &str, key: &str, problems: &mut Vec<String>) -> Option<(String, String)> {
    match split_qualified(key) {
        Ok(parts) if parts.len() == 2 => {
            let mut parts = parts.into_iter();
            Some((parts.next()?, parts.next()?))
        }
        Ok(_) => {
            problems.push(format!(
                "The table name key '{}' of the '{}' option must be in the following form: schema.table.",
                key, option
            ));
            None
        }
        Err(e) => {
            problems.push(format!("Failed to parse table name key '{}' of the '{}' option: {}", key, option, e));
            None
        }
    }
}

/// What a dump covers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DumpScope {
    /// Every schema but the system ones
    #[default]
    Instance,
    /// The listed schemas
    Schemas(Vec<String>),
    /// Tables and views of one schema
    Tables {
        schema: String,
        tables: Vec<String>,
        /// Dump every table and view of the schema; `tables` must be empty
        all: bool,
    },
}

impl DumpScope {
    /// Name recorded as the manifest `origin`
    pub fn origin(&self) -> &'static str {
        match self {
            Self::Instance => "dump_instance",
            Self::Schemas(_) => "dump_schemas",
            Self::Tables { .. } => "dump_tables",
        }
    }

    fn problems(&self) -> Vec<String> {
        match self {
            Self::Instance => Vec::new(),
            Self::Schemas(schemas) if schemas.is_empty() => {
                vec!["The 'schemas' parameter cannot be an empty list.".to_string()]
            }
            Self::Schemas(_) => Vec::new(),
            Self::Tables {
                schema,
                tables,
                all,
            } => {
                let mut problems = Vec::new();
                if schema.is_empty() {
                    problems.push("The 'schema' parameter cannot be empty.".to_string());
                }
                if *all && !tables.is_empty() {
                    problems.push(
                        "When the 'all' parameter is set to true, the 'tables' parameter must be an empty list."
                            .to_string(),
                    );
                }
                if !*all && tables.is_empty() {
                    problems.push("The 'tables' parameter cannot be an empty list.".to_string());
                }
                problems
            }
        }
    }
}

fn default_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_bytes_per_chunk() -> u64 {
    DEFAULT_BYTES_PER_CHUNK
}

fn default_charset() -> String {
    "utf8mb4".to_string()
}

/// Options shared by `dump_instance`, `dump_schemas` and `dump_tables`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct DumpOptions {
    /// Worker sessions
    #[validate(range(min = 1, max = 4096))]
    pub threads: usize,
    /// Per-thread bytes per second; 0 disables the limit
    #[serde(deserialize_with = "de_size")]
    pub max_rate: u64,
    /// Split tables into chunks
    pub chunking: bool,
    #[serde(deserialize_with = "de_size")]
    pub bytes_per_chunk: u64,
    pub compression: Compression,
    pub dialect: DialectName,
    #[serde(flatten)]
    pub dialect_overrides: DialectOverrides,
    /// Check compatibility with MySQL HeatWave Service
    pub ocimds: bool,
    pub compatibility: Vec<String>,
    pub target_version: Option<String>,
    pub skip_upgrade_checks: bool,
    pub checksum: bool,
    /// Lock the instance while the snapshot is taken
    pub consistent: bool,
    pub skip_consistency_checks: bool,
    pub ddl_only: bool,
    pub data_only: bool,
    pub dry_run: bool,
    pub users: bool,
    pub events: bool,
    pub routines: bool,
    pub triggers: bool,
    pub libraries: bool,
    pub tz_utc: bool,
    pub default_character_set: String,
    pub show_progress: bool,
    #[serde(flatten)]
    pub filters: FilterOptions,
    /// Extra row condition per `schema.table`
    #[serde(rename = "where")]
    pub where_conditions: BTreeMap<String, String>,
    /// Partitions to dump per `schema.table`
    pub partitions: BTreeMap<String, Vec<String>>,
    pub session_init_sql: Vec<String>,
    #[serde(flatten)]
    pub storage: StorageOptions,
    #[serde(skip)]
    pub scope: DumpScope,
    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_rate: 0,
            chunking: default_true(),
            bytes_per_chunk: default_bytes_per_chunk(),
            compression: Compression::default(),
            dialect: DialectName::Default,
            dialect_overrides: DialectOverrides::default(),
            ocimds: false,
            compatibility: Vec::new(),
            target_version: None,
            skip_upgrade_checks: false,
            checksum: false,
            consistent: default_true(),
            skip_consistency_checks: false,
            ddl_only: false,
            data_only: false,
            dry_run: false,
            users: default_true(),
            events: default_true(),
            routines: default_true(),
            triggers: default_true(),
            libraries: default_true(),
            tz_utc: default_true(),
            default_character_set: default_charset(),
            show_progress: false,
            filters: FilterOptions::default(),
            where_conditions: BTreeMap::new(),
            partitions: BTreeMap::new(),
            session_init_sql: Vec::new(),
            storage: StorageOptions::default(),
            scope: DumpScope::Instance,
            unknown: BTreeMap::new(),
        }
    }
}

impl DumpOptions {
    pub fn with_scope(mut self, scope: DumpScope) -> Self {
        self.scope = scope;
        self
    }

    /// Parsed compatibility tokens; unknown tokens are reported by `validate`
    pub fn compat_tokens(&self) -> BTreeSet<CompatToken> {
        self.compatibility
            .iter()
            .filter_map(|t| t.parse().ok())
            .collect()
    }

    pub fn has_compat(&self, token: CompatToken) -> bool {
        self.compatibility
            .iter()
            .any(|t| t.parse::<CompatToken>().ok() == Some(token))
    }

    /// Whether user accounts are dumped
    pub fn dumps_users(&self) -> bool {
        self.users && matches!(self.scope, DumpScope::Instance) && !self.data_only
    }

    /// Whether the dialect differs from its preset
    pub fn dialect_customized(&self) -> bool {
        !self.dialect_overrides.is_empty()
    }

    pub fn target_version(&self) -> Option<Version> {
        self.target_version.as_deref().and_then(Version::parse)
    }

    /// Check every option, returning all problems at once
    pub fn validate_all(&self) -> Result<()> {
        let mut problems = match Validate::validate(self) {
            Ok(()) => Vec::new(),
            Err(e) => validator_messages(&e),
        };
        problems.extend(unknown_option_messages(&self.unknown));
        problems.extend(self.scope.problems());

        if self.bytes_per_chunk < MIN_BYTES_PER_CHUNK {
            problems.push(
                "The value of 'bytesPerChunk' option must be greater than or equal to 128k."
                    .to_string(),
            );
        }
        if self.ddl_only && self.data_only {
            problems.push("The 'ddlOnly' and 'dataOnly' options cannot be both set to true.".to_string());
        }
        for token in &self.compatibility {
            if token.parse::<CompatToken>().is_err() {
                problems.push(format!("Unknown compatibility option: {}", token));
            }
        }
        if self.has_compat(CompatToken::CreateInvisiblePks)
            && self.has_compat(CompatToken::IgnoreMissingPks)
        {
            problems.push(
                "The 'create_invisible_pks' and 'ignore_missing_pks' compatibility options cannot be used at the same time."
                    .to_string(),
            );
        }
        if self.has_compat(CompatToken::IgnoreWildcardGrants)
            && self.has_compat(CompatToken::UnescapeWildcardGrants)
        {
            problems.push(
                "The 'ignore_wildcard_grants' and 'unescape_wildcard_grants' compatibility options cannot be used at the same time."
                    .to_string(),
            );
        }
        if let Some(v) = &self.target_version {
            if Version::parse(v).is_none() {
                problems.push(format!("Invalid value for the 'targetVersion' option: '{}'", v));
            }
        }
        problems.extend(self.dialect_overrides.problems());

        for (key, condition) in &self.where_conditions {
            if let Some((schema, table)) = check_table_key("where", key, &mut problems) {
                if let Err(e) = check_condition(condition) {
                    problems.push(format!(
                        "Malformed condition used for table `{}`.`{}`: {}",
                        schema, table, e
                    ));
                }
            }
        }
        for (key, partitions) in &self.partitions {
            if check_table_key("partitions", key, &mut problems).is_some() && partitions.is_empty() {
                problems.push(format!(
                    "The table name key '{}' of the 'partitions' option must have a non-empty list of partitions.",
                    key
                ));
            }
        }
        problems.extend(self.filters.problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }
}

/// When secondary indexes are created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferIndexes {
    Off,
    #[default]
    Fulltext,
    All,
}

/// `ANALYZE TABLE` after the load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzeTables {
    #[default]
    Off,
    On,
    Histogram,
}

/// What happens to `gtid_purged` after the load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateGtidSet {
    #[default]
    Off,
    Replace,
    Append,
}

/// What happens when creating an account or applying a grant fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleGrantErrors {
    #[default]
    Abort,
    DropAccount,
    Ignore,
}

/// Options of `load_dump`
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct LoadOptions {
    #[validate(range(min = 1, max = 4096))]
    pub threads: usize,
    /// Ledger file; `""` disables resuming
    pub progress_file: Option<String>,
    pub reset_progress: bool,
    /// Seconds to wait for more of a dump that is still being written
    #[validate(range(min = 0.0))]
    pub wait_dump_timeout: f64,
    pub load_ddl: bool,
    pub load_data: bool,
    pub load_users: bool,
    pub load_indexes: bool,
    pub defer_table_indexes: DeferIndexes,
    pub analyze_tables: AnalyzeTables,
    pub show_metadata: bool,
    pub ignore_version: bool,
    pub skip_binlog: bool,
    pub checksum: bool,
    pub update_gtid_set: UpdateGtidSet,
    pub handle_grant_errors: HandleGrantErrors,
    pub drop_existing_objects: bool,
    pub ignore_existing_objects: bool,
    #[serde(deserialize_with = "de_opt_size")]
    pub max_bytes_per_transaction: Option<u64>,
    pub disable_bulk_load: bool,
    pub session_init_sql: Vec<String>,
    /// Add the invisible primary keys the dump asked for; defaults to the dump's choice
    pub create_invisible_pks: Option<bool>,
    pub character_set: Option<String>,
    pub show_progress: bool,
    pub dry_run: bool,
    #[serde(flatten)]
    pub filters: FilterOptions,
    #[serde(flatten)]
    pub storage: StorageOptions,
    #[serde(flatten, skip_serializing)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            progress_file: None,
            reset_progress: false,
            wait_dump_timeout: 0.0,
            load_ddl: true,
            load_data: true,
            load_users: false,
            load_indexes: true,
            defer_table_indexes: DeferIndexes::Fulltext,
            analyze_tables: AnalyzeTables::Off,
            show_metadata: false,
            ignore_version: false,
            skip_binlog: false,
            checksum: false,
            update_gtid_set: UpdateGtidSet::Off,
            handle_grant_errors: HandleGrantErrors::Abort,
            drop_existing_objects: false,
            ignore_existing_objects: false,
            max_bytes_per_transaction: None,
            disable_bulk_load: false,
            session_init_sql: Vec::new(),
            create_invisible_pks: None,
            character_set: None,
            show_progress: false,
            dry_run: false,
            filters: FilterOptions::default(),
            storage: StorageOptions::default(),
            unknown: BTreeMap::new(),
        }
    }
}

impl LoadOptions {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.wait_dump_timeout.max(0.0))
    }

    /// Check every option, returning all problems at once
    pub fn validate_all(&self) -> Result<()> {
        let mut problems = match Validate::validate(self) {
            Ok(()) => Vec::new(),
            Err(e) => validator_messages(&e),
        };
        problems.extend(unknown_option_messages(&self.unknown));
        if self.drop_existing_objects && self.ignore_existing_objects {
            problems.push(
                "The 'dropExistingObjects' and 'ignoreExistingObjects' options cannot be both set to true."
                    .to_string(),
            );
        }
        if let Some(max) = self.max_bytes_per_transaction {
            if max < MIN_BYTES_PER_TRANSACTION {
                problems.push(
                    "The value of 'maxBytesPerTransaction' option must be greater than or equal to 4096 bytes."
                        .to_string(),
                );
            }
        }
        if !self.load_indexes && self.defer_table_indexes == DeferIndexes::Off {
            problems.push(
                "'deferTableIndexes' cannot be set to 'off' if 'loadIndexes' is set to false."
                    .to_string(),
            );
        }
        if self.update_gtid_set != UpdateGtidSet::Off && self.skip_binlog {
            problems.push(
                "The 'updateGtidSet' option cannot be used together with 'skipBinlog'.".to_string(),
            );
        }
        problems.extend(self.filters.problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }
}

/// Options of `copy_instance`, `copy_schemas` and `copy_tables`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CopyOptions {
    pub dump: DumpOptions,
    pub load: LoadOptions,
    /// Seconds the loader waits for the next file; unset waits as long as the dump runs
    pub wait_dump_timeout: Option<f64>,
}

impl CopyOptions {
    pub fn validate_all(&self) -> Result<()> {
        let mut problems = Vec::new();
        for result in [self.dump.validate_all(), self.load.validate_all()] {
            match result {
                Ok(()) => {}
                Err(Error::Validation(p)) => problems.extend(p),
                Err(e) => return Err(e),
            }
        }
        if self.dump.dry_run != self.load.dry_run && (self.dump.dry_run || self.load.dry_run) {
            problems.push("The 'dryRun' option must be set for both the dump and the load.".to_string());
        }
        if self.wait_dump_timeout.is_some_and(|t| t < 0.0) {
            problems.push("The value of the 'waitDumpTimeout' option must not be negative.".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problems(result: Result<()>) -> Vec<String> {
        match result {
            Err(Error::Validation(p)) => p,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("128k").unwrap(), 128 * 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 << 20);
        assert_eq!(parse_size("2G").unwrap(), 2 << 30);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("10MB").unwrap(), 10 << 20);
        assert_eq!(parse_size("0").unwrap(), 0);
        assert!(parse_size("lots").is_err());
        assert!(parse_size("1.5M").is_err());
        assert_eq!(format_size(64 << 20), "64M");
        assert_eq!(format_size(1000), "1000");
    }

    #[test]
    fn test_defaults() {
        let options = DumpOptions::default();
        assert_eq!(options.threads, 4);
        assert_eq!(options.bytes_per_chunk, 64 << 20);
        assert!(options.tz_utc && options.consistent && options.chunking);
        assert!(options.validate_all().is_ok());
        assert!(LoadOptions::default().validate_all().is_ok());
    }

    #[test]
    fn test_yaml_with_env() {
        let yaml = "threads: ${THREADS:-2}\nbytesPerChunk: 1M\nmaxRate: 10k\ncompression: gzip;level=6\nincludeSchemas: [world]\nwhere:\n  world.city: \"id > ${MIN_ID}\"\n";
        let options: DumpOptions = parse_options(yaml, false, |name| {
            (name == "MIN_ID").then(|| "10".to_string())
        })
        .unwrap();
        assert_eq!(options.threads, 2);
        assert_eq!(options.bytes_per_chunk, 1 << 20);
        assert_eq!(options.max_rate, 10 * 1024);
        assert_eq!(options.compression, Compression::Gzip { level: 6 });
        assert_eq!(options.filters.include_schemas, vec!["world"]);
        assert_eq!(options.where_conditions["world.city"], "id > 10");
        assert!(options.validate_all().is_ok());
    }

    #[test]
    fn test_json_load_options() {
        let json = r#"{"threads": 8, "deferTableIndexes": "all", "handleGrantErrors": "drop_account", "maxBytesPerTransaction": "8k", "progressFile": ""}"#;
        let options: LoadOptions = parse_options(json, true, |_| None).unwrap();
        assert_eq!(options.threads, 8);
        assert_eq!(options.defer_table_indexes, DeferIndexes::All);
        assert_eq!(options.handle_grant_errors, HandleGrantErrors::DropAccount);
        assert_eq!(options.max_bytes_per_transaction, Some(8192));
        assert_eq!(options.progress_file.as_deref(), Some(""));
    }

    #[test]
    fn test_all_dump_problems_reported_together() {
        let mut options = DumpOptions {
            threads: 0,
            bytes_per_chunk: 1000,
            ddl_only: true,
            data_only: true,
            compatibility: vec![
                "create_invisible_pks".into(),
                "ignore_missing_pks".into(),
                "make_it_work".into(),
            ],
            ..Default::default()
        };
        options
            .where_conditions
            .insert("s.t".into(), "a > 1) OR (1".into());
        options.filters.include_tables.push("a.t".into());
        options.filters.exclude_tables.push("a.t".into());
        options.unknown.insert("bogus".into(), serde_json::Value::Bool(true));

        let p = problems(options.validate_all());
        let joined = p.join("\n");
        assert!(joined.contains("'threads'"));
        assert!(joined.contains("bytesPerChunk' option must be greater than or equal to 128k"));
        assert!(joined.contains("cannot be both set to true"));
        assert!(joined.contains("Unknown compatibility option: make_it_work"));
        assert!(joined.contains("cannot be used at the same time"));
        assert!(joined.contains("Malformed condition used for table `s`.`t`"));
        assert!(joined.contains("Both includeTables and excludeTables options contain a table `a`.`t`."));
        assert!(joined.contains("Invalid option: bogus"));
    }

    #[test]
    fn test_load_problems() {
        let options = LoadOptions {
            drop_existing_objects: true,
            ignore_existing_objects: true,
            max_bytes_per_transaction: Some(100),
            ..Default::default()
        };
        let p = problems(options.validate_all());
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn test_scope_problems() {
        let options = DumpOptions::default().with_scope(DumpScope::Schemas(vec![]));
        assert_eq!(
            problems(options.validate_all()),
            vec!["The 'schemas' parameter cannot be an empty list."]
        );
        let options = DumpOptions::default().with_scope(DumpScope::Tables {
            schema: "s".into(),
            tables: vec!["t".into()],
            all: true,
        });
        assert!(options.validate_all().is_err());
    }

    #[test]
    fn test_users_only_for_instance() {
        let options = DumpOptions::default();
        assert!(options.dumps_users());
        let options = options.with_scope(DumpScope::Schemas(vec!["s".into()]));
        assert!(!options.dumps_users());
    }
}
