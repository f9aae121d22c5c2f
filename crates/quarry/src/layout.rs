//! Dump layout: file names and metadata documents
//!
//! ```text
//! @.json                          manifest, written first
//! @.sql / @.post.sql              SQL run before and after the load
//! @.users.sql                     accounts and grants
//! <schema>.json / <schema>.sql    schema descriptor and DDL
//! <schema>.<table>.json           table descriptor
//! <schema>.<object>.sql           table or view DDL
//! <schema>.<view>.pre.sql         placeholder table for a view
//! <schema>.<table>.triggers.sql   triggers of a table
//! <schema>.<name>.<kind>.sql      routine, event or library DDL
//! <schema>.<table>@[<part>@][@]<n>.<ext>[.zst|.gz]   data chunk
//! @.checksums.json                row checksums
//! @.done.json                     completion marker with chunk records, last
//! ```
//!
//! Names are encoded with [`encode_name`], so `@` and `.` only ever appear as
//! separators.

use chrono::{DateTime, Utc};
use quarry_storage::Compression;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::RoutineKind;
use crate::chunker::Chunk;
use crate::dialect::{Dialect, DialectName};
use crate::error::{Error, Result};
use crate::ident::{decode_name, encode_name};
use crate::script::split_statements;
use crate::version::Version;

pub const MANIFEST_FILE: &str = "@.json";
pub const DONE_FILE: &str = "@.done.json";
pub const PRE_SQL_FILE: &str = "@.sql";
pub const POST_SQL_FILE: &str = "@.post.sql";
pub const USERS_FILE: &str = "@.users.sql";

/// Dump format version written to the manifest
pub const FORMAT_VERSION: &str = "2.0.1";

/// Schema objects are stored one per file
pub const CAPABILITY_MULTIFILE_SCHEMA_DDL: &str = "multifile_schema_ddl";

/// Capabilities a loader must understand to load dumps of this writer
pub const CAPABILITIES: &[&str] = &[CAPABILITY_MULTIFILE_SCHEMA_DDL];

const DATA_EXTENSIONS: [&str; 3] = ["tsv", "csv", "txt"];

pub fn object_base(schema: &str, name: &str) -> String {
    format!("{}.{}", encode_name(schema), encode_name(name))
}

pub fn schema_json(schema: &str) -> String {
    format!("{}.json", encode_name(schema))
}

pub fn schema_sql(schema: &str) -> String {
    format!("{}.sql", encode_name(schema))
}

pub fn table_json(schema: &str, table: &str) -> String {
    format!("{}.json", object_base(schema, table))
}

/// DDL of a table or a view
pub fn object_sql(schema: &str, name: &str) -> String {
    format!("{}.sql", object_base(schema, name))
}

pub fn view_pre_sql(schema: &str, view: &str) -> String {
    format!("{}.pre.sql", object_base(schema, view))
}

pub fn triggers_sql(schema: &str, table: &str) -> String {
    format!("{}.triggers.sql", object_base(schema, table))
}

pub fn routine_sql(schema: &str, name: &str, kind: RoutineKind) -> String {
    let suffix = match kind {
        RoutineKind::Procedure => "procedure",
        RoutineKind::Function => "function",
    };
    format!("{}.{}.sql", object_base(schema, name), suffix)
}

pub fn event_sql(schema: &str, name: &str) -> String {
    format!("{}.event.sql", object_base(schema, name))
}

pub fn library_sql(schema: &str, name: &str) -> String {
    format!("{}.library.sql", object_base(schema, name))
}

/// Name of the data file of one chunk
pub fn data_file(
    schema: &str,
    table: &str,
    chunk: &Chunk,
    extension: &str,
    compression: Compression,
) -> String {
    let mut name = object_base(schema, table);
    name.push('@');
    if let Some(partition) = &chunk.partition {
        name.push_str(&encode_name(partition));
        if chunk.id.is_some() {
            name.push('@');
        }
    }
    if let Some(id) = chunk.id {
        if chunk.last {
            name.push('@');
        }
        name.push_str(&id.to_string());
    }
    format!("{}.{}{}", name, extension, compression.extension_suffix())
}

/// Prefix shared by every data file of a table
pub fn data_file_prefix(schema: &str, table: &str) -> String {
    format!("{}@", object_base(schema, table))
}

/// Parts of a data file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub name: String,
    /// Encoded `<schema>.<table>`
    pub base: String,
    pub partition: Option<String>,
    pub chunk: Option<u64>,
    pub last: bool,
    pub compression: Compression,
}

impl DataFile {
    /// Parse a data file name of a table with or without partitions
    pub fn parse(name: &str, partitioned: bool) -> Option<Self> {
        let compression = Compression::from_file_name(name);
        let plain = &name[..name.len() - compression.extension_suffix().len()];
        let (stem, extension) = plain.rsplit_once('.')?;
        if !DATA_EXTENSIONS.contains(&extension) || stem.starts_with('@') {
            return None;
        }
        let (base, rest) = stem.split_once('@')?;
        let (partition, rest) = if partitioned {
            match rest.split_once('@') {
                Some((p, r)) => (Some(decode_name(p)?), Some(r)),
                None => (Some(decode_name(rest)?), None),
            }
        } else {
            (None, Some(rest))
        };
        let (chunk, last) = match rest {
            None | Some("") => (None, true),
            Some(r) => match r.strip_prefix('@') {
                Some(id) => (Some(id.parse().ok()?), true),
                None => (Some(r.parse().ok()?), false),
            },
        };
        if partition.as_deref() == Some("") {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            base: base.to_string(),
            partition,
            chunk,
            last,
            compression,
        })
    }

    /// Chunk number recorded in the dump, `-1` when not chunked
    pub fn chunk_id(&self) -> i64 {
        self.chunk.map_or(-1, |c| c as i64)
    }

    /// Same form as [`Chunk::label`]
    pub fn label(&self) -> String {
        let id = self
            .chunk
            .map_or_else(|| "@".to_string(), |id| id.to_string());
        match &self.partition {
            Some(p) => format!("{}/{}", p, id),
            None => id,
        }
    }
}

/// Whether `name` looks like a data file
pub fn is_data_file(name: &str) -> bool {
    let compression = Compression::from_file_name(name);
    let plain = &name[..name.len() - compression.extension_suffix().len()];
    match plain.rsplit_once('.') {
        Some((stem, ext)) => {
            DATA_EXTENSIONS.contains(&ext) && !stem.starts_with('@') && stem.contains('@')
        }
        None => false,
    }
}

/// Contents of `@.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub version: String,
    pub dumper: String,
    /// `dumpInstance`, `dumpSchemas` or `dumpTables`
    pub origin: String,
    pub schemas: Vec<String>,
    pub basenames: BTreeMap<String, String>,
    #[serde(default)]
    pub users: Vec<String>,
    pub default_character_set: String,
    pub tz_utc: bool,
    pub bytes_per_chunk: u64,
    pub hostname: String,
    pub server: String,
    pub server_version: String,
    #[serde(default)]
    pub server_uuid: String,
    #[serde(default)]
    pub gtid_executed: String,
    #[serde(default)]
    pub gtid_executed_inconsistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binlog_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binlog_position: Option<u64>,
    pub consistent: bool,
    pub compression: Compression,
    pub dialect: DialectName,
    pub mds_compatibility: bool,
    #[serde(default)]
    pub compatibility_options: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub checksum: bool,
    pub ddl_only: bool,
    pub data_only: bool,
    #[serde(default)]
    pub partial_revokes: bool,
    pub begin: DateTime<Utc>,
}

impl Manifest {
    pub fn server_version(&self) -> Option<Version> {
        Version::parse(&self.server_version)
    }
}

/// Contents of `<schema>.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub schema: String,
    pub include_ddl: bool,
    pub include_data: bool,
    pub tables: Vec<String>,
    pub views: Vec<String>,
    #[serde(default)]
    pub functions: Vec<String>,
    #[serde(default)]
    pub procedures: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
    /// Object name to encoded file base name
    pub basenames: BTreeMap<String, String>,
}

/// Contents of `<schema>.<table>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptor {
    pub schema: String,
    pub table: String,
    pub basename: String,
    /// Columns in data file order
    pub columns: Vec<String>,
    /// Column to decode function, for binary columns
    #[serde(default)]
    pub decode_columns: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_index: Option<Vec<String>>,
    pub has_unique_key: bool,
    #[serde(default)]
    pub partitions: Vec<String>,
    pub chunking: bool,
    pub include_data: bool,
    pub extension: String,
    pub compression: Compression,
    pub dialect: Dialect,
    #[serde(default)]
    pub triggers: Vec<String>,
    /// Columns with histograms
    #[serde(default)]
    pub histograms: Vec<String>,
    /// Statements run right after the table is created
    #[serde(default)]
    pub post_ddl: Vec<String>,
    #[serde(default)]
    pub row_count_estimate: u64,
    #[serde(default)]
    pub data_bytes_estimate: u64,
}

impl TableDescriptor {
    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }
}

/// One data file as recorded in `@.done.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRecord {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub chunk: i64,
    pub rows: u64,
    /// Stored size
    pub bytes: u64,
    /// Uncompressed size
    pub data_bytes: u64,
    /// CRC32 of the uncompressed contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_crc32: Option<String>,
}

/// Chunk records of one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChunks {
    pub schema: String,
    pub table: String,
    pub chunks: Vec<ChunkRecord>,
}

impl TableChunks {
    pub fn rows(&self) -> u64 {
        self.chunks.iter().map(|c| c.rows).sum()
    }

    pub fn data_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.data_bytes).sum()
    }
}

/// Contents of `@.done.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoneMarker {
    pub end: DateTime<Utc>,
    pub rows: u64,
    pub bytes: u64,
    pub data_bytes: u64,
    pub schemas: u64,
    pub tables: Vec<TableChunks>,
    #[serde(default)]
    pub warnings: u64,
}

impl DoneMarker {
    /// Record of a data file by name
    pub fn chunk(&self, file: &str) -> Option<&ChunkRecord> {
        self.tables
            .iter()
            .flat_map(|t| t.chunks.iter())
            .find(|c| c.file == file)
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<&TableChunks> {
        self.tables
            .iter()
            .find(|t| t.schema == schema && t.table == table)
    }
}

/// Header comment of a DDL file
pub fn file_header(server_version: &str, object: &str) -> String {
    format!(
        "-- quarry dump {}\n--\n-- Server version: {}\n-- Object: {}\n-- ------------------------------------------------------\n\n",
        FORMAT_VERSION, server_version, object
    )
}

/// Accounts as written to `@.users.sql`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBlock {
    /// `'user'@'host'`
    pub account: String,
    pub create: Vec<String>,
    pub grants: Vec<String>,
}

/// Render `@.users.sql`
///
/// Every account is written as two blocks so the loader can create all
/// accounts before any object exists and grant once the objects are loaded.
pub fn users_script(header: &str, users: &[UserBlock]) -> String {
    let mut out = header.to_string();
    for user in users {
        out.push_str(&format!("-- begin user {}\n", user.account));
        crate::script::write_statements(&mut out, &user.create);
        out.push_str(&format!("-- end user {}\n\n", user.account));
    }
    for user in users {
        if user.grants.is_empty() {
            continue;
        }
        out.push_str(&format!("-- begin grants {}\n", user.account));
        crate::script::write_statements(&mut out, &user.grants);
        out.push_str(&format!("-- end grants {}\n\n", user.account));
    }
    out
}

/// Parse `@.users.sql`
pub fn parse_users_script(text: &str) -> Result<Vec<UserBlock>> {
    enum Section {
        User,
        Grants,
    }
    let mut users: Vec<UserBlock> = Vec::new();
    let mut current: Option<(Section, String, String)> = None;
    for line in text.lines() {
        if let Some(account) = line.strip_prefix("-- begin user ") {
            current = Some((Section::User, account.trim().to_string(), String::new()));
        } else if let Some(account) = line.strip_prefix("-- begin grants ") {
            current = Some((Section::Grants, account.trim().to_string(), String::new()));
        } else if line.starts_with("-- end user ") || line.starts_with("-- end grants ") {
            let Some((section, account, body)) = current.take() else {
                return Err(Error::dump(format!(
                    "{}: unexpected '{}'",
                    USERS_FILE, line
                )));
            };
            let statements = split_statements(&body);
            let index = match users.iter().position(|u| u.account == account) {
                Some(i) => i,
                None => {
                    users.push(UserBlock {
                        account: account.clone(),
                        ..Default::default()
                    });
                    users.len() - 1
                }
            };
            match section {
                Section::User => users[index].create.extend(statements),
                Section::Grants => users[index].grants.extend(statements),
            }
        } else if let Some((_, _, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some((_, account, _)) = current {
        return Err(Error::dump(format!(
            "{}: block of {} is not terminated",
            USERS_FILE, account
        )));
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: Option<u64>, last: bool, partition: Option<&str>) -> Chunk {
        Chunk {
            id,
            last,
            partition: partition.map(String::from),
            range: None,
        }
    }

    #[test]
    fn test_data_file_names() {
        let zstd = Compression::Zstd { level: 1 };
        assert_eq!(
            data_file("world", "city", &chunk(None, true, None), "tsv", zstd),
            "world.city@.tsv.zst"
        );
        assert_eq!(
            data_file("world", "city", &chunk(Some(3), false, None), "tsv", Compression::None),
            "world.city@3.tsv"
        );
        assert_eq!(
            data_file("world", "city", &chunk(Some(4), true, None), "csv", Compression::None),
            "world.city@@4.csv"
        );
        assert_eq!(
            data_file("a.b", "t@1", &chunk(Some(0), true, Some("p 0")), "tsv", Compression::None),
            "a%2eb.t%401@p%200@@0.tsv"
        );
        assert_eq!(
            data_file("s", "t", &chunk(None, true, Some("p1")), "tsv", Compression::None),
            "s.t@p1.tsv"
        );
    }

    #[test]
    fn test_parse_data_file() {
        let f = DataFile::parse("world.city@@4.tsv.zst", false).unwrap();
        assert_eq!(f.base, "world.city");
        assert_eq!((f.chunk, f.last, f.partition.clone()), (Some(4), true, None));
        assert!(f.compression.is_enabled());

        let f = DataFile::parse("world.city@.tsv", false).unwrap();
        assert_eq!((f.chunk, f.last), (None, true));
        assert_eq!(f.chunk_id(), -1);

        let f = DataFile::parse("s.t@2020@7.csv", true).unwrap();
        assert_eq!(f.partition.as_deref(), Some("2020"));
        assert_eq!((f.chunk, f.last), (Some(7), false));
        assert_eq!(f.label(), "2020/7");

        let f = DataFile::parse("s.t@p%200.tsv", true).unwrap();
        assert_eq!(f.partition.as_deref(), Some("p 0"));
        assert_eq!(f.chunk, None);

        assert!(DataFile::parse("@.json", false).is_none());
        assert!(DataFile::parse("s.t.json", false).is_none());
        assert!(DataFile::parse("s.t@x.tsv", false).is_none());
    }

    #[test]
    fn test_is_data_file() {
        assert!(is_data_file("s.t@1.tsv.zst"));
        assert!(is_data_file("s.t@.csv"));
        assert!(!is_data_file("@.done.json"));
        assert!(!is_data_file("s.t.sql"));
        assert!(!is_data_file("@.sql"));
    }

    #[test]
    fn test_users_script_round_trip() {
        let users = vec![
            UserBlock {
                account: "'app'@'%'".into(),
                create: vec!["CREATE USER IF NOT EXISTS 'app'@'%' IDENTIFIED WITH 'caching_sha2_password' AS 'a;b'".into()],
                grants: vec![
                    "GRANT USAGE ON *.* TO `app`@`%`".into(),
                    "GRANT SELECT ON `world`.* TO `app`@`%`".into(),
                ],
            },
            UserBlock {
                account: "'role1'@'%'".into(),
                create: vec!["CREATE USER IF NOT EXISTS 'role1'@'%' ACCOUNT LOCK".into()],
                grants: vec![],
            },
        ];
        let text = users_script(&file_header("8.0.36", "users"), &users);
        assert!(text.contains("-- begin user 'app'@'%'\n"));
        assert!(text.find("-- end user 'role1'@'%'").unwrap() < text.find("-- begin grants 'app'@'%'").unwrap());
        assert_eq!(parse_users_script(&text).unwrap(), users);
    }

    #[test]
    fn test_users_script_unterminated() {
        let err = parse_users_script("-- begin user 'a'@'%'\nCREATE USER 'a'@'%';\n").unwrap_err();
        assert!(err.to_string().contains("not terminated"));
    }
}
