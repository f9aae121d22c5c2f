//! Chunk checksums
//!
//! Two checksums are kept per chunk:
//!
//! - a **row checksum** computed by the server over the chunk's rows. The dump
//!   computes it inside the snapshot transaction and the loader recomputes it
//!   on the target with the same query, so the two can be compared.
//! - a **content checksum** (CRC32) of the data file as written, checked by the
//!   loader before the file is applied.

use quarry_session::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::chunker::{Chunk, TablePlan};
use crate::error::{Error, Result};
use crate::ident::{quote_identifier, quote_qualified};

/// Name of the checksum file
pub const CHECKSUMS_FILE: &str = "@.checksums.json";

/// Statement computing the row count and row checksum of a chunk
///
/// Each row is hashed with `CRC32` over its columns plus a NULL mask, and the
/// hashes are combined with `BIT_XOR`, so the result does not depend on row
/// order.
pub fn checksum_sql(plan: &TablePlan, chunk: &Chunk, columns: &[String]) -> String {
    format!(
        "SELECT COUNT(*) AS `rows`, COALESCE(BIT_XOR({}), 0) AS `checksum` FROM {}{}",
        row_hash(columns),
        plan.from_clause(chunk),
        plan.where_clause(chunk)
    )
}

fn row_hash(columns: &[String]) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote_identifier(c)).collect();
    let nulls: Vec<String> = quoted.iter().map(|c| format!("ISNULL({})", c)).collect();
    if quoted.is_empty() {
        "0".to_string()
    } else {
        format!(
            "CAST(CRC32(CONCAT_WS('#', {}, CONCAT({}))) AS UNSIGNED)",
            quoted.join(", "),
            nulls.join(", ")
        )
    }
}

/// Statement recomputing a recorded checksum on a loaded table
///
/// The `where` condition of the dump is not applied again: only matching rows
/// were dumped.
pub fn verify_sql(record: &ChecksumRecord) -> String {
    let mut from = quote_qualified(&record.schema, &record.table);
    if let Some(p) = &record.partition {
        from.push_str(&format!(" PARTITION ({})", quote_identifier(p)));
    }
    let filter = record
        .range
        .as_ref()
        .map(|r| format!(" WHERE ({})", r))
        .unwrap_or_default();
    format!(
        "SELECT COUNT(*) AS `rows`, COALESCE(BIT_XOR({}), 0) AS `checksum` FROM {}{}",
        row_hash(&record.columns),
        from,
        filter
    )
}

/// Recompute `record` on the target, failing on a mismatch
pub async fn verify(session: &mut dyn Session, record: &ChecksumRecord) -> Result<()> {
    let object = quote_qualified(&record.schema, &record.table);
    let row = session
        .query_one(&verify_sql(record))
        .await
        .map_err(|e| Error::data(object.clone(), Some(record.chunk.to_string()), e))?
        .ok_or_else(|| Error::checksum(object.clone(), "checksum query returned no rows"))?;
    let actual = RowChecksum {
        rows: row.u64(0).unwrap_or_default(),
        checksum: row.u64(1).unwrap_or_default(),
    };
    if actual.rows != record.rows || actual.checksum != record.checksum {
        let chunk = match &record.partition {
            Some(p) => format!("partition {} chunk {}", quote_identifier(p), record.chunk),
            None => format!("chunk {}", record.chunk),
        };
        return Err(Error::checksum(
            object,
            format!(
                "Checksum mismatch for {}: the dump recorded {} rows with checksum {}, the target has {} rows with checksum {}",
                chunk, record.rows, record.checksum, actual.rows, actual.checksum
            ),
        ));
    }
    Ok(())
}

/// Row count and checksum of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowChecksum {
    pub rows: u64,
    pub checksum: u64,
}

/// Run the checksum statement of a chunk
pub async fn compute(
    session: &mut dyn Session,
    plan: &TablePlan,
    chunk: &Chunk,
    columns: &[String],
) -> Result<RowChecksum> {
    let sql = checksum_sql(plan, chunk, columns);
    let row = session
        .query_one(&sql)
        .await
        .map_err(|e| Error::data(plan.qualified.clone(), Some(chunk.label()), e))?;
    let row = row.ok_or_else(|| {
        Error::checksum(plan.qualified.clone(), "checksum query returned no rows")
    })?;
    Ok(RowChecksum {
        rows: row.u64(0).unwrap_or_default(),
        checksum: row.u64(1).unwrap_or_default(),
    })
}

/// Checksum of one chunk as stored in the dump
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumRecord {
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    pub chunk: i64,
    /// Key range predicate the checksum was computed over
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
    /// Row condition from the `where` option
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Columns in checksum order
    pub columns: Vec<String>,
    pub rows: u64,
    pub checksum: u64,
}

impl ChecksumRecord {
    pub fn key(&self) -> (String, String, Option<String>, i64) {
        (
            self.schema.clone(),
            self.table.clone(),
            self.partition.clone(),
            self.chunk,
        )
    }
}

/// Contents of `@.checksums.json`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumFile {
    /// `checksum_sql` formula version
    pub version: u32,
    pub chunks: Vec<ChecksumRecord>,
}

impl ChecksumFile {
    pub fn new(mut chunks: Vec<ChecksumRecord>) -> Self {
        chunks.sort_by_key(|c| c.key());
        Self { version: 1, chunks }
    }

    /// Records grouped by `(schema, table)`
    pub fn by_table(&self) -> BTreeMap<(String, String), Vec<&ChecksumRecord>> {
        let mut map: BTreeMap<(String, String), Vec<&ChecksumRecord>> = BTreeMap::new();
        for record in &self.chunks {
            map.entry((record.schema.clone(), record.table.clone()))
                .or_default()
                .push(record);
        }
        map
    }
}

/// Streaming CRC32 of file contents
#[derive(Default)]
pub struct ContentHasher {
    hasher: crc32fast::Hasher,
    bytes: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex of the CRC32
    pub fn finish(self) -> String {
        hex::encode(self.hasher.finalize().to_be_bytes())
    }
}

/// CRC32 of a whole buffer as lowercase hex
pub fn content_checksum(data: &[u8]) -> String {
    let mut hasher = ContentHasher::new();
    hasher.update(data);
    hasher.finish()
}
