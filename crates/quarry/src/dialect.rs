//! Data file dialects
//!
//! A dialect fixes how rows are written to data files: the field and line
//! terminators, the enclosing and escape characters, and how binary columns
//! are encoded. Every dialect is readable by `LOAD DATA`; the matching clause
//! is produced by [`Dialect::load_data_clause`].
//!
//! | Dialect        | Fields | Enclosed        | Escaped | Lines  | File |
//! |----------------|--------|-----------------|---------|--------|------|
//! | `default`      | `\t`   |                 | `\`     | `\n`   | tsv  |
//! | `csv`          | `,`    | `"` optionally  | `\`     | `\r\n` | csv  |
//! | `tsv`          | `\t`   | `"` optionally  | `\`     | `\r\n` | tsv  |
//! | `csv-unix`     | `,`    | `"`             | `\`     | `\n`   | csv  |
//! | `csv-rfc-unix` | `,`    | `"`             |         | `\n`   | csv  |

use bytes::{Bytes, BytesMut};
use quarry_session::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ident::quote_string;

/// Dialect preset name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DialectName {
    #[default]
    Default,
    Csv,
    Tsv,
    CsvUnix,
    CsvRfcUnix,
}

impl DialectName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::CsvUnix => "csv-unix",
            Self::CsvRfcUnix => "csv-rfc-unix",
        }
    }

    /// Data file extension, `txt` when the preset was overridden
    pub fn extension(&self, customized: bool) -> &'static str {
        if customized {
            return "txt";
        }
        match self {
            Self::Default | Self::Tsv => "tsv",
            Self::Csv | Self::CsvUnix | Self::CsvRfcUnix => "csv",
        }
    }
}

impl fmt::Display for DialectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(Self::Default),
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            "csv-unix" => Ok(Self::CsvUnix),
            "csv-rfc-unix" => Ok(Self::CsvRfcUnix),
            other => Err(format!(
                "The 'dialect' option must be one of default, csv, tsv, csv-unix, csv-rfc-unix, got '{}'",
                other
            )),
        }
    }
}

/// Encoding of binary column values in data files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryEncoding {
    Base64,
    Hex,
}

impl BinaryEncoding {
    /// Expression selecting an encoded column
    pub fn encode_expr(&self, column: &str) -> String {
        match self {
            Self::Base64 => format!("TO_BASE64({})", column),
            Self::Hex => format!("HEX({})", column),
        }
    }

    /// Function restoring the value on load
    pub fn decode_function(&self) -> &'static str {
        match self {
            Self::Base64 => "FROM_BASE64",
            Self::Hex => "UNHEX",
        }
    }

    /// Encoded length of `raw` bytes
    pub fn encoded_len(&self, raw: u64) -> u64 {
        match self {
            Self::Base64 => raw.div_ceil(3) * 4 + raw / 57,
            Self::Hex => raw * 2,
        }
    }
}

/// Explicit dialect settings overriding a preset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialectOverrides {
    pub fields_terminated_by: Option<String>,
    pub fields_enclosed_by: Option<String>,
    pub fields_optionally_enclosed: Option<bool>,
    pub fields_escaped_by: Option<String>,
    pub lines_terminated_by: Option<String>,
}

impl DialectOverrides {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Problems with the override values
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, value) in [
            ("fieldsEnclosedBy", &self.fields_enclosed_by),
            ("fieldsEscapedBy", &self.fields_escaped_by),
        ] {
            if let Some(v) = value {
                if v.len() > 1 {
                    problems.push(format!(
                        "The option '{}' must be empty or a single character",
                        name
                    ));
                }
            }
        }
        if self.lines_terminated_by.as_deref() == Some("") {
            problems.push("The option 'linesTerminatedBy' must not be empty".to_string());
        }
        problems
    }
}

/// Resolved dialect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialect {
    pub fields_terminated_by: String,
    pub fields_enclosed_by: String,
    pub fields_optionally_enclosed: bool,
    pub fields_escaped_by: String,
    pub lines_terminated_by: String,
    pub binary_encoding: BinaryEncoding,
}

impl Default for Dialect {
    fn default() -> Self {
        Self::preset(DialectName::Default)
    }
}

impl Dialect {
    pub fn preset(name: DialectName) -> Self {
        let (ft, enc, opt, esc, lt, bin) = match name {
            DialectName::Default => ("\t", "", false, "\\", "\n", BinaryEncoding::Base64),
            DialectName::Csv => (",", "\"", true, "\\", "\r\n", BinaryEncoding::Hex),
            DialectName::Tsv => ("\t", "\"", true, "\\", "\r\n", BinaryEncoding::Base64),
            DialectName::CsvUnix => (",", "\"", false, "\\", "\n", BinaryEncoding::Hex),
            DialectName::CsvRfcUnix => (",", "\"", false, "", "\n", BinaryEncoding::Hex),
        };
        Self {
            fields_terminated_by: ft.to_string(),
            fields_enclosed_by: enc.to_string(),
            fields_optionally_enclosed: opt,
            fields_escaped_by: esc.to_string(),
            lines_terminated_by: lt.to_string(),
            binary_encoding: bin,
        }
    }

    /// Preset with explicit settings applied
    pub fn resolve(name: DialectName, overrides: &DialectOverrides) -> Self {
        let mut d = Self::preset(name);
        if let Some(v) = &overrides.fields_terminated_by {
            d.fields_terminated_by = v.clone();
        }
        if let Some(v) = &overrides.fields_enclosed_by {
            d.fields_enclosed_by = v.clone();
        }
        if let Some(v) = overrides.fields_optionally_enclosed {
            d.fields_optionally_enclosed = v;
        }
        if let Some(v) = &overrides.fields_escaped_by {
            d.fields_escaped_by = v.clone();
        }
        if let Some(v) = &overrides.lines_terminated_by {
            d.lines_terminated_by = v.clone();
        }
        d
    }

    /// Text written for SQL NULL
    pub fn null_text(&self) -> &'static str {
        if self.fields_escaped_by.is_empty() {
            "NULL"
        } else {
            "\\N"
        }
    }

    /// `FIELDS ... LINES ...` clause of a `LOAD DATA` statement
    pub fn load_data_clause(&self) -> String {
        format!(
            "FIELDS TERMINATED BY {} {}ENCLOSED BY {} ESCAPED BY {} LINES TERMINATED BY {}",
            quote_string(&self.fields_terminated_by),
            if self.fields_optionally_enclosed {
                "OPTIONALLY "
            } else {
                ""
            },
            quote_string(&self.fields_enclosed_by),
            quote_string(&self.fields_escaped_by),
            quote_string(&self.lines_terminated_by),
        )
    }

    fn escape_byte(&self) -> Option<u8> {
        self.fields_escaped_by.bytes().next()
    }

    fn enclose_byte(&self) -> Option<u8> {
        self.fields_enclosed_by.bytes().next()
    }
}

/// Writes rows in a dialect
#[derive(Debug, Clone)]
pub struct RowFormatter {
    escape: Option<u8>,
    enclose: Option<u8>,
    optionally: bool,
    field_term: Vec<u8>,
    line_term: Vec<u8>,
    null: &'static [u8],
    /// Per column: whether the value is enclosed under `OPTIONALLY ENCLOSED`
    string_columns: Vec<bool>,
}

impl RowFormatter {
    pub fn new(dialect: &Dialect, string_columns: Vec<bool>) -> Self {
        Self {
            escape: dialect.escape_byte(),
            enclose: dialect.enclose_byte(),
            optionally: dialect.fields_optionally_enclosed,
            field_term: dialect.fields_terminated_by.as_bytes().to_vec(),
            line_term: dialect.lines_terminated_by.as_bytes().to_vec(),
            null: dialect.null_text().as_bytes(),
            string_columns,
        }
    }

    fn needs_escape(&self, b: u8) -> bool {
        b == 0
            || Some(b) == self.escape
            || Some(b) == self.enclose
            || (self.enclose.is_none()
                && (self.field_term.first() == Some(&b) || self.line_term.first() == Some(&b)))
    }

    fn write_field(&self, data: &[u8], enclosed: bool, out: &mut Vec<u8>) {
        if enclosed {
            if let Some(q) = self.enclose {
                out.push(q);
            }
        }
        match self.escape {
            Some(esc) => {
                for &b in data {
                    if self.needs_escape(b) {
                        out.push(esc);
                        out.push(if b == 0 { b'0' } else { b });
                    } else {
                        out.push(b);
                    }
                }
            }
            None => {
                for &b in data {
                    if enclosed && Some(b) == self.enclose {
                        out.push(b);
                    }
                    out.push(b);
                }
            }
        }
        if enclosed {
            if let Some(q) = self.enclose {
                out.push(q);
            }
        }
    }

    /// Append one row with its line terminator, returning the bytes written
    pub fn format_row(&self, values: &[Value], out: &mut Vec<u8>) -> usize {
        let start = out.len();
        for (idx, value) in values.iter().enumerate() {
            if idx > 0 {
                out.extend_from_slice(&self.field_term);
            }
            let is_string = self.string_columns.get(idx).copied().unwrap_or(true);
            let enclosed = self.enclose.is_some() && (!self.optionally || is_string);
            match value {
                Value::Null => out.extend_from_slice(self.null),
                Value::Bytes(b) => self.write_field(b, enclosed, out),
                other => {
                    let text = other.to_text().unwrap_or_default();
                    self.write_field(text.as_bytes(), enclosed, out);
                }
            }
        }
        out.extend_from_slice(&self.line_term);
        out.len() - start
    }
}

/// Piece of a row stream cut into groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Whole rows continuing the current group
    Rows(Bytes),
    /// The current group is complete
    Cut,
}

/// Groups rows arriving in arbitrary pieces into runs of at most `max_bytes`
///
/// Line terminators inside enclosed fields or preceded by the escape character
/// do not end a row. Bytes after the last complete row are held back until
/// the next piece or [`RowSplitter::finish`]. A row larger than `max_bytes`
/// forms a group of its own.
pub struct RowSplitter {
    escape: Option<u8>,
    enclose: Option<u8>,
    line_term: Vec<u8>,
    max_bytes: usize,
    pending: BytesMut,
    /// Offset into `pending` the scan resumes from
    scanned: usize,
    quoted: bool,
    group_bytes: usize,
}

impl RowSplitter {
    pub fn new(dialect: &Dialect, max_bytes: usize) -> Self {
        Self {
            escape: dialect.escape_byte(),
            enclose: dialect.enclose_byte(),
            line_term: dialect.lines_terminated_by.as_bytes().to_vec(),
            max_bytes,
            pending: BytesMut::new(),
            scanned: 0,
            quoted: false,
            group_bytes: 0,
        }
    }

    /// Take the next piece, releasing the rows it completes
    pub fn push(&mut self, data: &[u8]) -> Vec<Segment> {
        self.pending.extend_from_slice(data);
        let ends = self.scan();
        self.release(ends)
    }

    /// Release the held back bytes as a last row
    pub fn finish(&mut self) -> Vec<Segment> {
        let end = self.pending.len();
        if end == 0 {
            return Vec::new();
        }
        self.release(vec![end])
    }

    /// End offsets of the rows completed since the last scan
    fn scan(&mut self) -> Vec<usize> {
        let data = &self.pending;
        let term = self.line_term.as_slice();
        let mut ends = Vec::new();
        let mut i = self.scanned;
        while i < data.len() {
            let b = data[i];
            if Some(b) == self.escape {
                if i + 1 == data.len() {
                    break;
                }
                i += 2;
                continue;
            }
            if Some(b) == self.enclose {
                self.quoted = !self.quoted;
            } else if !self.quoted && !term.is_empty() {
                let rest = &data[i..];
                if rest.starts_with(term) {
                    i += term.len();
                    ends.push(i);
                    continue;
                }
                if rest.len() < term.len() && term.starts_with(rest) {
                    break;
                }
            }
            i += 1;
        }
        self.scanned = i;
        ends
    }

    fn release(&mut self, ends: Vec<usize>) -> Vec<Segment> {
        let Some(&last) = ends.last() else {
            return Vec::new();
        };
        let rows = self.pending.split_to(last).freeze();
        self.scanned = self.scanned.saturating_sub(last);
        let mut out = Vec::new();
        let mut from = 0;
        let mut prev = 0;
        for end in ends {
            let len = end - prev;
            if self.group_bytes > 0 && self.group_bytes + len > self.max_bytes {
                if prev > from {
                    out.push(Segment::Rows(rows.slice(from..prev)));
                }
                out.push(Segment::Cut);
                from = prev;
                self.group_bytes = 0;
            }
            self.group_bytes += len;
            prev = end;
        }
        if prev > from {
            out.push(Segment::Rows(rows.slice(from..prev)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: Vec<Value>, dialect: &Dialect, strings: Vec<bool>) -> String {
        let mut out = Vec::new();
        RowFormatter::new(dialect, strings).format_row(&values, &mut out);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_default_dialect_escapes() {
        let d = Dialect::default();
        let line = row(
            vec![Value::from(1i64), Value::from("a\tb\nc\\"), Value::Null],
            &d,
            vec![false, true, true],
        );
        assert_eq!(line, "1\ta\\\tb\\\nc\\\\\t\\N\n");
    }

    #[test]
    fn test_csv_optionally_enclosed() {
        let d = Dialect::preset(DialectName::Csv);
        let line = row(
            vec![Value::from(7i64), Value::from("say \"hi\", ok"), Value::Null],
            &d,
            vec![false, true, true],
        );
        assert_eq!(line, "7,\"say \\\"hi\\\", ok\",\\N\r\n");
    }

    #[test]
    fn test_rfc_doubles_quotes() {
        let d = Dialect::preset(DialectName::CsvRfcUnix);
        let line = row(
            vec![Value::from("a\"b"), Value::from(2i64), Value::Null],
            &d,
            vec![true, false, true],
        );
        assert_eq!(line, "\"a\"\"b\",\"2\",NULL\n");
    }

    #[test]
    fn test_nul_byte() {
        let d = Dialect::default();
        let line = row(vec![Value::Bytes(vec![b'a', 0, b'b'])], &d, vec![true]);
        assert_eq!(line, "a\\0b\n");
    }

    #[test]
    fn test_load_data_clause() {
        let clause = Dialect::preset(DialectName::Csv).load_data_clause();
        assert_eq!(
            clause,
            "FIELDS TERMINATED BY ',' OPTIONALLY ENCLOSED BY '\"' ESCAPED BY '\\\\' LINES TERMINATED BY '\\r\\n'"
        );
    }

    /// Rows of each group, in order
    fn groups(segments: Vec<Segment>) -> Vec<String> {
        let mut groups = vec![String::new()];
        for segment in segments {
            match segment {
                Segment::Rows(rows) => {
                    groups.last_mut().unwrap().push_str(std::str::from_utf8(&rows).unwrap())
                }
                Segment::Cut => groups.push(String::new()),
            }
        }
        groups
    }

    fn split_in_pieces(data: &[u8], dialect: &Dialect, max: usize, piece: usize) -> Vec<String> {
        let mut splitter = RowSplitter::new(dialect, max);
        let mut segments = Vec::new();
        for chunk in data.chunks(piece) {
            segments.extend(splitter.push(chunk));
        }
        segments.extend(splitter.finish());
        groups(segments)
    }

    #[test]
    fn test_rows_grouped_by_size() {
        let d = Dialect::default();
        let mut splitter = RowSplitter::new(&d, 8);
        let segments = splitter.push(b"aaaa\nbb\ncccccccc\nd\n");
        assert_eq!(
            segments,
            vec![
                Segment::Rows(Bytes::from("aaaa\nbb\n")),
                Segment::Cut,
                Segment::Rows(Bytes::from("cccccccc\n")),
                Segment::Cut,
                Segment::Rows(Bytes::from("d\n")),
            ]
        );
        assert!(splitter.finish().is_empty());
    }

    #[test]
    fn test_rows_cut_while_arriving() {
        let d = Dialect::default();
        let data = b"aaaa\nbb\ncccccccc\nd\n";
        for piece in [1, 3, 7] {
            assert_eq!(
                split_in_pieces(data, &d, 8, piece),
                vec!["aaaa\nbb\n", "cccccccc\n", "d\n"],
                "pieces of {} bytes",
                piece
            );
        }
    }

    #[test]
    fn test_escaped_terminator_across_pieces() {
        let d = Dialect::default();
        let data = b"1\ta\\\nb\n2\tc\n";
        assert_eq!(split_in_pieces(data, &d, 1, 4), vec!["1\ta\\\nb\n", "2\tc\n"]);
    }

    #[test]
    fn test_two_byte_terminator_across_pieces() {
        let d = Dialect::preset(DialectName::Csv);
        let data = b"1,2\r\n3,4\r\n";
        assert_eq!(split_in_pieces(data, &d, 5, 4), vec!["1,2\r\n", "3,4\r\n"]);
    }

    #[test]
    fn test_enclosed_terminator_and_unterminated_tail() {
        let csv = Dialect::preset(DialectName::CsvRfcUnix);
        let mut splitter = RowSplitter::new(&csv, 100);
        assert_eq!(
            splitter.push(b"\"x\ny\",1\n\"z\",2"),
            vec![Segment::Rows(Bytes::from("\"x\ny\",1\n"))]
        );
        assert_eq!(splitter.finish(), vec![Segment::Rows(Bytes::from("\"z\",2"))]);
    }

    #[test]
    fn test_extension_and_names() {
        assert_eq!(DialectName::Default.extension(false), "tsv");
        assert_eq!(DialectName::CsvUnix.extension(false), "csv");
        assert_eq!(DialectName::Csv.extension(true), "txt");
        assert_eq!("csv-rfc-unix".parse::<DialectName>().unwrap(), DialectName::CsvRfcUnix);
        assert!("xml".parse::<DialectName>().is_err());
    }
}
