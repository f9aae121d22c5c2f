//! Column values and rows returned by a session
//!
//! Text-protocol results arrive as raw bytes, so most values are
//! [`Value::Bytes`]; the typed accessors parse them on demand.

use std::sync::Arc;

/// A single column value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bytes(Vec<u8>),
    Int(i64),
    UInt(u64),
    Float(f32),
    Double(f64),
}

impl Value {
    /// Whether the value is SQL NULL
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Raw bytes of a text value
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Borrow the value as UTF-8 text
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    /// Render the value as text
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
            Self::Int(n) => Some(n.to_string()),
            Self::UInt(n) => Some(n.to_string()),
            Self::Float(f) => Some(f.to_string()),
            Self::Double(d) => Some(d.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::UInt(n) => i64::try_from(*n).ok(),
            Self::Bytes(_) => self.as_str()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(n) => u64::try_from(*n).ok(),
            Self::UInt(n) => Some(*n),
            Self::Bytes(_) => self.as_str()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(n) => Some(*n as i128),
            Self::UInt(n) => Some(*n as i128),
            Self::Bytes(_) => self.as_str()?.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::UInt(n) => Some(*n as f64),
            Self::Float(f) => Some(*f as f64),
            Self::Double(d) => Some(*d),
            Self::Bytes(_) => self.as_str()?.trim().parse().ok(),
            Self::Null => None,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Bytes(value.into_bytes())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Self::Null)
    }
}

/// A result row
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.values.get(idx)
    }

    /// Value of a column by name (case-insensitive, as the server reports it)
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .and_then(|i| self.values.get(i))
    }

    /// Column as text, `None` for NULL or a missing column
    pub fn text(&self, idx: usize) -> Option<String> {
        self.get(idx).and_then(Value::to_text)
    }

    /// Column as text, empty for NULL
    pub fn text_or_empty(&self, idx: usize) -> String {
        self.text(idx).unwrap_or_default()
    }

    pub fn i64(&self, idx: usize) -> Option<i64> {
        self.get(idx).and_then(Value::as_i64)
    }

    pub fn u64(&self, idx: usize) -> Option<u64> {
        self.get(idx).and_then(Value::as_u64)
    }

    pub fn f64(&self, idx: usize) -> Option<f64> {
        self.get(idx).and_then(Value::as_f64)
    }

    /// Whether the column is SQL NULL
    pub fn is_null(&self, idx: usize) -> bool {
        self.get(idx).map(Value::is_null).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_values_parse() {
        let v = Value::from("-9223372036854775808");
        assert_eq!(v.as_i64(), Some(i64::MIN));
        assert_eq!(v.as_u64(), None);
        assert_eq!(Value::from("18446744073709551615").as_u64(), Some(u64::MAX));
        assert_eq!(Value::from(" 1.5").as_f64(), Some(1.5));
        assert_eq!(Value::Null.to_text(), None);
        assert_eq!(Value::from(Some(3i64)), Value::Int(3));
        assert_eq!(Value::from(None::<i64>), Value::Null);
    }

    #[test]
    fn test_row_access() {
        let columns: Arc<[String]> = vec!["TABLE_NAME".to_string(), "AVG_ROW_LENGTH".to_string()].into();
        let row = Row::new(columns, vec![Value::from("t"), Value::Null]);
        assert_eq!(row.text(0).as_deref(), Some("t"));
        assert!(row.is_null(1));
        assert_eq!(row.get_by_name("table_name"), Some(&Value::from("t")));
        assert!(row.is_null(5));
    }
}
