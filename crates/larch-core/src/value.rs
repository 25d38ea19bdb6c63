//! SQL value representation.

use serde::Deserialize;
use serde::Serialize;

/// A typed SQL value preserving the engine's type affinity.
///
/// Used both for bound parameters travelling with EXEC/QUERY requests and
/// for result cells inside a `Rows` response batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer (INTEGER affinity).
    Integer(i64),
    /// 64-bit floating point (REAL affinity).
    Real(f64),
    /// UTF-8 text (TEXT affinity).
    Text(String),
    /// Raw bytes (BLOB affinity).
    Blob(Vec<u8>),
}

impl SqlValue {
    /// True for the NULL variant.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        SqlValue::Real(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        SqlValue::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_value_from_conversions() {
        assert_eq!(SqlValue::from(42_i64), SqlValue::Integer(42));
        assert_eq!(SqlValue::from(1.5_f64), SqlValue::Real(1.5));
        assert_eq!(SqlValue::from("hi"), SqlValue::Text("hi".to_string()));
        assert_eq!(SqlValue::from(vec![1_u8, 2]), SqlValue::Blob(vec![1, 2]));
    }

    #[test]
    fn test_sql_value_is_null() {
        assert!(SqlValue::Null.is_null());
        assert!(!SqlValue::Integer(0).is_null());
    }
}
