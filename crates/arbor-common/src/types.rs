//! Column values and per-column comparison for Arbor.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    BigInt(i64),
    Double(f64),
    Varchar(String),
    Binary(Bytes),
    /// Days since the Unix epoch.
    Date(i32),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
}

impl Value {
    /// Returns true if this is SQL NULL.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the name of the value's own kind.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Varchar(_) => "VARCHAR",
            Value::Binary(_) => "BINARY",
            Value::Date(_) => "DATE",
            Value::Timestamp(_) => "TIMESTAMP",
        }
    }

    /// Rank used to order values of unrelated kinds.
    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::BigInt(_) | Value::Double(_) => 2,
            Value::Varchar(_) => 3,
            Value::Binary(_) => 4,
            Value::Date(_) => 5,
            Value::Timestamp(_) => 6,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Varchar(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Varchar(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Type of an indexed column. Each variant knows how to order its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    BigInt,
    Double,
    Varchar,
    Binary,
    Date,
    Timestamp,
}

impl ColumnType {
    /// Three-way comparison of two values of this column type.
    ///
    /// NULL sorts before every non-null value and equals NULL. Values whose
    /// kind does not belong to this type fall back to a fixed kind rank.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a, b) {
            (Value::Null, Value::Null) => return Ordering::Equal,
            (Value::Null, _) => return Ordering::Less,
            (_, Value::Null) => return Ordering::Greater,
            _ => {}
        }

        let ordered = match self {
            ColumnType::Boolean => match (a, b) {
                (Value::Boolean(x), Value::Boolean(y)) => Some(x.cmp(y)),
                _ => None,
            },
            ColumnType::BigInt => match (a, b) {
                (Value::BigInt(x), Value::BigInt(y)) => Some(x.cmp(y)),
                _ => None,
            },
            ColumnType::Double => match (a, b) {
                (Value::Double(x), Value::Double(y)) => Some(x.total_cmp(y)),
                (Value::BigInt(x), Value::BigInt(y)) => Some(x.cmp(y)),
                (Value::BigInt(x), Value::Double(y)) => Some(cmp_int_double(*x, *y)),
                (Value::Double(x), Value::BigInt(y)) => Some(cmp_int_double(*y, *x).reverse()),
                _ => None,
            },
            ColumnType::Varchar => match (a, b) {
                (Value::Varchar(x), Value::Varchar(y)) => Some(x.cmp(y)),
                _ => None,
            },
            ColumnType::Binary => match (a, b) {
                (Value::Binary(x), Value::Binary(y)) => Some(x.cmp(y)),
                _ => None,
            },
            ColumnType::Date => match (a, b) {
                (Value::Date(x), Value::Date(y)) => Some(x.cmp(y)),
                _ => None,
            },
            ColumnType::Timestamp => match (a, b) {
                (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
                _ => None,
            },
        };

        ordered.unwrap_or_else(|| a.kind_rank().cmp(&b.kind_rank()))
    }

    /// Returns true if the value can be stored in a column of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Boolean, Value::Boolean(_))
                | (ColumnType::BigInt, Value::BigInt(_))
                | (ColumnType::Double, Value::Double(_) | Value::BigInt(_))
                | (ColumnType::Varchar, Value::Varchar(_))
                | (ColumnType::Binary, Value::Binary(_))
                | (ColumnType::Date, Value::Date(_))
                | (ColumnType::Timestamp, Value::Timestamp(_))
        )
    }

    /// Returns true if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::BigInt | ColumnType::Double)
    }

    /// Returns true if this type is temporal.
    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }
}

/// Exact comparison of an integer with a double. The cast rounds above
/// 2^53, so a tie after casting is settled on the integral values.
fn cmp_int_double(i: i64, d: f64) -> Ordering {
    match (i as f64).total_cmp(&d) {
        Ordering::Equal => (i as i128).cmp(&(d as i128)),
        other => other,
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE",
            ColumnType::Varchar => "VARCHAR",
            ColumnType::Binary => "BINARY",
            ColumnType::Date => "DATE",
            ColumnType::Timestamp => "TIMESTAMP",
        };
        write!(f, "{}", name)
    }
}
