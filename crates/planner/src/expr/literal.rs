use chrono::{NaiveDate, NaiveDateTime};

use crate::sql::quote_str;
use crate::types::EngineType;

/// Literal values accepted by [`crate::lit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    /// Interval in engine syntax, e.g. `"1 hour"` or `"3 days"`.
    Interval(String),
}

impl Literal {
    pub fn engine_type(&self) -> EngineType {
        match self {
            Literal::Null => EngineType::Unknown,
            Literal::Boolean(_) => EngineType::Boolean,
            Literal::Int32(_) => EngineType::Integer,
            Literal::Int64(_) => EngineType::BigInt,
            Literal::Float64(_) => EngineType::Double,
            Literal::Utf8(_) => EngineType::Varchar,
            Literal::Date(_) => EngineType::Date,
            Literal::Timestamp(_) => EngineType::Timestamp,
            Literal::Interval(_) => EngineType::Interval,
        }
    }

    pub fn to_sql(&self) -> String {
        match self {
            Literal::Null => "NULL".to_string(),
            Literal::Boolean(true) => "TRUE".to_string(),
            Literal::Boolean(false) => "FALSE".to_string(),
            Literal::Int32(v) => v.to_string(),
            Literal::Int64(v) => v.to_string(),
            Literal::Float64(v) if v.is_finite() => format!("{v:?}"),
            Literal::Float64(v) => format!("CAST('{v}' AS DOUBLE)"),
            Literal::Utf8(s) => quote_str(s),
            Literal::Date(d) => format!("DATE '{}'", d.format("%Y-%m-%d")),
            Literal::Timestamp(ts) => format!("TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.f")),
            Literal::Interval(s) => format!("INTERVAL {}", quote_str(s)),
        }
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Boolean(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int32(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int64(v)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float64(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Utf8(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Utf8(v)
    }
}

impl From<NaiveDate> for Literal {
    fn from(v: NaiveDate) -> Self {
        Literal::Date(v)
    }
}

impl From<NaiveDateTime> for Literal {
    fn from(v: NaiveDateTime) -> Self {
        Literal::Timestamp(v)
    }
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Literal::Null)
    }
}
