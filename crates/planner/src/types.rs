//! Engine type tags and the coercion table shared by every expression combinator.

use std::fmt;
use std::sync::Arc;

use arrow_schema::{DataType, Field, Fields, IntervalUnit, TimeUnit};

/// Column/expression type tag, mirroring the engine's SQL type system.
///
/// `Unknown` is an explicit variant: raw fragments and loosely built column references carry it,
/// and every combinator treats it as compatible with anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    HugeInt,
    UTinyInt,
    USmallInt,
    UInteger,
    UBigInt,
    Float,
    Double,
    Decimal { precision: u8, scale: u8 },
    Varchar,
    Blob,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Uuid,
    Json,
    List(Box<EngineType>),
    Struct(Vec<(String, EngineType)>),
    Map(Box<EngineType>, Box<EngineType>),
    Unknown,
}

/// Coarse classification used by the coercion table and the capability views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCategory {
    Numeric,
    String,
    Boolean,
    Temporal,
    Binary,
    Composite,
    Unknown,
}

impl EngineType {
    pub fn category(&self) -> TypeCategory {
        match self {
            EngineType::Boolean => TypeCategory::Boolean,
            EngineType::TinyInt
            | EngineType::SmallInt
            | EngineType::Integer
            | EngineType::BigInt
            | EngineType::HugeInt
            | EngineType::UTinyInt
            | EngineType::USmallInt
            | EngineType::UInteger
            | EngineType::UBigInt
            | EngineType::Float
            | EngineType::Double
            | EngineType::Decimal { .. } => TypeCategory::Numeric,
            EngineType::Varchar | EngineType::Uuid | EngineType::Json => TypeCategory::String,
            EngineType::Blob => TypeCategory::Binary,
            EngineType::Date
            | EngineType::Time
            | EngineType::Timestamp
            | EngineType::TimestampTz
            | EngineType::Interval => TypeCategory::Temporal,
            EngineType::List(_) | EngineType::Struct(_) | EngineType::Map(_, _) => {
                TypeCategory::Composite
            }
            EngineType::Unknown => TypeCategory::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EngineType::Unknown)
    }

    pub fn is_numeric(&self) -> bool {
        self.category() == TypeCategory::Numeric
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            EngineType::TinyInt
                | EngineType::SmallInt
                | EngineType::Integer
                | EngineType::BigInt
                | EngineType::HugeInt
                | EngineType::UTinyInt
                | EngineType::USmallInt
                | EngineType::UInteger
                | EngineType::UBigInt
        )
    }

    /// Parse an engine type string such as `INTEGER`, `DECIMAL(18,3)`, `VARCHAR[]`,
    /// `STRUCT(a INTEGER, b VARCHAR)` or `TIMESTAMP WITH TIME ZONE`.
    ///
    /// Tags outside the closed set map to [`EngineType::Unknown`].
    pub fn parse(s: &str) -> EngineType {
        let s = s.trim();
        if let Some(inner) = s.strip_suffix("[]") {
            return EngineType::List(Box::new(EngineType::parse(inner)));
        }
        let upper = s.to_ascii_uppercase();
        if let Some(args) = type_args(&upper, "DECIMAL").or_else(|| type_args(&upper, "NUMERIC")) {
            let parts = split_top_level(args);
            let precision = parts.first().and_then(|p| p.trim().parse().ok()).unwrap_or(18);
            let scale = parts.get(1).and_then(|p| p.trim().parse().ok()).unwrap_or(3);
            return EngineType::Decimal { precision, scale };
        }
        if let Some(args) = type_args(s, "STRUCT").or_else(|| type_args(s, "struct")) {
            let fields = split_top_level(args)
                .into_iter()
                .filter_map(|f| {
                    let f = f.trim();
                    let (name, ty) = f.split_once(char::is_whitespace)?;
                    Some((name.trim_matches('"').to_string(), EngineType::parse(ty)))
                })
                .collect();
            return EngineType::Struct(fields);
        }
        if let Some(args) = type_args(&upper, "MAP") {
            let parts = split_top_level(args);
            if parts.len() == 2 {
                return EngineType::Map(
                    Box::new(EngineType::parse(parts[0])),
                    Box::new(EngineType::parse(parts[1])),
                );
            }
            return EngineType::Unknown;
        }
        match upper.as_str() {
            "BOOLEAN" | "BOOL" | "LOGICAL" => EngineType::Boolean,
            "TINYINT" | "INT1" => EngineType::TinyInt,
            "SMALLINT" | "INT2" | "SHORT" => EngineType::SmallInt,
            "INTEGER" | "INT" | "INT4" | "SIGNED" => EngineType::Integer,
            "BIGINT" | "INT8" | "LONG" => EngineType::BigInt,
            "HUGEINT" | "INT128" => EngineType::HugeInt,
            "UTINYINT" => EngineType::UTinyInt,
            "USMALLINT" => EngineType::USmallInt,
            "UINTEGER" => EngineType::UInteger,
            "UBIGINT" => EngineType::UBigInt,
            "FLOAT" | "FLOAT4" | "REAL" => EngineType::Float,
            "DOUBLE" | "FLOAT8" => EngineType::Double,
            "DECIMAL" | "NUMERIC" => EngineType::Decimal {
                precision: 18,
                scale: 3,
            },
            "VARCHAR" | "TEXT" | "STRING" | "CHAR" | "BPCHAR" => EngineType::Varchar,
            "BLOB" | "BYTEA" | "BINARY" | "VARBINARY" => EngineType::Blob,
            "DATE" => EngineType::Date,
            "TIME" => EngineType::Time,
            "TIMESTAMP" | "DATETIME" => EngineType::Timestamp,
            "TIMESTAMPTZ" | "TIMESTAMP WITH TIME ZONE" => EngineType::TimestampTz,
            "INTERVAL" => EngineType::Interval,
            "UUID" => EngineType::Uuid,
            "JSON" => EngineType::Json,
            _ => EngineType::Unknown,
        }
    }

    /// Map an arrow type (as produced by file readers) onto the engine tag set.
    pub fn from_arrow(dt: &DataType) -> EngineType {
        match dt {
            DataType::Boolean => EngineType::Boolean,
            DataType::Int8 => EngineType::TinyInt,
            DataType::Int16 => EngineType::SmallInt,
            DataType::Int32 => EngineType::Integer,
            DataType::Int64 => EngineType::BigInt,
            DataType::UInt8 => EngineType::UTinyInt,
            DataType::UInt16 => EngineType::USmallInt,
            DataType::UInt32 => EngineType::UInteger,
            DataType::UInt64 => EngineType::UBigInt,
            DataType::Float16 | DataType::Float32 => EngineType::Float,
            DataType::Float64 => EngineType::Double,
            DataType::Decimal128(p, s) | DataType::Decimal256(p, s) => EngineType::Decimal {
                precision: *p,
                scale: (*s).max(0) as u8,
            },
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => EngineType::Varchar,
            DataType::Binary
            | DataType::LargeBinary
            | DataType::BinaryView
            | DataType::FixedSizeBinary(_) => EngineType::Blob,
            DataType::Date32 | DataType::Date64 => EngineType::Date,
            DataType::Time32(_) | DataType::Time64(_) => EngineType::Time,
            DataType::Timestamp(_, None) => EngineType::Timestamp,
            DataType::Timestamp(_, Some(_)) => EngineType::TimestampTz,
            DataType::Interval(_) | DataType::Duration(_) => EngineType::Interval,
            DataType::List(f) | DataType::LargeList(f) | DataType::FixedSizeList(f, _) => {
                EngineType::List(Box::new(EngineType::from_arrow(f.data_type())))
            }
            DataType::Struct(fields) => EngineType::Struct(
                fields
                    .iter()
                    .map(|f| (f.name().clone(), EngineType::from_arrow(f.data_type())))
                    .collect(),
            ),
            DataType::Map(entries, _) => match entries.data_type() {
                DataType::Struct(kv) if kv.len() == 2 => EngineType::Map(
                    Box::new(EngineType::from_arrow(kv[0].data_type())),
                    Box::new(EngineType::from_arrow(kv[1].data_type())),
                ),
                _ => EngineType::Unknown,
            },
            DataType::Dictionary(_, value) => EngineType::from_arrow(value),
            _ => EngineType::Unknown,
        }
    }

    /// Arrow type carried as the column's language-level annotation. `None` for `Unknown`.
    pub fn to_arrow(&self) -> Option<DataType> {
        Some(match self {
            EngineType::Boolean => DataType::Boolean,
            EngineType::TinyInt => DataType::Int8,
            EngineType::SmallInt => DataType::Int16,
            EngineType::Integer => DataType::Int32,
            EngineType::BigInt => DataType::Int64,
            EngineType::HugeInt => DataType::Decimal128(38, 0),
            EngineType::UTinyInt => DataType::UInt8,
            EngineType::USmallInt => DataType::UInt16,
            EngineType::UInteger => DataType::UInt32,
            EngineType::UBigInt => DataType::UInt64,
            EngineType::Float => DataType::Float32,
            EngineType::Double => DataType::Float64,
            EngineType::Decimal { precision, scale } => {
                DataType::Decimal128(*precision, *scale as i8)
            }
            EngineType::Varchar | EngineType::Uuid | EngineType::Json => DataType::Utf8,
            EngineType::Blob => DataType::Binary,
            EngineType::Date => DataType::Date32,
            EngineType::Time => DataType::Time64(TimeUnit::Microsecond),
            EngineType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
            EngineType::TimestampTz => {
                DataType::Timestamp(TimeUnit::Microsecond, Some(Arc::from("UTC")))
            }
            EngineType::Interval => DataType::Interval(IntervalUnit::MonthDayNano),
            EngineType::List(inner) => DataType::List(Arc::new(Field::new(
                "item",
                inner.to_arrow()?,
                true,
            ))),
            EngineType::Struct(fields) => {
                let mut out = Vec::with_capacity(fields.len());
                for (name, ty) in fields {
                    out.push(Field::new(name, ty.to_arrow()?, true));
                }
                DataType::Struct(Fields::from(out))
            }
            EngineType::Map(_, _) | EngineType::Unknown => return None,
        })
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineType::Boolean => f.write_str("BOOLEAN"),
            EngineType::TinyInt => f.write_str("TINYINT"),
            EngineType::SmallInt => f.write_str("SMALLINT"),
            EngineType::Integer => f.write_str("INTEGER"),
            EngineType::BigInt => f.write_str("BIGINT"),
            EngineType::HugeInt => f.write_str("HUGEINT"),
            EngineType::UTinyInt => f.write_str("UTINYINT"),
            EngineType::USmallInt => f.write_str("USMALLINT"),
            EngineType::UInteger => f.write_str("UINTEGER"),
            EngineType::UBigInt => f.write_str("UBIGINT"),
            EngineType::Float => f.write_str("FLOAT"),
            EngineType::Double => f.write_str("DOUBLE"),
            EngineType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            EngineType::Varchar => f.write_str("VARCHAR"),
            EngineType::Blob => f.write_str("BLOB"),
            EngineType::Date => f.write_str("DATE"),
            EngineType::Time => f.write_str("TIME"),
            EngineType::Timestamp => f.write_str("TIMESTAMP"),
            EngineType::TimestampTz => f.write_str("TIMESTAMP WITH TIME ZONE"),
            EngineType::Interval => f.write_str("INTERVAL"),
            EngineType::Uuid => f.write_str("UUID"),
            EngineType::Json => f.write_str("JSON"),
            EngineType::List(inner) => write!(f, "{inner}[]"),
            EngineType::Struct(fields) => {
                f.write_str("STRUCT(")?;
                for (i, (name, ty)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {ty}", crate::sql::quote_ident(name))?;
                }
                f.write_str(")")
            }
            EngineType::Map(k, v) => write!(f, "MAP({k}, {v})"),
            EngineType::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

fn type_args<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    let rest = s.strip_prefix(name)?.trim_start();
    rest.strip_prefix('(')?.strip_suffix(')')
}

fn split_top_level(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < s.len() {
        out.push(&s[start..]);
    }
    out
}

// -------------------------
// Coercion table
// -------------------------

fn numeric_rank(t: &EngineType) -> Option<u8> {
    Some(match t {
        EngineType::TinyInt | EngineType::UTinyInt => 1,
        EngineType::SmallInt | EngineType::USmallInt => 2,
        EngineType::Integer | EngineType::UInteger => 3,
        EngineType::BigInt | EngineType::UBigInt => 4,
        EngineType::HugeInt => 5,
        EngineType::Decimal { .. } => 6,
        EngineType::Float => 7,
        EngineType::Double => 8,
        _ => return None,
    })
}

/// Wider of two numeric types; `None` when either side is not numeric.
pub fn wider_numeric(a: &EngineType, b: &EngineType) -> Option<EngineType> {
    let ra = numeric_rank(a)?;
    let rb = numeric_rank(b)?;
    if let (
        EngineType::Decimal {
            precision: pa,
            scale: sa,
        },
        EngineType::Decimal {
            precision: pb,
            scale: sb,
        },
    ) = (a, b)
    {
        return Some(EngineType::Decimal {
            precision: (*pa).max(*pb),
            scale: (*sa).max(*sb),
        });
    }
    if ra >= rb {
        Some(a.clone())
    } else {
        Some(b.clone())
    }
}

/// Arithmetic operators understood by [`arithmetic_result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl ArithOp {
    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Plus => "+",
            ArithOp::Minus => "-",
            ArithOp::Multiply => "*",
            ArithOp::Divide => "/",
            ArithOp::Modulo => "%",
            ArithOp::Power => "**",
        }
    }
}

/// Result type of `left <op> right`, or `None` when the pair is explicitly incompatible.
///
/// An `Unknown` operand always yields `Some(Unknown)`.
pub fn arithmetic_result(op: ArithOp, left: &EngineType, right: &EngineType) -> Option<EngineType> {
    use TypeCategory as C;

    if left.is_unknown() || right.is_unknown() {
        return Some(EngineType::Unknown);
    }
    match (left.category(), right.category()) {
        (C::Numeric, C::Numeric) => match op {
            ArithOp::Divide | ArithOp::Power => Some(EngineType::Double),
            _ => wider_numeric(left, right),
        },
        (C::Temporal, C::Temporal) => match (op, left, right) {
            (ArithOp::Minus, EngineType::Date, EngineType::Date) => Some(EngineType::BigInt),
            (ArithOp::Minus, l, r) if l == r && *l != EngineType::Interval => {
                Some(EngineType::Interval)
            }
            (ArithOp::Plus | ArithOp::Minus, l, EngineType::Interval) => Some(l.clone()),
            (ArithOp::Plus, EngineType::Interval, r) => Some(r.clone()),
            _ => None,
        },
        (C::Temporal, C::Numeric) => match (op, left) {
            (ArithOp::Plus | ArithOp::Minus, EngineType::Date) if right.is_integer() => {
                Some(EngineType::Date)
            }
            (ArithOp::Multiply | ArithOp::Divide, EngineType::Interval) => {
                Some(EngineType::Interval)
            }
            _ => None,
        },
        (C::Numeric, C::Temporal) => match (op, right) {
            (ArithOp::Plus, EngineType::Date) if left.is_integer() => Some(EngineType::Date),
            (ArithOp::Multiply, EngineType::Interval) => Some(EngineType::Interval),
            _ => None,
        },
        _ => None,
    }
}

/// Whether `left` and `right` may be compared with `=`, `<`, etc.
///
/// Same-category pairs compare; strings compare with temporals (date literals written as text).
/// Among temporals, dates and timestamps compare with each other, while times and intervals
/// only compare with their own kind.
pub fn comparable(left: &EngineType, right: &EngineType) -> bool {
    use TypeCategory as C;

    match (left.category(), right.category()) {
        (C::Unknown, _) | (_, C::Unknown) => true,
        (C::String, C::Temporal) | (C::Temporal, C::String) => true,
        (C::Temporal, C::Temporal) => match (left, right) {
            (EngineType::Time, r) => *r == EngineType::Time,
            (EngineType::Interval, r) => *r == EngineType::Interval,
            (_, EngineType::Time | EngineType::Interval) => false,
            _ => true,
        },
        (l, r) => l == r,
    }
}

/// Common type for values that must share one result column (CASE branches, UNION inputs).
pub fn unify(left: &EngineType, right: &EngineType) -> Option<EngineType> {
    if left.is_unknown() {
        return Some(right.clone());
    }
    if right.is_unknown() || left == right {
        return Some(left.clone());
    }
    if left.is_numeric() && right.is_numeric() {
        return wider_numeric(left, right);
    }
    match (left, right) {
        (EngineType::Timestamp, EngineType::Date) | (EngineType::Date, EngineType::Timestamp) => {
            Some(EngineType::Timestamp)
        }
        (l, r) if l.category() == TypeCategory::String && r.category() == TypeCategory::String => {
            Some(EngineType::Varchar)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_engine_type_strings() {
        assert_eq!(EngineType::parse("integer"), EngineType::Integer);
        assert_eq!(EngineType::parse("BIGINT"), EngineType::BigInt);
        assert_eq!(
            EngineType::parse("DECIMAL(10, 2)"),
            EngineType::Decimal {
                precision: 10,
                scale: 2
            }
        );
        assert_eq!(
            EngineType::parse("VARCHAR[]"),
            EngineType::List(Box::new(EngineType::Varchar))
        );
        assert_eq!(
            EngineType::parse("STRUCT(a INTEGER, b DECIMAL(4,1))"),
            EngineType::Struct(vec![
                ("a".to_string(), EngineType::Integer),
                (
                    "b".to_string(),
                    EngineType::Decimal {
                        precision: 4,
                        scale: 1
                    }
                ),
            ])
        );
        assert_eq!(
            EngineType::parse("MAP(VARCHAR, INTEGER)"),
            EngineType::Map(Box::new(EngineType::Varchar), Box::new(EngineType::Integer))
        );
        assert_eq!(
            EngineType::parse("timestamp with time zone"),
            EngineType::TimestampTz
        );
        assert_eq!(EngineType::parse("GEOMETRY"), EngineType::Unknown);
    }

    #[test]
    fn display_round_trips_through_parse() {
        for t in [
            EngineType::Integer,
            EngineType::Decimal {
                precision: 12,
                scale: 4,
            },
            EngineType::List(Box::new(EngineType::Date)),
            EngineType::TimestampTz,
            EngineType::Map(Box::new(EngineType::Varchar), Box::new(EngineType::Double)),
        ] {
            assert_eq!(EngineType::parse(&t.to_string()), t);
        }
    }

    #[test]
    fn arrow_mapping_covers_reader_types() {
        assert_eq!(EngineType::from_arrow(&DataType::Int64), EngineType::BigInt);
        assert_eq!(EngineType::from_arrow(&DataType::Utf8), EngineType::Varchar);
        assert_eq!(
            EngineType::from_arrow(&DataType::Timestamp(TimeUnit::Second, None)),
            EngineType::Timestamp
        );
        assert_eq!(EngineType::from_arrow(&DataType::Null), EngineType::Unknown);
        assert_eq!(EngineType::Double.to_arrow(), Some(DataType::Float64));
        assert_eq!(EngineType::Unknown.to_arrow(), None);
    }

    #[test]
    fn arithmetic_table() {
        assert_eq!(
            arithmetic_result(ArithOp::Plus, &EngineType::Integer, &EngineType::BigInt),
            Some(EngineType::BigInt)
        );
        assert_eq!(
            arithmetic_result(ArithOp::Divide, &EngineType::Integer, &EngineType::Integer),
            Some(EngineType::Double)
        );
        assert_eq!(
            arithmetic_result(ArithOp::Minus, &EngineType::Timestamp, &EngineType::Timestamp),
            Some(EngineType::Interval)
        );
        assert_eq!(
            arithmetic_result(ArithOp::Plus, &EngineType::Date, &EngineType::Integer),
            Some(EngineType::Date)
        );
        assert_eq!(
            arithmetic_result(ArithOp::Plus, &EngineType::Varchar, &EngineType::Unknown),
            Some(EngineType::Unknown)
        );
        assert_eq!(
            arithmetic_result(ArithOp::Plus, &EngineType::Boolean, &EngineType::Date),
            None
        );
        assert_eq!(
            arithmetic_result(ArithOp::Multiply, &EngineType::Varchar, &EngineType::Integer),
            None
        );
    }

    #[test]
    fn comparison_table() {
        assert!(comparable(&EngineType::Integer, &EngineType::Double));
        assert!(comparable(&EngineType::Date, &EngineType::Varchar));
        assert!(comparable(&EngineType::Unknown, &EngineType::Boolean));
        assert!(!comparable(&EngineType::Boolean, &EngineType::Timestamp));
        assert!(!comparable(&EngineType::Integer, &EngineType::Varchar));
    }

    #[test]
    fn temporal_comparisons_respect_kind() {
        assert!(comparable(&EngineType::Date, &EngineType::Timestamp));
        assert!(comparable(&EngineType::TimestampTz, &EngineType::Timestamp));
        assert!(comparable(&EngineType::Interval, &EngineType::Interval));
        assert!(comparable(&EngineType::Time, &EngineType::Time));
        assert!(!comparable(&EngineType::Interval, &EngineType::Timestamp));
        assert!(!comparable(&EngineType::Date, &EngineType::Interval));
        assert!(!comparable(&EngineType::Time, &EngineType::Date));
        assert!(!comparable(&EngineType::Timestamp, &EngineType::Time));
    }
}
