//! Capability interfaces per type category.
//!
//! A [`TypedExpr`] converts into an [`ExprVariant`]; each concrete view implements only the
//! capabilities of its category. [`AnyExpr`] wraps `Unknown`-typed expressions and implements
//! all of them, matching the loose typing of raw fragments.

use trel_common::{Result, TrelError};

use super::{lit, ExprFlags, TypedExpr};
use crate::types::{EngineType, TypeCategory};

/// Access to the wrapped expression.
pub trait ExprView {
    fn expr(&self) -> &TypedExpr;

    fn into_expr(self) -> TypedExpr
    where
        Self: Sized;
}

fn same_or_unknown(e: &TypedExpr) -> EngineType {
    e.result_type().clone()
}

fn when_known(e: &TypedExpr, ty: EngineType) -> EngineType {
    if e.result_type().is_unknown() {
        EngineType::Unknown
    } else {
        ty
    }
}

pub trait NumericCapable: ExprView {
    fn abs(&self) -> TypedExpr {
        self.expr().scalar_call("abs", &[], same_or_unknown(self.expr()))
    }

    fn negate(&self) -> TypedExpr {
        let e = self.expr();
        TypedExpr::derived(
            format!("(- {})", e.sql()),
            same_or_unknown(e),
            e.dependencies().clone(),
            ExprFlags {
                windowable: false,
                ..e.flags()
            },
        )
    }

    fn round(&self, digits: i32) -> TypedExpr {
        self.expr()
            .scalar_call("round", &[lit(digits)], same_or_unknown(self.expr()))
    }

    fn floor(&self) -> TypedExpr {
        self.expr().scalar_call("floor", &[], same_or_unknown(self.expr()))
    }

    fn ceil(&self) -> TypedExpr {
        self.expr().scalar_call("ceil", &[], same_or_unknown(self.expr()))
    }

    fn sqrt(&self) -> TypedExpr {
        self.expr()
            .scalar_call("sqrt", &[], when_known(self.expr(), EngineType::Double))
    }

    /// `sum(self)`: integers widen to HUGEINT, decimals keep their scale at full precision.
    fn sum(&self) -> TypedExpr {
        let ty = match self.expr().result_type() {
            EngineType::Decimal { scale, .. } => EngineType::Decimal {
                precision: 38,
                scale: *scale,
            },
            t if t.is_integer() => EngineType::HugeInt,
            EngineType::Unknown => EngineType::Unknown,
            _ => EngineType::Double,
        };
        self.expr().aggregate_call("sum", ty)
    }

    fn avg(&self) -> TypedExpr {
        self.expr()
            .aggregate_call("avg", when_known(self.expr(), EngineType::Double))
    }

    fn stddev(&self) -> TypedExpr {
        self.expr()
            .aggregate_call("stddev_samp", when_known(self.expr(), EngineType::Double))
    }
}

pub trait StringCapable: ExprView {
    fn lower(&self) -> TypedExpr {
        self.expr().scalar_call("lower", &[], EngineType::Varchar)
    }

    fn upper(&self) -> TypedExpr {
        self.expr().scalar_call("upper", &[], EngineType::Varchar)
    }

    fn trim(&self) -> TypedExpr {
        self.expr().scalar_call("trim", &[], EngineType::Varchar)
    }

    fn length(&self) -> TypedExpr {
        self.expr().scalar_call("length", &[], EngineType::BigInt)
    }

    fn contains(&self, needle: &str) -> TypedExpr {
        self.expr()
            .scalar_call("contains", &[lit(needle)], EngineType::Boolean)
    }

    fn starts_with(&self, prefix: &str) -> TypedExpr {
        self.expr()
            .scalar_call("starts_with", &[lit(prefix)], EngineType::Boolean)
    }

    fn ends_with(&self, suffix: &str) -> TypedExpr {
        self.expr()
            .scalar_call("ends_with", &[lit(suffix)], EngineType::Boolean)
    }

    /// `self LIKE pattern`.
    fn like(&self, pattern: &str) -> TypedExpr {
        let e = self.expr();
        TypedExpr::derived(
            format!("({} LIKE {})", e.sql(), lit(pattern).sql()),
            EngineType::Boolean,
            e.dependencies().clone(),
            ExprFlags {
                windowable: false,
                ..e.flags()
            },
        )
    }

    /// 1-based `substring(self, start, length)`.
    fn substring(&self, start: i64, length: i64) -> TypedExpr {
        self.expr()
            .scalar_call("substring", &[lit(start), lit(length)], EngineType::Varchar)
    }

    fn string_agg(&self, separator: &str) -> TypedExpr {
        let mut e = self.expr().aggregate_call("string_agg", EngineType::Varchar);
        e.sql = format!("string_agg({}, {})", self.expr().sql(), lit(separator).sql());
        e
    }
}

pub trait BooleanCapable: ExprView {
    fn and(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.expr().and(rhs)
    }

    fn or(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.expr().or(rhs)
    }

    fn not(&self) -> Result<TypedExpr> {
        self.expr().not()
    }

    fn bool_and(&self) -> TypedExpr {
        self.expr().aggregate_call("bool_and", EngineType::Boolean)
    }

    fn bool_or(&self) -> TypedExpr {
        self.expr().aggregate_call("bool_or", EngineType::Boolean)
    }

    fn count_if(&self) -> TypedExpr {
        self.expr().aggregate_call("count_if", EngineType::BigInt)
    }
}

pub trait TemporalCapable: ExprView {
    /// `date_part('part', self)`, e.g. `year`, `month`, `dow`, `epoch`.
    fn date_part(&self, part: &str) -> TypedExpr {
        let e = self.expr();
        let mut out = e.scalar_call("date_part", &[], EngineType::BigInt);
        out.sql = format!("date_part({}, {})", lit(part).sql(), e.sql());
        out
    }

    fn year(&self) -> TypedExpr {
        self.date_part("year")
    }

    fn month(&self) -> TypedExpr {
        self.date_part("month")
    }

    fn day(&self) -> TypedExpr {
        self.date_part("day")
    }

    fn hour(&self) -> TypedExpr {
        self.date_part("hour")
    }

    /// `date_trunc('part', self)`; truncating a DATE keeps DATE, everything else is TIMESTAMP.
    fn date_trunc(&self, part: &str) -> TypedExpr {
        let e = self.expr();
        let ty = match e.result_type() {
            EngineType::Date => EngineType::Date,
            EngineType::TimestampTz => EngineType::TimestampTz,
            EngineType::Unknown => EngineType::Unknown,
            _ => EngineType::Timestamp,
        };
        let mut out = e.scalar_call("date_trunc", &[], ty);
        out.sql = format!("date_trunc({}, {})", lit(part).sql(), e.sql());
        out
    }

    fn strftime(&self, format: &str) -> TypedExpr {
        self.expr()
            .scalar_call("strftime", &[lit(format)], EngineType::Varchar)
    }
}

macro_rules! view {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(TypedExpr);

        impl ExprView for $name {
            fn expr(&self) -> &TypedExpr {
                &self.0
            }

            fn into_expr(self) -> TypedExpr {
                self.0
            }
        }
    };
}

view!(
    /// Numeric-typed expression.
    NumericExpr
);
view!(
    /// String-typed expression (VARCHAR, UUID, JSON).
    StringExpr
);
view!(
    /// Boolean-typed expression.
    BooleanExpr
);
view!(
    /// Date/time/interval-typed expression.
    TemporalExpr
);
view!(
    /// `Unknown`-typed expression; exposes every capability.
    AnyExpr
);

impl NumericCapable for NumericExpr {}
impl StringCapable for StringExpr {}
impl BooleanCapable for BooleanExpr {}
impl TemporalCapable for TemporalExpr {}
impl NumericCapable for AnyExpr {}
impl StringCapable for AnyExpr {}
impl BooleanCapable for AnyExpr {}
impl TemporalCapable for AnyExpr {}

/// Category-specific view of a [`TypedExpr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprVariant {
    Numeric(NumericExpr),
    String(StringExpr),
    Boolean(BooleanExpr),
    Temporal(TemporalExpr),
    Any(AnyExpr),
    /// Binary and composite expressions have no capability set beyond [`TypedExpr`] itself.
    Other(TypedExpr),
}

impl From<TypedExpr> for ExprVariant {
    fn from(e: TypedExpr) -> Self {
        match e.category() {
            TypeCategory::Numeric => ExprVariant::Numeric(NumericExpr(e)),
            TypeCategory::String => ExprVariant::String(StringExpr(e)),
            TypeCategory::Boolean => ExprVariant::Boolean(BooleanExpr(e)),
            TypeCategory::Temporal => ExprVariant::Temporal(TemporalExpr(e)),
            TypeCategory::Unknown => ExprVariant::Any(AnyExpr(e)),
            TypeCategory::Binary | TypeCategory::Composite => ExprVariant::Other(e),
        }
    }
}

fn view_mismatch(e: &TypedExpr, wanted: &str) -> TrelError {
    TrelError::type_mismatch(
        format!("{wanted} capability"),
        format!("{} ({})", e.sql(), e.result_type()),
        wanted,
    )
}

impl TypedExpr {
    /// Numeric view; `Unknown` expressions are accepted.
    pub fn as_numeric(&self) -> Result<NumericExpr> {
        match self.category() {
            TypeCategory::Numeric | TypeCategory::Unknown => Ok(NumericExpr(self.clone())),
            _ => Err(view_mismatch(self, "numeric")),
        }
    }

    /// String view; `Unknown` expressions are accepted.
    pub fn as_string(&self) -> Result<StringExpr> {
        match self.category() {
            TypeCategory::String | TypeCategory::Unknown => Ok(StringExpr(self.clone())),
            _ => Err(view_mismatch(self, "string")),
        }
    }

    /// Boolean view; `Unknown` expressions are accepted.
    pub fn as_boolean(&self) -> Result<BooleanExpr> {
        match self.category() {
            TypeCategory::Boolean | TypeCategory::Unknown => Ok(BooleanExpr(self.clone())),
            _ => Err(view_mismatch(self, "boolean")),
        }
    }

    /// Temporal view; `Unknown` expressions are accepted.
    pub fn as_temporal(&self) -> Result<TemporalExpr> {
        match self.category() {
            TypeCategory::Temporal | TypeCategory::Unknown => Ok(TemporalExpr(self.clone())),
            _ => Err(view_mismatch(self, "temporal")),
        }
    }
}
