//! Typed expressions: a rendered SQL fragment, its resolved type and the columns it reads.
//!
//! Every constructor and combinator returns a new [`TypedExpr`]; expressions are never mutated.
//! Binary combinators merge the dependency sets of their operands and derive a result type
//! from the coercion table in [`crate::types`]. An `Unknown` operand never fails; two
//! explicitly typed, incompatible operands fail with `TypeMismatch`.

mod capabilities;
mod literal;
mod window;

use std::collections::BTreeSet;
use std::fmt;

use trel_common::{Result, TrelError};

use crate::schema::SchemaCache;
use crate::sql::quote_ident;
use crate::types::{arithmetic_result, comparable, unify, ArithOp, EngineType, TypeCategory};

pub use capabilities::{
    AnyExpr, BooleanCapable, BooleanExpr, ExprVariant, ExprView, NumericCapable, NumericExpr,
    StringCapable, StringExpr, TemporalCapable, TemporalExpr,
};
pub use literal::Literal;
pub use window::{dense_rank, lag, lead, rank, row_number, FrameBound, FrameUnits, Window, WindowFrame};

/// Structural facts about an expression that the algebra needs without re-parsing SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub(crate) struct ExprFlags {
    /// Contains an aggregate call not wrapped by `OVER`.
    pub aggregate: bool,
    /// Contains a windowed (`OVER`) call.
    pub window: bool,
    /// Contains a window-only function still waiting for its `OVER` clause.
    pub pending_window: bool,
    /// The top level is a function call that `OVER` may be applied to.
    pub windowable: bool,
}

impl ExprFlags {
    fn merge(self, other: ExprFlags) -> ExprFlags {
        ExprFlags {
            aggregate: self.aggregate || other.aggregate,
            window: self.window || other.window,
            pending_window: self.pending_window || other.pending_window,
            windowable: false,
        }
    }
}

/// Binary operators over typed expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Power,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Power => "**",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
        }
    }

    fn arith(self) -> Option<ArithOp> {
        Some(match self {
            BinaryOp::Plus => ArithOp::Plus,
            BinaryOp::Minus => ArithOp::Minus,
            BinaryOp::Multiply => ArithOp::Multiply,
            BinaryOp::Divide => ArithOp::Divide,
            BinaryOp::Modulo => ArithOp::Modulo,
            BinaryOp::Power => ArithOp::Power,
            _ => return None,
        })
    }
}

/// A composable, SQL-renderable computation with a known result type and column dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypedExpr {
    sql: String,
    ty: EngineType,
    deps: BTreeSet<String>,
    alias: Option<String>,
    column: Option<String>,
    flags: ExprFlags,
}

/// Reference a column by name. The type stays `Unknown` until resolved against a schema;
/// use [`crate::Relation::col`] for a reference typed at construction.
pub fn col(name: impl Into<String>) -> TypedExpr {
    TypedExpr::column(name, EngineType::Unknown)
}

/// Literal value expression.
pub fn lit(value: impl Into<Literal>) -> TypedExpr {
    let value = value.into();
    TypedExpr::derived(value.to_sql(), value.engine_type(), BTreeSet::new(), ExprFlags::default())
}

/// Raw SQL escape hatch. Declared dependencies are trusted as-is; the type is `Unknown`.
pub fn raw<I, S>(sql: impl Into<String>, dependencies: I) -> TypedExpr
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    raw_typed(sql, dependencies, EngineType::Unknown)
}

/// Raw SQL with an explicitly declared result type.
pub fn raw_typed<I, S>(sql: impl Into<String>, dependencies: I, ty: EngineType) -> TypedExpr
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    TypedExpr::derived(
        sql.into(),
        ty,
        dependencies.into_iter().map(Into::into).collect(),
        ExprFlags::default(),
    )
}

/// `count(*)`.
pub fn count_star() -> TypedExpr {
    TypedExpr::derived(
        "count(*)".to_string(),
        EngineType::BigInt,
        BTreeSet::new(),
        ExprFlags {
            aggregate: true,
            windowable: true,
            ..ExprFlags::default()
        },
    )
}

/// `coalesce(a, b, ...)`; argument types must unify.
pub fn coalesce(args: &[TypedExpr]) -> Result<TypedExpr> {
    if args.is_empty() {
        return Err(TrelError::Planning(
            "coalesce requires at least one argument".to_string(),
        ));
    }
    let mut ty = EngineType::Unknown;
    for a in args {
        ty = unify(&ty, &a.ty)
            .ok_or_else(|| TrelError::type_mismatch("coalesce", &ty, &a.ty))?;
    }
    Ok(TypedExpr::call("coalesce", args, ty, ExprFlags::default()))
}

/// Start a `CASE WHEN` expression.
pub fn when(condition: TypedExpr, then: TypedExpr) -> CaseBuilder {
    CaseBuilder {
        branches: vec![(condition, then)],
    }
}

/// Accumulates `WHEN ... THEN ...` branches; finish with [`CaseBuilder::otherwise`] or
/// [`CaseBuilder::end`].
#[derive(Debug, Clone)]
pub struct CaseBuilder {
    branches: Vec<(TypedExpr, TypedExpr)>,
}

impl CaseBuilder {
    pub fn when(mut self, condition: TypedExpr, then: TypedExpr) -> Self {
        self.branches.push((condition, then));
        self
    }

    pub fn otherwise(self, value: TypedExpr) -> Result<TypedExpr> {
        self.build(Some(value))
    }

    pub fn end(self) -> Result<TypedExpr> {
        self.build(None)
    }

    fn build(self, otherwise: Option<TypedExpr>) -> Result<TypedExpr> {
        let mut ty = EngineType::Unknown;
        let mut deps = BTreeSet::new();
        let mut flags = ExprFlags::default();
        let mut sql = String::from("CASE");
        for (cond, then) in &self.branches {
            cond.require_boolean("CASE WHEN")?;
            ty = unify(&ty, &then.ty)
                .ok_or_else(|| TrelError::type_mismatch("CASE", &ty, &then.ty))?;
            sql.push_str(&format!(" WHEN {} THEN {}", cond.sql, then.sql));
            for e in [cond, then] {
                deps.extend(e.deps.iter().cloned());
                flags = flags.merge(e.flags);
            }
        }
        if let Some(e) = &otherwise {
            ty = unify(&ty, &e.ty).ok_or_else(|| TrelError::type_mismatch("CASE", &ty, &e.ty))?;
            sql.push_str(&format!(" ELSE {}", e.sql));
            deps.extend(e.deps.iter().cloned());
            flags = flags.merge(e.flags);
        }
        sql.push_str(" END");
        Ok(TypedExpr::derived(sql, ty, deps, flags))
    }
}

impl TypedExpr {
    /// Column reference with a known type.
    pub fn column(name: impl Into<String>, ty: EngineType) -> Self {
        let name = name.into();
        Self {
            sql: quote_ident(&name),
            ty,
            deps: BTreeSet::from([name.clone()]),
            alias: None,
            column: Some(name),
            flags: ExprFlags::default(),
        }
    }

    pub(crate) fn derived(
        sql: String,
        ty: EngineType,
        deps: BTreeSet<String>,
        flags: ExprFlags,
    ) -> Self {
        Self {
            sql,
            ty,
            deps,
            alias: None,
            column: None,
            flags,
        }
    }

    /// `name(arg, ...)` with merged dependencies.
    pub(crate) fn call(name: &str, args: &[TypedExpr], ty: EngineType, flags: ExprFlags) -> Self {
        let mut deps = BTreeSet::new();
        let mut merged = ExprFlags::default();
        for a in args {
            deps.extend(a.deps.iter().cloned());
            merged = merged.merge(a.flags);
        }
        let rendered = args.iter().map(|a| a.sql.as_str()).collect::<Vec<_>>().join(", ");
        Self::derived(
            format!("{name}({rendered})"),
            ty,
            deps,
            ExprFlags {
                aggregate: merged.aggregate || flags.aggregate,
                window: merged.window || flags.window,
                pending_window: merged.pending_window || flags.pending_window,
                windowable: flags.windowable,
            },
        )
    }

    /// Aggregate call over this expression.
    pub(crate) fn aggregate_call(&self, name: &str, ty: EngineType) -> Self {
        if self.flags.aggregate {
            // Nested aggregates are rejected by the engine; keep the shape and let it report.
            tracing::debug!(function = name, inner = %self.sql, "nested aggregate call");
        }
        Self::call(
            name,
            std::slice::from_ref(self),
            ty,
            ExprFlags {
                aggregate: true,
                windowable: true,
                ..ExprFlags::default()
            },
        )
    }

    /// Scalar function call over this expression plus extra arguments.
    pub(crate) fn scalar_call(&self, name: &str, extra: &[TypedExpr], ty: EngineType) -> Self {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(self.clone());
        args.extend(extra.iter().cloned());
        Self::call(name, &args, ty, ExprFlags::default())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn result_type(&self) -> &EngineType {
        &self.ty
    }

    pub fn category(&self) -> TypeCategory {
        self.ty.category()
    }

    /// Columns this expression reads.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.deps
    }

    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Name of the referenced column when this is a bare column reference.
    pub fn column_name(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn is_aggregate(&self) -> bool {
        self.flags.aggregate
    }

    pub fn is_window(&self) -> bool {
        self.flags.window
    }

    pub(crate) fn needs_over(&self) -> bool {
        self.flags.pending_window
    }

    pub(crate) fn flags(&self) -> ExprFlags {
        self.flags
    }

    /// Output column name: alias, else the bare column name, else the rendered SQL.
    pub fn output_name(&self) -> String {
        self.alias
            .clone()
            .or_else(|| self.column.clone())
            .unwrap_or_else(|| self.sql.clone())
    }

    /// Same expression under an output alias. Dependencies and type are unchanged.
    pub fn alias(&self, name: impl Into<String>) -> Self {
        Self {
            alias: Some(name.into()),
            ..self.clone()
        }
    }

    /// Fill in the type of a bare column reference from `schema`. Other expressions are
    /// returned unchanged.
    pub fn resolve(&self, schema: &SchemaCache) -> Self {
        match (&self.column, schema.get(self.column.as_deref().unwrap_or_default())) {
            (Some(_), Some(def)) if self.ty.is_unknown() => Self {
                ty: def.engine_type().clone(),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    fn require_boolean(&self, operation: &str) -> Result<()> {
        match self.ty.category() {
            TypeCategory::Boolean | TypeCategory::Unknown => Ok(()),
            _ => Err(TrelError::type_mismatch(
                operation,
                format!("{} ({})", self.sql, self.ty),
                EngineType::Boolean,
            )),
        }
    }

    // -------------------------
    // Binary combinators
    // -------------------------

    /// `self <op> rhs`, merging dependencies and deriving the result type.
    pub fn binary(&self, op: BinaryOp, rhs: &TypedExpr) -> Result<TypedExpr> {
        let operation = format!("operator {}", op.symbol());
        let mismatch = || {
            TrelError::type_mismatch(
                &operation,
                format!("{} ({})", self.sql, self.ty),
                format!("{} ({})", rhs.sql, rhs.ty),
            )
        };
        let ty = match op {
            BinaryOp::Plus
            | BinaryOp::Minus
            | BinaryOp::Multiply
            | BinaryOp::Divide
            | BinaryOp::Modulo
            | BinaryOp::Power => {
                let arith = op.arith().ok_or_else(mismatch)?;
                arithmetic_result(arith, &self.ty, &rhs.ty).ok_or_else(mismatch)?
            }
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Lt
            | BinaryOp::LtEq
            | BinaryOp::Gt
            | BinaryOp::GtEq => {
                if !comparable(&self.ty, &rhs.ty) {
                    return Err(mismatch());
                }
                EngineType::Boolean
            }
            BinaryOp::And | BinaryOp::Or => {
                self.require_boolean(&operation)?;
                rhs.require_boolean(&operation)?;
                EngineType::Boolean
            }
            BinaryOp::Concat => match (self.ty.category(), rhs.ty.category()) {
                (TypeCategory::Unknown, _) | (_, TypeCategory::Unknown) => EngineType::Varchar,
                (TypeCategory::String, TypeCategory::String) => EngineType::Varchar,
                (TypeCategory::Composite, TypeCategory::Composite) => self.ty.clone(),
                _ => return Err(mismatch()),
            },
        };
        let mut deps = self.deps.clone();
        deps.extend(rhs.deps.iter().cloned());
        Ok(Self::derived(
            format!("({} {} {})", self.sql, op.symbol(), rhs.sql),
            ty,
            deps,
            self.flags.merge(rhs.flags),
        ))
    }

    pub fn plus(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Plus, rhs)
    }

    pub fn minus(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Minus, rhs)
    }

    pub fn times(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Multiply, rhs)
    }

    pub fn divide(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Divide, rhs)
    }

    pub fn modulo(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Modulo, rhs)
    }

    pub fn pow(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Power, rhs)
    }

    pub fn equals(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Eq, rhs)
    }

    pub fn not_equals(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::NotEq, rhs)
    }

    pub fn lt(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Lt, rhs)
    }

    pub fn lt_eq(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::LtEq, rhs)
    }

    pub fn gt(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Gt, rhs)
    }

    pub fn gt_eq(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::GtEq, rhs)
    }

    pub fn and(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::And, rhs)
    }

    pub fn or(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Or, rhs)
    }

    pub fn concat(&self, rhs: &TypedExpr) -> Result<TypedExpr> {
        self.binary(BinaryOp::Concat, rhs)
    }

    pub fn not(&self) -> Result<TypedExpr> {
        self.require_boolean("NOT")?;
        Ok(Self::derived(
            format!("(NOT {})", self.sql),
            EngineType::Boolean,
            self.deps.clone(),
            ExprFlags {
                windowable: false,
                ..self.flags
            },
        ))
    }

    // -------------------------
    // Predicates and casts
    // -------------------------

    pub fn is_null(&self) -> TypedExpr {
        self.postfix("IS NULL")
    }

    pub fn is_not_null(&self) -> TypedExpr {
        self.postfix("IS NOT NULL")
    }

    fn postfix(&self, suffix: &str) -> TypedExpr {
        Self::derived(
            format!("({} {suffix})", self.sql),
            EngineType::Boolean,
            self.deps.clone(),
            ExprFlags {
                windowable: false,
                ..self.flags
            },
        )
    }

    /// `self IN (v, ...)`; every value must be comparable with `self`.
    pub fn is_in(&self, values: &[TypedExpr]) -> Result<TypedExpr> {
        if values.is_empty() {
            return Err(TrelError::Planning("IN list cannot be empty".to_string()));
        }
        let mut deps = self.deps.clone();
        let mut flags = self.flags;
        for v in values {
            if !comparable(&self.ty, &v.ty) {
                return Err(TrelError::type_mismatch("IN", &self.ty, &v.ty));
            }
            deps.extend(v.deps.iter().cloned());
            flags = flags.merge(v.flags);
        }
        let list = values.iter().map(|v| v.sql.as_str()).collect::<Vec<_>>().join(", ");
        Ok(Self::derived(
            format!("({} IN ({list}))", self.sql),
            EngineType::Boolean,
            deps,
            flags.merge(ExprFlags::default()),
        ))
    }

    /// `self BETWEEN low AND high`.
    pub fn between(&self, low: &TypedExpr, high: &TypedExpr) -> Result<TypedExpr> {
        for bound in [low, high] {
            if !comparable(&self.ty, &bound.ty) {
                return Err(TrelError::type_mismatch("BETWEEN", &self.ty, &bound.ty));
            }
        }
        let mut deps = self.deps.clone();
        deps.extend(low.deps.iter().cloned());
        deps.extend(high.deps.iter().cloned());
        Ok(Self::derived(
            format!("({} BETWEEN {} AND {})", self.sql, low.sql, high.sql),
            EngineType::Boolean,
            deps,
            self.flags.merge(low.flags).merge(high.flags),
        ))
    }

    /// `CAST(self AS ty)`.
    pub fn cast(&self, ty: EngineType) -> TypedExpr {
        self.cast_with("CAST", ty)
    }

    /// `TRY_CAST(self AS ty)`; yields NULL instead of failing at execution.
    pub fn try_cast(&self, ty: EngineType) -> TypedExpr {
        self.cast_with("TRY_CAST", ty)
    }

    fn cast_with(&self, func: &str, ty: EngineType) -> TypedExpr {
        Self::derived(
            format!("{func}({} AS {ty})", self.sql),
            ty,
            self.deps.clone(),
            ExprFlags {
                windowable: false,
                ..self.flags
            },
        )
    }

    // -------------------------
    // Type-generic aggregates
    // -------------------------

    pub fn count(&self) -> TypedExpr {
        self.aggregate_call("count", EngineType::BigInt)
    }

    pub fn count_distinct(&self) -> TypedExpr {
        let mut e = self.aggregate_call("count", EngineType::BigInt);
        e.sql = format!("count(DISTINCT {})", self.sql);
        e
    }

    pub fn min(&self) -> TypedExpr {
        self.aggregate_call("min", self.ty.clone())
    }

    pub fn max(&self) -> TypedExpr {
        self.aggregate_call("max", self.ty.clone())
    }

    pub fn any_value(&self) -> TypedExpr {
        self.aggregate_call("any_value", self.ty.clone())
    }

    /// `list(self)`: collect values into a list per group.
    pub fn list(&self) -> TypedExpr {
        let ty = if self.ty.is_unknown() {
            EngineType::Unknown
        } else {
            EngineType::List(Box::new(self.ty.clone()))
        };
        self.aggregate_call("list", ty)
    }

    // -------------------------
    // Ordering and windows
    // -------------------------

    pub fn asc(&self) -> SortExpr {
        SortExpr {
            expr: self.clone(),
            descending: false,
            nulls_first: None,
        }
    }

    pub fn desc(&self) -> SortExpr {
        SortExpr {
            expr: self.clone(),
            descending: true,
            nulls_first: None,
        }
    }

    /// Apply a window, merging in the dependencies of every partition and order expression.
    pub fn over(&self, window: &Window) -> Result<TypedExpr> {
        if !self.flags.windowable || !(self.flags.aggregate || self.flags.pending_window) {
            return Err(TrelError::Planning(format!(
                "OVER requires an aggregate or window function, got {}",
                self.sql
            )));
        }
        let spec = window.render()?;
        let mut deps = self.deps.clone();
        deps.extend(window.dependencies());
        Ok(Self::derived(
            format!("{} OVER ({spec})", self.sql),
            self.ty.clone(),
            deps,
            ExprFlags {
                aggregate: false,
                window: true,
                pending_window: false,
                windowable: false,
            },
        ))
    }

    /// Typed view exposing the capabilities of this expression's category.
    pub fn into_variant(self) -> ExprVariant {
        ExprVariant::from(self)
    }
}

impl From<&str> for TypedExpr {
    /// A bare string converts to a column reference, not a string literal.
    fn from(name: &str) -> Self {
        col(name)
    }
}

impl From<String> for TypedExpr {
    fn from(name: String) -> Self {
        col(name)
    }
}

impl From<&TypedExpr> for TypedExpr {
    fn from(e: &TypedExpr) -> Self {
        e.clone()
    }
}

impl fmt::Display for TypedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(a) => write!(f, "{} AS {}", self.sql, quote_ident(a)),
            None => f.write_str(&self.sql),
        }
    }
}

/// Sort key: expression plus direction and optional null placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortExpr {
    pub expr: TypedExpr,
    pub descending: bool,
    pub nulls_first: Option<bool>,
}

impl SortExpr {
    pub fn nulls_first(mut self) -> Self {
        self.nulls_first = Some(true);
        self
    }

    pub fn nulls_last(mut self) -> Self {
        self.nulls_first = Some(false);
        self
    }

    pub fn to_sql(&self) -> String {
        let mut s = self.expr.sql.clone();
        s.push_str(if self.descending { " DESC" } else { " ASC" });
        match self.nulls_first {
            Some(true) => s.push_str(" NULLS FIRST"),
            Some(false) => s.push_str(" NULLS LAST"),
            None => {}
        }
        s
    }
}

impl From<TypedExpr> for SortExpr {
    fn from(expr: TypedExpr) -> Self {
        expr.asc()
    }
}

impl From<&str> for SortExpr {
    fn from(name: &str) -> Self {
        col(name).asc()
    }
}
