//! Dependency validation: every column an expression reads must exist in the schema.

use trel_common::{MissingColumn, Result, TrelError};

use crate::expr::TypedExpr;
use crate::schema::SchemaCache;

/// Outcome of validating a batch of expressions. Offenders are collected, not short-circuited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    missing: Vec<MissingColumn>,
    failed: Vec<usize>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing(&self) -> &[MissingColumn] {
        &self.missing
    }

    /// Positions (in the validated input) of expressions with unresolved dependencies.
    pub fn failed_positions(&self) -> &[usize] {
        &self.failed
    }

    /// Fatal reading: convert into `MissingColumns` for `operation`.
    pub fn into_result(self, operation: &str) -> Result<()> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(TrelError::MissingColumns {
                operation: operation.to_string(),
                missing: self.missing,
            })
        }
    }
}

/// Check every dependency of every expression against `schema`, case-insensitively.
pub fn validate<'a, I>(expressions: I, schema: &SchemaCache) -> ValidationResult
where
    I: IntoIterator<Item = &'a TypedExpr>,
{
    let mut out = ValidationResult::default();
    for (pos, expr) in expressions.into_iter().enumerate() {
        let before = out.missing.len();
        for dep in expr.dependencies() {
            if !schema.contains(dep) {
                out.missing.push(MissingColumn {
                    expression: expr.output_name(),
                    column: dep.clone(),
                });
            }
        }
        if out.missing.len() > before {
            out.failed.push(pos);
        }
    }
    out
}

/// Strict variant: any missing dependency is fatal.
pub fn require<'a, I>(operation: &str, expressions: I, schema: &SchemaCache) -> Result<()>
where
    I: IntoIterator<Item = &'a TypedExpr>,
{
    validate(expressions, schema).into_result(operation)
}

/// Soft variant: split into expressions that resolve and those that must be dropped.
///
/// The caller decides whether dropped expressions matter; this never fails.
pub fn partition_resolvable(
    expressions: Vec<TypedExpr>,
    schema: &SchemaCache,
) -> (Vec<TypedExpr>, Vec<TypedExpr>) {
    let result = validate(expressions.iter(), schema);
    let mut kept = Vec::with_capacity(expressions.len());
    let mut dropped = Vec::new();
    for (pos, e) in expressions.into_iter().enumerate() {
        if result.failed_positions().contains(&pos) {
            dropped.push(e);
        } else {
            kept.push(e);
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{col, lit, raw};
    use crate::schema::ColumnDefinition;
    use crate::types::EngineType;

    fn schema() -> SchemaCache {
        SchemaCache::try_from_columns([
            ColumnDefinition::new("id", EngineType::Integer),
            ColumnDefinition::new("Name", EngineType::Varchar),
        ])
        .expect("schema")
    }

    #[test]
    fn collects_every_missing_column() {
        let a = col("ID").plus(&col("x")).expect("plus").alias("a");
        let b = raw("coalesce(y, name)", ["y", "name"]);
        let c = lit(1);
        let result = validate([&a, &b, &c], &schema());
        assert!(!result.is_ok());
        assert_eq!(result.failed_positions(), &[0, 1]);
        let cols: Vec<(&str, &str)> = result
            .missing()
            .iter()
            .map(|m| (m.expression.as_str(), m.column.as_str()))
            .collect();
        assert_eq!(cols, vec![("a", "x"), ("coalesce(y, name)", "y")]);

        let err = result.into_result("project").expect_err("fatal");
        assert!(err.to_string().starts_with("project: missing columns"), "err={err}");
    }

    #[test]
    fn soft_partition_drops_instead_of_failing() {
        let (kept, dropped) =
            partition_resolvable(vec![col("name"), col("nope"), lit(2)], &schema());
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, vec![col("nope")]);
    }
}
