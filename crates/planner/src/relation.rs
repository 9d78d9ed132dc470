//! Immutable relations and the transformation algebra over them.
//!
//! Every operation validates its arguments against the cached schema, then returns a new
//! [`Relation`] whose plan wraps the original one. The input relation is never touched.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;
use trel_common::{MissingColumn, Result, TrelError};

use crate::connection::ConnectionRef;
use crate::explain::explain_logical;
use crate::expr::{lit, raw, Literal, SortExpr, TypedExpr};
use crate::logical_plan::{LogicalPlan, ScanSource, Source};
use crate::schema::{fold, ColumnDefinition, SchemaCache};
use crate::sql::quote_ident;
use crate::types::{unify, EngineType, TypeCategory};
use crate::validator::{partition_resolvable, require};

/// Immutable handle to a set of rows with a known column schema.
///
/// Cloning is cheap; plan and schema are shared.
#[derive(Debug, Clone)]
pub struct Relation {
    plan: Arc<LogicalPlan>,
    schema: Arc<SchemaCache>,
    connection: ConnectionRef,
}

impl Relation {
    // -------------------------
    // Constructors
    // -------------------------

    /// Relation over a named engine table; `schema` is the engine's column listing.
    pub fn from_table(
        connection: &ConnectionRef,
        name: impl Into<String>,
        schema: SchemaCache,
    ) -> Result<Self> {
        Self::from_source(connection, Source::Table(name.into()), schema)
    }

    /// Relation over a caller-supplied statement.
    pub fn from_query(
        connection: &ConnectionRef,
        sql: impl Into<String>,
        schema: SchemaCache,
    ) -> Result<Self> {
        Self::from_source(connection, Source::Query(sql.into()), schema)
    }

    /// Relation over a file read by an engine table function.
    pub fn from_scan(
        connection: &ConnectionRef,
        scan: ScanSource,
        schema: SchemaCache,
    ) -> Result<Self> {
        Self::from_source(connection, Source::Scan(scan), schema)
    }

    fn from_source(connection: &ConnectionRef, source: Source, schema: SchemaCache) -> Result<Self> {
        connection.ensure_open("relation")?;
        if schema.is_empty() {
            return Err(TrelError::Planning(
                "relation source must have at least one column".to_string(),
            ));
        }
        debug!(connection = %connection.id(), columns = schema.len(), source = ?source, "relation created");
        Ok(Self {
            plan: Arc::new(LogicalPlan::Source(source)),
            schema: Arc::new(schema),
            connection: connection.clone(),
        })
    }

    pub(crate) fn derive(&self, operation: &str, plan: LogicalPlan, schema: SchemaCache) -> Self {
        debug!(operation, node = plan.name(), columns = schema.len(), "relation derived");
        Self {
            plan: Arc::new(plan),
            schema: Arc::new(schema),
            connection: self.connection.clone(),
        }
    }

    pub(crate) fn input(&self) -> Box<LogicalPlan> {
        Box::new(self.plan.as_ref().clone())
    }

    pub(crate) fn ensure_open(&self, operation: &str) -> Result<()> {
        self.connection.ensure_open(operation)
    }

    pub(crate) fn ensure_same_connection(&self, other: &Relation, operation: &str) -> Result<()> {
        if self.connection != other.connection {
            return Err(TrelError::Planning(format!(
                "{operation}: relations belong to different connections ({} vs {})",
                self.connection.id(),
                other.connection.id()
            )));
        }
        other.ensure_open(operation)
    }

    // -------------------------
    // Accessors
    // -------------------------

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    pub fn columns(&self) -> Vec<&str> {
        self.schema.names()
    }

    pub fn plan(&self) -> &LogicalPlan {
        &self.plan
    }

    pub fn connection(&self) -> &ConnectionRef {
        &self.connection
    }

    /// Statement text sent to the engine.
    pub fn sql(&self) -> String {
        self.plan.to_sql()
    }

    /// Multi-line plan tree with the output schema.
    pub fn explain(&self) -> String {
        format!("{}output={}\n", explain_logical(&self.plan), self.schema)
    }

    /// Typed reference to a column of this relation.
    pub fn col(&self, name: &str) -> Result<TypedExpr> {
        let def = self.schema.require("col", name)?;
        Ok(TypedExpr::column(def.name(), def.engine_type().clone()))
    }

    // -------------------------
    // Projection family
    // -------------------------

    /// Replace the column list with `exprs`.
    pub fn project<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("project")?;
        let exprs = collect(exprs);
        require("project", &exprs, &self.schema)?;
        self.project_checked("project", exprs)
    }

    /// Like [`Relation::project`], dropping expressions whose dependencies do not resolve.
    pub fn project_if_exists<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("project_if_exists")?;
        let (kept, dropped) = partition_resolvable(collect(exprs), &self.schema);
        log_dropped("project_if_exists", &dropped);
        if kept.is_empty() {
            return Err(TrelError::Planning(
                "project_if_exists: none of the expressions resolve".to_string(),
            ));
        }
        self.project_checked("project_if_exists", kept)
    }

    fn project_checked(&self, operation: &str, exprs: Vec<TypedExpr>) -> Result<Relation> {
        if exprs.is_empty() {
            return Err(TrelError::Planning(format!("{operation}: empty projection")));
        }
        let aggregates = exprs.iter().filter(|e| e.is_aggregate()).count();
        if aggregates > 0 && exprs.iter().any(|e| !e.is_aggregate() && !e.dependencies().is_empty()) {
            return Err(TrelError::Planning(format!(
                "{operation}: cannot mix aggregate and per-row expressions without grouping"
            )));
        }
        let items = exprs
            .iter()
            .map(|e| self.output_item(operation, e))
            .collect::<Result<Vec<_>>>()?;
        let schema = schema_from_items(operation, &items)?;
        let plan = LogicalPlan::Projection {
            exprs: items.into_iter().map(|(e, def)| (e, def.name().to_string())).collect(),
            input: self.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }

    /// Append `exprs` as new columns, replacing same-named columns in place.
    pub fn add<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("add")?;
        let exprs = collect(exprs);
        require("add", &exprs, &self.schema)?;
        self.add_checked("add", exprs)
    }

    pub fn add_if_exists<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("add_if_exists")?;
        let (kept, dropped) = partition_resolvable(collect(exprs), &self.schema);
        log_dropped("add_if_exists", &dropped);
        if kept.is_empty() {
            return Ok(self.clone());
        }
        self.add_checked("add_if_exists", kept)
    }

    /// Replace existing columns with new definitions. Every target column must exist.
    pub fn transform<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("transform")?;
        let exprs = collect(exprs);
        let mut missing = Vec::new();
        for e in &exprs {
            let name = e.output_name();
            if !self.schema.contains(&name) {
                missing.push(MissingColumn {
                    expression: e.sql().to_string(),
                    column: name,
                });
            }
        }
        if !missing.is_empty() {
            return Err(TrelError::MissingColumns {
                operation: "transform".to_string(),
                missing,
            });
        }
        require("transform", &exprs, &self.schema)?;
        self.add_checked("transform", exprs)
    }

    /// Like [`Relation::transform`], dropping expressions whose target or dependencies are
    /// missing.
    pub fn transform_if_exists<I, E>(&self, exprs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.ensure_open("transform_if_exists")?;
        let (targeted, untargeted): (Vec<_>, Vec<_>) = collect(exprs)
            .into_iter()
            .partition(|e| self.schema.contains(&e.output_name()));
        let (kept, dropped) = partition_resolvable(targeted, &self.schema);
        log_dropped("transform_if_exists", &untargeted);
        log_dropped("transform_if_exists", &dropped);
        if kept.is_empty() {
            return Ok(self.clone());
        }
        self.add_checked("transform_if_exists", kept)
    }

    fn add_checked(&self, operation: &str, exprs: Vec<TypedExpr>) -> Result<Relation> {
        if let Some(e) = exprs.iter().find(|e| e.is_aggregate()) {
            return Err(TrelError::Planning(format!(
                "{operation}: aggregate {} needs the aggregate builder or a window",
                e.sql()
            )));
        }
        let items = exprs
            .iter()
            .map(|e| self.output_item(operation, e))
            .collect::<Result<Vec<_>>>()?;
        // Validates the added names among themselves.
        schema_from_items(operation, &items)?;

        let mut out: Vec<(TypedExpr, ColumnDefinition)> = self
            .schema
            .columns()
            .iter()
            .map(|c| (TypedExpr::column(c.name(), c.engine_type().clone()), c.clone()))
            .collect();
        for (e, def) in items {
            match self.schema.index_of(def.name()) {
                Some(i) => out[i] = (e, def),
                None => out.push((e, def)),
            }
        }
        let schema = schema_from_items(operation, &out)?;
        let plan = LogicalPlan::Projection {
            exprs: out.into_iter().map(|(e, def)| (e, def.name().to_string())).collect(),
            input: self.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }

    /// Definition of the output column produced by `expr`.
    fn output_item(&self, operation: &str, expr: &TypedExpr) -> Result<(TypedExpr, ColumnDefinition)> {
        if expr.needs_over() {
            return Err(TrelError::Planning(format!(
                "{operation}: window function {} requires OVER",
                expr.sql()
            )));
        }
        let resolved = expr.resolve(&self.schema);
        let name = resolved.output_name();
        let def = match (resolved.column_name(), resolved.alias_name()) {
            (Some(c), None) => self.schema.require(operation, c)?.clone(),
            (Some(c), Some(alias)) => self.schema.require(operation, c)?.renamed(alias),
            _ => ColumnDefinition::new(name, resolved.result_type().clone()),
        };
        Ok((resolved, def))
    }

    // -------------------------
    // Naming
    // -------------------------

    /// Rename columns. Every old name must exist; the result must not contain duplicates.
    pub fn rename<I, O, N>(&self, pairs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = (O, N)>,
        O: Into<String>,
        N: Into<String>,
    {
        self.ensure_open("rename")?;
        let pairs = collect_pairs(pairs);
        let missing = pairs
            .iter()
            .filter(|(old, _)| !self.schema.contains(old))
            .map(|(old, new)| MissingColumn {
                expression: format!("{old} -> {new}"),
                column: old.clone(),
            })
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            return Err(TrelError::MissingColumns {
                operation: "rename".to_string(),
                missing,
            });
        }
        self.rename_checked("rename", pairs)
    }

    /// Like [`Relation::rename`], ignoring pairs whose old name does not exist.
    pub fn rename_if_exists<I, O, N>(&self, pairs: I) -> Result<Relation>
    where
        I: IntoIterator<Item = (O, N)>,
        O: Into<String>,
        N: Into<String>,
    {
        self.ensure_open("rename_if_exists")?;
        let pairs = collect_pairs(pairs)
            .into_iter()
            .filter(|(old, _)| self.schema.contains(old))
            .collect::<Vec<_>>();
        if pairs.is_empty() {
            return Ok(self.clone());
        }
        self.rename_checked("rename_if_exists", pairs)
    }

    fn rename_checked(&self, operation: &str, pairs: Vec<(String, String)>) -> Result<Relation> {
        let mut targets: Vec<Option<String>> = vec![None; self.schema.len()];
        for (old, new) in pairs {
            if let Some(i) = self.schema.index_of(&old) {
                if targets[i].is_some() {
                    return Err(TrelError::name_conflict(operation, vec![old]));
                }
                targets[i] = Some(new);
            }
        }
        let mut seen = HashSet::new();
        let mut conflicts = Vec::new();
        let mut exprs = Vec::with_capacity(self.schema.len());
        let mut columns = Vec::with_capacity(self.schema.len());
        for (c, target) in self.schema.columns().iter().zip(targets) {
            let name = target.unwrap_or_else(|| c.name().to_string());
            if !seen.insert(fold(&name)) {
                conflicts.push(name.clone());
            }
            exprs.push((TypedExpr::column(c.name(), c.engine_type().clone()), name.clone()));
            columns.push(c.renamed(name));
        }
        if !conflicts.is_empty() {
            return Err(TrelError::name_conflict(operation, conflicts));
        }
        let schema = SchemaCache::try_from_columns(columns)?;
        let plan = LogicalPlan::Projection {
            exprs,
            input: self.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }

    // -------------------------
    // Column selection
    // -------------------------

    /// Keep only `names`, in the given order. Repeated names are kept once.
    pub fn keep<I, S>(&self, names: I) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open("keep")?;
        let names = dedup_names(names);
        self.require_names("keep", &names)?;
        self.keep_checked("keep", names)
    }

    /// Like [`Relation::keep`], silently ignoring unknown names.
    pub fn keep_if_exists<I, S>(&self, names: I) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open("keep_if_exists")?;
        let names = dedup_names(names)
            .into_iter()
            .filter(|n| self.schema.contains(n))
            .collect();
        self.keep_checked("keep_if_exists", names)
    }

    fn keep_checked(&self, operation: &str, names: Vec<String>) -> Result<Relation> {
        if names.is_empty() {
            return Err(TrelError::Planning(format!(
                "{operation}: no columns left to keep"
            )));
        }
        let mut exprs = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for n in &names {
            let def = self.schema.require(operation, n)?;
            exprs.push((
                TypedExpr::column(def.name(), def.engine_type().clone()),
                def.name().to_string(),
            ));
            columns.push(def.clone());
        }
        let schema = SchemaCache::try_from_columns(columns)?;
        let plan = LogicalPlan::Projection {
            exprs,
            input: self.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }

    /// Remove `names`. Every name must exist and at least one column must remain.
    pub fn drop<I, S>(&self, names: I) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open("drop")?;
        let names = dedup_names(names);
        self.require_names("drop", &names)?;
        self.drop_checked("drop", &names)
    }

    /// Like [`Relation::drop`], silently ignoring unknown names.
    pub fn drop_if_exists<I, S>(&self, names: I) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_open("drop_if_exists")?;
        let names = dedup_names(names)
            .into_iter()
            .filter(|n| self.schema.contains(n))
            .collect::<Vec<_>>();
        if names.is_empty() {
            return Ok(self.clone());
        }
        self.drop_checked("drop_if_exists", &names)
    }

    fn drop_checked(&self, operation: &str, names: &[String]) -> Result<Relation> {
        let dropped = names.iter().map(|n| fold(n)).collect::<HashSet<_>>();
        let remaining = self
            .schema
            .names()
            .into_iter()
            .filter(|n| !dropped.contains(&fold(n)))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if remaining.is_empty() {
            return Err(TrelError::Planning(format!(
                "{operation}: cannot drop every column"
            )));
        }
        self.keep_checked(operation, remaining)
    }

    fn require_names(&self, operation: &str, names: &[String]) -> Result<()> {
        let missing = names
            .iter()
            .filter(|n| !self.schema.contains(n))
            .map(|n| MissingColumn {
                expression: n.clone(),
                column: n.clone(),
            })
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TrelError::MissingColumns {
                operation: operation.to_string(),
                missing,
            })
        }
    }

    // -------------------------
    // Row operations
    // -------------------------

    /// Keep rows satisfying a boolean predicate.
    pub fn filter(&self, predicate: &TypedExpr) -> Result<Relation> {
        self.ensure_open("filter")?;
        let predicate = predicate.resolve(&self.schema);
        match predicate.category() {
            TypeCategory::Boolean | TypeCategory::Unknown => {}
            _ => {
                return Err(TrelError::type_mismatch(
                    "filter",
                    format!("{} ({})", predicate.sql(), predicate.result_type()),
                    EngineType::Boolean,
                ))
            }
        }
        if predicate.is_aggregate() || predicate.is_window() || predicate.needs_over() {
            return Err(TrelError::Planning(format!(
                "filter: predicate cannot contain aggregate or window calls: {}",
                predicate.sql()
            )));
        }
        require("filter", [&predicate], &self.schema)?;
        let plan = LogicalPlan::Filter {
            predicate,
            input: self.input(),
        };
        Ok(self.derive("filter", plan, self.schema.as_ref().clone()))
    }

    /// Raw predicate text with explicitly declared dependencies.
    pub fn filter_sql<I, S>(&self, predicate: &str, dependencies: I) -> Result<Relation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter(&raw(predicate, dependencies))
    }

    pub fn order_by<I, K>(&self, keys: I) -> Result<Relation>
    where
        I: IntoIterator<Item = K>,
        K: Into<SortExpr>,
    {
        self.ensure_open("order_by")?;
        let keys = keys.into_iter().map(Into::into).collect::<Vec<SortExpr>>();
        if keys.is_empty() {
            return Err(TrelError::Planning("order_by: no sort keys".to_string()));
        }
        require("order_by", keys.iter().map(|k| &k.expr), &self.schema)?;
        let plan = LogicalPlan::Sort {
            keys,
            input: self.input(),
        };
        Ok(self.derive("order_by", plan, self.schema.as_ref().clone()))
    }

    pub fn limit(&self, n: u64, offset: u64) -> Result<Relation> {
        self.ensure_open("limit")?;
        let plan = LogicalPlan::Limit {
            n,
            offset,
            input: self.input(),
        };
        Ok(self.derive("limit", plan, self.schema.as_ref().clone()))
    }

    pub fn distinct(&self) -> Result<Relation> {
        self.ensure_open("distinct")?;
        let plan = LogicalPlan::Distinct { input: self.input() };
        Ok(self.derive("distinct", plan, self.schema.as_ref().clone()))
    }

    /// Positional `UNION ALL`. Column counts must match and types must unify per position.
    pub fn union_all(&self, other: &Relation) -> Result<Relation> {
        self.ensure_open("union_all")?;
        self.ensure_same_connection(other, "union_all")?;
        if self.schema.len() != other.schema.len() {
            return Err(TrelError::Planning(format!(
                "union_all: column count mismatch ({} vs {})",
                self.schema.len(),
                other.schema.len()
            )));
        }
        let mut columns = Vec::with_capacity(self.schema.len());
        for (l, r) in self.schema.columns().iter().zip(other.schema.columns()) {
            columns.push(unified_column("union_all", l, r)?);
        }
        let plan = LogicalPlan::Union {
            by_name: false,
            left: self.input(),
            right: other.input(),
        };
        Ok(self.derive("union_all", plan, SchemaCache::try_from_columns(columns)?))
    }

    /// `UNION ALL BY NAME`: columns matched case-insensitively; columns present on one side
    /// only are filled with NULL on the other.
    pub fn union_all_by_name(&self, other: &Relation) -> Result<Relation> {
        self.ensure_open("union_all_by_name")?;
        self.ensure_same_connection(other, "union_all_by_name")?;
        let mut columns = Vec::with_capacity(self.schema.len());
        for l in self.schema.columns() {
            columns.push(match other.schema.get(l.name()) {
                Some(r) => unified_column("union_all_by_name", l, r)?,
                None => l.clone(),
            });
        }
        for r in other.schema.columns() {
            if !self.schema.contains(r.name()) {
                columns.push(r.clone());
            }
        }
        let plan = LogicalPlan::Union {
            by_name: true,
            left: self.input(),
            right: other.input(),
        };
        Ok(self.derive("union_all_by_name", plan, SchemaCache::try_from_columns(columns)?))
    }

    /// Append a constant column; used by writers to tag rows.
    pub fn with_literal(&self, name: &str, value: impl Into<Literal>) -> Result<Relation> {
        self.add([lit(value).alias(name)])
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relation{}", self.schema)
    }
}

fn collect<I, E>(exprs: I) -> Vec<TypedExpr>
where
    I: IntoIterator<Item = E>,
    E: Into<TypedExpr>,
{
    exprs.into_iter().map(Into::into).collect()
}

fn collect_pairs<I, O, N>(pairs: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (O, N)>,
    O: Into<String>,
    N: Into<String>,
{
    pairs.into_iter().map(|(o, n)| (o.into(), n.into())).collect()
}

fn dedup_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|n| n.as_ref().to_string())
        .filter(|n| seen.insert(fold(n)))
        .collect()
}

fn log_dropped(operation: &str, dropped: &[TypedExpr]) {
    for e in dropped {
        debug!(operation, expression = %e, "dropped expression with unresolved columns");
    }
}

fn schema_from_items(operation: &str, items: &[(TypedExpr, ColumnDefinition)]) -> Result<SchemaCache> {
    let mut seen = HashSet::new();
    let conflicts = items
        .iter()
        .map(|(_, d)| d.name())
        .filter(|n| !seen.insert(fold(n)))
        .map(str::to_string)
        .collect::<Vec<_>>();
    if !conflicts.is_empty() {
        return Err(TrelError::name_conflict(operation, conflicts));
    }
    SchemaCache::try_from_columns(items.iter().map(|(_, d)| d.clone()))
}

fn unified_column(
    operation: &str,
    left: &ColumnDefinition,
    right: &ColumnDefinition,
) -> Result<ColumnDefinition> {
    let ty = unify(left.engine_type(), right.engine_type()).ok_or_else(|| {
        TrelError::type_mismatch(
            operation,
            format!("{} {}", quote_ident(left.name()), left.engine_type()),
            format!("{} {}", quote_ident(right.name()), right.engine_type()),
        )
    })?;
    if &ty == left.engine_type() {
        Ok(left.clone())
    } else {
        Ok(ColumnDefinition::new(left.name(), ty))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::expr::{col, lit, NumericCapable};

    pub(crate) fn people(conn: &Connection) -> Relation {
        Relation::from_table(
            &conn.downgrade(),
            "people",
            SchemaCache::try_from_columns([
                ColumnDefinition::new("id", EngineType::Integer),
                ColumnDefinition::new("name", EngineType::Varchar),
                ColumnDefinition::new("age", EngineType::Integer),
            ])
            .expect("schema"),
        )
        .expect("relation")
    }

    #[test]
    fn transformations_never_mutate_their_input() {
        let conn = Connection::open();
        let r = people(&conn);
        let before_schema = r.schema().clone();
        let before_sql = r.sql();

        let _ = r.add([col("age").plus(&lit(1)).expect("plus").alias("next_age")]).expect("add");
        let _ = r.rename([("name", "full_name")]).expect("rename");
        let _ = r.keep(["id"]).expect("keep");
        let _ = r.drop(["age"]).expect("drop");
        let _ = r.filter(&col("age").gt(&lit(3)).expect("gt")).expect("filter");
        let _ = r.keep(["missing"]).expect_err("strict keep");

        assert_eq!(r.schema(), &before_schema);
        assert_eq!(r.sql(), before_sql);
    }

    #[test]
    fn add_replaces_in_place_and_appends_new_columns() {
        let conn = Connection::open();
        let r = people(&conn);
        let out = r
            .add([
                r.col("age").expect("age").times(&lit(2)).expect("times").alias("AGE"),
                r.col("age").expect("age").as_numeric().expect("numeric").abs().alias("distance"),
            ])
            .expect("add");
        assert_eq!(out.columns(), vec!["id", "name", "AGE", "distance"]);
        assert_eq!(out.schema().get("age").map(|c| c.engine_type()), Some(&EngineType::Integer));
        assert_eq!(out.schema().get("distance").map(|c| c.engine_type()), Some(&EngineType::Integer));

        let err = r
            .add([r.col("age").expect("age").as_numeric().expect("numeric").sum().alias("total")])
            .expect_err("aggregate in add");
        assert!(matches!(err, TrelError::Planning(_)), "{err}");
    }

    #[test]
    fn transform_requires_existing_targets() {
        let conn = Connection::open();
        let r = people(&conn);
        let err = r
            .transform([col("age").plus(&lit(1)).expect("plus").alias("years")])
            .expect_err("missing target");
        assert_eq!(err.missing_columns()[0].column, "years");

        let soft = r
            .transform_if_exists([
                col("age").plus(&lit(1)).expect("plus").alias("years"),
                col("age").plus(&lit(1)).expect("plus").alias("age"),
            ])
            .expect("soft transform");
        assert_eq!(soft.columns(), vec!["id", "name", "age"]);
        assert!(soft.sql().contains("(\"age\" + 1) AS \"age\""), "{}", soft.sql());
    }

    #[test]
    fn project_collects_every_missing_dependency() {
        let conn = Connection::open();
        let r = people(&conn);
        let err = r
            .project([col("id"), col("x"), col("y").plus(&col("age")).expect("plus").alias("z")])
            .expect_err("missing");
        let missing = err.missing_columns();
        assert_eq!(
            missing.iter().map(|m| m.column.as_str()).collect::<Vec<_>>(),
            vec!["x", "y"]
        );

        let soft = r
            .project_if_exists([col("id"), col("x")])
            .expect("soft project");
        assert_eq!(soft.columns(), vec!["id"]);
    }

    #[test]
    fn rename_detects_conflicts_and_allows_swaps() {
        let conn = Connection::open();
        let r = people(&conn);
        let err = r.rename([("name", "ID")]).expect_err("conflict");
        assert!(matches!(err, TrelError::NameConflict { .. }), "{err}");

        let swapped = r.rename([("id", "name"), ("name", "id")]).expect("swap");
        assert_eq!(swapped.columns(), vec!["name", "id", "age"]);
        assert_eq!(
            swapped.schema().get("name").map(|c| c.engine_type()),
            Some(&EngineType::Integer)
        );

        let missing = r.rename([("nope", "x")]).expect_err("missing");
        assert!(missing.is_missing_columns());
        assert!(r.rename_if_exists([("nope", "x")]).is_ok());
    }

    #[test]
    fn rename_round_trip_restores_names() {
        let conn = Connection::open();
        let r = people(&conn);
        let back = r
            .rename([("name", "label")])
            .and_then(|x| x.rename([("label", "name")]))
            .expect("round trip");
        assert_eq!(back.schema(), r.schema());
    }

    #[test]
    fn keep_then_keep_if_exists_is_idempotent() {
        let conn = Connection::open();
        let r = people(&conn);
        let kept = r.keep(["age", "id", "age"]).expect("keep");
        assert_eq!(kept.columns(), vec!["age", "id"]);
        let again = kept.keep_if_exists(["age", "id", "unknown"]).expect("soft keep");
        let third = again.keep_if_exists(["age", "id", "unknown"]).expect("soft keep");
        assert_eq!(again.schema(), kept.schema());
        assert_eq!(third.schema(), kept.schema());
    }

    #[test]
    fn drop_rejects_unknown_and_empty_results() {
        let conn = Connection::open();
        let r = people(&conn);
        assert!(r.drop(["nope"]).expect_err("unknown").is_missing_columns());
        assert!(matches!(
            r.drop(["id", "name", "age"]).expect_err("all"),
            TrelError::Planning(_)
        ));
        assert_eq!(
            r.drop_if_exists(["nope", "AGE"]).expect("soft").columns(),
            vec!["id", "name"]
        );
    }

    #[test]
    fn filter_requires_boolean_predicates() {
        let conn = Connection::open();
        let r = people(&conn);
        let err = r.filter(&r.col("age").expect("age")).expect_err("not boolean");
        assert!(matches!(err, TrelError::TypeMismatch { .. }));

        let err = r.filter_sql("score > 3", ["score"]).expect_err("missing");
        assert!(err.is_missing_columns());

        let ok = r.filter_sql("age > 3", ["age"]).expect("raw filter");
        assert!(ok.sql().ends_with("WHERE age > 3"), "{}", ok.sql());
    }

    #[test]
    fn union_checks_shape_and_types() {
        let conn = Connection::open();
        let r = people(&conn);
        assert!(matches!(
            r.union_all(&r.keep(["id"]).expect("keep")).expect_err("count"),
            TrelError::Planning(_)
        ));
        let swapped = r.keep(["name", "id", "age"]).expect("keep");
        assert!(matches!(
            r.union_all(&swapped).expect_err("types"),
            TrelError::TypeMismatch { .. }
        ));
        let by_name = r.union_all_by_name(&swapped).expect("by name");
        assert_eq!(by_name.columns(), vec!["id", "name", "age"]);
        assert!(by_name.sql().contains("UNION ALL BY NAME"));
    }

    #[test]
    fn closed_connection_fails_before_building() {
        let conn = Connection::open();
        let r = people(&conn);
        conn.close();
        let err = r.keep(["id"]).expect_err("closed");
        assert!(matches!(err, TrelError::ConnectionUnavailable { .. }));
    }

    #[test]
    fn window_functions_need_over_before_projection() {
        let conn = Connection::open();
        let r = people(&conn);
        let err = r.add([crate::expr::row_number().alias("rn")]).expect_err("no over");
        assert!(matches!(err, TrelError::Planning(_)));

        let w = crate::expr::Window::new().partition_by(["name"]).order_by([col("age").desc()]);
        let out = r
            .add([crate::expr::row_number().over(&w).expect("over").alias("rn")])
            .expect("windowed add");
        assert!(out.sql().contains("row_number() OVER (PARTITION BY \"name\" ORDER BY \"age\" DESC) AS \"rn\""));
    }
}
