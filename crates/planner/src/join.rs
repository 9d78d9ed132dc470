//! Join variants over relations: keyed, natural and conditional joins plus asof joins.
//!
//! Key columns are merged into one output column only for inner equi-joins on same-named
//! keys. Every other shape outputs both sides, so same-named columns collide and are handled
//! by the caller's [`CollisionPolicy`].

use std::collections::HashSet;

use tracing::debug;
use trel_common::{MissingColumn, Result, TrelError};

use crate::expr::TypedExpr;
use crate::logical_plan::{JoinKind, LogicalPlan, OutputItem, LEFT_ALIAS, RIGHT_ALIAS};
use crate::relation::Relation;
use crate::schema::{fold, ColumnDefinition, SchemaCache};
use crate::sql::qualified;
use crate::types::{comparable, TypeCategory};

/// What to do with right-side columns whose names already appear in the output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Fail with `NameConflict`.
    #[default]
    Error,
    /// Keep the right column under `name + suffix`, numbered further if still taken.
    Suffix(String),
    /// Leave the right column out of the output.
    DropRight,
}

impl CollisionPolicy {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        CollisionPolicy::Suffix(suffix.into())
    }
}

/// How join rows are matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOn {
    /// Columns present on both sides, matched case-insensitively.
    Natural,
    /// Explicit `(left, right)` equality pairs.
    Keys(Vec<(String, String)>),
    /// Arbitrary boolean condition; build operands with [`left_col`] and [`right_col`].
    Condition(TypedExpr),
}

impl JoinOn {
    /// Equality on same-named columns.
    pub fn using<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        JoinOn::Keys(
            names
                .into_iter()
                .map(|n| {
                    let n = n.into();
                    (n.clone(), n)
                })
                .collect(),
        )
    }

    pub fn keys<I, L, R>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        JoinOn::Keys(pairs.into_iter().map(|(l, r)| (l.into(), r.into())).collect())
    }
}

/// Typed reference to a left-side column, for join conditions.
pub fn left_col(left: &Relation, name: &str) -> Result<TypedExpr> {
    side_col(left, LEFT_ALIAS, name)
}

/// Typed reference to a right-side column, for join conditions.
pub fn right_col(right: &Relation, name: &str) -> Result<TypedExpr> {
    side_col(right, RIGHT_ALIAS, name)
}

fn side_col(relation: &Relation, alias: &str, name: &str) -> Result<TypedExpr> {
    let def = relation.schema().require("join condition", name)?;
    Ok(crate::expr::raw_typed(
        qualified(alias, def.name()),
        [def.name().to_string()],
        def.engine_type().clone(),
    ))
}

/// Direction of an asof match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsofDirection {
    /// Latest right row whose order value is `<=` the left one.
    #[default]
    Backward,
    /// Earliest right row whose order value is `>=` the left one.
    Forward,
}

/// Asof join settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsofJoin {
    left_order: String,
    right_order: String,
    keys: Option<Vec<(String, String)>>,
    direction: AsofDirection,
    tolerance: Option<TypedExpr>,
    outer: bool,
    collisions: CollisionPolicy,
}

impl AsofJoin {
    pub fn new(left_order: impl Into<String>, right_order: impl Into<String>) -> Self {
        Self {
            left_order: left_order.into(),
            right_order: right_order.into(),
            keys: None,
            direction: AsofDirection::Backward,
            tolerance: None,
            outer: false,
            collisions: CollisionPolicy::Error,
        }
    }

    /// Equality keys; without them the shared column names (minus order columns) are used.
    pub fn keys<I, L, R>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, R)>,
        L: Into<String>,
        R: Into<String>,
    {
        self.keys = Some(pairs.into_iter().map(|(l, r)| (l.into(), r.into())).collect());
        self
    }

    pub fn direction(mut self, direction: AsofDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Maximum distance between matched order values.
    pub fn tolerance(mut self, tolerance: TypedExpr) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    /// Keep unmatched left rows (right columns NULL) instead of dropping them.
    pub fn outer(mut self, outer: bool) -> Self {
        self.outer = outer;
        self
    }

    pub fn collisions(mut self, collisions: CollisionPolicy) -> Self {
        self.collisions = collisions;
        self
    }
}

impl Relation {
    /// Join failing on any output name collision.
    pub fn join(&self, right: &Relation, kind: JoinKind, on: JoinOn) -> Result<Relation> {
        self.join_with(right, kind, on, CollisionPolicy::Error)
    }

    pub fn join_with(
        &self,
        right: &Relation,
        kind: JoinKind,
        on: JoinOn,
        collisions: CollisionPolicy,
    ) -> Result<Relation> {
        let operation = "join";
        self.ensure_open(operation)?;
        self.ensure_same_connection(right, operation)?;

        let (condition, merged) = match on {
            JoinOn::Natural => {
                let keys = natural_keys(self.schema(), right.schema(), &[]);
                if keys.is_empty() {
                    return Err(TrelError::Planning(
                        "join: natural join found no common columns".to_string(),
                    ));
                }
                equi_condition(operation, self.schema(), right.schema(), &keys)?
            }
            JoinOn::Keys(keys) => {
                if keys.is_empty() {
                    return Err(TrelError::Planning("join: no join keys".to_string()));
                }
                equi_condition(operation, self.schema(), right.schema(), &keys)?
            }
            JoinOn::Condition(cond) => {
                condition_sql(operation, &cond, self.schema(), right.schema())?;
                (cond.sql().to_string(), Vec::new())
            }
        };
        let merged = if kind == JoinKind::Inner {
            merged
        } else {
            Vec::new()
        };

        let mut out = OutputBuilder::new(operation, collisions);
        for c in self.schema().columns() {
            out.push_left(c);
        }
        if !matches!(kind, JoinKind::Semi | JoinKind::Anti) {
            for c in right.schema().columns() {
                if merged.contains(&fold(c.name())) {
                    continue;
                }
                out.push_right(c, qualified(RIGHT_ALIAS, c.name()));
            }
        }
        let (output, schema) = out.finish()?;
        debug!(kind = ?kind, condition = %condition, "join planned");
        let plan = LogicalPlan::Join {
            kind,
            condition,
            output,
            left: self.input(),
            right: right.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }

    pub fn inner_join(&self, right: &Relation, on: JoinOn) -> Result<Relation> {
        self.join(right, JoinKind::Inner, on)
    }

    pub fn left_join(&self, right: &Relation, on: JoinOn) -> Result<Relation> {
        self.join(right, JoinKind::Left, on)
    }

    /// Match each left row with the nearest right row by the order columns.
    pub fn asof_join(&self, right: &Relation, spec: AsofJoin) -> Result<Relation> {
        let operation = "asof_join";
        self.ensure_open(operation)?;
        self.ensure_same_connection(right, operation)?;

        let l_order = left_col(self, &spec.left_order).map_err(|e| relabel(e, operation))?;
        let r_order = right_col(right, &spec.right_order).map_err(|e| relabel(e, operation))?;
        if !comparable(l_order.result_type(), r_order.result_type()) {
            return Err(TrelError::type_mismatch(
                operation,
                format!("{} {}", spec.left_order, l_order.result_type()),
                format!("{} {}", spec.right_order, r_order.result_type()),
            ));
        }

        let keys = match spec.keys {
            Some(k) => k,
            None => natural_keys(
                self.schema(),
                right.schema(),
                &[spec.left_order.as_str(), spec.right_order.as_str()],
            ),
        };
        let (mut condition, merged) = if keys.is_empty() {
            (String::new(), Vec::new())
        } else {
            equi_condition(operation, self.schema(), right.schema(), &keys)?
        };
        let inequality = match spec.direction {
            AsofDirection::Backward => l_order.gt_eq(&r_order)?,
            AsofDirection::Forward => l_order.lt_eq(&r_order)?,
        };
        if !condition.is_empty() {
            condition.push_str(" AND ");
        }
        condition.push_str(inequality.sql());

        let within = match &spec.tolerance {
            Some(tol) => {
                let distance = match spec.direction {
                    AsofDirection::Backward => l_order.minus(&r_order)?,
                    AsofDirection::Forward => r_order.minus(&l_order)?,
                };
                Some(distance.lt_eq(tol)?.sql().to_string())
            }
            None => None,
        };

        let mut out = OutputBuilder::new(operation, spec.collisions.clone());
        for c in self.schema().columns() {
            out.push_left(c);
        }
        for c in right.schema().columns() {
            if merged.contains(&fold(c.name())) {
                continue;
            }
            let item = qualified(RIGHT_ALIAS, c.name());
            let item = match (&within, spec.outer) {
                (Some(w), true) => format!("CASE WHEN {w} THEN {item} END"),
                _ => item,
            };
            out.push_right(c, item);
        }
        let (output, schema) = out.finish()?;
        debug!(outer = spec.outer, direction = ?spec.direction, condition = %condition, "asof join planned");
        let plan = LogicalPlan::AsofJoin {
            outer: spec.outer,
            condition,
            tolerance: if spec.outer { None } else { within },
            output,
            left: self.input(),
            right: right.input(),
        };
        Ok(self.derive(operation, plan, schema))
    }
}

fn relabel(err: TrelError, operation: &str) -> TrelError {
    match err {
        TrelError::MissingColumns { missing, .. } => TrelError::MissingColumns {
            operation: operation.to_string(),
            missing,
        },
        other => other,
    }
}

/// Same-named columns on both sides, in left order, skipping `exclude`.
fn natural_keys(left: &SchemaCache, right: &SchemaCache, exclude: &[&str]) -> Vec<(String, String)> {
    let exclude = exclude.iter().map(|n| fold(n)).collect::<HashSet<_>>();
    left.columns()
        .iter()
        .filter(|c| !exclude.contains(&fold(c.name())))
        .filter_map(|c| {
            right
                .get(c.name())
                .map(|r| (c.name().to_string(), r.name().to_string()))
        })
        .collect()
}

/// Render `_l.a = _r.b AND ...` and report which right columns may be merged into the left key.
fn equi_condition(
    operation: &str,
    left: &SchemaCache,
    right: &SchemaCache,
    keys: &[(String, String)],
) -> Result<(String, Vec<String>)> {
    let mut missing = Vec::new();
    for (l, r) in keys {
        if !left.contains(l) {
            missing.push(MissingColumn {
                expression: format!("left key {l}"),
                column: l.clone(),
            });
        }
        if !right.contains(r) {
            missing.push(MissingColumn {
                expression: format!("right key {r}"),
                column: r.clone(),
            });
        }
    }
    if !missing.is_empty() {
        return Err(TrelError::MissingColumns {
            operation: operation.to_string(),
            missing,
        });
    }

    let mut parts = Vec::with_capacity(keys.len());
    let mut merged = Vec::new();
    for (l, r) in keys {
        let (ld, rd) = (left.require(operation, l)?, right.require(operation, r)?);
        if !comparable(ld.engine_type(), rd.engine_type()) {
            return Err(TrelError::type_mismatch(
                operation,
                format!("{} {}", ld.name(), ld.engine_type()),
                format!("{} {}", rd.name(), rd.engine_type()),
            ));
        }
        parts.push(format!(
            "{} = {}",
            qualified(LEFT_ALIAS, ld.name()),
            qualified(RIGHT_ALIAS, rd.name())
        ));
        if fold(ld.name()) == fold(rd.name()) {
            merged.push(fold(rd.name()));
        }
    }
    Ok((parts.join(" AND "), merged))
}

fn condition_sql(
    operation: &str,
    cond: &TypedExpr,
    left: &SchemaCache,
    right: &SchemaCache,
) -> Result<()> {
    match cond.category() {
        TypeCategory::Boolean | TypeCategory::Unknown => {}
        _ => {
            return Err(TrelError::type_mismatch(
                operation,
                format!("{} ({})", cond.sql(), cond.result_type()),
                "BOOLEAN",
            ))
        }
    }
    if cond.is_aggregate() || cond.is_window() {
        return Err(TrelError::Planning(format!(
            "{operation}: join condition cannot contain aggregate or window calls"
        )));
    }
    let missing = cond
        .dependencies()
        .iter()
        .filter(|d| !left.contains(d) && !right.contains(d))
        .map(|d| MissingColumn {
            expression: cond.sql().to_string(),
            column: d.clone(),
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

/// Accumulates join output columns, applying the collision policy to right-side names.
struct OutputBuilder<'a> {
    operation: &'a str,
    policy: CollisionPolicy,
    items: Vec<OutputItem>,
    columns: Vec<ColumnDefinition>,
    taken: HashSet<String>,
    conflicts: Vec<String>,
}

impl<'a> OutputBuilder<'a> {
    fn new(operation: &'a str, policy: CollisionPolicy) -> Self {
        Self {
            operation,
            policy,
            items: Vec::new(),
            columns: Vec::new(),
            taken: HashSet::new(),
            conflicts: Vec::new(),
        }
    }

    fn push_left(&mut self, c: &ColumnDefinition) {
        self.taken.insert(fold(c.name()));
        self.items
            .push((qualified(LEFT_ALIAS, c.name()), c.name().to_string()));
        self.columns.push(c.clone());
    }

    fn push_right(&mut self, c: &ColumnDefinition, item: String) {
        let name = if self.taken.contains(&fold(c.name())) {
            match &self.policy {
                CollisionPolicy::Error => {
                    self.conflicts.push(c.name().to_string());
                    return;
                }
                CollisionPolicy::DropRight => return,
                CollisionPolicy::Suffix(suffix) => {
                    let base = format!("{}{suffix}", c.name());
                    let mut candidate = base.clone();
                    let mut n = 2;
                    while self.taken.contains(&fold(&candidate)) {
                        candidate = format!("{base}_{n}");
                        n += 1;
                    }
                    candidate
                }
            }
        } else {
            c.name().to_string()
        };
        self.taken.insert(fold(&name));
        self.items.push((item, name.clone()));
        self.columns.push(c.renamed(name));
    }

    fn finish(self) -> Result<(Vec<OutputItem>, SchemaCache)> {
        if !self.conflicts.is_empty() {
            return Err(TrelError::name_conflict(self.operation, self.conflicts));
        }
        Ok((self.items, SchemaCache::try_from_columns(self.columns)?))
    }
}
