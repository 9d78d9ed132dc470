//! Aggregate builder: `Empty -> Accumulating -> Finalized`.
//!
//! Components are sorted into WHERE filters and grouping candidates, aggregate projections
//! are registered under aliases, and HAVING predicates are rewritten to reference those
//! aliases wherever their text matches a registered aggregate.

use std::collections::HashSet;

use tracing::debug;
use trel_common::{Result, TrelError};

use crate::expr::{raw, TypedExpr};
use crate::logical_plan::LogicalPlan;
use crate::relation::Relation;
use crate::schema::{fold, ColumnDefinition, SchemaCache};
use crate::sql::quote_ident;
use crate::types::{EngineType, TypeCategory};
use crate::validator::require;

#[derive(Debug, Clone, Default)]
struct Accumulated {
    filters: Vec<TypedExpr>,
    grouping: Vec<TypedExpr>,
    aggs: Vec<(TypedExpr, String)>,
    having: Vec<String>,
}

#[derive(Debug, Clone)]
enum BuilderState {
    Empty,
    Accumulating(Accumulated),
    Finalized(Relation),
}

/// Accumulates grouping components, aggregate projections and HAVING predicates over one
/// input relation, then finalizes into a single aggregate relation.
#[derive(Debug, Clone)]
pub struct AggregateBuilder {
    input: Relation,
    state: BuilderState,
}

impl Relation {
    /// Started aggregate builder over this relation.
    pub fn aggregate(&self) -> Result<AggregateBuilder> {
        self.ensure_open("aggregate")?;
        let mut builder = AggregateBuilder::new(self);
        builder.start()?;
        Ok(builder)
    }
}

impl AggregateBuilder {
    /// Builder in the `Empty` state; call [`AggregateBuilder::start`] before adding anything.
    pub fn new(input: &Relation) -> Self {
        Self {
            input: input.clone(),
            state: BuilderState::Empty,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            BuilderState::Empty => {
                self.state = BuilderState::Accumulating(Accumulated::default());
                Ok(())
            }
            BuilderState::Accumulating(_) => {
                Err(TrelError::Planning("aggregate builder already started".to_string()))
            }
            BuilderState::Finalized(_) => Err(TrelError::BuilderFinalized {
                operation: "start".to_string(),
            }),
        }
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, BuilderState::Finalized(_))
    }

    /// The finalized relation, if any.
    pub fn result(&self) -> Option<&Relation> {
        match &self.state {
            BuilderState::Finalized(r) => Some(r),
            _ => None,
        }
    }

    fn fields(&mut self, operation: &str) -> Result<&mut Accumulated> {
        match &mut self.state {
            BuilderState::Accumulating(acc) => Ok(acc),
            BuilderState::Empty => Err(TrelError::Planning(format!(
                "aggregate builder: {operation} before start"
            ))),
            BuilderState::Finalized(_) => Err(TrelError::BuilderFinalized {
                operation: operation.to_string(),
            }),
        }
    }

    /// Add a non-aggregate expression: boolean ones become WHERE filters, the rest grouping
    /// candidates used by [`AggregateBuilder::all`].
    pub fn component(&mut self, expr: impl Into<TypedExpr>) -> Result<&mut Self> {
        let expr = expr.into().resolve(self.input.schema());
        let schema = self.input.schema().clone();
        let acc = self.fields("component")?;
        if expr.is_aggregate() || expr.is_window() || expr.needs_over() {
            return Err(TrelError::Planning(format!(
                "component: {} is an aggregate or window expression; use agg()",
                expr.sql()
            )));
        }
        require("component", [&expr], &schema)?;
        if expr.category() == TypeCategory::Boolean {
            acc.filters.push(expr);
        } else {
            acc.grouping.push(expr);
        }
        Ok(self)
    }

    /// Register an aggregate projection under `alias`.
    pub fn agg(&mut self, expr: &TypedExpr, alias: &str) -> Result<&mut Self> {
        let schema = self.input.schema().clone();
        let acc = self.fields("agg")?;
        if !expr.is_aggregate() {
            return Err(TrelError::Planning(format!(
                "agg: {} is not an aggregate expression",
                expr.sql()
            )));
        }
        require("agg", [expr], &schema)?;
        if acc.aggs.iter().any(|(_, a)| fold(a) == fold(alias)) {
            return Err(TrelError::name_conflict("agg", vec![alias.to_string()]));
        }
        acc.aggs.push((expr.resolve(&schema), alias.to_string()));
        Ok(self)
    }

    /// Post-aggregation filter given as SQL text; registered aggregate calls are replaced by
    /// their aliases.
    pub fn having(&mut self, predicate: &str) -> Result<&mut Self> {
        let acc = self.fields("having")?;
        let rewritten = rewrite_having(predicate, &acc.aggs);
        if rewritten != predicate {
            debug!(original = predicate, rewritten = %rewritten, "having rewritten to aliases");
        }
        acc.having.push(rewritten);
        Ok(self)
    }

    /// Post-aggregation filter given as a typed predicate.
    pub fn having_expr(&mut self, predicate: &TypedExpr) -> Result<&mut Self> {
        match predicate.category() {
            TypeCategory::Boolean | TypeCategory::Unknown => {}
            _ => {
                return Err(TrelError::type_mismatch(
                    "having",
                    format!("{} ({})", predicate.sql(), predicate.result_type()),
                    "BOOLEAN",
                ))
            }
        }
        let schema = self.input.schema().clone();
        let acc = self.fields("having")?;
        let mut allowed = schema;
        for (_, alias) in &acc.aggs {
            allowed = allowed.with_column(ColumnDefinition::new(alias, EngineType::Unknown));
        }
        require("having", [predicate], &allowed)?;
        self.having(predicate.sql())
    }

    /// Text HAVING predicate with declared `dependencies`, each of which must name an input
    /// column or a registered aggregate alias.
    pub fn having_sql<I, S>(&mut self, predicate: &str, dependencies: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.having_expr(&raw(predicate, dependencies))
    }

    /// Finalize grouping by exactly `keys`.
    pub fn by<I, E>(&mut self, keys: I) -> Result<Relation>
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        let keys = keys.into_iter().map(Into::into).collect::<Vec<TypedExpr>>();
        self.finalize("by", Some(keys))
    }

    /// Finalize grouping by every non-boolean component.
    pub fn all(&mut self) -> Result<Relation> {
        self.finalize("all", None)
    }

    fn finalize(&mut self, operation: &str, keys: Option<Vec<TypedExpr>>) -> Result<Relation> {
        self.input.ensure_open(operation)?;
        let schema = self.input.schema().clone();
        let acc = self.fields(operation)?.clone();
        let keys = keys
            .unwrap_or_else(|| acc.grouping.clone())
            .into_iter()
            .map(|k| k.resolve(&schema))
            .collect::<Vec<_>>();
        require(operation, &keys, &schema)?;
        if let Some(k) = keys.iter().find(|k| k.is_aggregate() || k.is_window()) {
            return Err(TrelError::Planning(format!(
                "{operation}: grouping key {} is an aggregate or window expression",
                k.sql()
            )));
        }
        if keys.is_empty() && acc.aggs.is_empty() {
            return Err(TrelError::Planning(format!(
                "{operation}: aggregate needs grouping keys or aggregate projections"
            )));
        }

        let mut columns = Vec::with_capacity(keys.len() + acc.aggs.len());
        let mut key_items = Vec::with_capacity(keys.len());
        for k in &keys {
            let name = k.output_name();
            let def = match k.column_name().and_then(|c| schema.get(c)) {
                Some(d) if k.alias_name().is_none() => d.clone(),
                Some(d) => d.renamed(&name),
                None => ColumnDefinition::new(&name, k.result_type().clone()),
            };
            key_items.push((k.clone(), def.name().to_string()));
            columns.push(def);
        }
        for (e, alias) in &acc.aggs {
            columns.push(ColumnDefinition::new(alias, e.result_type().clone()));
        }
        let mut seen = HashSet::new();
        let conflicts = columns
            .iter()
            .filter(|c| !seen.insert(fold(c.name())))
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>();
        if !conflicts.is_empty() {
            return Err(TrelError::name_conflict(operation, conflicts));
        }

        let out_schema = SchemaCache::try_from_columns(columns)?;
        let plan = LogicalPlan::Aggregate {
            keys: key_items,
            aggs: acc.aggs.clone(),
            filters: acc.filters.clone(),
            having: acc.having.clone(),
            input: self.input.input(),
        };
        let relation = self.input.derive("aggregate", plan, out_schema);
        debug!(
            keys = keys.len(),
            aggregates = acc.aggs.len(),
            filters = acc.filters.len(),
            having = acc.having.len(),
            "aggregate finalized"
        );
        self.state = BuilderState::Finalized(relation.clone());
        Ok(relation)
    }
}

/// One normalized character and the byte span it came from in the original text.
struct NormChar {
    ch: char,
    literal: bool,
    start: usize,
    end: usize,
}

/// Lowercase ASCII and drop whitespace and double quotes, except inside single-quoted
/// literals, which are kept verbatim and only match literal text.
fn normalize(text: &str) -> Vec<NormChar> {
    let mut out = Vec::with_capacity(text.len());
    let mut in_literal = false;
    for (start, ch) in text.char_indices() {
        let end = start + ch.len_utf8();
        if ch == '\'' {
            in_literal = !in_literal;
            out.push(NormChar {
                ch,
                literal: true,
                start,
                end,
            });
            continue;
        }
        if in_literal {
            out.push(NormChar {
                ch,
                literal: true,
                start,
                end,
            });
        } else if !(ch.is_whitespace() || ch == '"') {
            out.push(NormChar {
                ch: ch.to_ascii_lowercase(),
                literal: false,
                start,
                end,
            });
        }
    }
    out
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Replace every occurrence of a registered aggregate's text in `predicate` by its quoted
/// alias. Longer aggregates win over ones they contain; matches must not continue an
/// identifier on either side.
pub(crate) fn rewrite_having(predicate: &str, aggs: &[(TypedExpr, String)]) -> String {
    let norm = normalize(predicate);
    let mut patterns = aggs
        .iter()
        .map(|(e, alias)| {
            (
                normalize(e.sql())
                    .into_iter()
                    .map(|n| (n.ch, n.literal))
                    .collect::<Vec<_>>(),
                alias.as_str(),
            )
        })
        .filter(|(p, _)| !p.is_empty())
        .collect::<Vec<_>>();
    patterns.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    // (start byte, end byte, alias) in the original text
    let mut spans: Vec<(usize, usize, &str)> = Vec::new();
    let mut claimed = vec![false; norm.len()];
    for (pattern, alias) in &patterns {
        let n = pattern.len();
        let mut i = 0;
        while i + n <= norm.len() {
            let hit = (0..n).all(|k| {
                !claimed[i + k] && (norm[i + k].ch, norm[i + k].literal) == pattern[k]
            });
            if hit && boundary_ok(predicate, norm[i].start, norm[i + n - 1].end) {
                for c in claimed.iter_mut().skip(i).take(n) {
                    *c = true;
                }
                spans.push((norm[i].start, norm[i + n - 1].end, alias));
                i += n;
            } else {
                i += 1;
            }
        }
    }
    spans.sort_by_key(|s| s.0);

    let mut out = String::with_capacity(predicate.len());
    let mut pos = 0;
    for (start, end, alias) in spans {
        out.push_str(&predicate[pos..start]);
        out.push_str(&quote_ident(alias));
        pos = end;
    }
    out.push_str(&predicate[pos..]);
    out
}

fn boundary_ok(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    let first = text[start..end].chars().next();
    let last = text[start..end].chars().next_back();
    let left_ok = match (before, first) {
        (Some(b), Some(f)) => !(is_ident_char(b) && is_ident_char(f)),
        _ => true,
    };
    let right_ok = match (last, after) {
        (Some(l), Some(a)) => !(is_ident_char(l) && is_ident_char(a)),
        _ => true,
    };
    left_ok && right_ok
}
