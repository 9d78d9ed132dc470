//! Plan nodes behind a [`crate::Relation`] and their rendering to engine SQL.
//!
//! Nodes carry already-validated typed expressions. Rendering nests each input as a derived
//! table so that every node only has to reference the output names of its input.

use crate::expr::{SortExpr, TypedExpr};
use crate::sql::{quote_ident, quote_str, select_item};

/// Alias used for the single input of a unary node.
pub(crate) const INPUT_ALIAS: &str = "_input";
/// Alias of the left side of a join.
pub const LEFT_ALIAS: &str = "_l";
/// Alias of the right side of a join.
pub const RIGHT_ALIAS: &str = "_r";

/// Engine table function reading a file, e.g. `read_csv('data.csv', header = true)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSource {
    pub function: String,
    pub path: String,
    /// Already-rendered named arguments, in order.
    pub options: Vec<(String, String)>,
}

impl ScanSource {
    pub fn new(function: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            path: path.into(),
            options: Vec::new(),
        }
    }

    pub fn option(mut self, name: impl Into<String>, rendered: impl Into<String>) -> Self {
        self.options.push((name.into(), rendered.into()));
        self
    }

    pub fn to_sql(&self) -> String {
        let mut args = vec![quote_str(&self.path)];
        args.extend(self.options.iter().map(|(k, v)| format!("{k} = {v}")));
        format!("{}({})", self.function, args.join(", "))
    }
}

/// Where a relation's rows originally come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// Named engine table or view; dotted names are quoted per part.
    Table(String),
    /// Caller-supplied statement, trusted as-is.
    Query(String),
    Scan(ScanSource),
}

impl Source {
    fn table_sql(name: &str) -> String {
        name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinKind {
    pub fn keyword(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Right => "RIGHT JOIN",
            JoinKind::Full => "FULL OUTER JOIN",
            JoinKind::Semi => "SEMI JOIN",
            JoinKind::Anti => "ANTI JOIN",
        }
    }
}

/// One output column of a join: rendered SQL and output name.
pub type OutputItem = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalPlan {
    Source(Source),
    Projection {
        exprs: Vec<(TypedExpr, String)>,
        input: Box<LogicalPlan>,
    },
    Filter {
        predicate: TypedExpr,
        input: Box<LogicalPlan>,
    },
    Sort {
        keys: Vec<SortExpr>,
        input: Box<LogicalPlan>,
    },
    Limit {
        n: u64,
        offset: u64,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Union {
        by_name: bool,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    Join {
        kind: JoinKind,
        condition: String,
        output: Vec<OutputItem>,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    AsofJoin {
        outer: bool,
        condition: String,
        /// Inner-mode tolerance, applied after matching.
        tolerance: Option<String>,
        output: Vec<OutputItem>,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    Aggregate {
        keys: Vec<(TypedExpr, String)>,
        aggs: Vec<(TypedExpr, String)>,
        filters: Vec<TypedExpr>,
        having: Vec<String>,
        input: Box<LogicalPlan>,
    },
}

impl LogicalPlan {
    /// Render the full statement.
    pub fn to_sql(&self) -> String {
        match self {
            LogicalPlan::Source(Source::Table(name)) => {
                format!("SELECT * FROM {}", Source::table_sql(name))
            }
            LogicalPlan::Source(Source::Query(sql)) => sql.clone(),
            LogicalPlan::Source(Source::Scan(scan)) => format!("SELECT * FROM {}", scan.to_sql()),
            LogicalPlan::Projection { exprs, input } => format!(
                "SELECT {} FROM {}",
                exprs
                    .iter()
                    .map(|(e, name)| select_item(e.sql(), name))
                    .collect::<Vec<_>>()
                    .join(", "),
                input.from_item(INPUT_ALIAS)
            ),
            LogicalPlan::Filter { predicate, input } => format!(
                "SELECT * FROM {} WHERE {}",
                input.from_item(INPUT_ALIAS),
                predicate.sql()
            ),
            LogicalPlan::Sort { keys, input } => format!(
                "SELECT * FROM {} ORDER BY {}",
                input.from_item(INPUT_ALIAS),
                keys.iter().map(SortExpr::to_sql).collect::<Vec<_>>().join(", ")
            ),
            LogicalPlan::Limit { n, offset, input } => {
                let mut s = format!("SELECT * FROM {} LIMIT {n}", input.from_item(INPUT_ALIAS));
                if *offset > 0 {
                    s.push_str(&format!(" OFFSET {offset}"));
                }
                s
            }
            LogicalPlan::Distinct { input } => {
                format!("SELECT DISTINCT * FROM {}", input.from_item(INPUT_ALIAS))
            }
            LogicalPlan::Union {
                by_name,
                left,
                right,
            } => format!(
                "SELECT * FROM {} UNION ALL {}SELECT * FROM {}",
                left.from_item("_u0"),
                if *by_name { "BY NAME " } else { "" },
                right.from_item("_u1")
            ),
            LogicalPlan::Join {
                kind,
                condition,
                output,
                left,
                right,
            } => format!(
                "SELECT {} FROM {} {} {} ON {condition}",
                render_output(output),
                left.from_item(LEFT_ALIAS),
                kind.keyword(),
                right.from_item(RIGHT_ALIAS)
            ),
            LogicalPlan::AsofJoin {
                outer,
                condition,
                tolerance,
                output,
                left,
                right,
            } => {
                let mut s = format!(
                    "SELECT {} FROM {} ASOF {}JOIN {} ON {condition}",
                    render_output(output),
                    left.from_item(LEFT_ALIAS),
                    if *outer { "LEFT " } else { "" },
                    right.from_item(RIGHT_ALIAS)
                );
                if let Some(t) = tolerance {
                    s.push_str(&format!(" WHERE {t}"));
                }
                s
            }
            LogicalPlan::Aggregate {
                keys,
                aggs,
                filters,
                having,
                input,
            } => {
                let items = keys
                    .iter()
                    .chain(aggs.iter())
                    .map(|(e, name)| select_item(e.sql(), name))
                    .collect::<Vec<_>>();
                let mut s = format!("SELECT {} FROM {}", items.join(", "), input.from_item(INPUT_ALIAS));
                if !filters.is_empty() {
                    s.push_str(" WHERE ");
                    s.push_str(&conjunction(filters.iter().map(TypedExpr::sql)));
                }
                if !keys.is_empty() {
                    s.push_str(" GROUP BY ");
                    s.push_str(&keys.iter().map(|(e, _)| e.sql()).collect::<Vec<_>>().join(", "));
                }
                if !having.is_empty() {
                    s.push_str(" HAVING ");
                    s.push_str(&conjunction(having.iter().map(String::as_str)));
                }
                s
            }
        }
    }

    /// Render as a `FROM` item under `alias`. Table and scan sources are referenced directly.
    fn from_item(&self, alias: &str) -> String {
        let alias = quote_ident(alias);
        match self {
            LogicalPlan::Source(Source::Table(name)) => {
                format!("{} AS {alias}", Source::table_sql(name))
            }
            LogicalPlan::Source(Source::Scan(scan)) => format!("{} AS {alias}", scan.to_sql()),
            other => format!("({}) AS {alias}", other.to_sql()),
        }
    }

    /// Short node name, used by explain output and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LogicalPlan::Source(_) => "Source",
            LogicalPlan::Projection { .. } => "Projection",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::Distinct { .. } => "Distinct",
            LogicalPlan::Union { .. } => "Union",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::AsofJoin { .. } => "AsofJoin",
            LogicalPlan::Aggregate { .. } => "Aggregate",
        }
    }
}

fn render_output(output: &[OutputItem]) -> String {
    output
        .iter()
        .map(|(sql, name)| select_item(sql, name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn conjunction<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    let parts = parts.collect::<Vec<_>>();
    if parts.len() == 1 {
        parts[0].to_string()
    } else {
        parts
            .iter()
            .map(|p| format!("({p})"))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;

    #[test]
    fn unary_nodes_nest_their_input_as_a_derived_table() {
        let plan = LogicalPlan::Filter {
            predicate: col("id").gt(&crate::expr::lit(1)).expect("gt"),
            input: Box::new(LogicalPlan::Source(Source::Table("main.orders".to_string()))),
        };
        assert_eq!(
            plan.to_sql(),
            "SELECT * FROM \"main\".\"orders\" AS \"_input\" WHERE (\"id\" > 1)"
        );

        let limited = LogicalPlan::Limit {
            n: 5,
            offset: 10,
            input: Box::new(plan),
        };
        let sql = limited.to_sql();
        assert!(sql.starts_with("SELECT * FROM (SELECT * FROM \"main\".\"orders\""), "{sql}");
        assert!(sql.ends_with("LIMIT 5 OFFSET 10"), "{sql}");
    }

    #[test]
    fn scan_sources_render_named_options() {
        let scan = ScanSource::new("read_csv", "/tmp/it's.csv")
            .option("delim", "','")
            .option("header", "true");
        assert_eq!(
            scan.to_sql(),
            "read_csv('/tmp/it''s.csv', delim = ',', header = true)"
        );
    }
}
