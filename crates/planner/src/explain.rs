use crate::logical_plan::{LogicalPlan, Source};

/// Render logical plan as human-readable multiline text.
pub fn explain_logical(plan: &LogicalPlan) -> String {
    let mut s = String::new();
    fmt_plan(plan, 0, &mut s);
    s
}

fn fmt_plan(plan: &LogicalPlan, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    match plan {
        LogicalPlan::Source(source) => match source {
            Source::Table(name) => out.push_str(&format!("{pad}Source table={name}\n")),
            Source::Query(sql) => out.push_str(&format!("{pad}Source query={sql}\n")),
            Source::Scan(scan) => {
                out.push_str(&format!(
                    "{pad}Source scan={} path={}\n",
                    scan.function, scan.path
                ));
                for (k, v) in &scan.options {
                    out.push_str(&format!("{pad}  {k}={v}\n"));
                }
            }
        },
        LogicalPlan::Projection { exprs, input } => {
            out.push_str(&format!("{pad}Projection\n"));
            for (e, name) in exprs {
                out.push_str(&format!("{pad}  {name} := {} [{}]\n", e.sql(), e.result_type()));
            }
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Filter { predicate, input } => {
            out.push_str(&format!("{pad}Filter {}\n", predicate.sql()));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Sort { keys, input } => {
            out.push_str(&format!(
                "{pad}Sort {}\n",
                keys.iter().map(|k| k.to_sql()).collect::<Vec<_>>().join(", ")
            ));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Limit { n, offset, input } => {
            out.push_str(&format!("{pad}Limit n={n} offset={offset}\n"));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Distinct { input } => {
            out.push_str(&format!("{pad}Distinct\n"));
            fmt_plan(input, indent + 1, out);
        }
        LogicalPlan::Union {
            by_name,
            left,
            right,
        } => {
            out.push_str(&format!("{pad}UnionAll by_name={by_name}\n"));
            fmt_plan(left, indent + 1, out);
            fmt_plan(right, indent + 1, out);
        }
        LogicalPlan::Join {
            kind,
            condition,
            output,
            left,
            right,
        } => {
            out.push_str(&format!("{pad}Join type={kind:?}\n"));
            out.push_str(&format!("{pad}  on={condition}\n"));
            out.push_str(&format!("{pad}  output={}\n", output.len()));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_plan(left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_plan(right, indent + 2, out);
        }
        LogicalPlan::AsofJoin {
            outer,
            condition,
            tolerance,
            output,
            left,
            right,
        } => {
            out.push_str(&format!("{pad}AsofJoin outer={outer}\n"));
            out.push_str(&format!("{pad}  on={condition}\n"));
            if let Some(t) = tolerance {
                out.push_str(&format!("{pad}  tolerance={t}\n"));
            }
            out.push_str(&format!("{pad}  output={}\n", output.len()));
            out.push_str(&format!("{pad}  left:\n"));
            fmt_plan(left, indent + 2, out);
            out.push_str(&format!("{pad}  right:\n"));
            fmt_plan(right, indent + 2, out);
        }
        LogicalPlan::Aggregate {
            keys,
            aggs,
            filters,
            having,
            input,
        } => {
            out.push_str(&format!("{pad}Aggregate\n"));
            out.push_str(&format!("{pad}  group_by={}\n", keys.len()));
            for (k, name) in keys {
                out.push_str(&format!("{pad}    {name} := {}\n", k.sql()));
            }
            out.push_str(&format!("{pad}  aggs={}\n", aggs.len()));
            for (a, name) in aggs {
                out.push_str(&format!("{pad}    {name} := {}\n", a.sql()));
            }
            for f in filters {
                out.push_str(&format!("{pad}  where {}\n", f.sql()));
            }
            for h in having {
                out.push_str(&format!("{pad}  having {h}\n"));
            }
            fmt_plan(input, indent + 1, out);
        }
    }
}
