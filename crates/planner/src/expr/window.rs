use std::collections::BTreeSet;

use trel_common::{Result, TrelError};

use super::{ExprFlags, SortExpr, TypedExpr};
use crate::types::EngineType;

/// Frame unit of a window frame clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameUnits {
    Rows,
    Range,
}

/// One end of a window frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBound {
    UnboundedPreceding,
    Preceding(u64),
    CurrentRow,
    Following(u64),
    UnboundedFollowing,
}

impl FrameBound {
    // Position on a line running from the start of the partition to its end.
    fn position(self) -> i128 {
        match self {
            FrameBound::UnboundedPreceding => i128::MIN,
            FrameBound::Preceding(n) => -(n as i128),
            FrameBound::CurrentRow => 0,
            FrameBound::Following(n) => n as i128,
            FrameBound::UnboundedFollowing => i128::MAX,
        }
    }

    fn to_sql(self) -> String {
        match self {
            FrameBound::UnboundedPreceding => "UNBOUNDED PRECEDING".to_string(),
            FrameBound::Preceding(n) => format!("{n} PRECEDING"),
            FrameBound::CurrentRow => "CURRENT ROW".to_string(),
            FrameBound::Following(n) => format!("{n} FOLLOWING"),
            FrameBound::UnboundedFollowing => "UNBOUNDED FOLLOWING".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrame {
    pub units: FrameUnits,
    pub start: FrameBound,
    pub end: FrameBound,
}

impl WindowFrame {
    pub fn rows(start: FrameBound, end: FrameBound) -> Self {
        Self {
            units: FrameUnits::Rows,
            start,
            end,
        }
    }

    pub fn range(start: FrameBound, end: FrameBound) -> Self {
        Self {
            units: FrameUnits::Range,
            start,
            end,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.start == FrameBound::UnboundedFollowing {
            return Err(TrelError::Planning(
                "window frame cannot start at UNBOUNDED FOLLOWING".to_string(),
            ));
        }
        if self.end == FrameBound::UnboundedPreceding {
            return Err(TrelError::Planning(
                "window frame cannot end at UNBOUNDED PRECEDING".to_string(),
            ));
        }
        if self.start.position() > self.end.position() {
            return Err(TrelError::Planning(format!(
                "window frame start {} lies after end {}",
                self.start.to_sql(),
                self.end.to_sql()
            )));
        }
        Ok(())
    }

    fn to_sql(self) -> String {
        let units = match self.units {
            FrameUnits::Rows => "ROWS",
            FrameUnits::Range => "RANGE",
        };
        format!(
            "{units} BETWEEN {} AND {}",
            self.start.to_sql(),
            self.end.to_sql()
        )
    }
}

/// `OVER (...)` specification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Window {
    partition_by: Vec<TypedExpr>,
    order_by: Vec<SortExpr>,
    frame: Option<WindowFrame>,
}

impl Window {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn partition_by<I, E>(mut self, exprs: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<TypedExpr>,
    {
        self.partition_by.extend(exprs.into_iter().map(Into::into));
        self
    }

    pub fn order_by<I, E>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<SortExpr>,
    {
        self.order_by.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn frame(mut self, frame: WindowFrame) -> Self {
        self.frame = Some(frame);
        self
    }

    pub(crate) fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        for p in &self.partition_by {
            deps.extend(p.dependencies().iter().cloned());
        }
        for o in &self.order_by {
            deps.extend(o.expr.dependencies().iter().cloned());
        }
        deps
    }

    pub(crate) fn render(&self) -> Result<String> {
        let mut parts = Vec::new();
        for p in &self.partition_by {
            if p.is_aggregate() || p.is_window() {
                return Err(TrelError::Planning(format!(
                    "PARTITION BY cannot contain aggregate or window expressions: {}",
                    p.sql()
                )));
            }
        }
        if !self.partition_by.is_empty() {
            parts.push(format!(
                "PARTITION BY {}",
                self.partition_by
                    .iter()
                    .map(|p| p.sql())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if !self.order_by.is_empty() {
            parts.push(format!(
                "ORDER BY {}",
                self.order_by
                    .iter()
                    .map(SortExpr::to_sql)
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        if let Some(frame) = &self.frame {
            frame.validate()?;
            parts.push(frame.to_sql());
        }
        Ok(parts.join(" "))
    }
}

fn window_function(name: &str, args: &[TypedExpr], ty: EngineType) -> TypedExpr {
    TypedExpr::call(
        name,
        args,
        ty,
        ExprFlags {
            pending_window: true,
            windowable: true,
            ..ExprFlags::default()
        },
    )
}

pub fn row_number() -> TypedExpr {
    window_function("row_number", &[], EngineType::BigInt)
}

pub fn rank() -> TypedExpr {
    window_function("rank", &[], EngineType::BigInt)
}

pub fn dense_rank() -> TypedExpr {
    window_function("dense_rank", &[], EngineType::BigInt)
}

/// `lag(expr, offset[, default])`.
pub fn lag(expr: &TypedExpr, offset: u64, default: Option<&TypedExpr>) -> TypedExpr {
    shift("lag", expr, offset, default)
}

/// `lead(expr, offset[, default])`.
pub fn lead(expr: &TypedExpr, offset: u64, default: Option<&TypedExpr>) -> TypedExpr {
    shift("lead", expr, offset, default)
}

fn shift(name: &str, expr: &TypedExpr, offset: u64, default: Option<&TypedExpr>) -> TypedExpr {
    let mut args = vec![expr.clone(), super::lit(offset as i64)];
    args.extend(default.cloned());
    window_function(name, &args, expr.result_type().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::col;

    #[test]
    fn frames_render_and_validate() {
        let w = Window::new()
            .order_by(["ts"])
            .frame(WindowFrame::rows(FrameBound::Preceding(2), FrameBound::CurrentRow));
        let e = col("v").list().over(&w).expect("framed");
        assert!(
            e.sql().ends_with("OVER (ORDER BY \"ts\" ASC ROWS BETWEEN 2 PRECEDING AND CURRENT ROW)"),
            "sql={}",
            e.sql()
        );

        let backwards = Window::new().frame(WindowFrame::range(
            FrameBound::Following(1),
            FrameBound::Preceding(1),
        ));
        assert!(row_number().over(&backwards).is_err());
        let bad_start = Window::new().frame(WindowFrame::rows(
            FrameBound::UnboundedFollowing,
            FrameBound::UnboundedFollowing,
        ));
        assert!(row_number().over(&bad_start).is_err());
    }

    #[test]
    fn window_functions_need_over_and_keep_argument_types() {
        let prev = lag(&col("price"), 1, None);
        assert!(prev.needs_over());
        assert_eq!(prev.sql(), "lag(\"price\", 1)");
        let framed = prev
            .over(&Window::new().partition_by(["sym"]).order_by(["ts"]))
            .expect("over");
        assert!(!framed.needs_over());
        let deps: Vec<&str> = framed.dependencies().iter().map(|s| s.as_str()).collect();
        assert_eq!(deps, vec!["price", "sym", "ts"]);
    }
}
