use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// One physical write produced by the append engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendAction {
    pub path: PathBuf,
    pub rows_to_append: u64,
    /// The file does not exist yet and is created by this action.
    pub created: bool,
    /// Partition identifier (`region=eu`, `bucket=3`) for partitioned targets.
    pub partition: Option<String>,
}

/// Result of simulating or executing an append. Never mutated after it is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppendPlan {
    pub actions: Vec<AppendAction>,
    pub notes: Vec<String>,
}

impl AppendPlan {
    pub fn total_rows(&self) -> u64 {
        self.actions.iter().map(|a| a.rows_to_append).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_rows() == 0
    }
}

impl fmt::Display for AppendPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "AppendPlan actions={} rows={}", self.actions.len(), self.total_rows())?;
        for a in &self.actions {
            write!(
                f,
                "  {} {} rows={}",
                if a.created { "create" } else { "append" },
                a.path.display(),
                a.rows_to_append
            )?;
            if let Some(p) = &a.partition {
                write!(f, " partition={p}")?;
            }
            writeln!(f)?;
        }
        for n in &self.notes {
            writeln!(f, "  note: {n}")?;
        }
        Ok(())
    }
}
