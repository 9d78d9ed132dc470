use std::fmt;

use thiserror::Error;

/// A column name that could not be resolved, together with the expression that referenced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingColumn {
    /// Rendered form (or output name) of the expression holding the reference.
    pub expression: String,
    /// The unresolved column name, case preserved as written by the caller.
    pub column: String,
}

impl fmt::Display for MissingColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' (in {})", self.column, self.expression)
    }
}

/// Canonical error taxonomy shared by all trel crates.
///
/// Classification guidance:
/// - [`TrelError::MissingColumns`], [`TrelError::TypeMismatch`], [`TrelError::NameConflict`]:
///   structural problems found while building a relation, before any SQL reaches the engine
/// - [`TrelError::BuilderFinalized`]: caller misuse of the aggregate builder
/// - [`TrelError::InvalidConfig`]: policy/configuration contract violations, raised before any IO
/// - [`TrelError::ConnectionUnavailable`]: the session behind a relation is gone or busy
/// - [`TrelError::Engine`]: failures reported by the external engine, passed through as-is
/// - [`TrelError::Io`]: raw filesystem failures from std APIs
#[derive(Debug, Error)]
pub enum TrelError {
    /// One or more referenced columns do not exist. All offenders are collected.
    ///
    /// Soft (`*_if_exists`) relation operations recover from this condition by dropping the
    /// offending expressions; every other operation treats it as fatal.
    #[error("{operation}: missing columns {}", format_missing(.missing))]
    MissingColumns {
        operation: String,
        missing: Vec<MissingColumn>,
    },

    /// Two explicitly typed operands cannot be combined. Never silently coerced.
    #[error("{operation}: type mismatch between {left} and {right}")]
    TypeMismatch {
        operation: String,
        left: String,
        right: String,
    },

    /// An operation would produce duplicate output column names.
    #[error("{operation}: conflicting column names [{}]", .names.join(", "))]
    NameConflict {
        operation: String,
        names: Vec<String>,
    },

    /// Mutation attempted on an aggregate builder that already produced its relation.
    #[error("aggregate builder already finalized: cannot {operation}")]
    BuilderFinalized { operation: String },

    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - `key_columns` de-duplication without keys
    /// - rollover policy with neither threshold set
    /// - CSV target whose header does not match the appended relation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The owning session was closed, dropped, or is already active elsewhere.
    #[error("{operation}: connection unavailable ({reason})")]
    ConnectionUnavailable { operation: String, reason: String },

    /// Structural misuse not covered by the more specific variants.
    ///
    /// Examples:
    /// - window frame whose start bound lies after its end bound
    /// - `UNION ALL` of relations with different column counts
    /// - aggregate expression passed where a scalar expression is required
    #[error("planning error: {0}")]
    Planning(String),

    /// Failure reported by the external engine. Surfaced unchanged and never retried.
    #[error("engine error: {0}")]
    Engine(String),

    /// Arrow/parquet encode or decode failures while reading or writing targets.
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a feature that this build does not provide.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl TrelError {
    /// Shorthand for a [`TrelError::TypeMismatch`].
    pub fn type_mismatch(
        operation: impl Into<String>,
        left: impl fmt::Display,
        right: impl fmt::Display,
    ) -> Self {
        Self::TypeMismatch {
            operation: operation.into(),
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    /// Shorthand for a [`TrelError::NameConflict`].
    pub fn name_conflict(operation: impl Into<String>, names: Vec<String>) -> Self {
        Self::NameConflict {
            operation: operation.into(),
            names,
        }
    }

    /// True for the condition soft relation operations are allowed to recover from.
    pub fn is_missing_columns(&self) -> bool {
        matches!(self, Self::MissingColumns { .. })
    }

    /// Offending columns of a [`TrelError::MissingColumns`]; empty for any other variant.
    pub fn missing_columns(&self) -> &[MissingColumn] {
        match self {
            Self::MissingColumns { missing, .. } => missing,
            _ => &[],
        }
    }
}

fn format_missing(missing: &[MissingColumn]) -> String {
    missing
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Standard trel result alias.
pub type Result<T> = std::result::Result<T, TrelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_columns_message_names_every_offender() {
        let err = TrelError::MissingColumns {
            operation: "keep".to_string(),
            missing: vec![
                MissingColumn {
                    expression: "missing".to_string(),
                    column: "missing".to_string(),
                },
                MissingColumn {
                    expression: "(\"a\" + \"b\")".to_string(),
                    column: "b".to_string(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("keep: missing columns"), "msg={msg}");
        assert!(msg.contains("'missing'"), "msg={msg}");
        assert!(msg.contains("'b' (in (\"a\" + \"b\"))"), "msg={msg}");
        assert!(err.is_missing_columns());
        assert_eq!(err.missing_columns().len(), 2);
    }

    #[test]
    fn io_errors_convert_transparently() {
        let err: TrelError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, TrelError::Io(_)));
        assert!(err.missing_columns().is_empty());
    }
}
