//! Per-relation schema cache: ordered column definitions keyed case-insensitively.

use std::collections::HashMap;
use std::fmt;

use arrow_schema::{DataType, Schema};
use trel_common::{MissingColumn, Result, TrelError};

use crate::types::EngineType;

/// One column of a relation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    name: String,
    engine_type: EngineType,
    language_type: Option<DataType>,
}

impl ColumnDefinition {
    /// Column whose language-level type is derived from the engine type.
    pub fn new(name: impl Into<String>, engine_type: EngineType) -> Self {
        let language_type = engine_type.to_arrow();
        Self {
            name: name.into(),
            engine_type,
            language_type,
        }
    }

    /// Column with an explicit language-level (arrow) annotation.
    pub fn with_language_type(
        name: impl Into<String>,
        engine_type: EngineType,
        language_type: Option<DataType>,
    ) -> Self {
        Self {
            name: name.into(),
            engine_type,
            language_type,
        }
    }

    /// Column described by an arrow field, as produced by file readers.
    pub fn from_arrow(name: impl Into<String>, data_type: &DataType) -> Self {
        Self {
            name: name.into(),
            engine_type: EngineType::from_arrow(data_type),
            language_type: Some(data_type.clone()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine_type(&self) -> &EngineType {
        &self.engine_type
    }

    pub fn language_type(&self) -> Option<&DataType> {
        self.language_type.as_ref()
    }

    /// Same definition under a new name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

pub(crate) fn fold(name: &str) -> String {
    name.to_lowercase()
}

/// Ordered mapping of column definitions, keyed case-insensitively.
///
/// Insertion order is preserved so projections render deterministically. No two definitions
/// share a case-folded name.
#[derive(Debug, Clone, Default)]
pub struct SchemaCache {
    columns: Vec<ColumnDefinition>,
    index: HashMap<String, usize>,
}

impl PartialEq for SchemaCache {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for SchemaCache {}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an ordered column listing, rejecting case-insensitive duplicates.
    pub fn try_from_columns(columns: impl IntoIterator<Item = ColumnDefinition>) -> Result<Self> {
        let mut out = Self::new();
        let mut dups = Vec::new();
        for c in columns {
            if out.contains(c.name()) {
                dups.push(c.name().to_string());
                continue;
            }
            out.push_unchecked(c);
        }
        if !dups.is_empty() {
            return Err(TrelError::name_conflict("schema", dups));
        }
        Ok(out)
    }

    /// Schema cache for an arrow schema, e.g. one inferred from a file.
    pub fn from_arrow(schema: &Schema) -> Result<Self> {
        Self::try_from_columns(
            schema
                .fields()
                .iter()
                .map(|f| ColumnDefinition::from_arrow(f.name(), f.data_type())),
        )
    }

    fn push_unchecked(&mut self, column: ColumnDefinition) {
        self.index.insert(fold(column.name()), self.columns.len());
        self.columns.push(column);
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(&fold(name))
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(&fold(name)).copied()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDefinition> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    /// Look up a column, failing with `MissingColumns` for `operation`.
    pub fn require(&self, operation: &str, name: &str) -> Result<&ColumnDefinition> {
        self.get(name).ok_or_else(|| TrelError::MissingColumns {
            operation: operation.to_string(),
            missing: vec![MissingColumn {
                expression: name.to_string(),
                column: name.to_string(),
            }],
        })
    }

    /// New cache with `column` appended, or replacing the same-named column in place.
    pub fn with_column(&self, column: ColumnDefinition) -> Self {
        let mut out = self.clone();
        match out.index_of(column.name()) {
            Some(i) => {
                out.index.remove(&fold(out.columns[i].name()));
                out.index.insert(fold(column.name()), i);
                out.columns[i] = column;
            }
            None => out.push_unchecked(column),
        }
        out
    }

    /// Arrow schema for the columns whose language type is known.
    pub fn to_arrow(&self) -> Schema {
        Schema::new(
            self.columns
                .iter()
                .map(|c| {
                    arrow_schema::Field::new(
                        c.name(),
                        c.language_type().cloned().unwrap_or(DataType::Null),
                        true,
                    )
                })
                .collect::<Vec<_>>(),
        )
    }
}

impl fmt::Display for SchemaCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", c.name(), c.engine_type())?;
        }
        f.write_str("}")
    }
}
