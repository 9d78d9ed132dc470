//! Append policies: de-duplication, partition routing and file rollover.
//!
//! Every policy is validated against the source schema before the engine touches the
//! filesystem, so a bad configuration never leaves a half-written target behind.

use arrow_schema::Schema;
use serde::{Deserialize, Serialize};
use trel_common::{Result, TrelError};

use crate::format::FileFormat;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "keys", rename_all = "snake_case")]
pub enum DedupePolicy {
    /// A row is a duplicate when every column matches an existing row.
    AllColumns,
    /// A row is a duplicate when the listed columns match an existing row.
    KeyColumns(Vec<String>),
}

impl DedupePolicy {
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        DedupePolicy::KeyColumns(keys.into_iter().map(Into::into).collect())
    }

    /// Indices of the compared columns in `schema`.
    pub fn key_indices(&self, schema: &Schema) -> Result<Vec<usize>> {
        match self {
            DedupePolicy::AllColumns => Ok((0..schema.fields().len()).collect()),
            DedupePolicy::KeyColumns(keys) => {
                if keys.is_empty() {
                    return Err(TrelError::InvalidConfig(
                        "key_columns de-duplication requires at least one key".to_string(),
                    ));
                }
                let mut missing = Vec::new();
                let mut out = Vec::with_capacity(keys.len());
                for key in keys {
                    match column_index(schema, key) {
                        Some(i) => out.push(i),
                        None => missing.push(key.as_str()),
                    }
                }
                if !missing.is_empty() {
                    return Err(TrelError::InvalidConfig(format!(
                        "de-duplication keys not in appended columns: {}",
                        missing.join(", ")
                    )));
                }
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PartitionMode {
    /// One partition per distinct value, named `<label>=<value>`.
    Column,
    /// Deterministic hash bucket of the value, named `bucket=<n>`.
    Hash { buckets: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// Column of the appended rows that drives routing.
    pub source: String,
    pub mode: PartitionMode,
    /// Name used in `<label>=<value>` directory names; defaults to `source`.
    #[serde(default)]
    pub label: Option<String>,
    /// Strip `source` from the written rows.
    #[serde(default)]
    pub drop_source: bool,
}

impl PartitionSpec {
    pub fn column(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            mode: PartitionMode::Column,
            label: None,
            drop_source: false,
        }
    }

    pub fn hash(source: impl Into<String>, buckets: u32) -> Self {
        Self {
            source: source.into(),
            mode: PartitionMode::Hash { buckets },
            label: None,
            drop_source: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn drop_source(mut self, drop: bool) -> Self {
        self.drop_source = drop;
        self
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.source)
    }

    pub fn source_index(&self, schema: &Schema) -> Result<usize> {
        column_index(schema, &self.source).ok_or_else(|| {
            TrelError::InvalidConfig(format!(
                "partition column '{}' not in appended columns",
                self.source
            ))
        })
    }

    fn validate(&self, schema: &Schema) -> Result<()> {
        if let PartitionMode::Hash { buckets: 0 } = self.mode {
            return Err(TrelError::InvalidConfig(
                "hash partitioning requires bucket_count > 0".to_string(),
            ));
        }
        if self.label.as_deref().is_some_and(str::is_empty) {
            return Err(TrelError::InvalidConfig(
                "partition label cannot be empty".to_string(),
            ));
        }
        self.source_index(schema)?;
        if self.drop_source && schema.fields().len() == 1 {
            return Err(TrelError::InvalidConfig(format!(
                "dropping partition column '{}' leaves nothing to write",
                self.source
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RolloverPolicy {
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

impl RolloverPolicy {
    pub fn rows(max_rows: u64) -> Self {
        Self {
            max_rows: Some(max_rows),
            max_size_bytes: None,
        }
    }

    pub fn size(max_size_bytes: u64) -> Self {
        Self {
            max_rows: None,
            max_size_bytes: Some(max_size_bytes),
        }
    }

    /// True when a file with `rows` rows and `bytes` bytes takes no more rows.
    pub fn is_full(&self, rows: u64, bytes: u64) -> bool {
        self.max_rows.is_some_and(|m| rows >= m) || self.max_size_bytes.is_some_and(|m| bytes >= m)
    }

    fn validate(&self) -> Result<()> {
        match (self.max_rows, self.max_size_bytes) {
            (None, None) => Err(TrelError::InvalidConfig(
                "rollover policy needs max_rows or max_size_bytes".to_string(),
            )),
            (Some(0), _) | (_, Some(0)) => Err(TrelError::InvalidConfig(
                "rollover thresholds must be greater than zero".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// Everything that shapes one append call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppendOptions {
    pub dedupe: Option<DedupePolicy>,
    pub partition: Option<PartitionSpec>,
    pub rollover: Option<RolloverPolicy>,
    /// Required for partitioned directories; otherwise detected from the target extension.
    pub format: Option<FileFormat>,
}

impl AppendOptions {
    pub fn dedupe(mut self, policy: DedupePolicy) -> Self {
        self.dedupe = Some(policy);
        self
    }

    pub fn partition(mut self, spec: PartitionSpec) -> Self {
        self.partition = Some(spec);
        self
    }

    pub fn rollover(mut self, policy: RolloverPolicy) -> Self {
        self.rollover = Some(policy);
        self
    }

    pub fn format(mut self, format: FileFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Check every policy against the appended rows' schema. Performs no IO.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        if let Some(partition) = &self.partition {
            partition.validate(schema)?;
            if self.format.is_none() {
                return Err(TrelError::InvalidConfig(
                    "partitioned targets need an explicit file format".to_string(),
                ));
            }
        }
        if let Some(dedupe) = &self.dedupe {
            let written = self.written_schema(schema)?;
            dedupe.key_indices(&written)?;
        }
        if let Some(rollover) = &self.rollover {
            rollover.validate()?;
        }
        Ok(())
    }

    /// Schema of the rows that reach the files, after an optional partition column drop.
    pub fn written_schema(&self, schema: &Schema) -> Result<Schema> {
        match &self.partition {
            Some(p) if p.drop_source => {
                let drop = p.source_index(schema)?;
                let fields = schema
                    .fields()
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != drop)
                    .map(|(_, f)| f.clone())
                    .collect::<Vec<_>>();
                Ok(Schema::new(fields))
            }
            _ => Ok(schema.clone()),
        }
    }
}

pub(crate) fn column_index(schema: &Schema, name: &str) -> Option<usize> {
    schema
        .fields()
        .iter()
        .position(|f| f.name() == name)
        .or_else(|| {
            schema
                .fields()
                .iter()
                .position(|f| f.name().eq_ignore_ascii_case(name))
        })
}

#[cfg(test)]
mod tests {
    use arrow_schema::{DataType, Field};

    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("region", DataType::Utf8, true),
        ])
    }

    #[test]
    fn key_dedupe_without_keys_fails_before_io() {
        let err = AppendOptions::default()
            .dedupe(DedupePolicy::KeyColumns(Vec::new()))
            .validate(&schema())
            .expect_err("no keys");
        assert!(matches!(err, TrelError::InvalidConfig(_)), "{err}");

        let err = AppendOptions::default()
            .dedupe(DedupePolicy::keys(["id", "nope"]))
            .validate(&schema())
            .expect_err("unknown key");
        assert!(err.to_string().contains("nope"), "{err}");

        assert_eq!(
            DedupePolicy::keys(["ID"]).key_indices(&schema()).expect("ci"),
            vec![0]
        );
    }

    #[test]
    fn rollover_and_partition_contracts() {
        let err = AppendOptions::default()
            .rollover(RolloverPolicy::default())
            .validate(&schema())
            .expect_err("no thresholds");
        assert!(err.to_string().contains("max_rows or max_size_bytes"), "{err}");

        let err = AppendOptions::default()
            .partition(PartitionSpec::hash("id", 0))
            .format(FileFormat::Csv)
            .validate(&schema())
            .expect_err("zero buckets");
        assert!(matches!(err, TrelError::InvalidConfig(_)));

        let err = AppendOptions::default()
            .partition(PartitionSpec::column("region"))
            .validate(&schema())
            .expect_err("format required");
        assert!(err.to_string().contains("explicit file format"), "{err}");

        let dropped = AppendOptions::default()
            .partition(PartitionSpec::column("region").drop_source(true))
            .dedupe(DedupePolicy::keys(["region"]))
            .format(FileFormat::Json)
            .validate(&schema())
            .expect_err("key dropped with the partition column");
        assert!(dropped.to_string().contains("region"), "{dropped}");
    }

    #[test]
    fn options_deserialize_from_json() {
        let opts: AppendOptions = serde_json::from_str(
            r#"{"dedupe": {"mode": "key_columns", "keys": ["id"]},
                "partition": {"source": "id", "mode": {"mode": "hash", "buckets": 4}},
                "rollover": {"max_rows": 10},
                "format": "parquet"}"#,
        )
        .expect("parse");
        assert_eq!(opts.dedupe, Some(DedupePolicy::keys(["id"])));
        assert_eq!(
            opts.partition.as_ref().map(|p| p.mode),
            Some(PartitionMode::Hash { buckets: 4 })
        );
        assert!(opts.rollover.expect("rollover").is_full(10, 0));
        assert!(opts.validate(&schema()).is_ok());
    }
}
