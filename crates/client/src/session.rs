//! The single-owner engine session and the entry points that touch the engine or the
//! filesystem: relation constructors, collection, appends and materialization.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;
use tracing::{debug, info};
use trel_common::{CsvDialect, Result, SessionConfig, TrelError};
use trel_planner::sql::quote_ident;
use trel_planner::{
    ActiveSession, CollisionPolicy, Connection, ConnectionRef, Relation, SchemaCache, TypedExpr,
};
use trel_storage::{
    inferred_schema_ref, AppendEngine, AppendOptions, AppendPlan, FileFormat, PartitionMode,
    PartitionSpec, TargetScanner,
};

use crate::engine::SqlEngine;
use crate::materialize::{Materialized, StrategyRegistry};

/// Column that carries computed partition values through an append; never written.
pub const PARTITION_COLUMN: &str = "__trel_partition";

/// Owns one engine and the connection every relation built from it observes.
///
/// Relations keep only a weak reference to the connection. Once the session is closed or
/// dropped, every operation on them fails with `ConnectionUnavailable`.
pub struct Session {
    config: SessionConfig,
    engine: Box<dyn SqlEngine>,
    connection: Connection,
    appender: AppendEngine,
}

impl Session {
    pub fn new(engine: Box<dyn SqlEngine>, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let connection = Connection::open();
        info!(connection = %connection.id(), "session opened");
        Ok(Self {
            appender: AppendEngine::new(config.clone()),
            config,
            engine,
            connection,
        })
    }

    /// Use `scanner` instead of the built-in one when reading existing append targets.
    pub fn with_scanner(mut self, scanner: Box<dyn TargetScanner>) -> Self {
        let appender = std::mem::replace(&mut self.appender, AppendEngine::new(self.config.clone()));
        self.appender = appender.with_scanner(scanner);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Suffix collision policy using the configured `default_join_suffix`.
    pub fn suffix_collisions(&self) -> CollisionPolicy {
        CollisionPolicy::Suffix(self.config.default_join_suffix.clone())
    }

    pub fn connection(&self) -> ConnectionRef {
        self.connection.downgrade()
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    /// Mark the session active until the guard drops. A second `enter` fails fast.
    pub fn enter(&self) -> Result<ActiveSession> {
        self.connection.enter()
    }

    pub fn close(&self) {
        if self.connection.is_open() {
            info!(connection = %self.connection.id(), "session closed");
        }
        self.connection.close();
    }

    // -------------------------
    // Relation constructors
    // -------------------------

    /// Relation over a named engine table or view; dotted names are schema-qualified.
    pub fn table(&self, name: &str) -> Result<Relation> {
        self.ensure_open("table")?;
        let quoted = name.split('.').map(quote_ident).collect::<Vec<_>>().join(".");
        let schema = self.describe(&format!("SELECT * FROM {quoted}"))?;
        Relation::from_table(&self.connection(), name, schema)
    }

    /// Relation over a caller-supplied statement.
    pub fn query(&self, sql: &str) -> Result<Relation> {
        self.ensure_open("query")?;
        let schema = self.describe(sql)?;
        Relation::from_query(&self.connection(), sql, schema)
    }

    pub fn read_csv(&self, path: impl AsRef<Path>) -> Result<Relation> {
        self.read_csv_with(path, self.config.csv)
    }

    pub fn read_csv_with(&self, path: impl AsRef<Path>, dialect: CsvDialect) -> Result<Relation> {
        self.read_file(path.as_ref(), FileFormat::Csv, &dialect)
    }

    /// Relation over a newline-delimited JSON file.
    pub fn read_json(&self, path: impl AsRef<Path>) -> Result<Relation> {
        self.read_file(path.as_ref(), FileFormat::Json, &self.config.csv)
    }

    pub fn read_parquet(&self, path: impl AsRef<Path>) -> Result<Relation> {
        self.read_file(path.as_ref(), FileFormat::Parquet, &self.config.csv)
    }

    fn read_file(&self, path: &Path, format: FileFormat, dialect: &CsvDialect) -> Result<Relation> {
        self.ensure_open("read_file")?;
        let arrow = inferred_schema_ref(path, format, dialect, self.config.schema_infer_max_records)?;
        let schema = SchemaCache::from_arrow(&arrow)?;
        debug!(path = %path.display(), %format, columns = schema.len(), "file schema inferred");
        Relation::from_scan(&self.connection(), format.scan_source(path, dialect), schema)
    }

    fn describe(&self, sql: &str) -> Result<SchemaCache> {
        SchemaCache::try_from_columns(self.engine.describe(sql)?)
    }

    // -------------------------
    // Terminal operations
    // -------------------------

    /// Run the relation's statement and return its rows.
    pub fn collect(&self, relation: &Relation) -> Result<Vec<RecordBatch>> {
        self.check_relation(relation, "collect")?;
        let sql = relation.sql();
        debug!(connection = %self.connection.id(), %sql, "collect");
        self.engine.execute(&sql)
    }

    /// Plan an append of `relation` into `target` without writing anything.
    pub fn simulate_append(
        &self,
        relation: &Relation,
        target: impl AsRef<Path>,
        options: &AppendOptions,
    ) -> Result<AppendPlan> {
        let (schema, batches) = self.rows_for_append(relation, "simulate_append")?;
        self.appender
            .simulate(target.as_ref(), &schema, &batches, options)
    }

    /// Append `relation`'s rows to `target` according to `options`.
    pub fn append(
        &self,
        relation: &Relation,
        target: impl AsRef<Path>,
        options: &AppendOptions,
    ) -> Result<AppendPlan> {
        let (schema, batches) = self.rows_for_append(relation, "append")?;
        self.appender
            .execute(target.as_ref(), &schema, &batches, options)
    }

    fn rows_for_append(
        &self,
        relation: &Relation,
        operation: &str,
    ) -> Result<(SchemaRef, Vec<RecordBatch>)> {
        self.check_relation(relation, operation)?;
        let batches = self.engine.execute(&relation.sql())?;
        let schema = match batches.first() {
            Some(b) => b.schema(),
            None => Arc::new(relation.schema().to_arrow()),
        };
        Ok((schema, batches))
    }

    /// Materialize `relation` with the strategy registered under `strategy`.
    pub fn materialize(
        &self,
        registry: &StrategyRegistry,
        strategy: &str,
        relation: &Relation,
        target: &str,
    ) -> Result<Materialized> {
        self.check_relation(relation, "materialize")?;
        let s = registry.get(strategy).ok_or_else(|| {
            TrelError::InvalidConfig(format!(
                "no materialization strategy named '{strategy}' (known: {})",
                registry.names().join(", ")
            ))
        })?;
        info!(strategy, target, "materialize");
        s.materialize(self, relation, target)
    }

    /// Run a statement for its side effects; used by materialization strategies.
    pub fn run(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        self.ensure_open("run")?;
        debug!(connection = %self.connection.id(), %sql, "run");
        self.engine.execute(sql)
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        self.connection.downgrade().ensure_open(operation)
    }

    fn check_relation(&self, relation: &Relation, operation: &str) -> Result<()> {
        relation.connection().ensure_open(operation)?;
        if relation.connection().id() != self.connection.id() {
            return Err(TrelError::ConnectionUnavailable {
                operation: operation.to_string(),
                reason: format!(
                    "relation belongs to {}, not {}",
                    relation.connection().id(),
                    self.connection.id()
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connection", &self.connection.id())
            .field("open", &self.connection.is_open())
            .field("engine", &self.engine)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.connection.close();
    }
}

/// Add `expr` as a hidden partition column and return the spec that routes on it.
///
/// Directory names use `label`; the hidden column is stripped before rows are written.
pub fn partition_by_expression(
    relation: &Relation,
    expr: &TypedExpr,
    label: &str,
    mode: PartitionMode,
) -> Result<(Relation, PartitionSpec)> {
    if relation.schema().contains(PARTITION_COLUMN) {
        return Err(TrelError::name_conflict(
            "partition_by_expression",
            vec![PARTITION_COLUMN.to_string()],
        ));
    }
    let tagged = relation.add([expr.alias(PARTITION_COLUMN)])?;
    let spec = PartitionSpec {
        source: PARTITION_COLUMN.to_string(),
        mode,
        label: Some(label.to_string()),
        drop_source: true,
    };
    Ok((tagged, spec))
}
