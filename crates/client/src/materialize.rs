//! Materialization strategies and the caller-owned registry that names them.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use arrow::record_batch::RecordBatch;
use trel_common::Result;
use trel_planner::sql::{quote_ident, quote_str};
use trel_planner::Relation;
use trel_storage::FileFormat;

use crate::session::Session;

/// What a strategy produced.
#[derive(Debug, Clone)]
pub enum Materialized {
    Batches(Vec<RecordBatch>),
    Table(String),
    View(String),
    File(PathBuf),
}

/// Turns a relation into something outside the pipeline: rows in memory, an engine object or
/// a file.
pub trait MaterializeStrategy: Send + Sync {
    /// Registry key.
    fn name(&self) -> &str;

    /// `target` names the table, view or file to produce; strategies that need none ignore it.
    fn materialize(&self, session: &Session, relation: &Relation, target: &str)
        -> Result<Materialized>;
}

/// Collects the relation's rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStrategy;

impl MaterializeStrategy for MemoryStrategy {
    fn name(&self) -> &str {
        "memory"
    }

    fn materialize(&self, session: &Session, relation: &Relation, _target: &str) -> Result<Materialized> {
        session.collect(relation).map(Materialized::Batches)
    }
}

/// `CREATE [OR REPLACE] TABLE target AS <relation>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableStrategy {
    pub replace: bool,
}

impl MaterializeStrategy for TableStrategy {
    fn name(&self) -> &str {
        if self.replace {
            "table_replace"
        } else {
            "table"
        }
    }

    fn materialize(&self, session: &Session, relation: &Relation, target: &str) -> Result<Materialized> {
        let sql = format!(
            "CREATE {}TABLE {} AS {}",
            if self.replace { "OR REPLACE " } else { "" },
            qualified(target),
            relation.sql()
        );
        session.run(&sql)?;
        Ok(Materialized::Table(target.to_string()))
    }
}

/// `CREATE OR REPLACE VIEW target AS <relation>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewStrategy;

impl MaterializeStrategy for ViewStrategy {
    fn name(&self) -> &str {
        "view"
    }

    fn materialize(&self, session: &Session, relation: &Relation, target: &str) -> Result<Materialized> {
        session.run(&format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            qualified(target),
            relation.sql()
        ))?;
        Ok(Materialized::View(target.to_string()))
    }
}

/// `COPY (<relation>) TO 'target' (FORMAT ..., ...)`, written by the engine.
#[derive(Debug, Clone)]
pub struct FileStrategy {
    name: String,
    format: FileFormat,
    options: Vec<(String, String)>,
}

impl FileStrategy {
    pub fn new(format: FileFormat) -> Self {
        let options = match format {
            FileFormat::Csv => vec![("HEADER".to_string(), "true".to_string())],
            FileFormat::Parquet => vec![("COMPRESSION".to_string(), quote_str("snappy"))],
            FileFormat::Json => Vec::new(),
        };
        Self {
            name: format!("{format}_file"),
            format,
            options,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Extra `COPY` option, rendered as given.
    pub fn option(mut self, key: impl Into<String>, rendered: impl Into<String>) -> Self {
        let key = key.into();
        self.options.retain(|(k, _)| !k.eq_ignore_ascii_case(&key));
        self.options.push((key, rendered.into()));
        self
    }

    pub fn copy_sql(&self, relation: &Relation, target: &str) -> String {
        let mut opts = vec![format!("FORMAT {}", self.format)];
        opts.extend(self.options.iter().map(|(k, v)| format!("{k} {v}")));
        format!(
            "COPY ({}) TO {} ({})",
            relation.sql(),
            quote_str(target),
            opts.join(", ")
        )
    }
}

impl MaterializeStrategy for FileStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, session: &Session, relation: &Relation, target: &str) -> Result<Materialized> {
        session.run(&self.copy_sql(relation, target))?;
        Ok(Materialized::File(PathBuf::from(target)))
    }
}

/// Named strategies, owned by whoever builds the pipeline.
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Box<dyn MaterializeStrategy>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding memory, table, table_replace, view and one file strategy per format.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(MemoryStrategy));
        registry.register(Box::new(TableStrategy { replace: false }));
        registry.register(Box::new(TableStrategy { replace: true }));
        registry.register(Box::new(ViewStrategy));
        for format in [FileFormat::Csv, FileFormat::Json, FileFormat::Parquet] {
            registry.register(Box::new(FileStrategy::new(format)));
        }
        registry
    }

    /// Register or replace a strategy under its name.
    ///
    /// Returns `true` when an existing strategy with the same name was replaced.
    pub fn register(&mut self, strategy: Box<dyn MaterializeStrategy>) -> bool {
        self.strategies
            .insert(strategy.name().to_string(), strategy)
            .is_some()
    }

    pub fn deregister(&mut self, name: &str) -> bool {
        self.strategies.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&dyn MaterializeStrategy> {
        self.strategies.get(name).map(|s| s.as_ref())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names = self.strategies.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}

fn qualified(name: &str) -> String {
    name.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}
