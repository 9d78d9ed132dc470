#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;
use trel_client::{ColumnDefinition, EngineType, Session, SqlEngine};
use trel_common::{Result, SessionConfig, TrelError};

#[derive(Debug, Default)]
struct FakeState {
    executed: Vec<String>,
    described: Vec<String>,
    relations: Vec<(String, Vec<ColumnDefinition>)>,
    results: VecDeque<Result<Vec<RecordBatch>>>,
}

/// Records every statement and answers from canned listings and results.
#[derive(Debug, Default, Clone)]
pub struct FakeEngine {
    state: Arc<Mutex<FakeState>>,
}

impl FakeEngine {
    /// Statements containing `needle` describe as `columns`.
    pub fn knows(&self, needle: &str, columns: Vec<ColumnDefinition>) -> &Self {
        self.state
            .lock()
            .expect("fake engine lock")
            .relations
            .push((needle.to_string(), columns));
        self
    }

    /// Next `execute` returns `batches`.
    pub fn respond(&self, batches: Vec<RecordBatch>) -> &Self {
        self.state
            .lock()
            .expect("fake engine lock")
            .results
            .push_back(Ok(batches));
        self
    }

    pub fn fail_next(&self, message: &str) -> &Self {
        self.state
            .lock()
            .expect("fake engine lock")
            .results
            .push_back(Err(TrelError::Engine(message.to_string())));
        self
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().expect("fake engine lock").executed.clone()
    }

    pub fn described(&self) -> Vec<String> {
        self.state.lock().expect("fake engine lock").described.clone()
    }
}

impl SqlEngine for FakeEngine {
    fn execute(&self, sql: &str) -> Result<Vec<RecordBatch>> {
        let mut state = self.state.lock().expect("fake engine lock");
        state.executed.push(sql.to_string());
        state.results.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn describe(&self, sql: &str) -> Result<Vec<ColumnDefinition>> {
        let mut state = self.state.lock().expect("fake engine lock");
        state.described.push(sql.to_string());
        state
            .relations
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, cols)| cols.clone())
            .ok_or_else(|| TrelError::Engine(format!("Catalog Error: cannot describe {sql}")))
    }
}

pub fn session_with(engine: &FakeEngine) -> Session {
    Session::new(Box::new(engine.clone()), SessionConfig::default()).expect("session")
}

pub fn orders_columns() -> Vec<ColumnDefinition> {
    vec![
        ColumnDefinition::new("id", EngineType::BigInt),
        ColumnDefinition::new("region", EngineType::Varchar),
        ColumnDefinition::new("amount", EngineType::BigInt),
    ]
}

pub fn orders_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("region", DataType::Utf8, true),
        Field::new("amount", DataType::Int64, false),
    ]))
}

pub fn orders(ids: &[i64], regions: &[&str], amounts: &[i64]) -> RecordBatch {
    RecordBatch::try_new(
        orders_schema(),
        vec![
            Arc::new(Int64Array::from(ids.to_vec())) as ArrayRef,
            Arc::new(StringArray::from(regions.to_vec())) as ArrayRef,
            Arc::new(Int64Array::from(amounts.to_vec())) as ArrayRef,
        ],
    )
    .expect("orders batch")
}

/// `orders` rows plus the hidden partition column, as the engine returns them.
pub fn orders_tagged(ids: &[i64], regions: &[&str], amounts: &[i64]) -> RecordBatch {
    let base = orders(ids, regions, amounts);
    let mut fields = base.schema().fields().iter().cloned().collect::<Vec<_>>();
    fields.push(Arc::new(Field::new(trel_client::PARTITION_COLUMN, DataType::Utf8, true)));
    let mut columns = base.columns().to_vec();
    columns.push(Arc::new(StringArray::from(regions.to_vec())));
    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("tagged batch")
}

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}

pub fn unique_dir(prefix: &str) -> PathBuf {
    let dir = unique_path(prefix, "d");
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

pub fn write_parquet(path: &Path, batch: &RecordBatch) {
    let file = File::create(path).expect("create parquet");
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).expect("writer");
    writer.write(batch).expect("write");
    writer.close().expect("close");
}
