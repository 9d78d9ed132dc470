//! File formats, target scanning and the append policy engine.
//!
//! Architecture role:
//! - turns file paths into engine scan sources and arrow schemas for file reads
//! - plans and performs appends of arrow batches into CSV, JSON-lines and parquet targets
//!
//! Key modules:
//! - [`append`]
//! - [`policy`]
//! - [`scanner`]
//! - [`sidecar`]
//!
//! Feature flags:
//! - `parquet`: parquet scanning and writing (enabled by default)

pub mod append;
pub mod atomic;
pub mod format;
pub mod infer;
pub mod plan;
pub mod policy;
pub mod scanner;
pub mod sidecar;

pub use append::{series_path, AppendEngine, NULL_PARTITION};
pub use format::FileFormat;
pub use infer::{infer_schema, inferred_schema_ref, read_batches};
pub use plan::{AppendAction, AppendPlan};
pub use policy::{AppendOptions, DedupePolicy, PartitionMode, PartitionSpec, RolloverPolicy};
pub use scanner::{CsvScanner, JsonScanner, ParquetScanner, TargetScanner};
pub use sidecar::CsvSidecar;
