use std::fmt::Debug;

use arrow::record_batch::RecordBatch;
use trel_common::Result;
use trel_planner::ColumnDefinition;

/// The embedded relational engine behind a [`crate::Session`].
///
/// Implementations report their own failures as [`trel_common::TrelError::Engine`]; sessions
/// pass them through unchanged and never retry.
pub trait SqlEngine: Send + Sync + Debug {
    /// Run `sql` to completion and return every result batch.
    fn execute(&self, sql: &str) -> Result<Vec<RecordBatch>>;

    /// Column listing of the statement's result, in output order.
    fn describe(&self, sql: &str) -> Result<Vec<ColumnDefinition>>;
}
