//! Sessions over an embedded SQL engine: relation constructors, appends and materialization.
//!
//! Architecture role:
//! - owns the engine collaborator and the connection relations observe
//! - bridges the relation algebra (`trel-planner`) and file targets (`trel-storage`)
//!
//! Key modules:
//! - [`session`]
//! - [`materialize`]
//! - [`engine`]

pub mod engine;
pub mod materialize;
pub mod session;

pub use engine::SqlEngine;
pub use materialize::{
    FileStrategy, MaterializeStrategy, Materialized, MemoryStrategy, StrategyRegistry,
    TableStrategy, ViewStrategy,
};
pub use session::{partition_by_expression, Session, PARTITION_COLUMN};

pub use trel_planner::*;
pub use trel_storage::{
    AppendAction, AppendOptions, AppendPlan, DedupePolicy, FileFormat, PartitionMode,
    PartitionSpec, RolloverPolicy,
};
