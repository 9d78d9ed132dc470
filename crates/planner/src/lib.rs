//! Typed query construction: schema cache, typed expressions, dependency validation and the
//! immutable relation algebra rendered to engine SQL.

pub mod aggregate;
pub mod connection;
pub mod explain;
pub mod expr;
pub mod join;
pub mod logical_plan;
pub mod relation;
pub mod schema;
pub mod sql;
pub mod types;
pub mod validator;

pub use aggregate::AggregateBuilder;
pub use connection::{ActiveSession, Connection, ConnectionRef};
pub use explain::explain_logical;
pub use expr::*;
pub use join::{left_col, right_col, AsofDirection, AsofJoin, CollisionPolicy, JoinOn};
pub use logical_plan::{JoinKind, LogicalPlan, ScanSource, Source};
pub use relation::Relation;
pub use schema::{ColumnDefinition, SchemaCache};
pub use types::{EngineType, TypeCategory};
pub use validator::{partition_resolvable, validate, ValidationResult};
