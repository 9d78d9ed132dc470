//! Shared configuration, error types and identifiers for trel crates.
//!
//! Architecture role:
//! - defines session configuration passed across layers
//! - provides common [`TrelError`] / [`Result`] contracts
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]

pub mod config;
pub mod error;
pub mod ids;

pub use config::{CsvDialect, SessionConfig};
pub use error::{MissingColumn, Result, TrelError};
pub use ids::ConnectionId;
