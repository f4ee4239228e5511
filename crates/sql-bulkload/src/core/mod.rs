//! Core abstractions shared by the loader.
//!
//! - [`identifier`]: column-name sanitizing, identifier validation and quoting
//! - [`schema`]: column type and table descriptors
//! - [`value`]: SQL values, result rows and source chunks
//! - [`traits`]: tabular source, connection and unit-of-work traits

pub mod identifier;
pub mod schema;
pub mod traits;
pub mod value;

pub use identifier::{build_mapping, sanitize, ColumnNameMapping};
pub use schema::{ColumnType, SqlKind, TableIdentity, TableSpec, TextLength, TextUnit};
pub use traits::{ChunkIter, Connection, ConnectionSource, TabularSource, UnitOfWork};
pub use value::{Chunk, Row, SourceColumn, Value, ValueKind};
