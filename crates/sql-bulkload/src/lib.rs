//! # sql-bulkload
//!
//! Dialect-aware table creation and chunked bulk loading for SQL Server,
//! PostgreSQL and MySQL.
//!
//! This library provides:
//!
//! - **Column name mapping** from arbitrary source headers to unique SQL identifiers
//! - **Type inference** from a bounded sample of a tabular source
//! - **Dialect rule tables** rendering quoted DDL/DML per database
//! - **Chunked bulk inserts** using PostgreSQL COPY or multi-row INSERT batches
//! - **Repositories** with auto-commit or explicit transaction scopes
//! - **Alias routing** over several configured targets
//!
//! ## Example
//!
//! ```rust,no_run
//! use sql_bulkload::{Config, CsvSource, LoadOptions, RepositoryRouter};
//!
//! #[tokio::main]
//! async fn main() -> sql_bulkload::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let router = RepositoryRouter::from_config(&config)?;
//!     let repo = router.for_alias("hr")?;
//!
//!     let mut csv = CsvSource::open("people.csv")?;
//!     let report = repo
//!         .load(&mut csv, Some("dbo"), Some("people"), &LoadOptions::default())
//!         .await?;
//!     println!("Loaded {} rows", report.rows_inserted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod dialect;
pub mod drivers;
pub mod error;
pub mod repository;
pub mod source;
pub mod typemap;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, LoaderConfig};
pub use core::{
    build_mapping, sanitize, Chunk, ColumnNameMapping, ColumnType, Connection, ConnectionSource,
    Row, SourceColumn, SqlKind, TableIdentity, TableSpec, TabularSource, TextLength, TextUnit,
    UnitOfWork, Value, ValueKind,
};
pub use dialect::{Dialect, DialectKind, Operation, SelectOptions, Statement};
pub use drivers::ConnectionProvider;
pub use error::{LoadError, Result};
pub use repository::{
    AutoCommit, BulkInsertOptions, ColumnNaming, CreateTableOptions, LoadOptions, LoadReport,
    Repository, RepositoryRouter, TransactionScope,
};
pub use source::{CsvOptions, CsvSource, MemoryTable};
pub use typemap::infer_types;
