//! Error types for the bulk-loading library.

use thiserror::Error;

/// Main error type for repository and loader operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (missing schema/table, invalid YAML, bad URL, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Router has no repository registered under this alias
    #[error("Unknown database alias '{alias}' (configured: {available})")]
    UnknownAlias { alias: String, available: String },

    /// The active dialect has no rendering rule for the requested operation
    #[error("Operation '{operation}' is not supported by the {dialect} dialect")]
    UnsupportedDialectOperation {
        dialect: &'static str,
        operation: &'static str,
    },

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// SQL Server driver error
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// PostgreSQL driver error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// A database operation failed; carries the operation name and target
    #[error("{operation} failed on {target} ({dialect}): {source}")]
    Operation {
        operation: &'static str,
        dialect: &'static str,
        target: String,
        #[source]
        source: Box<LoadError>,
    },

    /// A chunk failed during a bulk insert; earlier chunks stay committed
    #[error("Bulk insert into {target} stopped after {rows_inserted} rows ({chunks_committed} chunks committed): {source}")]
    PartialLoad {
        target: String,
        rows_inserted: u64,
        chunks_committed: usize,
        #[source]
        source: Box<LoadError>,
    },

    /// A transaction scope was used after commit or rollback
    #[error("Transaction scope is already closed")]
    TransactionClosed,

    /// Tabular source produced inconsistent data
    #[error("Source error: {0}")]
    Source(String),

    /// CSV reader error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Connection URL could not be parsed
    #[error("Invalid connection URL: {0}")]
    Url(#[from] url::ParseError),
}

impl LoadError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        LoadError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create an UnsupportedDialectOperation error
    pub fn unsupported(dialect: &'static str, operation: &'static str) -> Self {
        LoadError::UnsupportedDialectOperation { dialect, operation }
    }

    /// Wrap this error with the operation and target it happened in.
    ///
    /// Configuration and capability errors are returned unchanged since they
    /// already name what went wrong.
    pub fn during(self, operation: &'static str, dialect: &'static str, target: impl Into<String>) -> Self {
        match self {
            e @ (LoadError::Config(_)
            | LoadError::UnknownAlias { .. }
            | LoadError::UnsupportedDialectOperation { .. }
            | LoadError::Operation { .. }
            | LoadError::PartialLoad { .. }) => e,
            other => LoadError::Operation {
                operation,
                dialect,
                target: target.into(),
                source: Box::new(other),
            },
        }
    }

    /// Rows committed before the failure, for partial bulk loads.
    pub fn rows_inserted(&self) -> Option<u64> {
        match self {
            LoadError::PartialLoad { rows_inserted, .. } => Some(*rows_inserted),
            _ => None,
        }
    }

    /// Process exit code for this error category.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_)
            | LoadError::UnknownAlias { .. }
            | LoadError::Yaml(_)
            | LoadError::Url(_) => 1,
            LoadError::Pool { .. } => 2,
            LoadError::Mssql(_)
            | LoadError::Postgres(_)
            | LoadError::Mysql(_)
            | LoadError::TransactionClosed => 3,
            LoadError::Operation { source, .. } => source.exit_code(),
            LoadError::PartialLoad { .. } => 4,
            LoadError::UnsupportedDialectOperation { .. } => 5,
            LoadError::Source(_) | LoadError::Csv(_) | LoadError::Json(_) => 6,
            LoadError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for loader operations.
pub type Result<T> = std::result::Result<T, LoadError>;
