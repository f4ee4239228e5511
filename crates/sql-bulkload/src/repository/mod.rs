//! Repository façade over one database target.
//!
//! A [`Repository`] combines identifier mapping, type inference and the
//! dialect renderers on top of a [`UnitOfWork`]. The same type serves both
//! auto-committing use and explicit transactions:
//!
//! ```rust,ignore
//! let repo = Repository::new(provider).with_default_schema("dbo");
//! let mut csv = CsvSource::open("people.csv")?;
//! repo.create_table_from_source(&mut csv, None, Some("people"), &CreateTableOptions::default()).await?;
//! let rows = repo.bulk_insert(&mut csv, None, Some("people"), &BulkInsertOptions::default()).await?;
//!
//! repo.transaction(|tx| async move {
//!     tx.truncate(None, Some("people")).await?;
//!     tx.delete_where(None, Some("audit"), "created < @P1", vec![cutoff.into()]).await
//! })
//! .await?;
//! ```
//!
//! Schema and table arguments fall back to the repository's defaults; a
//! call with neither is a configuration error.

mod router;
mod unit_of_work;

pub use router::RepositoryRouter;
pub use unit_of_work::{AutoCommit, TransactionScope};

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::LoaderConfig;
use crate::core::identifier::{build_mapping, ColumnNameMapping};
use crate::core::schema::{TableIdentity, TableSpec};
use crate::core::traits::{ConnectionSource, TabularSource, UnitOfWork};
use crate::core::value::{Row, SourceColumn, Value};
use crate::dialect::{Dialect, SelectOptions, Statement};
use crate::error::{LoadError, Result};
use crate::typemap::infer_types;

/// How source column names become table column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnNaming {
    /// Prefix, then sanitize into unique upper-case identifiers.
    Sanitized { prefix: String },
    /// Use source names as given.
    Verbatim,
}

impl Default for ColumnNaming {
    fn default() -> Self {
        ColumnNaming::Sanitized {
            prefix: String::new(),
        }
    }
}

impl ColumnNaming {
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        ColumnNaming::Sanitized {
            prefix: prefix.into(),
        }
    }

    /// Mapping for the columns of a source. Repeated source names are rejected
    /// since they cannot map to distinct table columns.
    pub fn mapping(&self, columns: &[SourceColumn]) -> Result<ColumnNameMapping> {
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        if let Some((_, dup)) = names
            .iter()
            .enumerate()
            .find(|(idx, name)| names[..*idx].contains(name))
        {
            return Err(LoadError::Source(format!("duplicate column name '{}'", dup)));
        }

        Ok(match self {
            ColumnNaming::Sanitized { prefix } => build_mapping(&names, prefix),
            ColumnNaming::Verbatim => ColumnNameMapping::verbatim(&names),
        })
    }
}

/// Options for [`Repository::create_table_from_source`].
#[derive(Debug, Clone, Default)]
pub struct CreateTableOptions {
    pub naming: ColumnNaming,
    /// Primary key columns, by original or mapped name.
    pub primary_key: Vec<String>,
    /// Rows sampled for inference (default: loader config).
    pub sample_rows: Option<usize>,
    /// Longest bounded text column (default: loader config).
    pub max_text_length: Option<usize>,
}

/// Options for [`Repository::bulk_insert`].
///
/// `naming` must match the naming used when the table was created.
#[derive(Debug, Clone, Default)]
pub struct BulkInsertOptions {
    pub naming: ColumnNaming,
    /// Rows per chunk (default: loader config).
    pub chunk_size: Option<usize>,
}

/// Options for [`Repository::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub create: CreateTableOptions,
    pub chunk_size: Option<usize>,
}

/// Outcome of [`Repository::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub target: String,
    pub created: bool,
    pub rows_inserted: u64,
}

/// Database operations against one target.
///
/// Cloning is cheap; clones share the unit of work.
#[derive(Clone)]
pub struct Repository {
    uow: Arc<dyn UnitOfWork>,
    dialect: Dialect,
    default_schema: Option<String>,
    default_table: Option<String>,
    loader: LoaderConfig,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("dialect", &self.dialect)
            .field("default_schema", &self.default_schema)
            .field("default_table", &self.default_table)
            .finish()
    }
}

impl Repository {
    /// Auto-committing repository over a connection source.
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self::with_unit_of_work(Arc::new(AutoCommit::new(source)))
    }

    pub fn with_unit_of_work(uow: Arc<dyn UnitOfWork>) -> Self {
        Self {
            dialect: uow.dialect(),
            uow,
            default_schema: None,
            default_table: None,
            loader: LoaderConfig::default(),
        }
    }

    pub fn with_default_schema(mut self, schema: impl Into<String>) -> Self {
        self.default_schema = Some(schema.into());
        self
    }

    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = Some(table.into());
        self
    }

    pub fn with_loader_config(mut self, loader: LoaderConfig) -> Self {
        self.loader = loader;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn default_schema(&self) -> Option<&str> {
        self.default_schema.as_deref()
    }

    pub fn default_table(&self) -> Option<&str> {
        self.default_table.as_deref()
    }

    /// Schema-qualified target from explicit values or the defaults.
    pub fn resolve(&self, schema: Option<&str>, table: Option<&str>) -> Result<TableIdentity> {
        let schema = self.resolve_schema(schema)?;
        let table = table
            .or(self.default_table.as_deref())
            .ok_or_else(|| LoadError::Config("no table given and no default table bound".into()))?;
        Ok(TableIdentity::new(schema, table))
    }

    fn resolve_schema(&self, schema: Option<&str>) -> Result<String> {
        schema
            .or(self.default_schema.as_deref())
            .map(str::to_string)
            .ok_or_else(|| LoadError::Config("no schema given and no default schema bound".into()))
    }

    /// Wraps an error with the operation, dialect and target.
    fn context(&self, operation: &'static str, target: impl fmt::Display) -> impl FnOnce(LoadError) -> LoadError {
        let dialect = self.dialect.name();
        let target = target.to_string();
        move |e| e.during(operation, dialect, target)
    }

    // =========================================================================
    // Connectivity and raw SQL
    // =========================================================================

    /// Run `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        self.uow
            .query_all(&self.dialect.ping())
            .await
            .map(|_| ())
            .map_err(self.context("health_check", "server"))
    }

    /// Execute caller-supplied SQL, returning rows affected.
    pub async fn execute_raw(&self, sql: &str, params: Vec<Value>) -> Result<u64> {
        self.uow
            .execute(&[Statement::with_params(sql, params)])
            .await
            .map_err(self.context("execute_raw", "raw SQL"))
    }

    /// Execute complete caller-supplied DDL. No inference, no existence check.
    pub async fn create_table_raw(&self, ddl: &str) -> Result<()> {
        self.uow
            .execute(&[Statement::new(ddl)])
            .await
            .map(|_| ())
            .map_err(self.context("create_table_raw", "raw DDL"))
    }

    /// Run a caller-supplied query; `params` use the dialect's placeholders.
    pub async fn select_raw(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Row>> {
        self.uow
            .query_all(&Statement::with_params(sql, params))
            .await
            .map_err(self.context("select_raw", "raw SQL"))
    }

    /// Stream a caller-supplied query row by row.
    ///
    /// Errors arrive as items of the stream. Outside a transaction rows are
    /// fetched lazily on their own connection; inside one the result is read
    /// in full first so the scope's connection is free again for `commit`.
    pub fn select_raw_iter(&self, sql: &str, params: Vec<Value>) -> mpsc::Receiver<Result<Row>> {
        self.uow.query_iter(Statement::with_params(sql, params))
    }

    // =========================================================================
    // Schemas and tables
    // =========================================================================

    /// Create the schema unless it exists.
    pub async fn ensure_schema(&self, schema: Option<&str>) -> Result<()> {
        let schema = self.resolve_schema(schema)?;
        let stmts = self.dialect.create_schema_if_not_exists(&schema)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("ensure_schema", &schema))
    }

    pub async fn table_exists(&self, schema: Option<&str>, table: Option<&str>) -> Result<bool> {
        let id = self.resolve(schema, table)?;
        self.exists(&id).await.map_err(self.context("table_exists", &id))
    }

    async fn exists(&self, id: &TableIdentity) -> Result<bool> {
        let rows = self.uow.query_all(&self.dialect.table_exists(id)).await?;
        Ok(scalar_count(&rows)? > 0)
    }

    /// Create an empty table shaped like `source`, unless it already exists.
    ///
    /// Reads a bounded prefix of the source, maps column names and infers
    /// column types from it. Returns `false` when the table was already there.
    pub async fn create_table_from_source(
        &self,
        source: &mut dyn TabularSource,
        schema: Option<&str>,
        table: Option<&str>,
        options: &CreateTableOptions,
    ) -> Result<bool> {
        let id = self.resolve(schema, table)?;
        self.create_from_source(source, &id, options)
            .await
            .map_err(self.context("create_table_from_source", &id))
    }

    async fn create_from_source(
        &self,
        source: &mut dyn TabularSource,
        id: &TableIdentity,
        options: &CreateTableOptions,
    ) -> Result<bool> {
        if self.exists(id).await? {
            warn!("Table {} already exists, not creating it", id);
            return Ok(false);
        }

        let mapping = options.naming.mapping(source.columns())?;
        let primary_key = options
            .primary_key
            .iter()
            .map(|column| {
                mapping.resolve(column).map(str::to_string).ok_or_else(|| {
                    LoadError::Config(format!("primary key column '{}' is not in the source", column))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let sample_rows = options.sample_rows.unwrap_or(self.loader.sample_rows);
        let max_text_length = options.max_text_length.unwrap_or(self.loader.max_text_length);
        let sample = source.read_prefix(sample_rows)?.renamed(mapping.mapped_names())?;
        debug!("Inferring types for {} from {} sampled rows", id, sample.len());

        let spec = TableSpec {
            identity: id.clone(),
            columns: infer_types(&sample, max_text_length, self.dialect.text_unit()),
            primary_key,
        };
        self.uow.execute(&self.dialect.create_table(&spec)?).await?;
        info!("Created table {} ({} columns)", id, spec.columns.len());
        Ok(true)
    }

    /// Append every row of `source` to an existing table, chunk by chunk.
    ///
    /// Each chunk is committed on its own. When a chunk fails, the load stops
    /// and the error is [`LoadError::PartialLoad`] carrying the rows committed
    /// by the earlier chunks.
    pub async fn bulk_insert(
        &self,
        source: &mut dyn TabularSource,
        schema: Option<&str>,
        table: Option<&str>,
        options: &BulkInsertOptions,
    ) -> Result<u64> {
        let id = self.resolve(schema, table)?;
        let chunk_size = options.chunk_size.unwrap_or(self.loader.chunk_size);
        let names = options
            .naming
            .mapping(source.columns())
            .map_err(self.context("bulk_insert", &id))?
            .mapped_names();
        let chunks = source.chunks(chunk_size).map_err(self.context("bulk_insert", &id))?;

        let mut rows_inserted = 0u64;
        let mut chunks_committed = 0usize;
        for chunk in chunks {
            let appended = async {
                let mut chunk = chunk?.renamed(names.clone())?;
                chunk.harmonize_kinds();
                self.uow.bulk_append(&id, &chunk).await
            }
            .await;

            match appended {
                Ok(rows) => {
                    rows_inserted += rows;
                    chunks_committed += 1;
                    debug!(
                        "{}: chunk {} appended {} rows ({} total)",
                        id, chunks_committed, rows, rows_inserted
                    );
                }
                Err(e) => {
                    warn!(
                        "Bulk insert into {} failed at chunk {} after {} rows",
                        id,
                        chunks_committed + 1,
                        rows_inserted
                    );
                    return Err(LoadError::PartialLoad {
                        target: id.to_string(),
                        rows_inserted,
                        chunks_committed,
                        source: Box::new(e.during("bulk_insert", self.dialect.name(), id.to_string())),
                    });
                }
            }
        }

        info!(
            "Inserted {} rows into {} in {} chunks",
            rows_inserted, id, chunks_committed
        );
        Ok(rows_inserted)
    }

    /// Create the table if absent, then insert every row of `source`.
    pub async fn load(
        &self,
        source: &mut dyn TabularSource,
        schema: Option<&str>,
        table: Option<&str>,
        options: &LoadOptions,
    ) -> Result<LoadReport> {
        let id = self.resolve(schema, table)?;
        let created = self
            .create_table_from_source(source, schema, table, &options.create)
            .await?;
        let insert = BulkInsertOptions {
            naming: options.create.naming.clone(),
            chunk_size: options.chunk_size,
        };
        let rows_inserted = self.bulk_insert(source, schema, table, &insert).await?;
        Ok(LoadReport {
            target: id.to_string(),
            created,
            rows_inserted,
        })
    }

    pub async fn truncate(&self, schema: Option<&str>, table: Option<&str>) -> Result<()> {
        let id = self.resolve(schema, table)?;
        let stmts = self.dialect.truncate_table(&id)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("truncate", &id))
    }

    /// Truncate, also emptying tables that reference this one.
    pub async fn truncate_cascade(&self, schema: Option<&str>, table: Option<&str>) -> Result<()> {
        let id = self.resolve(schema, table)?;
        let stmts = self.dialect.truncate_cascade(&id)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("truncate_cascade", &id))
    }

    pub async fn drop_table(&self, schema: Option<&str>, table: Option<&str>, if_exists: bool) -> Result<()> {
        let id = self.resolve(schema, table)?;
        let stmts = self.dialect.drop_table(&id, if_exists)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("drop_table", &id))?;
        info!("Dropped table {}", id);
        Ok(())
    }

    /// Delete rows matching `predicate`, a raw SQL fragment whose values are
    /// bound from `params`.
    pub async fn delete_where(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
        predicate: &str,
        params: Vec<Value>,
    ) -> Result<u64> {
        let id = self.resolve(schema, table)?;
        let stmt = self.dialect.delete_where(&id, predicate, params)?;
        self.uow
            .execute(&[stmt])
            .await
            .map_err(self.context("delete_where", &id))
    }

    pub async fn count(&self, schema: Option<&str>, table: Option<&str>) -> Result<u64> {
        let id = self.resolve(schema, table)?;
        let stmt = self.dialect.count(&id)?;
        let count = async { scalar_count(&self.uow.query_all(&stmt).await?) };
        count.await.map_err(self.context("count", &id))
    }

    /// First `n` rows; `options.limit` is replaced by `n`.
    pub async fn select_top(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
        n: u64,
        options: &SelectOptions,
    ) -> Result<Vec<Row>> {
        let id = self.resolve(schema, table)?;
        let options = SelectOptions {
            limit: Some(n),
            ..options.clone()
        };
        let stmt = self.dialect.select(&id, &options)?;
        self.uow
            .query_all(&stmt)
            .await
            .map_err(self.context("select_top", &id))
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Create a view from `select_sql`, replacing an existing one when
    /// `or_replace` is set.
    pub async fn create_view(
        &self,
        schema: Option<&str>,
        view: &str,
        select_sql: &str,
        or_replace: bool,
    ) -> Result<()> {
        let id = TableIdentity::new(self.resolve_schema(schema)?, view);
        let stmts = self.dialect.create_or_replace_view(&id, select_sql, or_replace)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("create_view", &id))?;
        info!("Created view {}", id);
        Ok(())
    }

    pub async fn drop_view(&self, schema: Option<&str>, view: &str, if_exists: bool) -> Result<()> {
        let id = TableIdentity::new(self.resolve_schema(schema)?, view);
        let stmts = self.dialect.drop_view(&id, if_exists)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("drop_view", &id))
    }

    /// All rows of a view, or the first `n`.
    pub async fn select_view(&self, schema: Option<&str>, view: &str, n: Option<u64>) -> Result<Vec<Row>> {
        let id = TableIdentity::new(self.resolve_schema(schema)?, view);
        let options = SelectOptions {
            limit: n,
            ..SelectOptions::default()
        };
        let stmt = self.dialect.select(&id, &options)?;
        self.uow
            .query_all(&stmt)
            .await
            .map_err(self.context("select_view", &id))
    }

    // =========================================================================
    // Stored procedures
    // =========================================================================

    /// Create a procedure from its body, altering an existing one when
    /// `or_alter` is set.
    pub async fn create_procedure(
        &self,
        schema: Option<&str>,
        name: &str,
        body: &str,
        or_alter: bool,
    ) -> Result<()> {
        let id = TableIdentity::new(self.resolve_schema(schema)?, name);
        let stmts = self.dialect.create_or_alter_procedure(&id, body, or_alter)?;
        self.uow
            .execute(&stmts)
            .await
            .map(|_| ())
            .map_err(self.context("create_procedure", &id))?;
        info!("Created procedure {}", id);
        Ok(())
    }

    /// Call a procedure with named parameters, in order.
    pub async fn exec_procedure(
        &self,
        schema: Option<&str>,
        name: &str,
        params: &[(String, Value)],
    ) -> Result<u64> {
        let id = TableIdentity::new(self.resolve_schema(schema)?, name);
        let stmt = self.dialect.call_procedure(&id, params)?;
        self.uow
            .execute(&[stmt])
            .await
            .map_err(self.context("exec_procedure", &id))
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Run `f` against a repository bound to one connection and one open
    /// transaction. Commits when `f` returns `Ok`, rolls back on `Err`.
    ///
    /// Calling `transaction` again inside `f` fails with a configuration error.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Repository) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.uow.begin().await?;
        let repo = Repository {
            uow: scope.clone(),
            ..self.clone()
        };

        match f(repo).await {
            Ok(value) => {
                scope.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = scope.rollback().await {
                    warn!("Rollback failed after error ({}): {}", e, rb);
                }
                Err(e)
            }
        }
    }
}

/// Read the `cnt` column of a single-row COUNT result.
fn scalar_count(rows: &[Row]) -> Result<u64> {
    let value = rows
        .first()
        .and_then(|row| row.get("cnt"))
        .and_then(Value::as_i64)
        .ok_or_else(|| LoadError::Source("COUNT query returned no count".into()))?;
    u64::try_from(value).map_err(|_| LoadError::Source(format!("negative count {}", value)))
}
