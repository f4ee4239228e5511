//! Core traits at the boundaries of the loader.
//!
//! - [`TabularSource`]: column metadata plus prefix and chunked reads
//! - [`Connection`]: one checked-out driver connection
//! - [`ConnectionSource`]: hands out connections for one target (a pool)
//! - [`UnitOfWork`]: where repository statements run, auto-commit or scoped

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::dialect::{Dialect, Statement};
use crate::error::Result;

use super::schema::TableIdentity;
use super::value::{Chunk, Row, SourceColumn};

/// Lazy iterator of chunks produced by a [`TabularSource`].
pub type ChunkIter<'a> = Box<dyn Iterator<Item = Result<Chunk>> + Send + 'a>;

/// A dataset with named, optionally typed columns.
///
/// Reads start from the beginning of the data each time, so the same source
/// can be sampled for inference and then streamed for insertion.
pub trait TabularSource: Send {
    /// Column names and declared kinds, in order.
    fn columns(&self) -> &[SourceColumn];

    /// Read at most `max_rows` rows from the start.
    fn read_prefix(&mut self, max_rows: usize) -> Result<Chunk>;

    /// Iterate the whole dataset in chunks of at most `chunk_size` rows.
    fn chunks(&mut self, chunk_size: usize) -> Result<ChunkIter<'_>>;

    /// Read everything into one chunk.
    fn read_all(&mut self) -> Result<Chunk> {
        let mut all = Chunk::new(self.columns().to_vec(), Vec::new());
        for chunk in self.chunks(10_000)? {
            all.rows.extend(chunk?.rows);
        }
        Ok(all)
    }
}

/// A single database connection.
///
/// Implemented per driver. Statements carry their own bound parameters;
/// transactions are controlled explicitly with `begin`/`commit`/`rollback`.
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement, returning rows affected.
    async fn execute(&mut self, stmt: &Statement) -> Result<u64>;

    /// Run a query and collect every row.
    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>>;

    /// Run a query and push rows into `tx` as they arrive.
    ///
    /// Stops early without error when the receiver is dropped.
    async fn stream(&mut self, stmt: &Statement, tx: &mpsc::Sender<Result<Row>>) -> Result<()>;

    /// Append a chunk to an existing table, returning rows inserted.
    async fn bulk_append(&mut self, target: &TableIdentity, chunk: &Chunk) -> Result<u64>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Source of connections for one database target.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Dialect of the target.
    fn dialect(&self) -> Dialect;

    /// Short description of the target for logs and errors (no secrets).
    fn describe(&self) -> String;

    /// Check out a connection.
    async fn acquire(&self) -> Result<Box<dyn Connection>>;
}

/// Where repository statements run.
///
/// [`AutoCommit`](crate::repository::AutoCommit) wraps each call in its own
/// transaction; [`TransactionScope`](crate::repository::TransactionScope)
/// runs every call on one connection inside one open transaction.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Execute statements in order, returning total rows affected.
    async fn execute(&self, statements: &[Statement]) -> Result<u64>;

    async fn query_all(&self, stmt: &Statement) -> Result<Vec<Row>>;

    /// Stream rows lazily through a bounded channel.
    fn query_iter(&self, stmt: Statement) -> mpsc::Receiver<Result<Row>>;

    async fn bulk_append(&self, target: &TableIdentity, chunk: &Chunk) -> Result<u64>;

    /// Open a transaction scope bound to one connection.
    async fn begin(&self) -> Result<Arc<crate::repository::TransactionScope>>;
}
