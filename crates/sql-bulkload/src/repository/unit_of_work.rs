//! Units of work: where repository statements run.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::core::schema::TableIdentity;
use crate::core::traits::{Connection, ConnectionSource, UnitOfWork};
use crate::core::value::{Chunk, Row};
use crate::dialect::{Dialect, Statement};
use crate::error::{LoadError, Result};

/// Rows buffered between a streaming query and its consumer.
const STREAM_CHANNEL_CAPACITY: usize = 256;

/// Each call checks out its own connection and, for writes, runs in its own
/// transaction: committed on success, rolled back on failure.
#[derive(Clone)]
pub struct AutoCommit {
    source: Arc<dyn ConnectionSource>,
}

impl AutoCommit {
    pub fn new(source: Arc<dyn ConnectionSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl UnitOfWork for AutoCommit {
    fn dialect(&self) -> Dialect {
        self.source.dialect()
    }

    async fn execute(&self, statements: &[Statement]) -> Result<u64> {
        let mut conn = self.source.acquire().await?;
        conn.begin().await?;
        let result = execute_all(conn.as_mut(), statements).await;
        finish(conn.as_mut(), result).await
    }

    async fn query_all(&self, stmt: &Statement) -> Result<Vec<Row>> {
        debug!("query: {}", stmt.sql);
        let mut conn = self.source.acquire().await?;
        conn.query(stmt).await
    }

    /// Must be called from within a Tokio runtime.
    fn query_iter(&self, stmt: Statement) -> mpsc::Receiver<Result<Row>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let source = self.source.clone();
        tokio::spawn(async move {
            debug!("stream: {}", stmt.sql);
            let result: Result<()> = async {
                let mut conn = source.acquire().await?;
                conn.stream(&stmt, &tx).await
            }
            .await;
            if let Err(e) = result {
                let _ = tx.send(Err(e)).await;
            }
        });
        rx
    }

    async fn bulk_append(&self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        let mut conn = self.source.acquire().await?;
        conn.begin().await?;
        let result = conn.bulk_append(target, chunk).await;
        finish(conn.as_mut(), result).await
    }

    async fn begin(&self) -> Result<Arc<TransactionScope>> {
        let mut conn = self.source.acquire().await?;
        conn.begin().await?;
        debug!("Transaction opened on {}", self.source.describe());
        Ok(Arc::new(TransactionScope::new(self.source.dialect(), conn)))
    }
}

/// One checked-out connection holding an open transaction.
///
/// Every call runs on that connection until [`commit`](Self::commit) or
/// [`rollback`](Self::rollback); after that, calls fail with
/// [`LoadError::TransactionClosed`]. A scope dropped while still open is rolled
/// back in the background.
pub struct TransactionScope {
    dialect: Dialect,
    conn: Arc<Mutex<Option<Box<dyn Connection>>>>,
}

impl TransactionScope {
    fn new(dialect: Dialect, conn: Box<dyn Connection>) -> Self {
        Self {
            dialect,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub async fn commit(&self) -> Result<()> {
        let mut conn = self.conn.lock().await.take().ok_or(LoadError::TransactionClosed)?;
        conn.commit().await?;
        debug!("Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> Result<()> {
        let mut conn = self.conn.lock().await.take().ok_or(LoadError::TransactionClosed)?;
        conn.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }

    /// Whether the transaction can still be used.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }
}

#[async_trait]
impl UnitOfWork for TransactionScope {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn execute(&self, statements: &[Statement]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(LoadError::TransactionClosed)?;
        execute_all(conn.as_mut(), statements).await
    }

    async fn query_all(&self, stmt: &Statement) -> Result<Vec<Row>> {
        debug!("query: {}", stmt.sql);
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(LoadError::TransactionClosed)?;
        conn.query(stmt).await
    }

    /// Must be called from within a Tokio runtime. Rows are read in full
    /// while the connection is locked and handed out afterwards, so an
    /// undrained receiver never blocks `commit` or `rollback`.
    fn query_iter(&self, stmt: Statement) -> mpsc::Receiver<Result<Row>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let conn = self.conn.clone();
        tokio::spawn(async move {
            debug!("stream: {}", stmt.sql);
            let rows = {
                let mut guard = conn.lock().await;
                match guard.as_mut() {
                    Some(conn) => conn.query(&stmt).await,
                    None => Err(LoadError::TransactionClosed),
                }
            };
            match rows {
                Ok(rows) => {
                    for row in rows {
                        if tx.send(Ok(row)).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                }
            }
        });
        rx
    }

    async fn bulk_append(&self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(LoadError::TransactionClosed)?;
        conn.bulk_append(target, chunk).await
    }

    async fn begin(&self) -> Result<Arc<TransactionScope>> {
        Err(LoadError::Config("nested transactions are not supported".into()))
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if let Ok(guard) = self.conn.try_lock() {
            if guard.is_none() {
                return;
            }
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("Transaction dropped without commit outside a runtime; the connection is discarded");
            return;
        };
        let conn = self.conn.clone();
        handle.spawn(async move {
            let Some(mut conn) = conn.lock().await.take() else {
                return;
            };
            warn!("Transaction dropped without commit, rolling back");
            if let Err(e) = conn.rollback().await {
                warn!("Rollback of dropped transaction failed: {}", e);
            }
        });
    }
}

/// Run statements in order on one connection, summing rows affected.
async fn execute_all(conn: &mut dyn Connection, statements: &[Statement]) -> Result<u64> {
    let mut affected = 0;
    for stmt in statements {
        debug!("execute: {}", stmt.sql);
        affected += conn.execute(stmt).await?;
    }
    Ok(affected)
}

/// Commit on success, roll back on failure keeping the original error.
async fn finish<T: Send>(conn: &mut dyn Connection, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            conn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = conn.rollback().await {
                warn!("Rollback failed after error ({}): {}", e, rb);
            }
            Err(e)
        }
    }
}
