//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server (Tiberius + bb8)
//! - [`postgres`]: PostgreSQL (tokio-postgres + deadpool, COPY for bulk appends)
//! - [`mysql`]: MySQL/MariaDB (mysql_async)
//! - [`common`]: Shared utilities (TLS)
//!
//! [`ConnectionProvider`] is the only type callers construct: one per target,
//! passed to a repository. The pool behind it is created on first use.

pub mod common;
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use common::SslMode;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::core::traits::{Connection, ConnectionSource};
use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;

/// Pool for one target.
enum Engine {
    Mssql(mssql::MssqlPool),
    Postgres(deadpool_postgres::Pool),
    Mysql(mysql_async::Pool),
}

/// Lazily initialized connection pool for one database target.
///
/// The pool is built at most once, on the first [`acquire`](ConnectionSource::acquire),
/// even when several tasks race for it; later calls reuse it. Dropping the
/// provider drops the pool.
pub struct ConnectionProvider {
    config: DatabaseConfig,
    dialect: Dialect,
    engine: OnceCell<Engine>,
}

impl ConnectionProvider {
    /// Fails only when the configured type is unknown; no connection is opened.
    pub fn new(config: DatabaseConfig) -> Result<Self> {
        let dialect = Dialect::new(config.dialect_kind()?);
        Ok(Self {
            config,
            dialect,
            engine: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Whether the pool has been created yet.
    pub fn is_initialized(&self) -> bool {
        self.engine.initialized()
    }

    /// Run `SELECT 1` on a pooled connection.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        conn.query(&self.dialect.ping()).await?;
        Ok(())
    }

    async fn engine(&self) -> Result<&Engine> {
        self.engine.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Engine> {
        info!("Creating {} engine for {}", self.dialect.name(), self.config.describe());
        let engine = match self.dialect.kind() {
            DialectKind::Mssql => Engine::Mssql(mssql::connect_pool(&self.config).await?),
            DialectKind::Postgres => Engine::Postgres(postgres::connect_pool(&self.config).await?),
            DialectKind::Mysql => Engine::Mysql(mysql::connect_pool(&self.config).await?),
        };
        Ok(engine)
    }
}

#[async_trait]
impl ConnectionSource for ConnectionProvider {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn describe(&self) -> String {
        self.config.describe()
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        match self.engine().await? {
            Engine::Mssql(pool) => mssql::acquire(pool).await,
            Engine::Postgres(pool) => postgres::acquire(pool).await,
            Engine::Mysql(pool) => mysql::acquire(pool).await,
        }
    }
}
