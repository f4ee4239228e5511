//! SQL Server connections via Tiberius with bb8 pooling.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, FromSql, ToSql};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::core::schema::TableIdentity;
use crate::core::traits::Connection;
use crate::core::value::{Chunk, Row, Value};
use crate::dialect::{Dialect, DialectKind, Statement};
use crate::error::{LoadError, Result};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum connection lifetime (30 minutes).
const POOL_MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// SQL Server accepts at most 2100 parameters per request.
const MAX_PARAMS_PER_INSERT: usize = 2000;

/// A table value constructor holds at most 1000 rows.
const MAX_ROWS_PER_INSERT: usize = 1000;

pub(crate) type MssqlPool = Pool<TiberiusConnectionManager>;

/// Connection manager for bb8 pool with Tiberius.
#[derive(Clone)]
pub(crate) struct TiberiusConnectionManager {
    config: DatabaseConfig,
}

impl TiberiusConnectionManager {
    fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port_or_default());
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(&self.config.user, &self.config.password));

        if self.config.encrypt {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config.packet_size(TDS_MAX_PACKET_SIZE);
        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;
        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build the pool and prove it can reach the server.
pub(crate) async fn connect_pool(config: &DatabaseConfig) -> Result<MssqlPool> {
    let manager = TiberiusConnectionManager::new(config.clone());
    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(POOL_CONNECTION_TIMEOUT)
        .idle_timeout(Some(POOL_IDLE_TIMEOUT))
        .max_lifetime(Some(POOL_MAX_LIFETIME))
        .test_on_check_out(true)
        .build(manager)
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "creating MSSQL connection pool"))?;

    {
        let mut conn = pool
            .get()
            .await
            .map_err(|e| LoadError::pool(e.to_string(), "testing MSSQL connection"))?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
    }

    info!(
        "Connected to MSSQL: {}:{}/{} (pool_size={})",
        config.host,
        config.port_or_default(),
        config.database,
        config.max_connections
    );
    Ok(pool)
}

/// Check out an owned connection.
pub(crate) async fn acquire(pool: &MssqlPool) -> Result<Box<dyn Connection>> {
    let conn = pool
        .get_owned()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "getting MSSQL connection from pool"))?;
    Ok(Box::new(MssqlConnection { conn }))
}

/// One pooled SQL Server connection.
pub struct MssqlConnection {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
}

impl MssqlConnection {
    /// Run a batch outside `sp_executesql` so transaction control is not
    /// scoped to the RPC call.
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for MssqlConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        let params = bind(&stmt.params);
        let result = self.conn.execute(stmt.sql.as_str(), &params).await?;
        Ok(result.total())
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        let params = bind(&stmt.params);
        let rows = self
            .conn
            .query(stmt.sql.as_str(), &params)
            .await?
            .into_first_result()
            .await?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = column_names(first);
        rows.into_iter()
            .map(|row| convert_row(columns.clone(), row))
            .collect()
    }

    async fn stream(&mut self, stmt: &Statement, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
        let params = bind(&stmt.params);
        let mut rows = self
            .conn
            .query(stmt.sql.as_str(), &params)
            .await?
            .into_row_stream();

        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = rows.try_next().await? {
            let names = columns.get_or_insert_with(|| column_names(&row)).clone();
            if tx.send(convert_row(names, row)).await.is_err() {
                debug!("Row receiver dropped, draining remaining MSSQL results");
                while rows.try_next().await?.is_some() {}
                break;
            }
        }
        Ok(())
    }

    async fn bulk_append(&mut self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }

        let dialect = Dialect::new(DialectKind::Mssql);
        let columns = chunk.column_names();
        let rows_per_insert = rows_per_insert(columns.len());

        let mut inserted = 0u64;
        for rows in chunk.rows.chunks(rows_per_insert) {
            let sql = dialect.insert_values(target, &columns, rows.len())?;
            let params: Vec<&dyn ToSql> = rows
                .iter()
                .flatten()
                .map(|v| v as &dyn ToSql)
                .collect();
            inserted += self.conn.execute(sql, &params).await?.total();
        }

        debug!("Inserted {} rows into {} via multi-row INSERT", inserted, target);
        Ok(inserted)
    }

    async fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }
}

/// Rows per INSERT statement for a table of `column_count` columns.
fn rows_per_insert(column_count: usize) -> usize {
    (MAX_PARAMS_PER_INSERT / column_count.max(1)).clamp(1, MAX_ROWS_PER_INSERT)
}

fn bind(params: &[Value]) -> Vec<&dyn ToSql> {
    params.iter().map(|v| v as &dyn ToSql).collect()
}

fn column_names(row: &tiberius::Row) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn convert_row(columns: Arc<[String]>, row: tiberius::Row) -> Result<Row> {
    let values = row
        .into_iter()
        .map(column_value)
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

fn column_value(data: ColumnData<'static>) -> Result<Value> {
    let value: Value = match data {
        ColumnData::U8(v) => v.map(i64::from).into(),
        ColumnData::I16(v) => v.map(i64::from).into(),
        ColumnData::I32(v) => v.map(i64::from).into(),
        ColumnData::I64(v) => v.into(),
        ColumnData::F32(v) => v.map(f64::from).into(),
        ColumnData::F64(v) => v.into(),
        ColumnData::Bit(v) => v.into(),
        ColumnData::String(v) => v.map(Cow::into_owned).into(),
        ColumnData::Guid(v) => v.map(|g| g.to_string()).into(),
        ColumnData::Binary(v) => v
            .map(|b| b.iter().map(|byte| format!("{:02x}", byte)).collect::<String>())
            .into(),
        ColumnData::Numeric(v) => v
            .map(|n| n.value() as f64 / 10f64.powi(i32::from(n.scale())))
            .into(),
        ColumnData::Xml(v) => v.map(|x| x.into_owned().into_string()).into(),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.map(|t| t.to_string()).into(),
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?
            .map(|d| d.and_time(NaiveTime::MIN))
            .into(),
        ColumnData::DateTimeOffset(_) => DateTime::<Utc>::from_sql(&data)?
            .map(|d| d.naive_utc())
            .into(),
        other => NaiveDateTime::from_sql(&other)?.into(),
    };
    Ok(value)
}

impl ToSql for Value {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            Value::Null => ColumnData::String(None),
            Value::Bool(v) => ColumnData::Bit(Some(*v)),
            Value::Int(v) => ColumnData::I64(Some(*v)),
            Value::Float(v) if v.is_finite() => ColumnData::F64(Some(*v)),
            Value::Float(_) => ColumnData::F64(None),
            Value::Text(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            Value::DateTime(dt) => ColumnData::DateTime2(datetime2(dt)),
        }
    }
}

/// DATETIME2(7): days since 0001-01-01 plus 100ns increments since midnight.
fn datetime2(dt: &NaiveDateTime) -> Option<tiberius::time::DateTime2> {
    let epoch = NaiveDate::from_ymd_opt(1, 1, 1)?;
    let days = u32::try_from((dt.date() - epoch).num_days()).ok()?;
    let time = dt.time();
    let nanos = u64::from(time.num_seconds_from_midnight()) * 1_000_000_000 + u64::from(time.nanosecond());
    Some(tiberius::time::DateTime2::new(
        tiberius::time::Date::new(days),
        tiberius::time::Time::new(nanos / 100, 7),
    ))
}
