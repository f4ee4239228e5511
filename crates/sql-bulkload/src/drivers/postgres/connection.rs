//! PostgreSQL connections via tokio-postgres with deadpool pooling.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::{SinkExt, TryStreamExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use tokio_postgres::{Config as PgConfig, NoTls, SimpleQueryMessage};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::core::schema::TableIdentity;
use crate::core::traits::Connection;
use crate::core::value::{Chunk, Row, Value};
use crate::dialect::{Dialect, DialectKind, Statement};
use crate::drivers::common::SslMode;
use crate::error::{LoadError, Result};

/// Connection timeout (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Flush COPY data to the server once the buffer passes this size.
const COPY_FLUSH_BYTES: usize = 1024 * 1024;

/// Build the pool and prove it can reach the server.
pub(crate) async fn connect_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut pg_config = PgConfig::new();
    pg_config.host(&config.host);
    pg_config.port(config.port_or_default());
    pg_config.dbname(&config.database);
    pg_config.user(&config.user);
    pg_config.password(&config.password);

    // Connection options for reliability
    pg_config.keepalives(true);
    pg_config.keepalives_idle(Duration::from_secs(30));
    pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

    let ssl_mode: SslMode = config.ssl_mode.parse()?;
    ssl_mode.warn_if_insecure("PostgreSQL");
    pg_config.ssl_mode(ssl_mode.postgres_mode());

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };

    let mgr = match ssl_mode.postgres_connector() {
        Some(tls) => Manager::from_config(pg_config, tls, mgr_config),
        None => Manager::from_config(pg_config, NoTls, mgr_config),
    };
    let pool = Pool::builder(mgr)
        .max_size(config.max_connections as usize)
        .build()
        .map_err(|e| LoadError::pool(e.to_string(), "creating PostgreSQL connection pool"))?;

    let client = pool
        .get()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "testing PostgreSQL connection"))?;
    client.simple_query("SELECT 1").await?;

    info!(
        "Connected to PostgreSQL: {}:{}/{} (pool_size={})",
        config.host,
        config.port_or_default(),
        config.database,
        config.max_connections
    );
    Ok(pool)
}

pub(crate) async fn acquire(pool: &Pool) -> Result<Box<dyn Connection>> {
    let client = pool
        .get()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "getting PostgreSQL connection from pool"))?;
    Ok(Box::new(PostgresConnection { client }))
}

/// One pooled PostgreSQL connection.
pub struct PostgresConnection {
    client: Object,
}

#[async_trait]
impl Connection for PostgresConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        if stmt.params.is_empty() {
            // Simple protocol: allows multi-statement bodies such as procedures.
            let messages = self.client.simple_query(&stmt.sql).await?;
            let affected = messages
                .iter()
                .map(|m| match m {
                    SimpleQueryMessage::CommandComplete(n) => *n,
                    _ => 0,
                })
                .sum();
            return Ok(affected);
        }
        let params = bind(&stmt.params);
        Ok(self.client.execute(stmt.sql.as_str(), &params).await?)
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        let params = bind(&stmt.params);
        let rows = self.client.query(stmt.sql.as_str(), &params).await?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = column_names(first);
        rows.iter().map(|row| convert_row(columns.clone(), row)).collect()
    }

    async fn stream(&mut self, stmt: &Statement, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
        let rows = self
            .client
            .query_raw(stmt.sql.as_str(), stmt.params.iter())
            .await?;
        tokio::pin!(rows);

        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = rows.try_next().await? {
            let names = columns.get_or_insert_with(|| column_names(&row)).clone();
            if tx.send(convert_row(names, &row)).await.is_err() {
                debug!("Row receiver dropped, stopping PostgreSQL stream");
                break;
            }
        }
        Ok(())
    }

    async fn bulk_append(&mut self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        if chunk.is_empty() {
            return Ok(0);
        }

        let dialect = Dialect::new(DialectKind::Postgres);
        let columns = chunk
            .columns
            .iter()
            .map(|c| dialect.quote(&c.name))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let copy_sql = format!("COPY {} ({}) FROM STDIN", dialect.qualify(target)?, columns);

        let sink = self.client.copy_in(copy_sql.as_str()).await?;
        tokio::pin!(sink);

        let mut buf = BytesMut::with_capacity(COPY_FLUSH_BYTES);
        for row in &chunk.rows {
            for (i, value) in row.iter().enumerate() {
                if i > 0 {
                    buf.put_u8(b'\t');
                }
                buf.put_slice(value_to_text(value).as_bytes());
            }
            buf.put_u8(b'\n');

            if buf.len() >= COPY_FLUSH_BYTES {
                sink.send(buf.split().freeze()).await?;
            }
        }
        if !buf.is_empty() {
            sink.send(buf.freeze()).await?;
        }

        let rows = sink.finish().await?;
        debug!("Wrote {} rows to {} via COPY", rows, target);
        Ok(rows)
    }

    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}

fn bind(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn column_names(row: &tokio_postgres::Row) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

fn convert_row(columns: Arc<[String]>, row: &tokio_postgres::Row) -> Result<Row> {
    let values = (0..row.len())
        .map(|idx| column_value(row, idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::new(columns, values))
}

fn column_value(row: &tokio_postgres::Row, idx: usize) -> Result<Value> {
    let value: Value = match *row.columns()[idx].type_() {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.into(),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(i64::from).into(),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(i64::from).into(),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.into(),
        Type::FLOAT4 => row.try_get::<_, Option<f32>>(idx)?.map(f64::from).into(),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx)?.into(),
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)?
            .and_then(|d| d.to_f64())
            .into(),
        Type::TIMESTAMP => row.try_get::<_, Option<NaiveDateTime>>(idx)?.into(),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|d| d.naive_utc())
            .into(),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| d.and_time(NaiveTime::MIN))
            .into(),
        // Anything else comes back as text when the driver can decode it.
        _ => row.try_get::<_, Option<String>>(idx).ok().flatten().into(),
    };
    Ok(value)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*v).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*v)?.to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(s) => s.as_str().to_sql(ty, out),
            Value::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ => dt.to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a value to COPY text format.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => "\\N".to_string(),
        Value::Bool(b) => if *b { "t" } else { "f" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => escape_copy_text(s),
        Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
    }
}

/// Escape text for PostgreSQL COPY.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("a\tb\nc\\d\re"), "a\\tb\\nc\\\\d\\re");
        assert_eq!(escape_copy_text("plain"), "plain");
    }

    #[test]
    fn test_value_to_text() {
        assert_eq!(value_to_text(&Value::Null), "\\N");
        assert_eq!(value_to_text(&Value::Bool(true)), "t");
        assert_eq!(value_to_text(&Value::Int(-3)), "-3");
        let dt = NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(7, 8, 9)
            .unwrap();
        assert_eq!(value_to_text(&Value::DateTime(dt)), "2024-05-06 07:08:09");
    }

    #[test]
    fn test_int_binds_to_narrow_columns() {
        let mut out = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(out.as_ref(), &7i32.to_be_bytes());

        let mut out = BytesMut::new();
        assert!(Value::Int(i64::MAX).to_sql(&Type::INT2, &mut out).is_err());
    }

    #[test]
    fn test_null_binds_as_null() {
        let mut out = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::INT8, &mut out).unwrap(),
            IsNull::Yes
        ));
    }
}
