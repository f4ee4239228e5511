//! MySQL/MariaDB connections via mysql_async.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::consts::ColumnType;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::core::schema::TableIdentity;
use crate::core::traits::Connection;
use crate::core::value::{Chunk, Row, Value};
use crate::dialect::{Dialect, DialectKind, Statement};
use crate::drivers::common::SslMode;
use crate::error::{LoadError, Result};

/// MySQL max placeholders per prepared statement.
const MYSQL_MAX_PLACEHOLDERS: usize = 65535;

/// Build the pool and prove it can reach the server.
pub(crate) async fn connect_pool(config: &DatabaseConfig) -> Result<Pool> {
    let ssl_mode: SslMode = config.ssl_mode.parse()?;
    ssl_mode.warn_if_insecure("MySQL");

    let mut builder = OptsBuilder::default()
        .ip_or_hostname(&config.host)
        .tcp_port(config.port_or_default())
        .db_name(Some(&config.database))
        .user(Some(&config.user))
        .pass(Some(&config.password))
        // Use utf8mb4 for full Unicode support
        .init(vec!["SET NAMES utf8mb4"]);

    if let Some(ssl) = ssl_mode.mysql_ssl_opts() {
        builder = builder.ssl_opts(ssl);
    }

    let constraints = PoolConstraints::new(1, config.max_connections as usize).ok_or_else(|| {
        LoadError::Config(format!(
            "invalid MySQL pool size {}",
            config.max_connections
        ))
    })?;
    let opts: Opts = builder
        .pool_opts(PoolOpts::new().with_constraints(constraints))
        .into();
    let pool = Pool::new(opts);

    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "creating MySQL connection pool"))?;
    conn.query_drop("SELECT 1")
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "testing MySQL connection"))?;
    drop(conn);

    info!(
        "Connected to MySQL: {}:{}/{} (pool_size={})",
        config.host,
        config.port_or_default(),
        config.database,
        config.max_connections
    );
    Ok(pool)
}

pub(crate) async fn acquire(pool: &Pool) -> Result<Box<dyn Connection>> {
    let conn = pool
        .get_conn()
        .await
        .map_err(|e| LoadError::pool(e.to_string(), "getting MySQL connection from pool"))?;
    Ok(Box::new(MysqlConnection { conn }))
}

/// One pooled MySQL connection.
pub struct MysqlConnection {
    conn: Conn,
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        if stmt.params.is_empty() {
            // Text protocol: CREATE PROCEDURE cannot be prepared.
            self.conn.query_drop(stmt.sql.as_str()).await?;
        } else {
            self.conn
                .exec_drop(stmt.sql.as_str(), to_params(&stmt.params))
                .await?;
        }
        Ok(self.conn.affected_rows())
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        // Always the binary protocol so numbers come back typed.
        let rows: Vec<mysql_async::Row> = self
            .conn
            .exec(stmt.sql.as_str(), to_params(&stmt.params))
            .await?;

        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let columns = column_names(first);
        Ok(rows
            .iter()
            .map(|row| convert_row(columns.clone(), row))
            .collect())
    }

    async fn stream(&mut self, stmt: &Statement, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
        let mut result = self
            .conn
            .exec_iter(stmt.sql.as_str(), to_params(&stmt.params))
            .await?;

        let mut columns: Option<Arc<[String]>> = None;
        while let Some(row) = result.next().await? {
            let names = columns.get_or_insert_with(|| column_names(&row)).clone();
            if tx.send(Ok(convert_row(names, &row))).await.is_err() {
                debug!("Row receiver dropped, discarding remaining MySQL results");
                break;
            }
        }
        result.drop_result().await?;
        Ok(())
    }

    async fn bulk_append(&mut self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        if chunk.is_empty() || chunk.columns.is_empty() {
            return Ok(0);
        }

        let dialect = Dialect::new(DialectKind::Mysql);
        let columns = chunk.column_names();
        let max_rows_per_batch = (MYSQL_MAX_PLACEHOLDERS / columns.len()).max(1);

        let mut inserted = 0u64;
        for rows in chunk.rows.chunks(max_rows_per_batch) {
            let sql = dialect.insert_values(target, &columns, rows.len())?;
            let params: Vec<mysql_async::Value> = rows
                .iter()
                .flat_map(|row| row.iter().map(to_mysql))
                .collect();
            self.conn.exec_drop(sql, params).await?;
            inserted += self.conn.affected_rows();
        }

        debug!("MySQL: wrote {} rows to {} using INSERT", inserted, target);
        Ok(inserted)
    }

    async fn begin(&mut self) -> Result<()> {
        self.conn.query_drop("START TRANSACTION").await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }
}

fn to_params(params: &[Value]) -> Vec<mysql_async::Value> {
    params.iter().map(to_mysql).collect()
}

/// Convert a Value to mysql_async::Value.
fn to_mysql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::Int(i64::from(*b)),
        Value::Int(i) => mysql_async::Value::Int(*i),
        Value::Float(f) => mysql_async::Value::Double(*f),
        Value::Text(s) => mysql_async::Value::Bytes(s.as_bytes().to_vec()),
        Value::DateTime(dt) => mysql_async::Value::Date(
            u16::try_from(dt.year()).unwrap_or(0),
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond() / 1000,
        ),
    }
}

fn column_names(row: &mysql_async::Row) -> Arc<[String]> {
    row.columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect()
}

fn convert_row(columns: Arc<[String]>, row: &mysql_async::Row) -> Row {
    let values = row
        .columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| match row.as_ref(idx) {
            Some(value) => column_value(value, column.column_type()),
            None => Value::Null,
        })
        .collect();
    Row::new(columns, values)
}

fn column_value(value: &mysql_async::Value, ty: ColumnType) -> Value {
    match value {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Int(v) => Value::Int(*v),
        mysql_async::Value::UInt(v) => i64::try_from(*v)
            .map(Value::Int)
            .unwrap_or(Value::Float(*v as f64)),
        mysql_async::Value::Float(v) => Value::Float(f64::from(*v)),
        mysql_async::Value::Double(v) => Value::Float(*v),
        mysql_async::Value::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            match ty {
                ColumnType::MYSQL_TYPE_DECIMAL | ColumnType::MYSQL_TYPE_NEWDECIMAL => text
                    .parse::<f64>()
                    .map(Value::Float)
                    .unwrap_or_else(|_| Value::Text(text.into_owned())),
                _ => Value::Text(text.into_owned()),
            }
        }
        // Zero dates ("0000-00-00") have no chrono equivalent.
        mysql_async::Value::Date(y, m, d, h, mi, s, us) => {
            NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*m), u32::from(*d))
                .and_then(|date| {
                    date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us)
                })
                .map(Value::DateTime)
                .unwrap_or(Value::Null)
        }
        mysql_async::Value::Time(negative, days, h, m, s, us) => Value::Text(format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            if *negative { "-" } else { "" },
            days * 24 + u32::from(*h),
            m,
            s,
            us
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datetime_to_mysql() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_micro_opt(23, 59, 58, 123_456)
            .unwrap();
        assert_eq!(
            to_mysql(&Value::DateTime(dt)),
            mysql_async::Value::Date(2024, 2, 29, 23, 59, 58, 123_456)
        );
    }

    #[test]
    fn test_bool_binds_as_tinyint() {
        assert_eq!(to_mysql(&Value::Bool(true)), mysql_async::Value::Int(1));
        assert_eq!(to_mysql(&Value::Null), mysql_async::Value::NULL);
    }

    #[test]
    fn test_decimal_bytes_become_float() {
        let value = mysql_async::Value::Bytes(b"12.50".to_vec());
        assert_eq!(
            column_value(&value, ColumnType::MYSQL_TYPE_NEWDECIMAL),
            Value::Float(12.5)
        );
        assert_eq!(
            column_value(&value, ColumnType::MYSQL_TYPE_VAR_STRING),
            Value::from("12.50")
        );
    }

    #[test]
    fn test_zero_date_reads_as_null() {
        let value = mysql_async::Value::Date(0, 0, 0, 0, 0, 0, 0);
        assert_eq!(column_value(&value, ColumnType::MYSQL_TYPE_DATETIME), Value::Null);
    }
}
