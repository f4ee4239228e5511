//! Configuration types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dialect::DialectKind;
use crate::error::Result;
use crate::typemap::{DEFAULT_MAX_TEXT_LENGTH, DEFAULT_SAMPLE_ROWS};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection targets keyed by alias.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,

    /// Loader defaults.
    #[serde(default)]
    pub loader: LoaderConfig,
}

impl Config {
    /// Aliases in sorted order.
    pub fn aliases(&self) -> Vec<String> {
        self.databases.keys().cloned().collect()
    }

    /// Alias to use when none is given: the only alias, or `default`.
    pub fn default_alias(&self) -> Option<String> {
        if self.databases.len() == 1 {
            return self.databases.keys().next().cloned();
        }
        self.databases
            .contains_key("default")
            .then(|| "default".to_string())
    }
}

/// One database target.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database type: mssql, postgres or mysql (and their aliases).
    pub r#type: String,

    /// Database host.
    pub host: String,

    /// Database port (default: the dialect's standard port).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default, skip_serializing)]
    pub password: String,

    /// Default schema bound to repositories for this alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// PostgreSQL SSL mode (default: "prefer").
    #[serde(default = "default_prefer")]
    pub ssl_mode: String,

    /// SQL Server: encrypt the connection (default: true).
    #[serde(default = "default_true")]
    pub encrypt: bool,

    /// SQL Server: accept any server certificate (default: false).
    #[serde(default)]
    pub trust_server_cert: bool,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn dialect_kind(&self) -> Result<DialectKind> {
        DialectKind::from_db_type(&self.r#type)
    }

    /// Configured port, or the dialect default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| {
            self.dialect_kind()
                .map(|k| k.default_port())
                .unwrap_or(0)
        })
    }

    /// `type://user@host:port/database`, safe for logs.
    pub fn describe(&self) -> String {
        format!(
            "{}://{}@{}:{}/{}",
            self.r#type,
            self.user,
            self.host,
            self.port_or_default(),
            self.database
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("encrypt", &self.encrypt)
            .field("trust_server_cert", &self.trust_server_cert)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Loader defaults applied when callers do not override them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Rows per insert chunk (default: 10000).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Rows sampled for type inference (default: 5000).
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Longest bounded text column (default: 4000).
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            sample_rows: default_sample_rows(),
            max_text_length: default_max_text_length(),
        }
    }
}

fn default_prefer() -> String {
    "prefer".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    4
}

fn default_chunk_size() -> usize {
    10_000
}

fn default_sample_rows() -> usize {
    DEFAULT_SAMPLE_ROWS
}

fn default_max_text_length() -> usize {
    DEFAULT_MAX_TEXT_LENGTH
}
