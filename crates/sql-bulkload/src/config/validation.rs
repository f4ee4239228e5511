//! Configuration validation.

use super::{Config, DatabaseConfig};
use crate::drivers::SslMode;
use crate::error::{LoadError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.databases.is_empty() {
        return Err(LoadError::Config(
            "at least one database must be configured".into(),
        ));
    }

    for (alias, db) in &config.databases {
        validate_database(alias, db)?;
    }

    if config.loader.chunk_size == 0 {
        return Err(LoadError::Config(
            "loader.chunk_size must be at least 1".into(),
        ));
    }
    if config.loader.sample_rows == 0 {
        return Err(LoadError::Config(
            "loader.sample_rows must be at least 1".into(),
        ));
    }
    if config.loader.max_text_length == 0 {
        return Err(LoadError::Config(
            "loader.max_text_length must be at least 1".into(),
        ));
    }

    Ok(())
}

/// Validate one alias entry.
pub fn validate_database(alias: &str, db: &DatabaseConfig) -> Result<()> {
    if alias.is_empty() {
        return Err(LoadError::Config("database alias cannot be empty".into()));
    }
    db.dialect_kind()
        .map_err(|e| LoadError::Config(format!("databases.{}.type: {}", alias, e)))?;
    if db.host.is_empty() {
        return Err(LoadError::Config(format!("databases.{}.host is required", alias)));
    }
    if db.database.is_empty() {
        return Err(LoadError::Config(format!(
            "databases.{}.database is required",
            alias
        )));
    }
    if db.user.is_empty() {
        return Err(LoadError::Config(format!("databases.{}.user is required", alias)));
    }
    if db.max_connections == 0 {
        return Err(LoadError::Config(format!(
            "databases.{}.max_connections must be at least 1",
            alias
        )));
    }
    db.ssl_mode
        .parse::<SslMode>()
        .map_err(|e| LoadError::Config(format!("databases.{}.ssl_mode: {}", alias, e)))?;
    Ok(())
}
