//! Table and column descriptors produced by inference and consumed by the
//! dialect renderers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared length of a text column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLength {
    /// Bounded length in characters (always >= 1).
    Bounded(u32),
    /// No length limit (`NVARCHAR(MAX)`, `TEXT`, `LONGTEXT`).
    Unbounded,
}

/// Unit a dialect counts declared text lengths in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextUnit {
    /// Unicode scalar values (`VARCHAR(n)` in PostgreSQL and utf8mb4 MySQL).
    #[default]
    Chars,
    /// UTF-16 code units (`NVARCHAR(n)` in SQL Server).
    Utf16,
}

impl TextUnit {
    /// Length of `text` in this unit.
    pub fn measure(&self, text: &str) -> usize {
        match self {
            TextUnit::Chars => text.chars().count(),
            TextUnit::Utf16 => text.encode_utf16().count(),
        }
    }
}

/// Dialect-independent SQL type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlKind {
    Integer,
    Float,
    Boolean,
    DateTime,
    Text(TextLength),
}

impl SqlKind {
    /// Text type bounded to `len` characters (minimum 1).
    pub fn text(len: usize) -> Self {
        let len = u32::try_from(len.max(1)).unwrap_or(u32::MAX);
        SqlKind::Text(TextLength::Bounded(len))
    }
}

/// Column type descriptor: a column name plus its SQL kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnType {
    /// Column name (already sanitized when produced by inference).
    pub name: String,

    /// SQL kind.
    pub kind: SqlKind,
}

impl ColumnType {
    pub fn new(name: impl Into<String>, kind: SqlKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Schema-qualified table (or view/procedure) name.
///
/// In MySQL the schema is the database name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableIdentity {
    /// Schema name.
    pub schema: String,

    /// Object name.
    pub table: String,
}

impl TableIdentity {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Everything needed to create a table once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub identity: TableIdentity,

    /// Column definitions, in source order.
    pub columns: Vec<ColumnType>,

    /// Primary key column names (mapped names).
    pub primary_key: Vec<String>,
}

impl TableSpec {
    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Name of the primary key constraint: `PK_<table>`.
    pub fn primary_key_name(&self) -> String {
        format!("PK_{}", self.identity.table)
    }

    /// Whether `column` is part of the primary key.
    pub fn is_pk_column(&self, column: &str) -> bool {
        self.primary_key.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_unit_measure() {
        assert_eq!(TextUnit::Chars.measure("ação"), 4);
        assert_eq!(TextUnit::Utf16.measure("ação"), 4);
        assert_eq!(TextUnit::Chars.measure("😀😀"), 2);
        assert_eq!(TextUnit::Utf16.measure("😀😀"), 4);
    }

    #[test]
    fn test_text_length_never_zero() {
        assert_eq!(SqlKind::text(0), SqlKind::Text(TextLength::Bounded(1)));
        assert_eq!(SqlKind::text(25), SqlKind::Text(TextLength::Bounded(25)));
    }

    #[test]
    fn test_primary_key_name() {
        let spec = TableSpec {
            identity: TableIdentity::new("hr", "employees"),
            columns: vec![ColumnType::new("HR_ID", SqlKind::Integer)],
            primary_key: vec!["HR_ID".into()],
        };
        assert!(spec.has_pk());
        assert!(spec.is_pk_column("HR_ID"));
        assert_eq!(spec.primary_key_name(), "PK_employees");
        assert_eq!(spec.identity.to_string(), "hr.employees");
    }
}
