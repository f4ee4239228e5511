//! Identifier sanitizing, validation and quoting.
//!
//! Column names coming from tabular sources are arbitrary text ("Order Date",
//! "2nd_value", ""), so they are first normalized into plain upper-case SQL
//! identifiers with [`sanitize`] and [`build_mapping`]. Schema, table and view
//! names supplied by callers are kept as given and only quoted.
//!
//! # Security
//!
//! SQL identifiers cannot be passed as bound parameters, so every identifier
//! that reaches a statement is validated and quoted with the dialect's quote
//! character, doubling any embedded quote character.

use crate::error::{LoadError, Result};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Normalize an arbitrary column name into an upper-case SQL identifier.
///
/// Upper-cases, replaces every character outside `[A-Z0-9_]` with `_`, trims
/// leading and trailing `_`, uses `C` for an empty result and prefixes `C_`
/// when the result would start with a digit.
pub fn sanitize(raw: &str) -> String {
    let replaced: String = raw
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' { c } else { '_' })
        .collect();

    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        return "C".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("C_{}", trimmed);
    }
    trimmed.to_string()
}

/// Ordered mapping from original column names to sanitized identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnNameMapping {
    pairs: Vec<(String, String)>,
}

impl ColumnNameMapping {
    /// Mapping that keeps every name as given.
    pub fn verbatim<S: AsRef<str>>(names: &[S]) -> Self {
        let mut pairs: Vec<(String, String)> = Vec::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            if !pairs.iter().any(|(o, _)| o == name) {
                pairs.push((name.to_string(), name.to_string()));
            }
        }
        Self { pairs }
    }

    /// Mapped identifier for an original column name.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(o, _)| o == original)
            .map(|(_, m)| m.as_str())
    }

    /// Resolve a name that may be given either as original or as mapped.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.get(name).or_else(|| {
            self.pairs
                .iter()
                .find(|(_, m)| m == name)
                .map(|(_, m)| m.as_str())
        })
    }

    /// Mapped names in source order.
    pub fn mapped_names(&self) -> Vec<String> {
        self.pairs.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(o, m)| (o.as_str(), m.as_str()))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Build a collision-free mapping for `names`, prefixing each with `prefix`.
///
/// Each name is sanitized on its own before the prefix is attached, so the
/// digit and empty-name rules still apply under a prefix: `"2name"` with
/// prefix `"HR_"` becomes `HR_C_2NAME`, and `""` becomes `HR_C`.
///
/// Duplicates after sanitizing get `_2`, `_3`, ... in encounter order, so the
/// same input always yields the same mapping. A name that occurs twice in the
/// input keeps the identifier of its first occurrence.
pub fn build_mapping<S: AsRef<str>>(names: &[S], prefix: &str) -> ColumnNameMapping {
    let mut pairs: Vec<(String, String)> = Vec::with_capacity(names.len());

    for name in names {
        let name = name.as_ref();
        if pairs.iter().any(|(o, _)| o == name) {
            continue;
        }

        let base = sanitize(&format!("{}{}", prefix, sanitize(name)));
        let mut candidate = base.clone();
        let mut suffix = 2;
        while pairs.iter().any(|(_, m)| *m == candidate) {
            candidate = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        pairs.push((name.to_string(), candidate));
    }

    ColumnNameMapping { pairs }
}

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding maximum length
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LoadError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(LoadError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Validate a procedure parameter name and strip a leading `@`.
///
/// Parameter names are spliced into `EXEC`/`CALL` text, so only
/// `[A-Za-z0-9_]` is accepted.
pub fn parameter_name(raw: &str) -> Result<&str> {
    let name = raw.strip_prefix('@').unwrap_or(raw);
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(LoadError::Config(format!(
            "Invalid procedure parameter name: {:?}",
            raw
        )));
    }
    Ok(name)
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MySQL identifier using backticks.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a SQL Server identifier using brackets.
///
/// Escapes closing brackets by doubling them and wraps in brackets.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Render a string literal body, doubling single quotes.
pub fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}
