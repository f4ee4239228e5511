//! MySQL rules. A schema is a database here.

use super::{select_parts, Dialect, DialectKind, DialectRules, SelectOptions, Statement};
use crate::core::identifier::quote_mysql;
use crate::core::schema::{SqlKind, TableIdentity, TextLength, TextUnit};
use crate::core::value::Value;
use crate::error::Result;

pub(super) static RULES: DialectRules = DialectRules {
    kind: DialectKind::Mysql,
    quote: quote_mysql,
    placeholder,
    column_type,
    text_unit: TextUnit::Chars,
    create_schema: Some(create_schema),
    drop_table: Some(drop_table),
    truncate_table: Some(truncate_table),
    truncate_cascade: None,
    create_view: Some(create_view),
    drop_view: Some(drop_view),
    create_procedure: Some(create_procedure),
    call_procedure: Some(call_procedure),
    select: Some(select),
};

fn placeholder(_index: usize) -> String {
    "?".to_string()
}

fn column_type(kind: &SqlKind) -> String {
    match kind {
        SqlKind::Integer => "BIGINT".to_string(),
        SqlKind::Float => "DOUBLE".to_string(),
        SqlKind::Boolean => "BOOLEAN".to_string(),
        SqlKind::DateTime => "DATETIME(6)".to_string(),
        SqlKind::Text(TextLength::Bounded(n)) => format!("VARCHAR({})", n),
        SqlKind::Text(TextLength::Unbounded) => "LONGTEXT".to_string(),
    }
}

fn create_schema(d: &Dialect, schema: &str) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!(
        "CREATE DATABASE IF NOT EXISTS {}",
        d.quote(schema)?
    ))])
}

fn drop_table(d: &Dialect, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
    let guard = if if_exists { "IF EXISTS " } else { "" };
    Ok(vec![Statement::new(format!("DROP TABLE {}{}", guard, d.qualify(id)?))])
}

fn truncate_table(d: &Dialect, id: &TableIdentity) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!("TRUNCATE TABLE {}", d.qualify(id)?))])
}

fn create_view(d: &Dialect, id: &TableIdentity, select_sql: &str, or_replace: bool) -> Result<Vec<Statement>> {
    let verb = if or_replace { "CREATE OR REPLACE VIEW" } else { "CREATE VIEW" };
    Ok(vec![Statement::new(format!(
        "{} {} AS {}",
        verb,
        d.qualify(id)?,
        select_sql
    ))])
}

fn drop_view(d: &Dialect, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
    let guard = if if_exists { "IF EXISTS " } else { "" };
    Ok(vec![Statement::new(format!("DROP VIEW {}{}", guard, d.qualify(id)?))])
}

fn create_procedure(d: &Dialect, id: &TableIdentity, body_sql: &str, or_alter: bool) -> Result<Vec<Statement>> {
    let proc = d.qualify(id)?;
    let mut statements = Vec::with_capacity(2);
    if or_alter {
        statements.push(Statement::new(format!("DROP PROCEDURE IF EXISTS {}", proc)));
    }
    statements.push(Statement::new(format!("CREATE PROCEDURE {} {}", proc, body_sql)));
    Ok(statements)
}

/// Named arguments are not part of MySQL's CALL; parameters bind by position.
fn call_procedure(d: &Dialect, id: &TableIdentity, params: &[(&str, &Value)]) -> Result<Statement> {
    let slots = vec!["?"; params.len()].join(", ");
    Ok(Statement::with_params(
        format!("CALL {}({})", d.qualify(id)?, slots),
        params.iter().map(|(_, v)| (*v).clone()).collect(),
    ))
}

fn select(d: &Dialect, id: &TableIdentity, opts: &SelectOptions) -> Result<Statement> {
    let (columns, from, tail) = select_parts(d, id, opts)?;
    let limit = opts.limit.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    Ok(Statement::with_params(
        format!("SELECT {} FROM {}{}{}", columns, from, tail, limit),
        opts.params.clone(),
    ))
}
