//! PostgreSQL rules.

use super::{select_parts, Dialect, DialectKind, DialectRules, SelectOptions, Statement};
use crate::core::identifier::quote_pg;
use crate::core::schema::{SqlKind, TableIdentity, TextLength, TextUnit};
use crate::core::value::Value;
use crate::error::Result;

pub(super) static RULES: DialectRules = DialectRules {
    kind: DialectKind::Postgres,
    quote: quote_pg,
    placeholder,
    column_type,
    text_unit: TextUnit::Chars,
    create_schema: Some(create_schema),
    drop_table: Some(drop_table),
    truncate_table: Some(truncate_table),
    truncate_cascade: Some(truncate_cascade),
    create_view: Some(create_view),
    drop_view: Some(drop_view),
    create_procedure: Some(create_procedure),
    call_procedure: Some(call_procedure),
    select: Some(select),
};

fn placeholder(index: usize) -> String {
    format!("${}", index)
}

fn column_type(kind: &SqlKind) -> String {
    match kind {
        SqlKind::Integer => "BIGINT".to_string(),
        SqlKind::Float => "DOUBLE PRECISION".to_string(),
        SqlKind::Boolean => "BOOLEAN".to_string(),
        SqlKind::DateTime => "TIMESTAMP".to_string(),
        SqlKind::Text(TextLength::Bounded(n)) => format!("VARCHAR({})", n),
        SqlKind::Text(TextLength::Unbounded) => "TEXT".to_string(),
    }
}

fn create_schema(d: &Dialect, schema: &str) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!(
        "CREATE SCHEMA IF NOT EXISTS {}",
        d.quote(schema)?
    ))])
}

fn drop_table(d: &Dialect, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
    let guard = if if_exists { "IF EXISTS " } else { "" };
    Ok(vec![Statement::new(format!(
        "DROP TABLE {}{} CASCADE",
        guard,
        d.qualify(id)?
    ))])
}

fn truncate_table(d: &Dialect, id: &TableIdentity) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!("TRUNCATE TABLE {}", d.qualify(id)?))])
}

fn truncate_cascade(d: &Dialect, id: &TableIdentity) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!(
        "TRUNCATE TABLE {} CASCADE",
        d.qualify(id)?
    ))])
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

fn call_procedure(d: &Dialect, id: &TableIdentity, params: &[(&str, &Value)]) -> Result<Statement> {
    let bindings: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{} => {}", name, placeholder(i + 1)))
        .collect();

    Ok(Statement::with_params(
        format!("CALL {}({})", d.qualify(id)?, bindings.join(", ")),
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

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect() -> Dialect {
        Dialect::new(DialectKind::Postgres)
    }

    fn id() -> TableIdentity {
        TableIdentity::new("public", "t")
    }

    #[test]
    fn test_create_schema() {
        assert_eq!(
            dialect().create_schema_if_not_exists("staging").unwrap()[0].sql,
            "CREATE SCHEMA IF NOT EXISTS \"staging\""
        );
    }

    #[test]
    fn test_drop_cascades() {
        assert_eq!(
            dialect().drop_table(&id(), true).unwrap()[0].sql,
            "DROP TABLE IF EXISTS \"public\".\"t\" CASCADE"
        );
        assert_eq!(
            dialect().drop_table(&id(), false).unwrap()[0].sql,
            "DROP TABLE \"public\".\"t\" CASCADE"
        );
    }

    #[test]
    fn test_truncate_variants() {
        assert_eq!(
            dialect().truncate_table(&id()).unwrap()[0].sql,
            "TRUNCATE TABLE \"public\".\"t\""
        );
        assert_eq!(
            dialect().truncate_cascade(&id()).unwrap()[0].sql,
            "TRUNCATE TABLE \"public\".\"t\" CASCADE"
        );
    }

    #[test]
    fn test_view_or_replace() {
        let stmts = dialect().create_or_replace_view(&id(), "SELECT 1", true).unwrap();
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0].sql, "CREATE OR REPLACE VIEW \"public\".\"t\" AS SELECT 1");
    }

    #[test]
    fn test_procedure_drop_then_create() {
        let stmts = dialect()
            .create_or_alter_procedure(&id(), "(n int) LANGUAGE sql AS $$ SELECT 1 $$", true)
            .unwrap();
        assert_eq!(stmts[0].sql, "DROP PROCEDURE IF EXISTS \"public\".\"t\"");
        assert_eq!(
            stmts[1].sql,
            "CREATE PROCEDURE \"public\".\"t\" (n int) LANGUAGE sql AS $$ SELECT 1 $$"
        );
    }

    #[test]
    fn test_call_named_arguments() {
        let params = vec![("@n".to_string(), Value::Int(3)), ("tag".to_string(), Value::from("a"))];
        let stmt = dialect().call_procedure(&id(), &params).unwrap();
        assert_eq!(stmt.sql, "CALL \"public\".\"t\"(n => $1, tag => $2)");
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(dialect().call_procedure(&id(), &[]).unwrap().sql, "CALL \"public\".\"t\"()");
    }
}
