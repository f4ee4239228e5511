//! SQL Server rules.
//!
//! SQL Server has no `IF NOT EXISTS` for schemas, no `OR REPLACE` for views
//! and requires `CREATE SCHEMA`/`CREATE PROCEDURE` to be alone in a batch, so
//! existence checks go through `sys.schemas`/`OBJECT_ID` and creation through
//! dynamic `EXEC(N'...')`.

use super::{select_parts, Dialect, DialectKind, DialectRules, SelectOptions, Statement};
use crate::core::identifier::{escape_literal, quote_mssql};
use crate::core::schema::{SqlKind, TableIdentity, TextLength, TextUnit};
use crate::core::value::Value;
use crate::error::Result;

pub(super) static RULES: DialectRules = DialectRules {
    kind: DialectKind::Mssql,
    quote: quote_mssql,
    placeholder,
    column_type,
    text_unit: TextUnit::Utf16,
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

fn placeholder(index: usize) -> String {
    format!("@P{}", index)
}

fn column_type(kind: &SqlKind) -> String {
    match kind {
        SqlKind::Integer => "BIGINT".to_string(),
        SqlKind::Float => "FLOAT".to_string(),
        SqlKind::Boolean => "BIT".to_string(),
        SqlKind::DateTime => "DATETIME2".to_string(),
        SqlKind::Text(TextLength::Bounded(n)) => format!("NVARCHAR({})", n),
        SqlKind::Text(TextLength::Unbounded) => "NVARCHAR(MAX)".to_string(),
    }
}

/// `OBJECT_ID(N'[s].[o]', N'<type>')` for an object of the given type code.
fn object_id(d: &Dialect, id: &TableIdentity, type_code: &str) -> Result<String> {
    Ok(format!(
        "OBJECT_ID(N'{}', N'{}')",
        escape_literal(&d.qualify(id)?),
        type_code
    ))
}

fn create_schema(d: &Dialect, schema: &str) -> Result<Vec<Statement>> {
    Ok(vec![Statement::with_params(
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = @P1) EXEC(N'CREATE SCHEMA {}')",
            escape_literal(&d.quote(schema)?)
        ),
        vec![Value::from(schema)],
    )])
}

fn drop_table(d: &Dialect, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
    let table = d.qualify(id)?;
    let sql = if if_exists {
        format!("IF {} IS NOT NULL DROP TABLE {}", object_id(d, id, "U")?, table)
    } else {
        format!("DROP TABLE {}", table)
    };
    Ok(vec![Statement::new(sql)])
}

fn truncate_table(d: &Dialect, id: &TableIdentity) -> Result<Vec<Statement>> {
    Ok(vec![Statement::new(format!("TRUNCATE TABLE {}", d.qualify(id)?))])
}

fn create_view(d: &Dialect, id: &TableIdentity, select_sql: &str, or_replace: bool) -> Result<Vec<Statement>> {
    let mut statements = Vec::with_capacity(2);
    if or_replace {
        statements.extend(drop_view(d, id, true)?);
    }
    statements.push(Statement::new(format!(
        "CREATE VIEW {} AS {}",
        d.qualify(id)?,
        select_sql
    )));
    Ok(statements)
}

fn drop_view(d: &Dialect, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
    let view = d.qualify(id)?;
    let sql = if if_exists {
        format!("IF {} IS NOT NULL DROP VIEW {}", object_id(d, id, "V")?, view)
    } else {
        format!("DROP VIEW {}", view)
    };
    Ok(vec![Statement::new(sql)])
}

/// Stub-then-ALTER keeps the create idempotent without a drop window.
fn create_procedure(d: &Dialect, id: &TableIdentity, body_sql: &str, or_alter: bool) -> Result<Vec<Statement>> {
    let proc = d.qualify(id)?;
    if !or_alter {
        return Ok(vec![Statement::new(format!("CREATE PROCEDURE {} {}", proc, body_sql))]);
    }
    Ok(vec![
        Statement::new(format!(
            "IF {} IS NULL EXEC(N'CREATE PROCEDURE {} AS BEGIN SET NOCOUNT ON; END')",
            object_id(d, id, "P")?,
            escape_literal(&proc)
        )),
        Statement::new(format!("ALTER PROCEDURE {} {}", proc, body_sql)),
    ])
}

fn call_procedure(d: &Dialect, id: &TableIdentity, params: &[(&str, &Value)]) -> Result<Statement> {
    let bindings: Vec<String> = params
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("@{} = {}", name, placeholder(i + 1)))
        .collect();

    let mut sql = format!("EXEC {}", d.qualify(id)?);
    if !bindings.is_empty() {
        sql.push(' ');
        sql.push_str(&bindings.join(", "));
    }
    Ok(Statement::with_params(
        sql,
        params.iter().map(|(_, v)| (*v).clone()).collect(),
    ))
}

fn select(d: &Dialect, id: &TableIdentity, opts: &SelectOptions) -> Result<Statement> {
    let (columns, from, tail) = select_parts(d, id, opts)?;
    let top = opts.limit.map(|n| format!("TOP ({}) ", n)).unwrap_or_default();
    Ok(Statement::with_params(
        format!("SELECT {}{} FROM {}{}", top, columns, from, tail),
        opts.params.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dialect() -> Dialect {
        Dialect::new(DialectKind::Mssql)
    }

    #[test]
    fn test_create_schema_is_guarded() {
        let stmts = dialect().create_schema_if_not_exists("hr").unwrap();
        assert_eq!(
            stmts[0].sql,
            "IF NOT EXISTS (SELECT 1 FROM sys.schemas WHERE name = @P1) EXEC(N'CREATE SCHEMA [hr]')"
        );
        assert_eq!(stmts[0].params, vec![Value::from("hr")]);
    }

    #[test]
    fn test_create_schema_escapes_literal() {
        let stmts = dialect().create_schema_if_not_exists("o'neil").unwrap();
        assert!(stmts[0].sql.ends_with("EXEC(N'CREATE SCHEMA [o''neil]')"));
    }

    #[test]
    fn test_drop_table() {
        let id = TableIdentity::new("dbo", "t");
        assert_eq!(
            dialect().drop_table(&id, true).unwrap()[0].sql,
            "IF OBJECT_ID(N'[dbo].[t]', N'U') IS NOT NULL DROP TABLE [dbo].[t]"
        );
        assert_eq!(dialect().drop_table(&id, false).unwrap()[0].sql, "DROP TABLE [dbo].[t]");
    }

    #[test]
    fn test_view_drop_then_create() {
        let id = TableIdentity::new("dbo", "v");
        let stmts = dialect().create_or_replace_view(&id, "SELECT 1 AS x", true).unwrap();
        assert_eq!(stmts.len(), 2);
        assert_eq!(
            stmts[0].sql,
            "IF OBJECT_ID(N'[dbo].[v]', N'V') IS NOT NULL DROP VIEW [dbo].[v]"
        );
        assert_eq!(stmts[1].sql, "CREATE VIEW [dbo].[v] AS SELECT 1 AS x");

        let plain = dialect().create_or_replace_view(&id, "SELECT 1 AS x", false).unwrap();
        assert_eq!(plain.len(), 1);
    }

    #[test]
    fn test_procedure_stub_then_alter() {
        let id = TableIdentity::new("dbo", "p");
        let stmts = dialect()
            .create_or_alter_procedure(&id, "(@n INT) AS BEGIN SELECT @n AS n END", true)
            .unwrap();
        assert_eq!(
            stmts[0].sql,
            "IF OBJECT_ID(N'[dbo].[p]', N'P') IS NULL EXEC(N'CREATE PROCEDURE [dbo].[p] AS BEGIN SET NOCOUNT ON; END')"
        );
        assert_eq!(
            stmts[1].sql,
            "ALTER PROCEDURE [dbo].[p] (@n INT) AS BEGIN SELECT @n AS n END"
        );
    }

    #[test]
    fn test_exec_named_bindings() {
        let id = TableIdentity::new("dbo", "p");
        let params = vec![
            ("@n".to_string(), Value::Int(3)),
            ("label".to_string(), Value::from("x")),
        ];
        let stmt = dialect().call_procedure(&id, &params).unwrap();
        assert_eq!(stmt.sql, "EXEC [dbo].[p] @n = @P1, @label = @P2");
        assert_eq!(stmt.params, vec![Value::Int(3), Value::from("x")]);

        let bare = dialect().call_procedure(&id, &[]).unwrap();
        assert_eq!(bare.sql, "EXEC [dbo].[p]");
    }

    #[test]
    fn test_column_types() {
        assert_eq!(column_type(&SqlKind::Float), "FLOAT");
        assert_eq!(column_type(&SqlKind::Boolean), "BIT");
        assert_eq!(column_type(&SqlKind::DateTime), "DATETIME2");
    }
}
