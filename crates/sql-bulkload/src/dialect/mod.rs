//! SQL dialects as rule tables.
//!
//! Every dialect is a static [`DialectRules`] value: quoting, placeholders,
//! type names, and one optional rendering function per dialect-specific
//! operation. A missing rule means the dialect does not support the
//! operation, and asking for it fails with
//! [`LoadError::UnsupportedDialectOperation`] instead of doing nothing.
//!
//! Operations whose SQL is the same everywhere (CREATE TABLE, COUNT, DELETE,
//! multi-row INSERT) are rendered once here from the dialect's primitives.
//!
//! ```rust,ignore
//! let dialect = Dialect::from_db_type("postgres")?;
//! let stmts = dialect.drop_table(&TableIdentity::new("public", "users"), true)?;
//! assert_eq!(stmts[0].sql, r#"DROP TABLE IF EXISTS "public"."users" CASCADE"#);
//! ```

mod mssql;
mod mysql;
mod postgres;

use std::fmt;

use crate::core::identifier::parameter_name;
use crate::core::schema::{SqlKind, TableIdentity, TableSpec, TextUnit};
use crate::core::value::Value;
use crate::error::{LoadError, Result};

/// Supported database products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    Mssql,
    Postgres,
    Mysql,
}

impl DialectKind {
    /// Parse a database type string (as used in config files and URLs).
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "mssql" | "sqlserver" | "sql_server" => Ok(DialectKind::Mssql),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::Mysql),
            other => Err(LoadError::Config(format!(
                "Unknown database type '{}' (expected mssql, postgresql or mysql)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DialectKind::Mssql => "mssql",
            DialectKind::Postgres => "postgresql",
            DialectKind::Mysql => "mysql",
        }
    }

    /// Default TCP port.
    pub fn default_port(&self) -> u16 {
        match self {
            DialectKind::Mssql => 1433,
            DialectKind::Postgres => 5432,
            DialectKind::Mysql => 3306,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dialect-specific operations, for capability checks and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSchema,
    DropTable,
    TruncateTable,
    TruncateCascade,
    CreateView,
    DropView,
    CreateProcedure,
    CallProcedure,
    Select,
}

impl Operation {
    pub const ALL: [Operation; 9] = [
        Operation::CreateSchema,
        Operation::DropTable,
        Operation::TruncateTable,
        Operation::TruncateCascade,
        Operation::CreateView,
        Operation::DropView,
        Operation::CreateProcedure,
        Operation::CallProcedure,
        Operation::Select,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateSchema => "create_schema",
            Operation::DropTable => "drop_table",
            Operation::TruncateTable => "truncate_table",
            Operation::TruncateCascade => "truncate_cascade",
            Operation::CreateView => "create_view",
            Operation::DropView => "drop_view",
            Operation::CreateProcedure => "create_procedure",
            Operation::CallProcedure => "call_procedure",
            Operation::Select => "select",
        }
    }
}

/// A SQL statement plus its bound parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Options for a single-table SELECT.
///
/// `where_clause` and `order_by` are inserted verbatim; only `params` are
/// bound, using the dialect's placeholder syntax inside `where_clause`.
#[derive(Debug, Clone, Default)]
pub struct SelectOptions {
    /// Columns to read; empty means `*`.
    pub columns: Vec<String>,
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
    pub params: Vec<Value>,
}

pub(crate) type SchemaRule = fn(&Dialect, &str) -> Result<Vec<Statement>>;
pub(crate) type TableRule = fn(&Dialect, &TableIdentity) -> Result<Vec<Statement>>;
pub(crate) type GuardedRule = fn(&Dialect, &TableIdentity, bool) -> Result<Vec<Statement>>;
pub(crate) type DefinitionRule = fn(&Dialect, &TableIdentity, &str, bool) -> Result<Vec<Statement>>;
pub(crate) type CallRule = fn(&Dialect, &TableIdentity, &[(&str, &Value)]) -> Result<Statement>;
pub(crate) type SelectRule = fn(&Dialect, &TableIdentity, &SelectOptions) -> Result<Statement>;

/// Rendering rules for one dialect.
#[derive(Debug)]
pub struct DialectRules {
    pub(crate) kind: DialectKind,
    pub(crate) quote: fn(&str) -> Result<String>,
    pub(crate) placeholder: fn(usize) -> String,
    pub(crate) column_type: fn(&SqlKind) -> String,
    pub(crate) text_unit: TextUnit,
    pub(crate) create_schema: Option<SchemaRule>,
    pub(crate) drop_table: Option<GuardedRule>,
    pub(crate) truncate_table: Option<TableRule>,
    pub(crate) truncate_cascade: Option<TableRule>,
    pub(crate) create_view: Option<DefinitionRule>,
    pub(crate) drop_view: Option<GuardedRule>,
    pub(crate) create_procedure: Option<DefinitionRule>,
    pub(crate) call_procedure: Option<CallRule>,
    pub(crate) select: Option<SelectRule>,
}

impl DialectRules {
    fn has(&self, op: Operation) -> bool {
        match op {
            Operation::CreateSchema => self.create_schema.is_some(),
            Operation::DropTable => self.drop_table.is_some(),
            Operation::TruncateTable => self.truncate_table.is_some(),
            Operation::TruncateCascade => self.truncate_cascade.is_some(),
            Operation::CreateView => self.create_view.is_some(),
            Operation::DropView => self.drop_view.is_some(),
            Operation::CreateProcedure => self.create_procedure.is_some(),
            Operation::CallProcedure => self.call_procedure.is_some(),
            Operation::Select => self.select.is_some(),
        }
    }
}

/// Handle to a dialect's rule table.
#[derive(Clone, Copy)]
pub struct Dialect {
    rules: &'static DialectRules,
}

impl fmt::Debug for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Dialect").field(&self.rules.kind).finish()
    }
}

impl PartialEq for Dialect {
    fn eq(&self, other: &Self) -> bool {
        self.rules.kind == other.rules.kind
    }
}

impl Eq for Dialect {}

impl Dialect {
    pub fn new(kind: DialectKind) -> Self {
        let rules = match kind {
            DialectKind::Mssql => &mssql::RULES,
            DialectKind::Postgres => &postgres::RULES,
            DialectKind::Mysql => &mysql::RULES,
        };
        Self { rules }
    }

    pub fn from_db_type(db_type: &str) -> Result<Self> {
        DialectKind::from_db_type(db_type).map(Self::new)
    }

    pub fn kind(&self) -> DialectKind {
        self.rules.kind
    }

    pub fn name(&self) -> &'static str {
        self.rules.kind.name()
    }

    /// Whether this dialect has a rule for `op`.
    pub fn supports(&self, op: Operation) -> bool {
        self.rules.has(op)
    }

    /// Operations this dialect can render.
    pub fn capabilities(&self) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }

    fn rule<T>(&self, op: Operation, rule: Option<T>) -> Result<T> {
        rule.ok_or_else(|| LoadError::unsupported(self.name(), op.name()))
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    /// Validate and quote one identifier.
    pub fn quote(&self, name: &str) -> Result<String> {
        (self.rules.quote)(name)
    }

    /// Fully qualified, quoted `schema.object` name.
    pub fn qualify(&self, id: &TableIdentity) -> Result<String> {
        Ok(format!("{}.{}", self.quote(&id.schema)?, self.quote(&id.table)?))
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        (self.rules.placeholder)(index)
    }

    /// Column type as written in DDL.
    pub fn column_type_sql(&self, kind: &SqlKind) -> String {
        (self.rules.column_type)(kind)
    }

    /// Unit bounded text column lengths are declared in.
    pub fn text_unit(&self) -> TextUnit {
        self.rules.text_unit
    }

    fn quote_list(&self, names: &[String]) -> Result<String> {
        Ok(names
            .iter()
            .map(|n| self.quote(n))
            .collect::<Result<Vec<_>>>()?
            .join(", "))
    }

    // =========================================================================
    // Dialect-specific operations
    // =========================================================================

    pub fn create_schema_if_not_exists(&self, schema: &str) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::CreateSchema, self.rules.create_schema)?;
        rule(self, schema)
    }

    pub fn drop_table(&self, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::DropTable, self.rules.drop_table)?;
        rule(self, id, if_exists)
    }

    pub fn truncate_table(&self, id: &TableIdentity) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::TruncateTable, self.rules.truncate_table)?;
        rule(self, id)
    }

    /// Truncate, also truncating tables that reference this one.
    pub fn truncate_cascade(&self, id: &TableIdentity) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::TruncateCascade, self.rules.truncate_cascade)?;
        rule(self, id)
    }

    pub fn create_or_replace_view(
        &self,
        id: &TableIdentity,
        select_sql: &str,
        or_replace: bool,
    ) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::CreateView, self.rules.create_view)?;
        rule(self, id, select_sql, or_replace)
    }

    pub fn drop_view(&self, id: &TableIdentity, if_exists: bool) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::DropView, self.rules.drop_view)?;
        rule(self, id, if_exists)
    }

    /// Create (or replace) a stored procedure.
    ///
    /// `body_sql` is everything after the procedure name: parameter list,
    /// options and body, in the dialect's own syntax.
    pub fn create_or_alter_procedure(
        &self,
        id: &TableIdentity,
        body_sql: &str,
        or_alter: bool,
    ) -> Result<Vec<Statement>> {
        let rule = self.rule(Operation::CreateProcedure, self.rules.create_procedure)?;
        rule(self, id, body_sql, or_alter)
    }

    /// Call a stored procedure with named parameters, bound in the given order.
    ///
    /// A leading `@` on parameter names is accepted and dropped.
    pub fn call_procedure(&self, id: &TableIdentity, params: &[(String, Value)]) -> Result<Statement> {
        let rule = self.rule(Operation::CallProcedure, self.rules.call_procedure)?;
        let named = params
            .iter()
            .map(|(name, value)| Ok((parameter_name(name)?, value)))
            .collect::<Result<Vec<_>>>()?;
        rule(self, id, &named)
    }

    pub fn select(&self, id: &TableIdentity, opts: &SelectOptions) -> Result<Statement> {
        let rule = self.rule(Operation::Select, self.rules.select)?;
        rule(self, id, opts)
    }

    // =========================================================================
    // Shared operations
    // =========================================================================

    /// CREATE TABLE plus a named primary key constraint when the spec has one.
    pub fn create_table(&self, spec: &TableSpec) -> Result<Vec<Statement>> {
        if spec.columns.is_empty() {
            return Err(LoadError::Config(format!(
                "Cannot create table {} without columns",
                spec.identity
            )));
        }

        let table = self.qualify(&spec.identity)?;
        let columns = spec
            .columns
            .iter()
            .map(|c| {
                let null = if spec.is_pk_column(&c.name) { "NOT NULL" } else { "NULL" };
                Ok(format!(
                    "    {} {} {}",
                    self.quote(&c.name)?,
                    self.column_type_sql(&c.kind),
                    null
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut statements = vec![Statement::new(format!(
            "CREATE TABLE {} (\n{}\n)",
            table,
            columns.join(",\n")
        ))];

        if spec.has_pk() {
            statements.push(Statement::new(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                table,
                self.quote(&spec.primary_key_name())?,
                self.quote_list(&spec.primary_key)?
            )));
        }

        Ok(statements)
    }

    /// Query returning one row with `cnt` = 1 when the table exists.
    pub fn table_exists(&self, id: &TableIdentity) -> Statement {
        Statement::with_params(
            format!(
                "SELECT COUNT(*) AS cnt FROM INFORMATION_SCHEMA.TABLES \
                 WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}",
                self.placeholder(1),
                self.placeholder(2)
            ),
            vec![Value::from(id.schema.as_str()), Value::from(id.table.as_str())],
        )
    }

    pub fn count(&self, id: &TableIdentity) -> Result<Statement> {
        Ok(Statement::new(format!(
            "SELECT COUNT(*) AS cnt FROM {}",
            self.qualify(id)?
        )))
    }

    /// DELETE with a caller-supplied predicate.
    pub fn delete_where(&self, id: &TableIdentity, predicate: &str, params: Vec<Value>) -> Result<Statement> {
        Ok(Statement::with_params(
            format!("DELETE FROM {} WHERE {}", self.qualify(id)?, predicate),
            params,
        ))
    }

    /// Multi-row INSERT text for `row_count` rows of `columns`.
    pub fn insert_values(&self, id: &TableIdentity, columns: &[String], row_count: usize) -> Result<String> {
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.qualify(id)?,
            self.quote_list(columns)?
        );
        let mut index = 1;
        for row in 0..row_count {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for col in 0..columns.len() {
                if col > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&self.placeholder(index));
                index += 1;
            }
            sql.push(')');
        }
        Ok(sql)
    }

    /// Cheapest round trip for health checks.
    pub fn ping(&self) -> Statement {
        Statement::new("SELECT 1")
    }
}

/// Column list, FROM target and WHERE/ORDER BY tail of a SELECT.
pub(crate) fn select_parts(d: &Dialect, id: &TableIdentity, opts: &SelectOptions) -> Result<(String, String, String)> {
    let columns = if opts.columns.is_empty() {
        "*".to_string()
    } else {
        d.quote_list(&opts.columns)?
    };

    let mut tail = String::new();
    if let Some(where_clause) = opts.where_clause.as_deref().filter(|w| !w.trim().is_empty()) {
        tail.push_str(&format!(" WHERE {}", where_clause));
    }
    if let Some(order_by) = opts.order_by.as_deref().filter(|o| !o.trim().is_empty()) {
        tail.push_str(&format!(" ORDER BY {}", order_by));
    }

    Ok((columns, d.qualify(id)?, tail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{ColumnType, TextLength};

    fn all() -> [Dialect; 3] {
        [
            Dialect::new(DialectKind::Mssql),
            Dialect::new(DialectKind::Postgres),
            Dialect::new(DialectKind::Mysql),
        ]
    }

    fn people() -> TableIdentity {
        TableIdentity::new("hr", "people")
    }

    #[test]
    fn test_from_db_type_aliases() {
        assert_eq!(Dialect::from_db_type("SqlServer").unwrap().kind(), DialectKind::Mssql);
        assert_eq!(Dialect::from_db_type("pg").unwrap().kind(), DialectKind::Postgres);
        assert_eq!(Dialect::from_db_type("mariadb").unwrap().kind(), DialectKind::Mysql);
        assert!(Dialect::from_db_type("oracle").is_err());
    }

    #[test]
    fn test_qualify_per_dialect() {
        let id = TableIdentity::new("my]schema", "t");
        let [mssql, pg, mysql] = all();
        assert_eq!(mssql.qualify(&id).unwrap(), "[my]]schema].[t]");
        assert_eq!(pg.qualify(&id).unwrap(), "\"my]schema\".\"t\"");
        assert_eq!(mysql.qualify(&id).unwrap(), "`my]schema`.`t`");
    }

    #[test]
    fn test_qualify_rejects_bad_identifier() {
        let id = TableIdentity::new("", "t");
        for d in all() {
            assert!(d.qualify(&id).is_err());
        }
    }

    #[test]
    fn test_capability_table() {
        let [mssql, pg, mysql] = all();
        assert!(pg.supports(Operation::TruncateCascade));
        assert!(!mssql.supports(Operation::TruncateCascade));
        assert!(!mysql.supports(Operation::TruncateCascade));
        assert_eq!(pg.capabilities().len(), Operation::ALL.len());
        assert_eq!(mssql.capabilities().len(), Operation::ALL.len() - 1);
    }

    #[test]
    fn test_unsupported_operation_errors() {
        let mssql = Dialect::new(DialectKind::Mssql);
        match mssql.truncate_cascade(&people()) {
            Err(LoadError::UnsupportedDialectOperation { dialect, operation }) => {
                assert_eq!(dialect, "mssql");
                assert_eq!(operation, "truncate_cascade");
            }
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_create_table_with_primary_key() {
        let spec = TableSpec {
            identity: people(),
            columns: vec![
                ColumnType::new("ID", SqlKind::Integer),
                ColumnType::new("NAME", SqlKind::Text(TextLength::Bounded(40))),
                ColumnType::new("BIO", SqlKind::Text(TextLength::Unbounded)),
            ],
            primary_key: vec!["ID".into()],
        };
        let mssql = Dialect::new(DialectKind::Mssql).create_table(&spec).unwrap();
        assert_eq!(mssql.len(), 2);
        assert!(mssql[0].sql.starts_with("CREATE TABLE [hr].[people] ("));
        assert!(mssql[0].sql.contains("[ID] BIGINT NOT NULL"));
        assert!(mssql[0].sql.contains("[NAME] NVARCHAR(40) NULL"));
        assert!(mssql[0].sql.contains("[BIO] NVARCHAR(MAX) NULL"));
        assert_eq!(
            mssql[1].sql,
            "ALTER TABLE [hr].[people] ADD CONSTRAINT [PK_people] PRIMARY KEY ([ID])"
        );

        let pg = Dialect::new(DialectKind::Postgres).create_table(&spec).unwrap();
        assert!(pg[0].sql.contains("\"NAME\" VARCHAR(40) NULL"));
        assert!(pg[0].sql.contains("\"BIO\" TEXT NULL"));

        let mysql = Dialect::new(DialectKind::Mysql).create_table(&spec).unwrap();
        assert!(mysql[0].sql.contains("`BIO` LONGTEXT NULL"));
    }

    #[test]
    fn test_create_table_without_pk_is_single_statement() {
        let spec = TableSpec {
            identity: people(),
            columns: vec![ColumnType::new("A", SqlKind::Boolean)],
            primary_key: vec![],
        };
        for d in all() {
            assert_eq!(d.create_table(&spec).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_table_exists_placeholders() {
        let [mssql, pg, mysql] = all();
        assert!(mssql.table_exists(&people()).sql.ends_with("TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2"));
        assert!(pg.table_exists(&people()).sql.ends_with("TABLE_SCHEMA = $1 AND TABLE_NAME = $2"));
        let stmt = mysql.table_exists(&people());
        assert!(stmt.sql.ends_with("TABLE_SCHEMA = ? AND TABLE_NAME = ?"));
        assert_eq!(stmt.params, vec![Value::from("hr"), Value::from("people")]);
    }

    #[test]
    fn test_select_top_and_limit() {
        let opts = SelectOptions {
            columns: vec!["ID".into(), "NAME".into()],
            where_clause: Some("ID > @P1".into()),
            order_by: Some("ID DESC".into()),
            limit: Some(10),
            params: vec![Value::Int(5)],
        };
        let [mssql, pg, mysql] = all();
        assert_eq!(
            mssql.select(&people(), &opts).unwrap().sql,
            "SELECT TOP (10) [ID], [NAME] FROM [hr].[people] WHERE ID > @P1 ORDER BY ID DESC"
        );
        let pg_opts = SelectOptions {
            where_clause: Some("\"ID\" > $1".into()),
            ..opts.clone()
        };
        let stmt = pg.select(&people(), &pg_opts).unwrap();
        assert_eq!(
            stmt.sql,
            "SELECT \"ID\", \"NAME\" FROM \"hr\".\"people\" WHERE \"ID\" > $1 ORDER BY ID DESC LIMIT 10"
        );
        assert_eq!(stmt.params, vec![Value::Int(5)]);
        let all_rows = SelectOptions::default();
        assert_eq!(
            mysql.select(&people(), &all_rows).unwrap().sql,
            "SELECT * FROM `hr`.`people`"
        );
    }

    #[test]
    fn test_count_and_delete() {
        let [mssql, pg, _] = all();
        assert_eq!(
            mssql.count(&people()).unwrap().sql,
            "SELECT COUNT(*) AS cnt FROM [hr].[people]"
        );
        let stmt = pg
            .delete_where(&people(), "\"AGE\" < $1", vec![Value::Int(18)])
            .unwrap();
        assert_eq!(stmt.sql, "DELETE FROM \"hr\".\"people\" WHERE \"AGE\" < $1");
        assert_eq!(stmt.params.len(), 1);
    }

    #[test]
    fn test_insert_values_numbering() {
        let cols = vec!["A".to_string(), "B".to_string()];
        let [mssql, pg, mysql] = all();
        assert_eq!(
            mssql.insert_values(&people(), &cols, 2).unwrap(),
            "INSERT INTO [hr].[people] ([A], [B]) VALUES (@P1, @P2), (@P3, @P4)"
        );
        assert_eq!(
            pg.insert_values(&people(), &cols, 1).unwrap(),
            "INSERT INTO \"hr\".\"people\" (\"A\", \"B\") VALUES ($1, $2)"
        );
        assert_eq!(
            mysql.insert_values(&people(), &cols, 2).unwrap(),
            "INSERT INTO `hr`.`people` (`A`, `B`) VALUES (?, ?), (?, ?)"
        );
    }

    #[test]
    fn test_call_procedure_rejects_bad_parameter_names() {
        for d in all() {
            let params = vec![("n; DROP TABLE x".to_string(), Value::Int(1))];
            assert!(matches!(
                d.call_procedure(&people(), &params),
                Err(LoadError::Config(_))
            ));
        }
    }
}
