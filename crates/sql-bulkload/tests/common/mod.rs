//! In-process database double for repository tests.
//!
//! `MockDatabase` implements `ConnectionSource` and keeps just enough state to
//! answer the statements a repository issues: which tables exist, the rows
//! appended to them, and a log of every call. Appends are transactional:
//! rows become visible on commit and are discarded on rollback. DDL applies
//! immediately.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sql_bulkload::{
    Chunk, Connection, ConnectionSource, Dialect, DialectKind, LoadError, Result, Row, Statement,
    TableIdentity, Value,
};
use tokio::sync::mpsc;

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Acquire,
    Begin,
    Commit,
    Rollback,
    Execute(String),
    Query(String),
    Append { table: String, rows: usize },
}

#[derive(Debug, Default)]
struct MockTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct State {
    tables: BTreeMap<String, MockTable>,
    events: Vec<Event>,
    appends: usize,
    fail_append_at: Option<usize>,
}

#[derive(Clone)]
pub struct MockDatabase {
    dialect: Dialect,
    state: Arc<Mutex<State>>,
}

impl MockDatabase {
    pub fn new(kind: DialectKind) -> Self {
        Self {
            dialect: Dialect::new(kind),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Make the `n`th bulk append (1-based) fail after writing half its rows.
    pub fn fail_append_at(&self, n: usize) {
        self.state.lock().unwrap().fail_append_at = Some(n);
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    /// SQL of every executed statement, in order.
    pub fn executed(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// SQL of every query, in order.
    pub fn queried(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Query(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn append_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Append { .. }))
            .count()
    }

    pub fn table_exists(&self, id: &TableIdentity) -> bool {
        let name = self.qualify(id);
        self.state.lock().unwrap().tables.contains_key(&name)
    }

    /// Committed rows of a table.
    pub fn rows(&self, id: &TableIdentity) -> Vec<Vec<Value>> {
        let name = self.qualify(id);
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&name)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Column names seen by appends to a table.
    pub fn columns(&self, id: &TableIdentity) -> Vec<String> {
        let name = self.qualify(id);
        self.state
            .lock()
            .unwrap()
            .tables
            .get(&name)
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    fn qualify(&self, id: &TableIdentity) -> String {
        self.dialect.qualify(id).unwrap()
    }
}

#[async_trait]
impl ConnectionSource for MockDatabase {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn describe(&self) -> String {
        format!("mock://{}", self.dialect.name())
    }

    async fn acquire(&self) -> Result<Box<dyn Connection>> {
        self.state.lock().unwrap().events.push(Event::Acquire);
        Ok(Box::new(MockConnection {
            db: self.clone(),
            in_transaction: false,
            pending: Vec::new(),
        }))
    }
}

struct MockConnection {
    db: MockDatabase,
    in_transaction: bool,
    pending: Vec<(String, Vec<String>, Vec<Vec<Value>>)>,
}

impl MockConnection {
    fn record(&self, event: Event) {
        self.db.state.lock().unwrap().events.push(event);
    }

    fn apply(&self, name: String, columns: Vec<String>, rows: Vec<Vec<Value>>) {
        let mut state = self.db.state.lock().unwrap();
        let table = state.tables.entry(name).or_default();
        table.columns = columns;
        table.rows.extend(rows);
    }

    fn answer(&self, stmt: &Statement) -> Vec<Row> {
        let state = self.db.state.lock().unwrap();
        let cnt = |n: usize| vec![Row::new(vec!["cnt".to_string()].into(), vec![Value::Int(n as i64)])];

        if stmt.sql.contains("INFORMATION_SCHEMA.TABLES") {
            let schema = stmt.params[0].to_string();
            let table = stmt.params[1].to_string();
            let name = self.db.qualify(&TableIdentity::new(schema, table));
            return cnt(usize::from(state.tables.contains_key(&name)));
        }
        if stmt.sql.trim() == "SELECT 1" {
            return vec![Row::new(vec!["one".to_string()].into(), vec![Value::Int(1)])];
        }

        let Some((_, table)) = state
            .tables
            .iter()
            .find(|(name, _)| stmt.sql.contains(name.as_str()))
        else {
            return Vec::new();
        };
        if stmt.sql.contains("COUNT(*) AS cnt") {
            return cnt(table.rows.len());
        }
        let columns: Arc<[String]> = table.columns.clone().into();
        table
            .rows
            .iter()
            .map(|values| Row::new(columns.clone(), values.clone()))
            .collect()
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, stmt: &Statement) -> Result<u64> {
        self.record(Event::Execute(stmt.sql.clone()));
        let sql = stmt.sql.as_str();
        let mut state = self.db.state.lock().unwrap();

        if let Some(rest) = sql.strip_prefix("CREATE TABLE ") {
            let name = rest.split(" (").next().unwrap_or(rest).to_string();
            if state.tables.contains_key(&name) {
                return Err(LoadError::Source(format!("table {} already exists", name)));
            }
            state.tables.insert(name, MockTable::default());
            return Ok(0);
        }

        let target = state
            .tables
            .keys()
            .find(|name| sql.contains(name.as_str()))
            .cloned();
        match target {
            Some(name) if sql.contains("DROP TABLE") => {
                state.tables.remove(&name);
            }
            Some(name) if sql.contains("TRUNCATE TABLE") => {
                if let Some(table) = state.tables.get_mut(&name) {
                    table.rows.clear();
                }
            }
            _ => {}
        }
        Ok(0)
    }

    async fn query(&mut self, stmt: &Statement) -> Result<Vec<Row>> {
        self.record(Event::Query(stmt.sql.clone()));
        Ok(self.answer(stmt))
    }

    async fn stream(&mut self, stmt: &Statement, tx: &mpsc::Sender<Result<Row>>) -> Result<()> {
        self.record(Event::Query(stmt.sql.clone()));
        for row in self.answer(stmt) {
            if tx.send(Ok(row)).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    async fn bulk_append(&mut self, target: &TableIdentity, chunk: &Chunk) -> Result<u64> {
        let name = self.db.qualify(target);
        self.record(Event::Append {
            table: name.clone(),
            rows: chunk.len(),
        });

        let (exists, failing) = {
            let mut state = self.db.state.lock().unwrap();
            state.appends += 1;
            let failing = state.fail_append_at == Some(state.appends);
            (state.tables.contains_key(&name), failing)
        };
        if !exists {
            return Err(LoadError::Source(format!("table {} does not exist", name)));
        }

        let columns = chunk.column_names();
        let rows = if failing {
            chunk.rows[..chunk.len() / 2].to_vec()
        } else {
            chunk.rows.clone()
        };
        if self.in_transaction {
            self.pending.push((name, columns, rows));
        } else {
            self.apply(name, columns, rows);
        }

        if failing {
            return Err(LoadError::Source("injected append failure".into()));
        }
        Ok(chunk.len() as u64)
    }

    async fn begin(&mut self) -> Result<()> {
        self.record(Event::Begin);
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.record(Event::Commit);
        for (name, columns, rows) in std::mem::take(&mut self.pending) {
            self.apply(name, columns, rows);
        }
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.record(Event::Rollback);
        self.pending.clear();
        self.in_transaction = false;
        Ok(())
    }
}
