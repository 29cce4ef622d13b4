//! DuckDB-backed sources.
//!
//! One table holds the records of one element type, one column per field.
//! Predicates composed onto a source are pushed into the `WHERE` clause when
//! they translate to SQL and kept as residual in-memory filters otherwise.

use crate::error::{Error, Result};
use crate::query::eval::evaluate_predicate;
use crate::query::expr::Lambda;
use crate::storage::sql::{quote_ident, SqlTranslator};
use crate::storage::{ensure_dispatchable, ProviderContext, Queryable};
use crate::types::{ElementType, Field, FieldType, Record, Value};
use duckdb::{params_from_iter, Connection};
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

const PROVIDER: &str = "duckdb";
const NEW_ID_SQL: &str = "CAST(uuid() AS VARCHAR)";

lazy_static! {
    /// Select lists per element type name and field layout.
    static ref COLUMN_LISTS: RwLock<HashMap<(String, Vec<Field>), Arc<str>>> =
        RwLock::new(HashMap::new());
}

fn column_list(element_type: &ElementType) -> Arc<str> {
    let fields = element_type.fields();
    let key = (element_type.name().to_string(), fields);
    if let Some(columns) = COLUMN_LISTS.read().get(&key) {
        return columns.clone();
    }
    let columns: Arc<str> = key
        .1
        .iter()
        .map(|field| quote_ident(&field.name))
        .collect::<Vec<_>>()
        .join(", ")
        .into();
    COLUMN_LISTS.write().entry(key).or_insert(columns).clone()
}

fn to_sql_value(value: &Value) -> duckdb::types::Value {
    match value {
        Value::Null => duckdb::types::Value::Null,
        Value::Bool(b) => duckdb::types::Value::Boolean(*b),
        Value::Int(i) => duckdb::types::Value::BigInt(*i),
        Value::Float(f) => duckdb::types::Value::Double(*f),
        Value::Text(s) => duckdb::types::Value::Text(s.clone()),
    }
}

fn read_record(row: &duckdb::Row<'_>, element_type: &ElementType) -> duckdb::Result<Record> {
    let mut record = Record::new(element_type.clone());
    for (index, field) in element_type.fields().iter().enumerate() {
        let value = match field.field_type {
            FieldType::Bool => row.get::<_, Option<bool>>(index)?.map(Value::Bool),
            FieldType::Int => row.get::<_, Option<i64>>(index)?.map(Value::Int),
            FieldType::Float => row.get::<_, Option<f64>>(index)?.map(Value::Float),
            FieldType::Text => row.get::<_, Option<String>>(index)?.map(Value::Text),
        };
        record.set(&field.name, value.unwrap_or(Value::Null));
    }
    Ok(record)
}

/// A DuckDB database shared by the sources created from it.
#[derive(Clone)]
pub struct DuckDbBackend {
    conn: Arc<Mutex<Connection>>,
    context: Arc<DuckDbContext>,
}

impl DuckDbBackend {
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::with_connection(Connection::open_in_memory()?))
    }

    /// Open a database file; `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        if path == ":memory:" {
            return Self::new_in_memory();
        }
        debug!(path, "Opening DuckDB database");
        Ok(Self::with_connection(Connection::open(path)?))
    }

    fn with_connection(conn: Connection) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        Self {
            context: Arc::new(DuckDbContext { conn: conn.clone() }),
            conn,
        }
    }

    /// Create the table backing `element_type` if it does not exist yet.
    pub fn create_table(&self, table: &str, element_type: &ElementType) -> Result<()> {
        let columns = element_type
            .fields()
            .iter()
            .map(|field| format!("{} {}", quote_ident(&field.name), field.field_type.sql_type()))
            .collect::<Vec<_>>()
            .join(", ");
        if columns.is_empty() {
            return Err(Error::InvalidData(format!(
                "Element type '{}' has no fields to store",
                element_type
            )));
        }
        let sql = format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), columns);
        debug!(table, element_type = %element_type, "Creating table");
        self.conn.lock().execute_batch(&sql)?;
        Ok(())
    }

    /// A source over `table`, whose rows are records of `element_type`.
    pub fn source(&self, table: &str, element_type: ElementType) -> DuckDbSource {
        DuckDbSource {
            table: table.to_string(),
            element_type,
            conn: self.conn.clone(),
            context: self.context.clone(),
            pushed: Vec::new(),
            residual: Vec::new(),
        }
    }

    pub fn context(&self) -> Arc<DuckDbContext> {
        self.context.clone()
    }
}

/// Execution context of a DuckDB source.
pub struct DuckDbContext {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for DuckDbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DuckDbContext")
    }
}

impl ProviderContext for DuckDbContext {
    fn provider(&self) -> &str {
        PROVIDER
    }

    /// `uuid()` cast to text so it compares with text columns.
    fn new_id_sql(&self) -> &str {
        NEW_ID_SQL
    }

    fn new_id(&self) -> Result<Value> {
        let conn = self.conn.lock();
        let id: String = conn.query_row(&format!("SELECT {}", NEW_ID_SQL), [], |row| row.get(0))?;
        Ok(Value::Text(id))
    }
}

/// A table queried through DuckDB, with composed filters.
#[derive(Clone)]
pub struct DuckDbSource {
    table: String,
    element_type: ElementType,
    conn: Arc<Mutex<Connection>>,
    context: Arc<DuckDbContext>,
    pushed: Vec<String>,
    residual: Vec<Lambda>,
}

impl fmt::Debug for DuckDbSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDbSource")
            .field("table", &self.table)
            .field("element_type", &self.element_type)
            .field("pushed", &self.pushed)
            .field("residual", &self.residual.len())
            .finish()
    }
}

impl DuckDbSource {
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Append records to the table.
    pub fn insert(&self, records: &[Record]) -> Result<()> {
        let fields = self.element_type.fields();
        let placeholders = vec!["?"; fields.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&self.table),
            column_list(&self.element_type),
            placeholders
        );

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                ensure_dispatchable(&self.element_type, record.element_type())?;
                let values: Vec<duckdb::types::Value> = fields
                    .iter()
                    .map(|field| to_sql_value(record.get(&field.name).unwrap_or(&Value::Null)))
                    .collect();
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        debug!(table = %self.table, records = records.len(), "Inserted records");
        Ok(())
    }

    fn where_clause(&self) -> String {
        if self.pushed.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.pushed.join(" AND "))
        }
    }

    fn select(&self, limit: Option<usize>) -> String {
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            column_list(&self.element_type),
            quote_ident(&self.table),
            self.where_clause()
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    fn query(&self, sql: &str) -> Result<Vec<Record>> {
        trace!(sql, "Running DuckDB query");
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| read_record(row, &self.element_type))?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn passes_residual(&self, record: &Record) -> Result<bool> {
        for predicate in &self.residual {
            if !evaluate_predicate(predicate, record)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Rows matching every filter, up to `limit`.
    fn load(&self, limit: Option<usize>) -> Result<Vec<Record>> {
        if self.residual.is_empty() {
            return self.query(&self.select(limit));
        }
        let mut matched = Vec::new();
        for record in self.query(&self.select(None))? {
            if limit.is_some_and(|n| matched.len() >= n) {
                break;
            }
            if self.passes_residual(&record)? {
                matched.push(record);
            }
        }
        Ok(matched)
    }
}

impl Queryable for DuckDbSource {
    fn element_type(&self) -> &ElementType {
        &self.element_type
    }

    fn filter(&self, as_type: &ElementType, predicate: &Lambda) -> Result<Arc<dyn Queryable>> {
        ensure_dispatchable(as_type, &self.element_type)?;
        let mut filtered = self.clone();
        match SqlTranslator::new(&self.element_type, PROVIDER).translate(predicate) {
            Some(sql) => {
                debug!(table = %self.table, predicate = %predicate, sql = %sql, "Pushed predicate down");
                filtered.pushed.push(sql);
            }
            None => {
                debug!(table = %self.table, predicate = %predicate, "Keeping predicate as residual filter");
                filtered.residual.push(predicate.clone());
            }
        }
        Ok(Arc::new(filtered))
    }

    fn any(&self) -> Result<bool> {
        if !self.residual.is_empty() {
            return Ok(!self.load(Some(1))?.is_empty());
        }
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {}{})",
            quote_ident(&self.table),
            self.where_clause()
        );
        trace!(sql = %sql, "Running DuckDB query");
        let conn = self.conn.lock();
        Ok(conn.query_row(&sql, [], |row| row.get::<_, bool>(0))?)
    }

    fn count(&self) -> Result<usize> {
        if !self.residual.is_empty() {
            return Ok(self.load(None)?.len());
        }
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_ident(&self.table),
            self.where_clause()
        );
        trace!(sql = %sql, "Running DuckDB query");
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| Error::Storage(format!("Invalid row count {}", count)))
    }

    fn first_or_default(&self) -> Result<Option<Record>> {
        Ok(self.load(Some(1))?.into_iter().next())
    }

    fn take(&self, n: usize) -> Result<Vec<Record>> {
        self.load(Some(n))
    }

    fn to_list(&self) -> Result<Vec<Record>> {
        self.load(None)
    }

    fn context(&self) -> Option<Arc<dyn ProviderContext>> {
        Some(self.context.clone())
    }
}
