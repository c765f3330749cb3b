use std::borrow::Cow;

use rusqlite::Connection;
use rusqlite::types::Value;
use tracing::{debug, warn};

use snapmerge_core::{
    ColumnDef, ColumnKind, FieldValue, OwnerId, Record, Table, generate_id,
    table::ID_COLUMN,
};

use crate::error::StorageError;
use crate::traits::{Filter, Store};

const BATCH_SAVEPOINT: &str = "snapmerge_batch";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register an owner. Owned rows reference it by foreign key.
    pub fn create_owner(&self, owner: &OwnerId) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO users (id) VALUES (?1)",
            rusqlite::params![owner.as_str()],
        )?;
        Ok(())
    }

    /// Run `f` under a savepoint: released on success, rolled back on error.
    /// Nests inside an open transaction.
    fn with_savepoint<T>(
        &mut self,
        f: impl FnOnce(&Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.conn
            .execute_batch(&format!("SAVEPOINT {BATCH_SAVEPOINT}"))?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn
                    .execute_batch(&format!("RELEASE {BATCH_SAVEPOINT}"))?;
                Ok(value)
            }
            Err(e) => {
                // Rows written before the failure would otherwise commit with
                // the enclosing transaction.
                if let Err(rb) = self.conn.execute_batch(&format!(
                    "ROLLBACK TO {BATCH_SAVEPOINT}; RELEASE {BATCH_SAVEPOINT}"
                )) {
                    warn!(error = %rb, cause = %e, "savepoint rollback failed");
                    return Err(rb.into());
                }
                Err(e)
            }
        }
    }
}

fn column(table: Table, name: &str) -> Result<&'static ColumnDef, StorageError> {
    table
        .schema()
        .column(name)
        .ok_or_else(|| StorageError::UnknownColumn {
            table: table.as_str().to_string(),
            column: name.to_string(),
        })
}

fn to_sql(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::Integer(*n),
        FieldValue::Float(f) => Value::Real(*f),
        FieldValue::Boolean(b) => Value::Integer(i64::from(*b)),
        FieldValue::Json(v) => Value::Text(v.to_string()),
    }
}

fn from_sql(kind: ColumnKind, value: Value) -> FieldValue {
    match (kind, value) {
        (_, Value::Null) => FieldValue::Null,
        (ColumnKind::Boolean, Value::Integer(n)) => FieldValue::Boolean(n != 0),
        (ColumnKind::Timestamp, Value::Integer(n)) => FieldValue::Timestamp(n),
        (ColumnKind::Float, Value::Integer(n)) => FieldValue::Float(n as f64),
        (ColumnKind::Json, Value::Text(s)) => match serde_json::from_str(&s) {
            Ok(v) => FieldValue::Json(v),
            Err(_) => FieldValue::Text(s),
        },
        (_, Value::Integer(n)) => FieldValue::Integer(n),
        (_, Value::Real(f)) => FieldValue::Float(f),
        (_, Value::Text(s)) => FieldValue::Text(s),
        (_, Value::Blob(b)) => FieldValue::Text(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn read_columns(
    row: &rusqlite::Row,
    columns: &[&'static ColumnDef],
) -> Result<Record, rusqlite::Error> {
    let mut record = Record::new();
    for (i, col) in columns.iter().enumerate() {
        let value: Value = row.get(i)?;
        record.insert(col.name.to_string(), from_sql(col.kind, value));
    }
    Ok(record)
}

fn where_clause(
    table: Table,
    filters: &[Filter],
    params: &mut Vec<Value>,
) -> Result<String, StorageError> {
    if filters.is_empty() {
        return Ok(String::new());
    }
    let mut parts = Vec::with_capacity(filters.len());
    for filter in filters {
        let col = column(table, filter.column())?;
        match filter {
            Filter::Eq(_, FieldValue::Null) => parts.push(format!("{} IS NULL", col.name)),
            Filter::Eq(_, value) => {
                parts.push(format!("{} = ?", col.name));
                params.push(to_sql(value));
            }
            Filter::In(_, values) if values.is_empty() => parts.push("0".to_string()),
            Filter::In(_, values) => {
                let marks = vec!["?"; values.len()].join(", ");
                parts.push(format!("{} IN ({marks})", col.name));
                params.extend(values.iter().map(to_sql));
            }
        }
    }
    Ok(format!(" WHERE {}", parts.join(" AND ")))
}

/// Map a driver failure on a write of `row` into a structured error. SQLite
/// reports the violated columns only in its message, so this is the single
/// place that reads it.
fn classify_write_error(table: Table, row: &Record, err: rusqlite::Error) -> StorageError {
    if let rusqlite::Error::SqliteFailure(ffi_err, Some(msg)) = &err
        && ffi_err.code == rusqlite::ErrorCode::ConstraintViolation
    {
        if let Some(columns) = msg.strip_prefix("UNIQUE constraint failed: ") {
            let field = columns
                .split(',')
                .next()
                .map(str::trim)
                .and_then(|qualified| qualified.rsplit('.').next())
                .unwrap_or_default()
                .to_string();
            let value = row
                .get(field.as_str())
                .filter(|v| !v.is_null())
                .map(FieldValue::display_value);
            return StorageError::UniqueViolation {
                table: table.as_str().to_string(),
                field,
                value,
            };
        }
        return StorageError::ConstraintViolation(msg.clone());
    }
    StorageError::Sqlite(err)
}

/// Fill in a generated identifier for single-key tables when the row has none.
fn with_assigned_id(table: Table, row: &Record) -> Cow<'_, Record> {
    let schema = table.schema();
    let needs_id = schema.primary_key == [ID_COLUMN].as_slice()
        && row.get(ID_COLUMN).is_none_or(FieldValue::is_null);
    if needs_id {
        let mut owned = row.clone();
        owned.insert(ID_COLUMN.to_string(), FieldValue::Text(generate_id()));
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(row)
    }
}

fn insert_row(
    conn: &Connection,
    table: Table,
    row: &Record,
    returning: &[&'static ColumnDef],
) -> Result<Option<Record>, StorageError> {
    let row = with_assigned_id(table, row);
    let mut names = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (name, value) in row.iter() {
        let col = column(table, name)?;
        names.push(col.name);
        params.push(to_sql(value));
    }

    let mut sql = if names.is_empty() {
        format!("INSERT INTO {table} DEFAULT VALUES")
    } else {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        )
    };

    if returning.is_empty() {
        conn.execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|e| classify_write_error(table, &row, e))?;
        return Ok(None);
    }

    let cols: Vec<&str> = returning.iter().map(|c| c.name).collect();
    sql.push_str(&format!(" RETURNING {}", cols.join(", ")));
    let record = conn
        .query_row(&sql, rusqlite::params_from_iter(params), |r| {
            read_columns(r, returning)
        })
        .map_err(|e| classify_write_error(table, &row, e))?;
    Ok(Some(record))
}

impl Store for SqliteStorage {
    fn begin(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn owner_exists(&self, owner: &OwnerId) -> Result<bool, StorageError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM users WHERE id = ?1)",
            rusqlite::params![owner.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn find_many(&self, table: Table, filters: &[Filter]) -> Result<Vec<Record>, StorageError> {
        let columns: Vec<&'static ColumnDef> = table.schema().columns.iter().collect();
        let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
        let mut params = Vec::new();
        let sql = format!(
            "SELECT {} FROM {table}{} ORDER BY rowid",
            names.join(", "),
            where_clause(table, filters, &mut params)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                read_columns(row, &columns)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn find_first(&self, table: Table, filters: &[Filter]) -> Result<Option<Record>, StorageError> {
        let columns: Vec<&'static ColumnDef> = table.schema().columns.iter().collect();
        let names: Vec<&str> = columns.iter().map(|c| c.name).collect();
        let mut params = Vec::new();
        let sql = format!(
            "SELECT {} FROM {table}{} ORDER BY rowid LIMIT 1",
            names.join(", "),
            where_clause(table, filters, &mut params)?
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            read_columns(row, &columns)
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn insert_returning(
        &mut self,
        table: Table,
        rows: &[Record],
        returning: &[&'static str],
    ) -> Result<Vec<Record>, StorageError> {
        let returning = returning
            .iter()
            .map(|name| column(table, name))
            .collect::<Result<Vec<_>, _>>()?;
        let result = self.with_savepoint(|conn| {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                if let Some(record) = insert_row(conn, table, row, &returning)? {
                    out.push(record);
                }
            }
            Ok(out)
        });
        if let Err(e) = &result {
            debug!(table = %table, rows = rows.len(), error = %e, "batch insert rolled back");
        }
        result
    }

    fn insert(&mut self, table: Table, rows: &[Record]) -> Result<usize, StorageError> {
        let result = self.with_savepoint(|conn| {
            for row in rows {
                insert_row(conn, table, row, &[])?;
            }
            Ok(rows.len())
        });
        if let Err(e) = &result {
            debug!(table = %table, rows = rows.len(), error = %e, "batch insert rolled back");
        }
        result
    }

    fn update(
        &mut self,
        table: Table,
        set: &Record,
        filters: &[Filter],
    ) -> Result<usize, StorageError> {
        if set.is_empty() {
            return Ok(0);
        }
        let mut assignments = Vec::with_capacity(set.len());
        let mut params = Vec::with_capacity(set.len());
        for (name, value) in set {
            let col = column(table, name)?;
            assignments.push(format!("{} = ?", col.name));
            params.push(to_sql(value));
        }
        let sql = format!(
            "UPDATE {table} SET {}{}",
            assignments.join(", "),
            where_clause(table, filters, &mut params)?
        );
        let changed = self
            .conn
            .execute(&sql, rusqlite::params_from_iter(params))
            .map_err(|e| classify_write_error(table, set, e))?;
        Ok(changed)
    }
}
