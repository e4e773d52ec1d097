//! SQLite-backed record store.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{
    Connection, params_from_iter,
    types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef},
};
use tracing::debug;

use crate::core::{
    query::{Order, RecordsQuery},
    schema::{ColumnKind, PrimaryKey, Record, Schema, Value},
};

use super::{PersistError, PersistResult, RecordStore};

/// SQLite implementation of [`RecordStore`].
///
/// Each schema maps to one table named after it. Nested transactions map to
/// savepoints.
pub struct SqliteRecordStore {
    conn: Connection,
    depth: usize,
}

impl SqliteRecordStore {
    /// Opens or creates a database at `path`.
    ///
    /// Enables WAL mode, `synchronous=NORMAL` and foreign key enforcement.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_connection(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self { conn, depth: 0 })
    }

    /// Number of rows in the table for `schema`.
    pub fn row_count(&self, schema: &Schema) -> PersistResult<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(schema.name())),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl RecordStore for SqliteRecordStore {
    fn initialise(&mut self, schema: &Schema) -> PersistResult<()> {
        let sql = create_table_sql(schema);
        debug!(model = schema.model(), schema = schema.name(), "initialising table");
        self.conn.execute_batch(&sql)?;
        Ok(())
    }

    fn store(&mut self, record: &mut Record) -> PersistResult<()> {
        let schema = Arc::clone(record.schema());
        schema.validate(record)?;

        let auto = schema.auto_increment_column();
        let assign_key = auto.is_some_and(|col| record.get(col).is_null());
        let columns: Vec<usize> = (0..schema.columns().len())
            .filter(|col| !(assign_key && Some(*col) == auto))
            .collect();

        let names: Vec<String> = columns
            .iter()
            .map(|col| quote(schema.column(*col).name))
            .collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(schema.name()),
            names.join(", "),
            placeholders.join(", ")
        );
        if !assign_key {
            let keys = schema.key_columns();
            let updates: Vec<String> = columns
                .iter()
                .filter(|col| !keys.contains(col))
                .map(|col| {
                    let name = quote(schema.column(*col).name);
                    format!("{name} = excluded.{name}")
                })
                .collect();
            let key_names: Vec<String> = keys
                .iter()
                .map(|col| quote(schema.column(*col).name))
                .collect();
            if updates.is_empty() {
                sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", key_names.join(", ")));
            } else {
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    key_names.join(", "),
                    updates.join(", ")
                ));
            }
        }

        let values = columns.iter().map(|col| record.get(*col));
        self.conn.execute(&sql, params_from_iter(values))?;

        if let (true, Some(col)) = (assign_key, auto) {
            record.set(col, self.conn.last_insert_rowid());
        }
        Ok(())
    }

    fn retrieve_records(&self, query: &RecordsQuery) -> PersistResult<Vec<Record>> {
        let schema = &query.schema;
        let names: Vec<String> = schema.columns().iter().map(|c| quote(c.name)).collect();
        let (where_sql, params) = where_clause(query);
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            names.join(", "),
            quote(schema.name()),
            where_sql
        );
        if let Some((column, order)) = query.order_by {
            let dir = match order {
                Order::Ascending => "ASC",
                Order::Descending => "DESC",
            };
            sql.push_str(&format!(" ORDER BY {} {dir}", quote(schema.column(column).name)));
        }
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let width = schema.columns().len();
        let rows = stmt.query_map(params_from_iter(params), |row| {
            let mut values = Vec::with_capacity(width);
            for index in 0..width {
                values.push(from_sql_value(row.get_ref(index)?, index)?);
            }
            Ok(values)
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(Record::from_values(schema, row?));
        }
        Ok(out)
    }

    fn delete(&mut self, query: &RecordsQuery) -> PersistResult<usize> {
        let (where_sql, params) = where_clause(query);
        let sql = format!("DELETE FROM {}{}", quote(query.schema.name()), where_sql);
        let count = self.conn.execute(&sql, params_from_iter(params))?;
        Ok(count)
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        if self.depth == 0 {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            self.conn.execute_batch(&format!("SAVEPOINT sp{}", self.depth))?;
        }
        self.depth += 1;
        Ok(())
    }

    fn commit_transaction(&mut self) -> PersistResult<()> {
        match self.depth {
            0 => return Err(PersistError::NoTransaction),
            1 => self.conn.execute_batch("COMMIT")?,
            depth => self.conn.execute_batch(&format!("RELEASE sp{}", depth - 1))?,
        }
        self.depth -= 1;
        Ok(())
    }

    fn rollback_transactions(&mut self) -> PersistResult<()> {
        if self.depth == 0 {
            return Ok(());
        }
        self.depth = 0;
        if self.conn.is_autocommit() {
            // SQLite already rolled back on its own (e.g. after a constraint abort).
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.depth
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
            Value::Blob(v) => ToSqlOutput::from(v.as_slice()),
        })
    }
}

fn from_sql_value(value: ValueRef<'_>, index: usize) -> rusqlite::Result<Value> {
    Ok(match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Text(bytes) => Value::Text(
            std::str::from_utf8(bytes)
                .map_err(rusqlite::Error::Utf8Error)?
                .to_string(),
        ),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
        ValueRef::Real(_) => {
            return Err(rusqlite::Error::InvalidColumnType(
                index,
                "real".to_string(),
                rusqlite::types::Type::Real,
            ));
        }
    })
}

fn where_clause(query: &RecordsQuery) -> (String, Vec<&Value>) {
    if query.constraints.is_empty() {
        return (String::new(), Vec::new());
    }
    let mut clauses = Vec::with_capacity(query.constraints.len());
    let mut params = Vec::new();
    for constraint in &query.constraints {
        let name = quote(query.schema.column(constraint.column).name);
        if constraint.value.is_null() {
            clauses.push(format!("{name} IS NULL"));
        } else {
            params.push(&constraint.value);
            clauses.push(format!("{name} = ?{}", params.len()));
        }
    }
    (format!(" WHERE {}", clauses.join(" AND ")), params)
}

fn create_table_sql(schema: &Schema) -> String {
    let mut defs = Vec::with_capacity(schema.columns().len() + 2);
    let auto = schema.auto_increment_column();
    for (index, column) in schema.columns().iter().enumerate() {
        let sql_type = match column.kind {
            ColumnKind::Integer { .. } | ColumnKind::TimeStamp | ColumnKind::ForeignKey { .. } => {
                "INTEGER"
            }
            ColumnKind::Text { .. } => "TEXT",
            ColumnKind::Blob => "BLOB",
        };
        let mut def = format!("{} {sql_type}", quote(column.name));
        if Some(index) == auto {
            def.push_str(" PRIMARY KEY AUTOINCREMENT");
        } else if !column.optional {
            def.push_str(" NOT NULL");
        }
        if let ColumnKind::ForeignKey {
            parent,
            parent_column,
        } = column.kind
        {
            def.push_str(&format!(" REFERENCES {}({})", quote(parent), quote(parent_column)));
        }
        defs.push(def);
    }
    if let PrimaryKey::Composite(cols) = schema.primary_key() {
        let names: Vec<String> = cols.iter().map(|c| quote(schema.column(*c).name)).collect();
        defs.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }

    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        quote(schema.name()),
        defs.join(",\n    ")
    );
    for column in schema.columns() {
        if matches!(column.kind, ColumnKind::ForeignKey { .. }) {
            sql.push_str(&format!(
                "\nCREATE INDEX IF NOT EXISTS {} ON {}({});",
                quote(&format!("{}_{}_idx", schema.name(), column.name)),
                quote(schema.name()),
                quote(column.name)
            ));
        }
    }
    sql
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::{TransmissionModel, part_cols, transmission_cols};

    #[test]
    fn create_table_declares_keys() {
        let model = TransmissionModel::new();
        let parent = create_table_sql(&model.transmission);
        assert!(parent.contains("\"ID\" INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(parent.contains("\"Type\" INTEGER NOT NULL"));
        let part = create_table_sql(&model.part);
        assert!(part.contains("REFERENCES \"Transmission\"(\"ID\")"));
        assert!(part.contains("PRIMARY KEY (\"TransmissionID\", \"PartNumber\")"));
    }

    #[test]
    fn nested_transactions_roll_back_together() {
        let model = TransmissionModel::new();
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store.initialise(&model.transmission).unwrap();

        let mut rec = Record::new(&model.transmission);
        rec.set(transmission_cols::TYPE, 2u32);
        rec.set(transmission_cols::PAYLOAD_HASH, 5u32);
        rec.set(transmission_cols::NUMBER_OF_PARTS, 1u32);

        store.start_transaction().unwrap();
        store.start_transaction().unwrap();
        store.store(&mut rec.clone()).unwrap();
        store.commit_transaction().unwrap();
        assert_eq!(store.transaction_depth(), 1);
        store.rollback_transactions().unwrap();
        assert_eq!(store.transaction_depth(), 0);
        assert_eq!(store.row_count(&model.transmission).unwrap(), 0);

        store.store(&mut rec).unwrap();
        assert_eq!(rec.int(transmission_cols::ID), Some(1));
        assert_eq!(store.row_count(&model.transmission).unwrap(), 1);
    }

    #[test]
    fn orphan_parts_are_refused() {
        let model = TransmissionModel::new();
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        for schema in model.schemas() {
            store.initialise(schema).unwrap();
        }
        let mut part = Record::new(&model.part);
        part.set(part_cols::TRANSMISSION_ID, 99u32);
        part.set(part_cols::PART_NUMBER, 1u32);
        part.set(part_cols::BODY, vec![1u8]);
        part.set(part_cols::BODY_BIT_LENGTH, 8u32);
        assert!(matches!(store.store(&mut part), Err(PersistError::Sqlite(_))));
    }
}
