//! Hash-map-backed record store.
//!
//! Transactions snapshot every table on start; rollback restores the
//! outermost snapshot.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::core::{
    query::{Order, RecordsQuery, compare_values},
    schema::{ColumnKind, Record, Schema, Value},
};

use super::{PersistError, PersistResult, RecordStore};

#[derive(Debug, Clone)]
struct Table {
    schema: Arc<Schema>,
    rows: Vec<Record>,
    next_id: i64,
}

/// In-memory implementation of [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    tables: HashMap<&'static str, Table>,
    snapshots: Vec<HashMap<&'static str, Table>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held for `schema`.
    pub fn row_count(&self, schema: &str) -> usize {
        self.tables.get(schema).map_or(0, |t| t.rows.len())
    }

    fn table(&self, schema: &Schema) -> PersistResult<&Table> {
        self.tables
            .get(schema.name())
            .ok_or(PersistError::UnknownSchema(schema.name()))
    }

    fn check_foreign_keys(&self, record: &Record) -> PersistResult<()> {
        let schema = record.schema();
        for (column, value) in schema.columns().iter().zip(record.values()) {
            let ColumnKind::ForeignKey {
                parent,
                parent_column,
            } = column.kind
            else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let resolves = self.tables.get(parent).is_some_and(|t| {
                let index = t.schema.column_index(parent_column);
                t.rows
                    .iter()
                    .any(|row| index.is_some_and(|i| row.get(i) == value))
            });
            if !resolves {
                return Err(PersistError::ForeignKeyViolation {
                    schema: schema.name(),
                    column: column.name,
                });
            }
        }
        Ok(())
    }

    fn check_not_referenced(&self, schema: &Schema, doomed: &[Record]) -> PersistResult<()> {
        for table in self.tables.values() {
            for (index, column) in table.schema.columns().iter().enumerate() {
                let ColumnKind::ForeignKey {
                    parent,
                    parent_column,
                } = column.kind
                else {
                    continue;
                };
                if parent != schema.name() {
                    continue;
                }
                let Some(key_index) = schema.column_index(parent_column) else {
                    continue;
                };
                let referenced = doomed.iter().any(|parent_row| {
                    let key = parent_row.get(key_index);
                    table.rows.iter().any(|row| row.get(index) == key)
                });
                if referenced {
                    return Err(PersistError::ForeignKeyViolation {
                        schema: table.schema.name(),
                        column: column.name,
                    });
                }
            }
        }
        Ok(())
    }
}

impl RecordStore for MemoryRecordStore {
    fn initialise(&mut self, schema: &Schema) -> PersistResult<()> {
        self.tables.entry(schema.name()).or_insert_with(|| Table {
            schema: Arc::new(schema.clone()),
            rows: Vec::new(),
            next_id: 1,
        });
        Ok(())
    }

    fn store(&mut self, record: &mut Record) -> PersistResult<()> {
        let schema = Arc::clone(record.schema());
        schema.validate(record)?;
        self.table(&schema)?;
        self.check_foreign_keys(record)?;

        let Some(table) = self.tables.get_mut(schema.name()) else {
            return Err(PersistError::UnknownSchema(schema.name()));
        };
        if let Some(col) = schema.auto_increment_column() {
            match record.int(col) {
                Some(id) => table.next_id = table.next_id.max(id + 1),
                None => {
                    record.set(col, table.next_id);
                    table.next_id += 1;
                }
            }
        }

        let key: Vec<Value> = record.key().into_iter().cloned().collect();
        let existing = table
            .rows
            .iter()
            .position(|row| row.key().into_iter().eq(key.iter()));
        match existing {
            Some(pos) => table.rows[pos] = record.clone(),
            None => table.rows.push(record.clone()),
        }
        Ok(())
    }

    fn retrieve_records(&self, query: &RecordsQuery) -> PersistResult<Vec<Record>> {
        let table = self.table(&query.schema)?;
        let mut out: Vec<Record> = table
            .rows
            .iter()
            .filter(|row| query.matches(row))
            .cloned()
            .collect();
        if let Some((column, order)) = query.order_by {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(column), b.get(column));
                match order {
                    Order::Ascending => ord,
                    Order::Descending => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    fn delete(&mut self, query: &RecordsQuery) -> PersistResult<usize> {
        let doomed = self.retrieve_records(&RecordsQuery {
            limit: None,
            ..query.clone()
        })?;
        if doomed.is_empty() {
            return Ok(0);
        }
        self.check_not_referenced(&query.schema, &doomed)?;
        let Some(table) = self.tables.get_mut(query.schema.name()) else {
            return Err(PersistError::UnknownSchema(query.schema.name()));
        };
        let before = table.rows.len();
        table.rows.retain(|row| !query.matches(row));
        Ok(before - table.rows.len())
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        self.snapshots.push(self.tables.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> PersistResult<()> {
        self.snapshots.pop().ok_or(PersistError::NoTransaction)?;
        Ok(())
    }

    fn rollback_transactions(&mut self) -> PersistResult<()> {
        let mut snapshots = std::mem::take(&mut self.snapshots);
        if !snapshots.is_empty() {
            self.tables = snapshots.swap_remove(0);
        }
        Ok(())
    }

    fn transaction_depth(&self) -> usize {
        self.snapshots.len()
    }
}
