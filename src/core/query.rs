use std::cmp::Ordering;
use std::sync::Arc;

use super::schema::{Record, Schema, Value};

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Smallest first.
    Ascending,
    /// Largest first.
    Descending,
}

/// Equality constraint on one column. `Value::Null` matches unset values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    /// Column position.
    pub column: usize,
    /// Required value.
    pub value: Value,
}

/// Conjunction of equality constraints over one schema, optionally sorted
/// and limited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordsQuery {
    /// Schema to read from.
    pub schema: Arc<Schema>,
    /// All must hold.
    pub constraints: Vec<Constraint>,
    /// Sort key.
    pub order_by: Option<(usize, Order)>,
    /// Maximum number of records.
    pub limit: Option<usize>,
}

impl RecordsQuery {
    /// Selects every record of `schema`.
    pub fn from(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            constraints: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Selects the record whose primary key equals `key`, in key column order.
    pub fn by_key(schema: &Arc<Schema>, key: impl IntoIterator<Item = Value>) -> Self {
        schema
            .key_columns()
            .into_iter()
            .zip(key)
            .fold(Self::from(schema), |q, (column, value)| q.where_eq(column, value))
    }

    /// Adds an equality constraint.
    pub fn where_eq(mut self, column: usize, value: impl Into<Value>) -> Self {
        self.constraints.push(Constraint {
            column,
            value: value.into(),
        });
        self
    }

    /// Sorts by `column`.
    pub fn order_by(mut self, column: usize, order: Order) -> Self {
        self.order_by = Some((column, order));
        self
    }

    /// Restricts the result to the first match.
    pub fn first(mut self) -> Self {
        self.limit = Some(1);
        self
    }

    /// Returns true if `record` satisfies every constraint.
    pub fn matches(&self, record: &Record) -> bool {
        self.constraints
            .iter()
            .all(|c| record.get(c.column) == &c.value)
    }
}

/// Total order used for sorting: nulls first, then integers, text and blobs.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Integer(_) => 1,
            Value::Text(_) => 2,
            Value::Blob(_) => 3,
        }
    }
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x.cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
