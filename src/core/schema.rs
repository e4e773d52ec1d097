//! Record layouts for transmissions and their parts.
//!
//! Schemas are immutable once built. [`TransmissionModel`] bundles the two
//! layouts this crate persists and is handed to the store explicitly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::CORRESPONDENT_MAX_LENGTH;

/// Name of the model namespace holding both schemas.
pub const TRANSMISSION_MANAGEMENT_MODEL: &str = "TransmissionManagement";

/// Column positions in the `Transmission` schema.
pub mod transmission_cols {
    /// Store-assigned primary key.
    pub const ID: usize = 0;
    /// Correspondent's transmission id.
    pub const REMOTE_ID: usize = 1;
    /// Transport kind ordinal.
    pub const TYPE: usize = 2;
    /// Payload hash.
    pub const PAYLOAD_HASH: usize = 3;
    /// Payload codec.
    pub const PAYLOAD_TYPE: usize = 4;
    /// Sending party.
    pub const SENDER: usize = 5;
    /// Receiving party.
    pub const RECEIVER: usize = 6;
    /// Part count.
    pub const NUMBER_OF_PARTS: usize = 7;
    /// Sent timestamp.
    pub const SENT_AT: usize = 8;
    /// Received timestamp.
    pub const RECEIVED_AT: usize = 9;
}

/// Column positions in the `TransmissionPart` schema.
pub mod part_cols {
    /// Foreign key to `Transmission.ID`.
    pub const TRANSMISSION_ID: usize = 0;
    /// 1-based part number.
    pub const PART_NUMBER: usize = 1;
    /// Sent timestamp.
    pub const SENT_AT: usize = 2;
    /// Delivery confirmation timestamp.
    pub const DELIVERED_AT: usize = 3;
    /// Received timestamp.
    pub const RECEIVED_AT: usize = 4;
    /// Raw body bytes.
    pub const BODY: usize = 5;
    /// Exact body length in bits.
    pub const BODY_BIT_LENGTH: usize = 6;
}

/// Column value as held in a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Value {
    /// Unset.
    #[default]
    Null,
    /// Signed integer.
    Integer(i64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Integer value, if any.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Blob value, if any.
    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Self::Blob(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Wraps an optional integer.
    pub fn opt_int<T: Into<i64>>(value: Option<T>) -> Self {
        value.map_or(Self::Null, |v| Self::Integer(v.into()))
    }

    /// Wraps an optional millisecond timestamp.
    pub fn opt_time(value: Option<u64>) -> Self {
        value.map_or(Self::Null, |v| Self::Integer(v as i64))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Blob(value)
    }
}

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Integer restricted to `bits` bits, signed or not.
    Integer {
        /// Whether negative values are allowed.
        signed: bool,
        /// Width in bits, at most 64.
        bits: u8,
    },
    /// Text of bounded character length.
    Text {
        /// Maximum number of characters.
        max_chars: usize,
    },
    /// Raw bytes.
    Blob,
    /// Milliseconds since the Unix epoch.
    TimeStamp,
    /// Reference to the auto-incrementing primary key of `parent`.
    ForeignKey {
        /// Parent schema name.
        parent: &'static str,
        /// Parent key column name.
        parent_column: &'static str,
    },
}

/// One named column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Storage type.
    pub kind: ColumnKind,
    /// Whether `Null` is allowed.
    pub optional: bool,
}

impl Column {
    /// Creates a column.
    pub const fn new(name: &'static str, kind: ColumnKind, optional: bool) -> Self {
        Self {
            name,
            kind,
            optional,
        }
    }

    fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let column = self.name;
        match (value, self.kind) {
            (Value::Null, _) if self.optional => Ok(()),
            (Value::Null, _) => Err(SchemaError::MissingValue { column }),
            (Value::Integer(v), ColumnKind::Integer { signed, bits }) => {
                let (min, max) = integer_bounds(signed, bits);
                if (*v as i128) < min || (*v as i128) > max {
                    return Err(SchemaError::OutOfRange { column, value: *v });
                }
                Ok(())
            }
            (Value::Integer(v), ColumnKind::TimeStamp | ColumnKind::ForeignKey { .. }) => {
                if *v < 0 {
                    return Err(SchemaError::OutOfRange { column, value: *v });
                }
                Ok(())
            }
            (Value::Text(s), ColumnKind::Text { max_chars }) => {
                if s.chars().count() > max_chars {
                    return Err(SchemaError::TooLong {
                        column,
                        max: max_chars,
                    });
                }
                Ok(())
            }
            (Value::Blob(_), ColumnKind::Blob) => Ok(()),
            _ => Err(SchemaError::TypeMismatch { column }),
        }
    }
}

fn integer_bounds(signed: bool, bits: u8) -> (i128, i128) {
    let bits = u32::from(bits.min(64));
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        // Values are held as i64, so 64-bit unsigned columns top out at i64::MAX.
        (0, ((1i128 << bits) - 1).min(i64::MAX as i128))
    }
}

/// Primary key of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimaryKey {
    /// Single integer column assigned by the store on first insert.
    AutoIncrement(usize),
    /// Combination of columns supplied by the caller.
    Composite(Vec<usize>),
}

/// Rejected record values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// Record belongs to a different schema.
    #[error("record of schema {found} given to schema {expected}")]
    WrongSchema {
        /// Target schema.
        expected: &'static str,
        /// Record's schema.
        found: &'static str,
    },
    /// Required column is unset.
    #[error("column {column} requires a value")]
    MissingValue {
        /// Column name.
        column: &'static str,
    },
    /// Value has the wrong type for the column.
    #[error("column {column} has a value of the wrong type")]
    TypeMismatch {
        /// Column name.
        column: &'static str,
    },
    /// Integer out of the column's range.
    #[error("value {value} out of range for column {column}")]
    OutOfRange {
        /// Column name.
        column: &'static str,
        /// Offending value.
        value: i64,
    },
    /// Text longer than the column allows.
    #[error("column {column} is limited to {max} characters")]
    TooLong {
        /// Column name.
        column: &'static str,
        /// Maximum characters.
        max: usize,
    },
}

/// Immutable record layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    model: &'static str,
    name: &'static str,
    columns: Vec<Column>,
    primary_key: PrimaryKey,
}

impl Schema {
    /// Builds a schema. Column order defines value positions in records.
    pub fn new(
        model: &'static str,
        name: &'static str,
        columns: Vec<Column>,
        primary_key: PrimaryKey,
    ) -> Self {
        Self {
            model,
            name,
            columns,
            primary_key,
        }
    }

    /// Owning model name.
    pub fn model(&self) -> &'static str {
        self.model
    }

    /// Schema (table) name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Columns in position order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column at `index`.
    pub fn column(&self, index: usize) -> &Column {
        &self.columns[index]
    }

    /// Position of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Primary key.
    pub fn primary_key(&self) -> &PrimaryKey {
        &self.primary_key
    }

    /// Positions of the primary key columns.
    pub fn key_columns(&self) -> Vec<usize> {
        match &self.primary_key {
            PrimaryKey::AutoIncrement(col) => vec![*col],
            PrimaryKey::Composite(cols) => cols.clone(),
        }
    }

    /// Position of the auto-incrementing key, if the schema has one.
    pub fn auto_increment_column(&self) -> Option<usize> {
        match self.primary_key {
            PrimaryKey::AutoIncrement(col) => Some(col),
            PrimaryKey::Composite(_) => None,
        }
    }

    /// Checks every value of `record` against its column.
    ///
    /// An unset auto-incrementing key is accepted: the store assigns it.
    pub fn validate(&self, record: &Record) -> Result<(), SchemaError> {
        if record.schema.name != self.name {
            return Err(SchemaError::WrongSchema {
                expected: self.name,
                found: record.schema.name,
            });
        }
        let auto = self.auto_increment_column();
        for (index, (column, value)) in self.columns.iter().zip(&record.values).enumerate() {
            if Some(index) == auto && value.is_null() {
                continue;
            }
            column.validate(value)?;
        }
        Ok(())
    }
}

/// Values for one row of a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl Record {
    /// Creates a record with every column unset.
    pub fn new(schema: &Arc<Schema>) -> Self {
        Self {
            schema: Arc::clone(schema),
            values: vec![Value::Null; schema.columns.len()],
        }
    }

    /// Creates a record from values in column order.
    ///
    /// Missing trailing values are unset; extra values are dropped.
    pub fn from_values(schema: &Arc<Schema>, mut values: Vec<Value>) -> Self {
        values.resize(schema.columns.len(), Value::Null);
        Self {
            schema: Arc::clone(schema),
            values,
        }
    }

    /// Schema of this record.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value at `column`.
    pub fn get(&self, column: usize) -> &Value {
        &self.values[column]
    }

    /// Replaces the value at `column`.
    pub fn set(&mut self, column: usize, value: impl Into<Value>) {
        self.values[column] = value.into();
    }

    /// Integer at `column`, if set.
    pub fn int(&self, column: usize) -> Option<i64> {
        self.values[column].as_i64()
    }

    /// Text at `column`, if set.
    pub fn text(&self, column: usize) -> Option<&str> {
        self.values[column].as_str()
    }

    /// Blob at `column`, if set.
    pub fn blob(&self, column: usize) -> Option<&[u8]> {
        self.values[column].as_blob()
    }

    /// Values of the primary key columns.
    pub fn key(&self) -> Vec<&Value> {
        self.schema
            .key_columns()
            .into_iter()
            .map(|col| &self.values[col])
            .collect()
    }
}

/// The `Transmission` and `TransmissionPart` schemas.
#[derive(Debug, Clone)]
pub struct TransmissionModel {
    /// One row per transmission.
    pub transmission: Arc<Schema>,
    /// One row per transport unit.
    pub part: Arc<Schema>,
}

impl TransmissionModel {
    /// Builds both schemas.
    pub fn new() -> Self {
        const U32: ColumnKind = ColumnKind::Integer {
            signed: false,
            bits: 32,
        };
        const CORRESPONDENT: ColumnKind = ColumnKind::Text {
            max_chars: CORRESPONDENT_MAX_LENGTH,
        };

        let transmission = Schema::new(
            TRANSMISSION_MANAGEMENT_MODEL,
            "Transmission",
            vec![
                Column::new("ID", U32, false),
                Column::new("RemoteID", U32, true),
                Column::new("Type", ColumnKind::Integer { signed: false, bits: 8 }, false),
                Column::new("PayloadHash", U32, false),
                Column::new("PayloadType", ColumnKind::Integer { signed: false, bits: 8 }, true),
                Column::new("Sender", CORRESPONDENT, true),
                Column::new("Receiver", CORRESPONDENT, true),
                Column::new("NumberOfParts", U32, false),
                Column::new("SentAt", ColumnKind::TimeStamp, true),
                Column::new("ReceivedAt", ColumnKind::TimeStamp, true),
            ],
            PrimaryKey::AutoIncrement(transmission_cols::ID),
        );

        let part = Schema::new(
            TRANSMISSION_MANAGEMENT_MODEL,
            "TransmissionPart",
            vec![
                Column::new(
                    "TransmissionID",
                    ColumnKind::ForeignKey {
                        parent: "Transmission",
                        parent_column: "ID",
                    },
                    false,
                ),
                Column::new("PartNumber", U32, false),
                Column::new("SentAt", ColumnKind::TimeStamp, true),
                Column::new("DeliveredAt", ColumnKind::TimeStamp, true),
                Column::new("ReceivedAt", ColumnKind::TimeStamp, true),
                Column::new("Body", ColumnKind::Blob, false),
                Column::new("BodyBitLength", U32, false),
            ],
            PrimaryKey::Composite(vec![part_cols::TRANSMISSION_ID, part_cols::PART_NUMBER]),
        );

        Self {
            transmission: Arc::new(transmission),
            part: Arc::new(part),
        }
    }

    /// Both schemas, parents before children.
    pub fn schemas(&self) -> [&Arc<Schema>; 2] {
        [&self.transmission, &self.part]
    }
}

impl Default for TransmissionModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_positions_match_names() {
        let model = TransmissionModel::new();
        let t = &model.transmission;
        assert_eq!(t.column_index("ID"), Some(transmission_cols::ID));
        assert_eq!(t.column_index("RemoteID"), Some(transmission_cols::REMOTE_ID));
        assert_eq!(t.column_index("Type"), Some(transmission_cols::TYPE));
        assert_eq!(t.column_index("PayloadHash"), Some(transmission_cols::PAYLOAD_HASH));
        assert_eq!(t.column_index("PayloadType"), Some(transmission_cols::PAYLOAD_TYPE));
        assert_eq!(t.column_index("Sender"), Some(transmission_cols::SENDER));
        assert_eq!(t.column_index("Receiver"), Some(transmission_cols::RECEIVER));
        assert_eq!(t.column_index("NumberOfParts"), Some(transmission_cols::NUMBER_OF_PARTS));
        assert_eq!(t.column_index("SentAt"), Some(transmission_cols::SENT_AT));
        assert_eq!(t.column_index("ReceivedAt"), Some(transmission_cols::RECEIVED_AT));

        let p = &model.part;
        assert_eq!(t.model(), TRANSMISSION_MANAGEMENT_MODEL);
        assert_eq!(p.model(), TRANSMISSION_MANAGEMENT_MODEL);
        assert_eq!(p.column_index("TransmissionID"), Some(part_cols::TRANSMISSION_ID));
        assert_eq!(p.column_index("PartNumber"), Some(part_cols::PART_NUMBER));
        assert_eq!(p.column_index("SentAt"), Some(part_cols::SENT_AT));
        assert_eq!(p.column_index("DeliveredAt"), Some(part_cols::DELIVERED_AT));
        assert_eq!(p.column_index("ReceivedAt"), Some(part_cols::RECEIVED_AT));
        assert_eq!(p.column_index("Body"), Some(part_cols::BODY));
        assert_eq!(p.column_index("BodyBitLength"), Some(part_cols::BODY_BIT_LENGTH));
    }

    #[test]
    fn validation_enforces_columns() {
        let model = TransmissionModel::new();
        let mut rec = Record::new(&model.transmission);
        assert_eq!(
            model.transmission.validate(&rec),
            Err(SchemaError::MissingValue { column: "Type" })
        );

        rec.set(transmission_cols::TYPE, 0u32);
        rec.set(transmission_cols::PAYLOAD_HASH, u32::MAX);
        rec.set(transmission_cols::NUMBER_OF_PARTS, 1u32);
        model.transmission.validate(&rec).unwrap();

        rec.set(transmission_cols::NUMBER_OF_PARTS, -1i64);
        assert!(matches!(
            model.transmission.validate(&rec),
            Err(SchemaError::OutOfRange { column: "NumberOfParts", .. })
        ));
        rec.set(transmission_cols::NUMBER_OF_PARTS, 1u32);

        rec.set(transmission_cols::SENDER, "9".repeat(CORRESPONDENT_MAX_LENGTH + 1));
        assert!(matches!(
            model.transmission.validate(&rec),
            Err(SchemaError::TooLong { column: "Sender", .. })
        ));

        rec.set(transmission_cols::SENDER, vec![1u8]);
        assert_eq!(
            model.transmission.validate(&rec),
            Err(SchemaError::TypeMismatch { column: "Sender" })
        );

        let part = Record::new(&model.part);
        assert!(matches!(
            model.transmission.validate(&part),
            Err(SchemaError::WrongSchema { .. })
        ));
    }
}
