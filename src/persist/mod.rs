/// In-memory record store.
pub mod memory;
/// SQLite record store.
pub mod sqlite;

use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::core::{
    query::RecordsQuery,
    schema::{Record, Schema, SchemaError},
};

/// Failures raised by a [`RecordStore`].
#[derive(Debug, Error)]
pub enum PersistError {
    /// SQLite reported an error.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A record does not fit its schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// The schema was never initialised in this store.
    #[error("unknown schema {0}")]
    UnknownSchema(&'static str),
    /// A foreign key does not resolve, or a referenced row would be orphaned.
    #[error("foreign key violation on {schema}.{column}")]
    ForeignKeyViolation {
        /// Referencing schema.
        schema: &'static str,
        /// Referencing column.
        column: &'static str,
    },
    /// Commit without an open transaction.
    #[error("no open transaction")]
    NoTransaction,
    /// Any other failure.
    #[error("{0}")]
    Message(String),
}

/// Result alias for record store operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Transactional store of schema-typed records.
///
/// Transactions nest; `commit_transaction` closes the innermost one and
/// `rollback_transactions` discards all open ones.
pub trait RecordStore: Send {
    /// Prepares storage for `schema`. Idempotent.
    fn initialise(&mut self, schema: &Schema) -> PersistResult<()>;

    /// Inserts or replaces `record` by primary key. An unset auto-incrementing
    /// key is assigned and written back into `record`.
    fn store(&mut self, record: &mut Record) -> PersistResult<()>;

    /// All records matching `query`.
    fn retrieve_records(&self, query: &RecordsQuery) -> PersistResult<Vec<Record>>;

    /// First record matching `query`.
    fn retrieve_record(&self, query: &RecordsQuery) -> PersistResult<Option<Record>> {
        let query = query.clone().first();
        Ok(self.retrieve_records(&query)?.into_iter().next())
    }

    /// Deletes all records matching `query`, returning how many were removed.
    fn delete(&mut self, query: &RecordsQuery) -> PersistResult<usize>;

    /// Opens a (possibly nested) transaction.
    fn start_transaction(&mut self) -> PersistResult<()>;

    /// Commits the innermost open transaction.
    fn commit_transaction(&mut self) -> PersistResult<()>;

    /// Rolls back every open transaction. A no-op when none is open.
    fn rollback_transactions(&mut self) -> PersistResult<()>;

    /// Number of open transactions.
    fn transaction_depth(&self) -> usize;
}

/// Open transaction that rolls back unless committed.
///
/// Dereferences to the underlying store so writes go through the scope.
pub struct TransactionScope<'a, S: RecordStore + ?Sized> {
    records: &'a mut S,
    finished: bool,
}

impl<'a, S: RecordStore + ?Sized> TransactionScope<'a, S> {
    /// Starts a transaction on `records`.
    pub fn begin(records: &'a mut S) -> PersistResult<Self> {
        records.start_transaction()?;
        Ok(Self {
            records,
            finished: false,
        })
    }

    /// Commits. On failure the drop guard still rolls back.
    pub fn commit(mut self) -> PersistResult<()> {
        self.records.commit_transaction()?;
        self.finished = true;
        Ok(())
    }
}

impl<S: RecordStore + ?Sized> Deref for TransactionScope<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.records
    }
}

impl<S: RecordStore + ?Sized> DerefMut for TransactionScope<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.records
    }
}

impl<S: RecordStore + ?Sized> Drop for TransactionScope<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.records.rollback_transactions() {
            tracing::warn!(error = %err, "rollback failed");
        }
    }
}
