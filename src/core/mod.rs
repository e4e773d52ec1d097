//! Schemas, record mapping and the transmission store.

/// Records produced for one transmission.
pub mod generator;
/// Equality queries over records.
pub mod query;
/// Admission of inbound SMS parts.
pub mod receiver;
/// Column layout of the persisted tables.
pub mod schema;
/// Store, retrieve and delete of transmissions.
pub mod store;
