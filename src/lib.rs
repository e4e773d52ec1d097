//! Segmentation, reassembly and transactional persistence of transmissions
//! sent over binary SMS, text SMS or HTTP.
//!
//! # Examples
//!
//! Segmenting a payload and storing it with [`core::store::TransmissionStore`]:
//! ```
//! use transmission_store::{
//!     bits::BitArray,
//!     core::store::TransmissionStore,
//!     persist::sqlite::SqliteRecordStore,
//!     transmission::{BinarySmsTransmission, Transmission},
//!     types::SmsAgent,
//! };
//!
//! let mut payload = BitArray::new();
//! payload.push_bits(0xDEAD_BEEF, 32);
//! let outgoing = BinarySmsTransmission::outgoing(SmsAgent::new("+1 555 0100"), &payload, 16, None)
//!     .expect("segment");
//!
//! let records = SqliteRecordStore::open_in_memory().expect("open sqlite");
//! let mut store = TransmissionStore::with_default_model(records).expect("schemas");
//! let mut transmission = Transmission::from(outgoing);
//! let id = store.store_transmission(&mut transmission).expect("store");
//!
//! let back = store.retrieve_transmission_for_id(id).expect("retrieve");
//! let Some(Transmission::BinarySms(back)) = back else {
//!     panic!("missing");
//! };
//! assert_eq!(back.total_parts(), 2);
//! assert_eq!(back.reassemble().expect("reassemble"), payload);
//! ```
//!
//! Runtime usage with the single-writer service:
//! ```no_run
//! use transmission_store::{
//!     config::Config,
//!     runtime::handle::spawn_transmission_service,
//!     transmission::{HttpTransmission, Transmission},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::load("transmission.json").expect("config");
//! let store = config.open_memory_store().expect("store");
//! let handle = spawn_transmission_service(store, config.runtime.clone());
//! let upload = HttpTransmission::new(
//!     "https://collector.example/upload",
//!     b"records".to_vec(),
//!     Some(1),
//! );
//! let stored = handle.store(Transmission::from(upload)).await.expect("store");
//! assert!(stored.local_id().is_some());
//! handle.shutdown().await.expect("shutdown");
//! # }
//! ```
#![warn(missing_docs)]

/// MSB-first bit buffer.
pub mod bits;
/// JSON configuration.
pub mod config;
/// Schemas, record mapping and the transmission store.
pub mod core;
/// Record store abstraction with SQLite and in-memory backends.
pub mod persist;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Transmission and message domain model, wire codecs.
pub mod transmission;
/// Shared primitive types and enums.
pub mod types;
