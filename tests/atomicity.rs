use transmission_store::{
    bits::BitArray,
    core::{
        query::RecordsQuery,
        schema::{Record, Schema},
        store::{StoreError, TransmissionStore},
    },
    persist::{
        PersistError, PersistResult, RecordStore, memory::MemoryRecordStore,
        sqlite::SqliteRecordStore,
    },
    transmission::{BinarySmsTransmission, Transmission},
    types::SmsAgent,
};

/// Delegating store that fails once `fail_after` part rows were written.
struct FailingStore<S> {
    inner: S,
    parts_written: usize,
    fail_after: Option<usize>,
}

impl<S: RecordStore> FailingStore<S> {
    fn new(inner: S, fail_after: usize) -> Self {
        Self {
            inner,
            parts_written: 0,
            fail_after: Some(fail_after),
        }
    }
}

impl<S: RecordStore> RecordStore for FailingStore<S> {
    fn initialise(&mut self, schema: &Schema) -> PersistResult<()> {
        self.inner.initialise(schema)
    }

    fn store(&mut self, record: &mut Record) -> PersistResult<()> {
        if record.schema().name() == "TransmissionPart" {
            if self.fail_after == Some(self.parts_written) {
                return Err(PersistError::Message("injected failure".to_string()));
            }
            self.parts_written += 1;
        }
        self.inner.store(record)
    }

    fn retrieve_records(&self, query: &RecordsQuery) -> PersistResult<Vec<Record>> {
        self.inner.retrieve_records(query)
    }

    fn delete(&mut self, query: &RecordsQuery) -> PersistResult<usize> {
        self.inner.delete(query)
    }

    fn start_transaction(&mut self) -> PersistResult<()> {
        self.inner.start_transaction()
    }

    fn commit_transaction(&mut self) -> PersistResult<()> {
        self.inner.commit_transaction()
    }

    fn rollback_transactions(&mut self) -> PersistResult<()> {
        self.inner.rollback_transactions()
    }

    fn transaction_depth(&self) -> usize {
        self.inner.transaction_depth()
    }
}

fn three_part_transmission() -> Transmission {
    let mut payload = BitArray::new();
    for i in 0..150 {
        payload.push(i % 5 == 0);
    }
    BinarySmsTransmission::outgoing(SmsAgent::new("+15550100"), &payload, 64, None)
        .expect("segment")
        .into()
}

fn assert_failed_store_leaves_nothing<S: RecordStore>(inner: S) -> S {
    let failing = FailingStore::new(inner, 1);
    let mut store = TransmissionStore::with_default_model(failing).expect("schemas");
    let mut transmission = three_part_transmission();
    assert_eq!(transmission.total_parts(), 3);

    let err = store
        .store_transmission(&mut transmission)
        .expect_err("second part must fail");
    assert!(matches!(err, StoreError::Persist(PersistError::Message(_))));
    assert!(!err.is_consistency_violation());
    assert_eq!(transmission.local_id(), None);

    let records = store.into_inner();
    assert_eq!(records.parts_written, 1);
    assert_eq!(records.transaction_depth(), 0);
    records.inner
}

#[test]
fn sqlite_rolls_back_after_part_one_of_three() {
    let records =
        assert_failed_store_leaves_nothing(SqliteRecordStore::open_in_memory().expect("open"));
    let store = TransmissionStore::with_default_model(records).expect("schemas");
    let model = store.model().clone();
    let records = store.record_store();
    assert_eq!(records.row_count(&model.transmission).expect("count"), 0);
    assert_eq!(records.row_count(&model.part).expect("count"), 0);
    assert!(store.retrieve_transmission_for_id(1).expect("retrieve").is_none());
}

#[test]
fn memory_rolls_back_after_part_one_of_three() {
    let records = assert_failed_store_leaves_nothing(MemoryRecordStore::new());
    assert_eq!(records.row_count("Transmission"), 0);
    assert_eq!(records.row_count("TransmissionPart"), 0);
}

#[test]
fn store_succeeds_once_failure_is_lifted() {
    let mut failing = FailingStore::new(MemoryRecordStore::new(), 0);
    failing.fail_after = None;
    let mut store = TransmissionStore::with_default_model(failing).expect("schemas");
    let mut transmission = three_part_transmission();
    let id = store.store_transmission(&mut transmission).expect("store");
    assert_eq!(transmission.local_id(), Some(id));
    assert_eq!(store.record_store().parts_written, 3);
}

#[test]
fn restoring_keeps_the_id_and_replaces_parts() {
    let mut store =
        TransmissionStore::with_default_model(MemoryRecordStore::new()).expect("schemas");
    let mut transmission = three_part_transmission();
    let id = store.store_transmission(&mut transmission).expect("store");
    assert_eq!(store.store_transmission(&mut transmission).expect("restore"), id);

    let records = store.record_store();
    assert_eq!(records.row_count("Transmission"), 1);
    assert_eq!(records.row_count("TransmissionPart"), 3);
}
