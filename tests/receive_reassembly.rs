use tempfile::tempdir;

use transmission_store::{
    bits::BitArray,
    core::{
        receiver::ReceiveOutcome,
        store::{StoreError, TransmissionStore},
    },
    persist::sqlite::SqliteRecordStore,
    transmission::{
        BinarySmsTransmission, TextSmsTransmission, Transmission, TransmissionError,
        wire::{self, DecodeError},
    },
    types::SmsAgent,
};

fn payload(len: usize) -> BitArray {
    let mut bits = BitArray::new();
    for i in 0..len {
        bits.push((i * 7) % 11 < 5);
    }
    bits
}

fn encoded_binary(bits: &BitArray, sender_side_id: u32) -> (BinarySmsTransmission, Vec<Vec<u8>>) {
    let mut sender_store = TransmissionStore::with_default_model(
        SqliteRecordStore::open_in_memory().expect("open"),
    )
    .expect("schemas");
    // Burn ids so the sender-side id differs from the receiver's.
    for _ in 1..sender_side_id {
        let filler = BinarySmsTransmission::outgoing(SmsAgent::new("+1"), &payload(1), 8, None)
            .expect("segment");
        sender_store
            .store_transmission(&mut Transmission::from(filler))
            .expect("store");
    }
    let outgoing = BinarySmsTransmission::outgoing(
        SmsAgent::new("+441234567890"),
        bits,
        wire::BINARY_BODY_CAPACITY_BITS,
        Some(3),
    )
    .expect("segment");
    let mut stored = Transmission::from(outgoing);
    sender_store.store_transmission(&mut stored).expect("store");
    let Transmission::BinarySms(t) = stored else {
        panic!("wrong kind");
    };
    let units = t.encode_parts().expect("encode");
    (t, units)
}

#[test]
fn binary_parts_out_of_order_with_duplicates() {
    let original = payload(2500);
    let (sent, units) = encoded_binary(&original, 4);
    assert_eq!(sent.meta.local_id(), Some(4));
    assert_eq!(units.len(), 3);

    let dir = tempdir().expect("tempdir");
    let sender = SmsAgent::new("+33 6 00 00 00 01");
    let mut store = TransmissionStore::with_default_model(
        SqliteRecordStore::open(dir.path().join("inbox.db")).expect("open"),
    )
    .expect("schemas");

    let first = store.receive_binary_sms(&sender, &units[1], 100).expect("receive");
    let ReceiveOutcome::Pending { local_id, received, total } = first else {
        panic!("expected pending, got {first:?}");
    };
    assert_eq!((received, total), (1, 3));

    assert_eq!(
        store.receive_binary_sms(&sender, &units[1], 101).expect("receive"),
        ReceiveOutcome::Duplicate { local_id }
    );
    assert!(matches!(
        store.receive_binary_sms(&sender, &units[2], 102).expect("receive"),
        ReceiveOutcome::Pending { received: 2, .. }
    ));

    let pending = store
        .retrieve_binary_sms_transmission(&sender, false, 4, sent.meta.payload_hash())
        .expect("retrieve")
        .expect("present");
    assert_eq!(pending.missing_parts(), vec![1]);
    assert_eq!(pending.part(2).and_then(|p| p.received_at), Some(100));

    let done = store.receive_binary_sms(&sender, &units[0], 103).expect("receive");
    let ReceiveOutcome::Complete(Transmission::BinarySms(done)) = done else {
        panic!("expected completion, got {done:?}");
    };
    assert_eq!(done.meta.local_id(), Some(local_id));
    assert_eq!(done.meta.remote_id, Some(4));
    assert_eq!(done.meta.received_at, Some(103));
    assert_eq!(done.sender, Some(sender.clone()));
    assert_eq!(done.reassemble().expect("reassemble"), original);

    let again = store.receive_binary_sms(&sender, &units[0], 104).expect("receive");
    assert_eq!(again, ReceiveOutcome::Duplicate { local_id });
}

#[test]
fn same_remote_id_from_different_senders_stays_apart() {
    let (_, units) = encoded_binary(&payload(2000), 1);
    let mut store = TransmissionStore::with_default_model(
        SqliteRecordStore::open_in_memory().expect("open"),
    )
    .expect("schemas");

    let alice = SmsAgent::new("+15550001");
    let bob = SmsAgent::new("+15550002");
    let a = store.receive_binary_sms(&alice, &units[0], 1).expect("receive");
    let b = store.receive_binary_sms(&bob, &units[0], 2).expect("receive");
    let (
        ReceiveOutcome::Pending { local_id: a, .. },
        ReceiveOutcome::Pending { local_id: b, .. },
    ) = (a, b)
    else {
        panic!("expected two pending transmissions");
    };
    assert_ne!(a, b);
}

#[test]
fn text_unit_with_corrupt_body_fails_hash_check() {
    let mut outgoing =
        TextSmsTransmission::outgoing(SmsAgent::new("+15550100"), "meet at the ridge", 200, None)
            .expect("segment");
    let mut store = TransmissionStore::with_default_model(
        SqliteRecordStore::open_in_memory().expect("open"),
    )
    .expect("schemas");
    let mut stored = Transmission::from(outgoing.clone());
    store.store_transmission(&mut stored).expect("store");
    if let Transmission::TextSms(t) = stored {
        outgoing = t;
    }
    let unit = outgoing.encode_parts().expect("encode").remove(0);
    let tampered = unit.replace("ridge", "river");

    let inbox_sender = SmsAgent::new("+15550199");
    let err = store
        .receive_text_sms(&inbox_sender, &tampered, 5)
        .expect_err("hash mismatch");
    assert!(matches!(
        err,
        StoreError::Transmission(TransmissionError::PayloadHashMismatch { .. })
    ));
    assert!(store
        .retrieve_text_sms_transmission(&inbox_sender, false, 1, outgoing.meta.payload_hash())
        .expect("retrieve")
        .is_none());

    let ok = store.receive_text_sms(&inbox_sender, &unit, 6).expect("receive");
    assert!(matches!(ok, ReceiveOutcome::Complete(_)));
}

#[test]
fn truncated_binary_header_is_malformed() {
    let mut store = TransmissionStore::with_default_model(
        SqliteRecordStore::open_in_memory().expect("open"),
    )
    .expect("schemas");
    let err = store
        .receive_binary_sms(&SmsAgent::new("+1555"), &[wire::BINARY_SIGNATURE, 0, 0, 1], 1)
        .expect_err("malformed");
    assert!(matches!(err, StoreError::Decode(DecodeError::Malformed(_))));
    assert!(!err.is_consistency_violation());
}

#[test]
fn corrupt_first_part_is_discarded_so_resend_completes() {
    let mut outgoing =
        TextSmsTransmission::outgoing(SmsAgent::new("+15550100"), "meet at the ridge", 9, None)
            .expect("segment");
    let mut sender_store = TransmissionStore::with_default_model(
        SqliteRecordStore::open_in_memory().expect("open"),
    )
    .expect("schemas");
    let mut stored = Transmission::from(outgoing.clone());
    sender_store.store_transmission(&mut stored).expect("store");
    if let Transmission::TextSms(t) = stored {
        outgoing = t;
    }
    let units = outgoing.encode_parts().expect("encode");
    assert_eq!(units.len(), 2);
    let corrupt_first = units[0].replace("meet", "meat");
    assert_ne!(corrupt_first, units[0]);

    let dir = tempdir().expect("tempdir");
    let mut inbox = TransmissionStore::with_default_model(
        SqliteRecordStore::open(dir.path().join("inbox.db")).expect("open"),
    )
    .expect("schemas");
    let from = SmsAgent::new("+15550199");
    let (remote_id, hash) = (
        outgoing.meta.local_id().expect("id"),
        outgoing.meta.payload_hash(),
    );

    assert!(matches!(
        inbox.receive_text_sms(&from, &corrupt_first, 1).expect("receive"),
        ReceiveOutcome::Pending { received: 1, total: 2, .. }
    ));
    let err = inbox
        .receive_text_sms(&from, &units[1], 2)
        .expect_err("hash mismatch");
    assert!(matches!(
        err,
        StoreError::Transmission(TransmissionError::PayloadHashMismatch { .. })
    ));
    assert!(inbox
        .retrieve_text_sms_transmission(&from, false, remote_id, hash)
        .expect("retrieve")
        .is_none());
    let model = inbox.model().clone();
    assert_eq!(inbox.record_store().row_count(&model.part).expect("count"), 0);

    assert!(matches!(
        inbox.receive_text_sms(&from, &units[0], 3).expect("receive"),
        ReceiveOutcome::Pending { received: 1, .. }
    ));
    let done = inbox.receive_text_sms(&from, &units[1], 4).expect("receive");
    let ReceiveOutcome::Complete(Transmission::TextSms(done)) = done else {
        panic!("expected completion, got {done:?}");
    };
    assert_eq!(done.reassemble().expect("reassemble"), "meet at the ridge");
}
