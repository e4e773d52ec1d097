use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    bits::{BitArray, BitLengthError},
    persist::{PersistError, RecordStore, TransactionScope},
    transmission::{
        BinarySmsTransmission, HttpTransmission, Message, SmsTransmission, TextSmsTransmission,
        Transmission, TransmissionError, TransmissionMeta, wire::DecodeError,
    },
    types::{LocalId, PayloadHash, PayloadType, RemoteId, SmsAgent, TransmissionType},
};

use super::{
    generator::RecordGenerator,
    query::{Order, RecordsQuery},
    schema::{Record, TransmissionModel, Value, part_cols, transmission_cols},
};

/// Failures raised by [`TransmissionStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record store failed; any open transaction was rolled back.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// Domain rule violated.
    #[error(transparent)]
    Transmission(#[from] TransmissionError),
    /// Inbound unit carries the signature but does not parse.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The stored primary key differs from the transmission's local ID.
    #[error("non-matching transmission ID: object has {expected}, record has {stored}")]
    LocalIdMismatch {
        /// ID on the transmission.
        expected: LocalId,
        /// ID on the stored record.
        stored: i64,
    },
    /// Stored type ordinal has no matching transport kind.
    #[error("unsupported transmission type ordinal {0}")]
    UnknownType(i64),
    /// A stored row lacks a required value or holds an invalid one.
    #[error("corrupt {schema} record: {reason}")]
    Corrupt {
        /// Schema of the row.
        schema: &'static str,
        /// What is wrong.
        reason: String,
    },
}

impl StoreError {
    /// Returns true for errors meaning the schema and the code writing it
    /// have drifted apart. These are never recoverable by retrying.
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            Self::LocalIdMismatch { .. } | Self::UnknownType(_) | Self::Corrupt { .. }
        )
    }
}

impl From<BitLengthError> for StoreError {
    fn from(value: BitLengthError) -> Self {
        Self::Corrupt {
            schema: "TransmissionPart",
            reason: value.to_string(),
        }
    }
}

/// Result alias for [`TransmissionStore`] operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Stores, retrieves and deletes transmissions and their parts.
pub struct TransmissionStore<S: RecordStore> {
    records: S,
    model: TransmissionModel,
}

impl<S: RecordStore> TransmissionStore<S> {
    /// Wraps `records`, creating both schemas if needed.
    pub fn new(mut records: S, model: TransmissionModel) -> StoreResult<Self> {
        for schema in model.schemas() {
            records.initialise(schema)?;
        }
        Ok(Self { records, model })
    }

    /// Wraps `records` using the standard schemas.
    pub fn with_default_model(records: S) -> StoreResult<Self> {
        Self::new(records, TransmissionModel::new())
    }

    /// Schemas in use.
    pub fn model(&self) -> &TransmissionModel {
        &self.model
    }

    /// Underlying record store.
    pub fn record_store(&self) -> &S {
        &self.records
    }

    /// Gives back the underlying record store.
    pub fn into_inner(self) -> S {
        self.records
    }

    /// Writes `transmission` and all of its parts in one transaction.
    ///
    /// On success the transmission's local ID is set (or confirmed). On
    /// failure nothing is written and the transmission is left untouched.
    /// Storing an already stored transmission replaces its part rows.
    pub fn store_transmission(&mut self, transmission: &mut Transmission) -> StoreResult<LocalId> {
        let generator = RecordGenerator::new(&self.model, transmission);
        let expected = transmission.local_id();

        let mut scope = TransactionScope::begin(&mut self.records)?;
        let local_id = write_transmission(&mut *scope, &self.model, generator, expected)?;
        scope.commit()?;

        transmission.meta_mut().assign_local_id(local_id)?;
        info!(
            local_id,
            kind = ?transmission.kind(),
            parts = transmission.total_parts(),
            "transmission stored"
        );
        Ok(local_id)
    }

    /// Transmission with the given local ID, or `None`.
    pub fn retrieve_transmission_for_id(
        &self,
        local_id: LocalId,
    ) -> StoreResult<Option<Transmission>> {
        self.retrieve_for_query(RecordsQuery::by_key(
            &self.model.transmission,
            [Value::from(local_id)],
        ))
    }

    /// First binary SMS transmission exchanged with `correspondent` that
    /// matches `remote_id` and `payload_hash`. `sent` selects whether
    /// `correspondent` was the receiver (`true`) or the sender.
    pub fn retrieve_binary_sms_transmission(
        &self,
        correspondent: &SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
    ) -> StoreResult<Option<BinarySmsTransmission>> {
        let query = self.sms_query(
            TransmissionType::BinarySms,
            correspondent,
            sent,
            remote_id,
            payload_hash,
        );
        match self.retrieve_for_query(query)? {
            None => Ok(None),
            Some(Transmission::BinarySms(t)) => Ok(Some(t)),
            Some(other) => Err(unexpected_kind(TransmissionType::BinarySms, &other)),
        }
    }

    /// Text SMS counterpart of [`Self::retrieve_binary_sms_transmission`].
    pub fn retrieve_text_sms_transmission(
        &self,
        correspondent: &SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
    ) -> StoreResult<Option<TextSmsTransmission>> {
        let query = self.sms_query(
            TransmissionType::TextualSms,
            correspondent,
            sent,
            remote_id,
            payload_hash,
        );
        match self.retrieve_for_query(query)? {
            None => Ok(None),
            Some(Transmission::TextSms(t)) => Ok(Some(t)),
            Some(other) => Err(unexpected_kind(TransmissionType::TextualSms, &other)),
        }
    }

    /// First HTTP transmission with the given payload type and hash.
    pub fn retrieve_http_transmission(
        &self,
        payload_type: PayloadType,
        payload_hash: PayloadHash,
    ) -> StoreResult<Option<HttpTransmission>> {
        let query = RecordsQuery::from(&self.model.transmission)
            .where_eq(transmission_cols::TYPE, TransmissionType::Http.ordinal())
            .where_eq(transmission_cols::PAYLOAD_TYPE, u32::from(payload_type))
            .where_eq(transmission_cols::PAYLOAD_HASH, payload_hash)
            .first();
        match self.retrieve_for_query(query)? {
            None => Ok(None),
            Some(Transmission::Http(t)) => Ok(Some(t)),
            Some(other) => Err(unexpected_kind(TransmissionType::Http, &other)),
        }
    }

    /// Deletes `transmission` and its parts in one transaction.
    ///
    /// Does nothing for a transmission that was never stored. Failures are
    /// rolled back and logged; the return value tells whether the delete took
    /// effect.
    pub fn delete_transmission(&mut self, transmission: &Transmission) -> bool {
        let Some(local_id) = transmission.local_id() else {
            return false;
        };
        match self.try_delete(local_id) {
            Ok(()) => {
                info!(local_id, "transmission deleted");
                true
            }
            Err(err) => {
                warn!(local_id, error = %err, "transmission delete rolled back");
                false
            }
        }
    }

    pub(super) fn try_delete(&mut self, local_id: LocalId) -> StoreResult<()> {
        let parts =
            RecordsQuery::from(&self.model.part).where_eq(part_cols::TRANSMISSION_ID, local_id);
        let parent = RecordsQuery::by_key(&self.model.transmission, [Value::from(local_id)]);

        let mut scope = TransactionScope::begin(&mut self.records)?;
        let removed = scope.delete(&parts)?;
        scope.delete(&parent)?;
        scope.commit()?;
        debug!(local_id, removed, "deleted part records");
        Ok(())
    }

    fn sms_query(
        &self,
        kind: TransmissionType,
        correspondent: &SmsAgent,
        sent: bool,
        remote_id: RemoteId,
        payload_hash: PayloadHash,
    ) -> RecordsQuery {
        let correspondent_col = if sent {
            transmission_cols::RECEIVER
        } else {
            transmission_cols::SENDER
        };
        RecordsQuery::from(&self.model.transmission)
            .where_eq(transmission_cols::TYPE, kind.ordinal())
            .where_eq(correspondent_col, correspondent.to_string())
            .where_eq(transmission_cols::REMOTE_ID, remote_id)
            .where_eq(transmission_cols::PAYLOAD_HASH, payload_hash)
            .first()
    }

    fn retrieve_for_query(&self, query: RecordsQuery) -> StoreResult<Option<Transmission>> {
        let Some(t_rec) = self.records.retrieve_record(&query)? else {
            return Ok(None);
        };

        let local_id = required_u32(&t_rec, transmission_cols::ID)?;
        let ordinal = required_int(&t_rec, transmission_cols::TYPE)?;
        let kind =
            TransmissionType::from_ordinal(ordinal).ok_or(StoreError::UnknownType(ordinal))?;
        let meta = TransmissionMeta::restored(
            local_id,
            optional_u32(&t_rec, transmission_cols::REMOTE_ID)?,
            required_u32(&t_rec, transmission_cols::PAYLOAD_HASH)?,
            optional_u32(&t_rec, transmission_cols::PAYLOAD_TYPE)?
                .map(PayloadType::try_from)
                .transpose()
                .map_err(|err| corrupt(&t_rec, err.to_string()))?,
            optional_time(&t_rec, transmission_cols::SENT_AT),
            optional_time(&t_rec, transmission_cols::RECEIVED_AT),
        );
        let sender = t_rec.text(transmission_cols::SENDER);
        let receiver = t_rec.text(transmission_cols::RECEIVER);
        let total_parts = required_u32(&t_rec, transmission_cols::NUMBER_OF_PARTS)?;

        let part_recs = self.records.retrieve_records(
            &RecordsQuery::from(&self.model.part)
                .where_eq(part_cols::TRANSMISSION_ID, local_id)
                .order_by(part_cols::PART_NUMBER, Order::Ascending),
        )?;
        debug!(local_id, ?kind, parts = part_recs.len(), "reconstructing transmission");

        let transmission = match kind {
            TransmissionType::BinarySms => {
                let mut t = SmsTransmission::new(
                    meta,
                    sender.and_then(SmsAgent::parse),
                    receiver.and_then(SmsAgent::parse),
                    total_parts,
                );
                for rec in &part_recs {
                    let bits = required_u32(rec, part_cols::BODY_BIT_LENGTH)? as usize;
                    let body = BitArray::from_bytes(required_blob(rec, part_cols::BODY)?, bits)?;
                    t.receive_part(restore_message(rec, total_parts, body)?)?;
                }
                Transmission::BinarySms(t)
            }
            TransmissionType::TextualSms => {
                let mut t = SmsTransmission::new(
                    meta,
                    sender.and_then(SmsAgent::parse),
                    receiver.and_then(SmsAgent::parse),
                    total_parts,
                );
                for rec in &part_recs {
                    let body = String::from_utf8(required_blob(rec, part_cols::BODY)?.to_vec())
                        .map_err(|err| corrupt(rec, err.to_string()))?;
                    t.receive_part(restore_message(rec, total_parts, body)?)?;
                }
                Transmission::TextSms(t)
            }
            TransmissionType::Http => {
                let Some(rec) = part_recs.first() else {
                    return Err(corrupt(
                        &t_rec,
                        "HTTP transmission without body part".to_string(),
                    ));
                };
                HttpTransmission::from_parts(
                    meta,
                    receiver.unwrap_or_default(),
                    required_blob(rec, part_cols::BODY)?.to_vec(),
                )
                .into()
            }
        };
        Ok(Some(transmission))
    }
}

/// Writes the parent row first, then the parts pointing at its key.
fn write_transmission<S: RecordStore + ?Sized>(
    records: &mut S,
    model: &TransmissionModel,
    mut generator: RecordGenerator,
    expected: Option<LocalId>,
) -> StoreResult<LocalId> {
    records.store(&mut generator.transmission_record)?;

    let stored = required_int(&generator.transmission_record, transmission_cols::ID)?;
    let local_id = match expected {
        Some(expected) if i64::from(expected) != stored => {
            return Err(StoreError::LocalIdMismatch { expected, stored });
        }
        Some(expected) => expected,
        None => LocalId::try_from(stored)
            .map_err(|err| corrupt(&generator.transmission_record, err.to_string()))?,
    };

    let replaced = records.delete(
        &RecordsQuery::from(&model.part).where_eq(part_cols::TRANSMISSION_ID, local_id),
    )?;
    generator.link_parts(local_id);
    for part in &mut generator.part_records {
        records.store(part)?;
    }
    debug!(
        local_id,
        replaced,
        written = generator.part_records.len(),
        "wrote part records"
    );
    Ok(local_id)
}

fn restore_message<B>(rec: &Record, total_parts: u32, body: B) -> StoreResult<Message<B>> {
    let mut message = Message::new(required_u32(rec, part_cols::PART_NUMBER)?, total_parts, body);
    message.sent_at = optional_time(rec, part_cols::SENT_AT);
    message.delivered_at = optional_time(rec, part_cols::DELIVERED_AT);
    message.received_at = optional_time(rec, part_cols::RECEIVED_AT);
    Ok(message)
}

fn unexpected_kind(wanted: TransmissionType, found: &Transmission) -> StoreError {
    StoreError::Corrupt {
        schema: "Transmission",
        reason: format!("query for {wanted:?} returned {:?}", found.kind()),
    }
}

fn corrupt(rec: &Record, reason: String) -> StoreError {
    StoreError::Corrupt {
        schema: rec.schema().name(),
        reason,
    }
}

fn required_int(rec: &Record, column: usize) -> StoreResult<i64> {
    rec.int(column).ok_or_else(|| {
        corrupt(
            rec,
            format!("column {} is not set", rec.schema().column(column).name),
        )
    })
}

fn required_u32(rec: &Record, column: usize) -> StoreResult<u32> {
    let value = required_int(rec, column)?;
    u32::try_from(value).map_err(|_| {
        corrupt(
            rec,
            format!("column {} holds {value}", rec.schema().column(column).name),
        )
    })
}

fn optional_u32(rec: &Record, column: usize) -> StoreResult<Option<u32>> {
    if rec.get(column).is_null() {
        return Ok(None);
    }
    required_u32(rec, column).map(Some)
}

fn optional_time(rec: &Record, column: usize) -> Option<u64> {
    rec.int(column).and_then(|v| u64::try_from(v).ok())
}

fn required_blob(rec: &Record, column: usize) -> StoreResult<&[u8]> {
    rec.blob(column).ok_or_else(|| {
        corrupt(
            rec,
            format!("column {} is not set", rec.schema().column(column).name),
        )
    })
}
