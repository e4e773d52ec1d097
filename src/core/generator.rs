use crate::{
    bits::BitArray,
    transmission::{HttpTransmission, Message, SmsTransmission, Transmission},
    types::LocalId,
};

use super::schema::{Record, TransmissionModel, Value, part_cols, transmission_cols};

/// Records produced for one transmission.
///
/// Part records carry the parent ID only when the transmission already had
/// one; otherwise [`RecordGenerator::link_parts`] fills it in once the parent
/// row has been written.
#[derive(Debug, Clone)]
pub struct RecordGenerator {
    /// The `Transmission` row.
    pub transmission_record: Record,
    /// The `TransmissionPart` rows, ascending by part number.
    pub part_records: Vec<Record>,
}

impl RecordGenerator {
    /// Maps `transmission` and its parts to records.
    pub fn new(model: &TransmissionModel, transmission: &Transmission) -> Self {
        let meta = transmission.meta();
        let mut t_rec = Record::new(&model.transmission);
        t_rec.set(transmission_cols::ID, Value::opt_int(meta.local_id()));
        t_rec.set(transmission_cols::REMOTE_ID, Value::opt_int(meta.remote_id));
        t_rec.set(transmission_cols::TYPE, transmission.kind().ordinal());
        t_rec.set(transmission_cols::PAYLOAD_HASH, meta.payload_hash());
        t_rec.set(transmission_cols::PAYLOAD_TYPE, Value::opt_int(meta.payload_type));
        t_rec.set(transmission_cols::SENT_AT, Value::opt_time(meta.sent_at));
        t_rec.set(transmission_cols::RECEIVED_AT, Value::opt_time(meta.received_at));

        let mut generator = Self {
            transmission_record: t_rec,
            part_records: Vec::new(),
        };
        let parent = meta.local_id();
        match transmission {
            Transmission::BinarySms(t) => {
                generator.handle_sms(model, parent, t, |body: &BitArray| {
                    (body.to_bytes(), body.len())
                });
            }
            Transmission::TextSms(t) => {
                generator.handle_sms(model, parent, t, |body: &String| {
                    let bytes = body.as_bytes().to_vec();
                    let bits = bytes.len() * 8;
                    (bytes, bits)
                });
            }
            Transmission::Http(t) => generator.handle_http(model, parent, t),
        }
        generator
    }

    /// Points every part record at the stored parent row.
    pub fn link_parts(&mut self, local_id: LocalId) {
        for rec in &mut self.part_records {
            rec.set(part_cols::TRANSMISSION_ID, local_id);
        }
    }

    fn handle_sms<B>(
        &mut self,
        model: &TransmissionModel,
        parent: Option<LocalId>,
        t: &SmsTransmission<B>,
        encode_body: impl Fn(&B) -> (Vec<u8>, usize),
    ) {
        let t_rec = &mut self.transmission_record;
        t_rec.set(transmission_cols::NUMBER_OF_PARTS, t.total_parts());
        if let Some(sender) = &t.sender {
            t_rec.set(transmission_cols::SENDER, sender.to_string());
        }
        if let Some(receiver) = &t.receiver {
            t_rec.set(transmission_cols::RECEIVER, receiver.to_string());
        }

        for message in t.parts() {
            let (bytes, bits) = encode_body(&message.body);
            self.push_part(model, parent, message, bytes, bits);
        }
    }

    fn handle_http(
        &mut self,
        model: &TransmissionModel,
        parent: Option<LocalId>,
        t: &HttpTransmission,
    ) {
        let t_rec = &mut self.transmission_record;
        t_rec.set(transmission_cols::RECEIVER, t.server_url.as_str());
        t_rec.set(transmission_cols::NUMBER_OF_PARTS, 1u32);

        let single = Message::new(1, 1, ());
        self.push_part(model, parent, &single, t.body.clone(), t.body_bit_length());
    }

    fn push_part<B>(
        &mut self,
        model: &TransmissionModel,
        parent: Option<LocalId>,
        message: &Message<B>,
        body: Vec<u8>,
        bit_length: usize,
    ) {
        let mut rec = Record::new(&model.part);
        rec.set(part_cols::TRANSMISSION_ID, Value::opt_int(parent));
        rec.set(part_cols::PART_NUMBER, message.part_number);
        rec.set(part_cols::SENT_AT, Value::opt_time(message.sent_at));
        rec.set(part_cols::DELIVERED_AT, Value::opt_time(message.delivered_at));
        rec.set(part_cols::RECEIVED_AT, Value::opt_time(message.received_at));
        rec.set(part_cols::BODY, body);
        rec.set(part_cols::BODY_BIT_LENGTH, bit_length as i64);
        self.part_records.push(rec);
    }
}
