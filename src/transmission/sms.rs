use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    bits::BitArray,
    types::{PartNumber, PayloadType, SmsAgent, TimestampMs},
};

use super::{
    Message, TransmissionError, TransmissionMeta, bits_payload_hash, checked_part_count,
    payload_hash,
};

/// Transmission split over a fixed number of SMS parts.
///
/// Parts are kept ordered by part number regardless of arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsTransmission<B> {
    /// Shared attributes.
    pub meta: TransmissionMeta,
    /// Sending party, known on the receiving side.
    pub sender: Option<SmsAgent>,
    /// Receiving party, known on the sending side.
    pub receiver: Option<SmsAgent>,
    total_parts: PartNumber,
    parts: BTreeMap<PartNumber, Message<B>>,
}

/// Bit-packed payload over binary SMS.
pub type BinarySmsTransmission = SmsTransmission<BitArray>;
/// Character payload over text SMS.
pub type TextSmsTransmission = SmsTransmission<String>;

impl<B> SmsTransmission<B> {
    /// Creates an empty transmission expecting `total_parts` parts.
    pub fn new(
        meta: TransmissionMeta,
        sender: Option<SmsAgent>,
        receiver: Option<SmsAgent>,
        total_parts: PartNumber,
    ) -> Self {
        Self {
            meta,
            sender,
            receiver,
            total_parts,
            parts: BTreeMap::new(),
        }
    }

    /// Starts reassembly of a transmission announced by `sender`.
    pub fn incoming(meta: TransmissionMeta, sender: SmsAgent, total_parts: PartNumber) -> Self {
        Self::new(meta, Some(sender), None, total_parts)
    }

    /// Fixed number of parts.
    pub fn total_parts(&self) -> PartNumber {
        self.total_parts
    }

    /// Parts present so far, ascending by part number.
    pub fn parts(&self) -> impl Iterator<Item = &Message<B>> {
        self.parts.values()
    }

    /// Number of parts present.
    pub fn received_parts(&self) -> usize {
        self.parts.len()
    }

    /// Part with the given number, if present.
    pub fn part(&self, part_number: PartNumber) -> Option<&Message<B>> {
        self.parts.get(&part_number)
    }

    /// Adds a part. Returns `false` if a part with that number was already
    /// present, in which case the first copy is kept.
    pub fn receive_part(&mut self, message: Message<B>) -> Result<bool, TransmissionError> {
        if message.total_parts != self.total_parts {
            return Err(TransmissionError::TotalPartsMismatch {
                expected: self.total_parts,
                found: message.total_parts,
            });
        }
        if message.part_number == 0 || message.part_number > self.total_parts {
            return Err(TransmissionError::PartOutOfRange {
                part: message.part_number,
                total: self.total_parts,
            });
        }
        if self.parts.contains_key(&message.part_number) {
            return Ok(false);
        }
        self.parts.insert(message.part_number, message);
        Ok(true)
    }

    /// Returns true once a part exists for every number in `[1, total]`.
    pub fn is_complete(&self) -> bool {
        self.parts.len() == self.total_parts as usize
    }

    /// Part numbers not yet present, ascending.
    pub fn missing_parts(&self) -> Vec<PartNumber> {
        (1..=self.total_parts)
            .filter(|n| !self.parts.contains_key(n))
            .collect()
    }

    /// Records that a part was handed to the transport. Once every part has
    /// been sent the transmission itself is marked sent.
    pub fn mark_part_sent(
        &mut self,
        part_number: PartNumber,
        at: TimestampMs,
    ) -> Result<(), TransmissionError> {
        self.part_mut(part_number)?.sent_at = Some(at);
        if self.is_complete() && self.parts.values().all(|p| p.sent_at.is_some()) {
            self.meta.sent_at = self.parts.values().filter_map(|p| p.sent_at).max();
        }
        Ok(())
    }

    /// Records a delivery confirmation for a part.
    pub fn mark_part_delivered(
        &mut self,
        part_number: PartNumber,
        at: TimestampMs,
    ) -> Result<(), TransmissionError> {
        self.part_mut(part_number)?.delivered_at = Some(at);
        Ok(())
    }

    fn part_mut(&mut self, part_number: PartNumber) -> Result<&mut Message<B>, TransmissionError> {
        let total = self.total_parts;
        self.parts
            .get_mut(&part_number)
            .ok_or(TransmissionError::PartOutOfRange {
                part: part_number,
                total,
            })
    }

    fn ensure_complete(&self) -> Result<(), TransmissionError> {
        if self.is_complete() {
            Ok(())
        } else {
            Err(TransmissionError::Incomplete {
                missing: self.missing_parts(),
            })
        }
    }

    fn with_segments(
        mut meta: TransmissionMeta,
        receiver: SmsAgent,
        payload_type: Option<PayloadType>,
        segments: Vec<B>,
        empty: impl FnOnce() -> B,
    ) -> Result<Self, TransmissionError> {
        let total = checked_part_count(segments.len())?;
        meta.payload_type = payload_type;
        let mut out = Self::new(meta, None, Some(receiver), total);
        if segments.is_empty() {
            out.parts.insert(1, Message::new(1, total, empty()));
        }
        for (index, body) in segments.into_iter().enumerate() {
            let part_number = index as PartNumber + 1;
            out.parts.insert(part_number, Message::new(part_number, total, body));
        }
        Ok(out)
    }
}

impl BinarySmsTransmission {
    /// Segments `payload` into runs of at most `capacity_bits` bits addressed
    /// to `receiver`. The final run keeps its true length.
    pub fn outgoing(
        receiver: SmsAgent,
        payload: &BitArray,
        capacity_bits: usize,
        payload_type: Option<PayloadType>,
    ) -> Result<Self, TransmissionError> {
        if capacity_bits == 0 {
            return Err(TransmissionError::InvalidCapacity(capacity_bits));
        }
        checked_part_count(payload.len().div_ceil(capacity_bits))?;
        let meta = TransmissionMeta::new(bits_payload_hash(payload));
        Self::with_segments(
            meta,
            receiver,
            payload_type,
            payload.split(capacity_bits),
            BitArray::new,
        )
    }

    /// Concatenates all parts in order and verifies the payload hash.
    pub fn reassemble(&self) -> Result<BitArray, TransmissionError> {
        self.ensure_complete()?;
        let payload = BitArray::concat(self.parts().map(|p| &p.body));
        let actual = bits_payload_hash(&payload);
        if actual != self.meta.payload_hash() {
            return Err(TransmissionError::PayloadHashMismatch {
                expected: self.meta.payload_hash(),
                actual,
            });
        }
        Ok(payload)
    }
}

impl TextSmsTransmission {
    /// Segments `payload` into runs of at most `capacity_chars` characters
    /// addressed to `receiver`. Splits never fall inside a character.
    pub fn outgoing(
        receiver: SmsAgent,
        payload: &str,
        capacity_chars: usize,
        payload_type: Option<PayloadType>,
    ) -> Result<Self, TransmissionError> {
        if capacity_chars == 0 {
            return Err(TransmissionError::InvalidCapacity(capacity_chars));
        }
        checked_part_count(payload.chars().count().div_ceil(capacity_chars))?;
        let meta = TransmissionMeta::new(payload_hash(payload.as_bytes()));
        Self::with_segments(
            meta,
            receiver,
            payload_type,
            split_chars(payload, capacity_chars),
            String::new,
        )
    }

    /// Concatenates all part bodies in order and verifies the payload hash.
    pub fn reassemble(&self) -> Result<String, TransmissionError> {
        self.ensure_complete()?;
        let payload: String = self.parts().map(|p| p.body.as_str()).collect();
        let actual = payload_hash(payload.as_bytes());
        if actual != self.meta.payload_hash() {
            return Err(TransmissionError::PayloadHashMismatch {
                expected: self.meta.payload_hash(),
                actual,
            });
        }
        Ok(payload)
    }
}

fn split_chars(text: &str, capacity_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for c in text.chars() {
        if count == capacity_chars {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if count > 0 {
        out.push(current);
    }
    out
}
