use serde::{Deserialize, Serialize};

use crate::{
    bits::BitArray,
    types::{PartNumber, TimestampMs},
};

/// One transport unit carrying a slice of a transmission's payload.
///
/// Sending, delivery confirmation and receipt are independent events, so each
/// timestamp is tracked separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message<B> {
    /// 1-based position within the transmission.
    pub part_number: PartNumber,
    /// Number of parts in the transmission.
    pub total_parts: PartNumber,
    /// When this part was handed to the transport.
    pub sent_at: Option<TimestampMs>,
    /// When the transport confirmed delivery.
    pub delivered_at: Option<TimestampMs>,
    /// When this part arrived at the receiver.
    pub received_at: Option<TimestampMs>,
    /// Slice of the payload.
    pub body: B,
}

/// Part of a binary SMS transmission.
pub type BinaryMessage = Message<BitArray>;
/// Part of a text SMS transmission.
pub type TextMessage = Message<String>;

impl<B> Message<B> {
    /// Creates a part with no lifecycle timestamps.
    pub fn new(part_number: PartNumber, total_parts: PartNumber, body: B) -> Self {
        Self {
            part_number,
            total_parts,
            sent_at: None,
            delivered_at: None,
            received_at: None,
            body,
        }
    }

    /// Sets the receipt time.
    pub fn received(mut self, at: TimestampMs) -> Self {
        self.received_at = Some(at);
        self
    }
}

impl BinaryMessage {
    /// Exact number of payload bits in this part.
    pub fn body_bit_length(&self) -> usize {
        self.body.len()
    }
}

impl TextMessage {
    /// Number of payload characters in this part.
    pub fn body_char_count(&self) -> usize {
        self.body.chars().count()
    }
}
