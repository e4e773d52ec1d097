//! On-the-wire layout of SMS parts.
//!
//! Binary part (bit-packed, MSB first):
//!
//! ```text
//! [0..8)     signature 0x5A
//! [8..40)    sender-side transmission id (u32)
//! [40..72)   payload hash (u32)
//! [72..80)   part number (u8, 1-based)
//! [80..88)   total parts (u8)
//! [88..104)  body bit length (u16)
//! [104..)    body, zero-padded to a byte boundary
//! ```
//!
//! 13-byte header + up to 120 body bytes = 133 bytes, what remains of a
//! 140-byte binary SMS once port addressing is added.
//!
//! Text part:
//!
//! ```text
//! "~SP" IIIIIIII HHHHHHHH PP TT <body>
//! ```
//!
//! Fixed-width uppercase hex fields; 23 header characters + up to 137 body
//! characters = 160 characters.
//!
//! The receiver stores the sender-side transmission id as its remote ID.

use thiserror::Error;

use crate::{
    bits::BitArray,
    types::{LocalId, PartNumber, PayloadHash, RemoteId, TimestampMs},
};

use super::{
    BinarySmsTransmission, MAX_PARTS, Message, TextSmsTransmission, TransmissionError,
    TransmissionMeta,
};

/// Leading byte of every binary part.
pub const BINARY_SIGNATURE: u8 = 0x5A;
/// Maximum size of an encoded binary part.
pub const BINARY_SMS_MAX_BYTES: usize = 133;
/// Bits taken by the binary header.
pub const BINARY_HEADER_BITS: usize = 104;
/// Body bits available in a default-size binary part.
pub const BINARY_BODY_CAPACITY_BITS: usize = BINARY_SMS_MAX_BYTES * 8 - BINARY_HEADER_BITS;

/// Leading characters of every text part.
pub const TEXT_SIGNATURE: &str = "~SP";
/// Maximum characters in an encoded text part.
pub const TEXT_SMS_MAX_CHARS: usize = 160;
/// Characters taken by the text header.
pub const TEXT_HEADER_CHARS: usize = 23;
/// Body characters available in a default-size text part.
pub const TEXT_BODY_CAPACITY_CHARS: usize = TEXT_SMS_MAX_CHARS - TEXT_HEADER_CHARS;

const BINARY_HEADER_BYTES: usize = BINARY_HEADER_BITS / 8;

/// Why an inbound unit could not be admitted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The unit does not carry this protocol's signature; it may belong to
    /// another protocol sharing the channel and should be ignored silently.
    #[error("unit does not carry the transmission signature")]
    NotRelevant,
    /// The unit carries the signature but does not parse.
    #[error("malformed unit: {0}")]
    Malformed(String),
}

/// Decoded header and body of one inbound part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPart<B> {
    /// Sender-side transmission id.
    pub remote_id: RemoteId,
    /// Hash of the full payload.
    pub payload_hash: PayloadHash,
    /// 1-based part number.
    pub part_number: PartNumber,
    /// Total parts of the transmission.
    pub total_parts: PartNumber,
    /// Body slice.
    pub body: B,
}

impl<B> InboundPart<B> {
    /// Metadata for a new reassembly started by this part.
    pub fn meta(&self) -> TransmissionMeta {
        TransmissionMeta::new(self.payload_hash).with_remote_id(self.remote_id)
    }

    /// Converts into a message stamped with its receipt time.
    pub fn into_message(self, received_at: TimestampMs) -> Message<B> {
        Message::new(self.part_number, self.total_parts, self.body).received(received_at)
    }
}

/// Encodes one binary part. Fails if the unit would exceed
/// [`BINARY_SMS_MAX_BYTES`] or its numbering does not fit the header.
pub fn encode_binary(
    id: LocalId,
    payload_hash: PayloadHash,
    message: &Message<BitArray>,
) -> Result<Vec<u8>, TransmissionError> {
    check_encoded_numbering(message)?;
    let body_bits = message.body.len();
    let size = BINARY_HEADER_BYTES + body_bits.div_ceil(8);
    if size > BINARY_SMS_MAX_BYTES {
        return Err(TransmissionError::UnitTooLarge {
            size,
            max: BINARY_SMS_MAX_BYTES,
            unit: "bytes",
        });
    }
    let mut bits = BitArray::with_capacity(BINARY_HEADER_BITS + body_bits);
    bits.push_bits(u64::from(BINARY_SIGNATURE), 8);
    bits.push_bits(u64::from(id), 32);
    bits.push_bits(u64::from(payload_hash), 32);
    bits.push_bits(u64::from(message.part_number), 8);
    bits.push_bits(u64::from(message.total_parts), 8);
    bits.push_bits(body_bits as u64, 16);
    bits.extend(&message.body);
    Ok(bits.to_bytes())
}

/// Decodes one binary part.
pub fn decode_binary(data: &[u8]) -> Result<InboundPart<BitArray>, DecodeError> {
    if data.first() != Some(&BINARY_SIGNATURE) {
        return Err(DecodeError::NotRelevant);
    }
    if data.len() < BINARY_HEADER_BYTES {
        return Err(DecodeError::Malformed(format!(
            "binary header needs {BINARY_HEADER_BYTES} bytes, got {}",
            data.len()
        )));
    }
    let remote_id = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    let payload_hash = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);
    let part_number = PartNumber::from(data[9]);
    let total_parts = PartNumber::from(data[10]);
    let body_bits = usize::from(u16::from_be_bytes([data[11], data[12]]));
    check_numbering(part_number, total_parts)?;

    let body_bytes = &data[BINARY_HEADER_BYTES..];
    if body_bytes.len() != body_bits.div_ceil(8) {
        return Err(DecodeError::Malformed(format!(
            "body declares {body_bits} bits but carries {} bytes",
            body_bytes.len()
        )));
    }
    let body = BitArray::from_bytes(body_bytes, body_bits)
        .map_err(|err| DecodeError::Malformed(err.to_string()))?;
    if body.as_bytes() != body_bytes {
        return Err(DecodeError::Malformed("non-zero padding bits".to_string()));
    }

    Ok(InboundPart {
        remote_id,
        payload_hash,
        part_number,
        total_parts,
        body,
    })
}

/// Encodes one text part. Fails if the unit would exceed
/// [`TEXT_SMS_MAX_CHARS`] or its numbering does not fit the header.
pub fn encode_text(
    id: LocalId,
    payload_hash: PayloadHash,
    message: &Message<String>,
) -> Result<String, TransmissionError> {
    check_encoded_numbering(message)?;
    let size = TEXT_HEADER_CHARS + message.body.chars().count();
    if size > TEXT_SMS_MAX_CHARS {
        return Err(TransmissionError::UnitTooLarge {
            size,
            max: TEXT_SMS_MAX_CHARS,
            unit: "characters",
        });
    }
    Ok(format!(
        "{TEXT_SIGNATURE}{id:08X}{payload_hash:08X}{:02X}{:02X}{}",
        message.part_number, message.total_parts, message.body
    ))
}

/// Decodes one text part.
pub fn decode_text(text: &str) -> Result<InboundPart<String>, DecodeError> {
    let Some(rest) = text.strip_prefix(TEXT_SIGNATURE) else {
        return Err(DecodeError::NotRelevant);
    };
    let fields_len = TEXT_HEADER_CHARS - TEXT_SIGNATURE.len();
    let (Some(fields), Some(body)) = (rest.get(..fields_len), rest.get(fields_len..)) else {
        return Err(DecodeError::Malformed("truncated text header".to_string()));
    };
    if !fields.is_ascii() {
        return Err(DecodeError::Malformed("non-ASCII text header".to_string()));
    }
    let remote_id = hex_field(fields, 0..8)?;
    let payload_hash = hex_field(fields, 8..16)?;
    let part_number = hex_field(fields, 16..18)?;
    let total_parts = hex_field(fields, 18..20)?;
    check_numbering(part_number, total_parts)?;

    Ok(InboundPart {
        remote_id,
        payload_hash,
        part_number,
        total_parts,
        body: body.to_string(),
    })
}

fn hex_field(fields: &str, range: std::ops::Range<usize>) -> Result<u32, DecodeError> {
    let raw = &fields[range];
    if !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::Malformed(format!("bad hex field {raw:?}")));
    }
    u32::from_str_radix(raw, 16).map_err(|err| DecodeError::Malformed(err.to_string()))
}

// Part fields are one byte wide on the wire.
fn check_encoded_numbering<B>(message: &Message<B>) -> Result<(), TransmissionError> {
    if message.total_parts > MAX_PARTS {
        return Err(TransmissionError::TooManyParts {
            needed: message.total_parts as usize,
            max: MAX_PARTS,
        });
    }
    if message.part_number == 0 || message.part_number > message.total_parts {
        return Err(TransmissionError::PartOutOfRange {
            part: message.part_number,
            total: message.total_parts,
        });
    }
    Ok(())
}

fn check_numbering(part_number: PartNumber, total_parts: PartNumber) -> Result<(), DecodeError> {
    if part_number == 0 || total_parts == 0 || part_number > total_parts {
        return Err(DecodeError::Malformed(format!(
            "part {part_number} of {total_parts}"
        )));
    }
    Ok(())
}

impl BinarySmsTransmission {
    /// Encodes every part for sending. Requires a local ID.
    pub fn encode_parts(&self) -> Result<Vec<Vec<u8>>, TransmissionError> {
        let id = self.meta.local_id().ok_or(TransmissionError::LocalIdUnset)?;
        self.parts()
            .map(|part| encode_binary(id, self.meta.payload_hash(), part))
            .collect()
    }
}

impl TextSmsTransmission {
    /// Encodes every part for sending. Requires a local ID.
    pub fn encode_parts(&self) -> Result<Vec<String>, TransmissionError> {
        let id = self.meta.local_id().ok_or(TransmissionError::LocalIdUnset)?;
        self.parts()
            .map(|part| encode_text(id, self.meta.payload_hash(), part))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SmsAgent;

    fn payload(len: usize) -> BitArray {
        let mut bits = BitArray::new();
        for i in 0..len {
            bits.push(i % 4 == 1);
        }
        bits
    }

    #[test]
    fn capacities_match_unit_sizes() {
        assert_eq!(BINARY_BODY_CAPACITY_BITS, 960);
        assert_eq!(TEXT_BODY_CAPACITY_CHARS, 137);
        assert_eq!(TEXT_SIGNATURE.len() + 8 + 8 + 2 + 2, TEXT_HEADER_CHARS);
    }

    #[test]
    fn binary_parts_decode_to_their_headers() {
        let mut t = BinarySmsTransmission::outgoing(
            SmsAgent::new("+15550100"),
            &payload(2000),
            BINARY_BODY_CAPACITY_BITS,
            None,
        )
        .unwrap();
        assert!(matches!(t.encode_parts(), Err(TransmissionError::LocalIdUnset)));
        t.meta.assign_local_id(0xDEAD_BEEF).unwrap();

        let units = t.encode_parts().unwrap();
        assert_eq!(units.len(), 3);
        for (unit, part) in units.iter().zip(t.parts()) {
            assert!(unit.len() <= BINARY_SMS_MAX_BYTES);
            let inbound = decode_binary(unit).unwrap();
            assert_eq!(inbound.remote_id, 0xDEAD_BEEF);
            assert_eq!(inbound.payload_hash, t.meta.payload_hash());
            assert_eq!(inbound.part_number, part.part_number);
            assert_eq!(inbound.total_parts, 3);
            assert_eq!(inbound.body, part.body);
        }
    }

    #[test]
    fn binary_decode_classifies_failures() {
        assert_eq!(decode_binary(&[]), Err(DecodeError::NotRelevant));
        assert_eq!(decode_binary(&[0x00, 1, 2, 3]), Err(DecodeError::NotRelevant));
        assert!(matches!(
            decode_binary(&[BINARY_SIGNATURE, 1, 2]),
            Err(DecodeError::Malformed(_))
        ));

        let message = Message::new(1, 1, payload(12));
        let mut unit = encode_binary(1, 2, &message).unwrap();
        unit.push(0);
        assert!(matches!(decode_binary(&unit), Err(DecodeError::Malformed(_))));

        let mut unit = encode_binary(1, 2, &message).unwrap();
        *unit.last_mut().unwrap() |= 0x01;
        assert!(matches!(decode_binary(&unit), Err(DecodeError::Malformed(_))));

        let mut unit = encode_binary(1, 2, &message).unwrap();
        unit[9] = 2;
        assert!(matches!(decode_binary(&unit), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn text_parts_round_trip() {
        let mut t = TextSmsTransmission::outgoing(
            SmsAgent::new("+15550100"),
            "zażółć gęślą jaźń, twice: zażółć gęślą jaźń",
            TEXT_BODY_CAPACITY_CHARS,
            Some(1),
        )
        .unwrap();
        t.meta.assign_local_id(42).unwrap();
        let units = t.encode_parts().unwrap();
        assert_eq!(units.len(), 1);
        assert!(units[0].chars().count() <= TEXT_SMS_MAX_CHARS);

        let inbound = decode_text(&units[0]).unwrap();
        assert_eq!(inbound.remote_id, 42);
        assert_eq!(inbound.payload_hash, t.meta.payload_hash());
        assert_eq!((inbound.part_number, inbound.total_parts), (1, 1));
        assert_eq!(inbound.body, t.part(1).unwrap().body);
    }

    #[test]
    fn text_decode_classifies_failures() {
        assert_eq!(decode_text("hello there"), Err(DecodeError::NotRelevant));
        assert!(matches!(decode_text("~SP0000"), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            decode_text("~SP0000000G000000000101body"),
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            decode_text("~SP00000001000000020301body"),
            Err(DecodeError::Malformed(_))
        ));
        let ok = decode_text("~SP00000001000000020102body").unwrap();
        assert_eq!((ok.part_number, ok.total_parts), (1, 2));
        assert_eq!(ok.body, "body");
    }

    #[test]
    fn oversized_parts_are_not_encoded() {
        let mut binary =
            BinarySmsTransmission::outgoing(SmsAgent::new("+15550100"), &payload(4000), 2000, None)
                .unwrap();
        binary.meta.assign_local_id(1).unwrap();
        assert_eq!(
            binary.encode_parts(),
            Err(TransmissionError::UnitTooLarge {
                size: 263,
                max: BINARY_SMS_MAX_BYTES,
                unit: "bytes",
            })
        );

        let mut text =
            TextSmsTransmission::outgoing(SmsAgent::new("+15550100"), &"x".repeat(1000), 500, None)
                .unwrap();
        text.meta.assign_local_id(1).unwrap();
        assert!(matches!(
            text.encode_parts(),
            Err(TransmissionError::UnitTooLarge { size: 523, .. })
        ));

        let full = Message::new(1, 1, payload(BINARY_BODY_CAPACITY_BITS));
        assert_eq!(encode_binary(1, 2, &full).unwrap().len(), BINARY_SMS_MAX_BYTES);
        let full = Message::new(1, 1, "é".repeat(TEXT_BODY_CAPACITY_CHARS));
        assert_eq!(encode_text(1, 2, &full).unwrap().chars().count(), TEXT_SMS_MAX_CHARS);
        let over = Message::new(1, 1, "é".repeat(TEXT_BODY_CAPACITY_CHARS + 1));
        assert!(encode_text(1, 2, &over).is_err());
    }

    #[test]
    fn part_numbers_beyond_one_byte_are_not_encoded() {
        let message = Message::new(300, 300, payload(8));
        assert_eq!(
            encode_binary(7, 1, &message),
            Err(TransmissionError::TooManyParts {
                needed: 300,
                max: MAX_PARTS,
            })
        );
        let message = Message::new(256, 256, "body".to_string());
        assert!(matches!(
            encode_text(7, 1, &message),
            Err(TransmissionError::TooManyParts { needed: 256, .. })
        ));
        let message = Message::new(3, 2, "body".to_string());
        assert_eq!(
            encode_text(7, 1, &message),
            Err(TransmissionError::PartOutOfRange { part: 3, total: 2 })
        );

        let last = Message::new(MAX_PARTS, MAX_PARTS, payload(1));
        let inbound = decode_binary(&encode_binary(7, 1, &last).unwrap()).unwrap();
        assert_eq!((inbound.part_number, inbound.total_parts), (255, 255));
    }
}
