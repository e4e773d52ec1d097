//! Transmission and message domain model.
//!
//! A [`Transmission`] is one logical payload exchanged with one correspondent.
//! SMS transports split the payload over several [`Message`]s; HTTP always
//! carries it in a single body.

/// HTTP transmissions.
pub mod http;
/// Transport-level parts.
pub mod message;
/// Segmented SMS transmissions.
pub mod sms;
/// On-the-wire encoding of SMS parts.
pub mod wire;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    bits::BitArray,
    types::{LocalId, PartNumber, PayloadHash, PayloadType, RemoteId, TimestampMs, TransmissionType},
};

pub use http::HttpTransmission;
pub use message::{BinaryMessage, Message, TextMessage};
pub use sms::{BinarySmsTransmission, SmsTransmission, TextSmsTransmission};

/// Largest part count a transmission may be split into.
pub const MAX_PARTS: PartNumber = 255;

/// Domain-level failures while segmenting, receiving or reassembling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransmissionError {
    /// A unit capacity of zero cannot carry any payload.
    #[error("invalid unit capacity {0}")]
    InvalidCapacity(usize),
    /// The payload needs more parts than the wire header can number.
    #[error("payload needs {needed} parts, at most {max} allowed")]
    TooManyParts {
        /// Parts the payload would need.
        needed: usize,
        /// Maximum allowed parts.
        max: PartNumber,
    },
    /// An encoded part would not fit in a single SMS.
    #[error("encoded part needs {size} {unit}, at most {max} fit")]
    UnitTooLarge {
        /// Size the part would take.
        size: usize,
        /// Limit of one SMS.
        max: usize,
        /// `"bytes"` or `"characters"`.
        unit: &'static str,
    },
    /// Part number outside `[1, total]`.
    #[error("part {part} outside 1..={total}")]
    PartOutOfRange {
        /// Offending part number.
        part: PartNumber,
        /// Total parts of the transmission.
        total: PartNumber,
    },
    /// A part disagrees with the transmission about the total part count.
    #[error("part declares {found} total parts, transmission has {expected}")]
    TotalPartsMismatch {
        /// Part count fixed on the transmission.
        expected: PartNumber,
        /// Part count carried by the part.
        found: PartNumber,
    },
    /// Reassembly attempted before every part arrived.
    #[error("transmission incomplete, missing parts {missing:?}")]
    Incomplete {
        /// Missing part numbers, ascending.
        missing: Vec<PartNumber>,
    },
    /// Reassembled payload does not match the announced hash.
    #[error("payload hash mismatch: expected {expected:#010x}, got {actual:#010x}")]
    PayloadHashMismatch {
        /// Hash carried by the transmission.
        expected: PayloadHash,
        /// Hash of the reassembled payload.
        actual: PayloadHash,
    },
    /// Wire encoding needs the store-assigned local ID.
    #[error("transmission has no local ID yet")]
    LocalIdUnset,
    /// A local ID was assigned twice with different values.
    #[error("non-matching transmission ID: have {current}, got {assigned}")]
    LocalIdMismatch {
        /// ID already on the transmission.
        current: LocalId,
        /// Conflicting ID.
        assigned: LocalId,
    },
}

/// Attributes shared by every transport kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransmissionMeta {
    local_id: Option<LocalId>,
    payload_hash: PayloadHash,
    /// Correspondent's identifier for this transmission.
    pub remote_id: Option<RemoteId>,
    /// Codec that produced the payload, once known.
    pub payload_type: Option<PayloadType>,
    /// When the transmission was fully sent.
    pub sent_at: Option<TimestampMs>,
    /// When the transmission was fully received.
    pub received_at: Option<TimestampMs>,
}

impl TransmissionMeta {
    /// Creates metadata for a payload with the given hash.
    pub fn new(payload_hash: PayloadHash) -> Self {
        Self {
            local_id: None,
            payload_hash,
            remote_id: None,
            payload_type: None,
            sent_at: None,
            received_at: None,
        }
    }

    /// Sets the remote ID.
    pub fn with_remote_id(mut self, remote_id: RemoteId) -> Self {
        self.remote_id = Some(remote_id);
        self
    }

    /// Sets the payload type.
    pub fn with_payload_type(mut self, payload_type: PayloadType) -> Self {
        self.payload_type = Some(payload_type);
        self
    }

    pub(crate) fn restored(
        local_id: LocalId,
        remote_id: Option<RemoteId>,
        payload_hash: PayloadHash,
        payload_type: Option<PayloadType>,
        sent_at: Option<TimestampMs>,
        received_at: Option<TimestampMs>,
    ) -> Self {
        Self {
            local_id: Some(local_id),
            payload_hash,
            remote_id,
            payload_type,
            sent_at,
            received_at,
        }
    }

    /// Store-assigned ID, if the transmission was ever stored.
    pub fn local_id(&self) -> Option<LocalId> {
        self.local_id
    }

    /// Hash of the full payload.
    pub fn payload_hash(&self) -> PayloadHash {
        self.payload_hash
    }

    /// Records the store-assigned ID. Reassigning a different ID fails.
    pub(crate) fn assign_local_id(&mut self, id: LocalId) -> Result<(), TransmissionError> {
        match self.local_id {
            Some(current) if current != id => Err(TransmissionError::LocalIdMismatch {
                current,
                assigned: id,
            }),
            _ => {
                self.local_id = Some(id);
                Ok(())
            }
        }
    }
}

/// A logical transmission over one of the supported transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmission {
    /// Bit-packed payload over binary SMS.
    BinarySms(BinarySmsTransmission),
    /// Character payload over text SMS.
    TextSms(TextSmsTransmission),
    /// Single-body payload over HTTP.
    Http(HttpTransmission),
}

impl Transmission {
    /// Transport kind.
    pub fn kind(&self) -> TransmissionType {
        match self {
            Self::BinarySms(_) => TransmissionType::BinarySms,
            Self::TextSms(_) => TransmissionType::TextualSms,
            Self::Http(_) => TransmissionType::Http,
        }
    }

    /// Shared attributes.
    pub fn meta(&self) -> &TransmissionMeta {
        match self {
            Self::BinarySms(t) => &t.meta,
            Self::TextSms(t) => &t.meta,
            Self::Http(t) => &t.meta,
        }
    }

    /// Mutable shared attributes.
    pub fn meta_mut(&mut self) -> &mut TransmissionMeta {
        match self {
            Self::BinarySms(t) => &mut t.meta,
            Self::TextSms(t) => &mut t.meta,
            Self::Http(t) => &mut t.meta,
        }
    }

    /// Store-assigned ID, if any.
    pub fn local_id(&self) -> Option<LocalId> {
        self.meta().local_id()
    }

    /// Hash of the full payload.
    pub fn payload_hash(&self) -> PayloadHash {
        self.meta().payload_hash()
    }

    /// Number of transport units.
    pub fn total_parts(&self) -> PartNumber {
        match self {
            Self::BinarySms(t) => t.total_parts(),
            Self::TextSms(t) => t.total_parts(),
            Self::Http(_) => 1,
        }
    }

    /// Returns true once every part is present.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::BinarySms(t) => t.is_complete(),
            Self::TextSms(t) => t.is_complete(),
            Self::Http(_) => true,
        }
    }
}

impl From<BinarySmsTransmission> for Transmission {
    fn from(value: BinarySmsTransmission) -> Self {
        Self::BinarySms(value)
    }
}

impl From<TextSmsTransmission> for Transmission {
    fn from(value: TextSmsTransmission) -> Self {
        Self::TextSms(value)
    }
}

impl From<HttpTransmission> for Transmission {
    fn from(value: HttpTransmission) -> Self {
        Self::Http(value)
    }
}

/// Hash of a byte payload: the first four bytes of its SHA-256 digest.
pub fn payload_hash(bytes: &[u8]) -> PayloadHash {
    digest_prefix(Sha256::new().chain_update(bytes))
}

/// Hash of a bit payload. The bit length is hashed first so that payloads
/// differing only in trailing zero bits hash differently.
pub fn bits_payload_hash(bits: &BitArray) -> PayloadHash {
    digest_prefix(
        Sha256::new()
            .chain_update((bits.len() as u32).to_be_bytes())
            .chain_update(bits.as_bytes()),
    )
}

fn digest_prefix(hasher: Sha256) -> PayloadHash {
    let digest = hasher.finalize();
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Part count for `units` segments, rejecting payloads the wire cannot number.
pub(crate) fn checked_part_count(units: usize) -> Result<PartNumber, TransmissionError> {
    let units = units.max(1);
    if units > MAX_PARTS as usize {
        return Err(TransmissionError::TooManyParts {
            needed: units,
            max: MAX_PARTS,
        });
    }
    Ok(units as PartNumber)
}
