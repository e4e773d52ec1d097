//! Runtime event stream payloads.

use crate::types::{LocalId, PartNumber, TransmissionType};

/// Events emitted by the single-writer service after each committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmissionEvent {
    /// A transmission and its parts were written.
    Stored {
        /// Stored transmission id.
        local_id: LocalId,
        /// Transport kind.
        kind: TransmissionType,
    },
    /// A transmission and its parts were removed.
    Deleted {
        /// Former transmission id.
        local_id: LocalId,
    },
    /// An inbound part was stored and more are outstanding.
    PartReceived {
        /// Transmission being reassembled.
        local_id: LocalId,
        /// Parts received so far.
        received: usize,
        /// Parts expected.
        total: PartNumber,
    },
    /// The last inbound part arrived and the payload verified.
    Completed {
        /// Reassembled transmission id.
        local_id: LocalId,
    },
}
