//! Admission of inbound SMS parts into stored transmissions.
//!
//! Every admitted part is persisted right away, so reassembly survives a
//! restart between parts. A transmission whose reassembled payload fails
//! its hash check is deleted with all of its parts.

use tracing::{debug, info, warn};

use crate::{
    persist::RecordStore,
    transmission::{
        SmsTransmission, Transmission, TransmissionError,
        wire::{self, DecodeError, InboundPart},
    },
    types::{LocalId, PartNumber, SmsAgent, TimestampMs},
};

use super::store::{StoreResult, TransmissionStore};

/// What happened to one inbound unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// The unit does not belong to this protocol.
    Ignored,
    /// The part had been received before; nothing changed.
    Duplicate {
        /// Stored transmission the part belongs to.
        local_id: LocalId,
    },
    /// The part was stored; more are outstanding.
    Pending {
        /// Stored transmission the part belongs to.
        local_id: LocalId,
        /// Parts received so far.
        received: usize,
        /// Parts expected.
        total: PartNumber,
    },
    /// The last outstanding part arrived and the payload hash checked out.
    Complete(Transmission),
}

impl<S: RecordStore> TransmissionStore<S> {
    /// Admits one binary SMS unit received from `sender`.
    pub fn receive_binary_sms(
        &mut self,
        sender: &SmsAgent,
        data: &[u8],
        received_at: TimestampMs,
    ) -> StoreResult<ReceiveOutcome> {
        let part = match wire::decode_binary(data) {
            Ok(part) => part,
            Err(DecodeError::NotRelevant) => {
                debug!(%sender, len = data.len(), "ignoring binary sms without signature");
                return Ok(ReceiveOutcome::Ignored);
            }
            Err(err) => return Err(err.into()),
        };
        let existing = self.retrieve_binary_sms_transmission(
            sender,
            false,
            part.remote_id,
            part.payload_hash,
        )?;
        self.admit(sender, part, existing, received_at, |t| t.reassemble().map(drop))
    }

    /// Admits one text SMS received from `sender`.
    pub fn receive_text_sms(
        &mut self,
        sender: &SmsAgent,
        text: &str,
        received_at: TimestampMs,
    ) -> StoreResult<ReceiveOutcome> {
        let part = match wire::decode_text(text) {
            Ok(part) => part,
            Err(DecodeError::NotRelevant) => {
                debug!(%sender, "ignoring text sms without signature");
                return Ok(ReceiveOutcome::Ignored);
            }
            Err(err) => return Err(err.into()),
        };
        let existing =
            self.retrieve_text_sms_transmission(sender, false, part.remote_id, part.payload_hash)?;
        self.admit(sender, part, existing, received_at, |t| t.reassemble().map(drop))
    }

    fn admit<B>(
        &mut self,
        sender: &SmsAgent,
        part: InboundPart<B>,
        existing: Option<SmsTransmission<B>>,
        received_at: TimestampMs,
        verify: impl FnOnce(&SmsTransmission<B>) -> Result<(), TransmissionError>,
    ) -> StoreResult<ReceiveOutcome>
    where
        SmsTransmission<B>: Into<Transmission>,
    {
        let mut transmission = existing.unwrap_or_else(|| {
            SmsTransmission::incoming(part.meta(), sender.clone(), part.total_parts)
        });
        let part_number = part.part_number;
        let added = transmission.receive_part(part.into_message(received_at))?;
        if !added {
            if let Some(local_id) = transmission.meta.local_id() {
                debug!(local_id, part_number, "duplicate part");
                return Ok(ReceiveOutcome::Duplicate { local_id });
            }
        }

        let complete = transmission.is_complete();
        if complete {
            if let Err(err) = verify(&transmission) {
                warn!(
                    remote_id = ?transmission.meta.remote_id,
                    local_id = ?transmission.meta.local_id(),
                    error = %err,
                    "reassembled payload rejected, discarding stored parts"
                );
                // A corrupt part may already be stored; drop them all so a
                // resend reassembles from scratch.
                if let Some(local_id) = transmission.meta.local_id() {
                    self.try_delete(local_id)?;
                }
                return Err(err.into());
            }
            transmission.meta.received_at = Some(received_at);
        }

        let received = transmission.received_parts();
        let total = transmission.total_parts();
        let mut transmission: Transmission = transmission.into();
        let local_id = self.store_transmission(&mut transmission)?;

        if complete {
            info!(local_id, total, "transmission complete");
            Ok(ReceiveOutcome::Complete(transmission))
        } else {
            debug!(local_id, part_number, received, total, "part stored");
            Ok(ReceiveOutcome::Pending {
                local_id,
                received,
                total,
            })
        }
    }
}
