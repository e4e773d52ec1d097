use serde::{Deserialize, Serialize};

use crate::types::PayloadType;

use super::{TransmissionMeta, payload_hash};

/// Transmission carried by one HTTP request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpTransmission {
    /// Shared attributes.
    pub meta: TransmissionMeta,
    /// Server the body is posted to.
    pub server_url: String,
    /// Literal request body.
    pub body: Vec<u8>,
}

impl HttpTransmission {
    /// Creates an outgoing transmission, hashing `body`.
    pub fn new(
        server_url: impl Into<String>,
        body: Vec<u8>,
        payload_type: Option<PayloadType>,
    ) -> Self {
        let mut meta = TransmissionMeta::new(payload_hash(&body));
        meta.payload_type = payload_type;
        Self::from_parts(meta, server_url, body)
    }

    /// Assembles a transmission from already known metadata.
    pub fn from_parts(
        meta: TransmissionMeta,
        server_url: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            meta,
            server_url: server_url.into(),
            body,
        }
    }

    /// Body length in bits.
    pub fn body_bit_length(&self) -> usize {
        self.body.len() * 8
    }
}
