//! Shared primitive IDs, transport kinds and correspondent identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Store-assigned transmission identifier.
pub type LocalId = u32;
/// Identifier the correspondent uses for the same transmission.
pub type RemoteId = u32;
/// Checksum of the reassembled payload.
pub type PayloadHash = u32;
/// Identifies the codec that produced a payload.
pub type PayloadType = u8;
/// 1-based part sequence number.
pub type PartNumber = u32;
/// Milliseconds since the Unix epoch.
pub type TimestampMs = u64;

/// Maximum length, in characters, of a stored correspondent identifier.
pub const CORRESPONDENT_MAX_LENGTH: usize = 128;

/// Transport kind of a transmission.
///
/// The discriminants are persisted as the `Type` column and must never be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransmissionType {
    /// Bit-packed payload over binary (data) SMS.
    BinarySms = 0,
    /// Character payload over ordinary text SMS.
    TextualSms = 1,
    /// Single-body payload over HTTP.
    Http = 2,
}

impl TransmissionType {
    /// Persisted ordinal of this kind.
    pub fn ordinal(self) -> i64 {
        self as i64
    }

    /// Maps a persisted ordinal back to a kind.
    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        match ordinal {
            0 => Some(Self::BinarySms),
            1 => Some(Self::TextualSms),
            2 => Some(Self::Http),
            _ => None,
        }
    }
}

/// SMS correspondent, identified by a normalized phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SmsAgent {
    phone_number: String,
}

impl SmsAgent {
    /// Creates an agent, stripping formatting characters from `phone_number`.
    pub fn new(phone_number: impl AsRef<str>) -> Self {
        let phone_number = phone_number
            .as_ref()
            .chars()
            .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '.' | '(' | ')'))
            .collect();
        Self { phone_number }
    }

    /// Parses a stored correspondent string. Empty input yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        let agent = Self::new(value);
        (!agent.phone_number.is_empty()).then_some(agent)
    }

    /// Normalized phone number.
    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }
}

impl fmt::Display for SmsAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.phone_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_ordinals_are_stable() {
        assert_eq!(TransmissionType::BinarySms.ordinal(), 0);
        assert_eq!(TransmissionType::TextualSms.ordinal(), 1);
        assert_eq!(TransmissionType::Http.ordinal(), 2);
        for kind in [
            TransmissionType::BinarySms,
            TransmissionType::TextualSms,
            TransmissionType::Http,
        ] {
            assert_eq!(TransmissionType::from_ordinal(kind.ordinal()), Some(kind));
        }
        assert_eq!(TransmissionType::from_ordinal(3), None);
    }

    #[test]
    fn agent_normalizes_formatting() {
        let agent = SmsAgent::new("+44 (0)20-7679.1234");
        assert_eq!(agent.phone_number(), "+4402076791234");
        assert_eq!(SmsAgent::parse("  "), None);
        assert_eq!(SmsAgent::parse("+32 470"), Some(SmsAgent::new("+32470")));
    }
}
