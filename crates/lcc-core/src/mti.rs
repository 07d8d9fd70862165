//! MTI (Message Type Identifier) constants for OpenLCB messages.
//!
//! These are the raw 12-bit codes carried in the `variable_field` of an
//! OpenLCB message frame with `frame_type == 1`. Listed here once so every
//! other module (parser, builder, tests) refers to a single source.

pub const INITIALIZATION_COMPLETE: u16 = 0x100;
pub const INITIALIZATION_COMPLETE_SIMPLE: u16 = 0x101;
pub const VERIFY_NODE_ID_ADDRESSED: u16 = 0x488;
pub const VERIFY_NODE_ID_GLOBAL: u16 = 0x490;
pub const VERIFIED_NODE_ID: u16 = 0x170;
pub const VERIFIED_NODE_ID_SIMPLE: u16 = 0x171;
pub const OPTIONAL_INTERACTION_REJECTED: u16 = 0x068;
pub const TERMINATE_DUE_TO_ERROR: u16 = 0x0A8;
pub const PROTOCOL_SUPPORT_INQUIRY: u16 = 0x828;
pub const PROTOCOL_SUPPORT_REPLY: u16 = 0x668;
pub const PRODUCER_CONSUMER_EVENT_REPORT: u16 = 0x5B4;
pub const IDENTIFY_CONSUMER: u16 = 0x8F4;
pub const CONSUMER_IDENTIFIED_VALID: u16 = 0x4C4;
pub const CONSUMER_IDENTIFIED_INVALID: u16 = 0x4C5;
pub const CONSUMER_IDENTIFIED_UNKNOWN: u16 = 0x4C7;
pub const CONSUMER_RANGE_IDENTIFIED: u16 = 0x4A4;
pub const IDENTIFY_PRODUCER: u16 = 0x914;
pub const PRODUCER_IDENTIFIED_VALID: u16 = 0x544;
pub const PRODUCER_IDENTIFIED_INVALID: u16 = 0x545;
pub const PRODUCER_IDENTIFIED_UNKNOWN: u16 = 0x547;
pub const PRODUCER_RANGE_IDENTIFIED: u16 = 0x524;
pub const IDENTIFY_EVENTS_ADDRESSED: u16 = 0x968;
pub const IDENTIFY_EVENTS_GLOBAL: u16 = 0x970;
pub const LEARN_EVENT: u16 = 0x594;
pub const SIMPLE_NODE_IDENT_INFO_REQUEST: u16 = 0xDE8;
pub const SIMPLE_NODE_IDENT_INFO_REPLY: u16 = 0xA08;
pub const DATAGRAM_RECEIVED_OK: u16 = 0xA28;
pub const DATAGRAM_REJECTED: u16 = 0xA48;

/// Identified status carried in the low two bits of some MTI codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifiedStatus {
    Valid,
    Invalid,
    Unknown,
}

impl IdentifiedStatus {
    pub const fn from_low_bits(mti: u16) -> Self {
        match mti & 0b11 {
            0b00 => IdentifiedStatus::Valid,
            0b01 => IdentifiedStatus::Invalid,
            _ => IdentifiedStatus::Unknown,
        }
    }
}

/// If bit 3 of an MTI is set, the message is addressed: the first two
/// payload bytes carry a multipart flag and destination alias ahead of the
/// body.
pub const fn is_addressed(mti: u16) -> bool {
    mti & 0b1000 != 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addressed_bit() {
        assert!(is_addressed(SIMPLE_NODE_IDENT_INFO_REQUEST));
        assert!(!is_addressed(PRODUCER_CONSUMER_EVENT_REPORT));
    }

    #[test]
    fn test_identified_status() {
        assert_eq!(
            IdentifiedStatus::from_low_bits(CONSUMER_IDENTIFIED_VALID),
            IdentifiedStatus::Valid
        );
        assert_eq!(
            IdentifiedStatus::from_low_bits(CONSUMER_IDENTIFIED_INVALID),
            IdentifiedStatus::Invalid
        );
        assert_eq!(
            IdentifiedStatus::from_low_bits(CONSUMER_IDENTIFIED_UNKNOWN),
            IdentifiedStatus::Unknown
        );
    }
}
