use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};

bitflags! {
    /// Protocol-Support capability bitmap, MSB-first within a 24-bit field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtocolSupport: u32 {
        const SIMPLE_PROTOCOL_SUBSET = 1 << 23;
        const DATAGRAM_PROTOCOL = 1 << 22;
        const STREAM_PROTOCOL = 1 << 21;
        const MEMORY_CONFIGURATION_PROTOCOL = 1 << 20;
        const RESERVATION_PROTOCOL = 1 << 19;
        const EVENT_EXCHANGE_PROTOCOL = 1 << 18;
        const IDENTIFICATION_PROTOCOL = 1 << 17;
        const TEACHING_LEARNING_CONFIGURATION_PROTOCOL = 1 << 16;
        const REMOTE_BUTTON_PROTOCOL = 1 << 15;
        const ABBREVIATED_DEFAULT_CDI_PROTOCOL = 1 << 14;
        const DISPLAY_PROTOCOL = 1 << 13;
        const SIMPLE_NODE_INFORMATION_PROTOCOL = 1 << 12;
        const CONFIGURATION_DESCRIPTION_INFORMATION = 1 << 11;
        const TRACTION_CONTROL_PROTOCOL = 1 << 10;
        const FUNCTION_DESCRIPTION_INFORMATION = 1 << 9;
        const DCC_COMMAND_STATION_PROTOCOL = 1 << 8;
        const SIMPLE_TRAIN_NODE_INFORMATION_PROTOCOL = 1 << 7;
        const FUNCTION_CONFIGURATION = 1 << 6;
        const FIRMWARE_UPGRADE_PROTOCOL = 1 << 5;
        const FIRMWARE_UPGRADE_ACTIVE = 1 << 4;
        // bits 3..0 reserved
    }
}

impl ProtocolSupport {
    /// Parse the 24-bit big-endian bitmap plus optional trailing bytes.
    /// Trailing bytes are currently discarded (opaque remainder).
    pub fn parse(payload: &[u8]) -> Option<Self> {
        if payload.len() < 3 {
            return None;
        }
        let raw = (payload[0] as u32) << 16 | (payload[1] as u32) << 8 | payload[2] as u32;
        Some(Self::from_bits_truncate(raw))
    }

    /// Emit the 24-bit big-endian bitmap (3 bytes, no trailing bytes).
    pub fn build(&self) -> [u8; 3] {
        let raw = self.bits();
        let mut out = [0u8; 3];
        BigEndian::write_u24(&mut out, raw);
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let support = ProtocolSupport::DATAGRAM_PROTOCOL
            | ProtocolSupport::MEMORY_CONFIGURATION_PROTOCOL
            | ProtocolSupport::SIMPLE_NODE_INFORMATION_PROTOCOL;
        let built = support.build();
        let parsed = ProtocolSupport::parse(&built).unwrap();
        assert_eq!(parsed, support);
    }

    #[test]
    fn test_roundtrip_low_bits() {
        let support = ProtocolSupport::FIRMWARE_UPGRADE_PROTOCOL | ProtocolSupport::FIRMWARE_UPGRADE_ACTIVE;
        let built = support.build();
        let parsed = ProtocolSupport::parse(&built).unwrap();
        assert_eq!(parsed, support);
    }

    #[test]
    fn test_build_is_msb_first_unshifted() {
        let built = ProtocolSupport::SIMPLE_PROTOCOL_SUBSET.build();
        assert_eq!(built, [0x80, 0x00, 0x00]);
    }
}
