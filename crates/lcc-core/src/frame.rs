//! Raw read/write wrapper around the 4-byte arbitration ID + 0-8 payload
//! byte buffer that every LCC-over-CAN frame is built from. This layer
//! knows nothing about MTIs, CAN-control frames or datagrams; it only
//! exposes the top-level discrimination bits described in the link
//! specification.
//!
//! Bit layout of the 29-bit arbitration ID (MSB first): bit 28 is a fixed
//! "1" marker; bit 27 discriminates CAN-control (0) from OpenLCB message
//! (1); for OpenLCB messages bits 26..24 carry a 3-bit frame type and bits
//! 23..12 the variable field; for CAN-control frames bit 26 is
//! is-check-id-frame, bits 25..24 the 2-bit sequence number and bits 23..12
//! the CC variable field. Bits 11..0 are the source alias in every case.

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};

mod field {
    pub type Field = core::ops::Range<usize>;
    pub type Rest = core::ops::RangeFrom<usize>;

    // 4 octets of 29-bit extended CAN arbitration ID, big-endian.
    pub const ID: Field = 0..4;
    pub const PAYLOAD: Rest = 4..;
}

/// Length of the arbitration-ID header, in octets.
pub const HEADER_LEN: usize = field::PAYLOAD.start;

/// Maximum CAN payload length.
pub const MAX_PAYLOAD_LEN: usize = 8;

const FIXED_TOP_BIT: u32 = 1 << 28;

/// A read/write wrapper around an LCC CAN frame buffer.
///
/// The buffer is not a 1:1 CAN wire representation; it's 4 octets of
/// big-endian 29-bit arbitration ID followed by 0-8 octets of payload, the
/// same shape the transport layer hands to and receives from the codec.
#[derive(Debug, Clone)]
pub struct Frame<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Frame<T> {
    /// Construct a raw frame without checking anything.
    pub const fn new_unchecked(buffer: T) -> Frame<T> {
        Frame { buffer }
    }

    /// Shorthand for [`Frame::new_unchecked`] followed by [`Frame::check_len`].
    pub fn new_checked(buffer: T) -> Result<Frame<T>> {
        let frame = Self::new_unchecked(buffer);
        frame.check_len()?;
        Ok(frame)
    }

    /// Ensure no accessor will panic when called.
    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN || len - HEADER_LEN > MAX_PAYLOAD_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    /// Consume the frame, returning the underlying buffer.
    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub const fn header_len() -> usize {
        HEADER_LEN
    }

    pub const fn buffer_len(payload_len: usize) -> usize {
        HEADER_LEN + payload_len
    }

    /// The full 29-bit arbitration ID.
    #[inline]
    pub fn id(&self) -> u32 {
        BigEndian::read_u32(&self.buffer.as_ref()[field::ID]) & 0x1FFF_FFFF
    }

    /// `true` if this is an OpenLCB message frame, `false` if it's a
    /// CAN-control frame.
    #[inline]
    pub fn is_openlcb_message(&self) -> bool {
        (self.id() >> 27) & 0x1 != 0
    }

    /// For OpenLCB messages, the 3-bit frame type.
    #[inline]
    pub fn frame_type(&self) -> u8 {
        ((self.id() >> 24) & 0x7) as u8
    }

    /// For OpenLCB messages, the 12-bit variable field (the MTI for
    /// `frame_type == 1`, the destination alias for datagram frame types).
    #[inline]
    pub fn variable_field(&self) -> u16 {
        ((self.id() >> 12) & 0xFFF) as u16
    }

    /// For CAN-control frames, whether this is a check-ID (CID) frame.
    #[inline]
    pub fn is_check_id_frame(&self) -> bool {
        (self.id() >> 26) & 0x1 != 0
    }

    /// For CAN-control frames, the 2-bit sequence number.
    #[inline]
    pub fn frame_sequence_number(&self) -> u8 {
        ((self.id() >> 24) & 0x3) as u8
    }

    /// For CAN-control frames, the 12-bit CC variable field.
    #[inline]
    pub fn cc_variable_field(&self) -> u16 {
        ((self.id() >> 12) & 0xFFF) as u16
    }

    /// Bits 11..0: the source alias, present on every frame kind.
    #[inline]
    pub fn source_alias(&self) -> u16 {
        (self.id() & 0xFFF) as u16
    }
}

impl<'a, T: AsRef<[u8]> + ?Sized> Frame<&'a T> {
    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer.as_ref()[field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Frame<T> {
    #[inline]
    pub fn set_id(&mut self, id: u32) {
        let data = self.buffer.as_mut();
        BigEndian::write_u32(&mut data[field::ID], id & 0x1FFF_FFFF);
    }

    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        let data = self.buffer.as_mut();
        &mut data[field::PAYLOAD]
    }
}

impl<T: AsRef<[u8]>> AsRef<[u8]> for Frame<T> {
    fn as_ref(&self) -> &[u8] {
        self.buffer.as_ref()
    }
}

/// Build the 29-bit arbitration ID for an OpenLCB message frame.
pub const fn openlcb_id(frame_type: u8, variable_field: u16, source_alias: u16) -> u32 {
    FIXED_TOP_BIT
        | (1 << 27)
        | ((frame_type as u32 & 0x7) << 24)
        | ((variable_field as u32 & 0xFFF) << 12)
        | (source_alias as u32 & 0xFFF)
}

/// Build the 29-bit arbitration ID for a CAN-control frame.
pub const fn cc_id(
    is_check_id_frame: bool,
    sequence_number: u8,
    cc_variable_field: u16,
    source_alias: u16,
) -> u32 {
    FIXED_TOP_BIT
        | ((is_check_id_frame as u32) << 26)
        | ((sequence_number as u32 & 0x3) << 24)
        | ((cc_variable_field as u32 & 0xFFF) << 12)
        | (source_alias as u32 & 0xFFF)
}

/// A single CAN-bus record as exchanged with the transport layer: a raw
/// arbitration ID, the extended/remote flags, and up to 8 payload bytes.
/// Every frame this codec produces or accepts is extended, non-remote;
/// the two flags exist because the transport's wire format carries them
/// regardless, and an unexpected value on receive is a transport-level
/// framing problem worth surfacing rather than silently coercing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub is_extended: bool,
    pub is_remote: bool,
    pub data: ArrayVec<u8, MAX_PAYLOAD_LEN>,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut buf = ArrayVec::new();
        let _ = buf.try_extend_from_slice(data);
        Self {
            id,
            is_extended: true,
            is_remote: false,
            data: buf,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_producer_consumer_report_header() {
        // S1: ID 0x195B4ABC, frame_type=1 (MTI), variable_field=0x5B4, source_alias=0xABC
        let buf = [0x19, 0x5B, 0x4A, 0xBC];
        let frame = Frame::new_checked(&buf[..]).unwrap();
        assert!(frame.is_openlcb_message());
        assert_eq!(frame.frame_type(), 1);
        assert_eq!(frame.variable_field(), 0x5B4);
        assert_eq!(frame.source_alias(), 0xABC);
    }

    #[test]
    fn test_amd_header() {
        // S2: ID 0x10701ABC, CAN-control, cc_variable_field=0x701, source_alias=0xABC
        let buf = [0x10, 0x70, 0x1A, 0xBC];
        let frame = Frame::new_checked(&buf[..]).unwrap();
        assert!(!frame.is_openlcb_message());
        assert!(!frame.is_check_id_frame());
        assert_eq!(frame.cc_variable_field(), 0x701);
        assert_eq!(frame.source_alias(), 0xABC);
    }

    #[test]
    fn test_datagram_header() {
        // S4: ID 0x1A555777, frame_type=2, destination_alias=0x555, source_alias=0x777
        let buf = [0x1A, 0x55, 0x57, 0x77];
        let frame = Frame::new_checked(&buf[..]).unwrap();
        assert!(frame.is_openlcb_message());
        assert_eq!(frame.frame_type(), 2);
        assert_eq!(frame.variable_field(), 0x555);
        assert_eq!(frame.source_alias(), 0x777);
    }

    #[test]
    fn test_openlcb_id_builder_matches_scenarios() {
        assert_eq!(openlcb_id(1, 0x5B4, 0xABC), 0x195B4ABC);
        assert_eq!(openlcb_id(2, 0x555, 0x777), 0x1A555777);
    }

    #[test]
    fn test_cc_id_builder_matches_scenario() {
        assert_eq!(cc_id(false, 0, 0x701, 0xABC), 0x10701ABC);
    }

    #[test]
    fn test_check_len_rejects_oversized_payload() {
        let buf = [0u8; 13];
        assert!(Frame::new_checked(&buf[..]).is_err());
    }
}
