//! Memory-configuration sub-protocol, carried inside datagram protocol
//! type `0x20`.

use byteorder::{BigEndian, ByteOrder};

pub const WRITE: u8 = 0x00;
pub const WRITE_REPLY: u8 = 0x10;
pub const WRITE_REPLY_FAILURE: u8 = 0x18;
pub const READ: u8 = 0x40;
pub const READ_REPLY: u8 = 0x50;
pub const READ_REPLY_FAILURE: u8 = 0x58;
pub const GET_OPTIONS: u8 = 0x80;
pub const GET_OPTIONS_REPLY: u8 = 0x82;
pub const GET_ADDRESS_SPACE_INFO: u8 = 0x84;
pub const GET_ADDRESS_SPACE_INFO_REPLY_ABSENT: u8 = 0x86;
pub const GET_ADDRESS_SPACE_INFO_REPLY_PRESENT: u8 = 0x87;
pub const LOCK: u8 = 0x88;
pub const LOCK_REPLY: u8 = 0x8A;
pub const GET_UNIQUE_ID: u8 = 0x8C;
pub const GET_UNIQUE_ID_REPLY: u8 = 0x8D;

pub const IMPLICIT_SPACE_BASE: u8 = 0xFC;

/// Resolve the `command` byte + optional explicit address-space byte for a
/// memory-configuration read/write addressed to `space`.
///
/// Spaces `0xFD`/`0xFE`/`0xFF` are encoded implicitly in the low two bits
/// of `command`; any other space is encoded as `base | 0b00` with an
/// explicit space byte following the address.
pub fn resolve_command(base: u8, space: u8) -> (u8, Option<u8>) {
    if space >= IMPLICIT_SPACE_BASE && space != 0 {
        (base | (space - IMPLICIT_SPACE_BASE), None)
    } else {
        (base, Some(space))
    }
}

/// Recover the address space from a command byte and, if present, the
/// explicit space byte that followed the starting address.
pub fn address_space_of(command: u8, explicit: Option<u8>) -> Option<u8> {
    if command & 0b11 == 0 {
        explicit
    } else {
        Some(IMPLICIT_SPACE_BASE + (command & 0b11))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub starting_address: u32,
    pub address_space: u8,
    pub read_count: u8,
}

impl ReadRequest {
    pub fn parse(command: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let starting_address = BigEndian::read_u32(&body[0..4]);
        let (address_space, rest) = if command & 0b11 == 0 {
            let space = *body.get(4)?;
            (space, &body[5..])
        } else {
            (IMPLICIT_SPACE_BASE + (command & 0b11), &body[4..])
        };
        let read_count = *rest.first()?;
        Some(Self {
            starting_address,
            address_space,
            read_count,
        })
    }

    pub fn build(&self, base_command: u8) -> (u8, Vec<u8>) {
        let (command, explicit_space) = resolve_command(base_command, self.address_space);
        let mut out = Vec::with_capacity(6);
        let mut addr = [0u8; 4];
        BigEndian::write_u32(&mut addr, self.starting_address);
        out.extend_from_slice(&addr);
        if let Some(space) = explicit_space {
            out.push(space);
        }
        out.push(self.read_count);
        (command, out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReply {
    pub starting_address: u32,
    pub address_space: u8,
    pub data: Vec<u8>,
}

impl ReadReply {
    pub fn parse(command: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let starting_address = BigEndian::read_u32(&body[0..4]);
        let (address_space, data) = if command & 0b11 == 0 {
            let space = *body.get(4)?;
            (space, body[5..].to_vec())
        } else {
            (IMPLICIT_SPACE_BASE + (command & 0b11), body[4..].to_vec())
        };
        Some(Self {
            starting_address,
            address_space,
            data,
        })
    }

    pub fn build(&self, base_command: u8) -> (u8, Vec<u8>) {
        let (command, explicit_space) = resolve_command(base_command, self.address_space);
        let mut out = Vec::with_capacity(4 + self.data.len());
        let mut addr = [0u8; 4];
        BigEndian::write_u32(&mut addr, self.starting_address);
        out.extend_from_slice(&addr);
        if let Some(space) = explicit_space {
            out.push(space);
        }
        out.extend_from_slice(&self.data);
        (command, out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadReplyFailure {
    pub starting_address: u32,
    pub address_space: u8,
    pub error_code: u16,
    pub data: Vec<u8>,
}

impl ReadReplyFailure {
    pub fn parse(command: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let starting_address = BigEndian::read_u32(&body[0..4]);
        let (address_space, rest) = if command & 0b11 == 0 {
            let space = *body.get(4)?;
            (space, &body[5..])
        } else {
            (IMPLICIT_SPACE_BASE + (command & 0b11), &body[4..])
        };
        if rest.len() < 2 {
            return None;
        }
        let error_code = BigEndian::read_u16(&rest[0..2]);
        Some(Self {
            starting_address,
            address_space,
            error_code,
            data: rest[2..].to_vec(),
        })
    }
}

pub type WriteRequest = ReadReply;
pub type WriteReplyFailure = ReadReplyFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReply {
    pub starting_address: u32,
    pub address_space: u8,
}

impl WriteReply {
    pub fn parse(command: u8, body: &[u8]) -> Option<Self> {
        if body.len() < 4 {
            return None;
        }
        let starting_address = BigEndian::read_u32(&body[0..4]);
        let address_space = if command & 0b11 == 0 {
            *body.get(4)?
        } else {
            IMPLICIT_SPACE_BASE + (command & 0b11)
        };
        Some(Self {
            starting_address,
            address_space,
        })
    }

    pub fn build(&self, base_command: u8) -> (u8, Vec<u8>) {
        let (command, explicit_space) = resolve_command(base_command, self.address_space);
        let mut out = Vec::with_capacity(5);
        let mut addr = [0u8; 4];
        BigEndian::write_u32(&mut addr, self.starting_address);
        out.extend_from_slice(&addr);
        if let Some(space) = explicit_space {
            out.push(space);
        }
        (command, out)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AvailableCommands {
    pub write_under_mask: bool,
    pub unaligned_read: bool,
    pub unaligned_write: bool,
    pub read_space_fc: bool,
    pub read_space_fb: bool,
    pub write_space_fb: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteLengths {
    pub one_byte: bool,
    pub two_byte: bool,
    pub four_byte: bool,
    pub sixty_four_byte: bool,
    pub arbitrary: bool,
    pub stream_support: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfigurationOptions {
    pub available_commands: AvailableCommands,
    pub write_lengths: WriteLengths,
    pub highest_address_space: u8,
    pub lowest_address_space: Option<u8>,
    pub name: Option<String>,
}

impl MemoryConfigurationOptions {
    pub fn parse(body: &[u8]) -> Option<Self> {
        if body.len() < 3 {
            return None;
        }
        let cmd_bits = body[0];
        let available_commands = AvailableCommands {
            write_under_mask: cmd_bits & 0b1000_0000 != 0,
            unaligned_read: cmd_bits & 0b0100_0000 != 0,
            unaligned_write: cmd_bits & 0b0010_0000 != 0,
            read_space_fc: cmd_bits & 0b0000_0100 != 0,
            read_space_fb: cmd_bits & 0b0000_0010 != 0,
            write_space_fb: cmd_bits & 0b0000_0001 != 0,
        };
        let len_bits = body[1];
        let write_lengths = WriteLengths {
            one_byte: len_bits & 0b1000_0000 != 0,
            two_byte: len_bits & 0b0100_0000 != 0,
            four_byte: len_bits & 0b0010_0000 != 0,
            sixty_four_byte: len_bits & 0b0001_0000 != 0,
            arbitrary: len_bits & 0b0000_0010 != 0,
            stream_support: len_bits & 0b0000_0001 != 0,
        };
        let highest_address_space = body[2];
        let lowest_address_space = body.get(3).copied();
        let name = body.get(4..).and_then(|rest| {
            let nul = rest.iter().position(|&b| b == 0)?;
            String::from_utf8(rest[..nul].to_vec()).ok()
        });
        Some(Self {
            available_commands,
            write_lengths,
            highest_address_space,
            lowest_address_space,
            name,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpaceInfo {
    pub highest_address: u32,
    pub read_only: bool,
    pub lowest_address: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSpaceInfoReply {
    pub present: bool,
    pub address_space: u8,
    pub info: Option<AddressSpaceInfo>,
}

impl AddressSpaceInfoReply {
    pub fn parse(command: u8, body: &[u8]) -> Option<Self> {
        let present = command & 1 != 0;
        let address_space = *body.first()?;
        if body.len() == 1 {
            return Some(Self {
                present,
                address_space,
                info: None,
            });
        }
        if body.len() < 6 {
            return None;
        }
        let highest_address = BigEndian::read_u32(&body[1..5]);
        let flags = body[5];
        let read_only = flags & 1 != 0;
        let (lowest_address, rest) = if flags & 0b10 != 0 {
            (BigEndian::read_u32(body.get(6..10)?), &body[10..])
        } else {
            (0, &body[6..])
        };
        let nul = rest.iter().position(|&b| b == 0)?;
        let description = String::from_utf8(rest[..nul].to_vec()).ok()?;
        Some(Self {
            present,
            address_space,
            info: Some(AddressSpaceInfo {
                highest_address,
                read_only,
                lowest_address,
                description,
            }),
        })
    }
}

/// A fully dispatched memory-configuration command, keyed by the protocol's
/// `command` byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryConfigurationMessage {
    Read(ReadRequest),
    ReadReply(ReadReply),
    ReadReplyFailure(ReadReplyFailure),
    Write(WriteRequest),
    WriteReply(WriteReply),
    WriteReplyFailure(WriteReplyFailure),
    GetOptions,
    GetOptionsReply(MemoryConfigurationOptions),
    GetAddressSpaceInfo { address_space: u8 },
    GetAddressSpaceInfoReply(AddressSpaceInfoReply),
    /// Command byte recognized by no case above; body kept opaque.
    Unknown { command: u8, body: Vec<u8> },
}

impl MemoryConfigurationMessage {
    pub fn parse(command: u8, body: &[u8]) -> Self {
        match command {
            READ..=0x43 => ReadRequest::parse(command, body).map(Self::Read),
            READ_REPLY..=0x53 => ReadReply::parse(command, body).map(Self::ReadReply),
            READ_REPLY_FAILURE..=0x5B => {
                ReadReplyFailure::parse(command, body).map(Self::ReadReplyFailure)
            }
            WRITE..=0x03 => WriteRequest::parse(command, body).map(Self::Write),
            WRITE_REPLY..=0x13 => WriteReply::parse(command, body).map(Self::WriteReply),
            WRITE_REPLY_FAILURE..=0x1B => {
                WriteReplyFailure::parse(command, body).map(Self::WriteReplyFailure)
            }
            GET_OPTIONS => Some(Self::GetOptions),
            GET_OPTIONS_REPLY => MemoryConfigurationOptions::parse(body).map(Self::GetOptionsReply),
            GET_ADDRESS_SPACE_INFO => body.first().map(|&address_space| {
                Self::GetAddressSpaceInfo { address_space }
            }),
            GET_ADDRESS_SPACE_INFO_REPLY_ABSENT | GET_ADDRESS_SPACE_INFO_REPLY_PRESENT => {
                AddressSpaceInfoReply::parse(command, body).map(Self::GetAddressSpaceInfoReply)
            }
            _ => None,
        }
        .unwrap_or(Self::Unknown {
            command,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dispatch_get_options_request() {
        let msg = MemoryConfigurationMessage::parse(GET_OPTIONS, &[]);
        assert_eq!(msg, MemoryConfigurationMessage::GetOptions);
    }

    #[test]
    fn test_resolve_command_explicit_space() {
        let (command, explicit) = resolve_command(READ, 0x10);
        assert_eq!(command, 0x40);
        assert_eq!(explicit, Some(0x10));
    }

    #[test]
    fn test_resolve_command_implicit_space() {
        let (command, explicit) = resolve_command(READ, 0xFD);
        assert_eq!(command, 0x41);
        assert_eq!(explicit, None);

        let (command, explicit) = resolve_command(READ, 0xFF);
        assert_eq!(command, 0x43);
        assert_eq!(explicit, None);
    }

    #[test]
    fn test_read_request_roundtrip_implicit_space() {
        let req = ReadRequest {
            starting_address: 0,
            address_space: 0xFD,
            read_count: 64,
        };
        let (command, body) = req.build(READ);
        assert_eq!(command, 0x41);
        let parsed = ReadRequest::parse(command, &body).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_read_reply_roundtrip_explicit_space() {
        let reply = ReadReply {
            starting_address: 0x1000,
            address_space: 0x10,
            data: vec![1, 2, 3, 4],
        };
        let (command, body) = reply.build(READ_REPLY);
        assert_eq!(command, 0x50);
        let parsed = ReadReply::parse(command, &body).unwrap();
        assert_eq!(parsed, reply);
    }
}
