//! The parsed, semantic representation of an LCC-over-CAN frame.
//!
//! Frames are represented as a flat tagged sum: each variant carries only
//! the fields that matter for that frame kind, never a chain of nested
//! structs. Source/destination alias and multipart bookkeeping live on the
//! wrapping [`ParsedFrame`], not inside the message payload itself.

use arrayvec::ArrayVec;
use byteorder::{BigEndian, ByteOrder};

use crate::cc;
use crate::frame::{self, Frame};
use crate::mti::{self, IdentifiedStatus};
use crate::node::{EventId, NodeAlias, NodeId};
use crate::protocol_support::ProtocolSupport;
use crate::snip::SimpleNodeInformation;

/// Multipart bookkeeping shared by addressed MTI messages and datagrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultipartFlag {
    Only,
    First,
    Middle,
    Last,
}

impl MultipartFlag {
    pub const fn is_complete(&self) -> bool {
        matches!(self, MultipartFlag::Only | MultipartFlag::Last)
    }

    /// Decode the 4-bit flag used by addressed MTI messages
    /// (only=0, first=1, last=2, middle=3).
    fn from_mti_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(MultipartFlag::Only),
            1 => Some(MultipartFlag::First),
            2 => Some(MultipartFlag::Last),
            3 => Some(MultipartFlag::Middle),
            _ => None,
        }
    }

    const fn to_mti_nibble(self) -> u8 {
        match self {
            MultipartFlag::Only => 0,
            MultipartFlag::First => 1,
            MultipartFlag::Last => 2,
            MultipartFlag::Middle => 3,
        }
    }

    /// Decode the datagram `frame_type` (2=only, 3=first, 4=middle, 5=last).
    fn from_datagram_frame_type(frame_type: u8) -> Option<Self> {
        match frame_type {
            2 => Some(MultipartFlag::Only),
            3 => Some(MultipartFlag::First),
            4 => Some(MultipartFlag::Middle),
            5 => Some(MultipartFlag::Last),
            _ => None,
        }
    }

    const fn to_datagram_frame_type(self) -> u8 {
        match self {
            MultipartFlag::Only => 2,
            MultipartFlag::First => 3,
            MultipartFlag::Middle => 4,
            MultipartFlag::Last => 5,
        }
    }
}

pub type EventIdRange = (u64, u64);

fn decode_event_id_range(raw: u64) -> EventIdRange {
    let mut mask_count = 1u32;
    while mask_count < 64 && (raw >> mask_count) & 1 == raw & 1 {
        mask_count += 1;
    }
    let mask = (1u64 << mask_count) - 1;
    (raw & !mask, raw | mask)
}

/// Inverse of [`decode_event_id_range`]. The wire only ever needs one
/// concrete 8-byte value for a range; the lower bound already has its
/// trailing run of "don't care" bits cleared, so it round-trips through
/// [`decode_event_id_range`] to the same `(lowest, highest)` pair.
fn encode_event_id_range((lowest, _highest): EventIdRange) -> u64 {
    lowest
}

type Payload = ArrayVec<u8, { frame::MAX_PAYLOAD_LEN }>;

/// The semantic payload of a recognized LCC frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LccFrame {
    // CAN-control frames
    CanControlCheckId {
        frame_sequence_number: u8,
        partial_node_id: u16,
    },
    ReserveId,
    AliasMapDefinition {
        node_id: NodeId,
    },
    AliasMappingEnquiry {
        node_id: Option<NodeId>,
    },
    AliasMapReset {
        node_id: NodeId,
    },
    ErrorInformationReport {
        code: u8,
    },

    // Basic OpenLCB messages
    InitializationComplete {
        node_id: NodeId,
    },
    InitializationCompleteSimple {
        node_id: NodeId,
    },
    VerifyNodeIdAddressed {
        node_id: Option<NodeId>,
    },
    VerifyNodeIdGlobal {
        node_id: Option<NodeId>,
    },
    VerifiedNodeId {
        simple_set_sufficient: bool,
        node_id: NodeId,
    },
    OptionalInteractionRejected {
        error_code: u16,
    },
    TerminateDueToError {
        error_code: u16,
    },
    ProtocolSupportInquiry,
    ProtocolSupportReply {
        support: ProtocolSupport,
    },

    // Events
    ProducerConsumerEventReport {
        event_id: EventId,
    },
    IdentifyConsumer {
        event_id: EventId,
    },
    ConsumerIdentified {
        status: IdentifiedStatus,
        event_id: EventId,
    },
    ConsumerRangeIdentified {
        event_id_range: EventIdRange,
    },
    IdentifyProducer {
        event_id_range: EventIdRange,
    },
    ProducerIdentified {
        status: IdentifiedStatus,
        event_id: EventId,
    },
    ProducerRangeIdentified {
        event_id_range: EventIdRange,
    },
    IdentifyEventsAddressed {
        destination_node_id: Option<NodeId>,
    },
    IdentifyEventsGlobal {
        destination_node_id: Option<NodeId>,
    },
    LearnEvent {
        event_id: EventId,
    },

    // Simple node information
    SimpleNodeIdentInfoRequest,
    SimpleNodeIdentInfoReply {
        info: SimpleNodeInformation,
    },

    // Datagram acknowledgement
    DatagramReceivedOk,
    DatagramRejected,

    /// A recognized outer shell (MTI message) whose MTI is not one this
    /// codec interprets further. Retained, never dropped.
    UnknownMtiMessage {
        mti: u16,
        payload: Payload,
    },

    /// A single CAN frame's worth of datagram payload. `protocol_type` is
    /// the first body byte; `body` is everything after it. Memory
    /// configuration (`protocol_type == 0x20`) is decoded by the caller via
    /// [`crate::memcfg::MemoryConfigurationMessage::parse`].
    Datagram {
        protocol_type: u8,
        body: Payload,
    },

    /// A datagram whose content spanned several CAN frames, reassembled by
    /// the caller (see `lcc-engine`'s reassembly module) and handed back as
    /// one logical message. Unlike [`LccFrame::Datagram`], `body` isn't
    /// bounded to a single frame's payload.
    DatagramComplete {
        protocol_type: u8,
        body: Vec<u8>,
    },

    /// Stream frame (`frame_type == 7`); payload not further interpreted.
    Stream {
        payload: Payload,
    },

    /// Outer shell recognized but not one of the above (e.g. an
    /// unrecognized `frame_type`).
    InvalidFrame,
}

/// An LCC frame together with its addressing/reassembly metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub source_alias: NodeAlias,
    pub destination_alias: Option<NodeAlias>,
    pub multipart: Option<MultipartFlag>,
    pub message: LccFrame,
}

fn to_payload(bytes: &[u8]) -> Payload {
    let mut v = Payload::new();
    let _ = v.try_extend_from_slice(bytes);
    v
}

fn parse_optional_node_id(payload: &[u8]) -> Option<NodeId> {
    if payload.len() >= 6 {
        Some(NodeId::from_bytes(&payload[..6]))
    } else {
        None
    }
}

/// Parse a raw `(arbitration_id, payload)` pair into a [`ParsedFrame`].
///
/// Never fails on a recognized outer shell; unknown inner discriminants
/// degrade to an opaque-remainder variant.
pub fn parse(id: u32, payload: &[u8]) -> ParsedFrame {
    let mut id_bytes = [0u8; 4];
    BigEndian::write_u32(&mut id_bytes, id);
    let raw = Frame::new_unchecked(&id_bytes[..]);

    let source_alias = NodeAlias::new(raw.source_alias());

    if !raw.is_openlcb_message() {
        return parse_cc_frame(&raw, payload, source_alias);
    }

    match raw.frame_type() {
        1 => parse_mti_message(raw.variable_field(), payload, source_alias),
        2..=5 => {
            let destination_alias = NodeAlias::new(raw.variable_field());
            let multipart = MultipartFlag::from_datagram_frame_type(raw.frame_type());
            let (protocol_type, body) = match payload.split_first() {
                Some((&pt, rest)) => (pt, rest),
                None => (0, &[][..]),
            };
            ParsedFrame {
                source_alias,
                destination_alias: Some(destination_alias),
                multipart,
                message: LccFrame::Datagram {
                    protocol_type,
                    body: to_payload(body),
                },
            }
        }
        7 => ParsedFrame {
            source_alias,
            destination_alias: None,
            multipart: None,
            message: LccFrame::Stream {
                payload: to_payload(payload),
            },
        },
        _ => ParsedFrame {
            source_alias,
            destination_alias: None,
            multipart: None,
            message: LccFrame::InvalidFrame,
        },
    }
}

fn parse_cc_frame(raw: &Frame<&[u8]>, payload: &[u8], source_alias: NodeAlias) -> ParsedFrame {
    let message = if raw.is_check_id_frame() {
        LccFrame::CanControlCheckId {
            frame_sequence_number: raw.frame_sequence_number(),
            partial_node_id: raw.cc_variable_field(),
        }
    } else {
        match raw.cc_variable_field() {
            cc::RESERVE_ID => LccFrame::ReserveId,
            cc::ALIAS_MAP_DEFINITION => LccFrame::AliasMapDefinition {
                node_id: NodeId::from_bytes(payload.get(..6).unwrap_or(&[0; 6])),
            },
            cc::ALIAS_MAPPING_ENQUIRY => LccFrame::AliasMappingEnquiry {
                node_id: parse_optional_node_id(payload),
            },
            cc::ALIAS_MAP_RESET => LccFrame::AliasMapReset {
                node_id: NodeId::from_bytes(payload.get(..6).unwrap_or(&[0; 6])),
            },
            field if cc::is_error_information_report(field) => LccFrame::ErrorInformationReport {
                code: (field & 0b11) as u8,
            },
            _ => LccFrame::InvalidFrame,
        }
    };
    ParsedFrame {
        source_alias,
        destination_alias: None,
        multipart: None,
        message,
    }
}

fn parse_mti_message(mti: u16, payload: &[u8], source_alias: NodeAlias) -> ParsedFrame {
    let (destination_alias, multipart, body) = if mti::is_addressed(mti) && payload.len() >= 2 {
        let header = BigEndian::read_u16(&payload[0..2]);
        let multipart_nibble = ((header >> 12) & 0xF) as u8;
        let destination_alias = header & 0xFFF;
        (
            Some(NodeAlias::new(destination_alias)),
            MultipartFlag::from_mti_nibble(multipart_nibble),
            &payload[2..],
        )
    } else {
        (None, None, payload)
    };

    let message = match mti {
        mti::INITIALIZATION_COMPLETE => LccFrame::InitializationComplete {
            node_id: NodeId::from_bytes(body.get(..6).unwrap_or(&[0; 6])),
        },
        mti::INITIALIZATION_COMPLETE_SIMPLE => LccFrame::InitializationCompleteSimple {
            node_id: NodeId::from_bytes(body.get(..6).unwrap_or(&[0; 6])),
        },
        mti::VERIFY_NODE_ID_ADDRESSED => LccFrame::VerifyNodeIdAddressed {
            node_id: parse_optional_node_id(body),
        },
        mti::VERIFY_NODE_ID_GLOBAL => LccFrame::VerifyNodeIdGlobal {
            node_id: parse_optional_node_id(body),
        },
        mti::VERIFIED_NODE_ID | mti::VERIFIED_NODE_ID_SIMPLE => LccFrame::VerifiedNodeId {
            simple_set_sufficient: mti & 1 != 0,
            node_id: NodeId::from_bytes(body.get(..6).unwrap_or(&[0; 6])),
        },
        mti::OPTIONAL_INTERACTION_REJECTED => LccFrame::OptionalInteractionRejected {
            error_code: body.get(..2).map(BigEndian::read_u16).unwrap_or(0),
        },
        mti::TERMINATE_DUE_TO_ERROR => LccFrame::TerminateDueToError {
            error_code: body.get(..2).map(BigEndian::read_u16).unwrap_or(0),
        },
        mti::PROTOCOL_SUPPORT_INQUIRY => LccFrame::ProtocolSupportInquiry,
        mti::PROTOCOL_SUPPORT_REPLY => LccFrame::ProtocolSupportReply {
            support: ProtocolSupport::parse(body).unwrap_or(ProtocolSupport::empty()),
        },
        mti::PRODUCER_CONSUMER_EVENT_REPORT => LccFrame::ProducerConsumerEventReport {
            event_id: EventId::from_bytes(body.get(..8).unwrap_or(&[0; 8])),
        },
        mti::IDENTIFY_CONSUMER => LccFrame::IdentifyConsumer {
            event_id: EventId::from_bytes(body.get(..8).unwrap_or(&[0; 8])),
        },
        mti::CONSUMER_IDENTIFIED_VALID
        | mti::CONSUMER_IDENTIFIED_INVALID
        | mti::CONSUMER_IDENTIFIED_UNKNOWN => LccFrame::ConsumerIdentified {
            status: IdentifiedStatus::from_low_bits(mti),
            event_id: EventId::from_bytes(body.get(..8).unwrap_or(&[0; 8])),
        },
        mti::CONSUMER_RANGE_IDENTIFIED => LccFrame::ConsumerRangeIdentified {
            event_id_range: decode_event_id_range(
                body.get(..8).map(BigEndian::read_u64).unwrap_or(0),
            ),
        },
        mti::IDENTIFY_PRODUCER => LccFrame::IdentifyProducer {
            event_id_range: decode_event_id_range(
                body.get(..8).map(BigEndian::read_u64).unwrap_or(0),
            ),
        },
        mti::PRODUCER_IDENTIFIED_VALID
        | mti::PRODUCER_IDENTIFIED_INVALID
        | mti::PRODUCER_IDENTIFIED_UNKNOWN => LccFrame::ProducerIdentified {
            status: IdentifiedStatus::from_low_bits(mti),
            event_id: EventId::from_bytes(body.get(..8).unwrap_or(&[0; 8])),
        },
        mti::PRODUCER_RANGE_IDENTIFIED => LccFrame::ProducerRangeIdentified {
            event_id_range: decode_event_id_range(
                body.get(..8).map(BigEndian::read_u64).unwrap_or(0),
            ),
        },
        mti::IDENTIFY_EVENTS_ADDRESSED => LccFrame::IdentifyEventsAddressed {
            destination_node_id: parse_optional_node_id(body),
        },
        mti::IDENTIFY_EVENTS_GLOBAL => LccFrame::IdentifyEventsGlobal {
            destination_node_id: parse_optional_node_id(body),
        },
        mti::LEARN_EVENT => LccFrame::LearnEvent {
            event_id: EventId::from_bytes(body.get(..8).unwrap_or(&[0; 8])),
        },
        mti::SIMPLE_NODE_IDENT_INFO_REQUEST => LccFrame::SimpleNodeIdentInfoRequest,
        mti::SIMPLE_NODE_IDENT_INFO_REPLY => LccFrame::SimpleNodeIdentInfoReply {
            info: SimpleNodeInformation::parse(body).unwrap_or(SimpleNodeInformation {
                fixed: crate::snip::FixedFields::Other { version: 0 },
                user: crate::snip::UserFields::Other { version: 0 },
            }),
        },
        mti::DATAGRAM_RECEIVED_OK => LccFrame::DatagramReceivedOk,
        mti::DATAGRAM_REJECTED => LccFrame::DatagramRejected,
        other => LccFrame::UnknownMtiMessage {
            mti: other,
            payload: to_payload(body),
        },
    };

    ParsedFrame {
        source_alias,
        destination_alias,
        multipart,
        message,
    }
}

/// Build `(arbitration_id, payload)` for an outgoing CAN-control frame.
pub fn build_cc_frame(source_alias: NodeAlias, message: &LccFrame) -> (u32, Payload) {
    match message {
        LccFrame::CanControlCheckId {
            frame_sequence_number,
            partial_node_id,
        } => (
            frame::cc_id(true, *frame_sequence_number, *partial_node_id, source_alias.value()),
            Payload::new(),
        ),
        LccFrame::ReserveId => (
            frame::cc_id(false, 0, cc::RESERVE_ID, source_alias.value()),
            Payload::new(),
        ),
        LccFrame::AliasMapDefinition { node_id } => (
            frame::cc_id(false, 0, cc::ALIAS_MAP_DEFINITION, source_alias.value()),
            to_payload(node_id.as_bytes()),
        ),
        LccFrame::AliasMappingEnquiry { node_id } => (
            frame::cc_id(false, 0, cc::ALIAS_MAPPING_ENQUIRY, source_alias.value()),
            node_id.map(|n| to_payload(n.as_bytes())).unwrap_or_default(),
        ),
        LccFrame::AliasMapReset { node_id } => (
            frame::cc_id(false, 0, cc::ALIAS_MAP_RESET, source_alias.value()),
            to_payload(node_id.as_bytes()),
        ),
        LccFrame::ErrorInformationReport { code } => (
            frame::cc_id(
                false,
                0,
                cc::ERROR_INFORMATION_REPORT_LOW | (*code as u16 & 0b11),
                source_alias.value(),
            ),
            Payload::new(),
        ),
        _ => panic!("build_cc_frame called with a non-CAN-control message"),
    }
}

fn mti_of(message: &LccFrame) -> u16 {
    match message {
        LccFrame::InitializationComplete { .. } => mti::INITIALIZATION_COMPLETE,
        LccFrame::InitializationCompleteSimple { .. } => mti::INITIALIZATION_COMPLETE_SIMPLE,
        LccFrame::VerifyNodeIdAddressed { .. } => mti::VERIFY_NODE_ID_ADDRESSED,
        LccFrame::VerifyNodeIdGlobal { .. } => mti::VERIFY_NODE_ID_GLOBAL,
        LccFrame::VerifiedNodeId {
            simple_set_sufficient,
            ..
        } => {
            if *simple_set_sufficient {
                mti::VERIFIED_NODE_ID_SIMPLE
            } else {
                mti::VERIFIED_NODE_ID
            }
        }
        LccFrame::OptionalInteractionRejected { .. } => mti::OPTIONAL_INTERACTION_REJECTED,
        LccFrame::TerminateDueToError { .. } => mti::TERMINATE_DUE_TO_ERROR,
        LccFrame::ProtocolSupportInquiry => mti::PROTOCOL_SUPPORT_INQUIRY,
        LccFrame::ProtocolSupportReply { .. } => mti::PROTOCOL_SUPPORT_REPLY,
        LccFrame::ProducerConsumerEventReport { .. } => mti::PRODUCER_CONSUMER_EVENT_REPORT,
        LccFrame::IdentifyConsumer { .. } => mti::IDENTIFY_CONSUMER,
        LccFrame::ConsumerIdentified { status, .. } => match status {
            IdentifiedStatus::Valid => mti::CONSUMER_IDENTIFIED_VALID,
            IdentifiedStatus::Invalid => mti::CONSUMER_IDENTIFIED_INVALID,
            IdentifiedStatus::Unknown => mti::CONSUMER_IDENTIFIED_UNKNOWN,
        },
        LccFrame::ConsumerRangeIdentified { .. } => mti::CONSUMER_RANGE_IDENTIFIED,
        LccFrame::IdentifyProducer { .. } => mti::IDENTIFY_PRODUCER,
        LccFrame::ProducerIdentified { status, .. } => match status {
            IdentifiedStatus::Valid => mti::PRODUCER_IDENTIFIED_VALID,
            IdentifiedStatus::Invalid => mti::PRODUCER_IDENTIFIED_INVALID,
            IdentifiedStatus::Unknown => mti::PRODUCER_IDENTIFIED_UNKNOWN,
        },
        LccFrame::ProducerRangeIdentified { .. } => mti::PRODUCER_RANGE_IDENTIFIED,
        LccFrame::IdentifyEventsAddressed { .. } => mti::IDENTIFY_EVENTS_ADDRESSED,
        LccFrame::IdentifyEventsGlobal { .. } => mti::IDENTIFY_EVENTS_GLOBAL,
        LccFrame::LearnEvent { .. } => mti::LEARN_EVENT,
        LccFrame::SimpleNodeIdentInfoRequest => mti::SIMPLE_NODE_IDENT_INFO_REQUEST,
        LccFrame::SimpleNodeIdentInfoReply { .. } => mti::SIMPLE_NODE_IDENT_INFO_REPLY,
        LccFrame::DatagramReceivedOk => mti::DATAGRAM_RECEIVED_OK,
        LccFrame::DatagramRejected => mti::DATAGRAM_REJECTED,
        LccFrame::UnknownMtiMessage { mti, .. } => *mti,
        _ => panic!("mti_of called with a non-MTI message"),
    }
}

/// Unlike [`Payload`], not capped at a single CAN frame's worth: a SNIP
/// reply in particular routinely needs several frames once the caller
/// chunks it (see `lcc-engine`'s reassembly module).
fn mti_body(message: &LccFrame) -> Vec<u8> {
    match message {
        LccFrame::InitializationComplete { node_id }
        | LccFrame::InitializationCompleteSimple { node_id }
        | LccFrame::VerifiedNodeId { node_id, .. } => node_id.as_bytes().to_vec(),
        LccFrame::VerifyNodeIdAddressed { node_id } | LccFrame::VerifyNodeIdGlobal { node_id } => {
            node_id.map(|n| n.as_bytes().to_vec()).unwrap_or_default()
        }
        LccFrame::OptionalInteractionRejected { error_code }
        | LccFrame::TerminateDueToError { error_code } => {
            let mut buf = [0u8; 2];
            BigEndian::write_u16(&mut buf, *error_code);
            buf.to_vec()
        }
        LccFrame::ProtocolSupportInquiry => Vec::new(),
        LccFrame::ProtocolSupportReply { support } => support.build().to_vec(),
        LccFrame::ProducerConsumerEventReport { event_id }
        | LccFrame::IdentifyConsumer { event_id }
        | LccFrame::LearnEvent { event_id } => event_id.as_bytes().to_vec(),
        LccFrame::ConsumerIdentified { event_id, .. } | LccFrame::ProducerIdentified { event_id, .. } => {
            event_id.as_bytes().to_vec()
        }
        LccFrame::ConsumerRangeIdentified { event_id_range }
        | LccFrame::IdentifyProducer { event_id_range }
        | LccFrame::ProducerRangeIdentified { event_id_range } => {
            let mut buf = [0u8; 8];
            BigEndian::write_u64(&mut buf, encode_event_id_range(*event_id_range));
            buf.to_vec()
        }
        LccFrame::IdentifyEventsAddressed { destination_node_id }
        | LccFrame::IdentifyEventsGlobal { destination_node_id } => destination_node_id
            .map(|n| n.as_bytes().to_vec())
            .unwrap_or_default(),
        LccFrame::SimpleNodeIdentInfoRequest
        | LccFrame::DatagramReceivedOk
        | LccFrame::DatagramRejected => Vec::new(),
        LccFrame::SimpleNodeIdentInfoReply { info } => info.build(),
        LccFrame::UnknownMtiMessage { payload, .. } => payload.to_vec(),
        _ => Vec::new(),
    }
}

/// Build `(arbitration_id, payload)` for an outgoing MTI message. If the
/// MTI is addressed, `addressing` must supply `(destination_alias,
/// multipart_flag)`; the two-byte addressing header is prepended to the
/// payload and the `dlc` may exceed what a single CAN frame can carry (the
/// caller is responsible for chunking multi-frame messages, see
/// `lcc-engine`'s reassembly module).
pub fn build_mti_message(
    source_alias: NodeAlias,
    message: &LccFrame,
    addressing: Option<(NodeAlias, MultipartFlag)>,
) -> (u32, ArrayVec<u8, 256>) {
    let mti = mti_of(message);
    let mut out = ArrayVec::<u8, 256>::new();
    if let Some((destination_alias, multipart)) = addressing {
        let header = ((multipart.to_mti_nibble() as u16) << 12) | destination_alias.value();
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, header);
        let _ = out.try_extend_from_slice(&buf);
    }
    let body = mti_body(message);
    let _ = out.try_extend_from_slice(&body);
    (frame::openlcb_id(1, mti, source_alias.value()), out)
}

/// Split an addressed MTI payload into its destination alias, multipart
/// flag, and remaining body bytes, without decoding the body itself. Used
/// by `lcc-engine` to accumulate multi-frame bodies before handing the
/// complete bytes back to this crate for full decoding.
pub fn split_addressed_mti(payload: &[u8]) -> Option<(NodeAlias, MultipartFlag, &[u8])> {
    if payload.len() < 2 {
        return None;
    }
    let header = BigEndian::read_u16(&payload[0..2]);
    let multipart = MultipartFlag::from_mti_nibble(((header >> 12) & 0xF) as u8)?;
    let destination_alias = NodeAlias::new(header & 0xFFF);
    Some((destination_alias, multipart, &payload[2..]))
}

/// Build `(arbitration_id, payload)` for a single datagram CAN frame.
pub fn build_datagram_frame(
    source_alias: NodeAlias,
    destination_alias: NodeAlias,
    multipart: MultipartFlag,
    protocol_type: u8,
    chunk: &[u8],
) -> (u32, Payload) {
    let mut out = Payload::new();
    let _ = out.try_push(protocol_type);
    let _ = out.try_extend_from_slice(chunk);
    (
        frame::openlcb_id(
            multipart.to_datagram_frame_type(),
            destination_alias.value(),
            source_alias.value(),
        ),
        out,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_producer_consumer_report_s1() {
        let parsed = parse(0x195B4ABC, &[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);
        assert_eq!(parsed.source_alias, NodeAlias::new(0xABC));
        match parsed.message {
            LccFrame::ProducerConsumerEventReport { event_id } => {
                assert_eq!(
                    event_id,
                    EventId::from_bytes(&[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF])
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_amd_s2() {
        let parsed = parse(0x10701ABC, &[0x02, 0x01, 0x0D, 0x00, 0x00, 0x00]);
        assert_eq!(parsed.source_alias, NodeAlias::new(0xABC));
        match parsed.message {
            LccFrame::AliasMapDefinition { node_id } => {
                assert_eq!(node_id.to_string(), "02.01.0D.00.00.00");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_datagram_frame_s4() {
        let parsed = parse(0x1A555777, &[0x20, 0x80]);
        assert_eq!(parsed.source_alias, NodeAlias::new(0x777));
        assert_eq!(parsed.destination_alias, Some(NodeAlias::new(0x555)));
        assert_eq!(parsed.multipart, Some(MultipartFlag::Only));
        match parsed.message {
            LccFrame::Datagram { protocol_type, body } => {
                assert_eq!(protocol_type, 0x20);
                assert_eq!(&body[..], &[0x80][..]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_build_datagram_frame_matches_s4_arbitration_id() {
        let (id, payload) = build_datagram_frame(
            NodeAlias::new(0x777),
            NodeAlias::new(0x555),
            MultipartFlag::Only,
            0x20,
            &[0x80],
        );
        assert_eq!(id, 0x1A555777);
        assert_eq!(&payload[..], &[0x20, 0x80]);
    }

    #[test]
    fn test_addressed_mti_roundtrip() {
        let (id, payload) = build_mti_message(
            NodeAlias::new(0x123),
            &LccFrame::SimpleNodeIdentInfoReply {
                info: SimpleNodeInformation {
                    fixed: crate::snip::FixedFields::V1 {
                        manufacturer_name: arrayvec::ArrayString::from("Acme").unwrap(),
                    },
                    user: crate::snip::UserFields::V1 {
                        node_name: arrayvec::ArrayString::from("Node").unwrap(),
                    },
                },
            },
            Some((NodeAlias::new(0x456), MultipartFlag::Only)),
        );
        let parsed = parse(id, &payload);
        assert_eq!(parsed.destination_alias, Some(NodeAlias::new(0x456)));
        assert_eq!(parsed.multipart, Some(MultipartFlag::Only));
        assert!(matches!(
            parsed.message,
            LccFrame::SimpleNodeIdentInfoReply { .. }
        ));
    }

    #[test]
    fn test_unknown_mti_is_retained() {
        let parsed = parse(frame::openlcb_id(1, 0x5EB, 0xABC), &[1, 2, 3]);
        match parsed.message {
            LccFrame::UnknownMtiMessage { mti, payload } => {
                assert_eq!(mti, 0x5EB);
                assert_eq!(&payload[..], &[1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
