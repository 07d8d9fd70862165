//! Codec and data model for the OpenLCB/LCC protocol over CAN.
//!
//! This crate performs no I/O. It turns `(arbitration_id, payload)` pairs
//! into [`repr::LccFrame`]s and back, and provides the value types
//! (`NodeId`, `NodeAlias`, `EventId`) and sub-protocol codecs
//! (`memcfg`, `snip`, `protocol_support`) that the rest of the stack is
//! built from.

pub mod cc;
pub mod error;
pub mod frame;
pub mod memcfg;
pub mod mti;
pub mod node;
pub mod protocol_support;
pub mod repr;
pub mod snip;

pub use error::{Error, Result};
pub use frame::CanFrame;
pub use node::{EventId, NodeAlias, NodeId};
pub use protocol_support::ProtocolSupport;
pub use repr::{parse, LccFrame, MultipartFlag, ParsedFrame};
