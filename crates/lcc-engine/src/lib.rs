//! Async engine for the LCC/OpenLCB-over-CAN protocol stack: alias
//! reservation and defence, message-layer gating, multi-frame reassembly,
//! the pending-response registry, and the request/response operations
//! built on top of them.
//!
//! This crate owns no transport itself; [`engine::Engine`] is generic over
//! anything implementing [`lcc_transport::CanTransport`].

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod link;
pub mod reassembly;
pub mod registry;

pub use config::DeviceConfig;
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use link::ControlState;

/// Shared hook every frame-emitting component uses instead of owning the
/// transport directly, so `link.rs` and `api.rs` can send frames without
/// either one holding the connection.
pub(crate) type FrameSink = Arc<dyn Fn(u32, &[u8]) -> lcc_transport::Result<()> + Send + Sync>;
