//! Serial transport for USB-CAN dongles that speak the LCC/OpenLCB wire
//! format. Owns the serial port and a background receive thread; the codec
//! in `lcc-core` never touches I/O directly.

pub mod error;
pub mod zhou_ligong;

pub use error::{Result, TransportError};
pub use lcc_core::CanFrame;
pub use zhou_ligong::{UartBaudRate, ZhouLigongConfig, ZhouLigongTransport};

/// A CAN transport: something that can be connected to a bus, can send and
/// receive frames, and can be told to stop.
///
/// Implementors own their background I/O; `receive` never blocks for long
/// (the Zhou Ligong implementation polls with a short sleep between
/// attempts) so a caller wanting a push model should use
/// [`CanTransport::start`] instead and register a frame callback.
pub trait CanTransport {
    fn connect(&mut self) -> Result<()>;

    fn send(&mut self, frame: &CanFrame) -> Result<()>;

    /// Try to read one frame without blocking indefinitely. Returns `Ok(None)`
    /// on a harmless empty read (timeout, no traffic).
    fn receive(&mut self) -> Result<Option<CanFrame>>;

    fn disconnect(&mut self) -> Result<()>;

    /// Launch the background thread that repeatedly calls `receive` and
    /// invokes `on_frame` for each frame it gets.
    fn start(&mut self, on_frame: Box<dyn FnMut(CanFrame) + Send>) -> Result<()>;

    /// Stop the background thread and wait for it to exit.
    fn join(&mut self);
}
