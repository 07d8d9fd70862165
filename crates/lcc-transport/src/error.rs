use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open serial device {device}: {source}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },

    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("dongle did not respond to `{command}` within {attempts} attempts")]
    HandshakeTimeout { command: String, attempts: u32 },

    #[error("transport is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;
