//! Driver for the Zhou Ligong USBCAN dongle: a cheap USB-serial adapter
//! that bridges a 125 kbit/s CAN bus over a fixed 16-byte binary record.

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use lcc_core::CanFrame;

use crate::error::{Result, TransportError};
use crate::CanTransport;

/// UART baud rates the dongle accepts after the configuration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartBaudRate {
    B1200,
    B2400,
    B4800,
    B9600,
    B19200,
    B28800,
    B38400,
    B57600,
    B115200,
    B230400,
    B460800,
}

impl UartBaudRate {
    pub const fn as_u32(self) -> u32 {
        match self {
            UartBaudRate::B1200 => 1200,
            UartBaudRate::B2400 => 2400,
            UartBaudRate::B4800 => 4800,
            UartBaudRate::B9600 => 9600,
            UartBaudRate::B19200 => 19200,
            UartBaudRate::B28800 => 28800,
            UartBaudRate::B38400 => 38400,
            UartBaudRate::B57600 => 57600,
            UartBaudRate::B115200 => 115200,
            UartBaudRate::B230400 => 230400,
            UartBaudRate::B460800 => 460800,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZhouLigongConfig {
    pub device: String,
    pub uart_baudrate: UartBaudRate,
}

const CONFIG_BAUD: u32 = 9600;
const CAN_BUS_BAUD_CMD: &str = "can_b 125\n";
const CAN_BUS_BAUD_EXPECT: &str = "real baud is 125";
const MODE_CMD: &str = "mod 1\n";
const MODE_EXPECT: &str = "OK";
const HANDSHAKE_RETRY_INTERVAL: Duration = Duration::from_millis(200);
const HANDSHAKE_MAX_ATTEMPTS: u32 = 5;

const RECORD_LEN: usize = 16;
const LEAD_BYTE: u8 = 0xAA;

type SharedPort = Arc<Mutex<Option<Box<dyn serialport::SerialPort>>>>;

pub struct ZhouLigongTransport {
    config: ZhouLigongConfig,
    port: SharedPort,
    stop_flag: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl ZhouLigongTransport {
    pub fn new(config: ZhouLigongConfig) -> Self {
        Self {
            config,
            port: Arc::new(Mutex::new(None)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    fn with_port<R>(&self, f: impl FnOnce(&mut Box<dyn serialport::SerialPort>) -> Result<R>) -> Result<R> {
        let mut guard = self.port.lock().expect("serial port mutex poisoned");
        let port = guard.as_mut().ok_or(TransportError::NotConnected)?;
        f(port)
    }

    /// Send `command`, retrying until `expect` appears in the response or
    /// the attempt budget runs out.
    fn expect_response(
        port: &mut Box<dyn serialport::SerialPort>,
        command: &str,
        expect: &str,
    ) -> Result<()> {
        let mut buf = [0u8; 256];
        for _ in 0..HANDSHAKE_MAX_ATTEMPTS {
            port.write_all(command.as_bytes())?;
            port.flush()?;
            let deadline = Instant::now() + Duration::from_secs(1);
            let mut accumulated = Vec::new();
            while Instant::now() < deadline {
                match port.read(&mut buf) {
                    Ok(n) if n > 0 => {
                        accumulated.extend_from_slice(&buf[..n]);
                        if String::from_utf8_lossy(&accumulated).contains(expect) {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                    Err(e) => return Err(e.into()),
                }
                std::thread::sleep(HANDSHAKE_RETRY_INTERVAL);
            }
        }
        Err(TransportError::HandshakeTimeout {
            command: command.to_string(),
            attempts: HANDSHAKE_MAX_ATTEMPTS,
        })
    }

    fn uart_baud_command(&self) -> String {
        format!("uart_b {}\n", self.config.uart_baudrate.as_u32())
    }
}

impl CanTransport for ZhouLigongTransport {
    fn connect(&mut self) -> Result<()> {
        let mut port = serialport::new(&self.config.device, CONFIG_BAUD)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|source| TransportError::Open {
                device: self.config.device.clone(),
                source,
            })?;

        port.write_data_terminal_ready(true)?;

        Self::expect_response(&mut port, CAN_BUS_BAUD_CMD, CAN_BUS_BAUD_EXPECT)?;
        Self::expect_response(&mut port, MODE_CMD, MODE_EXPECT)?;
        Self::expect_response(&mut port, &self.uart_baud_command(), MODE_EXPECT)?;

        port.write_data_terminal_ready(false)?;
        port.flush()?;
        port.set_baud_rate(self.config.uart_baudrate.as_u32())?;
        let _ = port.clear(serialport::ClearBuffer::All);

        *self.port.lock().expect("serial port mutex poisoned") = Some(port);
        tracing::info!(device = %self.config.device, "zhou ligong dongle connected");
        Ok(())
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        let record = encode_record(frame);
        self.with_port(|port| {
            port.write_all(&record)?;
            port.flush()?;
            Ok(())
        })
    }

    fn receive(&mut self) -> Result<Option<CanFrame>> {
        self.with_port(|port| read_one_record(port.as_mut()))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.join();
        *self.port.lock().expect("serial port mutex poisoned") = None;
        Ok(())
    }

    fn start(&mut self, mut on_frame: Box<dyn FnMut(CanFrame) + Send>) -> Result<()> {
        self.stop_flag.store(false, Ordering::Relaxed);
        let port = self.port.clone();
        let stop_flag = self.stop_flag.clone();

        self.thread_handle = Some(std::thread::spawn(move || loop {
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            let frame = {
                let mut guard = port.lock().expect("serial port mutex poisoned");
                match guard.as_mut() {
                    Some(p) => read_one_record(p.as_mut()),
                    None => break,
                }
            };
            match frame {
                Ok(Some(frame)) => on_frame(frame),
                Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                Err(e) => {
                    tracing::error!(error = %e, "zhou ligong receive error");
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }));
        Ok(())
    }

    fn join(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Build the fixed 16-byte wire record for a frame.
fn encode_record(frame: &CanFrame) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[0] = LEAD_BYTE;
    record[1] = frame.is_extended as u8;
    record[2] = frame.is_remote as u8;
    record[3] = frame.data.len() as u8;
    BigEndian::write_u32(&mut record[4..8], frame.id & 0x1FFF_FFFF);
    record[8..8 + frame.data.len()].copy_from_slice(&frame.data);
    record
}

/// Decode a filled-in 16-byte wire record. Returns `None` (not an error) on
/// lead-byte mismatch: a sync loss is recoverable by continuing to read,
/// not a reason to tear down the transport.
fn decode_record(record: &[u8; RECORD_LEN]) -> Option<CanFrame> {
    if record[0] != LEAD_BYTE {
        tracing::warn!(lead = record[0], "lost frame sync on zhou ligong transport");
        return None;
    }
    let dlc = (record[3] as usize).min(8);
    let id = BigEndian::read_u32(&record[4..8]) & 0x1FFF_FFFF;
    let mut frame = CanFrame::new(id, &record[8..8 + dlc]);
    frame.is_extended = record[1] != 0;
    frame.is_remote = record[2] != 0;
    Some(frame)
}

/// Read one 16-byte record off `port`, retrying a single short read before
/// giving up, and decode it. Written as a free function over a trait object
/// so both the synchronous [`ZhouLigongTransport::receive`] and the
/// background thread spawned by [`ZhouLigongTransport::start`] can call it
/// without needing a `&mut self` borrow.
fn read_one_record(port: &mut dyn serialport::SerialPort) -> Result<Option<CanFrame>> {
    let mut record = [0u8; RECORD_LEN];
    let n = match port.read(&mut record) {
        Ok(n) => n,
        Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let n = if n < RECORD_LEN && n > 0 {
        std::thread::sleep(Duration::from_millis(50));
        let mut rest = vec![0u8; RECORD_LEN - n];
        match port.read(&mut rest) {
            Ok(extra) if n + extra == RECORD_LEN => {
                record[n..].copy_from_slice(&rest[..extra]);
                RECORD_LEN
            }
            _ => return Ok(None),
        }
    } else {
        n
    };

    if n == 0 {
        return Ok(None);
    }
    Ok(decode_record(&record))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let frame = CanFrame::new(0x195B4ABC, &[0x01, 0x23, 0x45, 0x67, 0x89, 0xAB, 0xCD, 0xEF]);
        let record = encode_record(&frame);
        assert_eq!(record[0], LEAD_BYTE);
        assert_eq!(record[3], 8);
        let decoded = decode_record(&record).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_record_empty_payload_roundtrip() {
        let frame = CanFrame::new(0x10701ABC, &[]);
        let record = encode_record(&frame);
        assert_eq!(record[3], 0);
        let decoded = decode_record(&record).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_decode_rejects_bad_lead_byte() {
        let mut record = [0u8; RECORD_LEN];
        record[0] = 0x55;
        assert!(decode_record(&record).is_none());
    }

    #[test]
    fn test_uart_baud_command_format() {
        let config = ZhouLigongConfig {
            device: "/dev/null".into(),
            uart_baudrate: UartBaudRate::B57600,
        };
        let transport = ZhouLigongTransport::new(config);
        assert_eq!(transport.uart_baud_command(), "uart_b 57600\n");
    }
}
