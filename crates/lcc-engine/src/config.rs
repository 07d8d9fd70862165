use serde::{Deserialize, Serialize};

use lcc_transport::UartBaudRate;

/// Host-supplied connection configuration. The engine never reads this from
/// disk; it only needs to be round-trippable so a host application's own
/// settings storage can serialize it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device: String,
    pub uart_baudrate: SerdeBaudRate,
}

/// `UartBaudRate` mirror that derives `Serialize`/`Deserialize` without
/// reaching into `lcc-transport` to add a dependency it doesn't otherwise need.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerdeBaudRate {
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

impl From<SerdeBaudRate> for UartBaudRate {
    fn from(value: SerdeBaudRate) -> Self {
        match value {
            SerdeBaudRate::B1200 => UartBaudRate::B1200,
            SerdeBaudRate::B2400 => UartBaudRate::B2400,
            SerdeBaudRate::B4800 => UartBaudRate::B4800,
            SerdeBaudRate::B9600 => UartBaudRate::B9600,
            SerdeBaudRate::B19200 => UartBaudRate::B19200,
            SerdeBaudRate::B28800 => UartBaudRate::B28800,
            SerdeBaudRate::B38400 => UartBaudRate::B38400,
            SerdeBaudRate::B57600 => UartBaudRate::B57600,
            SerdeBaudRate::B115200 => UartBaudRate::B115200,
            SerdeBaudRate::B230400 => UartBaudRate::B230400,
            SerdeBaudRate::B460800 => UartBaudRate::B460800,
        }
    }
}

impl DeviceConfig {
    pub fn to_zhou_ligong_config(&self) -> lcc_transport::ZhouLigongConfig {
        lcc_transport::ZhouLigongConfig {
            device: self.device.clone(),
            uart_baudrate: self.uart_baudrate.into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_converts_to_transport_config() {
        let config = DeviceConfig {
            device: "/dev/ttyUSB0".into(),
            uart_baudrate: SerdeBaudRate::B115200,
        };
        let transport_config = config.to_zhou_ligong_config();
        assert_eq!(transport_config.device, "/dev/ttyUSB0");
        assert_eq!(transport_config.uart_baudrate, UartBaudRate::B115200);
    }
}
