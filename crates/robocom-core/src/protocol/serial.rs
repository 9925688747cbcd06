//! Serial port handling
//!
//! Provides the serial-port transport for talking to the robot controller.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::{debug, info, trace};

use super::source::{ByteSink, ByteSource};
use super::{ProtocolError, DEFAULT_BAUD_RATE};
use crate::config::LinkConfig;

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, product) = match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                (Some(usb_info.vid), Some(usb_info.pid), usb_info.product)
            }
            _ => (None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            product,
        }
    }
}

/// Sort key putting Arduino-style ports first:
///  - ttyACM* / usbmodem* (sorted numerically by suffix)
///  - then ttyUSB* / usbserial*
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    let numbered = |rest: &str| rest.parse::<usize>().unwrap_or(usize::MAX);

    for prefix in ["ttyACM", "tty.usbmodem", "cu.usbmodem"] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            return (0, numbered(rest), basename.to_string());
        }
    }
    for prefix in ["ttyUSB", "tty.usbserial", "cu.usbserial"] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            return (1, numbered(rest), basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports, most likely robot ports first
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// How long to wait after opening `port_name` before the link is usable
///
/// Boards that reset when the port opens need about two seconds to come back.
/// Ports whose path contains `USB` go through a separate USB-serial chip and are
/// usable right away.
pub fn settle_delay(port_name: &str) -> Duration {
    if port_name.contains("USB") {
        Duration::ZERO
    } else {
        Duration::from_millis(2000)
    }
}

/// Open a serial port with 8N1 framing and a short read timeout
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    serialport::new(name, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(Duration::from_millis(100))
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(e.to_string()),
        })
}

/// Serial port transport with one byte of pushback for `peek`
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    peeked: Option<u8>,
    rx_bytes: u64,
}

impl SerialTransport {
    /// Wrap an already opened port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            peeked: None,
            rx_bytes: 0,
        }
    }

    /// Open the port named in `config` and wait for the board to settle
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        if config.port_name.is_empty() {
            return Err(ProtocolError::ConfigError("no port name configured".into()));
        }

        let port = open_port(&config.port_name, Some(config.baud_rate))?;
        info!("Opened {} at {} baud", config.port_name, config.baud_rate);

        let delay = config.settle_delay();
        if !delay.is_zero() {
            info!("Waiting {}ms for the board to reset", delay.as_millis());
            std::thread::sleep(delay);
        }

        // Drop whatever the bootloader printed while we waited
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| ProtocolError::SerialError(e.to_string()))?;

        Ok(Self::new(port))
    }

    /// Device name, if the driver reports one
    pub fn port_name(&self) -> Option<String> {
        self.port.name()
    }

    /// Total bytes consumed from the port
    pub fn rx_bytes(&self) -> u64 {
        self.rx_bytes
    }

    fn to_io(e: serialport::Error) -> io::Error {
        io::Error::new(io::ErrorKind::Other, e)
    }

    fn read_from_port(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.port.read_exact(buf)?;
        self.rx_bytes = self.rx_bytes.saturating_add(buf.len() as u64);
        Ok(())
    }
}

impl ByteSource for SerialTransport {
    fn available(&mut self) -> io::Result<usize> {
        let waiting = self.port.bytes_to_read().map_err(Self::to_io)? as usize;
        Ok(waiting + usize::from(self.peeked.is_some()))
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        if self.peeked.is_none() {
            self.peeked = self.read_byte()?;
        }
        Ok(self.peeked)
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.peeked.take() {
            return Ok(Some(b));
        }
        if self.port.bytes_to_read().map_err(Self::to_io)? == 0 {
            return Ok(None);
        }
        let mut b = [0u8; 1];
        self.read_from_port(&mut b)?;
        Ok(Some(b[0]))
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let start = match self.peeked.take() {
            Some(b) => {
                buf[0] = b;
                1
            }
            None => 0,
        };
        self.read_from_port(&mut buf[start..])?;
        trace!("Read {} bytes from port", buf.len());
        Ok(())
    }
}

impl ByteSink for SerialTransport {
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        debug!("Wrote {} bytes to port", bytes.len());
        Ok(())
    }
}
